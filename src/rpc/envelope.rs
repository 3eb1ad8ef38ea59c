//! Envelope inspector: reads the message header only.
//!
//! The dispatch path needs the method name (for oneway lookup and
//! priority) long before anybody deserializes the payload.  This module
//! decodes just the message-begin fields for the two supported encodings:
//!
//! ```text
//! Binary (strict):
//! ┌──────────────────────┬────────────┬───────────┬──────────┐
//! │ 0x8001_0000 | kind   │ name len   │ name      │ seq id   │
//! │ BE i32               │ BE i32     │ UTF-8     │ BE i32   │
//! └──────────────────────┴────────────┴───────────┴──────────┘
//!
//! Compact:
//! ┌──────┬──────────────────┬───────────────┬─────────────┬──────────┐
//! │ 0x82 │ kind<<5 | ver(1) │ seq id varint │ len varint  │ name     │
//! └──────┴──────────────────┴───────────────┴─────────────┴──────────┘
//! ```
//!
//! [`method_name`] is the lenient entry point used on the dispatch path:
//! any failure is logged and yields an empty name, which degrades to the
//! default priority.  The handler rejects the payload itself later.
//!
//! The module also encodes exception replies, the only full message the
//! bridge ever produces on its own.

use log::error;

use crate::error::{AppError, EnvelopeError};

use super::header::ProtocolId;

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;
const BINARY_TYPE_MASK: u32 = 0x0000_00ff;

const COMPACT_PROTOCOL_ID: u8 = 0x82;
const COMPACT_VERSION: u8 = 1;
const COMPACT_VERSION_MASK: u8 = 0x1f;
const COMPACT_TYPE_SHIFT: u8 = 5;
const COMPACT_TYPE_BITS: u8 = 0x07;

// Field type tags used by the exception struct.
const BINARY_T_STOP: u8 = 0;
const BINARY_T_I32: u8 = 8;
const BINARY_T_STRING: u8 = 11;
const COMPACT_T_I32: u8 = 5;
const COMPACT_T_BINARY: u8 = 8;

/// Kind of message carried by the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl MessageType {
    fn from_u8(raw: u8) -> Result<Self, EnvelopeError> {
        match raw {
            1 => Ok(Self::Call),
            2 => Ok(Self::Reply),
            3 => Ok(Self::Exception),
            4 => Ok(Self::Oneway),
            other => Err(EnvelopeError::BadMessageType(other)),
        }
    }
}

/// Decoded message-begin fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBegin {
    pub name: String,
    pub kind: MessageType,
    pub seq_id: i32,
}

/// Method name of a framed request, or `""` if it cannot be read.
pub fn method_name(buf: &[u8], protocol_id: i16) -> String {
    let parsed = ProtocolId::from_raw(protocol_id).and_then(|p| parse_message_begin(buf, p));
    match parsed {
        Ok(begin) => begin.name,
        Err(EnvelopeError::UnsupportedProtocol(p)) => {
            error!("envelope: invalid protocol id {}", p);
            String::new()
        }
        Err(e) => {
            error!("envelope: received invalid message from client: {}", e);
            String::new()
        }
    }
}

/// Decode only the message header of `buf`.
pub fn parse_message_begin(
    buf: &[u8],
    protocol: ProtocolId,
) -> Result<MessageBegin, EnvelopeError> {
    let mut r = Reader { buf, pos: 0 };
    match protocol {
        ProtocolId::Binary => read_binary_begin(&mut r),
        ProtocolId::Compact => read_compact_begin(&mut r),
    }
}

fn read_binary_begin(r: &mut Reader<'_>) -> Result<MessageBegin, EnvelopeError> {
    let word = r.read_i32_be()?;
    if word >= 0 {
        // Unversioned (pre-strict) clients are not accepted.
        return Err(EnvelopeError::BadVersion(word as u32));
    }
    let word = word as u32;
    if word & VERSION_MASK != VERSION_1 {
        return Err(EnvelopeError::BadVersion(word & VERSION_MASK));
    }
    let kind = MessageType::from_u8((word & BINARY_TYPE_MASK) as u8)?;

    let len = r.read_i32_be()?;
    let name = r.read_str(i64::from(len))?;
    let seq_id = r.read_i32_be()?;

    Ok(MessageBegin { name, kind, seq_id })
}

fn read_compact_begin(r: &mut Reader<'_>) -> Result<MessageBegin, EnvelopeError> {
    let proto = r.read_u8()?;
    if proto != COMPACT_PROTOCOL_ID {
        return Err(EnvelopeError::BadProtocolId(proto));
    }

    let vt = r.read_u8()?;
    let version = vt & COMPACT_VERSION_MASK;
    if version != COMPACT_VERSION {
        return Err(EnvelopeError::BadVersion(u32::from(version)));
    }
    let kind = MessageType::from_u8((vt >> COMPACT_TYPE_SHIFT) & COMPACT_TYPE_BITS)?;

    let seq_id = r.read_varint32()? as i32;
    let len = r.read_varint32()?;
    let name = r.read_str(i64::from(len))?;

    Ok(MessageBegin { name, kind, seq_id })
}

// ── Reader ───────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&[u8], EnvelopeError> {
        if n > self.remaining() {
            return Err(EnvelopeError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, EnvelopeError> {
        Ok(self.take(1)?[0])
    }

    fn read_i32_be(&mut self) -> Result<i32, EnvelopeError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_varint32(&mut self) -> Result<u32, EnvelopeError> {
        let mut value: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(EnvelopeError::VarintOverflow)
    }

    fn read_str(&mut self, len: i64) -> Result<String, EnvelopeError> {
        if len < 0 || len as u64 > self.remaining() as u64 {
            return Err(EnvelopeError::BadLength(len));
        }
        let bytes = self.take(len as usize)?;
        core::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| EnvelopeError::InvalidUtf8)
    }
}

// ── Writer ───────────────────────────────────────────────────

/// Encode a message header.  Used for exception replies and by callers
/// that need to frame a request (tests, the demo binary).
pub fn encode_message_begin(
    protocol: ProtocolId,
    name: &str,
    kind: MessageType,
    seq_id: i32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 12);
    match protocol {
        ProtocolId::Binary => {
            out.extend_from_slice(&(VERSION_1 | kind as u32).to_be_bytes());
            write_binary_str(&mut out, name);
            out.extend_from_slice(&seq_id.to_be_bytes());
        }
        ProtocolId::Compact => {
            out.push(COMPACT_PROTOCOL_ID);
            out.push(COMPACT_VERSION | ((kind as u8) << COMPACT_TYPE_SHIFT));
            write_varint32(&mut out, seq_id as u32);
            write_varint32(&mut out, name.len() as u32);
            out.extend_from_slice(name.as_bytes());
        }
    }
    out
}

/// Encode a complete exception reply for method `name`.
///
/// Payload is the application exception struct
/// `{ 1: string message, 2: i32 type }`.
pub fn encode_exception(protocol: ProtocolId, name: &str, seq_id: i32, err: &AppError) -> Vec<u8> {
    let mut out = encode_message_begin(protocol, name, MessageType::Exception, seq_id);
    match protocol {
        ProtocolId::Binary => {
            out.push(BINARY_T_STRING);
            out.extend_from_slice(&1i16.to_be_bytes());
            write_binary_str(&mut out, &err.message);

            out.push(BINARY_T_I32);
            out.extend_from_slice(&2i16.to_be_bytes());
            out.extend_from_slice(&(err.kind as i32).to_be_bytes());

            out.push(BINARY_T_STOP);
        }
        ProtocolId::Compact => {
            out.push((1 << 4) | COMPACT_T_BINARY);
            write_varint32(&mut out, err.message.len() as u32);
            out.extend_from_slice(err.message.as_bytes());

            out.push((1 << 4) | COMPACT_T_I32);
            write_varint32(&mut out, zigzag32(err.kind as i32));

            out.push(0);
        }
    }
    out
}

fn write_binary_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as i32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_varint32(out: &mut Vec<u8>, mut n: u32) {
    while n >= 0x80 {
        out.push((n as u8) | 0x80);
        n >>= 7;
    }
    out.push(n as u8);
}

fn zigzag32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

// ── Tests ────────────────────────────────────────────────────
