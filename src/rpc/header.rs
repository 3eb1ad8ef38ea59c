//! Request / reply header metadata.
//!
//! Carried alongside every framed request: string key/value pairs, the
//! write-transform list for the reply, the wire protocol id and the client
//! type.  Two reserved keys carry a handler exception across the runtime
//! boundary on the reply.

use std::collections::BTreeMap;

use crate::dispatcher::Priority;
use crate::error::EnvelopeError;

use super::transform::TransformId;

/// Reserved key: exception category token set by the handler.
pub const HEADER_EX: &str = "uex";
/// Reserved key: human-readable exception message set by the handler.
pub const HEADER_EX_WHAT: &str = "uexw";
/// Upstream priority override (integer band, 0 = highest).
pub const PRIORITY_HEADER: &str = "thrift_priority";

/// Wire encoding of the envelope and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ProtocolId {
    /// Verbose, tagged big-endian encoding.
    Binary = 0,
    /// Varint / zigzag compact encoding.
    Compact = 2,
}

impl ProtocolId {
    pub fn from_raw(raw: i16) -> Result<Self, EnvelopeError> {
        match raw {
            0 => Ok(Self::Binary),
            2 => Ok(Self::Compact),
            other => Err(EnvelopeError::UnsupportedProtocol(other)),
        }
    }
}

/// How the client framed its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ClientType {
    Header = 0,
    FramedDeprecated = 1,
    UnframedDeprecated = 2,
    HttpServer = 3,
    HttpClient = 4,
    FramedCompact = 5,
}

#[derive(Debug, Clone)]
pub struct Header {
    headers: BTreeMap<String, String>,
    write_transforms: Vec<TransformId>,
    min_compress_bytes: usize,
    protocol_id: i16,
    client_type: ClientType,
}

impl Header {
    pub fn new(protocol: ProtocolId) -> Self {
        Self {
            headers: BTreeMap::new(),
            write_transforms: Vec::new(),
            min_compress_bytes: 0,
            protocol_id: protocol as i16,
            client_type: ClientType::Header,
        }
    }

    /// Header carrying a raw protocol id as received (possibly unknown).
    pub fn with_raw_protocol(protocol_id: i16) -> Self {
        Self {
            protocol_id,
            ..Self::new(ProtocolId::Binary)
        }
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn protocol_id(&self) -> i16 {
        self.protocol_id
    }

    pub fn protocol(&self) -> Result<ProtocolId, EnvelopeError> {
        ProtocolId::from_raw(self.protocol_id)
    }

    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    pub fn set_client_type(&mut self, client_type: ClientType) {
        self.client_type = client_type;
    }

    pub fn write_transforms(&self) -> &[TransformId] {
        &self.write_transforms
    }

    pub fn set_write_transforms(&mut self, transforms: Vec<TransformId>) {
        self.write_transforms = transforms;
    }

    pub fn min_compress_bytes(&self) -> usize {
        self.min_compress_bytes
    }

    pub fn set_min_compress_bytes(&mut self, n: usize) {
        self.min_compress_bytes = n;
    }

    /// Priority override from [`PRIORITY_HEADER`], if present and valid.
    pub fn call_priority(&self) -> Option<Priority> {
        let raw = self.get(PRIORITY_HEADER)?;
        raw.trim().parse::<i32>().ok().and_then(Priority::from_raw)
    }
}
