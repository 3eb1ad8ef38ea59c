//! Header write transforms (payload compression).
//!
//! The outgoing header advertises an ordered list of transforms and a
//! minimum payload size.  A payload at or below the threshold goes out
//! untouched; a larger one is passed through every listed transform in
//! order.  Unlike opportunistic frame compression, an advertised transform
//! is always applied once the threshold is crossed: the peer decodes
//! according to the list it receives, not according to the payload.
//!
//! | id | codec  | crate         |
//! |----|--------|---------------|
//! | 1  | zlib   | `miniz_oxide` |
//! | 3  | snappy | `snap` (raw)  |
//! | 5  | zstd   | `zstd`        |
//!
//! `Hmac` and `Qlz` are deprecated and never applied.

use log::warn;
use miniz_oxide::deflate::compress_to_vec_zlib;
use miniz_oxide::inflate::decompress_to_vec_zlib;

use crate::error::TransformError;

/// zlib compression level (1-10, higher = better ratio, slower).
const COMPRESSION_LEVEL: u8 = 6;

/// zstd compression level.
const ZSTD_LEVEL: i32 = 3;

/// Transform identifiers as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TransformId {
    Zlib = 1,
    /// Deprecated; never applied.
    Hmac = 2,
    Snappy = 3,
    /// Deprecated; never applied.
    Qlz = 4,
    Zstd = 5,
}

impl TransformId {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::Zlib),
            2 => Some(Self::Hmac),
            3 => Some(Self::Snappy),
            4 => Some(Self::Qlz),
            5 => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// Apply `transforms` in order if `payload` is larger than `min_bytes`.
pub fn apply(
    payload: Vec<u8>,
    transforms: &[TransformId],
    min_bytes: usize,
) -> Result<Vec<u8>, TransformError> {
    if transforms.is_empty() || payload.len() <= min_bytes {
        return Ok(payload);
    }

    let mut out = payload;
    for t in transforms {
        out = encode(*t, &out)?;
    }
    Ok(out)
}

/// Undo `transforms` (listed in the order they were applied).
pub fn reverse(payload: Vec<u8>, transforms: &[TransformId]) -> Result<Vec<u8>, TransformError> {
    let mut out = payload;
    for t in transforms.iter().rev() {
        out = decode(*t, &out)?;
    }
    Ok(out)
}

fn encode(t: TransformId, data: &[u8]) -> Result<Vec<u8>, TransformError> {
    match t {
        TransformId::Zlib => Ok(compress_to_vec_zlib(data, COMPRESSION_LEVEL)),
        TransformId::Snappy => snap::raw::Encoder::new().compress_vec(data).map_err(|e| {
            warn!("transform: snappy compress error: {}", e);
            TransformError::Failed("snappy")
        }),
        TransformId::Zstd => zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| {
            warn!("transform: zstd compress error: {}", e);
            TransformError::Failed("zstd")
        }),
        other => Err(TransformError::Unsupported(other as u16)),
    }
}

fn decode(t: TransformId, data: &[u8]) -> Result<Vec<u8>, TransformError> {
    match t {
        TransformId::Zlib => decompress_to_vec_zlib(data).map_err(|e| {
            warn!("transform: zlib inflate error: {:?}", e);
            TransformError::Corrupt("zlib")
        }),
        TransformId::Snappy => snap::raw::Decoder::new().decompress_vec(data).map_err(|e| {
            warn!("transform: snappy decompress error: {}", e);
            TransformError::Corrupt("snappy")
        }),
        TransformId::Zstd => zstd::decode_all(data).map_err(|e| {
            warn!("transform: zstd decompress error: {}", e);
            TransformError::Corrupt("zstd")
        }),
        other => Err(TransformError::Unsupported(other as u16)),
    }
}

// ── Tests ────────────────────────────────────────────────────
