//! Optional pre-compression of the file payload
//!
//! The mode travels on-chain in the reference record's flag field.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Compression mode applied before chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Chunks carry the raw file bytes (default)
    #[default]
    None,
    /// LZ4 block compression with a prepended size
    Lz4,
}

impl CompressionMode {
    const LZ4_FLAG: &'static str = "lz4";

    /// Value written to the reference record flag field
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            CompressionMode::None => None,
            CompressionMode::Lz4 => Some(Self::LZ4_FLAG),
        }
    }

    /// Mode indicated by a reference record flag. Unknown flags map to `None`.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some(f) if f.eq_ignore_ascii_case(Self::LZ4_FLAG) => CompressionMode::Lz4,
            _ => CompressionMode::None,
        }
    }
}

/// Prepare the file payload for chunking
pub fn compress(data: &[u8], mode: CompressionMode) -> Bytes {
    match mode {
        CompressionMode::None => Bytes::copy_from_slice(data),
        CompressionMode::Lz4 => Bytes::from(lz4_flex::compress_prepend_size(data)),
    }
}

/// Undo [`compress`] on a reassembled payload
pub fn decompress(payload: &[u8], mode: CompressionMode) -> Result<Bytes, CompressionError> {
    if mode == CompressionMode::None {
        return Ok(Bytes::copy_from_slice(payload));
    }
    lz4_flex::decompress_size_prepended(payload)
        .map(Bytes::from)
        .map_err(|e| CompressionError::InvalidLz4Block {
            payload_len: payload.len(),
            reason: e.to_string(),
        })
}

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("payload of {payload_len} bytes is not a valid lz4 block: {reason}")]
    InvalidLz4Block { payload_len: usize, reason: String },
}
