use crate::chunk::compression::CompressionMode;
use crate::protocol::TxId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Uploading,
    Success,
    Failed,
}

/// Upload state of one slice of a file.
///
/// The slice bytes are not serialized; a restored session re-reads them from
/// the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkState {
    pub index: usize,
    #[serde(skip)]
    pub data: Bytes,
    pub size: usize,
    pub status: ChunkStatus,
    /// Set only when `status` is `Success`
    pub txid: Option<TxId>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<i64>,
}

impl ChunkState {
    pub fn new(index: usize, data: Bytes) -> Self {
        Self {
            index,
            size: data.len(),
            data,
            status: ChunkStatus::Pending,
            txid: None,
            attempts: 0,
            last_error: None,
            last_attempt_at: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ChunkStatus::Success
    }
}

/// A file read into memory and ready to be chunked
#[derive(Debug, Clone)]
pub struct PreparedFile {
    /// BLAKE3 of the original file bytes, hex encoded
    pub fingerprint: String,
    pub file_name: String,
    pub mime_type: String,
    /// Size of the original file
    pub file_size: u64,
    pub compression: CompressionMode,
    /// Bytes that get chunked (compressed when `compression` is not `None`)
    pub payload: Bytes,
}
