use crate::protocol::TxId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether a run should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Notifications emitted while an upload makes progress
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    ChunkStarted { index: usize, attempt: u32 },
    ChunkUploaded { index: usize, txid: TxId },
    ChunkFailed { index: usize, error: String, transient: bool },
    RetryScheduled { index: usize, delay: Duration },
    Paused,
    Resumed,
    Stopped,
    ReferenceBroadcast { txid: TxId, chunk_count: usize },
}

/// Extra output placed ahead of the reference record, such as a service fee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryOutput {
    pub value: u64,
    pub script: Vec<u8>,
}
