//! Allowed status transitions for chunks and sessions

use crate::chunk::{ChunkState, ChunkStatus};
use crate::protocol::TxId;
use crate::session::SessionStatus;
use crate::upload::error::{UploadError, UploadResult};

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    Start,
    Succeeded(TxId),
    Failed(String),
    /// Drop an interrupted attempt back to pending
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Complete,
    Fail,
}

/// Apply `event` to a chunk, updating its bookkeeping
pub fn transition_chunk(chunk: &mut ChunkState, event: ChunkEvent) -> UploadResult<ChunkStatus> {
    let next = match (chunk.status, &event) {
        (ChunkStatus::Pending | ChunkStatus::Failed, ChunkEvent::Start) => {
            chunk.attempts += 1;
            chunk.last_attempt_at = Some(chrono::Utc::now().timestamp());
            ChunkStatus::Uploading
        }

        (ChunkStatus::Uploading, ChunkEvent::Succeeded(txid)) => {
            chunk.txid = Some(*txid);
            chunk.last_error = None;
            ChunkStatus::Success
        }

        (ChunkStatus::Uploading, ChunkEvent::Failed(error)) => {
            chunk.last_error = Some(error.clone());
            ChunkStatus::Failed
        }

        (ChunkStatus::Uploading, ChunkEvent::Reset) => ChunkStatus::Pending,

        (ChunkStatus::Uploading, ChunkEvent::Start) => {
            return Err(UploadError::InvalidState(format!(
                "chunk {} is already in flight",
                chunk.index
            )));
        }

        (status, event) => {
            return Err(UploadError::InvalidStateTransition(format!(
                "Chunk {}: cannot handle {:?} in state {:?}",
                chunk.index, event, status
            )));
        }
    };

    chunk.status = next;
    Ok(next)
}

pub fn transition_session(
    current: SessionStatus,
    event: SessionEvent,
) -> UploadResult<SessionStatus> {
    match (current, event) {
        (SessionStatus::Completed, _) => Err(UploadError::InvalidStateTransition(format!(
            "Session is completed, cannot handle {:?}",
            event
        ))),
        (_, SessionEvent::Start) => Ok(SessionStatus::Uploading),
        (_, SessionEvent::Complete) => Ok(SessionStatus::Completed),
        (_, SessionEvent::Fail) => Ok(SessionStatus::Failed),
    }
}
