use crate::chunk::ChunkError;
use crate::ledger::LedgerError;
use crate::protocol::ProtocolError;
use crate::session::SessionError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Insufficient funds: need {required} sats, {available} available ({shortfall} short)")]
    InsufficientFunds {
        required: u64,
        available: u64,
        shortfall: u64,
    },

    #[error("Mempool conflict: {0}")]
    MempoolConflict(String),

    #[error("Broadcast timed out: {0}")]
    Timeout(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailure(String),

    #[error("Transaction of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Broadcast rate limited, retry in {remaining:?}")]
    RateLimited { remaining: Duration },

    #[error("Chunks not uploaded yet: {pending:?}")]
    IncompleteChunks { pending: Vec<usize> },

    #[error("Chunk index {index} out of range ({total} chunks)")]
    ChunkIndexOutOfRange { index: usize, total: usize },

    #[error("Upload stopped")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("File error: {0}")]
    File(String),

    #[error("Session error: {0}")]
    Session(String),
}

impl UploadError {
    /// Errors worth an automatic retry with fresh funding
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::MempoolConflict(_) | UploadError::Timeout(_))
    }

    pub fn is_mempool_conflict(&self) -> bool {
        matches!(self, UploadError::MempoolConflict(_))
    }

    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::InvalidConfiguration(_) => "invalid_configuration",
            UploadError::InsufficientFunds { .. } => "insufficient_funds",
            UploadError::MempoolConflict(_) => "mempool_conflict",
            UploadError::Timeout(_) => "timeout",
            UploadError::BroadcastFailure(_) => "broadcast_failure",
            UploadError::PayloadTooLarge { .. } => "payload_too_large",
            UploadError::RateLimited { .. } => "rate_limited",
            UploadError::IncompleteChunks { .. } => "incomplete_chunks",
            UploadError::ChunkIndexOutOfRange { .. } => "index_out_of_range",
            UploadError::Cancelled => "cancelled",
            UploadError::InvalidState(_) => "invalid_state",
            UploadError::InvalidStateTransition(_) => "invalid_state_transition",
            UploadError::Signing(_) => "signing",
            UploadError::Ledger(_) => "ledger",
            UploadError::File(_) => "file",
            UploadError::Session(_) => "session",
        }
    }
}

const CONFLICT_MARKERS: &[&str] = &[
    "mempool-conflict",
    "mempool conflict",
    "double spend",
    "double-spend",
    "missing inputs",
    "missingorspent",
    "already spent",
    "conflict",
];

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out"];

/// Classify a broadcaster rejection message
pub fn classify_rejection(message: &str) -> UploadError {
    let lower = message.to_ascii_lowercase();

    if CONFLICT_MARKERS.iter().any(|m| lower.contains(m)) {
        UploadError::MempoolConflict(message.to_string())
    } else if TIMEOUT_MARKERS.iter().any(|m| lower.contains(m)) {
        UploadError::Timeout(message.to_string())
    } else {
        UploadError::BroadcastFailure(message.to_string())
    }
}

impl From<LedgerError> for UploadError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                required,
                available,
            } => UploadError::InsufficientFunds {
                required,
                available,
                shortfall: required.saturating_sub(available),
            },
            LedgerError::Rejected(message) => classify_rejection(&message),
            LedgerError::Signing(message) => UploadError::Signing(message),
            other => UploadError::Ledger(other.to_string()),
        }
    }
}

impl From<ChunkError> for UploadError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::InvalidConfiguration(message) => UploadError::InvalidConfiguration(message),
            other => UploadError::File(other.to_string()),
        }
    }
}

impl From<ProtocolError> for UploadError {
    fn from(err: ProtocolError) -> Self {
        UploadError::InvalidConfiguration(err.to_string())
    }
}

impl From<SessionError> for UploadError {
    fn from(err: SessionError) -> Self {
        UploadError::Session(err.to_string())
    }
}

pub type UploadResult<T> = Result<T, UploadError>;
