use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: usize, reason: String },

    #[error("Invalid transaction id: {0}")]
    InvalidTxId(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}

impl ProtocolError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedRecord {
            offset,
            reason: reason.into(),
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
