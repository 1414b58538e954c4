use crate::protocol::TxId;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Insufficient funds: need {required} sats, {available} available")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Transaction not found: {0}")]
    NotFound(TxId),

    /// The broadcaster refused the transaction; the message is the node's reason
    #[error("Broadcast rejected: {0}")]
    Rejected(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for LedgerError {
    fn from(err: bincode::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
