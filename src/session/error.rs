use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Could not encode or decode session row: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Stored transaction id is invalid: {0}")]
    InvalidTxId(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
