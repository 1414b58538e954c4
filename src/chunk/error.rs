use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Compression error: {0}")]
    Compression(#[from] super::compression::CompressionError),
}

pub type Result<T> = std::result::Result<T, ChunkError>;
