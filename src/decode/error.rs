use crate::chunk::CompressionError;
use crate::ledger::LedgerError;
use crate::protocol::{ProtocolError, TxId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Transaction {0} carries no BCAT reference record")]
    NotBcat(TxId),

    #[error("Chunk {index} ({txid}) carries no BCAT part record")]
    CorruptChunk { index: usize, txid: TxId },

    #[error("Malformed record: {0}")]
    MalformedRecord(#[from] ProtocolError),

    #[error("Transaction lookup failed: {0}")]
    Lookup(#[from] LedgerError),

    #[error("Decompression failed: {0}")]
    Decompression(#[from] CompressionError),
}

pub type DecodeResult<T> = Result<T, DecodeError>;
