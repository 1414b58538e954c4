//! Chunked file storage on a UTXO ledger using the BCAT protocol
//!
//! A file is split into chunks, each chunk is published in its own
//! transaction as a BCAT part record, and a final reference transaction lists
//! the chunk ids in order together with the file metadata.

pub mod chunk;
pub mod decode;
pub mod ledger;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod upload;

pub use decode::BcatDecoder;
pub use protocol::{FileMetadata, TxId};
pub use upload::{UploadConfig, UploadError, UploadOrchestrator};
