//! Metrics for upload and decode operations
//!
//! Series are recorded through the `metrics` facade; install any recorder
//! to collect them.
//!
//! - Chunk uploads, failures and fresh-funding retries
//! - Bytes committed on-chain
//! - Broadcast latency
//! - Reference transactions and decoded files

pub mod recorder;

pub use recorder::{
    init_metrics, record_broadcast_duration, record_chunk_failed, record_chunk_retry,
    record_chunk_uploaded, record_file_decoded, record_reference_broadcast, UploadTimer,
};
