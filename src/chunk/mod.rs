pub mod compression;
pub mod error;
pub mod manager;
pub mod types;

pub use compression::{compress, decompress, CompressionError, CompressionMode};
pub use error::{ChunkError, Result};
pub use manager::{chunk, fingerprint, ChunkManager};
pub use types::{ChunkState, ChunkStatus, PreparedFile};
