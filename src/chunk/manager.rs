use std::path::Path;

use blake3::Hasher;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::compression::{compress, CompressionMode};
use super::error::{ChunkError, Result};
use super::types::{ChunkState, PreparedFile};

/// Split `data` into slices of `chunk_size` bytes; the last slice may be shorter.
///
/// Slices share the input buffer.
pub fn chunk(data: &Bytes, chunk_size: usize) -> Result<Vec<Bytes>> {
    if chunk_size == 0 {
        return Err(ChunkError::InvalidConfiguration(
            "chunk size must be greater than zero".into(),
        ));
    }

    let mut chunks = Vec::with_capacity(data.len().div_ceil(chunk_size));
    let mut offset = 0;

    while offset < data.len() {
        let end = std::cmp::min(offset + chunk_size, data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }

    Ok(chunks)
}

/// BLAKE3 content fingerprint, hex encoded
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize().to_hex().to_string()
}

pub struct ChunkManager {
    chunk_size: usize,
    compression: CompressionMode,
}

impl ChunkManager {
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidConfiguration(
                "chunk size must be greater than zero".into(),
            ));
        }

        Ok(Self {
            chunk_size,
            compression: CompressionMode::None,
        })
    }

    pub fn with_compression(mut self, compression: CompressionMode) -> Self {
        self.compression = compression;
        self
    }

    /// Prepare in-memory file contents for upload
    pub fn prepare_bytes(
        &self,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Bytes,
    ) -> PreparedFile {
        let payload = match self.compression {
            CompressionMode::None => data.clone(),
            mode => compress(&data, mode),
        };

        PreparedFile {
            fingerprint: fingerprint(&data),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            file_size: data.len() as u64,
            compression: self.compression,
            payload,
        }
    }

    /// Read a file from disk and prepare it for upload
    pub async fn prepare_file(&self, file_path: &Path, mime_type: &str) -> Result<PreparedFile> {
        let mut file = File::open(file_path).await?;
        let mut file_data = Vec::new();
        file.read_to_end(&mut file_data).await?;

        let file_name = file_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Ok(self.prepare_bytes(file_name, mime_type, Bytes::from(file_data)))
    }

    /// Fresh pending chunk states for a prepared file
    pub fn split(&self, file: &PreparedFile) -> Result<Vec<ChunkState>> {
        Ok(chunk(&file.payload, self.chunk_size)?
            .into_iter()
            .enumerate()
            .map(|(index, data)| ChunkState::new(index, data))
            .collect())
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn compression(&self) -> CompressionMode {
        self.compression
    }
}
