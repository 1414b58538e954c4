use crate::chunk::{ChunkState, ChunkStatus, CompressionMode, PreparedFile};
use crate::protocol::TxId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_resumable(&self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Uploading | SessionStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Uploading)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionStatus::Completed)
    }
}

/// Everything known about one file upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: String,
    /// BLAKE3 of the original file bytes
    pub fingerprint: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub chunk_size: usize,
    pub compression: CompressionMode,
    pub chunks: Vec<ChunkState>,
    /// Reference transaction, set once the upload is completed
    pub main_txid: Option<TxId>,
    pub status: SessionStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UploadSession {
    pub fn new(file: &PreparedFile, chunk_size: usize, chunks: Vec<ChunkState>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            fingerprint: file.fingerprint.clone(),
            file_name: file.file_name.clone(),
            file_size: file.file_size,
            mime_type: file.mime_type.clone(),
            chunk_size,
            compression: file.compression,
            chunks,
            main_txid: None,
            status: SessionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn count(&self, status: ChunkStatus) -> usize {
        self.chunks.iter().filter(|c| c.status == status).count()
    }

    /// Indices of chunks without a confirmed transaction, in index order
    pub fn unfinished_indices(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| !c.is_success())
            .map(|c| c.index)
            .collect()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Failed)
            .map(|c| c.index)
            .collect()
    }

    pub fn all_chunks_uploaded(&self) -> bool {
        self.chunks.iter().all(|c| c.is_success())
    }

    /// Chunk transaction ids in index order, if every chunk is uploaded
    pub fn ordered_txids(&self) -> Option<Vec<TxId>> {
        self.chunks.iter().map(|c| c.txid.filter(|_| c.is_success())).collect()
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.is_success())
            .map(|c| c.size as u64)
            .sum()
    }

    pub fn payload_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.size as u64).sum()
    }

    pub fn progress_percent(&self) -> f32 {
        if self.chunks.is_empty() {
            return if self.status.is_completed() { 100.0 } else { 0.0 };
        }
        let completed = self.count(ChunkStatus::Success) as f32;
        (completed / self.chunks.len() as f32) * 100.0
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }
}

/// Point-in-time view of an upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadProgress {
    pub session_id: String,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    pub pending_chunks: usize,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub progress_percent: f32,
    pub status: SessionStatus,
    pub main_txid: Option<TxId>,
}

impl UploadProgress {
    pub fn from_session(session: &UploadSession) -> Self {
        let completed = session.count(ChunkStatus::Success);
        let failed = session.count(ChunkStatus::Failed);
        Self {
            session_id: session.session_id.clone(),
            total_chunks: session.total_chunks(),
            completed_chunks: completed,
            failed_chunks: failed,
            pending_chunks: session.total_chunks() - completed - failed,
            bytes_uploaded: session.bytes_uploaded(),
            total_bytes: session.payload_size(),
            progress_percent: session.progress_percent(),
            status: session.status,
            main_txid: session.main_txid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub fingerprint: String,
    pub file_name: String,
    pub status: SessionStatus,
    pub progress_percent: f32,
    pub main_txid: Option<TxId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionSummary {
    pub fn from_session(session: &UploadSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            fingerprint: session.fingerprint.clone(),
            file_name: session.file_name.clone(),
            status: session.status,
            progress_percent: session.progress_percent(),
            main_txid: session.main_txid,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}
