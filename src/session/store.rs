use crate::chunk::ChunkState;
use crate::protocol::TxId;
use crate::session::error::{SessionError, SessionResult};
use crate::session::types::{SessionStatus, SessionSummary, UploadSession};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

/// Durable record of upload sessions.
///
/// Chunk bytes are never stored; callers re-read the file and overlay the
/// persisted chunk states on a fresh split.
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (or create) a session database
    pub async fn new(db_url: &str) -> SessionResult<Self> {
        let pool = SqlitePool::connect(db_url).await?;
        Self::with_pool(pool).await
    }

    /// In-memory database, for testing
    pub async fn new_in_memory() -> SessionResult<Self> {
        // Each connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> SessionResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_sessions (
                session_id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                chunk_size INTEGER NOT NULL,
                compression TEXT NOT NULL,
                chunks TEXT NOT NULL,
                main_txid TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_upload_sessions_fingerprint
            ON upload_sessions(fingerprint)
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_upload_sessions_status ON upload_sessions(status)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Save or update a session
    pub async fn save(&self, session: &UploadSession) -> SessionResult<()> {
        let chunks_json = serde_json::to_string(&session.chunks)?;
        let compression_json = serde_json::to_string(&session.compression)?;
        let status_json = serde_json::to_string(&session.status)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO upload_sessions
            (session_id, fingerprint, file_name, file_size, mime_type, chunk_size, compression,
             chunks, main_txid, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.fingerprint)
        .bind(&session.file_name)
        .bind(session.file_size as i64)
        .bind(&session.mime_type)
        .bind(session.chunk_size as i64)
        .bind(compression_json)
        .bind(chunks_json)
        .bind(session.main_txid.map(|txid| txid.to_hex()))
        .bind(status_json)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load(&self, session_id: &str) -> SessionResult<Option<UploadSession>> {
        let row = sqlx::query("SELECT * FROM upload_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Most recent session for a file chunked at `chunk_size`
    pub async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
        chunk_size: usize,
    ) -> SessionResult<Option<UploadSession>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM upload_sessions
            WHERE fingerprint = ? AND chunk_size = ?
            ORDER BY updated_at DESC LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .bind(chunk_size as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Reference transaction of an earlier completed upload of the same file
    pub async fn find_completed(&self, fingerprint: &str) -> SessionResult<Option<TxId>> {
        let status_json = serde_json::to_string(&SessionStatus::Completed)?;
        let row = sqlx::query(
            r#"
            SELECT main_txid FROM upload_sessions
            WHERE fingerprint = ? AND status = ? AND main_txid IS NOT NULL
            ORDER BY updated_at DESC LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .bind(status_json)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let hex: String = row.try_get("main_txid")?;
                Ok(Some(parse_txid(&hex)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_all(&self) -> SessionResult<Vec<SessionSummary>> {
        let rows = sqlx::query("SELECT * FROM upload_sessions ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| session_from_row(row).map(|s| SessionSummary::from_session(&s)))
            .collect()
    }

    pub async fn list_by_status(
        &self,
        status: SessionStatus,
    ) -> SessionResult<Vec<SessionSummary>> {
        let status_json = serde_json::to_string(&status)?;

        let rows =
            sqlx::query("SELECT * FROM upload_sessions WHERE status = ? ORDER BY updated_at DESC")
                .bind(status_json)
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| session_from_row(row).map(|s| SessionSummary::from_session(&s)))
            .collect()
    }

    pub async fn delete(&self, session_id: &str) -> SessionResult<bool> {
        let result = sqlx::query("DELETE FROM upload_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> SessionResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM upload_sessions")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_txid(hex: &str) -> SessionResult<TxId> {
    TxId::from_hex(hex).map_err(|e| SessionError::InvalidTxId(e.to_string()))
}

fn session_from_row(row: &SqliteRow) -> SessionResult<UploadSession> {
    let chunks: Vec<ChunkState> = serde_json::from_str(&row.try_get::<String, _>("chunks")?)?;
    let main_txid = row
        .try_get::<Option<String>, _>("main_txid")?
        .map(|hex| parse_txid(&hex))
        .transpose()?;

    Ok(UploadSession {
        session_id: row.try_get("session_id")?,
        fingerprint: row.try_get("fingerprint")?,
        file_name: row.try_get("file_name")?,
        file_size: row.try_get::<i64, _>("file_size")? as u64,
        mime_type: row.try_get("mime_type")?,
        chunk_size: row.try_get::<i64, _>("chunk_size")? as usize,
        compression: serde_json::from_str(&row.try_get::<String, _>("compression")?)?,
        chunks,
        main_txid,
        status: serde_json::from_str(&row.try_get::<String, _>("status")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkManager, ChunkStatus};
    use bytes::Bytes;

    fn create_session(data: &'static [u8]) -> UploadSession {
        let manager = ChunkManager::new(4).unwrap();
        let file = manager.prepare_bytes("notes.txt", "text/plain", Bytes::from_static(data));
        let chunks = manager.split(&file).unwrap();
        UploadSession::new(&file, 4, chunks)
    }

    #[tokio::test]
    async fn test_store_creation() {
        let store = SessionStore::new_in_memory().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = SessionStore::new_in_memory().await.unwrap();
        let mut session = create_session(b"0123456789");
        session.chunks[0].status = ChunkStatus::Success;
        session.chunks[0].txid = Some(TxId::from_bytes([7; 32]));
        session.chunks[0].attempts = 2;
        session.status = SessionStatus::Uploading;

        store.save(&session).await.unwrap();

        let loaded = store.load(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.fingerprint, session.fingerprint);
        assert_eq!(loaded.file_size, 10);
        assert_eq!(loaded.chunk_size, 4);
        assert_eq!(loaded.status, SessionStatus::Uploading);
        assert_eq!(loaded.chunks.len(), 3);
        assert_eq!(loaded.chunks[0].txid, Some(TxId::from_bytes([7; 32])));
        assert_eq!(loaded.chunks[0].attempts, 2);
        assert_eq!(loaded.chunks[2].size, 2);
        // Slice bytes are not persisted
        assert!(loaded.chunks[0].data.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = SessionStore::new_in_memory().await.unwrap();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_fingerprint_matches_chunk_size() {
        let store = SessionStore::new_in_memory().await.unwrap();
        let session = create_session(b"hello world");
        store.save(&session).await.unwrap();

        let found = store
            .find_by_fingerprint(&session.fingerprint, 4)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.session_id, session.session_id);

        assert!(store
            .find_by_fingerprint(&session.fingerprint, 8)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_completed() {
        let store = SessionStore::new_in_memory().await.unwrap();
        let mut session = create_session(b"hello world");
        store.save(&session).await.unwrap();
        assert!(store.find_completed(&session.fingerprint).await.unwrap().is_none());

        let main = TxId::from_bytes([0xab; 32]);
        session.main_txid = Some(main);
        session.status = SessionStatus::Completed;
        store.save(&session).await.unwrap();

        assert_eq!(store.find_completed(&session.fingerprint).await.unwrap(), Some(main));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = SessionStore::new_in_memory().await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..4 {
            let session = create_session(b"abcdef");
            ids.push(session.session_id.clone());
            store.save(&session).await.unwrap();
        }

        assert_eq!(store.list_all().await.unwrap().len(), 4);
        assert_eq!(
            store.list_by_status(SessionStatus::Pending).await.unwrap().len(),
            4
        );
        assert!(store
            .list_by_status(SessionStatus::Completed)
            .await
            .unwrap()
            .is_empty());

        assert!(store.delete(&ids[0]).await.unwrap());
        assert!(!store.delete(&ids[0]).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 3);
    }
}
