use crate::chunk::{ChunkManager, CompressionMode};
use crate::ledger::size::estimate_tx_size;
use crate::protocol::chunk_part::chunk_part_len;
use crate::protocol::script::DATA_SCRIPT_PREFIX_LEN;
use crate::upload::error::{UploadError, UploadResult};
use crate::upload::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upload orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Size of each file slice in bytes
    pub chunk_size: usize,

    /// Attempt budget per chunk for automatic retries
    pub max_attempts: u32,

    /// Wait before re-funding a chunk after a mempool conflict
    pub fresh_funding_cooldown: Duration,

    /// Growth factor of the cooldown on successive retries
    pub backoff_multiplier: f64,

    /// Delay between chunks in a sequential run
    pub inter_chunk_delay: Duration,

    /// Minimum time since the last broadcast before the reference is published
    pub min_broadcast_spacing: Duration,

    /// Time budget for a single broadcast submission
    pub broadcast_timeout: Duration,

    /// Uploads in flight per parallel batch
    pub batch_size: usize,

    /// Largest reference transaction allowed
    pub max_transaction_size: usize,

    /// Upper bound on how long a paused run sleeps between checks
    pub pause_poll_interval: Duration,

    /// Fee rate for the default fee estimator
    pub fee_rate_sats_per_kb: u64,

    pub compression: CompressionMode,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 90_000,
            max_attempts: 3,
            fresh_funding_cooldown: Duration::from_secs(5),
            backoff_multiplier: 1.0,
            inter_chunk_delay: Duration::from_secs(3),
            min_broadcast_spacing: Duration::from_secs(5),
            broadcast_timeout: Duration::from_secs(10),
            batch_size: 3,
            max_transaction_size: 100_000,
            pause_poll_interval: Duration::from_millis(100),
            fee_rate_sats_per_kb: 50,
            compression: CompressionMode::None,
        }
    }
}

impl UploadConfig {
    pub fn from_json_str(json: &str) -> UploadResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| UploadError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> UploadResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            UploadError::InvalidConfiguration(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> UploadResult<()> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidConfiguration(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(UploadError::InvalidConfiguration(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(UploadError::InvalidConfiguration(
                "batch_size must be at least 1".into(),
            ));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(UploadError::InvalidConfiguration(
                "backoff_multiplier must be at least 1.0".into(),
            ));
        }

        let chunk_tx = self.chunk_tx_size(self.chunk_size);
        if chunk_tx > self.max_transaction_size {
            return Err(UploadError::InvalidConfiguration(format!(
                "a {} byte chunk needs a {chunk_tx} byte transaction, limit is {}",
                self.chunk_size, self.max_transaction_size
            )));
        }

        Ok(())
    }

    /// Estimated single-input transaction size for a chunk of `chunk_len` bytes
    pub fn chunk_tx_size(&self, chunk_len: usize) -> usize {
        estimate_tx_size(
            1,
            &[DATA_SCRIPT_PREFIX_LEN + chunk_part_len(chunk_len)],
            true,
        )
    }

    pub fn chunk_manager(&self) -> UploadResult<ChunkManager> {
        Ok(ChunkManager::new(self.chunk_size)?.with_compression(self.compression))
    }

    /// Retry schedule for fresh-funding retries
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.fresh_funding_cooldown)
            .with_multiplier(self.backoff_multiplier)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_fresh_funding_cooldown(mut self, cooldown: Duration) -> Self {
        self.fresh_funding_cooldown = cooldown;
        self
    }

    pub fn with_inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    pub fn with_min_broadcast_spacing(mut self, spacing: Duration) -> Self {
        self.min_broadcast_spacing = spacing;
        self
    }

    pub fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_transaction_size(mut self, max: usize) -> Self {
        self.max_transaction_size = max;
        self
    }

    pub fn with_compression(mut self, compression: CompressionMode) -> Self {
        self.compression = compression;
        self
    }

    /// Zero delays everywhere, for tests and local demos
    pub fn immediate() -> Self {
        Self {
            fresh_funding_cooldown: Duration::ZERO,
            inter_chunk_delay: Duration::ZERO,
            min_broadcast_spacing: Duration::ZERO,
            pause_poll_interval: Duration::from_millis(5),
            ..Self::default()
        }
    }
}
