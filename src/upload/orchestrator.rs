use crate::chunk::{ChunkManager, ChunkState, ChunkStatus, PreparedFile};
use crate::ledger::size::estimate_tx_size;
use crate::ledger::{LedgerServices, TxOutput, UnsignedTransaction, Utxo};
use crate::metrics::{self, UploadTimer};
use crate::protocol::{
    build_chunk_part, build_reference_record, data_output_script, FileMetadata, TxId,
};
use crate::session::{SessionStatus, SessionStore, UploadProgress, UploadSession};
use crate::upload::config::UploadConfig;
use crate::upload::control::RunControl;
use crate::upload::error::{UploadError, UploadResult};
use crate::upload::retry::{retry_with_policy, RetryOn};
use crate::upload::state_machine::{transition_chunk, transition_session, ChunkEvent, SessionEvent};
use crate::upload::types::{AuxiliaryOutput, RunState, UploadEvent};
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Drives one file through chunk uploads and the final reference transaction.
///
/// All mutation of the session goes through this type. Clones share state,
/// so a clone can pause or stop a run from another task.
#[derive(Clone)]
pub struct UploadOrchestrator {
    config: Arc<UploadConfig>,
    services: LedgerServices,
    file: Arc<PreparedFile>,
    session: Arc<RwLock<UploadSession>>,
    control: RunControl,
    running: Arc<AtomicBool>,
    funding_lock: Arc<tokio::sync::Mutex<()>>,
    /// One holder per chunk index from the success check to the recorded outcome
    chunk_locks: Arc<DashMap<usize, Arc<tokio::sync::Mutex<()>>>>,
    finalize_lock: Arc<tokio::sync::Mutex<()>>,
    last_broadcast: Arc<Mutex<Option<Instant>>>,
    event_tx: mpsc::UnboundedSender<UploadEvent>,
    event_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<UploadEvent>>>>,
    store: Option<Arc<SessionStore>>,
}

struct RunGuard {
    running: Arc<AtomicBool>,
    _timer: UploadTimer,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl UploadOrchestrator {
    pub fn new(
        config: UploadConfig,
        services: LedgerServices,
        file: PreparedFile,
    ) -> UploadResult<Self> {
        config.validate()?;
        let chunks = ChunkManager::new(config.chunk_size)?.split(&file)?;
        let session = UploadSession::new(&file, config.chunk_size, chunks);

        info!(
            "Prepared upload {} of {} ({} bytes, {} chunks)",
            session.session_id,
            file.file_name,
            file.file_size,
            session.total_chunks()
        );

        Ok(Self::from_parts(config, services, file, session))
    }

    /// Pick up a saved session for the same file and chunk size, or start fresh.
    ///
    /// Chunks that were mid-upload when the session was saved go back to pending.
    pub async fn restore(
        config: UploadConfig,
        services: LedgerServices,
        file: PreparedFile,
        store: Arc<SessionStore>,
    ) -> UploadResult<Self> {
        config.validate()?;
        let chunks = ChunkManager::new(config.chunk_size)?.split(&file)?;

        let saved = store
            .find_by_fingerprint(&file.fingerprint, config.chunk_size)
            .await?;

        let session = match saved {
            Some(saved)
                if saved.chunks.len() == chunks.len() && saved.compression == file.compression =>
            {
                info!(
                    "Resuming session {} ({}/{} chunks uploaded)",
                    saved.session_id,
                    saved.count(ChunkStatus::Success),
                    saved.total_chunks()
                );
                merge_saved(saved, chunks)
            }
            Some(saved) => {
                warn!(
                    "Saved session {} does not match the prepared file, starting over",
                    saved.session_id
                );
                UploadSession::new(&file, config.chunk_size, chunks)
            }
            None => UploadSession::new(&file, config.chunk_size, chunks),
        };

        let orchestrator =
            Self::from_parts(config, services, file, session).with_session_store(store);
        orchestrator.persist().await;
        Ok(orchestrator)
    }

    fn from_parts(
        config: UploadConfig,
        services: LedgerServices,
        file: PreparedFile,
        session: UploadSession,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            config: Arc::new(config),
            services,
            file: Arc::new(file),
            session: Arc::new(RwLock::new(session)),
            control: RunControl::new(),
            running: Arc::new(AtomicBool::new(false)),
            funding_lock: Arc::new(tokio::sync::Mutex::new(())),
            chunk_locks: Arc::new(DashMap::new()),
            finalize_lock: Arc::new(tokio::sync::Mutex::new(())),
            last_broadcast: Arc::new(Mutex::new(None)),
            event_tx,
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
            store: None,
        }
    }

    /// Persist a snapshot after every state change
    pub fn with_session_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Take event receiver (can only be called once)
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.event_rx.lock().take()
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn session_id(&self) -> String {
        self.session.read().session_id.clone()
    }

    pub fn session(&self) -> UploadSession {
        self.session.read().clone()
    }

    pub fn chunk(&self, index: usize) -> Option<ChunkState> {
        self.session.read().chunks.get(index).cloned()
    }

    pub fn progress(&self) -> UploadProgress {
        UploadProgress::from_session(&self.session.read())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn run_state(&self) -> RunState {
        self.control.state()
    }

    /// Metadata describing the prepared file, with the compression flag set
    pub fn default_metadata(&self) -> FileMetadata {
        let metadata = FileMetadata::new(self.file.mime_type.clone())
            .with_filename(self.file.file_name.clone());
        match self.file.compression.flag() {
            Some(flag) => metadata.with_flag(flag),
            None => metadata,
        }
    }

    // ============== Run control ==============

    /// Suspend the active run before its next chunk
    pub fn pause(&self) {
        if self.control.state() == RunState::Running {
            self.control.set(RunState::Paused);
            info!("Upload {} paused", self.session_id());
            self.emit(UploadEvent::Paused);
        }
    }

    pub fn resume(&self) {
        if self.control.state() == RunState::Paused {
            self.control.set(RunState::Running);
            info!("Upload {} resumed", self.session_id());
            self.emit(UploadEvent::Resumed);
        }
    }

    /// Abort remaining chunks. An in-flight broadcast still completes and is recorded.
    pub fn stop(&self) {
        if self.control.set(RunState::Stopped) != RunState::Stopped {
            info!("Upload {} stopping", self.session_id());
            self.emit(UploadEvent::Stopped);
        }
    }

    // ============== Chunk uploads ==============

    /// Upload one chunk, returning its transaction id.
    ///
    /// A chunk that already succeeded returns its recorded id without touching
    /// the ledger. Concurrent calls for the same index are serialized, so a
    /// caller that arrives mid-upload gets the id the first one recorded. A
    /// mempool conflict earns one retry with fresh funding while the attempt
    /// budget allows.
    pub async fn upload_chunk(
        &self,
        index: usize,
        force_fresh_funding: bool,
    ) -> UploadResult<TxId> {
        let cooldown = force_fresh_funding.then_some(self.config.fresh_funding_cooldown);
        self.upload_chunk_with(index, cooldown).await
    }

    /// User-driven upload or retry of a single chunk
    pub async fn upload_chunk_manually(&self, index: usize) -> UploadResult<TxId> {
        if self.session.read().status.is_completed() {
            return Err(UploadError::InvalidState("upload already completed".into()));
        }
        self.upload_chunk(index, false).await
    }

    async fn upload_chunk_with(
        &self,
        index: usize,
        initial_cooldown: Option<Duration>,
    ) -> UploadResult<TxId> {
        if let Some(txid) = self.confirmed_txid(index)? {
            debug!("Chunk {} already uploaded as {}", index, txid);
            return Ok(txid);
        }

        // A concurrent caller for the same index waits here and then sees its outcome
        let in_flight = self.chunk_lock(index);
        let _in_flight = in_flight.lock().await;
        if let Some(txid) = self.confirmed_txid(index)? {
            debug!("Chunk {} uploaded by a concurrent caller as {}", index, txid);
            return Ok(txid);
        }

        let max_retries = if initial_cooldown.is_some() { 0 } else { 1 };
        let policy = self
            .config
            .retry_policy()
            .with_max_retries(max_retries)
            .retry_on(RetryOn::MempoolConflict);

        retry_with_policy(
            &policy,
            initial_cooldown,
            || self.attempts(index),
            move |attempt| self.attempt_chunk(index, attempt.cooldown),
        )
        .await
    }

    /// Chunk upload plus one transient-failure retry, as used by runs
    async fn upload_with_recovery(&self, index: usize) -> UploadResult<TxId> {
        let policy = self
            .config
            .retry_policy()
            .with_max_retries(1)
            .retry_on(RetryOn::Transient);

        retry_with_policy(
            &policy,
            None,
            || self.attempts(index),
            move |attempt| self.upload_chunk_with(index, attempt.cooldown),
        )
        .await
    }

    async fn attempt_chunk(&self, index: usize, cooldown: Option<Duration>) -> UploadResult<TxId> {
        let (data, attempt) = self.start_chunk(index)?;
        self.emit(UploadEvent::ChunkStarted { index, attempt });
        self.persist().await;

        if let Some(delay) = cooldown {
            debug!("Chunk {} waiting {:?} before fresh funding", index, delay);
            self.emit(UploadEvent::RetryScheduled { index, delay });
            metrics::record_chunk_retry(&self.session_id());
            tokio::time::sleep(delay).await;
        }

        let script = data_output_script(&build_chunk_part(&data));
        let result = self.fund_sign_broadcast(vec![TxOutput::data(script)], None).await;

        match result {
            Ok(txid) => {
                self.finish_chunk(index, ChunkEvent::Succeeded(txid))?;
                info!("Chunk {} uploaded as {} (attempt {})", index, txid, attempt);
                metrics::record_chunk_uploaded(&self.session_id(), data.len());
                self.emit(UploadEvent::ChunkUploaded { index, txid });
                self.persist().await;
                Ok(txid)
            }
            Err(err) => {
                if let Err(e) = self.finish_chunk(index, ChunkEvent::Failed(err.to_string())) {
                    warn!("Could not record failure of chunk {}: {}", index, e);
                }
                warn!("Chunk {} attempt {} failed: {}", index, attempt, err);
                metrics::record_chunk_failed(&self.session_id(), err.kind());
                self.emit(UploadEvent::ChunkFailed {
                    index,
                    error: err.to_string(),
                    transient: err.is_transient(),
                });
                self.persist().await;
                Err(err)
            }
        }
    }

    fn start_chunk(&self, index: usize) -> UploadResult<(Bytes, u32)> {
        let mut session = self.session.write();
        let total = session.total_chunks();

        let status = if session.status.is_active() {
            session.status
        } else {
            transition_session(session.status, SessionEvent::Start)?
        };

        let chunk = session
            .chunks
            .get_mut(index)
            .ok_or(UploadError::ChunkIndexOutOfRange { index, total })?;
        transition_chunk(chunk, ChunkEvent::Start)?;
        let started = (chunk.data.clone(), chunk.attempts);

        session.status = status;
        session.touch();
        Ok(started)
    }

    fn finish_chunk(&self, index: usize, event: ChunkEvent) -> UploadResult<()> {
        let mut session = self.session.write();
        let total = session.total_chunks();
        let chunk = session
            .chunks
            .get_mut(index)
            .ok_or(UploadError::ChunkIndexOutOfRange { index, total })?;
        transition_chunk(chunk, event)?;
        session.touch();
        Ok(())
    }

    fn confirmed_txid(&self, index: usize) -> UploadResult<Option<TxId>> {
        let session = self.session.read();
        let chunk = session.chunks.get(index).ok_or(UploadError::ChunkIndexOutOfRange {
            index,
            total: session.total_chunks(),
        })?;
        Ok(chunk.txid.filter(|_| chunk.is_success()))
    }

    fn chunk_lock(&self, index: usize) -> Arc<tokio::sync::Mutex<()>> {
        self.chunk_locks.entry(index).or_default().value().clone()
    }

    fn attempts(&self, index: usize) -> u32 {
        self.session
            .read()
            .chunks
            .get(index)
            .map(|c| c.attempts)
            .unwrap_or(0)
    }

    // ============== Runs ==============

    /// Upload every unfinished chunk in index order.
    ///
    /// A chunk that still fails after its retry is left failed and the run
    /// moves on. Returns `Cancelled` when stopped.
    pub async fn process_sequentially(&self) -> UploadResult<UploadProgress> {
        let _run = self.begin_run()?;
        let pending = self.session.read().unfinished_indices();
        info!("Uploading {} chunks sequentially", pending.len());

        let outcome = self.run_sequential(&pending).await;
        self.finish_run().await;
        outcome.map(|_| self.progress())
    }

    async fn run_sequential(&self, pending: &[usize]) -> UploadResult<()> {
        for (position, &index) in pending.iter().enumerate() {
            if position > 0 {
                self.control.sleep(self.config.inter_chunk_delay).await?;
            }
            self.wait_while_paused().await?;

            if let Err(e) = self.upload_with_recovery(index).await {
                warn!("Chunk {} left failed: {}", index, e);
            }
        }
        Ok(())
    }

    /// Upload unfinished chunks in concurrent batches of `batch_size`
    pub async fn process_in_batches(&self) -> UploadResult<UploadProgress> {
        let _run = self.begin_run()?;
        let pending = self.session.read().unfinished_indices();
        info!(
            "Uploading {} chunks in batches of {}",
            pending.len(),
            self.config.batch_size
        );

        let outcome = self.run_batches(&pending).await;
        self.finish_run().await;
        outcome.map(|_| self.progress())
    }

    async fn run_batches(&self, pending: &[usize]) -> UploadResult<()> {
        for (n, batch) in pending.chunks(self.config.batch_size).enumerate() {
            if n > 0 {
                self.control.sleep(self.config.inter_chunk_delay).await?;
            }
            self.wait_while_paused().await?;

            let uploads = batch.iter().map(|&index| self.upload_with_recovery(index));
            let results = join_all(uploads).await;
            for (index, result) in batch.iter().zip(results) {
                if let Err(e) = result {
                    warn!("Chunk {} left failed: {}", index, e);
                }
            }
        }
        Ok(())
    }

    fn begin_run(&self) -> UploadResult<RunGuard> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(UploadError::InvalidState("an upload run is already active".into()));
        }

        if self.control.state() == RunState::Stopped {
            self.control.set(RunState::Running);
        }

        Ok(RunGuard {
            running: self.running.clone(),
            _timer: UploadTimer::start(),
        })
    }

    async fn finish_run(&self) {
        {
            let mut session = self.session.write();
            if !session.failed_indices().is_empty() && !session.status.is_completed() {
                session.status = SessionStatus::Failed;
                session.touch();
            }
        }
        self.persist().await;
    }

    async fn wait_while_paused(&self) -> UploadResult<()> {
        self.control.checkpoint(self.config.pause_poll_interval).await
    }

    // ============== Reference transaction ==============

    pub async fn finalize_reference(&self, metadata: FileMetadata) -> UploadResult<TxId> {
        self.finalize_reference_with(metadata, None).await
    }

    /// Publish the reference record listing every chunk id in index order.
    ///
    /// Calling it again after success returns the same id.
    pub async fn finalize_reference_with(
        &self,
        mut metadata: FileMetadata,
        auxiliary: Option<AuxiliaryOutput>,
    ) -> UploadResult<TxId> {
        let _finalizing = self.finalize_lock.lock().await;

        let existing = self.session.read().main_txid;
        if let Some(txid) = existing {
            debug!("Reference already broadcast as {}", txid);
            return Ok(txid);
        }

        if metadata.flag.is_none() {
            if let Some(flag) = self.file.compression.flag() {
                metadata.flag = Some(flag.to_string());
            }
        }
        metadata.validate()?;

        let txids = {
            let session = self.session.read();
            session
                .ordered_txids()
                .ok_or_else(|| UploadError::IncompleteChunks {
                    pending: session.unfinished_indices(),
                })?
        };

        self.check_broadcast_spacing()?;

        let payload = build_reference_record(&metadata, &txids);
        let mut outputs = Vec::with_capacity(2);
        if let Some(aux) = auxiliary {
            outputs.push(TxOutput {
                value: aux.value,
                script: aux.script,
            });
        }
        outputs.push(TxOutput::data(data_output_script(&payload)));

        let max = self.config.max_transaction_size;
        let script_lens: Vec<usize> = outputs.iter().map(|o| o.script.len()).collect();
        let size = estimate_tx_size(1, &script_lens, true);
        if size > max {
            return Err(UploadError::PayloadTooLarge { size, max });
        }

        let txid = self.fund_sign_broadcast(outputs, Some(max)).await?;

        {
            let mut session = self.session.write();
            let next = transition_session(session.status, SessionEvent::Complete)?;
            session.status = next;
            session.main_txid = Some(txid);
            session.touch();
        }

        info!("Reference transaction {} lists {} chunks", txid, txids.len());
        metrics::record_reference_broadcast(&self.session_id(), txids.len());
        self.emit(UploadEvent::ReferenceBroadcast {
            txid,
            chunk_count: txids.len(),
        });
        self.persist().await;

        Ok(txid)
    }

    fn check_broadcast_spacing(&self) -> UploadResult<()> {
        let spacing = self.config.min_broadcast_spacing;
        if let Some(last) = *self.last_broadcast.lock() {
            let elapsed = last.elapsed();
            if elapsed < spacing {
                return Err(UploadError::RateLimited {
                    remaining: spacing - elapsed,
                });
            }
        }
        Ok(())
    }

    /// Discard all chunk state and split the file again
    pub async fn rechunk(&self, chunk_size: usize) -> UploadResult<()> {
        if self.is_running() {
            return Err(UploadError::InvalidState(
                "cannot rechunk during an active run".into(),
            ));
        }

        let tx_size = self.config.chunk_tx_size(chunk_size);
        if tx_size > self.config.max_transaction_size {
            return Err(UploadError::InvalidConfiguration(format!(
                "a {chunk_size} byte chunk needs a {tx_size} byte transaction"
            )));
        }
        let chunks = ChunkManager::new(chunk_size)?.split(&self.file)?;

        {
            let mut session = self.session.write();
            if session.status.is_completed() {
                return Err(UploadError::InvalidState("upload already completed".into()));
            }
            if session.count(ChunkStatus::Uploading) > 0 {
                return Err(UploadError::InvalidState("a chunk upload is in flight".into()));
            }

            info!(
                "Rechunking {} from {} to {} byte chunks ({} chunks)",
                session.file_name,
                session.chunk_size,
                chunk_size,
                chunks.len()
            );
            session.chunks = chunks;
            session.chunk_size = chunk_size;
            session.status = SessionStatus::Pending;
            session.touch();
        }

        self.persist().await;
        Ok(())
    }

    // ============== Funding and broadcast ==============

    /// Fund `outputs`, sign and broadcast. Inputs are released on failure.
    async fn fund_sign_broadcast(
        &self,
        outputs: Vec<TxOutput>,
        size_limit: Option<usize>,
    ) -> UploadResult<TxId> {
        let funding = &self.services.funding;

        // Without concurrent allocation support, one selection-to-spend cycle at a time
        let _allocation = if funding.supports_concurrent_allocation() {
            None
        } else {
            Some(self.funding_lock.lock().await)
        };

        let script_lens: Vec<usize> = outputs.iter().map(|o| o.script.len()).collect();
        let output_value: u64 = outputs.iter().map(|o| o.value).sum();
        let fee_for = |inputs: usize| {
            self.services
                .fees
                .fee_for_size(estimate_tx_size(inputs, &script_lens, true))
        };

        // Each extra input raises the fee, so re-select until the selection pays for itself.
        // The source ends the loop with InsufficientFunds once the wallet runs dry.
        let mut sized_for = 1;
        let selection = loop {
            let selection = funding.select_inputs(output_value + fee_for(sized_for)).await?;
            let count = selection.inputs.len().max(1);
            if count <= sized_for || selection.total >= output_value + fee_for(count) {
                break selection;
            }
            debug!(
                "Selection of {} inputs cannot cover its own fee, re-selecting",
                count
            );
            self.release_inputs(&selection.inputs).await;
            sized_for = count;
        };
        let input_count = selection.inputs.len();
        debug!(
            "Selected {} inputs worth {} sats",
            input_count, selection.total
        );

        let required = output_value + fee_for(input_count.max(1));
        if selection.total < required {
            self.release_inputs(&selection.inputs).await;
            return Err(UploadError::InsufficientFunds {
                required,
                available: selection.total,
                shortfall: required - selection.total,
            });
        }

        if let Some(max) = size_limit {
            let size = estimate_tx_size(input_count, &script_lens, true);
            if size > max {
                self.release_inputs(&selection.inputs).await;
                return Err(UploadError::PayloadTooLarge { size, max });
            }
        }

        let change = selection.total - required;
        let unsigned = UnsignedTransaction {
            inputs: selection.inputs.clone(),
            outputs,
            change: (change > 0).then_some(change),
        };

        match self.sign_and_submit(&unsigned).await {
            Ok(txid) => {
                if let Err(e) = funding.mark_spent(&selection.inputs).await {
                    warn!("Broadcast {} but could not mark inputs spent: {}", txid, e);
                }
                *self.last_broadcast.lock() = Some(Instant::now());
                Ok(txid)
            }
            Err(err) => {
                self.release_inputs(&selection.inputs).await;
                Err(err)
            }
        }
    }

    async fn sign_and_submit(&self, unsigned: &UnsignedTransaction) -> UploadResult<TxId> {
        let raw = self.services.signer.sign(unsigned).await?;
        debug!("Submitting {} byte transaction", raw.len());

        let timeout = self.config.broadcast_timeout;
        let started = Instant::now();
        let submit = self.services.broadcaster.submit(&raw);
        let result = match tokio::time::timeout(timeout, submit).await {
            Ok(result) => result.map_err(UploadError::from),
            Err(_) => Err(UploadError::Timeout(format!(
                "no broadcaster response after {:?}",
                timeout
            ))),
        };
        metrics::record_broadcast_duration(started.elapsed());

        result
    }

    async fn release_inputs(&self, inputs: &[Utxo]) {
        if let Err(e) = self.services.funding.release(inputs).await {
            warn!("Failed to release {} funding inputs: {}", inputs.len(), e);
        }
    }

    // ============== Bookkeeping ==============

    fn emit(&self, event: UploadEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn persist(&self) {
        if let Some(store) = &self.store {
            let snapshot = self.session.read().clone();
            if let Err(e) = store.save(&snapshot).await {
                warn!("Failed to persist session {}: {}", snapshot.session_id, e);
            }
        }
    }
}

/// Overlay saved chunk progress on a fresh split of the same file
fn merge_saved(saved: UploadSession, fresh: Vec<ChunkState>) -> UploadSession {
    let chunks = fresh
        .into_iter()
        .zip(saved.chunks.iter())
        .map(|(mut chunk, saved)| {
            chunk.status = match (saved.status, saved.txid) {
                (ChunkStatus::Success, Some(_)) => ChunkStatus::Success,
                (ChunkStatus::Failed, _) => ChunkStatus::Failed,
                _ => ChunkStatus::Pending,
            };
            chunk.txid = saved.txid.filter(|_| chunk.status == ChunkStatus::Success);
            chunk.attempts = saved.attempts;
            chunk.last_error = saved.last_error.clone();
            chunk.last_attempt_at = saved.last_attempt_at;
            chunk
        })
        .collect();

    UploadSession { chunks, ..saved }
}
