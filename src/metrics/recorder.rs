//! Metrics recorder for BCAT uploads

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    describe_counter!("bcat_chunks_uploaded_total", "Chunk transactions broadcast");
    describe_counter!(
        "bcat_chunk_failures_total",
        "Chunk uploads that ended in failure, by error kind"
    );
    describe_counter!(
        "bcat_chunk_retries_total",
        "Automatic retries with fresh funding"
    );
    describe_counter!("bcat_bytes_uploaded_total", "Chunk payload bytes broadcast");
    describe_counter!(
        "bcat_reference_transactions_total",
        "Reference transactions broadcast"
    );
    describe_counter!("bcat_files_decoded_total", "Files reassembled from chain");
    describe_counter!("bcat_bytes_decoded_total", "Bytes reassembled from chain");

    describe_gauge!("bcat_active_uploads", "Upload runs currently in progress");

    describe_histogram!(
        "bcat_broadcast_duration_seconds",
        "Time from submission to broadcaster response"
    );
    describe_histogram!("bcat_upload_duration_seconds", "Duration of a full upload run");
    describe_histogram!(
        "bcat_reference_chunk_count",
        "Chunks listed per reference transaction"
    );
}

pub fn record_chunk_uploaded(session_id: &str, chunk_size: usize) {
    counter!("bcat_chunks_uploaded_total", "session_id" => session_id.to_string()).increment(1);
    counter!("bcat_bytes_uploaded_total", "session_id" => session_id.to_string())
        .increment(chunk_size as u64);
}

pub fn record_chunk_failed(session_id: &str, kind: &'static str) {
    counter!("bcat_chunk_failures_total", "session_id" => session_id.to_string(), "kind" => kind)
        .increment(1);
}

pub fn record_chunk_retry(session_id: &str) {
    counter!("bcat_chunk_retries_total", "session_id" => session_id.to_string()).increment(1);
}

pub fn record_broadcast_duration(duration: Duration) {
    histogram!("bcat_broadcast_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_reference_broadcast(session_id: &str, chunk_count: usize) {
    counter!("bcat_reference_transactions_total", "session_id" => session_id.to_string())
        .increment(1);
    histogram!("bcat_reference_chunk_count").record(chunk_count as f64);
}

pub fn record_file_decoded(bytes: usize) {
    counter!("bcat_files_decoded_total").increment(1);
    counter!("bcat_bytes_decoded_total").increment(bytes as u64);
}

/// Tracks one upload run; the active gauge drops when it is dropped
pub struct UploadTimer {
    start_time: Instant,
}

impl UploadTimer {
    pub fn start() -> Self {
        gauge!("bcat_active_uploads").increment(1.0);
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Drop for UploadTimer {
    fn drop(&mut self) {
        gauge!("bcat_active_uploads").decrement(1.0);
        histogram!("bcat_upload_duration_seconds").record(self.start_time.elapsed().as_secs_f64());
    }
}
