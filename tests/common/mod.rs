#![allow(dead_code)]

use bcatstream::chunk::PreparedFile;
use bcatstream::ledger::{LedgerServices, MemoryLedger, RateFeeEstimator};
use bcatstream::upload::{UploadConfig, UploadEvent, UploadOrchestrator};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const FUNDING_OUTPUT: u64 = 10_000_000;

pub fn prepare(config: &UploadConfig, name: &str, data: impl Into<Bytes>) -> PreparedFile {
    config
        .chunk_manager()
        .unwrap()
        .prepare_bytes(name, "application/octet-stream", data.into())
}

pub fn funded_ledger(outputs: usize) -> (Arc<MemoryLedger>, LedgerServices) {
    let ledger = Arc::new(MemoryLedger::with_funds(outputs, FUNDING_OUTPUT));
    let services = ledger.services(Arc::new(RateFeeEstimator::new(50)));
    (ledger, services)
}

/// Orchestrator over a fresh in-memory ledger with four funding outputs
pub fn setup(
    config: UploadConfig,
    data: impl Into<Bytes>,
) -> (UploadOrchestrator, Arc<MemoryLedger>) {
    let (ledger, services) = funded_ledger(4);
    let file = prepare(&config, "test.bin", data);
    let orchestrator = UploadOrchestrator::new(config, services, file).unwrap();
    (orchestrator, ledger)
}

/// Drain whatever events are queued right now
pub fn drain(events: &mut mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn uploaded_order(events: &[UploadEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|event| match event {
            UploadEvent::ChunkUploaded { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}
