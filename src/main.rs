use anyhow::{bail, Context};
use bcatstream::chunk::fingerprint;
use bcatstream::decode::BcatDecoder;
use bcatstream::ledger::{MemoryLedger, RateFeeEstimator};
use bcatstream::upload::{UploadConfig, UploadEvent, UploadOrchestrator};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    bcatstream::metrics::init_metrics();

    println!("bcatstream - upload and read back a file over an in-memory ledger");
    println!("==================================================================\n");

    let config = match std::env::var("BCAT_CONFIG") {
        Ok(path) => UploadConfig::from_json_file(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => UploadConfig::immediate().with_chunk_size(16 * 1024),
    };

    let manager = config.chunk_manager()?;
    let file = match std::env::args().nth(1) {
        Some(path) => manager
            .prepare_file(Path::new(&path), "application/octet-stream")
            .await
            .with_context(|| format!("reading {path}"))?,
        None => {
            let text = "BCAT stores files as ordered chunk transactions.\n".repeat(2_000);
            manager.prepare_bytes("demo.txt", "text/plain", Bytes::from(text))
        }
    };
    let original_fingerprint = file.fingerprint.clone();

    println!(
        "✓ Prepared {} ({} bytes, fingerprint {})",
        file.file_name,
        file.file_size,
        &original_fingerprint[..16]
    );

    let ledger = Arc::new(MemoryLedger::with_funds(4, 50_000_000));
    let services = ledger.services(Arc::new(RateFeeEstimator::new(config.fee_rate_sats_per_kb)));
    let orchestrator = UploadOrchestrator::new(config, services, file)?;

    let mut events = orchestrator
        .take_event_receiver()
        .context("event receiver already taken")?;
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let UploadEvent::ChunkUploaded { index, txid } = event {
                println!("  chunk {index:>3} -> {txid}");
            }
        }
    });

    let progress = orchestrator.process_in_batches().await?;
    if progress.failed_chunks > 0 {
        bail!("{} chunks failed to upload", progress.failed_chunks);
    }

    let reference = orchestrator
        .finalize_reference(orchestrator.default_metadata())
        .await?;
    drop(orchestrator);
    let _ = reporter.await;

    println!("\n✓ Reference transaction: {reference}");
    println!("  {} transactions broadcast", ledger.broadcast_count());

    let decoder = BcatDecoder::new(ledger.clone());
    let decoded = decoder.fetch_file(&reference).await?;

    if fingerprint(&decoded.data) != original_fingerprint {
        bail!("decoded file does not match the original");
    }

    info!("Round trip verified");
    println!("✓ Decoded {} bytes, contents match", decoded.data.len());

    Ok(())
}
