mod common;

use bcatstream::chunk::{ChunkStatus, CompressionMode};
use bcatstream::decode::{BcatDecoder, DecodeError};
use bcatstream::ledger::TransactionLookup;
use bcatstream::protocol::{data_output_script, is_data_output, FileMetadata};
use bcatstream::session::SessionStatus;
use bcatstream::upload::{AuxiliaryOutput, UploadConfig, UploadError, UploadEvent};
use common::{drain, prepare, setup};
use std::sync::Arc;
use std::time::Duration;

/// Ten bytes in four-byte chunks: three chunk transactions plus the reference
#[tokio::test]
async fn test_small_file_round_trip() {
    println!("\n=== Testing Small File Round Trip ===\n");

    let config = UploadConfig::immediate().with_chunk_size(4);
    let (orchestrator, ledger) = setup(config, &b"0123456789"[..]);
    assert_eq!(orchestrator.session().total_chunks(), 3);

    let progress = orchestrator.process_sequentially().await.unwrap();
    assert_eq!(progress.completed_chunks, 3);
    assert_eq!(progress.failed_chunks, 0);
    assert_eq!(progress.bytes_uploaded, 10);
    println!("✓ Uploaded {} chunks", progress.completed_chunks);

    let metadata = FileMetadata::new("text/plain").with_filename("digits.txt");
    let reference = orchestrator.finalize_reference(metadata.clone()).await.unwrap();
    assert_eq!(ledger.broadcast_count(), 4);
    assert_eq!(orchestrator.session().status, SessionStatus::Completed);
    println!("✓ Reference transaction: {}", reference);

    let decoder = BcatDecoder::new(ledger.clone());
    let record = decoder.decode_reference(&reference).await.unwrap();
    assert_eq!(record.metadata, metadata);

    let expected: Vec<_> = (0..3)
        .map(|i| orchestrator.chunk(i).unwrap().txid.unwrap())
        .collect();
    assert_eq!(record.chunk_txids, expected);

    let decoded = decoder.fetch_file(&reference).await.unwrap();
    assert_eq!(&decoded.data[..], b"0123456789");
    println!("✓ Decoded contents match");
}

#[tokio::test]
async fn test_finalize_is_idempotent() {
    let config = UploadConfig::immediate().with_chunk_size(4);
    let (orchestrator, ledger) = setup(config, &b"0123456789"[..]);

    orchestrator.process_sequentially().await.unwrap();
    let first = orchestrator
        .finalize_reference(orchestrator.default_metadata())
        .await
        .unwrap();

    let funding_before = ledger.funding_requests();
    let submits_before = ledger.submit_calls();

    let second = orchestrator
        .finalize_reference(orchestrator.default_metadata())
        .await
        .unwrap();
    assert_eq!(first, second);

    // Re-running the upload touches nothing either
    orchestrator.process_sequentially().await.unwrap();
    let recorded = orchestrator.chunk(0).unwrap().txid.unwrap();
    assert_eq!(orchestrator.upload_chunk(0, false).await.unwrap(), recorded);

    assert_eq!(ledger.funding_requests(), funding_before);
    assert_eq!(ledger.submit_calls(), submits_before);
}

/// A manual retry racing another upload of the same chunk waits for it
#[tokio::test]
async fn test_concurrent_upload_of_same_chunk_broadcasts_once() {
    println!("\n=== Testing Concurrent Upload Of One Chunk ===\n");

    let config = UploadConfig::immediate().with_chunk_size(4);
    let (orchestrator, ledger) = setup(config, &b"abcd"[..]);
    ledger.delay_next(Duration::from_millis(50));
    ledger.delay_next(Duration::from_millis(50));

    let other = orchestrator.clone();
    let (first, second) = tokio::join!(
        orchestrator.upload_chunk(0, false),
        other.upload_chunk_manually(0)
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first, second);
    assert_eq!(ledger.broadcast_count(), 1);
    assert_eq!(ledger.funding_requests(), 1);

    let chunk = orchestrator.chunk(0).unwrap();
    assert_eq!(chunk.status, ChunkStatus::Success);
    assert_eq!(chunk.attempts, 1);
    println!("✓ Both callers got {}", first);
}

#[tokio::test]
async fn test_failed_chunk_does_not_block_later_chunks() {
    println!("\n=== Testing Failure Isolation ===\n");

    let config = UploadConfig::immediate().with_chunk_size(4);
    let (orchestrator, ledger) = setup(config, &b"0123456789"[..]);

    orchestrator.upload_chunk(0, false).await.unwrap();
    ledger.reject_next("64: scriptpubkey");

    let progress = orchestrator.process_sequentially().await.unwrap();
    assert_eq!(progress.completed_chunks, 2);
    assert_eq!(progress.failed_chunks, 1);
    assert_eq!(progress.status, SessionStatus::Failed);

    let failed = orchestrator.chunk(1).unwrap();
    assert_eq!(failed.status, ChunkStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(failed.last_error.unwrap().contains("scriptpubkey"));
    assert_eq!(orchestrator.chunk(2).unwrap().status, ChunkStatus::Success);
    println!("✓ Chunk 1 failed, chunk 2 uploaded");

    let result = orchestrator.finalize_reference(FileMetadata::new("text/plain")).await;
    assert_eq!(result, Err(UploadError::IncompleteChunks { pending: vec![1] }));

    orchestrator.upload_chunk_manually(1).await.unwrap();
    let reference = orchestrator
        .finalize_reference(FileMetadata::new("text/plain"))
        .await
        .unwrap();
    println!("✓ Manual retry succeeded, reference {}", reference);

    let decoded = BcatDecoder::new(ledger.clone()).fetch_file(&reference).await.unwrap();
    assert_eq!(&decoded.data[..], b"0123456789");
}

#[tokio::test]
async fn test_mempool_conflict_retried_with_fresh_funding() {
    let config = UploadConfig::immediate().with_chunk_size(4);
    let (orchestrator, ledger) = setup(config, &b"abcd"[..]);
    let mut events = orchestrator.take_event_receiver().unwrap();

    ledger.reject_next("258: txn-mempool-conflict");
    let txid = orchestrator.upload_chunk(0, false).await.unwrap();

    let chunk = orchestrator.chunk(0).unwrap();
    assert_eq!(chunk.status, ChunkStatus::Success);
    assert_eq!(chunk.txid, Some(txid));
    assert_eq!(chunk.attempts, 2);
    assert_eq!(ledger.submit_calls(), 2);
    assert_eq!(ledger.broadcast_count(), 1);

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        UploadEvent::ChunkFailed { index: 0, transient: true, .. }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, UploadEvent::RetryScheduled { index: 0, .. })));
}

#[tokio::test]
async fn test_forced_fresh_funding_does_not_retry_again() {
    let config = UploadConfig::immediate().with_chunk_size(4);
    let (orchestrator, ledger) = setup(config, &b"abcd"[..]);

    ledger.reject_next("txn-mempool-conflict");
    let result = orchestrator.upload_chunk(0, true).await;

    assert!(matches!(result, Err(UploadError::MempoolConflict(_))));
    assert_eq!(ledger.submit_calls(), 1);
    assert_eq!(orchestrator.chunk(0).unwrap().status, ChunkStatus::Failed);
}

#[tokio::test]
async fn test_attempt_budget_exhausted() {
    let config = UploadConfig::immediate().with_chunk_size(4);
    let (orchestrator, ledger) = setup(config, &b"abcd"[..]);

    for _ in 0..3 {
        ledger.reject_next("258: txn-mempool-conflict");
    }

    let progress = orchestrator.process_sequentially().await.unwrap();
    assert_eq!(progress.failed_chunks, 1);

    let chunk = orchestrator.chunk(0).unwrap();
    assert_eq!(chunk.status, ChunkStatus::Failed);
    assert_eq!(chunk.attempts, 3);
    assert_eq!(ledger.submit_calls(), 3);
    assert_eq!(ledger.broadcast_count(), 0);

    // Manual retry is not held back by the budget
    orchestrator.upload_chunk_manually(0).await.unwrap();
    assert_eq!(orchestrator.chunk(0).unwrap().attempts, 4);
}

#[tokio::test]
async fn test_broadcast_timeout_retried_once() {
    let config = UploadConfig::immediate()
        .with_chunk_size(4)
        .with_broadcast_timeout(Duration::from_millis(50));
    let (orchestrator, ledger) = setup(config, &b"abcd"[..]);

    ledger.delay_next(Duration::from_millis(500));
    let progress = orchestrator.process_sequentially().await.unwrap();

    assert_eq!(progress.completed_chunks, 1);
    assert_eq!(orchestrator.chunk(0).unwrap().attempts, 2);
    assert_eq!(ledger.broadcast_count(), 1);
}

#[tokio::test]
async fn test_upload_chunk_timeout_surfaces() {
    let config = UploadConfig::immediate()
        .with_chunk_size(4)
        .with_broadcast_timeout(Duration::from_millis(50));
    let (orchestrator, ledger) = setup(config, &b"abcd"[..]);

    ledger.delay_next(Duration::from_millis(500));
    let result = orchestrator.upload_chunk(0, false).await;

    let err = result.unwrap_err();
    assert!(matches!(err, UploadError::Timeout(_)));
    assert!(err.is_transient());
    // Inputs from the abandoned attempt are spendable again
    assert_eq!(ledger.balance(), 4 * common::FUNDING_OUTPUT);
}

#[tokio::test]
async fn test_finalize_rate_limited() {
    let config = UploadConfig::immediate()
        .with_chunk_size(4)
        .with_min_broadcast_spacing(Duration::from_secs(10));
    let (orchestrator, ledger) = setup(config, &b"abcd"[..]);

    orchestrator.upload_chunk(0, false).await.unwrap();
    let result = orchestrator.finalize_reference(FileMetadata::new("text/plain")).await;

    match result {
        Err(UploadError::RateLimited { remaining }) => {
            assert!(remaining > Duration::from_secs(9));
            assert!(remaining <= Duration::from_secs(10));
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
    assert_eq!(ledger.broadcast_count(), 1);
}

#[tokio::test]
async fn test_finalize_after_spacing_elapsed() {
    let config = UploadConfig::immediate()
        .with_chunk_size(4)
        .with_min_broadcast_spacing(Duration::from_millis(100));
    let (orchestrator, _ledger) = setup(config, &b"abcd"[..]);

    orchestrator.upload_chunk(0, false).await.unwrap();
    assert!(matches!(
        orchestrator.finalize_reference(FileMetadata::new("text/plain")).await,
        Err(UploadError::RateLimited { .. })
    ));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(orchestrator
        .finalize_reference(FileMetadata::new("text/plain"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_reference_too_large() {
    let config = UploadConfig::immediate()
        .with_chunk_size(4)
        .with_max_transaction_size(600);
    let (orchestrator, ledger) = setup(config, vec![7u8; 80]);
    assert_eq!(orchestrator.session().total_chunks(), 20);

    orchestrator.process_sequentially().await.unwrap();
    let funding_before = ledger.funding_requests();

    let result = orchestrator.finalize_reference(orchestrator.default_metadata()).await;
    match result {
        Err(UploadError::PayloadTooLarge { size, max }) => {
            assert!(size > 600);
            assert_eq!(max, 600);
        }
        other => panic!("expected PayloadTooLarge, got {:?}", other),
    }
    assert_eq!(ledger.funding_requests(), funding_before);
    assert_eq!(ledger.broadcast_count(), 20);
}

#[tokio::test]
async fn test_insufficient_funds() {
    let config = UploadConfig::immediate().with_chunk_size(4);
    let ledger = Arc::new(bcatstream::ledger::MemoryLedger::with_funds(1, 5));
    let services = ledger.services(Arc::new(bcatstream::ledger::RateFeeEstimator::new(50)));
    let file = prepare(&config, "a.bin", &b"abcd"[..]);
    let orchestrator = bcatstream::UploadOrchestrator::new(config, services, file).unwrap();

    let err = orchestrator.upload_chunk(0, false).await.unwrap_err();
    match err {
        UploadError::InsufficientFunds {
            required,
            available,
            shortfall,
        } => {
            assert_eq!(available, 5);
            assert_eq!(shortfall, required - 5);
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }

    assert_eq!(orchestrator.chunk(0).unwrap().status, ChunkStatus::Failed);
    assert_eq!(ledger.submit_calls(), 0);
}

/// A wallet of small outputs pays once enough inputs cover their own fee
#[tokio::test]
async fn test_funding_from_many_small_inputs() {
    println!("\n=== Testing Funding From Many Inputs ===\n");

    let config = UploadConfig::immediate().with_chunk_size(4);
    let ledger = Arc::new(bcatstream::ledger::MemoryLedger::with_funds(40, 10));
    let services = ledger.services(Arc::new(bcatstream::ledger::RateFeeEstimator::new(50)));
    let file = prepare(&config, "a.bin", &b"abcd"[..]);
    let orchestrator = bcatstream::UploadOrchestrator::new(config, services, file).unwrap();

    let txid = orchestrator.upload_chunk(0, false).await.unwrap();
    assert_eq!(orchestrator.chunk(0).unwrap().txid, Some(txid));
    assert_eq!(ledger.broadcast_count(), 1);
    // The first selection was sized for one input and had to be redone
    assert!(ledger.funding_requests() >= 2);
    assert!(ledger.balance() < 400);
    println!("✓ Funded after {} selections", ledger.funding_requests());
}

/// Outputs worth less than the fee to spend them can never fund a chunk
#[tokio::test]
async fn test_dust_wallet_is_insufficient() {
    let config = UploadConfig::immediate().with_chunk_size(4);
    let ledger = Arc::new(bcatstream::ledger::MemoryLedger::with_funds(50, 5));
    let services = ledger.services(Arc::new(bcatstream::ledger::RateFeeEstimator::new(50)));
    let file = prepare(&config, "a.bin", &b"abcd"[..]);
    let orchestrator = bcatstream::UploadOrchestrator::new(config, services, file).unwrap();

    let err = orchestrator.upload_chunk(0, false).await.unwrap_err();
    match err {
        UploadError::InsufficientFunds { required, available, .. } => {
            assert_eq!(available, 250);
            assert!(required > available);
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }

    // Every intermediate selection was handed back
    assert_eq!(ledger.balance(), 250);
    assert_eq!(ledger.submit_calls(), 0);
}

#[tokio::test]
async fn test_empty_file() {
    let config = UploadConfig::immediate();
    let (orchestrator, ledger) = setup(config, Vec::new());
    assert_eq!(orchestrator.session().total_chunks(), 0);

    let progress = orchestrator.process_sequentially().await.unwrap();
    assert_eq!(progress.total_chunks, 0);

    let reference = orchestrator
        .finalize_reference(orchestrator.default_metadata())
        .await
        .unwrap();
    assert_eq!(ledger.broadcast_count(), 1);

    let decoded = BcatDecoder::new(ledger.clone()).fetch_file(&reference).await.unwrap();
    assert!(decoded.data.is_empty());
}

#[tokio::test]
async fn test_lz4_round_trip() {
    let config = UploadConfig::immediate()
        .with_chunk_size(64)
        .with_compression(CompressionMode::Lz4);
    let original = "the same line again and again\n".repeat(200);
    let (orchestrator, ledger) = setup(config, original.clone().into_bytes());

    let session = orchestrator.session();
    assert!(session.payload_size() < original.len() as u64);

    orchestrator.process_in_batches().await.unwrap();
    let reference = orchestrator
        .finalize_reference(FileMetadata::new("text/plain"))
        .await
        .unwrap();

    let decoded = BcatDecoder::new(ledger.clone()).fetch_file(&reference).await.unwrap();
    assert_eq!(decoded.record.metadata.flag.as_deref(), Some("lz4"));
    assert_eq!(decoded.data, original.as_bytes());
}

#[tokio::test]
async fn test_auxiliary_output_precedes_reference() {
    let config = UploadConfig::immediate().with_chunk_size(4);
    let (orchestrator, ledger) = setup(config, &b"abcdefgh"[..]);
    orchestrator.process_sequentially().await.unwrap();

    let aux = AuxiliaryOutput {
        value: 0,
        script: data_output_script(b"\x09thumbnail"),
    };
    let reference = orchestrator
        .finalize_reference_with(FileMetadata::new("image/png"), Some(aux.clone()))
        .await
        .unwrap();

    let tx = ledger.fetch_transaction(&reference).await.unwrap();
    assert_eq!(tx.outputs[0].script, aux.script);
    assert!(is_data_output(&tx.outputs[1].script));

    let record = BcatDecoder::new(ledger.clone())
        .decode_reference(&reference)
        .await
        .unwrap();
    assert_eq!(record.chunk_count(), 2);
}

#[tokio::test]
async fn test_chunk_is_not_a_reference() {
    let config = UploadConfig::immediate().with_chunk_size(4);
    let (orchestrator, ledger) = setup(config, &b"abcd"[..]);
    let chunk_txid = orchestrator.upload_chunk(0, false).await.unwrap();

    let result = BcatDecoder::new(ledger.clone()).decode_reference(&chunk_txid).await;
    assert!(matches!(result, Err(DecodeError::NotBcat(txid)) if txid == chunk_txid));
}

#[tokio::test]
async fn test_rechunk_resets_state() {
    let config = UploadConfig::immediate().with_chunk_size(4);
    let (orchestrator, _ledger) = setup(config, &b"0123456789"[..]);

    orchestrator.upload_chunk(0, false).await.unwrap();
    orchestrator.rechunk(5).await.unwrap();

    let session = orchestrator.session();
    assert_eq!(session.chunk_size, 5);
    assert_eq!(session.total_chunks(), 2);
    assert_eq!(session.status, SessionStatus::Pending);
    assert!(session.chunks.iter().all(|c| c.status == ChunkStatus::Pending && c.txid.is_none()));

    orchestrator.process_sequentially().await.unwrap();
    orchestrator
        .finalize_reference(FileMetadata::new("text/plain"))
        .await
        .unwrap();
    assert!(matches!(
        orchestrator.rechunk(3).await,
        Err(UploadError::InvalidState(_))
    ));
}
