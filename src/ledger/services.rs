//! Capabilities the upload and decode paths consume
//!
//! Wallet keys, UTXO tracking and network access live behind these traits.

use crate::ledger::error::LedgerResult;
use crate::ledger::types::{FundingSelection, Transaction, UnsignedTransaction, Utxo};
use crate::protocol::TxId;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait FundingSource: Send + Sync {
    /// Select unspent inputs worth at least `target` sats.
    ///
    /// Selected inputs must not be handed out again until they are released.
    async fn select_inputs(&self, target: u64) -> LedgerResult<FundingSelection>;

    /// Mark inputs consumed by a broadcast transaction
    async fn mark_spent(&self, inputs: &[Utxo]) -> LedgerResult<()>;

    /// Return inputs from an attempt that was never broadcast
    async fn release(&self, _inputs: &[Utxo]) -> LedgerResult<()> {
        Ok(())
    }

    /// Whether concurrent `select_inputs` calls are safe without external locking
    fn supports_concurrent_allocation(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign and serialize a transaction
    async fn sign(&self, tx: &UnsignedTransaction) -> LedgerResult<Vec<u8>>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Submit a raw signed transaction. Rejections carry the node's message.
    async fn submit(&self, raw_tx: &[u8]) -> LedgerResult<TxId>;
}

#[async_trait]
pub trait TransactionLookup: Send + Sync {
    async fn fetch_transaction(&self, txid: &TxId) -> LedgerResult<Transaction>;
}

pub trait FeeEstimator: Send + Sync {
    /// Fee in sats for a transaction of `tx_bytes` serialized bytes
    fn fee_for_size(&self, tx_bytes: usize) -> u64;
}

/// Flat sats-per-kilobyte fee rate
#[derive(Debug, Clone, Copy)]
pub struct RateFeeEstimator {
    pub sats_per_kb: u64,
}

impl RateFeeEstimator {
    pub fn new(sats_per_kb: u64) -> Self {
        Self { sats_per_kb }
    }
}

impl FeeEstimator for RateFeeEstimator {
    fn fee_for_size(&self, tx_bytes: usize) -> u64 {
        let fee = (tx_bytes as u64 * self.sats_per_kb).div_ceil(1000);
        fee.max(1)
    }
}

/// The collaborators an upload needs
#[derive(Clone)]
pub struct LedgerServices {
    pub funding: Arc<dyn FundingSource>,
    pub signer: Arc<dyn Signer>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub fees: Arc<dyn FeeEstimator>,
}
