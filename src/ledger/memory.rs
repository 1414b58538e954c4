//! In-process ledger implementing every collaborator trait
//!
//! Raw transactions are bincode-encoded and identified by their BLAKE3 hash.
//! Change outputs paid to the wallet script become spendable again, so a
//! sequence of uploads chains through change the way a real wallet would.
//! Rejections and broadcast latency can be scripted for tests.

use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::services::{
    Broadcaster, FeeEstimator, FundingSource, LedgerServices, Signer, TransactionLookup,
};
use crate::ledger::types::{
    FundingSelection, OutPoint, Transaction, TxOutput, UnsignedTransaction, Utxo,
};
use crate::protocol::TxId;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Locking script the in-memory wallet receives change on
pub fn wallet_script() -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[0x11; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

#[derive(Serialize, Deserialize)]
struct RawTransaction {
    inputs: Vec<OutPoint>,
    outputs: Vec<TxOutput>,
}

#[derive(Default)]
struct WalletState {
    unspent: BTreeMap<OutPoint, u64>,
    reserved: HashSet<OutPoint>,
    consumed: HashSet<OutPoint>,
}

#[derive(Default)]
pub struct MemoryLedger {
    wallet: Mutex<WalletState>,
    transactions: DashMap<TxId, Transaction>,
    broadcast_log: Mutex<Vec<TxId>>,
    scripted_rejections: Mutex<VecDeque<String>>,
    scripted_latency: Mutex<VecDeque<Duration>>,
    funding_counter: AtomicU64,
    funding_requests: AtomicU64,
    submit_calls: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-funded with `count` outputs of `value` sats each
    pub fn with_funds(count: usize, value: u64) -> Self {
        let ledger = Self::new();
        for _ in 0..count {
            ledger.fund(value);
        }
        ledger
    }

    /// Add a spendable output of `value` sats to the wallet
    pub fn fund(&self, value: u64) -> OutPoint {
        let n = self.funding_counter.fetch_add(1, Ordering::SeqCst);
        let txid = TxId::from_bytes(*blake3::hash(format!("funding:{n}").as_bytes()).as_bytes());
        let outpoint = OutPoint { txid, vout: 0 };
        self.wallet.lock().unspent.insert(outpoint, value);
        outpoint
    }

    /// Bundle this ledger as upload collaborators
    pub fn services(self: &Arc<Self>, fees: Arc<dyn FeeEstimator>) -> LedgerServices {
        LedgerServices {
            funding: self.clone(),
            signer: self.clone(),
            broadcaster: self.clone(),
            fees,
        }
    }

    /// Store a transaction directly, bypassing broadcast
    pub fn insert_transaction(&self, tx: Transaction) {
        self.transactions.insert(tx.txid, tx);
    }

    /// Reject the next broadcast with `message`. Queued rejections apply in order.
    pub fn reject_next(&self, message: impl Into<String>) {
        self.scripted_rejections.lock().push_back(message.into());
    }

    /// Delay the next broadcast by `latency`. Queued delays apply in order.
    pub fn delay_next(&self, latency: Duration) {
        self.scripted_latency.lock().push_back(latency);
    }

    /// Spendable balance, excluding reserved outputs
    pub fn balance(&self) -> u64 {
        let wallet = self.wallet.lock();
        wallet
            .unspent
            .iter()
            .filter(|(outpoint, _)| !wallet.reserved.contains(*outpoint))
            .map(|(_, value)| value)
            .sum()
    }

    /// Accepted transaction ids in acceptance order
    pub fn broadcast_log(&self) -> Vec<TxId> {
        self.broadcast_log.lock().clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcast_log.lock().len()
    }

    /// Number of `submit` calls, including rejected ones
    pub fn submit_calls(&self) -> u64 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn funding_requests(&self) -> u64 {
        self.funding_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FundingSource for MemoryLedger {
    async fn select_inputs(&self, target: u64) -> LedgerResult<FundingSelection> {
        self.funding_requests.fetch_add(1, Ordering::SeqCst);
        let mut wallet = self.wallet.lock();

        let mut selection = FundingSelection::default();
        let mut available = 0u64;

        for (outpoint, value) in wallet.unspent.iter() {
            if wallet.reserved.contains(outpoint) || wallet.consumed.contains(outpoint) {
                continue;
            }
            available += value;
            if selection.total < target {
                selection.inputs.push(Utxo {
                    outpoint: *outpoint,
                    value: *value,
                });
                selection.total += value;
            }
        }

        if selection.total < target {
            return Err(LedgerError::InsufficientFunds {
                required: target,
                available,
            });
        }

        for input in &selection.inputs {
            wallet.reserved.insert(input.outpoint);
        }

        Ok(selection)
    }

    async fn mark_spent(&self, inputs: &[Utxo]) -> LedgerResult<()> {
        let mut wallet = self.wallet.lock();
        for input in inputs {
            wallet.unspent.remove(&input.outpoint);
            wallet.reserved.remove(&input.outpoint);
        }
        Ok(())
    }

    async fn release(&self, inputs: &[Utxo]) -> LedgerResult<()> {
        let mut wallet = self.wallet.lock();
        for input in inputs {
            wallet.reserved.remove(&input.outpoint);
        }
        Ok(())
    }

    fn supports_concurrent_allocation(&self) -> bool {
        true
    }
}

#[async_trait]
impl Signer for MemoryLedger {
    async fn sign(&self, tx: &UnsignedTransaction) -> LedgerResult<Vec<u8>> {
        if tx.inputs.is_empty() {
            return Err(LedgerError::Signing("transaction has no inputs".into()));
        }

        let mut outputs = tx.outputs.clone();
        if let Some(change) = tx.change.filter(|c| *c > 0) {
            outputs.push(TxOutput {
                value: change,
                script: wallet_script(),
            });
        }

        let raw = RawTransaction {
            inputs: tx.inputs.iter().map(|input| input.outpoint).collect(),
            outputs,
        };

        Ok(bincode::serialize(&raw)?)
    }
}

#[async_trait]
impl Broadcaster for MemoryLedger {
    async fn submit(&self, raw_tx: &[u8]) -> LedgerResult<TxId> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.scripted_latency.lock().pop_front();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let rejection = self.scripted_rejections.lock().pop_front();
        if let Some(message) = rejection {
            return Err(LedgerError::Rejected(message));
        }

        let raw: RawTransaction = bincode::deserialize(raw_tx)?;
        let txid = TxId::from_bytes(*blake3::hash(raw_tx).as_bytes());

        {
            let mut wallet = self.wallet.lock();
            if self.transactions.contains_key(&txid) {
                return Ok(txid);
            }
            if raw.inputs.iter().any(|input| wallet.consumed.contains(input)) {
                return Err(LedgerError::Rejected("258: txn-mempool-conflict".into()));
            }

            wallet.consumed.extend(raw.inputs.iter().copied());

            let change_script = wallet_script();
            for (vout, output) in raw.outputs.iter().enumerate() {
                if output.script == change_script && output.value > 0 {
                    let outpoint = OutPoint {
                        txid,
                        vout: vout as u32,
                    };
                    wallet.unspent.insert(outpoint, output.value);
                }
            }
        }

        self.transactions.insert(
            txid,
            Transaction {
                txid,
                inputs: raw.inputs,
                outputs: raw.outputs,
            },
        );
        self.broadcast_log.lock().push(txid);

        Ok(txid)
    }
}

#[async_trait]
impl TransactionLookup for MemoryLedger {
    async fn fetch_transaction(&self, txid: &TxId) -> LedgerResult<Transaction> {
        self.transactions
            .get(txid)
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::NotFound(*txid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::data_output_script;

    fn unsigned(inputs: Vec<Utxo>, change: Option<u64>) -> UnsignedTransaction {
        UnsignedTransaction {
            inputs,
            outputs: vec![TxOutput::data(data_output_script(b"\x01x"))],
            change,
        }
    }

    #[tokio::test]
    async fn test_fund_select_spend() {
        let ledger = MemoryLedger::with_funds(2, 1_000);
        assert_eq!(ledger.balance(), 2_000);

        let selection = ledger.select_inputs(1_500).await.unwrap();
        assert_eq!(selection.inputs.len(), 2);
        assert_eq!(selection.total, 2_000);
        assert_eq!(ledger.balance(), 0);

        ledger.mark_spent(&selection.inputs).await.unwrap();
        assert!(ledger.select_inputs(1).await.is_err());
    }

    #[tokio::test]
    async fn test_insufficient_reports_available() {
        let ledger = MemoryLedger::with_funds(1, 300);
        match ledger.select_inputs(500).await {
            Err(LedgerError::InsufficientFunds {
                required,
                available,
            }) => {
                assert_eq!(required, 500);
                assert_eq!(available, 300);
            }
            other => panic!("Expected InsufficientFunds, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reserved_inputs_not_handed_out_twice() {
        let ledger = MemoryLedger::with_funds(2, 100);
        let first = ledger.select_inputs(100).await.unwrap();
        let second = ledger.select_inputs(100).await.unwrap();
        assert_ne!(first.inputs[0].outpoint, second.inputs[0].outpoint);

        ledger.release(&first.inputs).await.unwrap();
        let third = ledger.select_inputs(100).await.unwrap();
        assert_eq!(third.inputs[0].outpoint, first.inputs[0].outpoint);
    }

    #[tokio::test]
    async fn test_broadcast_and_lookup_with_change() {
        let ledger = MemoryLedger::with_funds(1, 1_000);
        let selection = ledger.select_inputs(10).await.unwrap();
        let raw = ledger
            .sign(&unsigned(selection.inputs.clone(), Some(990)))
            .await
            .unwrap();

        let txid = ledger.submit(&raw).await.unwrap();
        ledger.mark_spent(&selection.inputs).await.unwrap();

        let tx = ledger.fetch_transaction(&txid).await.unwrap();
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.data_payloads().count(), 1);
        assert_eq!(ledger.balance(), 990);
        assert_eq!(ledger.broadcast_log(), vec![txid]);
    }

    #[tokio::test]
    async fn test_double_spend_is_a_mempool_conflict() {
        let ledger = MemoryLedger::with_funds(1, 1_000);
        let selection = ledger.select_inputs(10).await.unwrap();

        let first = ledger
            .sign(&unsigned(selection.inputs.clone(), Some(900)))
            .await
            .unwrap();
        let second = ledger
            .sign(&unsigned(selection.inputs.clone(), Some(800)))
            .await
            .unwrap();

        ledger.submit(&first).await.unwrap();
        match ledger.submit(&second).await {
            Err(LedgerError::Rejected(msg)) => assert!(msg.contains("mempool-conflict")),
            other => panic!("Expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scripted_rejection() {
        let ledger = MemoryLedger::with_funds(1, 1_000);
        ledger.reject_next("66: insufficient priority");

        let selection = ledger.select_inputs(10).await.unwrap();
        let raw = ledger.sign(&unsigned(selection.inputs, None)).await.unwrap();

        assert!(matches!(ledger.submit(&raw).await, Err(LedgerError::Rejected(_))));
        assert!(ledger.submit(&raw).await.is_ok());
        assert_eq!(ledger.submit_calls(), 2);
        assert_eq!(ledger.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_sign_requires_inputs() {
        let ledger = MemoryLedger::new();
        assert!(matches!(
            ledger.sign(&unsigned(vec![], None)).await,
            Err(LedgerError::Signing(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_txid() {
        let ledger = MemoryLedger::new();
        let txid = TxId::from_bytes([3u8; 32]);
        assert!(matches!(
            ledger.fetch_transaction(&txid).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
