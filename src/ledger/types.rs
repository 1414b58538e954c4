use crate::protocol::{data_payload, TxId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

/// A spendable output handed out by a funding source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script: Vec<u8>,
}

impl TxOutput {
    /// Zero-value output carrying a script
    pub fn data(script: Vec<u8>) -> Self {
        Self { value: 0, script }
    }
}

/// Inputs selected by a funding source
#[derive(Debug, Clone, Default)]
pub struct FundingSelection {
    pub inputs: Vec<Utxo>,
    pub total: u64,
}

/// Transaction handed to the signer.
///
/// `change` is paid back to the signer's own address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<TxOutput>,
    pub change: Option<u64>,
}

/// A transaction as returned by lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: TxId,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Payloads of all data-carrying outputs, in output order
    pub fn data_payloads(&self) -> impl Iterator<Item = &[u8]> {
        self.outputs
            .iter()
            .filter_map(|output| data_payload(&output.script))
    }
}
