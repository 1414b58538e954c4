pub mod error;
pub mod memory;
pub mod services;
pub mod size;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use memory::MemoryLedger;
pub use services::{
    Broadcaster, FeeEstimator, FundingSource, LedgerServices, RateFeeEstimator, Signer,
    TransactionLookup,
};
pub use types::{FundingSelection, OutPoint, Transaction, TxOutput, UnsignedTransaction, Utxo};
