//! Upload orchestration
//!
//! Per-chunk state, fresh-funding retries, pause/stop control and the final
//! reference transaction.

pub mod config;
pub mod control;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod state_machine;
pub mod types;

pub use config::UploadConfig;
pub use control::RunControl;
pub use error::{classify_rejection, UploadError, UploadResult};
pub use orchestrator::UploadOrchestrator;
pub use retry::{retry_with_policy, Attempt, RetryOn, RetryPolicy};
pub use state_machine::{transition_chunk, transition_session, ChunkEvent, SessionEvent};
pub use types::{AuxiliaryOutput, RunState, UploadEvent};
