use crate::upload::error::{UploadError, UploadResult};
use crate::upload::types::RunState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Pause / resume / stop signal shared between a run and its controllers
#[derive(Clone)]
pub struct RunControl {
    tx: Arc<watch::Sender<RunState>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }

    pub fn set(&self, state: RunState) -> RunState {
        self.tx.send_replace(state)
    }

    /// Block while paused. Fails with `Cancelled` once stopped.
    pub async fn checkpoint(&self, poll_interval: Duration) -> UploadResult<()> {
        let mut rx = self.tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                RunState::Running => return Ok(()),
                RunState::Stopped => return Err(UploadError::Cancelled),
                RunState::Paused => {}
            }
            let _ = tokio::time::timeout(poll_interval, rx.changed()).await;
        }
    }

    /// Sleep for `delay`, cut short by a stop
    pub async fn sleep(&self, delay: Duration) -> UploadResult<()> {
        if delay.is_zero() {
            return match self.state() {
                RunState::Stopped => Err(UploadError::Cancelled),
                _ => Ok(()),
            };
        }

        let mut rx = self.tx.subscribe();
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            if *rx.borrow_and_update() == RunState::Stopped {
                return Err(UploadError::Cancelled);
            }
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = rx.changed() => {
                    if changed.is_err() {
                        (&mut sleep).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}
