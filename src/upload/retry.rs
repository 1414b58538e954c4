use crate::upload::error::{UploadError, UploadResult};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Which failures earn a retry with fresh funding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    MempoolConflict,
    Transient,
}

impl RetryOn {
    pub fn matches(&self, err: &UploadError) -> bool {
        match self {
            RetryOn::MempoolConflict => err.is_mempool_conflict(),
            RetryOn::Transient => err.is_transient(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempt budget shared by every retry layer for one chunk
    pub max_attempts: u32,
    /// Retries this layer may issue
    pub max_retries: u32,
    pub cooldown: Duration,
    pub multiplier: f64,
    pub max_cooldown: Duration,
    pub retry_on: RetryOn,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            max_attempts,
            max_retries: 1,
            cooldown,
            multiplier: 1.0,
            max_cooldown: cooldown * 8,
            retry_on: RetryOn::MempoolConflict,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Cooldown schedule, without jitter
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.cooldown,
            initial_interval: self.cooldown,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_cooldown.max(self.cooldown),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    pub fn should_retry(&self, err: &UploadError, attempts_used: u32, retries_done: u32) -> bool {
        self.retry_on.matches(err)
            && retries_done < self.max_retries
            && attempts_used < self.max_attempts
    }
}

/// One invocation of a retried operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt {
    pub retry: u32,
    /// Wait before requesting funding; set on retries
    pub cooldown: Option<Duration>,
}

impl Attempt {
    pub fn fresh_funding(&self) -> bool {
        self.cooldown.is_some()
    }
}

/// Run `op` until it succeeds or `policy` gives up.
///
/// `attempts_used` reports the chunk's attempt counter after each failure, so
/// nested retry layers share one budget.
pub async fn retry_with_policy<T, F, Fut, A>(
    policy: &RetryPolicy,
    initial_cooldown: Option<Duration>,
    attempts_used: A,
    mut op: F,
) -> UploadResult<T>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = UploadResult<T>>,
    A: Fn() -> u32,
{
    let mut backoff = policy.backoff();
    let mut attempt = Attempt {
        retry: 0,
        cooldown: initial_cooldown,
    };

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let used = attempts_used();
                if !policy.should_retry(&err, used, attempt.retry) {
                    return Err(err);
                }

                let delay = backoff.next_backoff().unwrap_or(policy.cooldown);
                warn!(
                    "Attempt {}/{} failed ({}), retrying with fresh funding in {:?}",
                    used, policy.max_attempts, err, delay
                );
                attempt = Attempt {
                    retry: attempt.retry + 1,
                    cooldown: Some(delay),
                };
            }
        }
    }
}
