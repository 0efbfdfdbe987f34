use crate::services::genai::GenAiError;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff for transient service failures. This is the
/// only resilience primitive; terminal errors propagate to the caller.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    /// Delay before the attempt following `attempt` (1-based):
    /// initial_delay * 2^(attempt-1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T, GenAiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenAiError>>,
{
    for attempt in 1..=policy.max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                if attempt == policy.max_attempts {
                    log::error!("max retries reached, failing operation: {}", err);
                    return Err(GenAiError::Busy);
                }
                let delay = policy.backoff(attempt);
                log::warn!(
                    "transient service error, retrying in {}s (attempt {}): {}",
                    delay.as_secs_f64(),
                    attempt,
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
    Err(GenAiError::Busy)
}
