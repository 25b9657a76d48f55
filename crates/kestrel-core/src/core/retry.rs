//! Retry controller for provider requests.
//!
//! The retry loop is an explicit state machine. [`RetryPhase::next`] is a
//! pure transition function, so backoff timing can be checked without
//! timers; [`send_with_retry`] drives it against a real [`Provider`].

use std::time::Duration;

use crate::providers::{
    Provider, ProviderError, ProviderRequest, ProviderResponse, ProviderResult,
};

/// Attempt budget and backoff base for one logical provider request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

    /// `max_retries` counts every attempt including the first; it is
    /// clamped to at least one.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay to wait after the given 1-indexed attempt fails:
    /// `base_delay * 2^(attempt - 1)`.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_RETRIES,
            Duration::from_millis(Self::DEFAULT_BASE_DELAY_MS),
        )
    }
}

/// Where a retry run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    /// About to perform the 1-indexed `attempt`.
    Attempting { attempt: u32 },
    /// `attempt` failed with a retryable error; wait `delay` before the next.
    Backoff { attempt: u32, delay: Duration },
    Succeeded,
    /// A non-retryable error ended the run.
    FailedFatal,
    /// Every attempt in the budget failed.
    FailedExhausted,
}

/// Input to the transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    Succeeded,
    Failed { retryable: bool },
    BackoffElapsed,
}

impl RetryPhase {
    pub fn start() -> Self {
        RetryPhase::Attempting { attempt: 1 }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RetryPhase::Succeeded | RetryPhase::FailedFatal | RetryPhase::FailedExhausted
        )
    }

    /// Pure transition. Events that do not apply to the current phase
    /// leave it unchanged.
    #[must_use]
    pub fn next(self, policy: &RetryPolicy, event: RetryEvent) -> Self {
        match (self, event) {
            (RetryPhase::Attempting { .. }, RetryEvent::Succeeded) => RetryPhase::Succeeded,
            (RetryPhase::Attempting { .. }, RetryEvent::Failed { retryable: false }) => {
                RetryPhase::FailedFatal
            }
            (RetryPhase::Attempting { attempt }, RetryEvent::Failed { retryable: true }) => {
                if attempt >= policy.max_retries() {
                    RetryPhase::FailedExhausted
                } else {
                    RetryPhase::Backoff {
                        attempt,
                        delay: policy.delay_for(attempt),
                    }
                }
            }
            (RetryPhase::Backoff { attempt, .. }, RetryEvent::BackoffElapsed) => {
                RetryPhase::Attempting {
                    attempt: attempt + 1,
                }
            }
            (phase, _) => phase,
        }
    }
}

/// Performs one logical provider request under `policy`.
///
/// Returns the first successful response, the first non-retryable error,
/// or the last error once the attempt budget is spent.
///
/// # Errors
/// Returns the surfaced `ProviderError` when the run ends in
/// `FailedFatal` or `FailedExhausted`.
pub async fn send_with_retry(
    policy: &RetryPolicy,
    provider: &dyn Provider,
    request: &ProviderRequest,
) -> ProviderResult<ProviderResponse> {
    let mut phase = RetryPhase::start();

    while let RetryPhase::Attempting { attempt } = phase {
        tracing::debug!(attempt, max = policy.max_retries(), "provider attempt");
        let error = match provider.send(request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        phase = phase.next(
            policy,
            RetryEvent::Failed {
                retryable: error.is_retryable(),
            },
        );

        match phase {
            RetryPhase::Backoff { delay, .. } => {
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    kind = %error.kind,
                    error = %error,
                    "provider call failed, backing off"
                );
                tokio::time::sleep(delay).await;
                phase = phase.next(policy, RetryEvent::BackoffElapsed);
            }
            RetryPhase::FailedFatal => {
                tracing::warn!(attempt, kind = %error.kind, error = %error, "provider error is not retryable");
                return Err(error);
            }
            _ => {
                tracing::error!(attempt, kind = %error.kind, error = %error, "provider retries exhausted");
                return Err(error);
            }
        }
    }

    // Every non-attempt phase returns above.
    Err(ProviderError::malformed_request(format!(
        "retry loop ended in phase {phase:?}"
    )))
}
