//! Retry/backoff wrapper around a provider.
//!
//! Policy: `RateLimited` retries with exponential backoff up to the attempt
//! ceiling, `ProviderUnavailable` retries once after a short delay,
//! `AuthFailure` and `InvalidResponse` surface immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use super::{GenerationOptions, Provider};
use crate::config::AnalysisSettings;
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt ceiling for rate-limited calls
    pub max_attempts: u32,
    /// First backoff delay; doubles per rate-limited attempt
    pub base_backoff: Duration,
    /// Delay before the single unavailable retry
    pub unavailable_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(500),
            unavailable_retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Backoff before the given (1-based) attempt's retry.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

pub struct ProviderGateway {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub async fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let mut attempt = 0u32;
        let mut unavailable_retried = false;

        loop {
            attempt += 1;

            match self.provider.complete(prompt, options).await {
                Ok(text) => return Ok(text),
                Err(ProviderError::RateLimited(msg))
                    if attempt < self.policy.max_attempts =>
                {
                    let delay = self.policy.backoff_delay(attempt);
                    warn!(
                        "{} rate limited (attempt {}/{}), backing off {:?}: {}",
                        self.provider.id(),
                        attempt,
                        self.policy.max_attempts,
                        delay,
                        msg
                    );
                    sleep(delay).await;
                }
                Err(ProviderError::ProviderUnavailable(msg)) if !unavailable_retried => {
                    unavailable_retried = true;
                    warn!(
                        "{} unavailable, retrying once in {:?}: {}",
                        self.provider.id(),
                        self.policy.unavailable_retry_delay,
                        msg
                    );
                    sleep(self.policy.unavailable_retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
