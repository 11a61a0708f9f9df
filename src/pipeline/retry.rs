use super::error::RefreshError;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Doubling backoff for feature service requests
///
/// Delay before retry `n` (0-based) is `base * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, retries: u32) -> Self {
        Self {
            base_delay: base,
            max_delay: max,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    /// Delay that the next `sleep` would wait, or `None` once exhausted
    pub fn next_delay(&self) -> Option<Duration> {
        if self.current_attempt >= self.max_retries {
            return None;
        }
        let factor = 2_u32.saturating_pow(self.current_attempt);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_attempt >= self.max_retries
    }

    /// Wait before the next retry
    ///
    /// Fails with `Transport` when no retries are left and with `Cancelled`
    /// if `cancel` fires while waiting.
    pub async fn sleep(&mut self, cancel: &CancellationToken) -> Result<(), RefreshError> {
        let Some(delay) = self.next_delay() else {
            return Err(RefreshError::Transport(
                "Maximum retry attempts exceeded".to_string(),
            ));
        };

        log::warn!(
            "⏳ Retry attempt {} of {} in {}ms",
            self.current_attempt + 1,
            self.max_retries,
            delay.as_millis()
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RefreshError::Cancelled),
            _ = sleep(delay) => {}
        }

        self.current_attempt += 1;
        Ok(())
    }

    pub fn attempts_used(&self) -> u32 {
        self.current_attempt
    }
}
