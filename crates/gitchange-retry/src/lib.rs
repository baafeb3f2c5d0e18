//! Deadline-aware exponential backoff.
//!
//! Transient failures (git push, forge API calls) are retried with capped
//! exponential delays and jitter, but never past the caller's deadline: a
//! retry loop gives up early rather than sleep beyond the instant the
//! surrounding tick would be cancelled anyway.
//!
//! # Example
//!
//! ```no_run
//! use std::time::{Duration, Instant};
//! use gitchange_retry::{Backoff, retry};
//!
//! # async fn demo() -> Result<(), &'static str> {
//! let deadline = Instant::now() + Duration::from_secs(60);
//! let value = retry(&Backoff::default(), deadline, || async {
//!     Err::<(), _>("transient")
//! })
//! .await?;
//! # Ok(value) }
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Exponential backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backoff {
    /// Maximum number of attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after that.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap applied to every delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor in `0.0..=1.0`; 0.25 turns a delay `d` into a value
    /// drawn uniformly from `0.75 * d ..= 1.25 * d`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl Backoff {
    /// The delay before retrying after `attempt` failures (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(16);
        let raw = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(pow))
            .min(self.max_delay_ms);
        if self.jitter > 0.0 {
            apply_jitter(raw, self.jitter)
        } else {
            Duration::from_millis(raw)
        }
    }
}

fn apply_jitter(delay_ms: u64, jitter: f64) -> Duration {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let random: f64 = rng.r#gen();
    let factor = 1.0 - jitter + random * 2.0 * jitter;
    Duration::from_millis((delay_ms as f64 * factor).round() as u64)
}

/// Run `operation` until it succeeds, attempts are exhausted, or the next
/// sleep would pass `deadline`. The last error is returned on give-up.
pub async fn retry<T, E, F, Fut>(
    backoff: &Backoff,
    deadline: Instant,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= backoff.max_attempts {
                    return Err(err);
                }
                let delay = backoff.delay(attempt);
                if Instant::now() + delay >= deadline {
                    return Err(err);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
