//! Retry with exponential backoff for artifact fetches.
//!
//! Only failures the caller classifies as transient are retried; a permanent
//! failure ends the loop immediately.

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; milliseconds or a string like `"2s"`.
    #[serde(with = "crate::serde_millis")]
    pub base_delay: Duration,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(with = "crate::serde_millis")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Spread delays by ±25% so concurrent loaders do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (1-based; 0 means no delay).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential = self.base_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_ms = exponential.min(self.max_delay.as_millis() as f64).max(0.0) as u64;

        if self.jitter {
            let jitter_range = delay_ms / 4;
            if jitter_range > 0 {
                let offset = fastrand::u64(0..jitter_range * 2);
                return Duration::from_millis(delay_ms - jitter_range + offset);
            }
        }

        Duration::from_millis(delay_ms)
    }
}

/// Outcome of a retried operation.
#[derive(Debug, Clone)]
pub struct RetryResult<T, E> {
    /// Final value, or the last error seen.
    pub result: Result<T, E>,
    /// Attempts made (1 = first try settled it).
    pub attempts: u32,
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Runs `operation` until it succeeds, fails permanently (per
/// `should_retry`), or `max_retries` is exhausted.
///
/// # Example
/// ```
/// use artifacts::{execute_with_retry, RetryConfig};
/// use std::time::Duration;
///
/// let config = RetryConfig::default()
///     .with_max_retries(3)
///     .with_base_delay(Duration::from_millis(1));
///
/// let outcome = execute_with_retry(
///     &config,
///     |attempt| if attempt == 0 { Err("timeout") } else { Ok("bytes") },
///     |_err| true,
/// );
///
/// assert!(outcome.succeeded());
/// assert_eq!(outcome.attempts, 2);
/// ```
pub fn execute_with_retry<T, E, F, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    let start = Instant::now();
    let mut attempt = 0;
    loop {
        match operation(attempt) {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                };
            }
            Err(err) => {
                if attempt >= config.max_retries || !should_retry(&err) {
                    return RetryResult {
                        result: Err(err),
                        attempts: attempt + 1,
                        total_duration: start.elapsed(),
                    };
                }
                attempt += 1;
                let delay = config.calculate_delay(attempt);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast() -> RetryConfig {
        RetryConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    #[test]
    fn default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert!(config.jitter);
    }

    #[test]
    fn no_delay_on_first_attempt() {
        assert_eq!(RetryConfig::default().calculate_delay(0), Duration::ZERO);
    }

    #[test]
    fn exponential_delays() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);
        assert_eq!(config.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn delay_capped() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_millis(500))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);
        assert_eq!(config.calculate_delay(4), Duration::from_millis(500));
    }

    #[test]
    fn jitter_within_quarter() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(400))
            .with_jitter(true);
        for _ in 0..50 {
            let delay = config.calculate_delay(1).as_millis();
            assert!((300..500).contains(&delay), "delay {delay}");
        }
    }

    #[test]
    fn succeeds_first_try() {
        let outcome = execute_with_retry(&fast(), |_| Ok::<_, String>(7), |_| true);
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.into_result().unwrap(), 7);
    }

    #[test]
    fn eventual_success() {
        let calls = Cell::new(0);
        let outcome = execute_with_retry(
            &fast().with_max_retries(3),
            |_| {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err("transient")
                } else {
                    Ok("done")
                }
            },
            |_| true,
        );
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn exhaustion_returns_last_error() {
        let outcome: RetryResult<(), String> = execute_with_retry(
            &fast().with_max_retries(2),
            |attempt| Err(format!("fail {attempt}")),
            |_| true,
        );
        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap_err(), "fail 2");
    }

    #[test]
    fn permanent_error_stops_immediately() {
        let calls = Cell::new(0);
        let outcome: RetryResult<(), &str> = execute_with_retry(
            &fast().with_max_retries(5),
            |_| {
                calls.set(calls.get() + 1);
                Err("404")
            },
            |err| *err != "404",
        );
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn none_never_retries() {
        let outcome: RetryResult<(), &str> =
            execute_with_retry(&RetryConfig::none(), |_| Err("x"), |_| true);
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn serde_uses_millis() {
        let json = serde_json::to_value(RetryConfig::default().with_jitter(false)).unwrap();
        assert_eq!(json["base_delay"], 250);
        assert_eq!(json["max_delay"], 10_000);
        let back: RetryConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn serde_accepts_duration_strings() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"base_delay": "500ms", "max_delay": "2s"}"#).unwrap();
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(2));
        assert_eq!(config.max_retries, 3);

        let err = serde_json::from_str::<RetryConfig>(r#"{"base_delay": "soon"}"#).unwrap_err();
        assert!(err.to_string().contains("500ms"));
        assert!(serde_json::from_str::<RetryConfig>(r#"{"base_delay": -1}"#).is_err());
    }
}
