//! Bounded retries with exponential backoff for transient network failures.
//!
//! Used inside collaborator calls (HTTP requests, git network operations).
//! Only errors the caller classifies as transient are retried; semantic
//! failures such as rejected credentials surface on the first attempt.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Retries after the first attempt (0 = no retries).
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// No waiting between attempts; used by tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `op` until it succeeds, fails non-transiently, or retries run out.
    pub fn retry<T, E, F, P>(&self, what: &str, is_transient: P, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if retry < self.max_retries && is_transient(&err) => {
                    retry += 1;
                    let delay = self.delay_for_retry(retry);
                    warn!(
                        operation = what,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        err = %err,
                        "transient failure, retrying"
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delays_grow_and_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for_retry(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_retry(2), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for_retry(10), Duration::from_secs(5));
    }

    #[test]
    fn retries_transient_errors_up_to_limit() {
        let calls = Cell::new(0);
        let result: Result<(), String> = Backoff::immediate(2).retry(
            "op",
            |_| true,
            || {
                calls.set(calls.get() + 1);
                Err("connection reset".to_string())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    /// Verifies semantic failures are returned on the first attempt.
    #[test]
    fn does_not_retry_semantic_errors() {
        let calls = Cell::new(0);
        let result: Result<(), String> = Backoff::immediate(5).retry(
            "op",
            |e: &String| e.contains("timeout"),
            || {
                calls.set(calls.get() + 1);
                Err("401 unauthorized".to_string())
            },
        );
        assert_eq!(result.unwrap_err(), "401 unauthorized");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn succeeds_after_transient_failure() {
        let calls = Cell::new(0);
        let result: Result<u32, String> = Backoff::immediate(2).retry(
            "op",
            |_| true,
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 2 {
                    Err("timeout".to_string())
                } else {
                    Ok(7)
                }
            },
        );
        assert_eq!(result.unwrap(), 7);
    }
}
