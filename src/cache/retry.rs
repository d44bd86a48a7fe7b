// =============================================================================
// Lock-timeout retry wrapper (spec.md §4.2) — shared by C3 and C4
// =============================================================================
//
// "Database locked" is modeled as an explicit retryable error variant
// (§9 design note), not exception-for-control-flow. This is the only place
// in the crate that inspects it.

use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::config::MonitorConfig;
use crate::error::{is_lock_error, MonitorError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base: Duration,
    pub per_attempt_timeout: Duration,
}

impl RetryConfig {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            max_retries: cfg.sqlite_max_retries,
            base: Duration::from_secs(cfg.sqlite_retry_base_secs),
            per_attempt_timeout: Duration::from_secs(cfg.sqlite_timeout_secs),
        }
    }
}

const SLOW_WAIT_WARN_THRESHOLD: Duration = Duration::from_secs(5);

/// Run `f`, retrying with exponential backoff (base, factor 2) on "database
/// locked"/"database busy" errors up to `cfg.max_retries` attempts. Emits a
/// WARNING when a single lock wait exceeds 5s, ERROR on final failure.
///
/// `f` must itself respect `cfg.per_attempt_timeout` (the caller is
/// responsible for a busy_timeout pragma or equivalent on the connection);
/// this wrapper only governs the retry loop around it.
pub fn with_retry<T>(cfg: &RetryConfig, op: &str, mut f: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        let started = Instant::now();
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if is_lock_error(&e) => {
                let waited = started.elapsed();
                if waited > SLOW_WAIT_WARN_THRESHOLD {
                    warn!(op, attempt, waited_ms = waited.as_millis() as u64, "cache lock wait exceeded 5s");
                }
                if attempt >= cfg.max_retries {
                    error!(op, attempts = attempt + 1, "cache lock retry attempts exhausted");
                    return Err(MonitorError::CacheLocked {
                        op: op.to_string(),
                        attempts: attempt + 1,
                    });
                }
                let backoff = cfg.base * 2u32.pow(attempt);
                std::thread::sleep(backoff);
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn succeeds_immediately_without_retry() {
        let cfg = RetryConfig {
            max_retries: 3,
            base: Duration::from_millis(1),
            per_attempt_timeout: Duration::from_secs(1),
        };
        let result = with_retry(&cfg, "test_op", || Ok::<_, rusqlite::Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn retries_then_succeeds() {
        let cfg = RetryConfig {
            max_retries: 3,
            base: Duration::from_millis(1),
            per_attempt_timeout: Duration::from_secs(1),
        };
        let calls = Cell::new(0);
        let result = with_retry(&cfg, "test_op", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    None,
                ))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausts_retries_and_returns_cache_locked() {
        let cfg = RetryConfig {
            max_retries: 2,
            base: Duration::from_millis(1),
            per_attempt_timeout: Duration::from_secs(1),
        };
        let result = with_retry(&cfg, "test_op", || {
            Err::<(), _>(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            ))
        });
        match result {
            Err(MonitorError::CacheLocked { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected CacheLocked, got {other:?}"),
        }
    }

    #[test]
    fn non_lock_errors_are_not_retried() {
        let cfg = RetryConfig {
            max_retries: 3,
            base: Duration::from_millis(1),
            per_attempt_timeout: Duration::from_secs(1),
        };
        let calls = Cell::new(0);
        let result = with_retry(&cfg, "test_op", || {
            calls.set(calls.get() + 1);
            Err::<(), _>(rusqlite::Error::InvalidQuery)
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
