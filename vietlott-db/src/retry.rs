//! Bounded retry with exponential backoff for storage operations that can
//! fail transiently (database locked, file briefly unavailable).

use std::thread::sleep;
use std::time::Duration;

use log::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all; used by tests and one-shot tools.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(ms as u64).min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, `is_transient` rejects the error,
/// or the retry budget is spent. The last error is returned unchanged.
pub fn retry_if<T, E, F, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{operation_name} succeeded after {attempt} retries");
                }
                return Ok(value);
            }
            Err(e) if attempt < config.max_retries && is_transient(&e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn retry<T, E, F>(config: &RetryConfig, operation_name: &str, operation: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    retry_if(config, operation_name, operation, |_| true)
}

/// True for SQLite errors worth retrying: the database was busy or locked.
pub fn is_busy(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    })
}
