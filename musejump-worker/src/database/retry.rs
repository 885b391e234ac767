//! Busy-retry for SQLite writes.
//!
//! A WAL database still serializes writers; a write that loses the race
//! surfaces as `SQLITE_BUSY`/`SQLITE_LOCKED` and is retried with capped,
//! jittered exponential backoff.

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const MAX_RETRIES: usize = 8;
const BASE_DELAY_MS: u64 = 10;
const MAX_DELAY_MS: u64 = 1000;

fn is_busy(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    let sqlx::Error::Database(db_err) = sqlx_err else {
        return mentions_lock(&sqlx_err.to_string());
    };

    // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
    let code = db_err.code().map(Cow::into_owned);
    matches!(code.as_deref(), Some("5") | Some("6")) || mentions_lock(db_err.message())
}

fn mentions_lock(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

fn backoff(attempt: usize) -> Duration {
    let capped = BASE_DELAY_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(MAX_DELAY_MS);
    let jitter = random::<u64>() % (capped / 4 + 1);
    Duration::from_millis((capped + jitter).min(MAX_DELAY_MS))
}

/// Run `op`, retrying while SQLite reports the database as busy.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_busy(&err) && attempt < MAX_RETRIES => {
                let delay = backoff(attempt);
                attempt += 1;
                debug!(
                    operation = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "SQLite busy, retrying"
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
