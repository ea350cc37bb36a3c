//! Per-account login lockout.
//!
//! Failed attempts are counted with a single atomic `UPDATE` so concurrent
//! wrong-password requests cannot race past the threshold. An expired lock
//! counts as a fresh start; a successful login clears the counter.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

pub(super) const MAX_FAILED_ATTEMPTS: i32 = 5;
pub(super) const LOCK_MINUTES: i32 = 30;

const fn lock_applies(failed_attempts: i32) -> bool {
    failed_attempts >= MAX_FAILED_ATTEMPTS
}

/// Seconds until an active lock expires, or `None` when the account is not
/// locked (including locks that have already lapsed).
pub(super) async fn active_lock_seconds(pool: &PgPool, account_id: Uuid) -> Result<Option<i64>> {
    let query = r"
        SELECT CEIL(EXTRACT(EPOCH FROM locked_until - NOW()))::BIGINT AS remaining
        FROM accounts
        WHERE id = $1 AND locked_until IS NOT NULL AND locked_until > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check account lock")?;

    Ok(row.map(|row| row.get("remaining")))
}

/// Record one failed attempt atomically. Returns the seconds remaining on the
/// lock if this attempt tripped the threshold, `None` otherwise.
pub(super) async fn record_failure(pool: &PgPool, account_id: Uuid) -> Result<Option<i64>> {
    // The CASE resets the counter when a previous lock has lapsed, so an old
    // lock never stacks with new failures.
    let query = r"
        UPDATE accounts
        SET failed_attempts = CASE
                WHEN locked_until IS NOT NULL AND locked_until <= NOW() THEN 1
                ELSE failed_attempts + 1
            END,
            locked_until = CASE
                WHEN (CASE
                        WHEN locked_until IS NOT NULL AND locked_until <= NOW() THEN 1
                        ELSE failed_attempts + 1
                    END) >= $2
                THEN NOW() + make_interval(mins => $3)
                ELSE NULL
            END
        WHERE id = $1
        RETURNING failed_attempts,
            CEIL(EXTRACT(EPOCH FROM locked_until - NOW()))::BIGINT AS remaining
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .bind(MAX_FAILED_ATTEMPTS)
        .bind(LOCK_MINUTES)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to record login failure")?;

    let failed_attempts: i32 = row.get("failed_attempts");
    if lock_applies(failed_attempts) {
        let remaining: Option<i64> = row.get("remaining");
        tracing::warn!(account_id = %account_id, failed_attempts, "account locked");
        return Ok(remaining);
    }
    Ok(None)
}

pub(super) async fn clear_failures(pool: &PgPool, account_id: Uuid) -> Result<()> {
    let query = "UPDATE accounts SET failed_attempts = 0, locked_until = NULL WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to clear login failures")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_trips_at_threshold() {
        assert!(!lock_applies(0));
        assert!(!lock_applies(4));
        assert!(lock_applies(5));
        assert!(lock_applies(6));
    }
}
