//! Refresh-token session storage.
//!
//! Each row is keyed by the session id embedded in the refresh JWT, so lookup
//! never scans. The stored `token_hash` is the SHA-256 of the full signed
//! token; rotation and revocation compare it in the `WHERE` clause, which
//! makes both operations a compare-and-swap. Two concurrent refreshes with
//! the same token cannot both succeed.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

pub(super) async fn insert_session(
    pool: &PgPool,
    session_id: Uuid,
    account_id: Uuid,
    token_hash: &[u8],
    ttl_seconds: i64,
    ip: &str,
    user_agent: &str,
    device_fingerprint: Option<&str>,
) -> Result<()> {
    let query = r"
        INSERT INTO sessions
            (id, account_id, token_hash, expires_at, ip, user_agent, device_fingerprint)
        VALUES ($1, $2, $3, NOW() + make_interval(secs => ($4::bigint)::double precision), $5, $6, $7)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .bind(account_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .bind(ip)
        .bind(user_agent)
        .bind(device_fingerprint)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert session")?;
    Ok(())
}

/// Swap the stored digest for the successor token's digest. Returns `false`
/// when the session is gone, revoked, expired, or the presented digest does
/// not match (already rotated).
pub(super) async fn rotate_session(
    pool: &PgPool,
    session_id: Uuid,
    presented_hash: &[u8],
    successor_hash: &[u8],
    ttl_seconds: i64,
) -> Result<bool> {
    let query = r"
        UPDATE sessions
        SET token_hash = $3,
            expires_at = NOW() + make_interval(secs => ($4::bigint)::double precision),
            rotated_at = NOW()
        WHERE id = $1
          AND token_hash = $2
          AND NOT revoked
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .bind(presented_hash)
        .bind(successor_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to rotate session")?;
    Ok(result.rows_affected() > 0)
}

/// Revoke one session if the presented token still owns it.
pub(super) async fn revoke_session(
    pool: &PgPool,
    session_id: Uuid,
    presented_hash: &[u8],
) -> Result<bool> {
    let query = r"
        UPDATE sessions
        SET revoked = TRUE, revoked_at = NOW()
        WHERE id = $1 AND token_hash = $2 AND NOT revoked
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .bind(presented_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke session")?;
    Ok(result.rows_affected() > 0)
}

/// Revoke every live session for the account. Used by logout-all and after a
/// password reset.
pub(super) async fn revoke_all_sessions(pool: &PgPool, account_id: Uuid) -> Result<u64> {
    let query = r"
        UPDATE sessions
        SET revoked = TRUE, revoked_at = NOW()
        WHERE account_id = $1 AND NOT revoked
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(account_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke account sessions")?;
    Ok(result.rows_affected())
}

/// Whether the account ever had a session from this IP. Feeds the suspicious
/// login heuristic for never-seen devices.
pub(super) async fn has_session_from_ip(pool: &PgPool, account_id: Uuid, ip: &str) -> Result<bool> {
    let query = "SELECT EXISTS (SELECT 1 FROM sessions WHERE account_id = $1 AND ip = $2) AS seen";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let seen: bool = sqlx::query_scalar(query)
        .bind(account_id)
        .bind(ip)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check prior sessions for ip")?;
    Ok(seen)
}

async fn sweep_expired(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM sessions WHERE revoked OR expires_at < NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to sweep sessions")?;
    Ok(result.rows_affected())
}

/// Periodically drops revoked and expired session rows.
pub(crate) fn spawn_session_sweeper(pool: PgPool, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sweep_expired(&pool).await {
                Ok(0) => {}
                Ok(swept) => tracing::info!(swept, "session sweep"),
                Err(error) => tracing::error!(error = %error, "session sweep failed"),
            }
        }
    });
}
