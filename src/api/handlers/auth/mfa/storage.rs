//! Database helpers for MFA enrollment, challenges, and backup codes.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

pub(super) const KIND_LOGIN: &str = "login";
pub(super) const KIND_ENROLL: &str = "enroll";

/// A consumed challenge row. `code_hash` is present for `sms`/`email`
/// challenges and absent for TOTP, where the authenticator app is the oracle.
pub(super) struct Challenge {
    pub(super) account_id: Uuid,
    pub(super) code_hash: Option<Vec<u8>>,
}

pub(super) async fn create_challenge(
    pool: &PgPool,
    account_id: Uuid,
    kind: &str,
    token_hash: &[u8],
    code_hash: Option<&[u8]>,
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO mfa_challenges
            (account_id, kind, token_hash, code_hash, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + make_interval(secs => ($5::bigint)::double precision))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(kind)
        .bind(token_hash)
        .bind(code_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to create mfa challenge")?;
    Ok(())
}

/// Consume a login challenge by its token digest. Single atomic `UPDATE`; a
/// challenge can be spent exactly once, even under concurrent verify calls.
pub(super) async fn consume_login_challenge(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<Challenge>> {
    let query = r"
        UPDATE mfa_challenges
        SET consumed = TRUE
        WHERE token_hash = $1 AND kind = $2 AND NOT consumed AND expires_at > NOW()
        RETURNING account_id, code_hash
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(KIND_LOGIN)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume login challenge")?;
    Ok(row.map(|row| Challenge {
        account_id: row.get("account_id"),
        code_hash: row.get("code_hash"),
    }))
}

/// Consume the freshest pending enrollment challenge for the account.
pub(super) async fn consume_enroll_challenge(
    pool: &PgPool,
    account_id: Uuid,
) -> Result<Option<Challenge>> {
    let query = r"
        UPDATE mfa_challenges
        SET consumed = TRUE
        WHERE id = (
            SELECT id FROM mfa_challenges
            WHERE account_id = $1 AND kind = $2 AND NOT consumed AND expires_at > NOW()
            ORDER BY created_at DESC
            LIMIT 1
        )
        RETURNING account_id, code_hash
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .bind(KIND_ENROLL)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume enrollment challenge")?;
    Ok(row.map(|row| Challenge {
        account_id: row.get("account_id"),
        code_hash: row.get("code_hash"),
    }))
}

pub(super) async fn set_totp_secret(pool: &PgPool, account_id: Uuid, secret: &str) -> Result<()> {
    let query = "UPDATE accounts SET mfa_totp_secret = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(secret)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store totp secret")?;
    Ok(())
}

pub(super) async fn enable_mfa(
    pool: &PgPool,
    account_id: Uuid,
    channel: &str,
    phone: Option<&str>,
) -> Result<()> {
    let query = r"
        UPDATE accounts
        SET mfa_enabled = TRUE, mfa_channel = $2, phone = COALESCE($3, phone)
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(channel)
        .bind(phone)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to enable mfa")?;
    Ok(())
}

/// Clears enrollment completely: secret, channel, phone, backup codes, and
/// any pending challenges, in one transaction.
pub(super) async fn disable_mfa(pool: &PgPool, account_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await.context("begin mfa disable transaction")?;

    let query = r"
        UPDATE accounts
        SET mfa_enabled = FALSE, mfa_channel = NULL, mfa_totp_secret = NULL, phone = NULL
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to clear mfa enrollment")?;

    let query = "DELETE FROM mfa_backup_codes WHERE account_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete backup codes")?;

    let query = "DELETE FROM mfa_challenges WHERE account_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete mfa challenges")?;

    tx.commit().await.context("commit mfa disable transaction")?;
    Ok(())
}

/// Replace the full backup code set; codes from an earlier enrollment die.
pub(super) async fn replace_backup_codes(
    pool: &PgPool,
    account_id: Uuid,
    code_hashes: &[String],
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin backup code transaction")?;

    let query = "DELETE FROM mfa_backup_codes WHERE account_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete old backup codes")?;

    let query = "INSERT INTO mfa_backup_codes (account_id, code_hash) VALUES ($1, $2)";
    for code_hash in code_hashes {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id)
            .bind(code_hash)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert backup code")?;
    }

    tx.commit().await.context("commit backup code transaction")?;
    Ok(())
}

pub(super) async fn unused_backup_codes(
    pool: &PgPool,
    account_id: Uuid,
) -> Result<Vec<(Uuid, String)>> {
    let query = "SELECT id, code_hash FROM mfa_backup_codes WHERE account_id = $1 AND NOT used";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(account_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to fetch backup codes")?;
    Ok(rows
        .iter()
        .map(|row| (row.get("id"), row.get("code_hash")))
        .collect())
}

/// Burn one backup code. The `NOT used` guard makes the consume atomic, so a
/// replayed code loses even if two requests verified it concurrently.
pub(super) async fn mark_backup_code_used(pool: &PgPool, code_id: Uuid) -> Result<bool> {
    let query = "UPDATE mfa_backup_codes SET used = TRUE, used_at = NOW() WHERE id = $1 AND NOT used";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(code_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to mark backup code used")?;
    Ok(result.rows_affected() > 0)
}
