//! Database helpers for external identity links.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use super::Grant;
use super::provider::Provider;

/// Idempotent: re-linking the same `(provider, subject)` refreshes the row,
/// including the cached grant from the latest exchange.
pub(super) async fn upsert_link(
    pool: &PgPool,
    account_id: Uuid,
    provider: Provider,
    subject: &str,
    provider_email: &str,
    grant: &Grant,
) -> Result<()> {
    let query = r"
        INSERT INTO oauth_links
            (account_id, provider, subject, provider_email,
             access_token, refresh_token, token_expires_at, scopes)
        VALUES ($1, $2, $3, $4, $5, $6,
            NOW() + make_interval(secs => ($7::bigint)::double precision), $8)
        ON CONFLICT (provider, subject)
        DO UPDATE SET
            account_id = EXCLUDED.account_id,
            provider_email = EXCLUDED.provider_email,
            access_token = EXCLUDED.access_token,
            refresh_token = COALESCE(EXCLUDED.refresh_token, oauth_links.refresh_token),
            token_expires_at = EXCLUDED.token_expires_at,
            scopes = EXCLUDED.scopes,
            active = TRUE,
            linked_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(provider.as_str())
        .bind(subject)
        .bind(provider_email)
        .bind(&grant.access_token)
        .bind(grant.refresh_token.as_deref())
        .bind(grant.expires_in_seconds)
        .bind(&grant.scopes)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert oauth link")?;
    Ok(())
}

pub(super) async fn delete_link(
    pool: &PgPool,
    account_id: Uuid,
    provider: Provider,
) -> Result<bool> {
    let query = "DELETE FROM oauth_links WHERE account_id = $1 AND provider = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(account_id)
        .bind(provider.as_str())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete oauth link")?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn count_links(pool: &PgPool, account_id: Uuid) -> Result<i64> {
    let query = "SELECT COUNT(*) FROM oauth_links WHERE account_id = $1 AND active";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let count: i64 = sqlx::query_scalar(query)
        .bind(account_id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count oauth links")?;
    Ok(count)
}
