//! Password reset over single-use emailed tokens.
//!
//! `forgot` always answers 204 so the endpoint cannot be used to probe for
//! accounts. Tokens are stored as SHA-256 digests and consumed with an atomic
//! flag set; a successful reset revokes every session.

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use super::error::AuthError;
use super::lockout;
use super::password::{check_policy, hash_password};
use super::session::revoke_all_sessions;
use super::state::AuthState;
use super::storage::{lookup_account_by_email, set_password_hash};
use super::types::{ForgotPasswordRequest, ResetPasswordRequest, ValidateResetTokenRequest};
use super::utils::{generate_token, hash_token, normalize_email};
use crate::api::email::{TEMPLATE_PASSWORD_RESET, enqueue_email};

async fn insert_reset_token(
    pool: &PgPool,
    account_id: Uuid,
    token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO password_reset_tokens (account_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + make_interval(secs => ($3::bigint)::double precision))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert reset token")?;
    Ok(())
}

/// Burn the token and return its account. Single atomic `UPDATE`: a token can
/// be spent exactly once.
async fn consume_reset_token(pool: &PgPool, token_hash: &[u8]) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE password_reset_tokens
        SET used = TRUE, used_at = NOW()
        WHERE token_hash = $1 AND NOT used AND expires_at > NOW()
        RETURNING account_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume reset token")?;
    Ok(row.map(|row| row.get("account_id")))
}

async fn reset_token_is_live(pool: &PgPool, token_hash: &[u8]) -> Result<bool> {
    let query = r"
        SELECT EXISTS (
            SELECT 1 FROM password_reset_tokens
            WHERE token_hash = $1 AND NOT used AND expires_at > NOW()
        ) AS live
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let live: bool = sqlx::query_scalar(query)
        .bind(token_hash)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check reset token")?;
    Ok(live)
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/forgot",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 204, description = "Always, whether or not the email exists"),
        (status = 400, description = "Missing payload")
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };

    let email = normalize_email(&request.email);
    if let Some(account) = lookup_account_by_email(&pool.0, &email).await? {
        let token = generate_token();
        insert_reset_token(
            &pool.0,
            account.id,
            &hash_token(&token),
            auth_state.config().reset_token_ttl_seconds(),
        )
        .await?;

        let link = format!(
            "{}/reset-password?token={token}",
            auth_state.config().frontend_base_url().trim_end_matches('/')
        );
        if let Err(error) = enqueue_email(
            &pool.0,
            &account.email,
            TEMPLATE_PASSWORD_RESET,
            &json!({ "name": account.name, "link": link }),
        )
        .await
        {
            tracing::error!(error = %error, "failed to enqueue reset email");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password replaced, all sessions revoked"),
        (status = 400, description = "Missing payload or weak password"),
        (status = 401, description = "Invalid, expired, or already used token")
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };
    check_policy(&request.new_password).map_err(AuthError::WeakPassword)?;

    let account_id = consume_reset_token(&pool.0, &hash_token(&request.token))
        .await?
        .ok_or(AuthError::InvalidOrExpiredToken)?;

    let password_hash = hash_password(&request.new_password)?;
    set_password_hash(&pool.0, account_id, &password_hash).await?;

    // Whoever held the old credentials loses every session, and a lock from
    // earlier guessing no longer applies.
    let revoked = revoke_all_sessions(&pool.0, account_id).await?;
    lockout::clear_failures(&pool.0, account_id).await?;
    tracing::info!(account_id = %account_id, revoked, "password reset");

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/validate",
    request_body = ValidateResetTokenRequest,
    responses(
        (status = 204, description = "Token is live"),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Invalid, expired, or already used token")
    ),
    tag = "auth"
)]
pub async fn validate_reset_token(
    pool: Extension<PgPool>,
    payload: Option<Json<ValidateResetTokenRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };

    if !reset_token_is_live(&pool.0, &hash_token(&request.token)).await? {
        return Err(AuthError::InvalidOrExpiredToken);
    }
    Ok(StatusCode::NO_CONTENT)
}
