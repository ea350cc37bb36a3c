//! Token refresh and logout.
//!
//! `refresh` rotates the session in a single compare-and-swap: the presented
//! token's digest must still be the stored one. A replayed predecessor token
//! therefore fails cleanly, with no grace window.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::error::AuthError;
use super::jwt::{self, TYP_REFRESH};
use super::principal::require_auth;
use super::session;
use super::state::AuthState;
use super::storage::{self, Account};
use super::types::{LogoutRequest, RefreshRequest, TokenResponse};
use super::utils::{generate_token, hash_token};

/// Mint an access/refresh pair and persist the backing session row.
pub(super) async fn issue_tokens(
    pool: &PgPool,
    state: &AuthState,
    account: &Account,
    ip: &str,
    user_agent: &str,
    device_fingerprint: Option<&str>,
) -> Result<TokenResponse, AuthError> {
    let now = jwt::now_unix_seconds();
    let config = state.config();

    let session_id = Uuid::now_v7();
    let refresh_token = state
        .keys()
        .sign(&jwt::refresh_claims(
            &account.id.to_string(),
            &session_id.to_string(),
            &generate_token(),
            config.token_issuer(),
            now,
            config.refresh_token_ttl_seconds(),
        ))
        .map_err(|error| AuthError::Internal(anyhow::anyhow!("signing refresh token: {error}")))?;

    session::insert_session(
        pool,
        session_id,
        account.id,
        &hash_token(&refresh_token),
        config.refresh_token_ttl_seconds(),
        ip,
        user_agent,
        device_fingerprint,
    )
    .await?;

    let access_token = state
        .keys()
        .sign(&jwt::access_claims(
            &account.id.to_string(),
            &account.email,
            account.roles.clone(),
            &account.tenant_id,
            config.token_issuer(),
            now,
            config.access_token_ttl_seconds(),
        ))
        .map_err(|error| AuthError::Internal(anyhow::anyhow!("signing access token: {error}")))?;

    Ok(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: config.access_token_ttl_seconds(),
        user: account.to_public(),
    })
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenResponse),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Invalid, expired, revoked, or already rotated token")
    ),
    tag = "auth"
)]
pub async fn refresh(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };
    let state = &auth_state.0;
    let config = state.config();
    let now = jwt::now_unix_seconds();

    let claims = state
        .keys()
        .verify(
            &request.refresh_token,
            TYP_REFRESH,
            config.token_issuer(),
            now,
        )
        .map_err(|error| {
            tracing::debug!(error = %error, "refresh token rejected");
            AuthError::InvalidOrExpiredToken
        })?;
    let session_id = claims
        .sid
        .as_deref()
        .and_then(|sid| Uuid::parse_str(sid).ok())
        .ok_or(AuthError::InvalidOrExpiredToken)?;
    let account_id =
        Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidOrExpiredToken)?;

    let account = storage::lookup_account_by_id(&pool.0, account_id)
        .await?
        .ok_or(AuthError::InvalidOrExpiredToken)?;
    if !account.active {
        tracing::warn!(account_id = %account.id, "refresh on deactivated account");
        return Err(AuthError::InvalidOrExpiredToken);
    }

    // Sign the successor before the swap so the session row never points at
    // a token that does not exist yet.
    let successor = state
        .keys()
        .sign(&jwt::refresh_claims(
            &account.id.to_string(),
            &session_id.to_string(),
            &generate_token(),
            config.token_issuer(),
            now,
            config.refresh_token_ttl_seconds(),
        ))
        .map_err(|error| AuthError::Internal(anyhow::anyhow!("signing refresh token: {error}")))?;

    let rotated = session::rotate_session(
        &pool.0,
        session_id,
        &hash_token(&request.refresh_token),
        &hash_token(&successor),
        config.refresh_token_ttl_seconds(),
    )
    .await?;
    if !rotated {
        tracing::warn!(session_id = %session_id, "refresh rotation lost or token replayed");
        return Err(AuthError::InvalidOrExpiredToken);
    }

    let access_token = state
        .keys()
        .sign(&jwt::access_claims(
            &account.id.to_string(),
            &account.email,
            account.roles.clone(),
            &account.tenant_id,
            config.token_issuer(),
            now,
            config.access_token_ttl_seconds(),
        ))
        .map_err(|error| AuthError::Internal(anyhow::anyhow!("signing access token: {error}")))?;

    Ok(Json(TokenResponse {
        access_token,
        refresh_token: successor,
        token_type: "Bearer".to_string(),
        expires_in: config.access_token_ttl_seconds(),
        user: account.to_public(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Session revoked; unknown tokens are a no-op"),
        (status = 400, description = "Missing payload")
    ),
    tag = "auth"
)]
pub async fn logout(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };
    let state = &auth_state.0;

    // Logout is idempotent: a malformed or already-dead token still gets 204.
    if let Ok(claims) = state.keys().verify(
        &request.refresh_token,
        TYP_REFRESH,
        state.config().token_issuer(),
        jwt::now_unix_seconds(),
    ) {
        if let Some(session_id) = claims
            .sid
            .as_deref()
            .and_then(|sid| Uuid::parse_str(sid).ok())
        {
            session::revoke_session(&pool.0, session_id, &hash_token(&request.refresh_token))
                .await?;
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    responses(
        (status = 204, description = "Every session for the account revoked"),
        (status = 401, description = "Missing or invalid access token")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout_all(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&headers, &auth_state)?;
    let revoked = session::revoke_all_sessions(&pool.0, principal.account_id).await?;
    tracing::info!(account_id = %principal.account_id, revoked, "logout all");
    Ok(StatusCode::NO_CONTENT)
}
