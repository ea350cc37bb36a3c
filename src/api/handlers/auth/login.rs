//! Password login.

use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::{Arc, OnceLock};

use super::device::assess_device;
use super::error::AuthError;
use super::lockout;
use super::mfa;
use super::password::{hash_password, verify_password};
use super::refresh::issue_tokens;
use super::state::AuthState;
use super::storage::{lookup_account_by_email, update_last_login};
use super::types::LoginRequest;
use super::utils::{extract_client_ip, extract_user_agent, normalize_email};
use crate::api::email::{TEMPLATE_LOGIN_ALERT, enqueue_email};

/// Hash verified against when the email does not exist, so unknown and known
/// accounts take the same time to reject.
fn decoy_hash() -> &'static str {
    static DECOY: OnceLock<String> = OnceLock::new();
    DECOY.get_or_init(|| hash_password("decoy-password").unwrap_or_default())
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens issued", body = super::types::TokenResponse),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Invalid credentials, or MFA required (challenge included)"),
        (status = 403, description = "Device blocked"),
        (status = 423, description = "Account locked")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };

    let email = normalize_email(&request.email);
    let Some(account) = lookup_account_by_email(&pool.0, &email).await? else {
        let _ = verify_password(&request.password, decoy_hash());
        return Err(AuthError::InvalidCredentials);
    };
    if !account.active {
        tracing::warn!(account_id = %account.id, "login on deactivated account");
        return Err(AuthError::InvalidCredentials);
    }

    if let Some(retry_after_seconds) = lockout::active_lock_seconds(&pool.0, account.id).await? {
        return Err(AuthError::AccountLocked {
            retry_after_seconds,
        });
    }

    // OAuth-only accounts have no password hash; a password attempt against
    // them counts as a failure like any other.
    let verified = account
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&request.password, hash));
    if !verified {
        if let Some(retry_after_seconds) = lockout::record_failure(&pool.0, account.id).await? {
            return Err(AuthError::AccountLocked {
                retry_after_seconds,
            });
        }
        return Err(AuthError::InvalidCredentials);
    }

    lockout::clear_failures(&pool.0, account.id).await?;

    let ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
    let assessment = assess_device(&pool.0, &auth_state, account.id, &user_agent, &ip).await?;

    if account.mfa_enabled {
        let challenge = mfa::begin_login_challenge(&pool.0, &auth_state, &account).await?;
        return Err(AuthError::MfaRequired { challenge });
    }

    // Recorded only once the login is complete; with MFA enabled that happens
    // after the second factor instead.
    update_last_login(&pool.0, account.id, &ip).await?;

    if assessment.suspicious {
        // Alert only; a suspicious but unblocked device may still log in.
        if let Err(error) = enqueue_email(
            &pool.0,
            &account.email,
            TEMPLATE_LOGIN_ALERT,
            &json!({ "ip": ip, "user_agent": user_agent, "new_device": assessment.new_device }),
        )
        .await
        {
            tracing::error!(error = %error, "failed to enqueue login alert");
        }
    }

    let tokens = issue_tokens(
        &pool.0,
        &auth_state,
        &account,
        &ip,
        &user_agent,
        Some(&assessment.fingerprint),
    )
    .await?;
    tracing::info!(account_id = %account.id, "login");

    Ok(Json(tokens))
}
