//! Second factor enrollment and verification.
//!
//! Login with MFA enabled stops at an `MfaRequired` challenge; `/mfa/verify`
//! exchanges the challenge plus a code (or a backup code) for tokens. A
//! challenge is consumed on first use, success or not: a wrong code means
//! logging in again, which keeps the code un-bruteforceable.

mod recovery;
mod storage;
mod totp;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use super::device::assess_device;
use super::error::AuthError;
use super::principal::require_auth;
use super::refresh::issue_tokens;
use super::state::AuthState;
use super::storage::{Account, lookup_account_by_id, update_last_login};
use super::types::{MfaEnableRequest, MfaEnableResponse, MfaSetupRequest, MfaSetupResponse,
    MfaVerifyRequest};
use super::utils::{extract_client_ip, extract_user_agent, generate_numeric_code, generate_token,
    hash_token};
use crate::api::email::{TEMPLATE_LOGIN_ALERT, TEMPLATE_MFA_CODE, enqueue_email};

const CHANNEL_TOTP: &str = "totp";
const CHANNEL_SMS: &str = "sms";
const CHANNEL_EMAIL: &str = "email";

const CODE_DIGITS: u32 = 6;

fn known_channel(channel: &str) -> bool {
    matches!(channel, CHANNEL_TOTP | CHANNEL_SMS | CHANNEL_EMAIL)
}

/// Create the login challenge for an MFA-enabled account and, for code-based
/// channels, deliver the code through the outbox. Returns the raw challenge
/// token the client echoes back to `/mfa/verify`.
pub(super) async fn begin_login_challenge(
    pool: &PgPool,
    state: &AuthState,
    account: &Account,
) -> Result<String, AuthError> {
    let challenge = generate_token();
    let channel = account.mfa_channel.as_deref().unwrap_or(CHANNEL_TOTP);

    let code_hash = if channel == CHANNEL_TOTP {
        None
    } else {
        let code = generate_numeric_code(CODE_DIGITS);
        if let Err(error) = enqueue_email(
            pool,
            &account.email,
            TEMPLATE_MFA_CODE,
            &json!({ "code": code, "channel": channel, "phone": account.phone }),
        )
        .await
        {
            tracing::error!(error = %error, "failed to enqueue mfa code");
        }
        Some(hash_token(&code))
    };

    storage::create_challenge(
        pool,
        account.id,
        storage::KIND_LOGIN,
        &hash_token(&challenge),
        code_hash.as_deref(),
        state.config().mfa_challenge_ttl_seconds(),
    )
    .await?;

    Ok(challenge)
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/setup",
    request_body = MfaSetupRequest,
    responses(
        (status = 200, description = "Enrollment started", body = MfaSetupResponse),
        (status = 400, description = "Unknown channel or missing phone"),
        (status = 401, description = "Missing or invalid access token")
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn mfa_setup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<MfaSetupRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&headers, &auth_state)?;
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let channel = request.channel.as_deref().unwrap_or(CHANNEL_TOTP);
    if !known_channel(channel) {
        return Err(AuthError::BadRequest("unknown channel".to_string()));
    }

    let account = lookup_account_by_id(&pool.0, principal.account_id)
        .await?
        .ok_or(AuthError::Unauthorized)?;

    if channel == CHANNEL_TOTP {
        let secret = totp::generate_secret();
        storage::set_totp_secret(&pool.0, account.id, &secret).await?;
        let url = totp::build(&secret, auth_state.config().token_issuer(), &account.email)?
            .get_url();
        return Ok(Json(MfaSetupResponse {
            secret: Some(secret),
            otpauth_url: Some(url),
        }));
    }

    if channel == CHANNEL_SMS && request.phone.is_none() && account.phone.is_none() {
        return Err(AuthError::BadRequest("phone number required".to_string()));
    }

    // Code-based channels get a one-time enrollment code through the outbox;
    // the challenge token never leaves the server, enable consumes it by
    // account.
    let code = generate_numeric_code(CODE_DIGITS);
    if let Err(error) = enqueue_email(
        &pool.0,
        &account.email,
        TEMPLATE_MFA_CODE,
        &json!({ "code": code, "channel": channel, "phone": request.phone.or(account.phone) }),
    )
    .await
    {
        tracing::error!(error = %error, "failed to enqueue enrollment code");
    }
    storage::create_challenge(
        &pool.0,
        account.id,
        storage::KIND_ENROLL,
        &hash_token(&generate_token()),
        Some(&hash_token(&code)),
        auth_state.config().mfa_challenge_ttl_seconds(),
    )
    .await?;

    Ok(Json(MfaSetupResponse {
        secret: None,
        otpauth_url: None,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/enable",
    request_body = MfaEnableRequest,
    responses(
        (status = 200, description = "MFA enabled, backup codes issued once", body = MfaEnableResponse),
        (status = 400, description = "Missing payload, unknown channel, or setup not completed"),
        (status = 401, description = "Missing access token or wrong verification code")
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn mfa_enable(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<MfaEnableRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };
    if !known_channel(&request.channel) {
        return Err(AuthError::BadRequest("unknown channel".to_string()));
    }

    let account = lookup_account_by_id(&pool.0, principal.account_id)
        .await?
        .ok_or(AuthError::Unauthorized)?;

    // Prove the channel works before flipping the flag.
    match request.channel.as_str() {
        CHANNEL_TOTP => {
            let secret = account
                .mfa_totp_secret
                .as_deref()
                .ok_or_else(|| AuthError::BadRequest("TOTP setup not completed".to_string()))?;
            let verifier =
                totp::build(secret, auth_state.config().token_issuer(), &account.email)?;
            if !totp::verify_now(&verifier, &request.code) {
                return Err(AuthError::InvalidMfaCode);
            }
        }
        _ => {
            let challenge = storage::consume_enroll_challenge(&pool.0, account.id)
                .await?
                .ok_or(AuthError::InvalidMfaCode)?;
            let matches = challenge
                .code_hash
                .is_some_and(|hash| hash == hash_token(&request.code));
            if !matches {
                return Err(AuthError::InvalidMfaCode);
            }
        }
    }

    if request.channel == CHANNEL_SMS && request.phone.is_none() && account.phone.is_none() {
        return Err(AuthError::BadRequest("phone number required".to_string()));
    }

    storage::enable_mfa(
        &pool.0,
        account.id,
        &request.channel,
        request.phone.as_deref(),
    )
    .await?;

    let codes = recovery::generate_backup_codes();
    let hashes = codes
        .iter()
        .map(|code| recovery::hash_backup_code(code, auth_state.mfa_pepper()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    storage::replace_backup_codes(&pool.0, account.id, &hashes).await?;

    tracing::info!(account_id = %account.id, channel = %request.channel, "mfa enabled");
    Ok(Json(MfaEnableResponse {
        backup_codes: codes,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/disable",
    responses(
        (status = 204, description = "MFA disabled, enrollment cleared"),
        (status = 401, description = "Missing or invalid access token")
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn mfa_disable(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&headers, &auth_state)?;
    storage::disable_mfa(&pool.0, principal.account_id).await?;
    tracing::info!(account_id = %principal.account_id, "mfa disabled");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "Second factor accepted, tokens issued", body = super::types::TokenResponse),
        (status = 400, description = "Missing payload or code"),
        (status = 401, description = "Unknown challenge or wrong code"),
        (status = 403, description = "Device blocked")
    ),
    tag = "mfa"
)]
pub async fn mfa_verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<MfaVerifyRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };

    let challenge = storage::consume_login_challenge(&pool.0, &hash_token(&request.challenge))
        .await?
        .ok_or(AuthError::InvalidOrExpiredToken)?;
    let account = lookup_account_by_id(&pool.0, challenge.account_id)
        .await?
        .ok_or(AuthError::InvalidOrExpiredToken)?;
    if !account.active {
        return Err(AuthError::InvalidOrExpiredToken);
    }

    if let Some(backup_code) = request.backup_code.as_deref() {
        let consumed = recovery::consume_backup_code(
            &pool.0,
            account.id,
            backup_code,
            auth_state.mfa_pepper(),
        )
        .await?;
        if !consumed {
            return Err(AuthError::InvalidMfaCode);
        }
    } else if let Some(code) = request.code.as_deref() {
        match account.mfa_channel.as_deref().unwrap_or(CHANNEL_TOTP) {
            CHANNEL_TOTP => {
                let secret = account
                    .mfa_totp_secret
                    .as_deref()
                    .ok_or(AuthError::InvalidMfaCode)?;
                let verifier =
                    totp::build(secret, auth_state.config().token_issuer(), &account.email)?;
                if !totp::verify_now(&verifier, code) {
                    return Err(AuthError::InvalidMfaCode);
                }
            }
            _ => {
                let matches = challenge
                    .code_hash
                    .as_deref()
                    .is_some_and(|hash| hash == hash_token(code).as_slice());
                if !matches {
                    return Err(AuthError::InvalidMfaCode);
                }
            }
        }
    } else {
        return Err(AuthError::BadRequest(
            "code or backup_code required".to_string(),
        ));
    }

    let ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
    let assessment = assess_device(&pool.0, &auth_state, account.id, &user_agent, &ip).await?;

    // The second factor completes the login, so last-login lands here rather
    // than on the password step.
    update_last_login(&pool.0, account.id, &ip).await?;

    if assessment.suspicious {
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
    tracing::info!(account_id = %account.id, "mfa verified");

    Ok(Json(tokens))
}

#[cfg(test)]
mod tests {
    use super::known_channel;

    #[test]
    fn channel_names_are_closed() {
        assert!(known_channel("totp"));
        assert!(known_channel("sms"));
        assert!(known_channel("email"));
        assert!(!known_channel("carrier-pigeon"));
        assert!(!known_channel("TOTP"));
    }
}
