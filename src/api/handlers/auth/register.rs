//! Account registration.

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
use super::password::{check_policy, hash_password};
use super::refresh::issue_tokens;
use super::state::AuthState;
use super::storage::{RegisterOutcome, insert_account};
use super::types::RegisterRequest;
use super::utils::{extract_client_ip, extract_user_agent, normalize_email, valid_email};
use crate::api::email::{TEMPLATE_WELCOME, enqueue_email};

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, tokens issued", body = super::types::TokenResponse),
        (status = 400, description = "Missing payload, invalid email, or weak password"),
        (status = 409, description = "Email already registered")
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(AuthError::BadRequest("invalid email".to_string()));
    }
    check_policy(&request.password).map_err(AuthError::WeakPassword)?;

    let password_hash = hash_password(&request.password)?;
    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    let account =
        match insert_account(&pool.0, &email, Some(&password_hash), name, "password").await? {
            RegisterOutcome::Created(account) => account,
            RegisterOutcome::Conflict => return Err(AuthError::DuplicateEmail),
        };
    tracing::info!(account_id = %account.id, "account registered");

    let ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
    let assessment = assess_device(&pool.0, &auth_state, account.id, &user_agent, &ip).await?;

    // Welcome mail is best effort; registration never fails on it.
    if let Err(error) = enqueue_email(
        &pool.0,
        &account.email,
        TEMPLATE_WELCOME,
        &json!({ "name": account.name, "email": account.email }),
    )
    .await
    {
        tracing::error!(error = %error, "failed to enqueue welcome email");
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

    Ok((StatusCode::CREATED, Json(tokens)))
}
