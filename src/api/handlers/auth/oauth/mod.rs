//! External identity linking (OAuth authorization-code flow).
//!
//! The provider set is closed; credentials come from the CLI. Token exchange
//! and profile fetch run on the request task with explicit timeouts, and any
//! failure on that path aborts with `OAuthExchangeFailed`.

mod provider;
mod storage;

pub use provider::ProviderRegistry;

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use self::provider::{Provider, build_authorization_url};
use super::device::assess_device;
use super::error::AuthError;
use super::principal::require_auth;
use super::refresh::issue_tokens;
use super::state::AuthState;
use super::storage::{RegisterOutcome, insert_account, lookup_account_by_email,
    lookup_account_by_id};
use super::types::{OAuthCallbackRequest, OAuthUrlResponse};
use super::utils::{extract_client_ip, extract_user_agent, generate_token, normalize_email};
use crate::api::email::{TEMPLATE_LOGIN_ALERT, enqueue_email};

#[derive(Deserialize)]
pub struct AuthorizationUrlQuery {
    redirect_uri: String,
}

/// What we need from the provider to link or create an account.
struct Profile {
    subject: String,
    email: String,
    name: Option<String>,
}

/// Token material from the code exchange, cached on the link row.
struct Grant {
    access_token: String,
    refresh_token: Option<String>,
    expires_in_seconds: Option<i64>,
    scopes: Vec<String>,
}

fn parse_provider(raw: &str) -> Result<Provider, AuthError> {
    raw.parse().map_err(|()| AuthError::UnsupportedOAuthProvider)
}

#[utoipa::path(
    get,
    path = "/v1/auth/oauth/{provider}/url",
    params(
        ("provider" = String, Path, description = "Provider name: google or github"),
        ("redirect_uri" = String, Query, description = "Where the provider sends the user back")
    ),
    responses(
        (status = 200, description = "Authorization URL to redirect to", body = OAuthUrlResponse),
        (status = 400, description = "Unknown or unconfigured provider")
    ),
    tag = "oauth"
)]
pub async fn authorization_url(
    Path(raw_provider): Path<String>,
    Query(query): Query<AuthorizationUrlQuery>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let provider = parse_provider(&raw_provider)?;
    let credentials = auth_state
        .providers()
        .credentials(provider)
        .ok_or(AuthError::UnsupportedOAuthProvider)?;

    let url = build_authorization_url(
        provider,
        credentials.client_id(),
        &query.redirect_uri,
        &generate_token(),
    )?;
    Ok(Json(OAuthUrlResponse { url }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/oauth/{provider}/callback",
    params(("provider" = String, Path, description = "Provider name: google or github")),
    request_body = OAuthCallbackRequest,
    responses(
        (status = 200, description = "Identity linked, tokens issued", body = super::types::TokenResponse),
        (status = 400, description = "Missing payload or unknown provider"),
        (status = 502, description = "Provider exchange or profile fetch failed")
    ),
    tag = "oauth"
)]
pub async fn callback(
    headers: HeaderMap,
    Path(raw_provider): Path<String>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<OAuthCallbackRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let provider = parse_provider(&raw_provider)?;
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };
    let state = &auth_state.0;

    let (profile, grant) =
        fetch_profile(state, provider, &request.code, &request.redirect_uri).await?;
    let email = normalize_email(&profile.email);

    // Link to the existing account with this email, or create a fresh
    // password-less account owned by the provider.
    let account = match lookup_account_by_email(&pool.0, &email).await? {
        Some(account) => account,
        None => {
            match insert_account(
                &pool.0,
                &email,
                None,
                profile.name.as_deref(),
                provider.as_str(),
            )
            .await?
            {
                RegisterOutcome::Created(account) => {
                    tracing::info!(account_id = %account.id, provider = %provider, "account created via oauth");
                    account
                }
                // Lost a race with a concurrent registration; the row exists now.
                RegisterOutcome::Conflict => lookup_account_by_email(&pool.0, &email)
                    .await?
                    .ok_or_else(|| {
                        AuthError::Internal(anyhow::anyhow!("account vanished after conflict"))
                    })?,
            }
        }
    };
    if !account.active {
        tracing::warn!(account_id = %account.id, "oauth login on deactivated account");
        return Err(AuthError::InvalidCredentials);
    }

    storage::upsert_link(&pool.0, account.id, provider, &profile.subject, &email, &grant).await?;

    let ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
    let assessment = assess_device(&pool.0, state, account.id, &user_agent, &ip).await?;

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
        state,
        &account,
        &ip,
        &user_agent,
        Some(&assessment.fingerprint),
    )
    .await?;

    Ok(Json(tokens))
}

#[utoipa::path(
    post,
    path = "/v1/auth/oauth/{provider}/unlink",
    params(("provider" = String, Path, description = "Provider name: google or github")),
    responses(
        (status = 204, description = "Link removed"),
        (status = 400, description = "Unknown provider, no such link, or last auth method"),
        (status = 401, description = "Missing or invalid access token")
    ),
    security(("bearer" = [])),
    tag = "oauth"
)]
pub async fn unlink(
    headers: HeaderMap,
    Path(raw_provider): Path<String>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let provider = parse_provider(&raw_provider)?;
    let principal = require_auth(&headers, &auth_state)?;

    let account = lookup_account_by_id(&pool.0, principal.account_id)
        .await?
        .ok_or(AuthError::Unauthorized)?;

    // An account must keep at least one way in: a password or another link.
    if account.password_hash.is_none() && storage::count_links(&pool.0, account.id).await? <= 1 {
        return Err(AuthError::BadRequest(
            "cannot remove the only authentication method".to_string(),
        ));
    }

    if !storage::delete_link(&pool.0, account.id, provider).await? {
        return Err(AuthError::BadRequest("no such link".to_string()));
    }
    tracing::info!(account_id = %account.id, provider = %provider, "oauth link removed");

    Ok(StatusCode::NO_CONTENT)
}

fn http_client(state: &AuthState) -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(state.config().oauth_timeout_seconds()))
        .user_agent(crate::APP_USER_AGENT)
        .build()
        .map_err(|error| AuthError::Internal(anyhow::anyhow!("building http client: {error}")))
}

/// Authorization-code exchange followed by a profile fetch. Everything here
/// is on the critical path: any failure is `OAuthExchangeFailed`.
async fn fetch_profile(
    state: &AuthState,
    provider: Provider,
    code: &str,
    redirect_uri: &str,
) -> Result<(Profile, Grant), AuthError> {
    let credentials = state
        .providers()
        .credentials(provider)
        .ok_or(AuthError::UnsupportedOAuthProvider)?;
    let client = http_client(state)?;

    let exchange = client
        .post(provider.token_endpoint())
        .header(axum::http::header::ACCEPT, "application/json")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", credentials.client_id()),
            ("client_secret", credentials.client_secret()),
        ])
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|error| {
            tracing::error!(provider = %provider, error = %error, "token exchange failed");
            AuthError::OAuthExchangeFailed
        })?;
    let exchange: serde_json::Value = exchange.json().await.map_err(|error| {
        tracing::error!(provider = %provider, error = %error, "token exchange response unreadable");
        AuthError::OAuthExchangeFailed
    })?;
    let grant = parse_grant(&exchange).ok_or_else(|| {
        tracing::error!(provider = %provider, "token exchange response missing access_token");
        AuthError::OAuthExchangeFailed
    })?;

    let profile = client
        .get(provider.profile_endpoint())
        .bearer_auth(&grant.access_token)
        .header(axum::http::header::ACCEPT, "application/json")
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|error| {
            tracing::error!(provider = %provider, error = %error, "profile fetch failed");
            AuthError::OAuthExchangeFailed
        })?;
    let profile: serde_json::Value = profile.json().await.map_err(|error| {
        tracing::error!(provider = %provider, error = %error, "profile response unreadable");
        AuthError::OAuthExchangeFailed
    })?;

    let profile = parse_profile(provider, &profile).ok_or_else(|| {
        tracing::error!(provider = %provider, "profile response missing subject or email");
        AuthError::OAuthExchangeFailed
    })?;
    Ok((profile, grant))
}

/// Pull the token material out of the exchange response. Google separates
/// scopes with spaces, GitHub with commas; both are accepted.
fn parse_grant(exchange: &serde_json::Value) -> Option<Grant> {
    let access_token = exchange.get("access_token")?.as_str()?.to_string();
    let refresh_token = exchange
        .get("refresh_token")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    let expires_in_seconds = exchange
        .get("expires_in")
        .and_then(serde_json::Value::as_i64);
    let scopes = exchange
        .get("scope")
        .and_then(serde_json::Value::as_str)
        .map(|scope| {
            scope
                .split([' ', ','])
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(Grant {
        access_token,
        refresh_token,
        expires_in_seconds,
        scopes,
    })
}

/// Pull subject/email/name out of the provider-specific profile shape.
fn parse_profile(provider: Provider, profile: &serde_json::Value) -> Option<Profile> {
    match provider {
        Provider::Google => Some(Profile {
            subject: profile.get("sub")?.as_str()?.to_string(),
            email: profile.get("email")?.as_str()?.to_string(),
            name: profile
                .get("name")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
        }),
        Provider::GitHub => Some(Profile {
            // GitHub subjects are numeric ids.
            subject: profile.get("id")?.as_i64()?.to_string(),
            email: profile.get("email")?.as_str()?.to_string(),
            name: profile
                .get("name")
                .and_then(serde_json::Value::as_str)
                .or_else(|| profile.get("login").and_then(serde_json::Value::as_str))
                .map(str::to_string),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_provider_rejects_unknown() {
        assert!(parse_provider("google").is_ok());
        assert!(parse_provider("github").is_ok());
        assert!(matches!(
            parse_provider("gitlab"),
            Err(AuthError::UnsupportedOAuthProvider)
        ));
    }

    #[test]
    fn parses_google_profile() {
        let value = json!({"sub": "g-123", "email": "alice@example.com", "name": "Alice"});
        let profile = parse_profile(Provider::Google, &value).expect("profile");
        assert_eq!(profile.subject, "g-123");
        assert_eq!(profile.email, "alice@example.com");
        assert_eq!(profile.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn parses_github_profile_with_login_fallback() {
        let value = json!({"id": 42, "email": "bob@example.com", "login": "bob"});
        let profile = parse_profile(Provider::GitHub, &value).expect("profile");
        assert_eq!(profile.subject, "42");
        assert_eq!(profile.name.as_deref(), Some("bob"));
    }

    #[test]
    fn rejects_profile_without_email() {
        let value = json!({"id": 42, "email": null, "login": "bob"});
        assert!(parse_profile(Provider::GitHub, &value).is_none());
    }

    #[test]
    fn parses_grant_with_space_separated_scopes() {
        let value = json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 3600,
            "scope": "openid email profile"
        });
        let grant = parse_grant(&value).expect("grant");
        assert_eq!(grant.access_token, "at-1");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(grant.expires_in_seconds, Some(3600));
        assert_eq!(grant.scopes, ["openid", "email", "profile"]);
    }

    #[test]
    fn parses_grant_with_comma_separated_scopes() {
        let value = json!({"access_token": "at-2", "scope": "read:user,user:email"});
        let grant = parse_grant(&value).expect("grant");
        assert!(grant.refresh_token.is_none());
        assert!(grant.expires_in_seconds.is_none());
        assert_eq!(grant.scopes, ["read:user", "user:email"]);
    }

    #[test]
    fn grant_requires_access_token() {
        assert!(parse_grant(&json!({"scope": "email"})).is_none());
    }
}
