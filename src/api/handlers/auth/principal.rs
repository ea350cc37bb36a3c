//! Access-token authentication for protected endpoints.

use axum::http::HeaderMap;
use uuid::Uuid;

use super::error::AuthError;
use super::jwt::{self, TYP_ACCESS};
use super::state::AuthState;
use super::utils::extract_bearer_token;

/// The authenticated caller, decoded from a bearer access token.
#[derive(Debug, Clone)]
pub(crate) struct Principal {
    pub(crate) account_id: Uuid,
    pub(crate) email: Option<String>,
    pub(crate) roles: Vec<String>,
    pub(crate) tenant: Option<String>,
}

/// Validate the `Authorization: Bearer` access token. All failures collapse
/// to `Unauthorized`; details go to the log only.
pub(crate) fn require_auth(headers: &HeaderMap, state: &AuthState) -> Result<Principal, AuthError> {
    let token = extract_bearer_token(headers).ok_or(AuthError::Unauthorized)?;
    let claims = state
        .keys()
        .verify(
            token,
            TYP_ACCESS,
            state.config().token_issuer(),
            jwt::now_unix_seconds(),
        )
        .map_err(|error| {
            tracing::debug!(error = %error, "access token rejected");
            AuthError::Unauthorized
        })?;
    let account_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::Unauthorized)?;
    Ok(Principal {
        account_id,
        email: claims.email,
        roles: claims.roles,
        tenant: claims.tenant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::jwt::access_claims;
    use crate::api::handlers::auth::oauth::ProviderRegistry;
    use crate::api::handlers::auth::state::AuthConfig;
    use axum::http::header::AUTHORIZATION;
    use secrecy::SecretString;

    fn state() -> AuthState {
        AuthState::new(
            AuthConfig::new("https://janua.dev".to_string()),
            SecretString::from("sixteen-byte-key"),
            SecretString::from("pepper"),
            "salt".to_string(),
            ProviderRegistry::new(),
        )
    }

    #[test]
    fn accepts_valid_access_token() {
        let state = state();
        let account_id = Uuid::new_v4();
        let token = state
            .keys()
            .sign(&access_claims(
                &account_id.to_string(),
                "alice@example.com",
                vec!["user".to_string()],
                "default",
                "janua",
                jwt::now_unix_seconds(),
                900,
            ))
            .expect("sign");
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());

        let principal = require_auth(&headers, &state).expect("principal");
        assert_eq!(principal.account_id, account_id);
        assert_eq!(principal.email.as_deref(), Some("alice@example.com"));
        assert_eq!(principal.roles, vec!["user".to_string()]);
    }

    #[test]
    fn rejects_missing_header() {
        let result = require_auth(&HeaderMap::new(), &state());
        assert!(matches!(result, Err(AuthError::Unauthorized)));
    }

    #[test]
    fn rejects_refresh_token_as_access_token() {
        let state = state();
        let token = state
            .keys()
            .sign(&crate::api::handlers::auth::jwt::refresh_claims(
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                "jti",
                "janua",
                jwt::now_unix_seconds(),
                900,
            ))
            .expect("sign");
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        assert!(matches!(
            require_auth(&headers, &state),
            Err(AuthError::Unauthorized)
        ));
    }
}
