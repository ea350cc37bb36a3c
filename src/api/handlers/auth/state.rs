//! Shared, immutable auth configuration and key material.
//!
//! Built once at startup from CLI arguments and handed to handlers through an
//! `Extension<Arc<AuthState>>`.

use crate::api::handlers::auth::{jwt::TokenKeys, oauth::ProviderRegistry};
use secrecy::SecretString;

const DEFAULT_TOKEN_ISSUER: &str = "janua";
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 900;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 604_800;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 1_800;
const DEFAULT_MFA_CHALLENGE_TTL_SECONDS: i64 = 300;
const DEFAULT_SESSION_SWEEP_SECONDS: u64 = 3_600;
const DEFAULT_OAUTH_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    frontend_base_url: String,
    token_issuer: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    mfa_challenge_ttl_seconds: i64,
    session_sweep_seconds: u64,
    oauth_timeout_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            token_issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            mfa_challenge_ttl_seconds: DEFAULT_MFA_CHALLENGE_TTL_SECONDS,
            session_sweep_seconds: DEFAULT_SESSION_SWEEP_SECONDS,
            oauth_timeout_seconds: DEFAULT_OAUTH_TIMEOUT_SECONDS,
        }
    }

    #[must_use]
    pub fn with_token_issuer(mut self, issuer: String) -> Self {
        self.token_issuer = issuer;
        self
    }

    #[must_use]
    pub const fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_mfa_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.mfa_challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_session_sweep_seconds(mut self, seconds: u64) -> Self {
        self.session_sweep_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_oauth_timeout_seconds(mut self, seconds: u64) -> Self {
        self.oauth_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn token_issuer(&self) -> &str {
        &self.token_issuer
    }

    #[must_use]
    pub const fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub const fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub const fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    #[must_use]
    pub const fn mfa_challenge_ttl_seconds(&self) -> i64 {
        self.mfa_challenge_ttl_seconds
    }

    #[must_use]
    pub const fn session_sweep_seconds(&self) -> u64 {
        self.session_sweep_seconds
    }

    #[must_use]
    pub const fn oauth_timeout_seconds(&self) -> u64 {
        self.oauth_timeout_seconds
    }
}

pub struct AuthState {
    config: AuthConfig,
    keys: TokenKeys,
    mfa_pepper: SecretString,
    device_salt: String,
    providers: ProviderRegistry,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        token_secret: SecretString,
        mfa_pepper: SecretString,
        device_salt: String,
        providers: ProviderRegistry,
    ) -> Self {
        let keys = TokenKeys::new(token_secret);
        Self {
            config,
            keys,
            mfa_pepper,
            device_salt,
            providers,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub const fn keys(&self) -> &TokenKeys {
        &self.keys
    }

    #[must_use]
    pub const fn mfa_pepper(&self) -> &SecretString {
        &self.mfa_pepper
    }

    #[must_use]
    pub fn device_salt(&self) -> &str {
        &self.device_salt
    }

    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = AuthConfig::new("https://janua.dev".to_string());
        assert_eq!(config.token_issuer(), "janua");
        assert_eq!(config.access_token_ttl_seconds(), 900);
        assert_eq!(config.refresh_token_ttl_seconds(), 604_800);
        assert_eq!(config.reset_token_ttl_seconds(), 1_800);
        assert_eq!(config.mfa_challenge_ttl_seconds(), 300);
        assert_eq!(config.session_sweep_seconds(), 3_600);
        assert_eq!(config.oauth_timeout_seconds(), 10);
    }

    #[test]
    fn config_builders_override_defaults() {
        let config = AuthConfig::new("https://example.com".to_string())
            .with_token_issuer("issuer".to_string())
            .with_access_token_ttl_seconds(60)
            .with_refresh_token_ttl_seconds(120)
            .with_reset_token_ttl_seconds(30)
            .with_mfa_challenge_ttl_seconds(45)
            .with_session_sweep_seconds(10)
            .with_oauth_timeout_seconds(3);
        assert_eq!(config.frontend_base_url(), "https://example.com");
        assert_eq!(config.token_issuer(), "issuer");
        assert_eq!(config.access_token_ttl_seconds(), 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 120);
        assert_eq!(config.reset_token_ttl_seconds(), 30);
        assert_eq!(config.mfa_challenge_ttl_seconds(), 45);
        assert_eq!(config.session_sweep_seconds(), 10);
        assert_eq!(config.oauth_timeout_seconds(), 3);
    }

    #[test]
    fn state_exposes_parts() {
        let state = AuthState::new(
            AuthConfig::new("https://janua.dev".to_string()),
            SecretString::from("sixteen-byte-key"),
            SecretString::from("pepper"),
            "salt".to_string(),
            ProviderRegistry::new(),
        );
        assert_eq!(state.device_salt(), "salt");
        assert_eq!(state.config().token_issuer(), "janua");
    }
}
