//! Supported external identity providers and their client credentials.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Closed set of supported providers; an unknown path segment never reaches
/// the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    GitHub,
}

impl Provider {
    pub(super) const fn authorize_endpoint(self) -> &'static str {
        match self {
            Self::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            Self::GitHub => "https://github.com/login/oauth/authorize",
        }
    }

    pub(super) const fn token_endpoint(self) -> &'static str {
        match self {
            Self::Google => "https://oauth2.googleapis.com/token",
            Self::GitHub => "https://github.com/login/oauth/access_token",
        }
    }

    pub(super) const fn profile_endpoint(self) -> &'static str {
        match self {
            Self::Google => "https://openidconnect.googleapis.com/v1/userinfo",
            Self::GitHub => "https://api.github.com/user",
        }
    }

    pub(super) const fn scopes(self) -> &'static str {
        match self {
            Self::Google => "openid email profile",
            Self::GitHub => "read:user user:email",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::GitHub => "github",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Self::Google),
            "github" => Ok(Self::GitHub),
            _ => Err(()),
        }
    }
}

pub(super) struct ClientCredentials {
    client_id: String,
    client_secret: SecretString,
}

impl ClientCredentials {
    pub(super) fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(super) fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

/// Providers configured at startup. A provider without credentials behaves
/// like an unsupported one.
#[derive(Default)]
pub struct ProviderRegistry {
    google: Option<ClientCredentials>,
    github: Option<ClientCredentials>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_google(mut self, client_id: String, client_secret: String) -> Self {
        self.google = Some(ClientCredentials {
            client_id,
            client_secret: SecretString::from(client_secret),
        });
        self
    }

    #[must_use]
    pub fn with_github(mut self, client_id: String, client_secret: String) -> Self {
        self.github = Some(ClientCredentials {
            client_id,
            client_secret: SecretString::from(client_secret),
        });
        self
    }

    pub(super) fn credentials(&self, provider: Provider) -> Option<&ClientCredentials> {
        match provider {
            Provider::Google => self.google.as_ref(),
            Provider::GitHub => self.github.as_ref(),
        }
    }
}

/// Assemble the provider's authorization endpoint URL for the frontend to
/// redirect to.
pub(super) fn build_authorization_url(
    provider: Provider,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
) -> Result<String> {
    let mut url = Url::parse(provider.authorize_endpoint()).context("parsing authorize endpoint")?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", provider.scopes())
        .append_pair("state", state);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing_is_closed_and_lowercase() {
        assert_eq!("google".parse::<Provider>(), Ok(Provider::Google));
        assert_eq!("github".parse::<Provider>(), Ok(Provider::GitHub));
        assert!("Google".parse::<Provider>().is_err());
        assert!("gitlab".parse::<Provider>().is_err());
        assert!("".parse::<Provider>().is_err());
    }

    #[test]
    fn authorization_url_carries_required_params() -> Result<()> {
        let url = build_authorization_url(
            Provider::Google,
            "client-123",
            "https://janua.dev/oauth/callback",
            "state-1",
        )?;
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fjanua.dev%2Foauth%2Fcallback"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("state=state-1"));
        Ok(())
    }

    #[test]
    fn registry_returns_only_configured_providers() {
        let registry = ProviderRegistry::new().with_github("id".to_string(), "secret".to_string());
        assert!(registry.credentials(Provider::GitHub).is_some());
        assert!(registry.credentials(Provider::Google).is_none());
        assert_eq!(
            registry
                .credentials(Provider::GitHub)
                .map(ClientCredentials::client_id),
            Some("id")
        );
    }
}
