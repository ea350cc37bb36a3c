//! HS256 JWT codec for access and refresh tokens.
//!
//! Access tokens are short-lived bearer credentials carrying the account's
//! roles and tenant. Refresh tokens embed the session id (`sid`) for keyed
//! lookup plus a random `jti` acting as the secret portion; only a SHA-256
//! digest of the full token is stored server side.
//!
//! `verify` takes `now_unix_seconds` explicitly so expiry paths are testable
//! without a real clock.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

pub const TYP_ACCESS: &str = "access";
pub const TYP_REFRESH: &str = "refresh";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Header {
    alg: String,
    typ: String,
}

impl Header {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claims for both token kinds; `typ` distinguishes them so an access token
/// can never pass refresh validation and vice versa.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid token type")]
    InvalidType,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Holds the HMAC signing secret for the lifetime of the process.
pub struct TokenKeys {
    secret: SecretString,
}

impl TokenKeys {
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC accepts any key length")
    }

    /// Sign claims into a compact HS256 JWT.
    ///
    /// # Errors
    ///
    /// Returns an error if the header or claims cannot be JSON encoded.
    pub fn sign(&self, claims: &Claims) -> Result<String, Error> {
        let header_b64 = b64e_json(&Header::hs256())?;
        let claims_b64 = b64e_json(claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac();
        mac.update(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify a compact JWT and return its claims.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the token is malformed or contains invalid base64/json,
    /// - the signature is invalid,
    /// - `typ` does not match `expected_typ`,
    /// - the claims fail validation (`iss`, `exp`).
    pub fn verify(
        &self,
        token: &str,
        expected_typ: &str,
        expected_issuer: &str,
        now_unix_seconds: i64,
    ) -> Result<Claims, Error> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
        if parts.next().is_some() {
            return Err(Error::TokenFormat);
        }

        let header: Header = b64d_json(header_b64)?;
        if header.alg != "HS256" {
            return Err(Error::UnsupportedAlg(header.alg));
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
        let mut mac = self.mac();
        mac.update(format!("{header_b64}.{claims_b64}").as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::InvalidSignature)?;

        let claims: Claims = b64d_json(claims_b64)?;
        if claims.typ != expected_typ {
            return Err(Error::InvalidType);
        }
        if claims.iss != expected_issuer {
            return Err(Error::InvalidIssuer);
        }
        if claims.exp <= now_unix_seconds {
            return Err(Error::Expired);
        }

        Ok(claims)
    }
}

pub fn access_claims(
    account_id: &str,
    email: &str,
    roles: Vec<String>,
    tenant: &str,
    issuer: &str,
    now_unix_seconds: i64,
    ttl_seconds: i64,
) -> Claims {
    Claims {
        sub: account_id.to_string(),
        iss: issuer.to_string(),
        iat: now_unix_seconds,
        exp: now_unix_seconds + ttl_seconds,
        typ: TYP_ACCESS.to_string(),
        sid: None,
        jti: None,
        email: Some(email.to_string()),
        roles,
        tenant: Some(tenant.to_string()),
    }
}

pub fn refresh_claims(
    account_id: &str,
    session_id: &str,
    jti: &str,
    issuer: &str,
    now_unix_seconds: i64,
    ttl_seconds: i64,
) -> Claims {
    Claims {
        sub: account_id.to_string(),
        iss: issuer.to_string(),
        iat: now_unix_seconds,
        exp: now_unix_seconds + ttl_seconds,
        typ: TYP_REFRESH.to_string(),
        sid: Some(session_id.to_string()),
        jti: Some(jti.to_string()),
        email: None,
        roles: Vec::new(),
        tenant: None,
    }
}

pub fn now_unix_seconds() -> i64 {
    i64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs()),
    )
    .unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const ISSUER: &str = "janua";

    fn keys() -> TokenKeys {
        TokenKeys::new(SecretString::from("sixteen-byte-key"))
    }

    #[test]
    fn access_token_round_trip() -> Result<(), Error> {
        let keys = keys();
        let claims = access_claims(
            "account-1",
            "alice@example.com",
            vec!["user".to_string()],
            "default",
            ISSUER,
            NOW,
            900,
        );
        let token = keys.sign(&claims)?;
        let verified = keys.verify(&token, TYP_ACCESS, ISSUER, NOW + 10)?;
        assert_eq!(verified, claims);
        Ok(())
    }

    #[test]
    fn refresh_token_carries_sid_and_jti() -> Result<(), Error> {
        let keys = keys();
        let claims = refresh_claims("account-1", "session-1", "jti-1", ISSUER, NOW, 604_800);
        let token = keys.sign(&claims)?;
        let verified = keys.verify(&token, TYP_REFRESH, ISSUER, NOW)?;
        assert_eq!(verified.sid.as_deref(), Some("session-1"));
        assert_eq!(verified.jti.as_deref(), Some("jti-1"));
        Ok(())
    }

    #[test]
    fn access_token_fails_refresh_validation() -> Result<(), Error> {
        let keys = keys();
        let token = keys.sign(&access_claims(
            "account-1",
            "alice@example.com",
            vec![],
            "default",
            ISSUER,
            NOW,
            900,
        ))?;
        let result = keys.verify(&token, TYP_REFRESH, ISSUER, NOW);
        assert!(matches!(result, Err(Error::InvalidType)));
        Ok(())
    }

    #[test]
    fn rejects_expired_token() -> Result<(), Error> {
        let keys = keys();
        let token = keys.sign(&refresh_claims(
            "account-1",
            "session-1",
            "jti-1",
            ISSUER,
            NOW,
            60,
        ))?;
        let result = keys.verify(&token, TYP_REFRESH, ISSUER, NOW + 61);
        assert!(matches!(result, Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn rejects_wrong_issuer() -> Result<(), Error> {
        let keys = keys();
        let token = keys.sign(&refresh_claims(
            "account-1",
            "session-1",
            "jti-1",
            "other",
            NOW,
            60,
        ))?;
        let result = keys.verify(&token, TYP_REFRESH, ISSUER, NOW);
        assert!(matches!(result, Err(Error::InvalidIssuer)));
        Ok(())
    }

    #[test]
    fn rejects_tampered_signature() -> Result<(), Error> {
        let keys = keys();
        let token = keys.sign(&refresh_claims(
            "account-1",
            "session-1",
            "jti-1",
            ISSUER,
            NOW,
            60,
        ))?;
        let other = TokenKeys::new(SecretString::from("another-signing-key"));
        let result = other.verify(&token, TYP_REFRESH, ISSUER, NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn rejects_malformed_tokens() {
        let keys = keys();
        for garbage in ["", "a", "a.b", "a.b.c.d", "!.!.!"] {
            assert!(keys.verify(garbage, TYP_ACCESS, ISSUER, NOW).is_err());
        }
    }
}
