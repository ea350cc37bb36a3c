//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Public projection of an account; never exposes hashes or MFA secrets.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct PublicAccount {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub tenant_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: PublicAccount,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct MfaSetupRequest {
    /// One of `totp` (default), `sms`, `email`.
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// `secret` and `otpauth_url` are present for TOTP enrollment; for `sms` and
/// `email` the verification code travels out of band instead.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaSetupResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otpauth_url: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaEnableRequest {
    pub code: String,
    /// One of `totp`, `sms`, `email`.
    pub channel: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaEnableResponse {
    /// Returned exactly once; the server stores only hashes.
    pub backup_codes: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaVerifyRequest {
    pub challenge: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub backup_code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OAuthUrlResponse {
    pub url: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OAuthCallbackRequest {
    pub code: String,
    pub redirect_uri: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ValidateResetTokenRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeviceResponse {
    pub fingerprint: String,
    pub kind: String,
    pub os: String,
    pub browser: String,
    pub trusted: bool,
    pub score: i32,
    pub blocked: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeviceActionRequest {
    pub fingerprint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn register_request_round_trips() -> Result<()> {
        let request = RegisterRequest {
            email: "alice@example.com".to_string(),
            password: "Secur3!Pass".to_string(),
            name: Some("Alice".to_string()),
        };
        let value = serde_json::to_value(&request)?;
        let email = value
            .get("email")
            .and_then(serde_json::Value::as_str)
            .context("missing email")?;
        assert_eq!(email, "alice@example.com");
        let decoded: RegisterRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.name.as_deref(), Some("Alice"));
        Ok(())
    }

    #[test]
    fn register_request_name_is_optional() -> Result<()> {
        let decoded: RegisterRequest = serde_json::from_str(
            r#"{"email":"bob@example.com","password":"Secur3!Pass"}"#,
        )?;
        assert!(decoded.name.is_none());
        Ok(())
    }

    #[test]
    fn token_response_shape() -> Result<()> {
        let response = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 900,
            user: PublicAccount {
                id: "00000000-0000-0000-0000-000000000000".to_string(),
                email: "alice@example.com".to_string(),
                name: None,
                roles: vec!["user".to_string()],
                tenant_id: "default".to_string(),
            },
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(value["token_type"], "Bearer");
        assert_eq!(value["expires_in"], 900);
        assert_eq!(value["user"]["email"], "alice@example.com");
        Ok(())
    }

    #[test]
    fn mfa_verify_accepts_backup_code_only() -> Result<()> {
        let decoded: MfaVerifyRequest =
            serde_json::from_str(r#"{"challenge":"c","backup_code":"12345678"}"#)?;
        assert!(decoded.code.is_none());
        assert_eq!(decoded.backup_code.as_deref(), Some("12345678"));
        Ok(())
    }
}
