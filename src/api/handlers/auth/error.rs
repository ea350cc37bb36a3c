//! Error taxonomy for the authentication core.
//!
//! Security-sensitive failures (bad credentials, invalid tokens) are
//! deliberately vague externally and logged with full context internally.
//! Validation errors carry enough detail for the caller to fix the input.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email or wrong password: always the same external message to
    /// avoid account enumeration.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account locked")]
    AccountLocked { retry_after_seconds: i64 },
    #[error("device blocked")]
    DeviceBlocked,
    /// Password was correct but a second factor is required; the caller
    /// completes login via the MFA verify endpoint using `challenge`.
    #[error("multi-factor verification required")]
    MfaRequired { challenge: String },
    #[error("invalid MFA code")]
    InvalidMfaCode,
    /// Covers malformed, expired, and revoked refresh/reset tokens uniformly.
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("email already registered")]
    DuplicateEmail,
    #[error("weak password: {0}")]
    WeakPassword(&'static str),
    #[error("unsupported OAuth provider")]
    UnsupportedOAuthProvider,
    #[error("OAuth exchange failed")]
    OAuthExchangeFailed,
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::DeviceBlocked => "DEVICE_BLOCKED",
            Self::MfaRequired { .. } => "MFA_REQUIRED",
            Self::InvalidMfaCode => "INVALID_MFA_CODE",
            Self::InvalidOrExpiredToken => "INVALID_OR_EXPIRED_TOKEN",
            Self::DuplicateEmail => "DUPLICATE_EMAIL",
            Self::WeakPassword(_) => "WEAK_PASSWORD",
            Self::UnsupportedOAuthProvider => "UNSUPPORTED_OAUTH_PROVIDER",
            Self::OAuthExchangeFailed => "OAUTH_EXCHANGE_FAILED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::InvalidMfaCode
            | Self::InvalidOrExpiredToken
            | Self::MfaRequired { .. }
            | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::AccountLocked { .. } => StatusCode::LOCKED,
            Self::DeviceBlocked => StatusCode::FORBIDDEN,
            Self::DuplicateEmail => StatusCode::CONFLICT,
            Self::WeakPassword(_) | Self::UnsupportedOAuthProvider | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::OAuthExchangeFailed => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Internal(ref err) = self {
            tracing::error!(error = %err, kind = "INTERNAL", "internal error");
        }
        let mut body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        match &self {
            Self::AccountLocked {
                retry_after_seconds,
            } => {
                body["retry_after_seconds"] = serde_json::json!(retry_after_seconds);
            }
            Self::MfaRequired { challenge } => {
                body["challenge"] = serde_json::json!(challenge);
            }
            _ => {}
        }
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn response_json(error: AuthError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).expect("json body");
        (status, json)
    }

    #[tokio::test]
    async fn invalid_credentials_is_vague_401() {
        let (status, json) = response_json(AuthError::InvalidCredentials).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["kind"], "INVALID_CREDENTIALS");
        assert_eq!(json["message"], "invalid credentials");
    }

    #[tokio::test]
    async fn account_locked_reports_remaining_duration() {
        let (status, json) = response_json(AuthError::AccountLocked {
            retry_after_seconds: 1234,
        })
        .await;
        assert_eq!(status, StatusCode::LOCKED);
        assert_eq!(json["retry_after_seconds"], 1234);
    }

    #[tokio::test]
    async fn mfa_required_carries_challenge() {
        let (status, json) = response_json(AuthError::MfaRequired {
            challenge: "challenge-token".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["challenge"], "challenge-token");
    }

    #[tokio::test]
    async fn weak_password_names_the_rule() {
        let (status, json) =
            response_json(AuthError::WeakPassword("must contain an uppercase letter")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            json["message"],
            "weak password: must contain an uppercase letter"
        );
    }

    #[tokio::test]
    async fn internal_error_hides_details() {
        let (status, json) = response_json(AuthError::Internal(anyhow::anyhow!("db down"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["message"], "internal error");
    }

    #[tokio::test]
    async fn token_errors_are_uniform() {
        let (status, json) = response_json(AuthError::InvalidOrExpiredToken).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["kind"], "INVALID_OR_EXPIRED_TOKEN");
    }
}
