//! TOTP enrollment and verification.
//!
//! SHA-1, 6 digits, 30 second steps, one step of clock skew in both
//! directions. These are the parameters every mainstream authenticator app
//! ships with.

use anyhow::{Result, anyhow};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Fresh base32 secret for enrollment.
pub(super) fn generate_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

/// Build the verifier for a stored base32 secret. `issuer` and `account` end
/// up in the `otpauth://` enrollment URL.
pub(super) fn build(secret_base32: &str, issuer: &str, account: &str) -> Result<TOTP> {
    let secret = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|error| anyhow!("invalid totp secret: {error:?}"))?;
    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        SKEW,
        STEP_SECONDS,
        secret,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|error| anyhow!("building totp: {error}"))
}

/// Check a code against the current wall clock.
pub(super) fn verify_now(totp: &TOTP, code: &str) -> bool {
    totp.check_current(code).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";
    const T: u64 = 1_700_000_000;

    fn verifier() -> TOTP {
        build(SECRET, "janua", "alice@example.com").expect("totp")
    }

    #[test]
    fn generated_secrets_are_base32_and_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
        );
    }

    #[test]
    fn enrollment_url_names_issuer_and_account() {
        let url = verifier().get_url();
        assert!(url.starts_with("otpauth://totp/"));
        assert!(url.contains("janua"));
        assert!(url.contains("alice%40example.com") || url.contains("alice@example.com"));
    }

    #[test]
    fn accepts_code_within_one_step_of_skew() {
        let totp = verifier();
        let code = totp.generate(T);
        assert!(totp.check(&code, T));
        assert!(totp.check(&code, T + 29));
        assert!(totp.check(&code, T + 30), "one step late is within skew");
        assert!(totp.check(&code, T.saturating_sub(30)), "one step early");
    }

    #[test]
    fn rejects_code_outside_skew_window() {
        let totp = verifier();
        let code = totp.generate(T);
        assert!(!totp.check(&code, T + 90));
    }

    #[test]
    fn rejects_wrong_code() {
        let totp = verifier();
        let code = totp.generate(T);
        let wrong = if code == "000000" { "000001" } else { "000000" };
        assert!(!totp.check(wrong, T));
    }

    #[test]
    fn rejects_garbage_secret() {
        assert!(build("not base32!!", "janua", "alice@example.com").is_err());
    }
}
