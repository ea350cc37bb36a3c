//! # Janua (Identity Session & Credential Lifecycle Manager)
//!
//! `janua` turns a login attempt into a trusted, revocable session and
//! protects that session against replay, brute force, and device-based abuse.
//!
//! ## Credentials & Sessions
//!
//! Passwords are Argon2id-hashed and gated by a strength policy. Successful
//! authentication issues a short-lived HS256 access token plus a refresh
//! token tracked server-side in the `sessions` table. The refresh token
//! embeds a non-secret session id for keyed lookup while the database stores
//! only a SHA-256 digest of the raw token; rotation is a single
//! compare-and-swap `UPDATE`, so a given refresh token can be redeemed at
//! most once.
//!
//! ## Brute-force & Device Defenses
//!
//! - **Lockout:** five consecutive failures lock the account for 30 minutes.
//!   The counter is updated with an atomic increment-and-check so racing
//!   failures cannot skip the lock.
//! - **Device trust:** every login is fingerprinted (user-agent + IP + salt)
//!   and scored 0-100; blocked devices are rejected outright and suspicious
//!   ones trigger a login-alert email through the outbox.
//!
//! ## Second Factors & External Identities
//!
//! TOTP (RFC 6238 via `totp-rs`), one-time SMS/email codes, and single-use
//! backup codes are supported as second factors. External identities from a
//! closed set of OAuth providers are reconciled into local accounts, creating
//! one when no account matches the provider email.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
