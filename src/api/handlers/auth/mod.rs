//! Authentication core: credential verification, session lifecycle, lockout,
//! device trust, MFA, and OAuth identity linking.
//!
//! ## Session model
//!
//! Refresh tokens are signed HS256 JWTs that embed a non-secret session id
//! (`sid`) used for keyed lookup and a random `jti` acting as the secret
//! portion. The database stores only a SHA-256 digest of the raw token, so a
//! leaked `sessions` table cannot be replayed. Rotation swaps the digest with
//! a compare-and-swap `UPDATE`; the predecessor token dies immediately.
//!
//! ## Brute force
//!
//! Failed logins bump a per-account counter with an atomic
//! increment-and-check; the fifth consecutive failure locks the account for
//! 30 minutes. Device fingerprints gate logins from blocked devices and flag
//! suspicious ones for a login-alert email.

pub(crate) mod device;
pub(crate) mod error;
#[cfg(test)]
mod integration_tests;
pub(crate) mod jwt;
pub(crate) mod lockout;
pub(crate) mod login;
pub(crate) mod mfa;
pub mod oauth;
pub(crate) mod password;
pub(crate) mod principal;
pub(crate) mod refresh;
pub(crate) mod register;
pub(crate) mod reset;
pub(crate) mod session;
mod state;
mod storage;
pub(crate) mod types;
mod utils;

pub use state::{AuthConfig, AuthState};
