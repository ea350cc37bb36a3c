//! Password hashing and strength policy.
//!
//! Hashes are Argon2id in PHC string format; verification parses the stored
//! string so parameter upgrades only affect new hashes.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

const MIN_LENGTH: usize = 8;
const MAX_LENGTH: usize = 128;

/// Passwords that appear on every breached-credential list.
const DENY_LIST: &[&str] = &[
    "password",
    "password1",
    "12345678",
    "123456789",
    "qwerty123",
    "letmein123",
    "iloveyou1",
    "admin123",
    "welcome1",
    "monkey123",
];

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|error| anyhow!("hashing password: {error}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        tracing::error!("stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Validates strength before hashing. The returned message names the first
/// violated rule so callers can surface it directly.
pub fn check_policy(password: &str) -> Result<(), &'static str> {
    let length = password.chars().count();
    if length < MIN_LENGTH {
        return Err("must be at least 8 characters");
    }
    if length > MAX_LENGTH {
        return Err("must be at most 128 characters");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err("must contain an uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err("must contain a lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("must contain a digit");
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        return Err("must contain a symbol");
    }
    let lowered = password.to_lowercase();
    if DENY_LIST.iter().any(|banned| lowered.contains(banned)) {
        return Err("is too common");
    }
    if has_repeated_run(password) {
        return Err("must not repeat the same character three times in a row");
    }
    Ok(())
}

/// Three or more identical characters in a row.
fn has_repeated_run(password: &str) -> bool {
    let mut run = 1;
    let mut previous = None;
    for c in password.chars() {
        if Some(c) == previous {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            run = 1;
            previous = Some(c);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() -> anyhow::Result<()> {
        let hash = hash_password("Secur3!Pass")?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Secur3!Pass", &hash));
        assert!(!verify_password("Secur3!Pas", &hash));
        Ok(())
    }

    #[test]
    fn hashes_are_salted() -> anyhow::Result<()> {
        let a = hash_password("Secur3!Pass")?;
        let b = hash_password("Secur3!Pass")?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn verify_rejects_garbage_stored_hash() {
        assert!(!verify_password("Secur3!Pass", "not-a-phc-string"));
    }

    #[test]
    fn policy_enforces_length() {
        assert_eq!(check_policy("Ab1!x"), Err("must be at least 8 characters"));
        let long = format!("Ab1!{}", "x".repeat(130));
        assert_eq!(check_policy(&long), Err("must be at most 128 characters"));
    }

    #[test]
    fn policy_enforces_character_classes() {
        assert_eq!(
            check_policy("secur3!pass"),
            Err("must contain an uppercase letter")
        );
        assert_eq!(
            check_policy("SECUR3!PASS"),
            Err("must contain a lowercase letter")
        );
        assert_eq!(check_policy("Secure!Pass"), Err("must contain a digit"));
        assert_eq!(check_policy("Secur3Pass"), Err("must contain a symbol"));
    }

    #[test]
    fn policy_rejects_common_passwords() {
        assert_eq!(check_policy("Password1!"), Err("is too common"));
        assert_eq!(check_policy("myQwerty123!"), Err("is too common"));
    }

    #[test]
    fn policy_rejects_repeated_runs() {
        assert_eq!(
            check_policy("Secur3!Paaas"),
            Err("must not repeat the same character three times in a row")
        );
        assert!(check_policy("Secur3!Paas").is_ok());
    }

    #[test]
    fn policy_accepts_strong_passwords() {
        assert!(check_policy("Secur3!Pass").is_ok());
        assert!(check_policy("Tr0ub4dor&3").is_ok());
    }
}
