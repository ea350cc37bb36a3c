//! Backup codes: 10 single-use 8-digit codes, returned once in plaintext and
//! stored Argon2id-hashed with a server-side pepper. A database dump alone is
//! not enough to forge one.

use anyhow::{Result, anyhow};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use uuid::Uuid;

use super::storage::{mark_backup_code_used, unused_backup_codes};
use crate::api::handlers::auth::utils::generate_numeric_code;

pub(super) const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_DIGITS: u32 = 8;

pub(super) fn generate_backup_codes() -> Vec<String> {
    (0..BACKUP_CODE_COUNT)
        .map(|_| generate_numeric_code(BACKUP_CODE_DIGITS))
        .collect()
}

fn peppered<'a>(pepper: &'a SecretString) -> Result<Argon2<'a>> {
    Argon2::new_with_secret(
        pepper.expose_secret().as_bytes(),
        Algorithm::Argon2id,
        Version::V0x13,
        Params::default(),
    )
    .map_err(|error| anyhow!("building peppered hasher: {error}"))
}

pub(super) fn hash_backup_code(code: &str, pepper: &SecretString) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = peppered(pepper)?
        .hash_password(code.as_bytes(), &salt)
        .map_err(|error| anyhow!("hashing backup code: {error}"))?;
    Ok(hash.to_string())
}

fn verify_backup_code(code: &str, stored_hash: &str, pepper: &SecretString) -> bool {
    let Ok(hasher) = peppered(pepper) else {
        return false;
    };
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    hasher.verify_password(code.as_bytes(), &parsed).is_ok()
}

/// Find and burn the matching unused code. Returns `false` when no unused
/// code matches or another request consumed it first.
pub(super) async fn consume_backup_code(
    pool: &PgPool,
    account_id: Uuid,
    code: &str,
    pepper: &SecretString,
) -> Result<bool> {
    // Hashes are salted, so equality lookup is impossible; verify each unused
    // candidate and let the atomic flag settle races.
    let candidates: Vec<(Uuid, String)> = unused_backup_codes(pool, account_id).await?;
    for (code_id, stored_hash) in candidates {
        if verify_backup_code(code, &stored_hash, pepper) {
            return mark_backup_code_used(pool, code_id).await;
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pepper() -> SecretString {
        SecretString::from("test-pepper")
    }

    #[test]
    fn generates_ten_eight_digit_codes() {
        let codes = generate_backup_codes();
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), 8);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_and_verify_round_trip() -> Result<()> {
        let hash = hash_backup_code("12345678", &pepper())?;
        assert!(verify_backup_code("12345678", &hash, &pepper()));
        assert!(!verify_backup_code("87654321", &hash, &pepper()));
        Ok(())
    }

    #[test]
    fn verify_fails_with_wrong_pepper() -> Result<()> {
        let hash = hash_backup_code("12345678", &pepper())?;
        let other = SecretString::from("other-pepper");
        assert!(!verify_backup_code("12345678", &hash, &other));
        Ok(())
    }

    #[test]
    fn hashes_are_salted() -> Result<()> {
        let a = hash_backup_code("12345678", &pepper())?;
        let b = hash_backup_code("12345678", &pepper())?;
        assert_ne!(a, b);
        Ok(())
    }
}
