use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

/// Outcome of a password check. `ValidNeedsRehash` means the password
/// matched but the stored hash uses a legacy algorithm variant and should
/// be transparently upgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    ValidNeedsRehash,
    Invalid,
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<Verification> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    if Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_err()
    {
        return Ok(Verification::Invalid);
    }
    if parsed.algorithm != Algorithm::Argon2id.ident() {
        return Ok(Verification::ValidNeedsRehash);
    }
    Ok(Verification::Valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::{Params, Version};

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert_eq!(
            verify_password(password, &hash).expect("verify should succeed"),
            Verification::Valid
        );
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let password = "correct-horse-battery-staple";
        let hash = hash_password(password).expect("hashing should succeed");
        assert_eq!(
            verify_password("wrong-password", &hash).expect("verify should not error"),
            Verification::Invalid
        );
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = verify_password("anything", "not-a-valid-hash").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn legacy_variant_needs_rehash() {
        let password = "legacy-password";
        let salt = SaltString::generate(&mut OsRng);
        let legacy = Argon2::new(Algorithm::Argon2i, Version::V0x13, Params::default());
        let hash = legacy
            .hash_password(password.as_bytes(), &salt)
            .expect("legacy hash")
            .to_string();
        assert_eq!(
            verify_password(password, &hash).expect("verify should succeed"),
            Verification::ValidNeedsRehash
        );
        // A wrong password against a legacy hash is still just invalid.
        assert_eq!(
            verify_password("nope", &hash).expect("verify should not error"),
            Verification::Invalid
        );
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }
}
