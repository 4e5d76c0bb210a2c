//! One-way credential hashing.

use anyhow::{Result, anyhow};
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};

/// Hash + verify capability used by signup (new digest) and signin (verify).
pub trait CredentialHasher: Send + Sync {
    /// Produce a self-describing digest for a plaintext credential.
    ///
    /// # Errors
    /// Returns an error if the hashing primitive fails.
    fn hash(&self, plain: &str) -> Result<String>;

    /// Check a plaintext credential against a stored digest.
    ///
    /// # Errors
    /// Returns an error only when the digest cannot be parsed; a mismatch is `Ok(false)`.
    fn verify(&self, plain: &str, digest: &str) -> Result<bool>;
}

/// Argon2id with fixed cost parameters.
#[derive(Clone, Debug)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            params: Params::default(),
        }
    }

    /// Cheaper parameters for tests.
    ///
    /// # Errors
    /// Returns an error if the parameters are rejected by argon2.
    pub fn with_cost(memory_kib: u32, iterations: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash credential: {err}"))?
            .to_string();
        Ok(digest)
    }

    fn verify(&self, plain: &str, digest: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(digest).map_err(|_| anyhow!("invalid credential digest"))?;
        Ok(self
            .argon2()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Result<Argon2Hasher> {
        Argon2Hasher::with_cost(1024, 1)
    }

    #[test]
    fn hash_then_verify() -> Result<()> {
        let hasher = hasher()?;
        let digest = hasher.hash("p1")?;
        assert!(digest.starts_with("$argon2id$"));
        assert!(hasher.verify("p1", &digest)?);
        assert!(!hasher.verify("p2", &digest)?);
        Ok(())
    }

    #[test]
    fn digests_are_salted() -> Result<()> {
        let hasher = hasher()?;
        assert_ne!(hasher.hash("same")?, hasher.hash("same")?);
        Ok(())
    }

    #[test]
    fn verify_rejects_garbage_digest() -> Result<()> {
        assert!(hasher()?.verify("p1", "not-a-digest").is_err());
        Ok(())
    }
}
