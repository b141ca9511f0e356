//! Password hashing seam and policy.
//!
//! The algorithm stays behind [`CredentialHasher`]; flows only see
//! opaque hash strings and a verify predicate.

use anyhow::{Result, anyhow};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHash, Version};
use tracing::debug;

const ARGON2_MEMORY_KIB: u32 = 32_768;
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 1;

const DEFAULT_MIN_PASSWORD_LENGTH: usize = 6;

pub trait CredentialHasher: Send + Sync {
    /// Hash a plaintext password with a fresh salt.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing fails.
    fn hash(&self, plaintext: &str) -> Result<String>;

    /// Whether the plaintext matches the stored hash. Malformed hashes
    /// count as a non-match.
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

/// argon2id with fixed cost parameters (32 MiB, 3 iterations).
pub struct Argon2Hasher;

impl Argon2Hasher {
    fn argon2() -> Result<Argon2<'static>> {
        let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_ITERATIONS, ARGON2_PARALLELISM, None)
            .map_err(|err| anyhow!("failed to build argon2 params: {err}"))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Self::argon2()?
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash password: {err}"))?;
        Ok(hash.to_string())
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            debug!("stored password hash is malformed");
            return false;
        };
        let Ok(argon2) = Self::argon2() else {
            return false;
        };
        argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok()
    }
}

/// What a new password must satisfy before it is hashed.
#[derive(Clone, Copy, Debug)]
pub struct PasswordPolicy {
    min_length: usize,
}

impl PasswordPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_length: DEFAULT_MIN_PASSWORD_LENGTH,
        }
    }

    #[must_use]
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length.max(1);
        self
    }

    #[must_use]
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    #[must_use]
    pub fn allows(&self, plaintext: &str) -> bool {
        plaintext.chars().count() >= self.min_length
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new()
    }
}
