//! bcrypt password hashing.
//!
//! bcrypt is CPU bound, so both operations run on the blocking thread pool to
//! keep the async workers free for I/O.

use anyhow::{Context, Result};

pub const DEFAULT_BCRYPT_COST: u32 = 10;
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

#[derive(Clone, Copy, Debug)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Cost is clamped to the range bcrypt accepts.
    #[must_use]
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_BCRYPT_COST, MAX_BCRYPT_COST),
        }
    }

    #[must_use]
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a plaintext password with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error only if the blocking task panics or bcrypt rejects the input.
    pub async fn hash(&self, plaintext: &str) -> Result<String> {
        let cost = self.cost;
        let plaintext = plaintext.to_owned();
        tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, cost))
            .await
            .context("password hashing task failed")?
            .context("failed to hash password")
    }

    /// Verify a plaintext password against a stored digest.
    ///
    /// Malformed digests verify as `false`.
    pub async fn verify(&self, plaintext: &str, digest: &str) -> bool {
        let plaintext = plaintext.to_owned();
        let digest = digest.to_owned();
        tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &digest).unwrap_or(false))
            .await
            .unwrap_or(false)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}
