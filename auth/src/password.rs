//! bcrypt password hashing.
//!
//! Hashing is CPU bound; the async helpers move it onto the blocking pool.

use crate::error::{AuthError, Result};

/// Hashes and verifies passwords at a fixed bcrypt cost.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Create a hasher with the given cost.
    #[must_use]
    pub const fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash `password`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::PasswordHash`] if bcrypt rejects the input or cost.
    pub fn hash(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.cost).map_err(|e| AuthError::PasswordHash(e.to_string()))
    }

    /// `true` if `password` matches `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::PasswordHash`] if `hash` is not a bcrypt hash.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        bcrypt::verify(password, hash).map_err(|e| AuthError::PasswordHash(e.to_string()))
    }

    /// [`Self::hash`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`Self::hash`], plus [`AuthError::PasswordHash`] if the task is cancelled.
    pub async fn hash_async(&self, password: String) -> Result<String> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::PasswordHash(e.to_string()))?
    }

    /// [`Self::verify`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`Self::verify`], plus [`AuthError::PasswordHash`] if the task is cancelled.
    pub async fn verify_async(&self, password: String, hash: String) -> Result<bool> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::PasswordHash(e.to_string()))?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hashes_verify_only_the_original_password() {
        let hasher = PasswordHasher::new(4);
        let hash = hasher.hash("s3cret!").unwrap();

        assert_ne!(hash, "s3cret!");
        assert!(hasher.verify("s3cret!", &hash).unwrap());
        assert!(!hasher.verify("secret", &hash).unwrap());
    }

    #[test]
    fn garbage_hashes_are_an_error() {
        let hasher = PasswordHasher::new(4);
        assert!(matches!(
            hasher.verify("x", "not-a-hash"),
            Err(AuthError::PasswordHash(_))
        ));
    }

    #[tokio::test]
    async fn async_helpers_agree_with_sync() {
        let hasher = PasswordHasher::new(4);
        let hash = hasher.hash_async("pa55word".to_string()).await.unwrap();
        assert!(hasher.verify_async("pa55word".to_string(), hash).await.unwrap());
    }
}
