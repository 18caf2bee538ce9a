/// Password hashing and verification using Argon2id
///
/// Hashes are PHC strings (algorithm, parameters, salt and digest in one
/// value). The CPU-heavy work runs on tokio's blocking pool behind a
/// semaphore, so at most `HashingConfig::max_concurrent` jobs are in
/// flight and request tasks never block the async runtime.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use vidtube_core::HashingConfig;

const DECOY_PASSWORD: &str = "vidtube-decoy-password";

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,

    #[error("Invalid hashing parameters: {0}")]
    InvalidConfig(String),

    #[error("Hashing worker unavailable: {0}")]
    WorkerUnavailable(String),
}

/// Bounded Argon2id hasher
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    permits: Arc<Semaphore>,
    decoy_hash: String,
}

impl CredentialHasher {
    /// Build a hasher from cost parameters
    ///
    /// Computes the decoy digest used by [`CredentialHasher::verify_dummy`]
    /// up front, so construction costs one hash.
    pub fn new(config: &HashingConfig) -> Result<Self, PasswordError> {
        let params = Params::new(
            config.memory_cost,
            config.time_cost,
            config.parallelism,
            Some(32),
        )
        .map_err(|e| PasswordError::InvalidConfig(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let decoy_hash = hash_with(&argon2, DECOY_PASSWORD)?;

        Ok(Self {
            argon2,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            decoy_hash,
        })
    }

    /// Hash a plaintext password with a fresh random salt
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| PasswordError::WorkerUnavailable(e.to_string()))?;

        let argon2 = self.argon2.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hash_with(&argon2, &password))
            .await
            .map_err(|e| PasswordError::WorkerUnavailable(e.to_string()))?
    }

    /// Check a plaintext password against a stored PHC string
    ///
    /// `Ok(false)` means the password is wrong; a stored value that is not
    /// a valid PHC string is an error.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| PasswordError::WorkerUnavailable(e.to_string()))?;

        let argon2 = self.argon2.clone();
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || verify_with(&argon2, &password, &hash))
            .await
            .map_err(|e| PasswordError::WorkerUnavailable(e.to_string()))?
    }

    /// Spend one verification on the decoy digest and discard the outcome
    pub async fn verify_dummy(&self, password: &str) {
        if let Err(e) = self.verify(password, &self.decoy_hash).await {
            tracing::debug!(error = %e, "Decoy verification failed");
        }
    }

    /// Number of hashing jobs that may start right now
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

fn hash_with(argon2: &Argon2<'_>, password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
}

fn verify_with(argon2: &Argon2<'_>, password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    // Parameters come from the PHC string, so hashes made under older costs still verify
    match argon2.verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}

#[cfg(test)]
pub(crate) fn test_hashing_config() -> HashingConfig {
    HashingConfig {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
        max_concurrent: 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(&test_hashing_config()).unwrap()
    }

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash("SecureP@ssw0rd!").await.unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("SecureP@ssw0rd!", &hash).await.unwrap());
        assert!(!hasher.verify("WrongPassword", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_password_different_hashes() {
        let hasher = hasher();
        let hash1 = hasher.hash("password").await.unwrap();
        let hash2 = hasher.hash("password").await.unwrap();

        // Different salts
        assert_ne!(hash1, hash2);
        assert!(hasher.verify("password", &hash1).await.unwrap());
        assert!(hasher.verify("password", &hash2).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_hash_format() {
        let hasher = hasher();
        let result = hasher.verify("password", "not-a-valid-hash").await;
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat)));
    }

    #[tokio::test]
    async fn test_verify_accepts_hash_from_other_costs() {
        let strong = CredentialHasher::new(&HashingConfig {
            memory_cost: 2048,
            time_cost: 2,
            parallelism: 1,
            max_concurrent: 1,
        })
        .unwrap();
        let hash = strong.hash("password").await.unwrap();

        assert!(hasher().verify("password", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let hasher = Arc::new(hasher());
        assert_eq!(hasher.available_workers(), 2);

        let mut handles = Vec::new();
        for i in 0..6 {
            let hasher = hasher.clone();
            handles.push(tokio::spawn(async move {
                hasher.hash(&format!("password-{i}")).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(hasher.available_workers(), 2);
    }

    #[tokio::test]
    async fn test_verify_dummy_does_not_panic() {
        hasher().verify_dummy("anything").await;
    }

    #[test]
    fn test_invalid_params_rejected() {
        let result = CredentialHasher::new(&HashingConfig {
            memory_cost: 1,
            time_cost: 0,
            parallelism: 1,
            max_concurrent: 1,
        });
        assert!(matches!(result, Err(PasswordError::InvalidConfig(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_hash_verifies_only_its_password(
            password in "\\PC{1,32}",
            other in "\\PC{1,32}",
        ) {
            let argon2 = hasher().argon2;
            let hash = hash_with(&argon2, &password).unwrap();

            prop_assert!(verify_with(&argon2, &password, &hash).unwrap());
            if other != password {
                prop_assert!(!verify_with(&argon2, &other, &hash).unwrap());
            }
        }
    }
}
