//! Account records and the hashing helpers behind them.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Token byte length before hex encoding (32 bytes = 64 hex chars).
const TOKEN_BYTES: usize = 32;

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Number of SHA-256 iterations for password stretching.
const HASH_ITERATIONS: u32 = 100_000;

/// The single live AppKey/AppSecret pair of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCredential {
    pub app_key: String,
    pub app_secret: String,
}

impl AppCredential {
    pub fn generate() -> Self {
        let app_key = format!("k-{}", uuid::Uuid::new_v4());
        let app_secret = format!("s-{}", uuid::Uuid::new_v4());
        tracing::debug!(app_key = %app_key, "Generated a new application key");
        Self {
            app_key,
            app_secret,
        }
    }

    /// Reverse-lookup key the listener presents during its handshake.
    pub fn key_hash(&self) -> String {
        key_hash(&self.app_key, &self.app_secret)
    }
}

/// Stored password: iterated, salted SHA-256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordHash {
    pub hash: String,
    pub salt: String,
}

impl PasswordHash {
    pub fn new(password: &str) -> Self {
        let salt = generate_salt();
        Self {
            hash: hash_password(password, &salt),
            salt,
        }
    }

    pub fn matches(&self, password: &str) -> bool {
        let attempt = hash_password(password, &self.salt);
        constant_time_eq(self.hash.as_bytes(), attempt.as_bytes())
    }

    /// [`PasswordHash::new`] on the blocking pool.
    pub async fn create(password: &str) -> Result<Self> {
        let password = password.to_owned();
        run_blocking(move || Self::new(&password)).await
    }

    /// [`PasswordHash::matches`] on the blocking pool.
    pub async fn verify(&self, password: &str) -> Result<bool> {
        let stored = self.clone();
        let password = password.to_owned();
        run_blocking(move || stored.matches(&password)).await
    }
}

/// Account record stored under `user:{email}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub email: String,
    pub password: PasswordHash,
    pub credential: AppCredential,
    /// SHA-256 digest of the current session token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token_digest: Option<String>,
}

impl UserAccount {
    pub fn new(email: &str, password: PasswordHash) -> Self {
        Self {
            email: email.to_owned(),
            password,
            credential: AppCredential::generate(),
            session_token_digest: None,
        }
    }

    /// Whether `token` is this account's current session token.
    pub fn holds_token(&self, token: &str) -> bool {
        self.session_token_digest
            .as_deref()
            .is_some_and(|digest| constant_time_eq(digest.as_bytes(), token_digest(token).as_bytes()))
    }
}

/// Hash of AppKey followed by AppSecret (hex SHA-256). Listeners derive the
/// same value client-side.
pub fn key_hash(app_key: &str, app_secret: &str) -> String {
    let mut h = Sha256::new();
    h.update(app_key.as_bytes());
    h.update(app_secret.as_bytes());
    hex::encode(h.finalize())
}

/// Generate a random session token (hex-encoded).
pub fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    hex::encode(bytes)
}

/// Hash a session token (SHA-256, single pass).
pub fn token_digest(token: &str) -> String {
    let mut h = Sha256::new();
    h.update(token.as_bytes());
    hex::encode(h.finalize())
}

fn generate_salt() -> String {
    let bytes: [u8; SALT_BYTES] = rand::random();
    hex::encode(bytes)
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(password.as_bytes());
    let mut result = hash.finalize();

    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

/// Run the password hash against a throwaway salt so a lookup miss costs the
/// same as a wrong password.
pub(crate) async fn burn_password_hash(password: &str) -> Result<()> {
    let password = password.to_owned();
    run_blocking(move || {
        let _ = hash_password(&password, "0000000000000000");
    })
    .await
}

/// Password stretching is CPU-bound; keep it off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RelayError::Internal(format!("password hashing task failed: {e}")))
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_credentials_are_prefixed_and_unique() {
        let a = AppCredential::generate();
        let b = AppCredential::generate();
        assert!(a.app_key.starts_with("k-"));
        assert!(a.app_secret.starts_with("s-"));
        assert_ne!(a.app_key, b.app_key);
        assert_ne!(a.app_secret, b.app_secret);
    }

    #[test]
    fn key_hash_is_sha256_of_concatenation() {
        let cred = AppCredential {
            app_key: "k-ABC".into(),
            app_secret: "s-123".into(),
        };
        let expected = hex::encode(Sha256::digest(b"k-ABCs-123"));
        assert_eq!(cred.key_hash(), expected);
        assert_eq!(cred.key_hash().len(), 64);
    }

    #[test]
    fn password_hash_matches_only_original() {
        let stored = PasswordHash::new("pw1");
        assert!(stored.matches("pw1"));
        assert!(!stored.matches("pw2"));
    }

    #[tokio::test]
    async fn blocking_pool_variants_agree() {
        let stored = PasswordHash::create("pw1").await.unwrap();
        assert!(stored.verify("pw1").await.unwrap());
        assert!(!stored.verify("pw2").await.unwrap());
        assert!(stored.matches("pw1"));
    }

    #[test]
    fn password_hash_differs_with_different_salt() {
        let h1 = hash_password("test_password", "salt_a");
        let h2 = hash_password("test_password", "salt_b");
        assert_ne!(h1, h2);
        assert_eq!(h1, hash_password("test_password", "salt_a"));
    }

    #[test]
    fn token_ownership_uses_digest() {
        let mut account = UserAccount::new("alice@x.com", PasswordHash::new("pw1"));
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(!account.holds_token(&token));

        account.session_token_digest = Some(token_digest(&token));
        assert!(account.holds_token(&token));
        assert!(!account.holds_token(&generate_token()));
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
