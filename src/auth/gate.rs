//! Request identity resolution.
//!
//! A request proves who it is with exactly one of:
//! - `Authorization: Basic base64(email:password)`
//! - a session token, as `Authorization: Bearer <token>` or `?access_token=<token>`
//!
//! The basic header is tried first; the token is the fallback. Neither
//! present, or neither valid, is a 401.

use super::account::{burn_password_hash, UserAccount};
use crate::error::{RelayError, Result};
use crate::store::{self, CredentialStore};
use axum::http::{header, HeaderMap};
use base64::Engine;
use std::sync::Arc;

/// Email + password pulled from a basic-auth header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub user: String,
    pub password: String,
}

/// Outcome of [`AuthGate::verify`].
#[derive(Debug, Clone)]
pub struct Verification {
    pub exists: bool,
    pub valid: bool,
    pub account: Option<UserAccount>,
}

/// Resolved caller, attached to the request extensions by the middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
}

#[derive(Clone)]
pub struct AuthGate {
    store: Arc<dyn CredentialStore>,
}

impl AuthGate {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Load an account record. A missing record is `None`; a corrupt one is an error.
    pub async fn load_account(&self, email: &str) -> Result<Option<UserAccount>> {
        let Some(raw) = self.store.get(&store::user_key(email)).await? else {
            return Ok(None);
        };
        let account = serde_json::from_str(&raw).map_err(|e| {
            tracing::error!(user = %email, error = %e, "Account record is corrupt");
            RelayError::Serialization(e)
        })?;
        Ok(Some(account))
    }

    /// Check a password. Unknown users are a result, not an error.
    pub async fn verify(&self, user: &str, password: &str) -> Result<Verification> {
        let Some(account) = self.load_account(user).await? else {
            tracing::debug!(user = %user, "No such user");
            burn_password_hash(password).await?;
            return Ok(Verification {
                exists: false,
                valid: false,
                account: None,
            });
        };

        if !account.password.verify(password).await? {
            tracing::debug!(user = %user, "Invalid password");
            return Ok(Verification {
                exists: true,
                valid: false,
                account: None,
            });
        }

        Ok(Verification {
            exists: true,
            valid: true,
            account: Some(account),
        })
    }

    /// Verify and return the account, or a 401.
    pub async fn require_password(&self, user: &str, password: &str) -> Result<UserAccount> {
        match self.verify(user, password).await? {
            Verification {
                valid: true,
                account: Some(account),
                ..
            } => Ok(account),
            _ => Err(RelayError::Auth("invalid user or password".into())),
        }
    }

    /// Resolve a session token. Unknown tokens, dangling user records and
    /// rotated tokens all resolve to `None`.
    pub async fn verify_token(&self, token: &str) -> Result<Option<UserAccount>> {
        let digest = super::account::token_digest(token);
        let Some(email) = self.store.get(&store::token_key(&digest)).await? else {
            return Ok(None);
        };
        let Some(account) = self.load_account(&email).await? else {
            tracing::debug!(user = %email, "Session token points at a missing account");
            return Ok(None);
        };
        if !account.holds_token(token) {
            tracing::debug!(user = %email, "Session token was rotated or cleared");
            return Ok(None);
        }
        Ok(Some(account))
    }

    /// Resolve the caller from basic auth, falling back to the session token.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<Identity> {
        if let Some(creds) = extract_basic(headers) {
            let verification = self.verify(&creds.user, &creds.password).await?;
            if verification.valid {
                return Ok(Identity { email: creds.user });
            }
            tracing::debug!(user = %creds.user, "Basic credentials rejected, trying token");
        }

        if let Some(token) = extract_bearer(headers).or(query_token) {
            if let Some(account) = self.verify_token(token).await? {
                return Ok(Identity {
                    email: account.email,
                });
            }
        }

        Err(RelayError::Auth("missing or invalid credentials".into()))
    }
}

/// Parse `Authorization: Basic ...`. Anything malformed is `None`.
pub fn extract_basic(headers: &HeaderMap) -> Option<BasicCredentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    let user = user.trim();
    if user.is_empty() {
        return None;
    }
    Some(BasicCredentials {
        user: user.to_owned(),
        password: password.to_owned(),
    })
}

/// Extract bearer token from Authorization header.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::store::MemoryStore;
    use axum::http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn basic_header(user: &str, password: &str) -> HeaderValue {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        HeaderValue::from_str(&format!("Basic {encoded}")).unwrap()
    }

    fn setup() -> (AuthGate, Credentials) {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
        (AuthGate::new(store.clone()), Credentials::new(store))
    }

    #[test]
    fn basic_header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(extract_basic(&headers).is_none());

        headers.insert(header::AUTHORIZATION, basic_header("alice@x.com", "p:w"));
        let creds = extract_basic(&headers).unwrap();
        assert_eq!(creds.user, "alice@x.com");
        assert_eq!(creds.password, "p:w");

        headers.insert(header::AUTHORIZATION, basic_header(" alice@x.com ", "pw"));
        assert_eq!(extract_basic(&headers).unwrap().user, "alice@x.com");

        headers.insert(header::AUTHORIZATION, basic_header("  ", "pw"));
        assert!(extract_basic(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert!(extract_basic(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(extract_basic(&headers).is_none());
        assert_eq!(extract_bearer(&headers), Some("abc"));
    }

    #[tokio::test]
    async fn verify_is_tri_state() {
        let (gate, creds) = setup();
        creds.signup("alice@x.com", "pw1").await.unwrap();

        let missing = gate.verify("bob@x.com", "pw1").await.unwrap();
        assert!(!missing.exists && !missing.valid);

        let wrong = gate.verify("alice@x.com", "nope").await.unwrap();
        assert!(wrong.exists && !wrong.valid);
        assert!(wrong.account.is_none());

        let ok = gate.verify("alice@x.com", "pw1").await.unwrap();
        assert!(ok.exists && ok.valid);
        assert_eq!(ok.account.unwrap().email, "alice@x.com");
    }

    #[tokio::test]
    async fn verify_leaves_the_runtime_free() {
        let (gate, creds) = setup();
        creds.signup("alice@x.com", "pw1").await.unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        });

        let before = ticks.load(Ordering::Relaxed);
        let missing = gate.verify("nobody@x.com", "pw").await.unwrap();
        assert!(!missing.exists);
        let after_miss = ticks.load(Ordering::Relaxed);
        assert!(after_miss > before, "sibling task starved during a lookup miss");

        let ok = gate.verify("alice@x.com", "pw1").await.unwrap();
        assert!(ok.valid);
        assert!(
            ticks.load(Ordering::Relaxed) > after_miss,
            "sibling task starved during a password check"
        );

        ticker.abort();
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let backend = Arc::new(MemoryStore::new());
        backend
            .set(&store::user_key("alice@x.com"), "{broken")
            .await
            .unwrap();
        let gate = AuthGate::new(backend);

        let err = gate.verify("alice@x.com", "pw1").await.unwrap_err();
        assert!(matches!(err, RelayError::Serialization(_)));
    }

    #[tokio::test]
    async fn dangling_token_is_invalid() {
        let backend = Arc::new(MemoryStore::new());
        let digest = crate::auth::account::token_digest("t-orphan");
        backend
            .set(&store::token_key(&digest), "ghost@x.com")
            .await
            .unwrap();
        let gate = AuthGate::new(backend);

        assert!(gate.verify_token("t-orphan").await.unwrap().is_none());
        assert!(gate.verify_token("never-issued").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn authenticate_prefers_basic_then_token() {
        let (gate, creds) = setup();
        let issued = creds.signup("alice@x.com", "pw1").await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, basic_header("alice@x.com", "pw1"));
        let id = gate.authenticate(&headers, None).await.unwrap();
        assert_eq!(id.email, "alice@x.com");

        // Bad basic header, good query token.
        headers.insert(header::AUTHORIZATION, basic_header("alice@x.com", "wrong"));
        let id = gate
            .authenticate(&headers, Some(&issued.user_token))
            .await
            .unwrap();
        assert_eq!(id.email, "alice@x.com");

        // Bearer token alone.
        let mut bearer = HeaderMap::new();
        bearer.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", issued.user_token)).unwrap(),
        );
        assert!(gate.authenticate(&bearer, None).await.is_ok());
    }

    #[tokio::test]
    async fn authenticate_rejects_when_both_fail() {
        let (gate, creds) = setup();
        creds.signup("alice@x.com", "pw1").await.unwrap();

        let err = gate.authenticate(&HeaderMap::new(), None).await.unwrap_err();
        assert!(matches!(err, RelayError::Auth(_)));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, basic_header("alice@x.com", "wrong"));
        let err = gate
            .authenticate(&headers, Some("not-a-token"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Auth(_)));
    }
}
