//! Account lifecycle: signup, login, logout, key regeneration and signoff.
//!
//! Reverse lookups (`appkey:`, `keyhash:`, `token:`) exist only while the
//! credential they point from is current. Multi-key updates are not
//! transactional: a store failure midway leaves partial state and is
//! reported to the caller, never retried here.

use super::account::{
    constant_time_eq, generate_token, token_digest, AppCredential, PasswordHash, UserAccount,
};
use super::gate::AuthGate;
use crate::error::{RelayError, Result};
use crate::store::{self, CredentialStore};
use serde::Serialize;
use std::sync::Arc;

/// Returned once, on signup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResult {
    pub app_key: String,
    pub app_secret: String,
    pub user_token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDetails {
    pub email: String,
    pub app_key: String,
    pub app_secret: String,
}

#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn CredentialStore>,
    gate: AuthGate,
}

impl Credentials {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let gate = AuthGate::new(Arc::clone(&store));
        Self { store, gate }
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    async fn save_account(&self, account: &UserAccount) -> Result<()> {
        let raw = serde_json::to_string(account)?;
        self.store.set(&store::user_key(&account.email), &raw).await
    }

    async fn require_account(&self, email: &str) -> Result<UserAccount> {
        self.gate
            .load_account(email)
            .await?
            .ok_or_else(|| RelayError::Auth(format!("account {email} no longer exists")))
    }

    /// Create an account with a fresh AppKey/AppSecret pair and session token.
    pub async fn signup(&self, user: &str, password: &str) -> Result<SignupResult> {
        let user = user.trim();
        if user.is_empty() {
            return Err(RelayError::Validation("user cannot be empty".into()));
        }
        if password.is_empty() {
            return Err(RelayError::Validation("password cannot be empty".into()));
        }

        if self.gate.load_account(user).await?.is_some() {
            return Err(RelayError::Conflict(format!("user {user} already exists")));
        }

        let mut account = UserAccount::new(user, PasswordHash::create(password).await?);
        let token = generate_token();
        let digest = token_digest(&token);
        account.session_token_digest = Some(digest.clone());

        let credential = account.credential.clone();
        let key_hash = credential.key_hash();

        // Create-only: a concurrent signup for the same user loses here,
        // before any reverse entry of its own is written.
        let raw = serde_json::to_string(&account)?;
        if !self.store.create(&store::user_key(user), &raw).await? {
            return Err(RelayError::Conflict(format!("user {user} already exists")));
        }
        self.store
            .set(&store::app_key_key(&credential.app_key), user)
            .await?;
        self.store.set(&store::key_hash_key(&key_hash), user).await?;
        self.store.set(&store::token_key(&digest), user).await?;

        tracing::info!(user = %user, app_key = %credential.app_key, "Account created");

        Ok(SignupResult {
            app_key: credential.app_key,
            app_secret: credential.app_secret,
            user_token: token,
        })
    }

    /// Issue a new session token. The previous one stops validating; its
    /// reverse entry is left behind.
    pub async fn login(&self, user: &str, password: &str) -> Result<String> {
        let mut account = self.gate.require_password(user, password).await?;

        let token = generate_token();
        let digest = token_digest(&token);
        account.session_token_digest = Some(digest.clone());

        self.save_account(&account).await?;
        self.store
            .set(&store::token_key(&digest), &account.email)
            .await?;

        tracing::debug!(user = %account.email, "Session token issued");
        Ok(token)
    }

    /// Clear the session token and its reverse entry. Credentials and reverse
    /// key lookups stay.
    pub async fn logout(&self, user: &str, password: &str) -> Result<()> {
        let mut account = self.gate.require_password(user, password).await?;

        if let Some(digest) = account.session_token_digest.take() {
            self.save_account(&account).await?;
            self.store.del(&[store::token_key(&digest)]).await?;
        }

        tracing::debug!(user = %account.email, "Session token cleared");
        Ok(())
    }

    /// Replace the AppKey/AppSecret pair. All three old reverse lookups are
    /// removed before the new ones are written, so the session token is
    /// retired along with the pair.
    pub async fn regenerate(&self, user: &str) -> Result<AppCredential> {
        let mut account = self.require_account(user).await?;

        let old = account.credential.clone();
        let mut stale = vec![
            store::app_key_key(&old.app_key),
            store::key_hash_key(&old.key_hash()),
        ];
        if let Some(digest) = account.session_token_digest.take() {
            stale.push(store::token_key(&digest));
        }
        self.store.del(&stale).await?;

        let fresh = AppCredential::generate();
        account.credential = fresh.clone();
        self.save_account(&account).await?;
        self.store
            .set(&store::app_key_key(&fresh.app_key), &account.email)
            .await?;
        self.store
            .set(&store::key_hash_key(&fresh.key_hash()), &account.email)
            .await?;

        tracing::info!(
            user = %account.email,
            old_app_key = %old.app_key,
            app_key = %fresh.app_key,
            "Application key regenerated"
        );
        Ok(fresh)
    }

    /// Delete the account and every reverse lookup in a single `del`.
    pub async fn signoff(&self, user: &str) -> Result<()> {
        let account = self.require_account(user).await?;

        let mut keys = vec![
            store::user_key(&account.email),
            store::app_key_key(&account.credential.app_key),
            store::key_hash_key(&account.credential.key_hash()),
        ];
        if let Some(digest) = &account.session_token_digest {
            keys.push(store::token_key(digest));
        }

        self.store.del(&keys).await.map_err(|e| {
            tracing::error!(user = %account.email, error = %e, "Signoff failed midway; account may be partially deleted");
            e
        })?;

        tracing::info!(user = %account.email, "Account deleted");
        Ok(())
    }

    pub async fn details(&self, user: &str) -> Result<AppDetails> {
        let account = self.require_account(user).await?;
        Ok(AppDetails {
            email: account.email,
            app_key: account.credential.app_key,
            app_secret: account.credential.app_secret,
        })
    }

    /// Owner of an AppKey, if the key is the owner's current one. A reverse
    /// entry left behind by a lost race or an interrupted rotation is `None`.
    pub async fn resolve_app_key(&self, app_key: &str) -> Result<Option<String>> {
        let Some(email) = self.store.get(&store::app_key_key(app_key)).await? else {
            return Ok(None);
        };
        let Some(account) = self.gate.load_account(&email).await? else {
            tracing::debug!(user = %email, "Application key points at a missing account");
            return Ok(None);
        };
        if account.credential.app_key != app_key {
            tracing::warn!(user = %email, app_key = %app_key, "Application key is no longer current");
            return Ok(None);
        }
        Ok(Some(email))
    }

    /// Listener handshake: map a presented KeyHash back to the account's
    /// current credential. Rotated pairs are rejected.
    pub async fn resolve_listener(&self, key_hash: &str) -> Result<AppCredential> {
        let Some(email) = self.store.get(&store::key_hash_key(key_hash)).await? else {
            return Err(RelayError::Auth("unknown access token".into()));
        };
        let account = self.require_account(&email).await?;

        let current = account.credential;
        if !constant_time_eq(current.key_hash().as_bytes(), key_hash.as_bytes()) {
            tracing::warn!(user = %email, "Listener presented a rotated credential");
            return Err(RelayError::Auth("stale access token".into()));
        }
        Ok(current)
    }
}
