//! Accounts, credentials and request authentication.
//!
//! Provides:
//! - Account records with salted, iterated SHA-256 password hashes
//! - AppKey/AppSecret pairs and the KeyHash listeners present on connect
//! - Opaque session tokens, stored only as SHA-256 digests
//! - [`AuthGate`]: basic-auth or session-token identity resolution
//! - [`Credentials`]: signup, login, logout, regenerate, signoff

pub mod account;
pub mod gate;
pub mod lifecycle;

pub use account::{key_hash, AppCredential, UserAccount};
pub use gate::{AuthGate, BasicCredentials, Identity, Verification};
pub use lifecycle::{AppDetails, Credentials, SignupResult};
