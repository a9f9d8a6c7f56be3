//! callmydouble: a webhook/callback relay.
//!
//! Public callers hit `/proxy/{app_key}/...` on the relay; the listener that
//! owns the AppKey holds an outbound WebSocket to the relay and receives each
//! call as a `callback` event. Listeners on other relay instances are reached
//! through the fan-out bus carried by the shared store.

pub mod auth;
pub mod config;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod listener;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod store;

pub use config::Config;
pub use error::{RelayError, Result};
