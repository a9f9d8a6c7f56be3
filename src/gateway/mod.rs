//! Axum-based HTTP gateway for the relay.
//!
//! - `/api/v1/users/*` and `/api/v1/apps/*`: account and key management
//! - `/proxy/{app_key}/...`: public callback entry point, any method
//! - `/listen`: WebSocket endpoint listeners connect to
//! - `/health`
//!
//! Bodies are size-limited, requests time out, and CORS admits the single
//! configured origin with credentials.

pub mod api;
pub mod listen;

use crate::auth::Credentials;
use crate::config::Config;
use crate::error::{RelayError, Result as RelayResult};
use crate::fanout::FanoutBus;
use crate::proxy::ProxyDispatcher;
use crate::registry::ListenerRegistry;
use crate::store::CredentialStore;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{any, get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub credentials: Credentials,
    pub registry: Arc<ListenerRegistry>,
    pub dispatcher: ProxyDispatcher,
    /// Backend name, reported by `/health`.
    pub store_name: Arc<str>,
}

impl AppState {
    /// Wire the relay around one store. In singleton mode listeners do not
    /// subscribe to the fan-out bus.
    pub fn new(store: Arc<dyn CredentialStore>, singleton: bool) -> Self {
        let store_name: Arc<str> = Arc::from(store.name());
        let credentials = Credentials::new(Arc::clone(&store));
        let fanout = FanoutBus::new(store);
        let registry = Arc::new(if singleton {
            ListenerRegistry::singleton()
        } else {
            ListenerRegistry::clustered(fanout.clone())
        });
        let dispatcher = ProxyDispatcher::new(credentials.clone(), Arc::clone(&registry), fanout);
        Self {
            credentials,
            registry,
            dispatcher,
            store_name,
        }
    }
}

/// Build the full router with middleware.
pub fn build_router(state: AppState, config: &Config) -> Result<Router> {
    let origin: HeaderValue = config
        .origin
        .parse()
        .with_context(|| format!("Invalid CORS origin: {}", config.origin))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let authenticated = Router::new()
        .route("/api/v1/users/signoff", post(api::handle_signoff))
        .route("/api/v1/apps/{app_id}/details", post(api::handle_details))
        .route("/api/v1/apps/{app_id}/generate", post(api::handle_generate))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_identity,
        ));

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/users/signup", post(api::handle_signup))
        .route("/api/v1/users/login", post(api::handle_login))
        .route("/api/v1/users/logout", post(api::handle_logout))
        .merge(authenticated)
        .route("/proxy", any(handle_proxy_missing_key))
        .route("/proxy/", any(handle_proxy_missing_key))
        .route("/proxy/{app_key}", any(handle_proxy_root))
        .route("/proxy/{app_key}/", any(handle_proxy_root))
        .route("/proxy/{app_key}/{*route}", any(handle_proxy))
        .route("/listen", get(listen::handle_listen))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

/// Bind, serve until ctrl-c, then drain.
pub async fn run_gateway(config: &Config, store: Arc<dyn CredentialStore>) -> Result<()> {
    let singleton = config.is_singleton();
    let state = AppState::new(store, singleton);
    let app = build_router(state, config)?;

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        addr = %local_addr,
        store = %config.store_url,
        singleton,
        "Relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c, shutting down");
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health, always public
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "listeners": state.registry.len(),
        "store": &*state.store_name,
        "singleton": state.registry.is_singleton(),
    }))
}

/// ANY /proxy/{app_key}/{*route}
async fn handle_proxy(
    State(state): State<AppState>,
    Path((app_key, route)): Path<(String, String)>,
    method: Method,
    body: Bytes,
) -> RelayResult<impl IntoResponse> {
    dispatch(&state, &method, &app_key, &route, &body).await
}

/// ANY /proxy/{app_key}
async fn handle_proxy_root(
    State(state): State<AppState>,
    Path(app_key): Path<String>,
    method: Method,
    body: Bytes,
) -> RelayResult<impl IntoResponse> {
    dispatch(&state, &method, &app_key, "", &body).await
}

async fn handle_proxy_missing_key() -> RelayError {
    RelayError::Validation("missing application key".into())
}

async fn dispatch(
    state: &AppState,
    method: &Method,
    app_key: &str,
    route: &str,
    body: &[u8],
) -> RelayResult<Json<serde_json::Value>> {
    state
        .dispatcher
        .dispatch(method.as_str(), app_key, route, body)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

// ══════════════════════════════════════════════════════════════════════════════
// TESTS
// ══════════════════════════════════════════════════════════════════════════════
