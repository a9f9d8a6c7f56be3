//! Account and application endpoints under `/api/v1`.

use super::AppState;
use crate::auth::gate::extract_basic;
use crate::auth::{AppDetails, BasicCredentials, Identity, SignupResult};
use crate::error::{RelayError, Result};
use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{Json, Response},
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    access_token: Option<String>,
}

/// Resolve the caller from basic auth or a session token and attach the
/// [`Identity`] to the request. Rejects with 401 otherwise.
pub async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let query_token = Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.access_token);

    let identity = state
        .credentials
        .gate()
        .authenticate(request.headers(), query_token.as_deref())
        .await?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

fn require_basic(headers: &HeaderMap) -> Result<BasicCredentials> {
    extract_basic(headers)
        .ok_or_else(|| RelayError::Auth("missing or malformed basic authorization header".into()))
}

/// POST /api/v1/users/signup
pub async fn handle_signup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<SignupResult>)> {
    let creds = require_basic(&headers)?;
    let result = state.credentials.signup(&creds.user, &creds.password).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// POST /api/v1/users/login
pub async fn handle_login(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>> {
    let creds = require_basic(&headers)?;
    let token = state.credentials.login(&creds.user, &creds.password).await?;
    Ok(Json(json!({ "userToken": token })))
}

/// POST /api/v1/users/logout
pub async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>> {
    let creds = require_basic(&headers)?;
    state.credentials.logout(&creds.user, &creds.password).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// POST /api/v1/users/signoff
pub async fn handle_signoff(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>> {
    state.credentials.signoff(&identity.email).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// POST /api/v1/apps/{id}/details
///
/// An account owns exactly one application, so the path id is not consulted.
pub async fn handle_details(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<AppDetails>> {
    Ok(Json(state.credentials.details(&identity.email).await?))
}

/// POST /api/v1/apps/{id}/generate
pub async fn handle_generate(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<(StatusCode, Json<Value>)> {
    let fresh = state.credentials.regenerate(&identity.email).await?;
    let body = json!({ "appKey": fresh.app_key, "appSecret": fresh.app_secret });
    Ok((StatusCode::CREATED, Json(body)))
}
