use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::EngineError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub api_token: String,
    pub cancel: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/query", post(query_handler))
        .with_state(state)
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn status_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authenticate(&state.api_token, &headers) {
        return unauthorized();
    }
    Json(state.engine.status().await).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    plates: Vec<String>,
    #[serde(default)]
    force_refresh: bool,
}

async fn query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<QueryRequest>>,
) -> Response {
    if !authenticate(&state.api_token, &headers) {
        return unauthorized();
    }
    let request = body.map(|Json(r)| r).unwrap_or_default();
    info!(plates = request.plates.len(), force_refresh = request.force_refresh, "on-demand cycle requested");

    let filter = (!request.plates.is_empty()).then_some(request.plates.as_slice());
    match state.engine.run_cycle(filter, request.force_refresh, &state.cancel).await {
        Ok(report) => Json(report).into_response(),
        Err(e @ EngineError::CycleInProgress) => error_response(StatusCode::CONFLICT, &e),
        Err(e @ EngineError::UnknownPlates(_)) => error_response(StatusCode::BAD_REQUEST, &e),
        Err(e @ EngineError::EmptyConfiguration) => {
            warn!(error = %e, "on-demand cycle aborted");
            error_response(StatusCode::UNPROCESSABLE_ENTITY, &e)
        }
    }
}

fn error_response(status: StatusCode, error: &EngineError) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer realm=\"jjz-alert\"")],
        "Unauthorized",
    )
        .into_response()
}

fn authenticate(api_token: &str, headers: &HeaderMap) -> bool {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION)
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
        && constant_time_eq(token.trim(), api_token)
    {
        debug!("authenticated via bearer token");
        return true;
    }
    false
}

/// Constant-time string comparison for token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_must_match() {
        assert!(authenticate("s3cret", &headers("Bearer s3cret")));
        assert!(!authenticate("s3cret", &headers("Bearer s3cre")));
        assert!(!authenticate("s3cret", &headers("Basic s3cret")));
        assert!(!authenticate("s3cret", &HeaderMap::new()));
    }

    #[test]
    fn query_request_defaults() {
        let request: QueryRequest = serde_json::from_str("{}").unwrap();
        assert!(request.plates.is_empty());
        assert!(!request.force_refresh);

        let request: QueryRequest = serde_json::from_str(r#"{"plates":["京A12345"],"force_refresh":true}"#).unwrap();
        assert_eq!(request.plates, vec!["京A12345".to_string()]);
        assert!(request.force_refresh);
    }
}
