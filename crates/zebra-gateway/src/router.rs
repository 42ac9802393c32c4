use axum::extract::{Query, Request, State};
use axum::http::{StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::rpc::{self, RpcResponse};
use crate::state::SharedState;
use crate::ws;

/// Build the main application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/status", get(status))
        .route("/api/rpc", post(rpc_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<SharedState>) -> Json<RpcResponse> {
    match rpc::status(&state).await {
        Ok(report) => Json(RpcResponse::ok(rpc::Reply::Status(report))),
        Err(e) => Json(RpcResponse::err(e.to_string())),
    }
}

/// The body is parsed here rather than by `Json` so malformed input still gets
/// the error envelope.
async fn rpc_handler(State(state): State<SharedState>, body: String) -> Json<RpcResponse> {
    Json(rpc::dispatch_text(&state, &body).await)
}

/// Reject requests without the configured API key. The key may arrive as a
/// bearer token or as a `token` query parameter (browsers cannot set headers on
/// WebSocket upgrades).
async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.gateway.api_key.as_deref() else {
        return next.run(request).await;
    };

    let from_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string());

    let authorized = from_header
        .or_else(|| token_param(request.uri()))
        .is_some_and(|given| bool::from(given.as_bytes().ct_eq(expected.as_bytes())));

    if authorized {
        next.run(request).await
    } else {
        warn!("rejected unauthenticated request to {}", request.uri().path());
        (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// The percent-decoded `token` query parameter, if present.
fn token_param(uri: &Uri) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.token)
}
