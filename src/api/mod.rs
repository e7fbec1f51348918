//! HTTP API module - tool calls and session inspection

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::gateway::{ToolCall, ToolGateway};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ToolGateway>,
}

/// Build the API router
pub fn router(gateway: Arc<ToolGateway>) -> Router {
    let state = AppState { gateway };

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
        .route("/tools", post(call_tool))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Root endpoint
async fn root() -> impl IntoResponse {
    Json(RootResponse {
        name: "gmd",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        sessions: state.gateway.sessions().list().await.len(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Run one tool call; failures are reported inside the response body
async fn call_tool(State(state): State<AppState>, Json(call): Json<ToolCall>) -> impl IntoResponse {
    Json(state.gateway.handle(call).await)
}

/// List live sessions
async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.sessions().list().await)
}

/// Full state of one session
async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.gateway.sessions().snapshot(&id).await {
        Some(session) => (StatusCode::OK, Json(session)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no session '{}'", id),
            }),
        )
            .into_response(),
    }
}

/// Drop a session
async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    if state.gateway.sessions().remove(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
