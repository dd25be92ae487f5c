//! HTTP API module - REST endpoints and WebSocket

mod websocket;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::combat::{ConditionDefinition, ConditionRegistry, EncounterSnapshot};
use crate::config::Config;
use crate::session::SessionManager;
pub use websocket::ServerMessage;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub config: Arc<Config>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
        .route("/api/conditions", get(list_conditions))
        .route("/api/sessions/{id}", get(get_session))
        .route("/ws/{session_id}", get(websocket::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Root endpoint
async fn root() -> impl IntoResponse {
    Json(RootResponse {
        name: "skirmish",
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
        sessions: state.sessions.len().await,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

/// The condition catalog
async fn list_conditions() -> Json<&'static [ConditionDefinition]> {
    Json(ConditionRegistry::global().all())
}

#[derive(Serialize)]
struct SessionResponse {
    id: String,
    created_at: DateTime<Utc>,
    encounter: EncounterSnapshot,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Current state of one session's encounter
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, (StatusCode, Json<ErrorResponse>)> {
    let session = state.sessions.get(&id).await.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("session {} not found", id),
            }),
        )
    })?;

    Ok(Json(SessionResponse {
        id: session.id().to_string(),
        created_at: session.created_at(),
        encounter: session.snapshot().await,
    }))
}
