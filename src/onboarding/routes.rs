//! HTTP and WebSocket driver for flow sessions.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::FlowError;

use super::command::FlowCommand;
use super::engine::FlowEvent;
use super::model::EntityKind;
use super::session::SessionManager;

/// Shared state for flow routes.
#[derive(Clone)]
pub struct FlowRouteState {
    pub sessions: Arc<SessionManager>,
}

#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    /// "teacher", "student", or "classroom" (plurals accepted).
    pub kind: String,
    #[serde(default)]
    pub context_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    pub text: String,
}

/// `FlowError` as an HTTP response.
pub struct ApiError(FlowError);

impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FlowError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            FlowError::UnknownKind(_) => StatusCode::BAD_REQUEST,
            FlowError::InputDisabled | FlowError::StaleCommand(_) => StatusCode::CONFLICT,
        };
        (status, Json(serde_json::json!({"error": self.0.to_string()}))).into_response()
    }
}

/// POST /api/flows
async fn open_flow(
    State(state): State<FlowRouteState>,
    Json(req): Json<OpenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: EntityKind = req
        .kind
        .parse()
        .map_err(|_| FlowError::UnknownKind(req.kind.clone()))?;
    let opened = state.sessions.open(kind, req.context_id).await;
    Ok((StatusCode::CREATED, Json(opened)))
}

/// GET /api/flows/{id}
async fn get_flow(
    State(state): State<FlowRouteState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.sessions.view(id).await?))
}

/// POST /api/flows/{id}/input
async fn post_input(
    State(state): State<FlowRouteState>,
    Path(id): Path<Uuid>,
    Json(req): Json<InputRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.sessions.input(id, &req.text).await?))
}

/// POST /api/flows/{id}/command
async fn post_command(
    State(state): State<FlowRouteState>,
    Path(id): Path<Uuid>,
    Json(command): Json<FlowCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.sessions.command(id, command).await?))
}

/// DELETE /api/flows/{id}
async fn delete_flow(
    State(state): State<FlowRouteState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.close(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/flows/{id}/ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<Uuid>,
    State(state): State<FlowRouteState>,
) -> Result<Response, ApiError> {
    let rx = state.sessions.subscribe(id).await?;
    info!(session = %id, "Flow WebSocket client connecting");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, id, rx)))
}

async fn handle_socket(
    mut socket: WebSocket,
    id: Uuid,
    mut rx: broadcast::Receiver<FlowEvent>,
) {
    info!(session = %id, "Flow WebSocket client connected");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(WsMessage::Text(json.into())).await.is_err() {
                                debug!(session = %id, "Flow WS client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(session = %id, missed = n, "Flow WS client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(session = %id, "Flow session ended");
                        let _ = socket.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(WsMessage::Ping(data))) => {
                        if socket.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!(session = %id, "Flow WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %id, error = %e, "Flow WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(session = %id, "Flow WebSocket connection closed");
}

/// Build the flow REST + WebSocket routes.
pub fn flow_routes(state: FlowRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/flows", post(open_flow))
        .route("/api/flows/{id}", get(get_flow).delete(delete_flow))
        .route("/api/flows/{id}/input", post(post_input))
        .route("/api/flows/{id}/command", post(post_command))
        .route("/api/flows/{id}/ws", get(ws_handler))
        .with_state(state)
}
