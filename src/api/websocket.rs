//! WebSocket handler for live combat sessions
//!
//! Each connection joins one session. Inbound text frames are JSON actions;
//! a per-connection worker applies them one at a time and its combat events
//! flow back through a channel drained by the socket loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::AppState;
use crate::combat::{CombatEvent, SecureDice};
use crate::session::{Action, Session};

/// Connection-level messages sent from server to client. Combat events are
/// sent alongside these, tagged with their own `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Welcome message on connect
    #[serde(rename = "welcome")]
    Welcome {
        session_id: String,
        connection_id: String,
    },
    /// Error message
    #[serde(rename = "error")]
    Error { message: String },
}

/// Handle WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Handle an individual WebSocket connection
async fn handle_socket(mut socket: WebSocket, state: AppState, session_id: String) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let session = state.sessions.get_or_create(&session_id).await;
    info!("WebSocket connected: {} (session {})", connection_id, session_id);

    let buffer = state.config.event_buffer.max(1);
    let (event_tx, mut event_rx) = mpsc::channel::<CombatEvent>(buffer);
    let (action_tx, action_rx) = mpsc::channel::<Action>(buffer);
    let worker = tokio::spawn(run_actions(session, action_rx, event_tx));

    let welcome = ServerMessage::Welcome {
        session_id: session_id.clone(),
        connection_id: connection_id.clone(),
    };
    send_json(&mut socket, &welcome).await;

    let interval = Duration::from_millis(state.config.action_interval_ms);
    let mut last_action: Option<Instant> = None;

    // Main loop: handle incoming actions and outgoing events
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                if !send_json(&mut socket, &event).await {
                    break;
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        let reply = accept_action(&text, &action_tx, interval, &mut last_action);
                        if let Some(message) = reply {
                            if !send_json(&mut socket, &message).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    // Closing both queues stops the worker once its current action is done
    drop(action_tx);
    drop(event_rx);
    if let Err(e) = worker.await {
        warn!("action worker for {} failed: {}", connection_id, e);
    }
    info!("WebSocket disconnected: {}", connection_id);
}

/// Parse, rate limit and queue one inbound action. Returns the error to
/// report, if any.
fn accept_action(
    text: &str,
    actions: &mpsc::Sender<Action>,
    interval: Duration,
    last_action: &mut Option<Instant>,
) -> Option<ServerMessage> {
    let now = Instant::now();
    if let Some(last) = *last_action {
        if now.duration_since(last) < interval {
            debug!("rate limited action");
            return Some(error("rate limit exceeded"));
        }
    }

    let action = match serde_json::from_str::<Action>(text) {
        Ok(action) => action,
        Err(e) => return Some(error(&format!("invalid action: {}", e))),
    };

    match actions.try_send(action) {
        Ok(()) => {
            *last_action = Some(now);
            None
        }
        Err(mpsc::error::TrySendError::Full(_)) => Some(error("too many pending actions")),
        Err(mpsc::error::TrySendError::Closed(_)) => Some(error("session unavailable")),
    }
}

/// Apply queued actions in order until the connection goes away
async fn run_actions(
    session: Arc<Session>,
    mut actions: mpsc::Receiver<Action>,
    events: mpsc::Sender<CombatEvent>,
) {
    let mut dice = SecureDice;
    while let Some(action) = actions.recv().await {
        match session.apply(action, &mut dice, &events).await {
            Ok(Some(outcome)) => {
                debug!("session {}: auto-play ended with {:?}", session.id(), outcome)
            }
            Ok(None) => {}
            Err(e) => {
                debug!("session {}: rejected action: {}", session.id(), e);
                let rejected = CombatEvent::ActionRejected {
                    reason: e.to_string(),
                };
                if events.send(rejected).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn error(message: &str) -> ServerMessage {
    ServerMessage::Error {
        message: message.to_string(),
    }
}

/// Send a JSON text frame; false once the socket is gone
async fn send_json<T: Serialize>(socket: &mut WebSocket, message: &T) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("failed to serialize message: {}", e);
            true
        }
    }
}
