use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use roleplay_core::{AnalysisResult, Assignment, ScenarioSwitch, SessionSnapshot};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A frame sent by the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientAction {
    Message { content: String },
    SwitchRoles,
    SwitchScenario { scenario: String },
    Reset,
    Analyze,
}

/// A frame sent to the client; exactly one per client frame.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Response {
        content: String,
        #[serde(flatten)]
        snapshot: Option<SessionSnapshot>,
    },
    RolesUpdated {
        #[serde(flatten)]
        assignment: Assignment,
    },
    ScenarioUpdated {
        #[serde(flatten)]
        outcome: ScenarioSwitch,
    },
    ConversationReset,
    Analysis {
        feedback: AnalysisResult,
    },
    Error {
        error: &'static str,
        message: String,
    },
}

impl From<ApiError> for ServerFrame {
    fn from(err: ApiError) -> Self {
        ServerFrame::Error {
            error: err.kind,
            message: err.message,
        }
    }
}

/// Upgrades to a WebSocket bound to an existing session.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // Unknown ids are refused before the upgrade.
    state.registry.snapshot(&id).await?;
    info!(session_id = %id, "WebSocket upgrade request received");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, id)))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, id: String) {
    info!(session_id = %id, "WebSocket connection established");

    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                info!("WebSocket error: {}", e);
                break;
            }
        };

        let frame = dispatch(&state, &id, text.as_str()).await;
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode WebSocket frame: {}", e);
                continue;
            }
        };
        if socket.send(Message::Text(payload.into())).await.is_err() {
            // Client disconnected.
            break;
        }
    }

    info!(session_id = %id, "WebSocket connection closed");
}

async fn dispatch(state: &AppState, id: &str, raw: &str) -> ServerFrame {
    let action = match serde_json::from_str::<ClientAction>(raw) {
        Ok(action) => action,
        Err(e) => return ApiError::bad_request(format!("Unrecognised action: {e}")).into(),
    };
    run_action(state, id, action)
        .await
        .unwrap_or_else(ServerFrame::from)
}

async fn run_action(
    state: &AppState,
    id: &str,
    action: ClientAction,
) -> Result<ServerFrame, ApiError> {
    let registry = &state.registry;
    let frame = match action {
        ClientAction::Message { content } => {
            let turn = registry.submit_user_turn(id, &content).await?;
            ServerFrame::Response {
                content: turn.text,
                snapshot: registry.snapshot(id).await?,
            }
        }
        ClientAction::SwitchRoles => ServerFrame::RolesUpdated {
            assignment: registry.switch_roles(id).await?,
        },
        ClientAction::SwitchScenario { scenario } => ServerFrame::ScenarioUpdated {
            outcome: registry.switch_scenario(id, &scenario).await?,
        },
        ClientAction::Reset => {
            registry.reset_conversation(id).await?;
            ServerFrame::ConversationReset
        }
        ClientAction::Analyze => ServerFrame::Analysis {
            feedback: registry.analyze(id).await?,
        },
    };
    Ok(frame)
}
