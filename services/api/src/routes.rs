use crate::error::ApiError;
use crate::state::AppState;
use crate::ws;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use roleplay_core::{
    AnalysisResult, Assignment, Role, Scenario, ScenarioSwitch, SessionError, SessionSnapshot,
    SessionView,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const MAX_AUDIO_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Body of session start and re-init requests. The older `system_role` /
/// `assistant_role` field names are still accepted.
#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    #[serde(alias = "system_role")]
    pub primary_role: String,
    #[serde(default, alias = "assistant_role")]
    pub counterpart_role: Option<String>,
    pub scenario: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioRequest {
    pub scenario: String,
}

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
}

#[derive(Debug, Serialize)]
struct CatalogResponse {
    roles: &'static [Role],
    scenarios: &'static [Scenario],
}

#[derive(Debug, Serialize)]
struct AssignmentResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(flatten)]
    assignment: Assignment,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    status: &'static str,
    response: String,
    #[serde(flatten)]
    snapshot: Option<SessionSnapshot>,
}

#[derive(Debug, Serialize)]
struct ScenarioResponse {
    status: &'static str,
    #[serde(flatten)]
    outcome: ScenarioSwitch,
}

#[derive(Debug, Serialize)]
struct AnalysisResponse {
    status: &'static str,
    feedback: AnalysisResult,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/catalog", get(catalog))
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/init", post(init_session))
        .route("/api/sessions/{id}/messages", post(send_message))
        .route("/api/sessions/{id}/switch-roles", post(switch_roles))
        .route("/api/sessions/{id}/switch-scenario", post(switch_scenario))
        .route("/api/sessions/{id}/reset", post(reset_conversation))
        .route("/api/sessions/{id}/analysis", post(analyze_conversation))
        .route("/api/text-to-speech", post(text_to_speech))
        .route(
            "/api/speech-to-text",
            post(speech_to_text).layer(DefaultBodyLimit::max(MAX_AUDIO_UPLOAD_BYTES)),
        )
        .route("/ws/{id}", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(body)| body)
        .map_err(|e| ApiError::bad_request(format!("Invalid request: {}", e.body_text())))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn catalog(State(state): State<AppState>) -> Json<CatalogResponse> {
    let catalog = state.registry.catalog();
    Json(CatalogResponse {
        roles: catalog.roles(),
        scenarios: catalog.scenarios(),
    })
}

async fn start_session(
    State(state): State<AppState>,
    body: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Json<AssignmentResponse>, ApiError> {
    let req = parse_body(body)?;
    let (id, assignment) = state
        .registry
        .start(
            &req.primary_role,
            req.counterpart_role.as_deref(),
            &req.scenario,
        )
        .await?;

    Ok(Json(AssignmentResponse {
        status: "success",
        session_id: Some(id),
        assignment,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.registry.view(&id).await?))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.registry.remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(SessionError::SessionNotFound(id).into())
    }
}

async fn init_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Json<AssignmentResponse>, ApiError> {
    let req = parse_body(body)?;
    let assignment = state
        .registry
        .init(
            &id,
            &req.primary_role,
            req.counterpart_role.as_deref(),
            &req.scenario,
        )
        .await?;

    Ok(Json(AssignmentResponse {
        status: "success",
        session_id: None,
        assignment,
    }))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let req = parse_body(body)?;
    let turn = state.registry.submit_user_turn(&id, &req.content).await?;
    let snapshot = state.registry.snapshot(&id).await?;

    Ok(Json(MessageResponse {
        status: "success",
        response: turn.text,
        snapshot,
    }))
}

async fn switch_roles(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AssignmentResponse>, ApiError> {
    let assignment = state.registry.switch_roles(&id).await?;

    Ok(Json(AssignmentResponse {
        status: "success",
        session_id: None,
        assignment,
    }))
}

async fn switch_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ScenarioRequest>, JsonRejection>,
) -> Result<Json<ScenarioResponse>, ApiError> {
    let req = parse_body(body)?;
    let outcome = state.registry.switch_scenario(&id, &req.scenario).await?;
    if !outcome.switched {
        tracing::info!(session_id = %id, scenario = %req.scenario, "Scenario switch ignored");
    }

    Ok(Json(ScenarioResponse {
        status: "success",
        outcome,
    }))
}

async fn reset_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.reset_conversation(&id).await?;
    Ok(Json(serde_json::json!({ "status": "success" })))
}

async fn analyze_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let feedback = state.registry.analyze(&id).await?;
    Ok(Json(AnalysisResponse {
        status: "success",
        feedback,
    }))
}

async fn text_to_speech(
    State(state): State<AppState>,
    body: Result<Json<SpeechRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let req = parse_body(body)?;
    if req.text.trim().is_empty() {
        return Err(ApiError::bad_request("Text must not be empty"));
    }

    let audio = state
        .speech
        .text_to_speech(&req.text, req.voice.as_deref())
        .await
        .map_err(ApiError::speech)?;
    let audio = base64::engine::general_purpose::STANDARD.encode(audio);

    Ok(Json(serde_json::json!({ "status": "success", "audio": audio })))
}

async fn speech_to_text(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed reading multipart 'file' field: {e}")))?;
        upload = Some((file_name, bytes));
    }

    let (file_name, bytes) =
        upload.ok_or_else(|| ApiError::bad_request("Missing multipart 'file' field"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("Uploaded audio is empty"));
    }

    let text = state
        .speech
        .speech_to_text(bytes.to_vec(), &file_name)
        .await
        .map_err(ApiError::speech)?;

    Ok(Json(serde_json::json!({ "status": "success", "text": text })))
}
