use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use roleplay_core::SessionError;

/// An error returned to HTTP clients as `{"status": "error", "error", "message"}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// A speech service call failed.
    pub fn speech(err: anyhow::Error) -> Self {
        tracing::error!("Speech request failed: {:#}", err);
        Self::new(StatusCode::BAD_GATEWAY, "speech_unavailable", format!("{err:#}"))
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let (status, kind) = match &err {
            SessionError::InvalidRole(_) => (StatusCode::BAD_REQUEST, "invalid_role"),
            SessionError::InvalidScenario(_) => (StatusCode::BAD_REQUEST, "invalid_scenario"),
            SessionError::SameRole(_) => (StatusCode::BAD_REQUEST, "same_role"),
            SessionError::CounterpartRequired(_) => {
                (StatusCode::BAD_REQUEST, "counterpart_required")
            }
            SessionError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            SessionError::NotStarted => (StatusCode::CONFLICT, "not_started"),
            SessionError::InsufficientHistory => (StatusCode::CONFLICT, "insufficient_history"),
            SessionError::MalformedAnalysis(_) => (StatusCode::BAD_GATEWAY, "malformed_analysis"),
            SessionError::AnalysisUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, "analysis_unavailable")
            }
            // Normally recorded as a turn instead of surfacing here.
            SessionError::GeneratorFailure(_) => (StatusCode::BAD_GATEWAY, "generator_failure"),
        };
        Self::new(status, kind, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "status": "error",
            "error": self.kind,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}
