use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use updater_domain::JobState;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    /// Set on 409 responses: the competing job's identity.
    pub conflict: Option<(String, JobState)>,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into(), conflict: None }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
            conflict: None,
        }
    }

    pub fn conflict(job_id: String, state: JobState) -> Self {
        ApiError {
            status: StatusCode::CONFLICT,
            message: format!(
                "an upgrade job is already active: {} ({}); wait for it to finish",
                job_id, state
            ),
            conflict: Some((job_id, state)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self.conflict {
            Some((job_id, state)) => json!({
                "error": "upgrade already in progress",
                "jobId": job_id,
                "state": state,
                "message": self.message,
            }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<updater_store::StoreError> for ApiError {
    fn from(e: updater_store::StoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}
