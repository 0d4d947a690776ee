use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use updater_domain::{EventStatus, EventType, JobState, UpgradeJob, UpgradeMode};
use updater_orchestrator::{
    effective_mode, render_playbook, PlanRequest, PlaybookContext, RunnerError,
};
use updater_store::{EventFilter, StateStore};

use crate::error::ApiError;
use crate::state::AppState;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── Job status ────────────────────────────────────────────────────────────────

pub async fn upgrade_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let Some(job) = state.store.load_job().await? else {
        return Ok(Json(json!({ "message": "no upgrade job has run yet" })));
    };

    let mut body = json!(job);
    if job.state == JobState::Failed {
        if let Some(code) = job.failure_code {
            let playbook = render_playbook(code, &playbook_context(&state, &job));
            body["recoveryPlaybook"] = json!(playbook);
        }
    }
    Ok(Json(body))
}

pub async fn upgrade_last(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.store.load_job().await? {
        Some(job) => Ok(Json(json!(job))),
        None => Ok(Json(json!({ "message": "no upgrade job has run yet" }))),
    }
}

pub async fn upgrade_logs(State(state): State<AppState>) -> Result<Response, ApiError> {
    let log = state.store.read_log().await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        log,
    )
        .into_response())
}

pub async fn upgrade_playbook(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let job = state.store.load_job().await?;
    let failed = job.filter(|j| j.state == JobState::Failed);
    let Some(job) = failed else {
        return Ok(Json(Value::Null));
    };
    let Some(code) = job.failure_code else {
        return Ok(Json(Value::Null));
    };

    let playbook = render_playbook(code, &playbook_context(&state, &job));
    Ok(Json(json!({
        "playbook": playbook,
        "failureCode": code,
        "backupPath": job.backup_path,
    })))
}

pub async fn upgrade_inspect(State(state): State<AppState>) -> Json<Value> {
    Json(state.runner.orchestrator().inspect_system().await)
}

fn playbook_context(state: &AppState, job: &UpgradeJob) -> PlaybookContext {
    let settings = &state.runner.orchestrator().settings;
    PlaybookContext {
        backup_path: (!job.backup_path.is_empty()).then(|| job.backup_path.clone()),
        container_name: settings.container_name.clone(),
        image_repo: Some(settings.image_pattern.trim_end_matches(':').to_string()),
        base_url: None,
        http_port: None,
    }
}

// ── Plan / run ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequestBody {
    pub mode: Option<String>,
    pub requested_target: String,
    pub source: Option<String>,
}

impl UpgradeRequestBody {
    /// Caller-supplied mode is honored only for CLI-sourced requests;
    /// anything upstream is pinned to DASHBOARD and cannot spoof MANUAL.
    fn resolve_mode(&self) -> Result<UpgradeMode, ApiError> {
        let requested = self
            .mode
            .as_deref()
            .map(str::parse::<UpgradeMode>)
            .transpose()
            .map_err(ApiError::bad_request)?;
        Ok(effective_mode(self.source.as_deref(), requested))
    }
}

pub async fn post_plan(
    State(state): State<AppState>,
    Json(body): Json<UpgradeRequestBody>,
) -> Result<Json<Value>, ApiError> {
    if body.requested_target.trim().is_empty() {
        return Err(ApiError::bad_request("requestedTarget must not be empty"));
    }
    let mode = body.resolve_mode()?;
    let outcome = state
        .runner
        .orchestrator()
        .plan(&PlanRequest { mode, requested_target: body.requested_target.clone() })
        .await;
    Ok(Json(json!(outcome)))
}

pub async fn post_run(
    State(state): State<AppState>,
    Json(body): Json<UpgradeRequestBody>,
) -> Result<Json<Value>, ApiError> {
    if body.requested_target.trim().is_empty() {
        return Err(ApiError::bad_request("requestedTarget must not be empty"));
    }
    let mode = body.resolve_mode()?;

    match state.runner.try_start(mode, &body.requested_target).await {
        Ok(job) => Ok(Json(json!(job))),
        Err(RunnerError::Conflict { job_id, state: job_state }) => {
            Err(ApiError::conflict(job_id, job_state))
        }
        Err(RunnerError::Store(e)) => Err(ApiError::internal(e.to_string())),
    }
}

// ── History ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let event_type = match query.event_type.as_deref() {
        None => None,
        Some("upgrade") => Some(EventType::Upgrade),
        Some("backup") => Some(EventType::Backup),
        Some("restore") => Some(EventType::Restore),
        Some(other) => {
            return Err(ApiError::bad_request(format!("unknown event type '{}'", other)))
        }
    };
    let status = match query.status.as_deref() {
        None => None,
        Some("started") => Some(EventStatus::Started),
        Some("succeeded") => Some(EventStatus::Succeeded),
        Some("failed") => Some(EventStatus::Failed),
        Some("validated") => Some(EventStatus::Validated),
        Some(other) => {
            return Err(ApiError::bad_request(format!("unknown event status '{}'", other)))
        }
    };

    let events = state
        .store
        .list_events(EventFilter { event_type, status }, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(json!({ "count": events.len(), "events": events })))
}
