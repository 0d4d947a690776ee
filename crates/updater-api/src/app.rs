use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::allowlist::require_allowed_ip;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Job
        .route("/upgrade/status", get(handlers::upgrade_status))
        .route("/upgrade/last", get(handlers::upgrade_last))
        .route("/upgrade/logs", get(handlers::upgrade_logs))
        .route("/upgrade/playbook", get(handlers::upgrade_playbook))
        .route("/upgrade/inspect", get(handlers::upgrade_inspect))
        .route("/upgrade/plan", post(handlers::post_plan))
        .route("/upgrade/run", post(handlers::post_run))
        // History (both spellings)
        .route("/history", get(handlers::history))
        .route("/upgrade/history", get(handlers::history))
        // IP allowlist applies to all routes above
        .route_layer(middleware::from_fn_with_state(state.clone(), require_allowed_ip))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::connect_info::ConnectInfo;
    use axum::http::{Method, Request, StatusCode};
    use chrono::Utc;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::util::ServiceExt;
    use updater_config::Settings;
    use updater_db::{DbBackupTool, DbError};
    use updater_docker::FakeDriver;
    use updater_domain::{
        BackupFormat, DbConfig, EventStatus, EventType, FailureCode, HistoryEvent, JobState,
        UpgradeJob, UpgradeMode,
    };
    use updater_orchestrator::{Orchestrator, Runner};
    use updater_store::{InMemoryStore, StateStore};

    struct NullTool;

    #[async_trait]
    impl DbBackupTool for NullTool {
        async fn dump(
            &self,
            _: &DbConfig,
            _: &Path,
            _: BackupFormat,
            _: Option<&str>,
            _: Duration,
        ) -> Result<(), DbError> {
            Ok(())
        }
        async fn restore(
            &self,
            _: &DbConfig,
            _: &Path,
            _: BackupFormat,
            _: Option<&str>,
            _: Duration,
        ) -> Result<(), DbError> {
            Ok(())
        }
        async fn size(&self, _: &DbConfig, _: Option<&str>, _: Duration) -> Result<u64, DbError> {
            Ok(0)
        }
    }

    fn test_state() -> (AppState, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let settings = Settings {
            // unroutable: plan/run fail fast without real fetches
            policy_url: "http://127.0.0.1:1/policy.json".into(),
            manifest_url: "http://127.0.0.1:1/manifest.json".into(),
            fetch_timeout_seconds: 1,
            ..Default::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(
            settings,
            Arc::new(FakeDriver::new()),
            store.clone(),
            Arc::new(NullTool),
        ));
        (AppState::new(Runner::new(orchestrator)), store)
    }

    fn test_app() -> (Router, Arc<InMemoryStore>) {
        let (state, store) = test_state();
        (build_app(state), store)
    }

    fn from_loopback(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
    }

    fn from_remote(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.extension(ConnectInfo(SocketAddr::from(([10, 1, 2, 3], 40000))))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn remote_address_is_forbidden() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(from_remote(Request::builder().uri("/health")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn allowlisted_address_is_admitted() {
        let (state, _) = test_state();
        state.allow_ip("10.1.2.3".parse().unwrap());
        let app = build_app(state);
        let resp = app
            .oneshot(from_remote(Request::builder().uri("/health")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_from_loopback_returns_ok() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(from_loopback(Request::builder().uri("/health")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn last_without_job_returns_message() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                from_loopback(Request::builder().uri("/upgrade/last"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_json(resp).await.get("message").is_some());
    }

    #[tokio::test]
    async fn status_attaches_playbook_for_failed_job() {
        let (app, store) = test_app();
        let mut job = UpgradeJob::new(UpgradeMode::Dashboard, "v1.8.0", Utc::now());
        job.backup_path = "/backups/payram-backup-x.dump".into();
        job.mark_failed(FailureCode::HealthcheckFailed, "never became healthy", Utc::now());
        store.save_job(&job).await.unwrap();

        let resp = app
            .oneshot(
                from_loopback(Request::builder().uri("/upgrade/status"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["state"], "FAILED");
        assert_eq!(body["failureCode"], "HEALTHCHECK_FAILED");
        let playbook = body["recoveryPlaybook"].as_str().unwrap();
        assert!(playbook.contains("/backups/payram-backup-x.dump"));
    }

    #[tokio::test]
    async fn run_conflicts_with_active_job() {
        let (app, store) = test_app();
        let mut active = UpgradeJob::new(UpgradeMode::Dashboard, "v1.8.0", Utc::now());
        active.set_state(JobState::Executing, Utc::now());
        store.save_job(&active).await.unwrap();

        let body = serde_json::json!({ "requestedTarget": "v1.9.0" });
        let resp = app
            .oneshot(
                from_loopback(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/upgrade/run")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body = body_json(resp).await;
        assert_eq!(body["jobId"], active.job_id);
        assert_eq!(body["state"], "EXECUTING");

        // store unchanged
        let stored = store.load_job().await.unwrap().unwrap();
        assert_eq!(stored.job_id, active.job_id);
    }

    #[tokio::test]
    async fn plan_mode_is_forced_to_dashboard_for_non_cli_sources() {
        let (app, _) = test_app();
        let body = serde_json::json!({
            "mode": "MANUAL",
            "requestedTarget": "v1.9.0",
            "source": "dashboard"
        });
        let resp = app
            .oneshot(
                from_loopback(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/upgrade/plan")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["mode"], "DASHBOARD");
    }

    #[tokio::test]
    async fn plan_honors_mode_from_cli_source() {
        let (app, _) = test_app();
        let body = serde_json::json!({
            "mode": "MANUAL",
            "requestedTarget": "v1.9.0",
            "source": "CLI"
        });
        let resp = app
            .oneshot(
                from_loopback(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/upgrade/plan")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["mode"], "MANUAL");
    }

    #[tokio::test]
    async fn empty_target_is_rejected() {
        let (app, _) = test_app();
        let body = serde_json::json!({ "requestedTarget": "  " });
        let resp = app
            .oneshot(
                from_loopback(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/upgrade/plan")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logs_are_plain_text() {
        let (app, store) = test_app();
        store.append_log("2026-02-02T14:00:00Z job started").await.unwrap();

        let resp = app
            .oneshot(
                from_loopback(Request::builder().uri("/upgrade/logs"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("job started"));
    }

    #[tokio::test]
    async fn history_filters_by_type_and_status() {
        let (app, store) = test_app();
        store
            .append_event(&HistoryEvent::new(
                EventType::Backup,
                EventStatus::Succeeded,
                "backup done",
                Utc::now(),
            ))
            .await
            .unwrap();
        store
            .append_event(&HistoryEvent::new(
                EventType::Upgrade,
                EventStatus::Failed,
                "upgrade failed",
                Utc::now(),
            ))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(
                from_loopback(Request::builder().uri("/history?type=backup&status=succeeded"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["events"][0]["type"], "backup");

        let resp = app
            .oneshot(
                from_loopback(Request::builder().uri("/upgrade/history?type=bogus"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn playbook_is_null_without_failure() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                from_loopback(Request::builder().uri("/upgrade/playbook"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_json(resp).await.is_null());
    }
}
