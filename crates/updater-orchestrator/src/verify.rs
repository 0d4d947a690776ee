use std::time::Duration;

use tracing::{debug, warn};
use updater_docker::ContainerDriver;
use updater_domain::{normalize_version, parse_version, Failure, FailureCode, Policy};

pub const HEALTH_PATH: &str = "/api/health";
pub const VERSION_PATH: &str = "/api/version";
/// Marker the legacy root page is expected to contain.
pub const WELCOME_MARKER: &str = "PayRam";
/// Image label carrying the version on releases older than the in-app API.
pub const VERSION_LABEL: &str = "org.opencontainers.image.version";

const HEALTH_ATTEMPTS: u32 = 6;
const HEALTH_INTERVAL: Duration = Duration::from_secs(2);
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(3);

/// Post-replace verification of the new container, over the application's
/// own HTTP surface.
pub struct Verifier {
    client: reqwest::Client,
    attempts: u32,
    interval: Duration,
    attempt_timeout: Duration,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier {
    pub fn new() -> Self {
        Verifier {
            client: reqwest::Client::new(),
            attempts: HEALTH_ATTEMPTS,
            interval: HEALTH_INTERVAL,
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }

    /// Shrink the retry schedule; only tests want this.
    pub fn with_timing(attempts: u32, interval: Duration, attempt_timeout: Duration) -> Self {
        Verifier { client: reqwest::Client::new(), attempts, interval, attempt_timeout }
    }

    /// Poll the health endpoint until it reports `status == "ok"` (and
    /// `db == "ok"` when a db field is present).
    pub async fn verify_health(&self, base_url: &str) -> Result<(), Failure> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), HEALTH_PATH);
        let mut last_problem = String::new();

        for attempt in 1..=self.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.interval).await;
            }
            debug!(url = %url, attempt, "health check");

            match self.fetch_json(&url).await {
                Ok(body) => {
                    let status_ok =
                        body.get("status").and_then(|v| v.as_str()) == Some("ok");
                    let db_ok = match body.get("db") {
                        None => true,
                        Some(db) => db.as_str() == Some("ok"),
                    };
                    if status_ok && db_ok {
                        return Ok(());
                    }
                    last_problem = format!("unhealthy response: {}", body);
                }
                Err(e) => last_problem = e,
            }
        }

        Err(Failure::new(
            FailureCode::HealthcheckFailed,
            format!(
                "health check failed after {} attempts: {}",
                self.attempts, last_problem
            ),
        ))
    }

    /// One-shot version equality check against the resolved target.
    pub async fn verify_version(&self, base_url: &str, expected: &str) -> Result<(), Failure> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), VERSION_PATH);
        let body = self
            .fetch_json(&url)
            .await
            .map_err(|e| Failure::new(FailureCode::VersionMismatch, e))?;

        let reported = body
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if normalize_version(reported) == normalize_version(expected) {
            Ok(())
        } else {
            Err(Failure::new(
                FailureCode::VersionMismatch,
                format!("application reports version '{}', expected '{}'", reported, expected),
            ))
        }
    }

    /// Legacy health: the root page of an old release has no health endpoint
    /// but always serves the welcome marker.
    pub async fn verify_legacy_health(&self, base_url: &str) -> Result<(), Failure> {
        let mut last_problem = String::new();

        for attempt in 1..=self.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.interval).await;
            }
            let result = self
                .client
                .get(base_url)
                .timeout(self.attempt_timeout)
                .send()
                .await;
            match result {
                Ok(response) => match response.text().await {
                    Ok(body) if body.contains(WELCOME_MARKER) => return Ok(()),
                    Ok(_) => last_problem = "welcome marker missing from root page".to_string(),
                    Err(e) => last_problem = e.to_string(),
                },
                Err(e) => last_problem = e.to_string(),
            }
        }

        Err(Failure::new(
            FailureCode::HealthcheckFailed,
            format!(
                "legacy health check failed after {} attempts: {}",
                self.attempts, last_problem
            ),
        ))
    }

    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, String> {
        let response = self
            .client
            .get(url)
            .timeout(self.attempt_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("status {}", status));
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| e.to_string())
    }
}

/// Releases older than the policy's `updater_api_init_version` predate the
/// in-app health/version endpoints and verify through the legacy path.
pub fn is_legacy_target(target: &str, policy: &Policy) -> bool {
    let (Ok(target), Ok(init)) = (
        parse_version(target),
        parse_version(&policy.updater_api_init_version),
    ) else {
        return false;
    };
    target < init
}

/// Legacy version check: read the version label baked into the image.
pub async fn verify_legacy_version(
    driver: &dyn ContainerDriver,
    image: &str,
    expected: &str,
) -> Result<(), Failure> {
    let label = driver.image_label(image, VERSION_LABEL).await.map_err(|e| {
        warn!(image = %image, error = %e, "image label read failed");
        Failure::new(
            FailureCode::VersionMismatch,
            format!("could not read {} from {}: {}", VERSION_LABEL, image, e),
        )
    })?;

    match label {
        Some(value) if normalize_version(&value) == normalize_version(expected) => Ok(()),
        Some(value) => Err(Failure::new(
            FailureCode::VersionMismatch,
            format!("image label reports version '{}', expected '{}'", value, expected),
        )),
        None => Err(Failure::new(
            FailureCode::VersionMismatch,
            format!("image {} carries no {} label", image, VERSION_LABEL),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use updater_docker::FakeDriver;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick() -> Verifier {
        Verifier::with_timing(2, Duration::from_millis(10), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn health_ok_passes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "ok", "db": "ok"})),
            )
            .mount(&server)
            .await;

        quick().verify_health(&server.uri()).await.unwrap();
    }

    #[tokio::test]
    async fn health_without_db_field_passes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
            .mount(&server)
            .await;

        quick().verify_health(&server.uri()).await.unwrap();
    }

    #[tokio::test]
    async fn unhealthy_db_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "ok", "db": "down"})),
            )
            .mount(&server)
            .await;

        let err = quick().verify_health(&server.uri()).await.unwrap_err();
        assert_eq!(err.code, FailureCode::HealthcheckFailed);
    }

    #[tokio::test]
    async fn version_equality_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VERSION_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "1.8.0"})),
            )
            .mount(&server)
            .await;

        quick().verify_version(&server.uri(), "v1.8.0").await.unwrap();
    }

    #[tokio::test]
    async fn version_mismatch_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VERSION_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "1.7.0"})),
            )
            .mount(&server)
            .await;

        let err = quick()
            .verify_version(&server.uri(), "v1.8.0")
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::VersionMismatch);
    }

    #[tokio::test]
    async fn legacy_health_checks_welcome_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Welcome to PayRam</h1>"))
            .mount(&server)
            .await;

        quick().verify_legacy_health(&server.uri()).await.unwrap();
    }

    #[test]
    fn legacy_cutoff_compares_semver() {
        let policy = Policy {
            updater_api_init_version: "v1.5.0".into(),
            ..Default::default()
        };
        assert!(is_legacy_target("v1.4.9", &policy));
        assert!(!is_legacy_target("v1.5.0", &policy));
        assert!(!is_legacy_target("v1.6.0", &policy));
        assert!(!is_legacy_target("not-a-version", &policy));
    }

    #[tokio::test]
    async fn legacy_version_reads_image_label() {
        let driver = FakeDriver::new().with_image_label(
            "payramapp/payram:v1.4.0",
            VERSION_LABEL,
            "1.4.0",
        );
        verify_legacy_version(&driver, "payramapp/payram:v1.4.0", "v1.4.0")
            .await
            .unwrap();

        let err = verify_legacy_version(&driver, "payramapp/payram:v1.4.0", "v1.5.0")
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::VersionMismatch);
    }
}
