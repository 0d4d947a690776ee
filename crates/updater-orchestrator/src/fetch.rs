use std::time::Duration;

use tracing::debug;
use updater_domain::{Failure, FailureCode, Manifest, Policy, UpgradeMode};

/// Fetches the release policy and the deployment manifest. Transport is plain
/// HTTPS GET with a per-call timeout; both documents are JSON.
pub struct Fetcher {
    client: reqwest::Client,
    policy_url: String,
    manifest_url: String,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(policy_url: String, manifest_url: String, timeout: Duration) -> Self {
        Fetcher { client: reqwest::Client::new(), policy_url, manifest_url, timeout }
    }

    pub async fn fetch_policy(&self) -> Result<Policy, Failure> {
        let body = self
            .fetch_text(&self.policy_url)
            .await
            .map_err(|msg| Failure::new(FailureCode::PolicyFetchFailed, msg))?;
        serde_json::from_str(&body).map_err(|e| {
            Failure::new(
                FailureCode::PolicyInvalidJson,
                format!("policy document does not parse: {}", e),
            )
        })
    }

    pub async fn fetch_manifest(&self) -> Result<Manifest, Failure> {
        let body = self
            .fetch_text(&self.manifest_url)
            .await
            .map_err(|msg| Failure::new(FailureCode::ManifestFetchFailed, msg))?;
        serde_json::from_str(&body).map_err(|e| {
            Failure::new(
                FailureCode::ManifestInvalidJson,
                format!("manifest document does not parse: {}", e),
            )
        })
    }

    async fn fetch_text(&self, url: &str) -> Result<String, String> {
        debug!(url, "fetching release document");
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("GET {}: {}", url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("GET {}: status {}", url, status));
        }
        response.text().await.map_err(|e| format!("GET {}: {}", url, e))
    }
}

/// Resolve the requested target to a concrete version. `"latest"` (case
/// insensitive) resolves through the policy; anything else is taken as-is.
pub fn resolve_target(policy: &Policy, requested: &str) -> Result<String, Failure> {
    if requested.eq_ignore_ascii_case("latest") {
        if policy.latest.is_empty() {
            return Err(Failure::new(
                FailureCode::PolicyInvalidJson,
                "policy does not advertise a latest version",
            ));
        }
        return Ok(policy.latest.clone());
    }
    Ok(requested.to_string())
}

/// Dashboard upgrades are refused at declared breakpoints; manual upgrades
/// go through.
pub fn check_breakpoint(
    policy: &Policy,
    target: &str,
    mode: UpgradeMode,
) -> Result<(), Failure> {
    if mode == UpgradeMode::Manual {
        return Ok(());
    }
    if let Some(breakpoint) = policy.breakpoint_for(target) {
        return Err(Failure::new(
            FailureCode::ManualUpgradeRequired,
            format!(
                "upgrade to {} requires a manual run: {} (see {})",
                target, breakpoint.reason, breakpoint.docs
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use updater_domain::Breakpoint;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher_for(server: &MockServer) -> Fetcher {
        Fetcher::new(
            format!("{}/policy.json", server.uri()),
            format!("{}/manifest.json", server.uri()),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn fetches_and_parses_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/policy.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "latest": "v1.7.0",
                "releases": ["v1.7.0", "v1.6.0"],
                "breakpoints": [],
                "updaterApiInitVersion": "v1.5.0"
            })))
            .mount(&server)
            .await;

        let policy = fetcher_for(&server).fetch_policy().await.unwrap();
        assert_eq!(policy.latest, "v1.7.0");
        assert_eq!(policy.updater_api_init_version, "v1.5.0");
    }

    #[tokio::test]
    async fn policy_http_error_is_fetch_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/policy.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = fetcher_for(&server).fetch_policy().await.unwrap_err();
        assert_eq!(err.code, FailureCode::PolicyFetchFailed);
    }

    #[tokio::test]
    async fn policy_bad_json_is_invalid_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/policy.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let err = fetcher_for(&server).fetch_policy().await.unwrap_err();
        assert_eq!(err.code, FailureCode::PolicyInvalidJson);
    }

    #[tokio::test]
    async fn manifest_errors_use_manifest_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher_for(&server).fetch_manifest().await.unwrap_err();
        assert_eq!(err.code, FailureCode::ManifestFetchFailed);
    }

    #[test]
    fn latest_resolves_through_policy() {
        let policy = Policy { latest: "v1.7.0".into(), ..Default::default() };
        assert_eq!(resolve_target(&policy, "latest").unwrap(), "v1.7.0");
        assert_eq!(resolve_target(&policy, "LATEST").unwrap(), "v1.7.0");
        assert_eq!(resolve_target(&policy, "v1.6.2").unwrap(), "v1.6.2");
    }

    #[test]
    fn breakpoint_blocks_dashboard_not_manual() {
        let policy = Policy {
            latest: "v1.7.0".into(),
            breakpoints: vec![Breakpoint {
                version: "v1.7.0".into(),
                reason: "DB schema break".into(),
                docs: "https://ex/docs".into(),
            }],
            ..Default::default()
        };

        let err = check_breakpoint(&policy, "v1.7.0", UpgradeMode::Dashboard).unwrap_err();
        assert_eq!(err.code, FailureCode::ManualUpgradeRequired);
        assert!(err.message.contains("DB schema break"));
        assert!(err.message.contains("https://ex/docs"));

        assert!(check_breakpoint(&policy, "v1.7.0", UpgradeMode::Manual).is_ok());
        assert!(check_breakpoint(&policy, "v1.8.0", UpgradeMode::Dashboard).is_ok());
    }
}
