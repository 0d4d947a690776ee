use serde::{Deserialize, Serialize};
use tracing::warn;
use updater_docker::{discover_core, split_image_tag};
use updater_domain::{Failure, FailureCode, JobState, Manifest, Policy, UpgradeMode};

use crate::fetch::{check_breakpoint, resolve_target};
use crate::Orchestrator;

#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub mode: UpgradeMode,
    pub requested_target: String,
}

/// Read-only resolution of an upgrade request. Nothing is persisted and no
/// container is touched; a failed plan carries the same failure code the run
/// would have produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutcome {
    pub state: JobState,
    pub mode: UpgradeMode,
    pub requested_target: String,
    pub resolved_target: String,
    pub image_repo: String,
    pub container_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<FailureCode>,
    pub message: String,
}

impl PlanOutcome {
    fn failed(req: &PlanRequest, failure: Failure) -> Self {
        PlanOutcome {
            state: JobState::Failed,
            mode: req.mode,
            requested_target: req.requested_target.clone(),
            resolved_target: String::new(),
            image_repo: String::new(),
            container_name: String::new(),
            current_version: None,
            failure_code: Some(failure.code),
            message: failure.message,
        }
    }
}

impl Orchestrator {
    /// Validate an upgrade request end to end without side effects.
    pub async fn plan(&self, req: &PlanRequest) -> PlanOutcome {
        let (policy, resolved_target) = match self.plan_target(req).await {
            Ok(pair) => pair,
            Err(failure) => return PlanOutcome::failed(req, failure),
        };

        if let Err(failure) = check_breakpoint(&policy, &resolved_target, req.mode) {
            return PlanOutcome::failed(req, failure);
        }

        let manifest = match self.fetcher.fetch_manifest().await {
            Ok(manifest) => manifest,
            Err(failure) => return PlanOutcome::failed(req, failure),
        };

        let container_name = match self.resolve_container_name(&manifest).await {
            Ok(name) => name,
            Err(failure) => return PlanOutcome::failed(req, failure),
        };

        let current_version = discover_core(self.driver.as_ref(), &self.settings.image_pattern)
            .await
            .ok()
            .map(|c| split_image_tag(&c.image).1);

        PlanOutcome {
            state: JobState::Ready,
            mode: req.mode,
            requested_target: req.requested_target.clone(),
            resolved_target,
            image_repo: manifest.image.repo.clone(),
            container_name,
            current_version,
            failure_code: None,
            message: String::new(),
        }
    }

    /// Fetch the policy and resolve the target. A manual run with a concrete
    /// target survives a policy outage: the policy only gates dashboard
    /// requests and "latest" resolution.
    pub(crate) async fn plan_target(
        &self,
        req: &PlanRequest,
    ) -> Result<(Policy, String), Failure> {
        match self.fetcher.fetch_policy().await {
            Ok(policy) => {
                let resolved = resolve_target(&policy, &req.requested_target)?;
                Ok((policy, resolved))
            }
            Err(failure)
                if req.mode == UpgradeMode::Manual
                    && !req.requested_target.eq_ignore_ascii_case("latest") =>
            {
                warn!(
                    reason = %failure.message,
                    "policy unavailable; continuing manual run against an explicit target"
                );
                Ok((Policy::default(), req.requested_target.clone()))
            }
            Err(failure) => Err(failure),
        }
    }

    /// Container name priority: explicit setting, manifest default, then the
    /// discovered instance's own name.
    pub(crate) async fn resolve_container_name(
        &self,
        manifest: &Manifest,
    ) -> Result<String, Failure> {
        if let Some(name) = &self.settings.container_name {
            if !name.is_empty() {
                return Ok(name.clone());
            }
        }
        if let Some(name) = &manifest.defaults.container_name {
            if !name.is_empty() {
                return Ok(name.clone());
            }
        }
        match discover_core(self.driver.as_ref(), &self.settings.image_pattern).await {
            Ok(container) => Ok(container.name),
            Err(discovery) => Err(Failure::new(
                FailureCode::ContainerNameUnresolved,
                format!(
                    "no container name configured, none in the manifest, and discovery failed: {}",
                    discovery.message
                ),
            )),
        }
    }
}

/// Resolve the effective mode for an API request: only callers that identify
/// as the CLI may choose their mode, everything upstream is dashboard.
pub fn effective_mode(source: Option<&str>, requested_mode: Option<UpgradeMode>) -> UpgradeMode {
    match source {
        Some(source) if source.eq_ignore_ascii_case("cli") => {
            requested_mode.unwrap_or(UpgradeMode::Manual)
        }
        _ => UpgradeMode::Dashboard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_is_forced_to_dashboard_unless_cli() {
        assert_eq!(
            effective_mode(None, Some(UpgradeMode::Manual)),
            UpgradeMode::Dashboard
        );
        assert_eq!(
            effective_mode(Some("dashboard"), Some(UpgradeMode::Manual)),
            UpgradeMode::Dashboard
        );
        assert_eq!(
            effective_mode(Some("CLI"), Some(UpgradeMode::Manual)),
            UpgradeMode::Manual
        );
        assert_eq!(
            effective_mode(Some("cli"), Some(UpgradeMode::Dashboard)),
            UpgradeMode::Dashboard
        );
        assert_eq!(effective_mode(Some("cli"), None), UpgradeMode::Manual);
    }
}
