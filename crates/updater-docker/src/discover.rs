use tracing::{debug, info};
use updater_domain::{parse_version, Failure, FailureCode};

use crate::driver::{ContainerDriver, ContainerSummary};

/// Select the single Core instance to operate on: among running containers
/// whose image starts with `image_pattern`, the one with the highest semver
/// tag. Tags equal to "latest" are discarded since they carry no version signal.
pub async fn discover_core(
    driver: &dyn ContainerDriver,
    image_pattern: &str,
) -> Result<ContainerSummary, Failure> {
    let running = driver.list_running().await.map_err(|e| {
        Failure::new(
            FailureCode::PayramContainerNotFound,
            format!("listing running containers failed: {}", e),
        )
    })?;

    let mut candidates: Vec<ContainerSummary> = Vec::new();
    for container in running {
        if !container.image.starts_with(image_pattern) {
            continue;
        }
        let tag = &container.image[image_pattern.len()..];
        if tag == "latest" {
            info!(
                container = %container.name,
                image = %container.image,
                "discarding candidate with tag 'latest'"
            );
            continue;
        }
        candidates.push(container);
    }

    match candidates.len() {
        0 => Err(Failure::new(
            FailureCode::PayramContainerNotFound,
            format!("no running container matches image pattern '{}'", image_pattern),
        )),
        1 => {
            let only = candidates.into_iter().next().expect("one candidate");
            debug!(container = %only.name, "single candidate, no version comparison needed");
            Ok(only)
        }
        _ => pick_highest(candidates, image_pattern),
    }
}

fn pick_highest(
    candidates: Vec<ContainerSummary>,
    image_pattern: &str,
) -> Result<ContainerSummary, Failure> {
    let mut best: Option<(semver::Version, ContainerSummary)> = None;
    let mut unparseable = Vec::new();

    for candidate in candidates {
        let tag = &candidate.image[image_pattern.len()..];
        match parse_version(tag) {
            Ok(version) => {
                let replace = match &best {
                    None => true,
                    Some((bv, bc)) => {
                        // Two running containers cannot share image:tag, so a
                        // genuine tie means duplicate tags; break on id.
                        version > *bv || (version == *bv && candidate.id > bc.id)
                    }
                };
                if replace {
                    best = Some((version, candidate));
                }
            }
            Err(_) => {
                debug!(image = %candidate.image, "candidate tag is not semver");
                unparseable.push(candidate.image);
            }
        }
    }

    match best {
        Some((_, winner)) => Ok(winner),
        None => Err(Failure::new(
            FailureCode::PayramVersionParseFailed,
            format!(
                "no candidate has a semver tag; saw: {}",
                unparseable.join(", ")
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeDriver;

    fn summary(id: &str, name: &str, image: &str) -> ContainerSummary {
        ContainerSummary { id: id.into(), name: name.into(), image: image.into() }
    }

    #[tokio::test]
    async fn picks_highest_semver() {
        let driver = FakeDriver::new().with_running(vec![
            summary("a", "core-old", "payramapp/payram:v1.7.0"),
            summary("b", "core-new", "payramapp/payram:v1.10.2"),
            summary("c", "unrelated", "nginx:1.25"),
        ]);
        let found = discover_core(&driver, "payramapp/payram:").await.unwrap();
        assert_eq!(found.name, "core-new");
    }

    #[tokio::test]
    async fn single_candidate_needs_no_parse() {
        let driver = FakeDriver::new().with_running(vec![summary(
            "a",
            "core",
            "payramapp/payram:nightly-build",
        )]);
        let found = discover_core(&driver, "payramapp/payram:").await.unwrap();
        assert_eq!(found.name, "core");
    }

    #[tokio::test]
    async fn latest_tag_is_discarded() {
        let driver = FakeDriver::new().with_running(vec![
            summary("a", "core-latest", "payramapp/payram:latest"),
            summary("b", "core", "payramapp/payram:v1.7.0"),
        ]);
        let found = discover_core(&driver, "payramapp/payram:").await.unwrap();
        assert_eq!(found.name, "core");
    }

    #[tokio::test]
    async fn no_candidates_fails_with_not_found() {
        let driver = FakeDriver::new().with_running(vec![summary("a", "web", "nginx:1.25")]);
        let err = discover_core(&driver, "payramapp/payram:").await.unwrap_err();
        assert_eq!(err.code, FailureCode::PayramContainerNotFound);
    }

    #[tokio::test]
    async fn all_unparseable_fails_with_parse_error() {
        let driver = FakeDriver::new().with_running(vec![
            summary("a", "one", "payramapp/payram:nightly"),
            summary("b", "two", "payramapp/payram:dev"),
        ]);
        let err = discover_core(&driver, "payramapp/payram:").await.unwrap_err();
        assert_eq!(err.code, FailureCode::PayramVersionParseFailed);
    }
}
