use updater_domain::{Failure, FailureCode, MountKind, RestartPolicyKind, RuntimeState};

/// Reconstruct the `docker run` argv for an equivalent container pointing at
/// `<image_repo>:<image_tag>`.
///
/// Everything observed on the old container is preserved verbatim: port
/// bindings, mounts, env entries (in captured order), network attachments,
/// restart policy, labels. Only the image reference and container name come
/// from outside. Output is deterministic for identical inputs: keyed-origin
/// entries (ports, mounts, labels, networks) are sorted before emission.
pub fn build_run_args(
    state: &RuntimeState,
    container_name: &str,
    image_repo: &str,
    image_tag: &str,
) -> Result<Vec<String>, Failure> {
    let build_err = |msg: String| Failure::new(FailureCode::DockerRunBuildFailed, msg);

    if container_name.is_empty() {
        return Err(build_err("container name is empty".to_string()));
    }
    if image_repo.is_empty() || image_tag.is_empty() {
        return Err(build_err("image repo and tag are required".to_string()));
    }

    let mut args = vec!["run".to_string(), "-d".to_string()];
    args.push("--name".to_string());
    args.push(container_name.to_string());

    match state.restart_policy.name {
        RestartPolicyKind::No => {}
        RestartPolicyKind::OnFailure => {
            args.push("--restart".to_string());
            if state.restart_policy.max_retry_count > 0 {
                args.push(format!("on-failure:{}", state.restart_policy.max_retry_count));
            } else {
                args.push("on-failure".to_string());
            }
        }
        kind => {
            args.push("--restart".to_string());
            args.push(kind.as_str().to_string());
        }
    }

    let mut ports = state.ports.clone();
    ports.sort_by(|a, b| {
        (&a.container_port, &a.protocol, &a.host_ip, &a.host_port)
            .cmp(&(&b.container_port, &b.protocol, &b.host_ip, &b.host_port))
    });
    for port in &ports {
        if port.host_port.is_empty() || port.container_port.is_empty() {
            return Err(build_err(format!(
                "port binding {:?} is missing a host or container port",
                port
            )));
        }
        let mut spec = String::new();
        if !port.host_ip.is_empty() && port.host_ip != "0.0.0.0" && port.host_ip != "::" {
            spec.push_str(&port.host_ip);
            spec.push(':');
        }
        spec.push_str(&port.host_port);
        spec.push(':');
        spec.push_str(&port.container_port);
        if !port.protocol.is_empty() && port.protocol != "tcp" {
            spec.push('/');
            spec.push_str(&port.protocol);
        }
        args.push("-p".to_string());
        args.push(spec);
    }

    let mut mounts = state.mounts.clone();
    mounts.sort_by(|a, b| a.destination.cmp(&b.destination));
    for mount in &mounts {
        if mount.destination.is_empty() {
            return Err(build_err(format!(
                "mount from '{}' has an empty destination",
                mount.source
            )));
        }
        if mount.source.is_empty() {
            return Err(build_err(format!(
                "{} mount at '{}' has an empty source",
                match mount.kind {
                    MountKind::Bind => "bind",
                    MountKind::Volume => "volume",
                },
                mount.destination
            )));
        }
        let mut spec = format!("{}:{}", mount.source, mount.destination);
        if !mount.mode.is_empty() {
            spec.push(':');
            spec.push_str(&mount.mode);
        } else if !mount.rw {
            spec.push_str(":ro");
        }
        args.push("-v".to_string());
        args.push(spec);
    }

    for entry in &state.env {
        args.push("-e".to_string());
        args.push(entry.clone());
    }

    let mut networks: Vec<&str> = state.networks.iter().map(|n| n.name.as_str()).collect();
    networks.sort_unstable();
    for network in networks {
        if network == "bridge" {
            // default network; an explicit flag would break published ports
            continue;
        }
        args.push("--network".to_string());
        args.push(network.to_string());
    }

    let mut labels: Vec<(&String, &String)> = state.labels.iter().collect();
    labels.sort();
    for (key, value) in labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(format!("{}:{}", image_repo, image_tag));
    Ok(args)
}
