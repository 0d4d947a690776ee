use std::collections::BTreeMap;

use serde_json::Value;
use updater_domain::{
    Mount, MountKind, NetworkAttachment, PortMapping, RestartPolicy, RestartPolicyKind,
    RuntimeState,
};

use crate::driver::ContainerDriver;
use crate::error::DriverError;

/// Split an image reference into (repository, tag) on the last `:`.
/// A `:` that belongs to a registry port is not a tag separator; a reference
/// without a tag defaults to "latest".
pub fn split_image_tag(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

/// Capture the full observable configuration of one container.
///
/// Read-only and deterministic for a fixed inspect document: no field is
/// invented, and entries sourced from keyed mappings (ports, networks) carry
/// no meaningful order.
pub async fn inspect_runtime(
    driver: &dyn ContainerDriver,
    reference: &str,
) -> Result<RuntimeState, DriverError> {
    let doc = driver.inspect_raw(reference).await?;
    parse_inspect(&doc)
}

pub(crate) fn parse_inspect(doc: &Value) -> Result<RuntimeState, DriverError> {
    let id = required_str(doc, "/Id")?;
    let name = required_str(doc, "/Name")?.trim_start_matches('/').to_string();
    let image_ref = required_str(doc, "/Config/Image")?;
    let (image, image_tag) = split_image_tag(&image_ref);

    let env = doc
        .pointer("/Config/Env")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let labels = doc
        .pointer("/Config/Labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    let ports = parse_ports(doc)?;
    let mounts = parse_mounts(doc)?;
    let networks = parse_networks(doc);
    let restart_policy = parse_restart_policy(doc)?;

    Ok(RuntimeState {
        id,
        name,
        image,
        image_tag,
        ports,
        mounts,
        env,
        networks,
        restart_policy,
        labels,
    })
}

fn required_str(doc: &Value, pointer: &str) -> Result<String, DriverError> {
    doc.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DriverError::InvalidOutput(format!("inspect document missing {}", pointer)))
}

/// `NetworkSettings.Ports` maps "8080/tcp" to a list of host bindings; a null
/// value means the port is exposed but not published, which we skip.
fn parse_ports(doc: &Value) -> Result<Vec<PortMapping>, DriverError> {
    let Some(map) = doc.pointer("/NetworkSettings/Ports").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    let mut ports = Vec::new();
    for (key, bindings) in map {
        let Some(bindings) = bindings.as_array() else { continue };
        let (container_port, protocol) = key
            .split_once('/')
            .map(|(p, proto)| (p.to_string(), proto.to_string()))
            .unwrap_or_else(|| (key.clone(), "tcp".to_string()));

        for binding in bindings {
            let host_port = binding
                .pointer("/HostPort")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if host_port.is_empty() {
                return Err(DriverError::InvalidOutput(format!(
                    "published port {} has an empty host port",
                    key
                )));
            }
            ports.push(PortMapping {
                host_ip: binding
                    .pointer("/HostIp")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                host_port,
                container_port: container_port.clone(),
                protocol: protocol.clone(),
            });
        }
    }
    Ok(ports)
}

fn parse_mounts(doc: &Value) -> Result<Vec<Mount>, DriverError> {
    let Some(list) = doc.pointer("/Mounts").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut mounts = Vec::new();
    for entry in list {
        let kind = match entry.pointer("/Type").and_then(Value::as_str) {
            Some("bind") => MountKind::Bind,
            Some("volume") => MountKind::Volume,
            // tmpfs and friends are not reconstructable run args; skip them.
            _ => continue,
        };
        let source = match kind {
            MountKind::Bind => entry.pointer("/Source"),
            MountKind::Volume => entry.pointer("/Name"),
        }
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
        let destination = entry
            .pointer("/Destination")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        mounts.push(Mount {
            kind,
            source,
            destination,
            mode: entry
                .pointer("/Mode")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            rw: entry.pointer("/RW").and_then(Value::as_bool).unwrap_or(true),
        });
    }
    Ok(mounts)
}

fn parse_networks(doc: &Value) -> Vec<NetworkAttachment> {
    let Some(map) = doc
        .pointer("/NetworkSettings/Networks")
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };

    map.iter()
        .map(|(name, net)| NetworkAttachment {
            name: name.clone(),
            ip_address: str_at(net, "/IPAddress"),
            gateway: str_at(net, "/Gateway"),
            mac_address: str_at(net, "/MacAddress"),
        })
        .collect()
}

fn str_at(v: &Value, pointer: &str) -> String {
    v.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_restart_policy(doc: &Value) -> Result<RestartPolicy, DriverError> {
    let name = doc
        .pointer("/HostConfig/RestartPolicy/Name")
        .and_then(Value::as_str)
        .unwrap_or("no");
    let kind = match name {
        "" | "no" => RestartPolicyKind::No,
        "always" => RestartPolicyKind::Always,
        "on-failure" => RestartPolicyKind::OnFailure,
        "unless-stopped" => RestartPolicyKind::UnlessStopped,
        other => {
            return Err(DriverError::InvalidOutput(format!(
                "unknown restart policy '{}'",
                other
            )));
        }
    };
    let max_retry_count = doc
        .pointer("/HostConfig/RestartPolicy/MaximumRetryCount")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    Ok(RestartPolicy { name: kind, max_retry_count })
}
