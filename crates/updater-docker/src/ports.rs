use std::time::Duration;

use tracing::debug;
use updater_domain::{Failure, FailureCode, PortMapping, RuntimeState};

/// Marker expected somewhere in the Core application's HTTP response.
const DEFAULT_MARKER: &str = "PayRam";
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Finds which of a container's published ports serves the Core application
/// by probing each TCP port for a marker string. Used only to locate the
/// application's own URL so the orchestrator can call health and version
/// endpoints on it.
pub struct PortIdentifier {
    client: reqwest::Client,
    host: String,
    marker: String,
    attempt_timeout: Duration,
}

impl Default for PortIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PortIdentifier {
    pub fn new() -> Self {
        PortIdentifier {
            client: reqwest::Client::new(),
            host: "127.0.0.1".to_string(),
            marker: DEFAULT_MARKER.to_string(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Probe each published TCP port in turn; the first one whose response
    /// body contains the marker wins.
    pub async fn identify(&self, state: &RuntimeState) -> Result<PortMapping, Failure> {
        for port in state.ports.iter().filter(|p| p.protocol == "tcp") {
            let url = format!("http://{}:{}/", self.host, port.host_port);
            debug!(url = %url, "probing for application marker");

            let response = self
                .client
                .get(&url)
                .timeout(self.attempt_timeout)
                .send()
                .await;
            let Ok(response) = response else { continue };
            let Ok(body) = response.text().await else { continue };

            if body.contains(&self.marker) {
                debug!(port = %port.host_port, "identified application port");
                return Ok(port.clone());
            }
        }

        Err(Failure::new(
            FailureCode::CorePortUnidentified,
            format!(
                "no published port answered with the '{}' marker within {:?} per attempt",
                self.marker, self.attempt_timeout
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use updater_domain::{RestartPolicy, RuntimeState};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state_with_ports(ports: Vec<PortMapping>) -> RuntimeState {
        RuntimeState {
            id: "abc".into(),
            name: "core".into(),
            image: "payramapp/payram".into(),
            image_tag: "v1.7.0".into(),
            ports,
            mounts: vec![],
            env: vec![],
            networks: vec![],
            restart_policy: RestartPolicy::default(),
            labels: Default::default(),
        }
    }

    fn mapping(host_port: &str, proto: &str) -> PortMapping {
        PortMapping {
            host_ip: "0.0.0.0".into(),
            host_port: host_port.into(),
            container_port: "8080".into(),
            protocol: proto.into(),
        }
    }

    #[tokio::test]
    async fn finds_port_serving_the_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<title>PayRam</title>"))
            .mount(&server)
            .await;

        let port = server.address().port().to_string();
        let state = state_with_ports(vec![mapping("1", "tcp"), mapping(&port, "tcp")]);

        let found = PortIdentifier::new().identify(&state).await.unwrap();
        assert_eq!(found.host_port, port);
    }

    #[tokio::test]
    async fn wrong_marker_fails_unidentified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("something else"))
            .mount(&server)
            .await;

        let port = server.address().port().to_string();
        let state = state_with_ports(vec![mapping(&port, "tcp")]);

        let err = PortIdentifier::new().identify(&state).await.unwrap_err();
        assert_eq!(err.code, FailureCode::CorePortUnidentified);
    }

    #[tokio::test]
    async fn udp_ports_are_skipped() {
        let state = state_with_ports(vec![mapping("9999", "udp")]);
        let err = PortIdentifier::new().identify(&state).await.unwrap_err();
        assert_eq!(err.code, FailureCode::CorePortUnidentified);
    }
}
