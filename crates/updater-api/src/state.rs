use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use updater_orchestrator::Runner;
use updater_store::StateStore;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<Runner>,
    pub store: Arc<dyn StateStore>,
    /// Client addresses accepted besides loopback: the discovered Core
    /// container IP, and optionally a private bridge interface.
    allowed_ips: Arc<RwLock<HashSet<IpAddr>>>,
}

impl AppState {
    pub fn new(runner: Arc<Runner>) -> Self {
        let store = runner.orchestrator().store.clone();
        AppState { runner, store, allowed_ips: Arc::new(RwLock::new(HashSet::new())) }
    }

    pub fn allow_ip(&self, ip: IpAddr) {
        self.allowed_ips.write().expect("allowlist lock").insert(ip);
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        ip.is_loopback() || self.allowed_ips.read().expect("allowlist lock").contains(&ip)
    }
}
