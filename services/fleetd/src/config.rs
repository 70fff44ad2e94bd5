use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use dockfleet_reconcile::DEFAULT_PROVISIONING_GRACE;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// How long a created container may stay invisible to the runtime
    /// before its record is pruned.
    pub provisioning_grace: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = lookup("DOCKFLEET_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8090".to_string())
            .parse()
            .context("DOCKFLEET_LISTEN_ADDR is not a socket address")?;

        let log_level = lookup("DOCKFLEET_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let provisioning_grace = match lookup("DOCKFLEET_PROVISIONING_GRACE_SECS") {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .context("DOCKFLEET_PROVISIONING_GRACE_SECS must be whole seconds")?,
            ),
            None => DEFAULT_PROVISIONING_GRACE,
        };

        Ok(Self {
            listen_addr,
            log_level,
            provisioning_grace,
        })
    }
}
