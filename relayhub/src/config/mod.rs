//! Gateway configuration.

mod credentials;

pub use credentials::load_credentials;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default pool size; two keeps the gateway serving while a crashed worker is replaced.
pub const DEFAULT_WORKERS: usize = 2;

/// Platforms every worker owns unless configured otherwise.
pub const DEFAULT_PLATFORMS: &[&str] = &["facebook", "twitter"];

pub const DEFAULT_PORT: u16 = 10550;

/// Upper bound on a worker's drain unless configured otherwise.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Gateway configuration shared by the supervisor and its workers.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Number of worker processes.
    pub workers: usize,
    /// Platforms each worker loads a listener for.
    pub platforms: Vec<String>,
    /// WebSocket bind address
    pub bind_address: String,
    /// WebSocket port
    pub port: u16,
    /// Root of the file-backed shared store.
    pub state_dir: PathBuf,
    /// Optional JSON credentials file preloaded into the configuration store.
    pub credentials_file: Option<PathBuf>,
    /// Upper bound on a worker's drain at shutdown.
    pub drain_timeout: Duration,
    /// Upper bound on each upstream request of a fetch.
    pub fetch_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            platforms: DEFAULT_PLATFORMS.iter().map(|p| p.to_string()).collect(),
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            state_dir: std::env::temp_dir().join("relayhub-state"),
            credentials_file: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            fetch_timeout: Duration::from_secs(3),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `RELAYHUB_WORKERS` (e.g. "4")
    /// - `RELAYHUB_PLATFORMS` (e.g. "facebook,twitter")
    /// - `RELAYHUB_BIND_ADDRESS` (e.g. "127.0.0.1")
    /// - `RELAYHUB_PORT` (e.g. "10550")
    /// - `RELAYHUB_STATE_DIR`
    /// - `RELAYHUB_CREDENTIALS_FILE`
    /// - `RELAYHUB_DRAIN_TIMEOUT_SECS`
    /// - `RELAYHUB_FETCH_TIMEOUT_SECS`
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(workers) = non_empty("RELAYHUB_WORKERS")
            && let Ok(parsed) = workers.trim().parse::<usize>()
            && parsed > 0
        {
            config.workers = parsed;
        }

        if let Some(platforms) = non_empty("RELAYHUB_PLATFORMS") {
            config.platforms = parse_platform_list(&platforms);
        }

        if let Some(bind_address) = non_empty("RELAYHUB_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }

        if let Some(port) = non_empty("RELAYHUB_PORT")
            && let Ok(parsed) = port.trim().parse::<u16>()
        {
            config.port = parsed;
        }

        if let Some(dir) = non_empty("RELAYHUB_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }

        if let Some(file) = non_empty("RELAYHUB_CREDENTIALS_FILE") {
            config.credentials_file = Some(PathBuf::from(file));
        }

        if let Some(secs) = non_empty("RELAYHUB_DRAIN_TIMEOUT_SECS")
            && let Ok(parsed) = secs.trim().parse::<u64>()
        {
            config.drain_timeout = Duration::from_secs(parsed);
        }

        if let Some(secs) = non_empty("RELAYHUB_FETCH_TIMEOUT_SECS")
            && let Ok(parsed) = secs.trim().parse::<u64>()
            && parsed > 0
        {
            config.fetch_timeout = Duration::from_secs(parsed);
        }

        config
    }

    /// Address the WebSocket transport listens on.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| Error::config(format!("invalid bind address: {}", e)))
    }
}

/// Split a comma separated platform list, lowercased and deduplicated.
pub fn parse_platform_list(raw: &str) -> Vec<String> {
    let mut platforms: Vec<String> = Vec::new();
    for name in raw.split(',').map(|p| p.trim().to_ascii_lowercase()) {
        if !name.is_empty() && !platforms.contains(&name) {
            platforms.push(name);
        }
    }
    platforms
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> GatewayConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_map(&[]);
        assert_eq!(config.workers, 2);
        assert_eq!(config.platforms, vec!["facebook", "twitter"]);
        assert_eq!(config.port, 10550);
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
        assert!(config.credentials_file.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = from_map(&[
            ("RELAYHUB_WORKERS", "4"),
            ("RELAYHUB_PLATFORMS", "Twitter, facebook,twitter"),
            ("RELAYHUB_PORT", "9000"),
            ("RELAYHUB_DRAIN_TIMEOUT_SECS", "1"),
        ]);
        assert_eq!(config.workers, 4);
        assert_eq!(config.platforms, vec!["twitter", "facebook"]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.drain_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_map(&[("RELAYHUB_WORKERS", "0"), ("RELAYHUB_PORT", "not-a-port")]);
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_socket_addr() {
        let mut config = GatewayConfig::default();
        config.bind_address = "127.0.0.1".to_string();
        config.port = 8080;
        assert_eq!(config.socket_addr().unwrap().port(), 8080);

        config.bind_address = "not an ip".to_string();
        assert!(config.socket_addr().is_err());
    }
}
