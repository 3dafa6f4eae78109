use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::game::constants::net::SWEEP_INTERVAL_MS;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// WebTransport port
    pub port: u16,
    /// Prometheus endpoint port
    pub metrics_port: u16,
    /// Upper bound on live sessions held in memory
    pub max_sessions: usize,
    /// Heartbeat sweep period
    pub sweep_interval_ms: u64,
    /// Drop board and history from pushed snapshots
    pub bandwidth_saving: bool,
    /// File store root; in-memory store when unset
    pub data_dir: Option<PathBuf>,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum connections per IP address
    pub max_connections_per_ip: usize,
    /// Commands per second allowed per connection
    pub max_commands_per_second: u32,
    /// Path to TLS certificate file
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            metrics_port: 9090,
            max_sessions: 10_000,
            sweep_interval_ms: SWEEP_INTERVAL_MS,
            bandwidth_saving: false,
            data_dir: None,
            max_connections: 5_000,
            max_connections_per_ip: 8,
            max_commands_per_second: 20,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

/// Parse `name` into `T`, keeping `current` (with a warning) on bad input
fn env_parse<T: std::str::FromStr>(name: &str, current: T, valid: impl Fn(&T) -> bool) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(parsed) if valid(&parsed) => parsed,
            Ok(_) => {
                tracing::warn!("{} '{}' out of range, using default", name, raw);
                current
            }
            Err(_) => {
                tracing::warn!("Invalid {} '{}', using default", name, raw);
                current
            }
        },
        Err(_) => current,
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let d = Self::default();

        let bind_address = env_parse("BIND_ADDRESS", d.bind_address, |_| true);
        let port = env_parse("PORT", d.port, |p| *p > 0);
        let metrics_port = env_parse("METRICS_PORT", d.metrics_port, |p| *p > 0);
        let max_sessions = env_parse("MAX_SESSIONS", d.max_sessions, |n| (1..=1_000_000).contains(n));
        let sweep_interval_ms =
            env_parse("SWEEP_INTERVAL_MS", d.sweep_interval_ms, |n| (50..=60_000).contains(n));
        let bandwidth_saving = env_parse("BANDWIDTH_SAVING", d.bandwidth_saving, |_| true);
        let max_connections = env_parse("MAX_CONNECTIONS", d.max_connections, |n| *n > 0);
        let max_connections_per_ip =
            env_parse("MAX_CONNECTIONS_PER_IP", d.max_connections_per_ip, |n| *n > 0);
        let max_commands_per_second =
            env_parse("MAX_COMMANDS_PER_SECOND", d.max_commands_per_second, |n| *n > 0);

        let data_dir = std::env::var("DATA_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Self {
            bind_address,
            port,
            metrics_port,
            max_sessions,
            sweep_interval_ms,
            bandwidth_saving,
            data_dir,
            max_connections,
            max_connections_per_ip,
            max_commands_per_second,
            tls_cert_path: std::env::var("TLS_CERT_PATH").ok(),
            tls_key_path: std::env::var("TLS_KEY_PATH").ok(),
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.port == self.metrics_port {
            return Err("PORT and METRICS_PORT must differ".to_string());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be at least 1".to_string());
        }
        if self.max_connections_per_ip > self.max_connections {
            return Err("max_connections_per_ip cannot exceed max_connections".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4433);
        assert_eq!(config.sweep_interval_ms, 1_000);
        assert!(!config.bandwidth_saving);
        assert!(config.data_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.port > 0);
    }

    #[test]
    fn test_validate_rejects_half_tls() {
        let config = ServerConfig {
            tls_cert_path: Some("cert.pem".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_port_clash() {
        let config = ServerConfig {
            metrics_port: 4433,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
