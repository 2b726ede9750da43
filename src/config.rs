use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::ProxyError;

const DNS_PORT: u16 = 53;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the listener binds
    pub listen: SocketAddr,
    /// Resolver cache misses are forwarded to, `ip` or `ip:port`
    pub upstream: String,
    pub upstream_timeout_secs: u64,
    pub cache_file: PathBuf,
    pub sweep_interval_secs: u64,
    /// Cap on concurrently handled queries
    pub max_in_flight: usize,
    pub shutdown_grace_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DNS_PORT)),
            upstream: "8.8.8.8".to_owned(),
            upstream_timeout_secs: 5,
            cache_file: PathBuf::from("dns_cache.json"),
            sweep_interval_secs: 60,
            max_in_flight: 1024,
            shutdown_grace_secs: 5,
            log_level: "info".to_owned(),
        }
    }
}

impl Config {
    /// Reads `path` as TOML if given, otherwise starts from the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ProxyError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("{}: {e}", path.display())))?;

        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ProxyError> {
        toml::from_str(text).map_err(|e| ProxyError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        self.upstream_addr()?;

        if self.max_in_flight == 0 {
            return Err(ProxyError::Config("max_in_flight must be positive".to_owned()));
        }
        if self.upstream_timeout_secs == 0 {
            return Err(ProxyError::Config(
                "upstream_timeout_secs must be positive".to_owned(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ProxyError::Config(
                "sweep_interval_secs must be positive".to_owned(),
            ));
        }

        Ok(())
    }

    /// The upstream address, defaulting the port to 53.
    pub fn upstream_addr(&self) -> Result<SocketAddr, ProxyError> {
        if let Ok(addr) = self.upstream.parse::<SocketAddr>() {
            return Ok(addr);
        }

        self.upstream
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, DNS_PORT))
            .map_err(|_| ProxyError::Config(format!("invalid upstream `{}`", self.upstream)))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.listen.to_string(), "0.0.0.0:53");
        assert_eq!(config.upstream_addr().unwrap().to_string(), "8.8.8.8:53");
        assert_eq!(config.upstream_timeout(), Duration::from_secs(5));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            upstream = "1.1.1.1:5353"
            cache_file = "/var/lib/cachedns/cache.json"
            max_in_flight = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream_addr().unwrap().port(), 5353);
        assert_eq!(config.cache_file, PathBuf::from("/var/lib/cachedns/cache.json"));
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.sweep_interval_secs, 60);
    }

    #[test]
    fn ipv6_upstream_without_port() {
        let config = Config {
            upstream: "2001:4860:4860::8888".to_owned(),
            ..Config::default()
        };
        assert_eq!(
            config.upstream_addr().unwrap().to_string(),
            "[2001:4860:4860::8888]:53"
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_toml("listen_port = 53").is_err());

        let zero = Config {
            max_in_flight: 0,
            ..Config::default()
        };
        assert!(zero.validate().is_err());

        let bad_upstream = Config {
            upstream: "dns.google".to_owned(),
            ..Config::default()
        };
        assert!(matches!(bad_upstream.validate(), Err(ProxyError::Config(_))));
    }
}
