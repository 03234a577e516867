// src/config/models.rs
use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub url: Url,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default)]
    pub algorithm: LoadBalancerAlgorithm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerAlgorithm {
    RoundRobin,
    /// Pick the healthy backend with the lowest recent average response time.
    #[default]
    LeastResponseTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Upper bound on the backend connect + response-header round trip.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("At least one backend must be configured");
        }
        for backend in &self.backends {
            if backend.url.host_str().is_none() {
                bail!("Backend URL has no host: {}", backend.url);
            }
            match backend.url.scheme() {
                "http" | "https" => {}
                other => bail!(
                    "Unsupported backend scheme '{}' in {}",
                    other,
                    backend.url
                ),
            }
        }
        if self.health_check.interval_ms == 0 {
            bail!("health_check.interval_ms must be greater than zero");
        }
        if self.health_check.timeout_ms == 0 {
            bail!("health_check.timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_ms: default_health_interval_ms(),
            timeout_ms: default_health_timeout_ms(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_listen_port() -> u16 {
    80
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_health_interval_ms() -> u64 {
    10_000
}

fn default_health_timeout_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let yaml = r#"
backends:
  - url: "http://localhost:8080"
  - url: "http://localhost:8081"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listen_port, 80);
        assert_eq!(config.health_check.path, "/");
        assert_eq!(config.health_check.interval_ms, 10_000);
        assert_eq!(config.health_check.timeout_ms, 2_000);
        assert_eq!(
            config.load_balancer.algorithm,
            LoadBalancerAlgorithm::LeastResponseTime
        );
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_algorithm_parsing() {
        let yaml = r#"
backends:
  - url: "http://localhost:8080"
load_balancer:
  algorithm: round_robin
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.load_balancer.algorithm,
            LoadBalancerAlgorithm::RoundRobin
        );
    }

    #[test]
    fn test_empty_backends_rejected() {
        let yaml = "backends: []";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_scheme_rejected() {
        let yaml = r#"
backends:
  - url: "ftp://localhost:2121"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
