//! Configuration model.
//!
//! Two layers live here: the core `Options` (what a `BalancerBuilder`
//! consumes to assemble a balancer instance), and the demo proxy's `Config`
//! (what `rpc-proxy` loads from a TOML file on disk — backends,
//! API-key/rate-limit wiring, method routing, health-check tuning).

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Deserialize;

use crate::base::DoneHandler;
use crate::doctor::PingHandler;
use std::sync::Arc;

// ---------------------------------------------------------------------
// Core balancer options
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DoctorOptions {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub spec: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatisticOptions {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub port: u16,
}

/// Aggregates everything a `BalancerBuilder` needs to assemble a
/// `BalancerInstance`. `done_handler`/`ping_handler` are optional injection
/// points and are not (de)serializable — they are set programmatically.
#[derive(Clone, Deserialize)]
pub struct Options {
    pub name: String,
    pub r#type: String,
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub cache_size: usize,
    #[serde(default)]
    pub net_param: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub doctor: DoctorOptions,
    #[serde(default)]
    pub statistic: StatisticOptions,
    #[serde(skip)]
    pub done_handler: Option<DoneHandler>,
    #[serde(skip)]
    pub ping_handler: Option<Arc<dyn PingHandler>>,
}

impl Default for DoctorOptions {
    fn default() -> Self {
        Self {
            enable: false,
            r#type: String::new(),
            spec: String::new(),
        }
    }
}

impl Default for StatisticOptions {
    fn default() -> Self {
        Self {
            enable: false,
            port: 0,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("name", &self.name)
            .field("type", &self.r#type)
            .field("timeout", &self.timeout)
            .field("cache_size", &self.cache_size)
            .field("net_param", &self.net_param)
            .field("urls", &self.urls)
            .field("doctor", &self.doctor)
            .field("statistic", &self.statistic)
            .finish()
    }
}

pub const DEFAULT_TIMEOUT_SECS: i64 = 30;

impl Options {
    /// Effective timeout in seconds: `timeout` defaults to 30 when <= 0.
    pub fn effective_timeout(&self) -> i64 {
        if self.timeout <= 0 {
            DEFAULT_TIMEOUT_SECS
        } else {
            self.timeout
        }
    }
}

// ---------------------------------------------------------------------
// Demo proxy configuration (TOML, loaded by `rpc-proxy`)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_method")]
    pub method: String,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_consecutive")]
    pub consecutive_successes_threshold: u32,
    #[serde(default = "default_consecutive")]
    pub consecutive_failures_threshold: u32,
}

fn default_health_method() -> String {
    "getHealth".to_string()
}
fn default_health_timeout() -> u64 {
    5
}
fn default_health_interval() -> u64 {
    10
}
fn default_consecutive() -> u32 {
    3
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            method: default_health_method(),
            timeout_secs: default_health_timeout(),
            interval_secs: default_health_interval(),
            consecutive_successes_threshold: default_consecutive(),
            consecutive_failures_threshold: default_consecutive(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    #[serde(default)]
    pub redis_url: String,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub method_routes: HashMap<String, String>,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

#[derive(Debug, Clone)]
pub struct ConfigError(String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl From<String> for ConfigError {
    fn from(s: String) -> Self {
        ConfigError(s)
    }
}

/// Load and validate a `Config` from a TOML file on disk.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("config file not found: {path}: {e}")))?;

    let config: Config =
        toml::from_str(&content).map_err(|e| ConfigError(format!("invalid TOML config: {e}")))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.redis_url.trim().is_empty() {
        return Err(ConfigError("Redis URL must not be empty".to_string()));
    }

    if config.backends.is_empty() {
        return Err(ConfigError(
            "At least one backend must be configured".to_string(),
        ));
    }

    let mut seen_labels = HashSet::new();
    for backend in &config.backends {
        if backend.label.trim().is_empty() {
            return Err(ConfigError(format!(
                "backend {:?} has an empty label",
                backend.url
            )));
        }
        if backend.weight == 0 {
            return Err(ConfigError(format!(
                "backend {} has weight 0, weight must be >= 1",
                backend.label
            )));
        }
        if !seen_labels.insert(backend.label.clone()) {
            return Err(ConfigError(format!(
                "Duplicate backend labels: {}",
                backend.label
            )));
        }
    }

    if config.proxy.timeout_secs == 0 {
        return Err(ConfigError(
            "proxy.timeout_secs must be greater than 0".to_string(),
        ));
    }

    for (method, label) in &config.method_routes {
        if !config.backends.iter().any(|b| &b.label == label) {
            return Err(ConfigError(format!(
                "method_routes[{method}] references unknown backend label: {label}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_config(name: &str, content: &str) -> String {
        let mut path = std::env::temp_dir();
        path.push(format!("rpc_balancer_test_config_{name}.toml"));
        std::fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn load_config_valid() {
        let path = write_temp_config(
            "valid",
            r#"
port = 8080
redis_url = "redis://localhost"

[[backends]]
label = "b1"
url = "http://localhost:9000"
weight = 1
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].label, "b1");
    }

    #[test]
    fn load_config_file_not_found() {
        let err = load_config("/tmp/rpc_balancer_nonexistent_config.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn load_config_invalid_toml() {
        let path = write_temp_config("invalid_toml", "this is not valid toml {{{{");
        let err = load_config(&path).unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn load_config_empty_redis_url() {
        let path = write_temp_config(
            "empty_redis",
            r#"
port = 8080
redis_url = ""

[[backends]]
label = "b1"
url = "http://localhost:9000"
weight = 1
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Redis URL"));
    }

    #[test]
    fn load_config_no_backends() {
        let path = write_temp_config(
            "no_backends",
            r#"
port = 8080
redis_url = "redis://localhost"
backends = []
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("At least one backend"));
    }

    #[test]
    fn load_config_duplicate_labels() {
        let path = write_temp_config(
            "dup_labels",
            r#"
port = 8080
redis_url = "redis://localhost"

[[backends]]
label = "same"
url = "http://localhost:9000"
weight = 1

[[backends]]
label = "same"
url = "http://localhost:9001"
weight = 1
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Duplicate backend labels"));
    }

    #[test]
    fn load_config_zero_weight() {
        let path = write_temp_config(
            "zero_weight",
            r#"
port = 8080
redis_url = "redis://localhost"

[[backends]]
label = "bad-backend"
url = "http://localhost:9000"
weight = 0
"#,
        );
        let err = load_config(&path).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("weight 0"));
        assert!(msg.contains("bad-backend"));
    }

    #[test]
    fn load_config_empty_label() {
        let path = write_temp_config(
            "empty_label",
            r#"
port = 8080
redis_url = "redis://localhost"

[[backends]]
label = ""
url = "http://localhost:9000"
weight = 1
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("empty label"));
    }

    #[test]
    fn load_config_zero_proxy_timeout() {
        let path = write_temp_config(
            "zero_timeout",
            r#"
port = 8080
redis_url = "redis://localhost"

[[backends]]
label = "b1"
url = "http://localhost:9000"
weight = 1

[proxy]
timeout_secs = 0
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn load_config_unknown_method_route() {
        let path = write_temp_config(
            "bad_method_route",
            r#"
port = 8080
redis_url = "redis://localhost"

[[backends]]
label = "b1"
url = "http://localhost:9000"
weight = 1

[method_routes]
getSlot = "nonexistent"
"#,
        );
        let err = load_config(&path).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nonexistent"));
        assert!(msg.contains("unknown backend label"));
    }
}
