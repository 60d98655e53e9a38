//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{GatekeeperError, Result};
use crate::http::{HeaderKey, RateLimitState, API_KEY_HEADER};
use crate::ratelimit::{Quota, RateLimiter, RateLimiterConfig, SweepPolicy};

/// Prefix for environment variable overrides, e.g.
/// `GATEKEEPER__RATE_LIMITING__MAX_REQUESTS=500`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// How requests are mapped to client keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Authenticated identity, else client IP
    #[default]
    Client,
    /// Client IP only
    Ip,
    /// `API-Key` header, else client IP
    ApiKey,
    /// The header named by `key_header`, else client IP
    Header,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Seconds between idle-bucket sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Seconds without a refill after which a bucket is evicted
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,

    /// Optional cap on tracked client keys
    #[serde(default)]
    pub max_tracked_keys: Option<usize>,

    /// Client key policy
    #[serde(default)]
    pub key_policy: KeyPolicy,

    /// Header read by the `header` policy
    #[serde(default = "default_key_header")]
    pub key_header: String,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            sweep_interval_secs: default_sweep_interval(),
            idle_threshold_secs: default_idle_threshold(),
            max_tracked_keys: None,
            key_policy: KeyPolicy::default(),
            key_header: default_key_header(),
        }
    }
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    600
}

fn default_idle_threshold() -> u64 {
    1800
}

fn default_key_header() -> String {
    API_KEY_HEADER.to_string()
}

impl RateLimitingConfig {
    /// The validated per-key quota.
    pub fn quota(&self) -> Result<Quota> {
        Quota::new(self.max_requests, Duration::from_secs(self.window_secs))
    }

    /// The idle eviction schedule.
    pub fn sweep_policy(&self) -> Result<SweepPolicy> {
        if self.sweep_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(SweepPolicy {
            interval: Duration::from_secs(self.sweep_interval_secs),
            idle_threshold: Duration::from_secs(self.idle_threshold_secs),
        })
    }

    /// Full limiter settings.
    pub fn limiter_config(&self) -> Result<RateLimiterConfig> {
        let max_tracked_keys = match self.max_tracked_keys {
            Some(max) => Some(NonZeroUsize::new(max).ok_or_else(|| {
                GatekeeperError::Config("max_tracked_keys must be greater than zero".to_string())
            })?),
            None => None,
        };

        Ok(RateLimiterConfig {
            quota: self.quota()?,
            sweep: self.sweep_policy()?,
            max_tracked_keys,
        })
    }

    /// Middleware state for `limiter` using the configured key policy.
    pub fn middleware_state(&self, limiter: Arc<RateLimiter>) -> Result<RateLimitState> {
        let state = match self.key_policy {
            KeyPolicy::Client => RateLimitState::per_client(limiter),
            KeyPolicy::Ip => RateLimitState::per_ip(limiter),
            KeyPolicy::ApiKey => RateLimitState::per_api_key(limiter),
            KeyPolicy::Header => RateLimitState::new(
                limiter,
                Arc::new(HeaderKey::new(&self.key_header)?),
                "Rate limit exceeded. Please try again later.",
            ),
        };
        Ok(state)
    }
}

impl GatekeeperConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `GATEKEEPER__`-prefixed environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(GatekeeperError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| GatekeeperError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.server.listen_addr, default_listen_addr());

        let limits = config.rate_limiting;
        assert_eq!(limits.max_requests, 100);
        assert_eq!(limits.window_secs, 60);
        assert_eq!(limits.key_policy, KeyPolicy::Client);
        assert_eq!(limits.key_header, "API-Key");
        assert_eq!(limits.sweep_policy().unwrap(), SweepPolicy::default());
        assert_eq!(limits.quota().unwrap().refill_interval(), Duration::from_millis(600));
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
rate_limiting:
  max_requests: 1000
  window_secs: 3600
  key_policy: api_key
  max_tracked_keys: 50000
"#;

        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);

        let limits = &config.rate_limiting;
        assert_eq!(limits.key_policy, KeyPolicy::ApiKey);
        assert_eq!(limits.idle_threshold_secs, 1800);

        let limiter = limits.limiter_config().unwrap();
        assert_eq!(limiter.quota.refill_interval(), Duration::from_millis(3600));
        assert_eq!(limiter.max_tracked_keys, NonZeroUsize::new(50000));
    }

    #[test]
    fn test_from_yaml_invalid() {
        let result = GatekeeperConfig::from_yaml("rate_limiting: [1, 2]");
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_zero_requests_rejected() {
        let limits = RateLimitingConfig {
            max_requests: 0,
            ..Default::default()
        };
        assert!(matches!(limits.quota(), Err(GatekeeperError::InvalidQuota(_))));
        assert!(limits.limiter_config().is_err());
    }

    #[test]
    fn test_zero_key_cap_rejected() {
        let limits = RateLimitingConfig {
            max_tracked_keys: Some(0),
            ..Default::default()
        };
        assert!(matches!(limits.limiter_config(), Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let limits = RateLimitingConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(limits.sweep_policy(), Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_header_policy_validates_header_name() {
        let limiter = Arc::new(RateLimiter::unswept(Quota::per_minute(10).unwrap()));
        let limits = RateLimitingConfig {
            key_policy: KeyPolicy::Header,
            key_header: "bad header".to_string(),
            ..Default::default()
        };
        assert!(limits.middleware_state(limiter).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = GatekeeperConfig::load(Some(Path::new("/nonexistent/gatekeeper.yaml")));
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("gatekeeper-test-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "rate_limiting:\n  max_requests: 7\n  window_secs: 7\n  key_policy: ip\n",
        )
        .unwrap();

        let config = GatekeeperConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.rate_limiting.max_requests, 7);
        assert_eq!(config.rate_limiting.key_policy, KeyPolicy::Ip);
        assert_eq!(config.server.listen_addr.port(), 8080);
    }
}
