//! Configuration management for Turnstile.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{
    Clock, MemoryStore, Quota, RateLimiter, ShardedStore, Store, DEFAULT_MAX_REQUESTS,
    DEFAULT_WINDOW_MS, MAX_SWEEP_INTERVAL,
};

/// Prefix for environment overrides, e.g. `TURNSTILE__RATE_LIMITING__MAX_REQUESTS`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
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
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Key callers by `X-Forwarded-For` / `X-Real-IP` instead of the peer
    /// address. Only safe behind a proxy that overwrites those headers.
    #[serde(default = "default_trust_forwarded_headers")]
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_forwarded_headers: default_trust_forwarded_headers(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_trust_forwarded_headers() -> bool {
    true
}

/// Which [`Store`] implementation backs the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// One mutex around a `HashMap`
    Memory,
    /// `DashMap` with per-shard locks
    #[default]
    Sharded,
}

impl StoreKind {
    /// Build an empty store of this kind.
    pub fn build(self) -> Arc<dyn Store> {
        match self {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Sharded => Arc::new(ShardedStore::new()),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests admitted per key per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Seconds between sweeps of expired entries
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Backing store
    #[serde(default)]
    pub store: StoreKind,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            sweep_interval_secs: default_sweep_interval(),
            store: StoreKind::default(),
        }
    }
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

fn default_sweep_interval() -> u64 {
    60
}

impl RateLimitingConfig {
    /// The default quota described by this configuration.
    pub fn quota(&self) -> Result<Quota> {
        Quota::from_millis(self.max_requests, self.window_ms)
    }

    /// Time between sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Reject invalid quotas and sweep intervals outside `1..=86400` seconds.
    pub fn validate(&self) -> Result<()> {
        self.quota()?;
        if self.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval_secs > MAX_SWEEP_INTERVAL.as_secs() {
            return Err(TurnstileError::Config(format!(
                "sweep_interval_secs must be at most {}",
                MAX_SWEEP_INTERVAL.as_secs()
            )));
        }
        Ok(())
    }

    /// Build a limiter from this configuration.
    pub fn build_limiter(&self, clock: Arc<dyn Clock>) -> Result<RateLimiter> {
        let quota = self.quota()?;
        Ok(RateLimiter::with_parts(self.store.build(), clock).with_default_quota(quota))
    }
}

impl TurnstileConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, an optional YAML file and `TURNSTILE__*` environment
    /// variables, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        let config: TurnstileConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use tokio_test::{assert_err, assert_ok};

    // Tests that read the process environment through `load` hold this
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    fn temp_yaml(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("turnstile-{name}-{}.yaml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.rate_limiting.max_requests, 60);
        assert_eq!(config.rate_limiting.window_ms, 60_000);
        assert_eq!(config.rate_limiting.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.rate_limiting.store, StoreKind::Sharded);
        assert!(config.server.trust_forwarded_headers);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
rate_limiting:
  max_requests: 5
  store: memory
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limiting.max_requests, 5);
        assert_eq!(config.rate_limiting.window_ms, 60_000);
        assert_eq!(config.rate_limiting.store, StoreKind::Memory);
        assert_eq!(config.server.http_addr.port(), 8080);
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
server:
  http_addr: "0.0.0.0:9000"
  trust_forwarded_headers: false
rate_limiting:
  max_requests: 100
  window_ms: 1000
  sweep_interval_secs: 5
  store: sharded
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr.port(), 9000);
        assert!(!config.server.trust_forwarded_headers);
        let quota = config.rate_limiting.quota().unwrap();
        assert_eq!(quota.limit(), 100);
        assert_eq!(quota.window_ms(), 1000);
        assert_eq!(config.rate_limiting.sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_values_rejected() {
        let err = assert_err!(TurnstileConfig::from_yaml("rate_limiting:\n  max_requests: 0\n"));
        assert!(matches!(err, TurnstileError::InvalidQuota(_)));

        let err = assert_err!(TurnstileConfig::from_yaml("rate_limiting:\n  window_ms: 0\n"));
        assert!(matches!(err, TurnstileError::InvalidQuota(_)));

        let err = assert_err!(TurnstileConfig::from_yaml(
            "rate_limiting:\n  sweep_interval_secs: 0\n"
        ));
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_sweep_interval_upper_bound() {
        assert_ok!(TurnstileConfig::from_yaml("rate_limiting:\n  sweep_interval_secs: 86400\n"));

        let err = assert_err!(TurnstileConfig::from_yaml(
            "rate_limiting:\n  sweep_interval_secs: 86401\n"
        ));
        assert!(matches!(err, TurnstileError::Config(_)));

        let err = assert_err!(TurnstileConfig::from_yaml(
            "rate_limiting:\n  sweep_interval_secs: 18446744073709551615\n"
        ));
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let err = assert_err!(TurnstileConfig::from_yaml("rate_limiting: [1, 2"));
        assert!(matches!(err, TurnstileError::Config(_)));

        let err = assert_err!(TurnstileConfig::from_yaml("rate_limiting:\n  store: redis\n"));
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = assert_err!(TurnstileConfig::from_file("/nonexistent/turnstile.yaml"));
        assert!(matches!(err, TurnstileError::Io(_)));
    }

    #[test]
    fn test_load_layers_file() {
        let _env = ENV_LOCK.lock();
        let path = temp_yaml("file", "rate_limiting:\n  max_requests: 7\n  window_ms: 2500\n");

        let config = TurnstileConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.rate_limiting.max_requests, 7);
        assert_eq!(config.rate_limiting.window_ms, 2500);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 60);
    }

    #[test]
    fn test_load_env_overrides_file() {
        let _env = ENV_LOCK.lock();
        let path = temp_yaml(
            "env",
            "server:\n  trust_forwarded_headers: true\nrate_limiting:\n  max_requests: 7\n  store: sharded\n",
        );

        std::env::set_var("TURNSTILE__RATE_LIMITING__MAX_REQUESTS", "9");
        std::env::set_var("TURNSTILE__RATE_LIMITING__STORE", "memory");
        std::env::set_var("TURNSTILE__SERVER__TRUST_FORWARDED_HEADERS", "false");
        std::env::set_var("TURNSTILE__SERVER__HTTP_ADDR", "0.0.0.0:9100");

        let config = TurnstileConfig::load(Some(&path));

        std::env::remove_var("TURNSTILE__RATE_LIMITING__MAX_REQUESTS");
        std::env::remove_var("TURNSTILE__RATE_LIMITING__STORE");
        std::env::remove_var("TURNSTILE__SERVER__TRUST_FORWARDED_HEADERS");
        std::env::remove_var("TURNSTILE__SERVER__HTTP_ADDR");
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.rate_limiting.max_requests, 9);
        assert_eq!(config.rate_limiting.store, StoreKind::Memory);
        assert!(!config.server.trust_forwarded_headers);
        assert_eq!(config.server.http_addr.port(), 9100);
        // Untouched by either layer
        assert_eq!(config.rate_limiting.window_ms, 60_000);
    }

    #[test]
    fn test_load_env_invalid_value_rejected() {
        let _env = ENV_LOCK.lock();
        std::env::set_var("TURNSTILE__RATE_LIMITING__SWEEP_INTERVAL_SECS", "0");
        let result = TurnstileConfig::load(None);
        std::env::remove_var("TURNSTILE__RATE_LIMITING__SWEEP_INTERVAL_SECS");

        let err = assert_err!(result);
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_build_limiter_applies_quota() {
        let config = TurnstileConfig::from_yaml("rate_limiting:\n  max_requests: 2\n").unwrap();
        let limiter = config
            .rate_limiting
            .build_limiter(Arc::new(ManualClock::new(0)))
            .unwrap();

        assert_eq!(limiter.default_quota().limit(), 2);
        assert!(limiter.check_default("k").admitted);
        assert!(limiter.check_default("k").admitted);
        assert!(!limiter.check_default("k").admitted);
    }
}
