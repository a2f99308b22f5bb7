//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables, optionally seeded
//! from a `.env` file. Everything except `AUTH_TOKEN` has a default.
//!
//! # Security Configuration
//!
//! - `AUTH_TOKEN`: shared bearer secret, required and non-empty
//! - `AUTH_FAILURE_LIMIT`: failed attempts per client per minute before 429 (0 = off)
//! - `TRUSTED_PROXIES`: comma-separated CIDR ranges whose forwarding headers are believed
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_ENABLED`: `true` to add the rate limit stage (default: `false`)
//! - `RATE_LIMIT_MAX_REQUESTS`: admitted requests per window per client (default: 100)
//! - `RATE_LIMIT_WINDOW`: window length as a duration string, e.g. `1m`, `30s`, `500ms`
//! - `RATE_LIMIT_STRATEGY`: `sliding_window` (default) or `token_bucket`
//! - `RATE_LIMIT_EVICTION_INTERVAL`: idle key sweep period (default: the window)
//! - `CHAIN_ORDER`: `auth_first` (default) or `rate_limit_first`

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::limiter::{Strategy, WindowConfig};
use crate::middleware::StageOrder;

/// Default rate limit window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Shared bearer secret. Must not be empty.
    pub auth_token: String,

    /// Failed authentications per client per minute before the client is
    /// answered 429 (0 = guard disabled)
    pub auth_failure_limit: u32,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Whether the rate limit stage is part of the chain (default: false)
    pub rate_limit_enabled: bool,

    /// Admitted requests per window per client (default: 100, 0 = reject all)
    pub rate_limit_max_requests: u32,

    /// Window length (default: 1 minute)
    pub rate_limit_window: Duration,

    /// Admission strategy (default: sliding window)
    pub rate_limit_strategy: Strategy,

    /// Eviction sweep period; `None` means one window
    pub rate_limit_eviction_interval: Option<Duration>,

    /// Relative order of the auth and rate limit stages
    pub chain_order: StageOrder,

    /// Trusted proxy CIDR ranges for IP spoofing mitigation.
    ///
    /// Forwarding headers are only believed if the connection originates from
    /// one of these networks. Empty trusts every peer, which is only safe
    /// behind a proxy that overwrites the headers.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value is unparsable or invalid
    /// (missing `AUTH_TOKEN`, zero window, unknown strategy or chain order).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            // Server
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT", defaults.port)?,

            // Authentication
            auth_token: lookup("AUTH_TOKEN").unwrap_or_default(),
            auth_failure_limit: parse_var(&lookup, "AUTH_FAILURE_LIMIT", 0)?,

            // Rate limiting
            rate_limit_enabled: match lookup("RATE_LIMIT_ENABLED") {
                Some(value) => parse_bool("RATE_LIMIT_ENABLED", &value)?,
                None => defaults.rate_limit_enabled,
            },
            rate_limit_max_requests: parse_var(
                &lookup,
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            )?,
            rate_limit_window: match lookup("RATE_LIMIT_WINDOW") {
                Some(value) => parse_duration("RATE_LIMIT_WINDOW", &value)?,
                None => defaults.rate_limit_window,
            },
            rate_limit_strategy: parse_var(
                &lookup,
                "RATE_LIMIT_STRATEGY",
                defaults.rate_limit_strategy,
            )?,
            rate_limit_eviction_interval: lookup("RATE_LIMIT_EVICTION_INTERVAL")
                .map(|value| parse_duration("RATE_LIMIT_EVICTION_INTERVAL", &value))
                .transpose()?,
            chain_order: parse_var(&lookup, "CHAIN_ORDER", defaults.chain_order)?,
            trusted_proxies: lookup("TRUSTED_PROXIES")
                .map(|s| parse_list(&s))
                .unwrap_or_default(),

            // Observability
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            metrics_port: parse_var(&lookup, "METRICS_PORT", defaults.metrics_port)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.auth_token.is_empty() {
            return Err(AppError::ConfigError(
                "AUTH_TOKEN must be set to a non-empty value".to_string(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_eviction_interval.is_some_and(|d| d.is_zero()) {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_EVICTION_INTERVAL must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Limiter parameters.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the window is zero.
    pub fn window_config(&self) -> AppResult<WindowConfig> {
        Ok(WindowConfig::new(
            self.rate_limit_max_requests,
            self.rate_limit_window,
        )?)
    }

    /// Period of the idle key sweep.
    pub fn eviction_interval(&self) -> Duration {
        self.rate_limit_eviction_interval
            .unwrap_or(self.rate_limit_window)
    }

    /// Check if the auth failure guard is enabled.
    pub fn auth_failure_guard_enabled(&self) -> bool {
        self.auth_failure_limit > 0
    }

    /// Check if trusted proxy validation is enabled.
    pub fn proxy_validation_enabled(&self) -> bool {
        !self.trusted_proxies.is_empty()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }
}

/// Parse a variable into the specified type, falling back to `default`.
fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}

/// Parse a human-readable duration such as `1m`, `30s` or `1h 30m`.
///
/// # Errors
///
/// Returns `AppError::ConfigError` naming `name` if the value is not a
/// duration.
pub fn parse_duration(name: &str, value: &str) -> AppResult<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| AppError::ConfigError(format!("Invalid {name} '{value}': {e}")))
}

fn parse_bool(name: &str, value: &str) -> AppResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(AppError::ConfigError(format!(
            "Invalid {name}: expected true or false, got '{other}'"
        ))),
    }
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// `auth_token` is empty and so fails [`Config::validate`]; production
/// deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth_token: String::new(),
            auth_failure_limit: 0,
            rate_limit_enabled: false,
            rate_limit_max_requests: 100,
            rate_limit_window: DEFAULT_WINDOW,
            rate_limit_strategy: Strategy::SlidingWindow,
            rate_limit_eviction_interval: None,
            chain_order: StageOrder::AuthFirst,
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth_token", &"<redacted>")
            .field("auth_failure_limit", &self.auth_failure_limit)
            .field("rate_limit_enabled", &self.rate_limit_enabled)
            .field("rate_limit_max_requests", &self.rate_limit_max_requests)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_strategy", &self.rate_limit_strategy)
            .field(
                "rate_limit_eviction_interval",
                &self.rate_limit_eviction_interval,
            )
            .field("chain_order", &self.chain_order)
            .field("trusted_proxies", &self.trusted_proxies)
            .field("log_level", &self.log_level)
            .field("metrics_port", &self.metrics_port)
            .finish()
    }
}
