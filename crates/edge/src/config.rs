//! Edge configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `EATECH_UPSTREAM_URL` - Origin of the EATECH backend (e.g., <https://app.eatech.ch>)
//!
//! ## Optional
//! - `EATECH_HOST` - Bind address (default: 127.0.0.1)
//! - `EATECH_PORT` - Listen port (default: 8787)
//! - `EATECH_DATABASE_URL` - `SQLite` URL of the queue store (default: sqlite://eatech-edge.db?mode=rwc)
//! - `EATECH_CACHE_VERSION` - Cache version tag (default: v + crate version)
//! - `EATECH_API_TOKEN` - Bearer token sent with queued submissions (high entropy)
//! - `EATECH_API_TIMEOUT_MS` - Network-first deadline for API reads (default: 3000)
//! - `EATECH_NAVIGATION_TIMEOUT_MS` - Network-first deadline for pages (default: 5000)
//! - `EATECH_PRECACHE` - Comma-separated app shell paths
//! - `EATECH_SKIP_WAITING` - Activate right after install (default: true)
//! - `EATECH_PROBE_INTERVAL_SECS` - Connectivity probe interval (default: 30)
//! - `EATECH_SYNC_INTERVAL_SECS` - Periodic sync interval (default: 300)
//! - `EATECH_SYNC_MAX_ATTEMPTS` - Dead-letter after this many failures (default: never)
//! - `EATECH_SYNC_BACKOFF_BASE_SECS` - First retry delay (default: 5)
//! - `EATECH_SYNC_BACKOFF_MAX_SECS` - Retry delay cap (default: 900)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Trace sample rate (default: 1.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::lifecycle::DEFAULT_PRECACHE;
use crate::router::RouterTimeouts;
use crate::sync::RetryPolicy;

/// Queue store used when `EATECH_DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://eatech-edge.db?mode=rwc";
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Edge application configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct EdgeConfig {
    /// Backend origin every request is forwarded to
    pub upstream_url: Url,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// `SQLite` URL of the durable queue store
    pub database_url: SecretString,
    /// Version tag embedded in every cache name
    pub cache_version: String,
    /// Bearer token for queued submissions
    pub api_token: Option<SecretString>,
    /// Network-first deadlines
    pub timeouts: RouterTimeouts,
    /// Paths fetched into the static cache on install
    pub precache: Vec<String>,
    /// Activate immediately after a successful install
    pub skip_waiting: bool,
    /// Interval between connectivity probes
    pub probe_interval: Duration,
    /// Interval between periodic drains of every queue
    pub sync_interval: Duration,
    /// Retry schedule for failed deliveries
    pub retry: RetryPolicy,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "production", "staging")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

impl std::fmt::Debug for EdgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeConfig")
            .field("upstream_url", &self.upstream_url.as_str())
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &"[REDACTED]")
            .field("cache_version", &self.cache_version)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeouts", &self.timeouts)
            .field("precache", &self.precache)
            .field("skip_waiting", &self.skip_waiting)
            .field("probe_interval", &self.probe_interval)
            .field("sync_interval", &self.sync_interval)
            .field("retry", &self.retry)
            .field("sentry_dsn", &self.sentry_dsn)
            .field("sentry_environment", &self.sentry_environment)
            .finish_non_exhaustive()
    }
}

impl EdgeConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API token fails validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let upstream_url = parse_upstream_url(&get_required_env("EATECH_UPSTREAM_URL")?)?;
        let host = parse_env("EATECH_HOST", IpAddr::from([127, 0, 0, 1]))?;
        let port = parse_env("EATECH_PORT", 8787)?;
        let database_url =
            SecretString::from(get_env_or_default("EATECH_DATABASE_URL", DEFAULT_DATABASE_URL));
        let cache_version = get_env_or_default(
            "EATECH_CACHE_VERSION",
            &format!("v{}", env!("CARGO_PKG_VERSION")),
        );
        validate_cache_version(&cache_version)?;

        let api_token = get_optional_env("EATECH_API_TOKEN")
            .map(|token| {
                validate_secret_strength(&token, "EATECH_API_TOKEN")?;
                Ok(SecretString::from(token))
            })
            .transpose()?;

        let timeouts = RouterTimeouts {
            api: Duration::from_millis(parse_env("EATECH_API_TIMEOUT_MS", 3000)?),
            navigation: Duration::from_millis(parse_env(
                "EATECH_NAVIGATION_TIMEOUT_MS",
                5000,
            )?),
        };
        let precache = get_optional_env("EATECH_PRECACHE").map_or_else(
            || DEFAULT_PRECACHE.iter().map(ToString::to_string).collect(),
            |list| parse_list(&list),
        );
        let skip_waiting = parse_env("EATECH_SKIP_WAITING", true)?;
        let probe_interval = parse_interval("EATECH_PROBE_INTERVAL_SECS", 30)?;
        let sync_interval = parse_interval("EATECH_SYNC_INTERVAL_SECS", 300)?;

        let retry = RetryPolicy {
            max_attempts: parse_optional_env("EATECH_SYNC_MAX_ATTEMPTS")?,
            base_delay: Duration::from_secs(parse_env("EATECH_SYNC_BACKOFF_BASE_SECS", 5)?),
            max_delay: Duration::from_secs(parse_env("EATECH_SYNC_BACKOFF_MAX_SECS", 900)?),
        };

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);

        Ok(Self {
            upstream_url,
            host,
            port,
            database_url,
            cache_version,
            api_token,
            timeouts,
            precache,
            skip_waiting,
            probe_interval,
            sync_interval,
            retry,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Configuration for a given upstream with every optional value at its default.
    #[must_use]
    pub fn with_upstream(upstream_url: Url) -> Self {
        Self {
            upstream_url,
            host: IpAddr::from([127, 0, 0, 1]),
            port: 8787,
            database_url: SecretString::from(DEFAULT_DATABASE_URL),
            cache_version: format!("v{}", env!("CARGO_PKG_VERSION")),
            api_token: None,
            timeouts: RouterTimeouts::default(),
            precache: DEFAULT_PRECACHE.iter().map(ToString::to_string).collect(),
            skip_waiting: true,
            probe_interval: Duration::from_secs(30),
            sync_interval: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 1.0,
        }
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| parse_value(key, &raw))
}

/// Parse an environment variable that has no default.
fn parse_optional_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key)
        .map(|raw| parse_value(key, &raw))
        .transpose()
}

/// A non-zero interval in seconds.
fn parse_interval(key: &str, default: u64) -> Result<Duration, ConfigError> {
    match parse_env(key, default)? {
        0 => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be at least 1 second".to_string(),
        )),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// The upstream must be an absolute http(s) origin.
fn parse_upstream_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEnvVar("EATECH_UPSTREAM_URL".to_string(), reason);
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Version tags become part of cache names, which split on `-`.
fn validate_cache_version(version: &str) -> Result<(), ConfigError> {
    if version.is_empty()
        || !version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_'))
    {
        return Err(ConfigError::InvalidEnvVar(
            "EATECH_CACHE_VERSION".to_string(),
            "use letters, digits, '.' and '_' only".to_string(),
        ));
    }
    Ok(())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated token."
            ),
        ));
    }

    Ok(())
}
