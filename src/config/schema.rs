//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS, admission control).
    pub server: ServerConfig,

    /// Route definitions mapping requests to upstreams.
    pub routes: Vec<RouteConfig>,

    /// Session and token validation settings.
    pub session: SessionConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Upstream client configuration.
    pub upstream: UpstreamConfig,

    /// Logging configuration.
    pub log: LogConfig,

    /// Health endpoint configuration.
    pub health: HealthConfig,

    /// Metrics endpoint configuration.
    pub metrics: MetricsConfig,

    /// Fail startup if the session or rate-limit store is unreachable.
    pub require_store_on_start: bool,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0").
    pub bind_address: String,

    /// Listener port.
    pub port: u16,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum in-flight requests; excess is rejected with 503.
    pub max_in_flight: usize,

    /// Maximum request body size in bytes.
    pub request_body_max: usize,

    /// Add gateway-owned security headers to responses when absent.
    pub security_headers: bool,

    /// Content-Security-Policy value emitted when security headers are on.
    pub content_security_policy: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
            max_in_flight: 10_000,
            request_body_max: 10 * 1024 * 1024,
            security_headers: true,
            content_security_policy: None,
        }
    }
}

impl ServerConfig {
    /// Combined listener address.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Whether TLS termination is enabled.
    pub fn tls_enabled(&self) -> bool {
        self.tls.as_ref().map(|t| t.enabled).unwrap_or(false)
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS termination.
    pub enabled: bool,

    /// Path to certificate file (PEM).
    pub cert: String,

    /// Path to private key file (PEM).
    pub key: String,

    /// Minimum TLS protocol version ("1.2" or "1.3").
    pub min_version: String,

    /// Allowed cipher suites; empty = library defaults.
    pub ciphers: Vec<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert: String::new(),
            key: String::new(),
            min_version: "1.2".to_string(),
            ciphers: Vec::new(),
        }
    }
}

/// Route configuration mapping requests to an upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Unique route identifier for logging/metrics.
    pub id: String,

    /// Path pattern: literal segments, `{name}` captures, optional trailing
    /// `*` or `{rest*}` wildcard.
    pub path: String,

    /// Allowed HTTP methods.
    pub methods: Vec<String>,

    /// Upstream base URL requests are forwarded to.
    pub upstream: String,

    /// Whether a valid session is required.
    #[serde(default = "default_auth_required")]
    pub auth_required: bool,

    /// Permission sets; the caller must hold every permission in at least
    /// one set. Empty = no permission check.
    #[serde(default)]
    pub permissions: Vec<Vec<String>>,

    /// Optional per-route rate limit rule (falls back to the global default).
    #[serde(default)]
    pub rate_limit: Option<RateLimitRule>,

    /// Optional per-route timeout overrides.
    #[serde(default)]
    pub timeouts: Option<TimeoutConfig>,

    /// Optional per-route retry override.
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Forward the session cookie to the upstream instead of stripping it.
    #[serde(default)]
    pub pass_session: bool,

    /// Allow token refresh on this route.
    #[serde(default = "default_refresh_allowed")]
    pub refresh_allowed: bool,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

fn default_auth_required() -> bool {
    true
}

fn default_refresh_allowed() -> bool {
    true
}

/// Session and token validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session cookie.
    pub cookie_name: String,

    /// Token shape: "opaque", "signed", or "auto" (detect by format).
    pub token_kind: TokenKind,

    /// Session store URL (redis://...); None uses the in-process store.
    pub store_url: Option<String>,

    /// Secret for HMAC verification of signed tokens. Required when
    /// signed tokens are in use; minimum 32 bytes.
    pub signing_secret: Option<String>,

    /// Token lifetime in seconds, used when refreshing.
    pub token_ttl_secs: u64,

    /// Enable sliding token refresh.
    pub refresh_enabled: bool,

    /// Refresh when remaining TTL drops below this many seconds.
    pub refresh_threshold_secs: u64,

    /// Reject sessions idle for longer than this; None disables the check.
    pub idle_ttl_secs: Option<u64>,

    /// Reject sessions whose bound IP differs from the client IP.
    pub bind_ip: bool,

    /// Secure flag policy for refreshed session cookies.
    pub cookie_secure: CookieSecure,

    /// Roles that pass every permission check unconditionally.
    pub super_roles: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session_token".to_string(),
            token_kind: TokenKind::Auto,
            store_url: None,
            signing_secret: None,
            token_ttl_secs: 3600,
            refresh_enabled: true,
            refresh_threshold_secs: 300,
            idle_ttl_secs: None,
            bind_ip: false,
            cookie_secure: CookieSecure::Auto,
            super_roles: vec!["admin".to_string()],
        }
    }
}

/// Token shape selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Token is a session id; all claims live in the store.
    Opaque,
    /// Token is `header.payload.sig`, HMAC-verified without a lookup.
    Signed,
    /// Detect per token: two dot separators means signed.
    Auto,
}

/// Policy for the Secure flag on session cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieSecure {
    /// Set Secure iff the listener terminates TLS.
    Auto,
    Always,
    Never,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Rate limit store URL (redis://...); None uses the in-process store.
    pub store_url: Option<String>,

    /// Store-unavailable behavior when a rule does not set its own flag.
    pub fail_open: bool,

    /// Fallback rule applied to routes without their own.
    pub default: Option<RateLimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_url: None,
            fail_open: false,
            default: None,
        }
    }
}

/// A single rate limiting rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitRule {
    /// Algorithm evaluating the rule.
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,

    /// Requests allowed per window; for the token bucket this is the
    /// sustained refill amount per window.
    pub limit: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Bucket capacity for the token bucket; defaults to `limit`.
    #[serde(default)]
    pub burst: Option<u32>,

    /// Key template composed from `{ip}`, `{user}`, `{route}` and literals.
    #[serde(default = "default_key_template")]
    pub key: String,

    /// Store-unavailable behavior; None inherits the global flag.
    #[serde(default)]
    pub fail_open: Option<bool>,
}

fn default_key_template() -> String {
    "{ip}".to_string()
}

/// Rate limiting algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    #[default]
    TokenBucket,
    FixedWindow,
    SlidingWindow,
}

/// Upstream client configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Connection pool settings.
    pub pool: PoolConfig,

    /// Default timeouts; routes may override.
    pub timeouts: TimeoutConfig,

    /// Default retry policy; routes may override.
    pub retry: RetryConfig,
}

/// Connection pool settings, shared across all requests in the process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum idle connections kept per upstream host.
    pub per_host: usize,

    /// Idle connection lifetime in seconds.
    pub idle_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            per_host: 32,
            idle_seconds: 60,
        }
    }
}

/// Timeouts for upstream requests.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Timeout waiting for response bytes in milliseconds.
    pub read_ms: u64,

    /// End-to-end deadline for the forwarded request in milliseconds.
    pub overall_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            read_ms: 30_000,
            overall_ms: 60_000,
        }
    }
}

/// Retry configuration for idempotent upstream requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 2,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format ("json" or "pretty").
    pub format: String,

    /// Header names whose values are redacted from logs.
    pub redact_headers: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            redact_headers: vec![
                "Authorization".to_string(),
                "Cookie".to_string(),
                "Set-Cookie".to_string(),
                "X-API-Key".to_string(),
                "Proxy-Authorization".to_string(),
            ],
        }
    }
}

/// Health endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Admin bind address serving /health/live and /health/ready.
    pub bind_address: String,

    /// Interval between store probes in seconds.
    pub probe_interval_secs: u64,

    /// A store probe older than this marks the gateway not ready.
    pub freshness_window_secs: u64,

    /// Concurrency cap for admin endpoints.
    pub max_concurrent: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:9090".to_string(),
            probe_interval_secs: 5,
            freshness_window_secs: 15,
            max_concurrent: 8,
        }
    }
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    pub enabled: bool,

    /// Bind address for the /metrics listener.
    pub bind_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:9091".to_string(),
        }
    }
}
