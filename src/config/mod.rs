//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Precedence: env > file > defaults

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    CookieSecure, GatewayConfig, HealthConfig, LogConfig, MetricsConfig, PoolConfig,
    RateLimitAlgorithm, RateLimitConfig, RateLimitRule, RetryConfig, RouteConfig, ServerConfig,
    SessionConfig, TimeoutConfig, TlsConfig, TokenKind, UpstreamConfig,
};
