//! Configuration loading from disk and environment.
//!
//! Precedence: environment variables > config file > built-in defaults.
//! Environment variables follow the pattern `GATEHOUSE_<SECTION>_<KEY>`,
//! e.g. `GATEHOUSE_SERVER_PORT=8080`.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env(String),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env(e) => write!(f, "Environment override error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file plus env overrides.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config: GatewayConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    apply_env_overrides(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults plus env overrides only.
///
/// Used when no config file is present (e.g. container deployments that
/// configure everything through the environment).
pub fn load_from_env() -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();
    apply_env_overrides(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut GatewayConfig) -> Result<(), ConfigError> {
    if let Ok(addr) = std::env::var("GATEHOUSE_SERVER_BIND_ADDRESS") {
        config.server.bind_address = addr;
    }
    if let Ok(port) = std::env::var("GATEHOUSE_SERVER_PORT") {
        config.server.port = port
            .parse()
            .map_err(|_| ConfigError::Env(format!("invalid GATEHOUSE_SERVER_PORT '{}'", port)))?;
    }
    if let Ok(max) = std::env::var("GATEHOUSE_SERVER_MAX_IN_FLIGHT") {
        config.server.max_in_flight = max.parse().map_err(|_| {
            ConfigError::Env(format!("invalid GATEHOUSE_SERVER_MAX_IN_FLIGHT '{}'", max))
        })?;
    }
    if let Ok(level) = std::env::var("GATEHOUSE_LOG_LEVEL") {
        config.log.level = level;
    }
    if let Ok(format) = std::env::var("GATEHOUSE_LOG_FORMAT") {
        config.log.format = format;
    }
    if let Ok(url) = std::env::var("GATEHOUSE_SESSION_STORE_URL") {
        config.session.store_url = Some(url);
    }
    if let Ok(secret) = std::env::var("GATEHOUSE_SESSION_SIGNING_SECRET") {
        config.session.signing_secret = Some(secret);
    }
    if let Ok(url) = std::env::var("GATEHOUSE_RATE_LIMIT_STORE_URL") {
        config.rate_limit.store_url = Some(url);
    }
    if let Ok(enabled) = std::env::var("GATEHOUSE_RATE_LIMIT_ENABLED") {
        config.rate_limit.enabled = enabled.eq_ignore_ascii_case("true");
    }
    if let Ok(addr) = std::env::var("GATEHOUSE_HEALTH_BIND_ADDRESS") {
        config.health.bind_address = addr;
    }
    if let Ok(addr) = std::env::var("GATEHOUSE_METRICS_BIND_ADDRESS") {
        config.metrics.bind_address = addr;
    }
    Ok(())
}
