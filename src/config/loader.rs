//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{GatewayConfig, TlsConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
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

/// Parse a configuration file without validating it.
pub fn read_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let config = read_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build the effective configuration: optional file, then process
/// environment overrides, then validation.
pub fn resolve_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let config = match path {
        Some(path) => read_config(path)?,
        None => GatewayConfig::default(),
    };
    let config = apply_env(config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply environment overrides on top of a configuration.
///
/// Recognized variables: `LISTEN`, `CERT_PATH`, `KEY_PATH`, `JWT_KEY`,
/// `JWT_COOKIE`, `DEBUG`.
pub fn apply_env<F>(mut config: GatewayConfig, lookup: F) -> GatewayConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(listen) = lookup("LISTEN") {
        config.listener.bind_address = listen;
    }

    let cert = lookup("CERT_PATH");
    let key = lookup("KEY_PATH");
    if cert.is_some() || key.is_some() {
        let tls = config.listener.tls.get_or_insert_with(TlsConfig::default);
        if let Some(cert) = cert {
            tls.cert_path = cert;
        }
        if let Some(key) = key {
            tls.key_path = key;
        }
    }

    if let Some(secret) = lookup("JWT_KEY") {
        config.auth.jwt_key = secret;
    }
    if let Some(cookie) = lookup("JWT_COOKIE") {
        config.auth.cookie_name = cookie;
    }

    if let Some(debug) = lookup("DEBUG") {
        config.observability.debug = !matches!(debug.trim(), "0" | "false" | "off");
    }

    config
}
