//! Configuration structs

mod app_config;
mod client_config;

pub use app_config::{
    AppConfig, AppSettings, ConfigError, Environment, JwtConfig, RealtimeConfig, ServerConfig,
    SnowflakeConfig,
};
pub use client_config::ClientConfig;

use std::env;
use std::str::FromStr;

/// Read and parse an optional environment variable
///
/// Unset variables yield `default`; set but unparsable ones are an error.
pub(crate) fn var_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(default),
    }
}
