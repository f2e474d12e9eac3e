use crate::admission::DEFAULT_API_KEY_HEADER;
use crate::error::ConfigError;
use crate::gateway::GatewaySettings;
use axum::http::HeaderName;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Process configuration. Every flag falls back to an environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "gateway", version, about = "API admission gateway")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Path to the JSON policy document
    #[arg(long, env = "POLICY_FILE", default_value = "policy.json")]
    pub policy_file: PathBuf,

    /// Header carrying the caller's API key
    #[arg(long, env = "API_KEY_HEADER", default_value = DEFAULT_API_KEY_HEADER)]
    pub api_key_header: String,

    /// Upper bound on backend calls in flight across all routes
    #[arg(long, env = "MAX_CONCURRENT_BACKEND_CALLS", default_value_t = 64)]
    pub max_concurrent_backend_calls: usize,

    /// Largest request body accepted, in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn gateway_settings(&self) -> Result<GatewaySettings, ConfigError> {
        let api_key_header = HeaderName::try_from(self.api_key_header.to_ascii_lowercase())
            .map_err(|_| {
                ConfigError::InvalidSetting(format!(
                    "'{}' is not a valid header name",
                    self.api_key_header
                ))
            })?;
        if self.max_concurrent_backend_calls == 0 {
            return Err(ConfigError::InvalidSetting(
                "MAX_CONCURRENT_BACKEND_CALLS must be greater than 0".to_string(),
            ));
        }

        Ok(GatewaySettings {
            api_key_header,
            max_concurrent_backend_calls: self.max_concurrent_backend_calls,
            max_body_bytes: self.max_body_bytes,
        })
    }
}
