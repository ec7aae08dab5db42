//! Environment-driven configuration.

use std::env;
use std::net::SocketAddr;

/// Runtime settings, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Socket the server binds to.
    pub server_addr: SocketAddr,
    /// Default log level when RUST_LOG is unset.
    pub log_level: String,
    /// Comma-separated browser origins allowed by CORS. Unset means any.
    pub client_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms inject PORT; SERVER_ADDR is the local override.
        let server_addr = match env::var("PORT") {
            Ok(port) => format!("0.0.0.0:{port}"),
            Err(_) => env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        };
        let server_addr = server_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        Ok(Self {
            server_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").ok(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,
}
