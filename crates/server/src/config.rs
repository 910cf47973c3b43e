//! Server configuration from environment variables.

use std::net::SocketAddr;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the server listens on.
    pub bind: SocketAddr,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// - `PARLEY_BIND`: listen address (default: "0.0.0.0:8080")
    pub fn from_env() -> Self {
        let bind = std::env::var("PARLEY_BIND")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));
        Self { bind }
    }
}
