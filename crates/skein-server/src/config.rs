//! Endpoint configuration.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use skein_core::{SessionConfig, TransportKind};

use crate::error::ServerError;

/// Server configuration for the production runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:7070")
    pub bind_address: String,
    /// Transport served on that address
    pub transport: TransportKind,
    /// Settings applied to every accepted session
    pub session: SessionConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7070".to_string(),
            transport: TransportKind::Stream,
            session: SessionConfig::default(),
        }
    }
}

impl ServerRuntimeConfig {
    /// Parsed bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ServerError> {
        parse_addr(&self.bind_address)
    }

    /// Check the bind address and session settings.
    pub fn validate(&self) -> Result<(), ServerError> {
        self.bind_addr()?;
        self.session.validate()?;
        Ok(())
    }
}

pub(crate) fn parse_addr(address: &str) -> Result<SocketAddr, ServerError> {
    address
        .parse()
        .map_err(|e| ServerError::Config(format!("invalid address '{address}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ServerRuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_bind_address_is_a_config_error() {
        let config =
            ServerRuntimeConfig { bind_address: "not-an-address".into(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn invalid_session_settings_are_config_errors() {
        let mut config = ServerRuntimeConfig::default();
        config.session.read_queue_len = 0;
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }
}
