//! Command line and environment configuration.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use playground_session::OrchestratorConfig;

/// Neural network playground server.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "PLAYGROUND_ADDR", default_value = "127.0.0.1:3001")]
    pub addr: SocketAddr,

    /// Deadline for one training session, in seconds.
    #[arg(long, env = "PLAYGROUND_SESSION_TIMEOUT_SECS", default_value_t = 300)]
    pub session_timeout_secs: u64,

    /// Epochs used when a request does not specify them.
    #[arg(long, env = "PLAYGROUND_DEFAULT_EPOCHS", default_value_t = 50)]
    pub default_epochs: u32,

    /// Batch size used when a request does not specify it.
    #[arg(long, env = "PLAYGROUND_DEFAULT_BATCH_SIZE", default_value_t = 32)]
    pub default_batch_size: usize,

    /// Allowed CORS origin. Any origin is allowed when unset.
    #[arg(long, env = "CLIENT_URL")]
    pub client_url: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, env = "PLAYGROUND_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    #[must_use]
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            default_epochs: self.default_epochs,
            default_batch_size: self.default_batch_size,
            ..OrchestratorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["playground-server"]).unwrap();
        assert_eq!(config.addr, "127.0.0.1:3001".parse::<SocketAddr>().unwrap());
        assert!(!config.log_json);

        let orchestrator = config.orchestrator();
        assert_eq!(orchestrator.session_timeout, Duration::from_secs(300));
        assert_eq!(orchestrator.default_epochs, 50);
        assert_eq!(orchestrator.default_batch_size, 32);
    }

    #[test]
    fn test_overrides() {
        let config = Config::try_parse_from([
            "playground-server",
            "--addr",
            "0.0.0.0:8080",
            "--session-timeout-secs",
            "30",
            "--client-url",
            "http://localhost:3000",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.orchestrator().session_timeout, Duration::from_secs(30));
        assert_eq!(config.client_url.as_deref(), Some("http://localhost:3000"));
        assert!(config.log_json);
    }
}
