// Gateway configuration
//
// Loaded from an optional JSON file with TORII_* environment overrides.
// Defaults match the behavior the web player and module scripts expect.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fallback User-Agent, used only when the client tunneled no User-Agent and
/// sent none of its own. Kept explicit here rather than buried at a call
/// site so the substitution is visible in configuration.
pub const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Runtime configuration for the proxy gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Address the gateway listens on.
    pub listen_addr: String,
    /// Public route of the gateway. Rewritten HLS manifest lines point here,
    /// so this must match whatever path the front-end is configured to use.
    pub gateway_path: String,
    /// Substituted when no User-Agent is tunneled and the client sent none.
    pub fallback_user_agent: String,
    /// Upstream request timeout in seconds. Generous, since media segments
    /// can be large.
    pub request_timeout_secs: u64,
    /// Maximum redirects to follow before giving up.
    pub redirect_limit: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8800".to_string(),
            gateway_path: "/proxy".to_string(),
            fallback_user_agent: FALLBACK_USER_AGENT.to_string(),
            request_timeout_secs: 300,
            redirect_limit: 10,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from an optional JSON file, then apply environment
    /// overrides (`TORII_LISTEN_ADDR`, `TORII_GATEWAY_PATH`,
    /// `TORII_USER_AGENT`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str(&text)?
            }
            None => Self::default(),
        };

        if let Ok(addr) = std::env::var("TORII_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(path) = std::env::var("TORII_GATEWAY_PATH") {
            config.gateway_path = path;
        }
        if let Ok(agent) = std::env::var("TORII_USER_AGENT") {
            config.fallback_user_agent = agent;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.gateway_path, "/proxy");
        assert_eq!(config.redirect_limit, 10);
        assert!(config.fallback_user_agent.contains("Mozilla/5.0"));
    }

    #[test]
    fn test_partial_json() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"listenAddr": "0.0.0.0:9000"}"#).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.gateway_path, "/proxy");
    }
}
