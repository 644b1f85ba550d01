// ABOUTME: Agent credentials from a TOML file with environment overrides.
// ABOUTME: PARLEY_* variables win over file values; the api key is redacted in Debug.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use parley_link::{LinkConfig, DEFAULT_REST_URL, DEFAULT_WS_URL};

const DEFAULT_CONFIG_PATH: &str = "parley.toml";

/// Identity and endpoints for one agent.
///
/// Loaded from `parley.toml` (or `PARLEY_CONFIG_PATH`), then overridden by
/// `PARLEY_AGENT_ID`, `PARLEY_API_KEY`, `PARLEY_REST_URL`, `PARLEY_WS_URL`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentCredentials {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

fn default_rest_url() -> String {
    DEFAULT_REST_URL.to_string()
}

fn default_ws_url() -> String {
    DEFAULT_WS_URL.to_string()
}

impl Default for AgentCredentials {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            api_key: String::new(),
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
        }
    }
}

// Custom Debug impl to redact the api key
impl std::fmt::Debug for AgentCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCredentials")
            .field("agent_id", &self.agent_id)
            .field("api_key", &"[REDACTED]")
            .field("rest_url", &self.rest_url)
            .field("ws_url", &self.ws_url)
            .finish()
    }
}

impl AgentCredentials {
    /// Load from the default location (or `PARLEY_CONFIG_PATH`), apply env
    /// overrides, and validate. A missing file is fine as long as the env
    /// provides the required fields.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = std::env::var("PARLEY_CONFIG_PATH")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut credentials = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("invalid TOML in {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "No config file; using env only");
            Self::default()
        };

        credentials.apply_env_overrides();
        credentials.validate()?;
        Ok(credentials)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PARLEY_AGENT_ID") {
            self.agent_id = val;
        }
        if let Ok(val) = std::env::var("PARLEY_API_KEY") {
            self.api_key = val;
        }
        if let Ok(val) = std::env::var("PARLEY_REST_URL") {
            self.rest_url = val;
        }
        if let Ok(val) = std::env::var("PARLEY_WS_URL") {
            self.ws_url = val;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.agent_id.is_empty() {
            anyhow::bail!("agent_id is required (parley.toml or PARLEY_AGENT_ID)");
        }
        if self.api_key.is_empty() {
            anyhow::bail!("api_key is required (parley.toml or PARLEY_API_KEY)");
        }
        Ok(())
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::new(&self.agent_id, &self.api_key)
            .with_rest_url(&self.rest_url)
            .with_ws_url(&self.ws_url)
    }
}
