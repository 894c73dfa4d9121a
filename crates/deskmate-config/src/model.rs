use std::path::PathBuf;

use deskmate_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Candidate models in preference order. Each has its own quota on the backend.
pub const DEFAULT_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemma-3-27b-it",
    "gemma-3-12b-it",
    "gemma-3-4b-it",
    "gemma-3-2b-it",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub nudges: NudgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Messages kept after the system prompt when building a model window.
    pub max_history: usize,
    /// Full loop executions attempted per turn before giving up.
    pub max_attempts: usize,
    pub call_timeout_secs: u64,
    /// Unread nudges pinned into the model window for a turn.
    pub nudge_limit: usize,
    /// IANA zone used for "today" in tools.
    pub timezone: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Replaces the built-in assistant persona when set.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_history: 6,
            max_attempts: 7,
            call_timeout_secs: 15,
            nudge_limit: 3,
            timezone: "Asia/Kuala_Lumpur".to_string(),
            temperature: 0.7,
            max_output_tokens: 2048,
            system_prompt: None,
        }
    }
}

/// The only backend the agent can bind to.
pub const SUPPORTED_PROVIDER: &str = "gemini";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub base_url: Option<String>,
    pub models: Vec<String>,
    /// Usually left empty in files and filled from `GEMINI_API_KEY*`.
    pub api_keys: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: SUPPORTED_PROVIDER.to_string(),
            base_url: None,
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            api_keys: Vec::new(),
        }
    }
}

impl LlmConfig {
    /// Non-empty keys in configured order, duplicates removed.
    pub fn api_key_list(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for key in &self.api_keys {
            let trimmed = key.trim();
            if trimmed.is_empty() || keys.iter().any(|k| k == trimmed) {
                continue;
            }
            keys.push(trimmed.to_string());
        }
        keys
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("deskmate.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgeConfig {
    pub scan_enabled: bool,
    pub scan_interval_secs: u64,
    pub stale_claim_days: i64,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            scan_enabled: true,
            scan_interval_secs: 3600,
            stale_claim_days: 7,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.llm.provider.trim().eq_ignore_ascii_case(SUPPORTED_PROVIDER) {
            return Err(Error::Config(format!(
                "unsupported llm.provider '{}' (only '{SUPPORTED_PROVIDER}' is available)",
                self.llm.provider
            )));
        }
        if self.agent.max_attempts == 0 {
            return Err(Error::Config("agent.max_attempts must be at least 1".into()));
        }
        if self.agent.max_history == 0 {
            return Err(Error::Config("agent.max_history must be at least 1".into()));
        }
        if self.agent.call_timeout_secs == 0 {
            return Err(Error::Config("agent.call_timeout_secs must be at least 1".into()));
        }
        if self.llm.models.iter().all(|m| m.trim().is_empty()) {
            return Err(Error::Config("llm.models must list at least one model".into()));
        }
        self.agent
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| Error::Config(format!("unknown timezone: '{}'", self.agent.timezone)))?;
        Ok(())
    }
}
