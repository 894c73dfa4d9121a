use std::path::{Path, PathBuf};

use deskmate_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// Environment variables holding Gemini API keys, in rotation order.
pub const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GEMINI_API_KEY_2", "GEMINI_API_KEY_3"];

pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Load the file (if any), apply process environment overrides and validate.
    pub fn load(&self) -> Result<AppConfig> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable lookup.
    pub fn load_with_env<F>(&self, env: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.path {
            Some(path) if path.exists() => Self::read_file(path)?,
            Some(path) => {
                info!("config file {} not found, using defaults", path.display());
                AppConfig::default()
            }
            None => AppConfig::default(),
        };
        apply_env_overrides(&mut config, env)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<AppConfig> {
        let raw = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        debug!("loading config from {}", path.display());
        match ext.as_str() {
            "toml" => toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("invalid toml in {}: {e}", path.display()))),
            "yaml" | "yml" | "" => serde_yaml::from_str(&raw)
                .map_err(|e| Error::Config(format!("invalid yaml in {}: {e}", path.display()))),
            other => Err(Error::Config(format!(
                "unsupported config extension '.{other}' (expected .yaml, .yml or .toml)"
            ))),
        }
    }
}

fn apply_env_overrides<F>(config: &mut AppConfig, env: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let from_env: Vec<String> = API_KEY_VARS
        .iter()
        .filter_map(|var| env(var))
        .filter(|v| !v.trim().is_empty())
        .collect();
    if !from_env.is_empty() {
        config.llm.api_keys = from_env;
    }

    if let Some(path) = env("DESKMATE_DB_PATH").filter(|v| !v.is_empty()) {
        config.database.path = PathBuf::from(path);
    }
    if let Some(host) = env("DESKMATE_HOST").filter(|v| !v.is_empty()) {
        config.gateway.host = host;
    }
    if let Some(port) = env("DESKMATE_PORT").filter(|v| !v.is_empty()) {
        config.gateway.port = port
            .parse()
            .map_err(|_| Error::Config(format!("DESKMATE_PORT is not a port number: '{port}'")))?;
    }
    if let Some(tz) = env("DESKMATE_TIMEZONE").filter(|v| !v.is_empty()) {
        config.agent.timezone = tz;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loader = ConfigLoader::new(Some(PathBuf::from("/nonexistent/deskmate.yaml")));
        let config = loader.load_with_env(env_of(&[])).unwrap();
        assert_eq!(config.gateway.port, 8000);
        assert!(config.llm.api_keys.is_empty());
    }

    #[test]
    fn yaml_file_is_parsed() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "gateway:\n  port: 9100\nagent:\n  max_history: 4\nllm:\n  models: [gemini-2.5-flash, gemma-3-4b-it]"
        )
        .unwrap();

        let config = ConfigLoader::new(Some(file.path().to_path_buf()))
            .load_with_env(env_of(&[]))
            .unwrap();
        assert_eq!(config.gateway.port, 9100);
        assert_eq!(config.agent.max_history, 4);
        assert_eq!(config.agent.max_attempts, 7);
        assert_eq!(config.llm.models, vec!["gemini-2.5-flash", "gemma-3-4b-it"]);
    }

    #[test]
    fn toml_file_is_parsed() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[database]\npath = \"/tmp/dm.db\"\n[nudges]\nstale_claim_days = 3").unwrap();

        let config = ConfigLoader::new(Some(file.path().to_path_buf()))
            .load_with_env(env_of(&[]))
            .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/dm.db"));
        assert_eq!(config.nudges.stale_claim_days, 3);
    }

    #[test]
    fn env_keys_replace_file_keys_in_order() {
        let config = ConfigLoader::new(None)
            .load_with_env(env_of(&[
                ("GEMINI_API_KEY", "AIza-first"),
                ("GEMINI_API_KEY_3", "AIza-third"),
                ("DESKMATE_PORT", "8123"),
            ]))
            .unwrap();
        assert_eq!(config.llm.api_keys, vec!["AIza-first", "AIza-third"]);
        assert_eq!(config.gateway.port, 8123);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = ConfigLoader::new(None)
            .load_with_env(env_of(&[("DESKMATE_PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("DESKMATE_PORT"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = ConfigLoader::new(Some(file.path().to_path_buf()))
            .load_with_env(env_of(&[]))
            .unwrap_err();
        assert!(err.to_string().contains(".ini"));
    }

    #[test]
    fn unsupported_provider_in_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "llm:\n  provider: openai").unwrap();

        let err = ConfigLoader::new(Some(file.path().to_path_buf()))
            .load_with_env(env_of(&[]))
            .unwrap_err();
        assert!(err.to_string().contains("llm.provider 'openai'"));
    }
}
