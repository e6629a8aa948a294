use crate::errors::{ConfigError, ConfigResult};
use crate::types::Secret;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Per-branch deadline for remote adapters
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;
/// Maximum turns kept per session, system turn included
pub const DEFAULT_HISTORY_MAX_TURNS: usize = 20;
/// Connectivity flaps shorter than this collapse into one transition
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
/// Fixed confidence of rule-based answers
pub const DEFAULT_LOCAL_CONFIDENCE: u8 = 40;
/// Confidence attached to generative answers
pub const DEFAULT_AI_CONFIDENCE: u8 = 90;
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_PROBE_URL: &str = "https://www.gstatic.com/generate_204";
pub const DEFAULT_AI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_AI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_AI_MAX_TOKENS: u32 = 800;
pub const DEFAULT_AI_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_SEARCH_MAX_RESULTS: usize = 5;

const APP_NAME: &str = "dietec";

/// Generative text provider settings
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct AiProviderConfig {
    pub base_url: Option<String>,
    pub api_key: Option<Secret>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub confidence: Option<u8>,
}

impl AiProviderConfig {
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            base_url: other.base_url.clone().or_else(|| self.base_url.clone()),
            api_key: other.api_key.clone().or_else(|| self.api_key.clone()),
            model: other.model.clone().or_else(|| self.model.clone()),
            max_tokens: other.max_tokens.or(self.max_tokens),
            temperature: other.temperature.or(self.temperature),
            confidence: other.confidence.or(self.confidence),
        }
    }
}

/// One external search/knowledge source
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SearchSourceConfig {
    pub name: String,
    pub endpoint: String,
    pub api_key: Option<Secret>,
    pub max_results: Option<usize>,
}

/// Connectivity probe settings
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ProbeConfig {
    pub url: Option<String>,
    pub interval_secs: Option<u64>,
}

/// Configuration for the query engine
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub remote_timeout_secs: Option<u64>,
    pub history_max_turns: Option<usize>,
    pub debounce_ms: Option<u64>,
    pub local_confidence: Option<u8>,
    pub ai: Option<AiProviderConfig>,
    pub search_sources: Option<Vec<SearchSourceConfig>>,
    pub probe: Option<ProbeConfig>,
}

impl EngineConfig {
    /// Loads configuration from a file if it exists, otherwise returns the default config
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            debug!(path = %path.display(), "Loaded engine configuration");
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads from the default location, then applies environment overrides
    pub fn load_from_default() -> ConfigResult<Self> {
        let path = get_default_config_file()?;
        let mut config = Self::load_from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a file
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, content)?;
        Ok(())
    }

    /// Merges this config with another config, preferring values from the other config if present
    pub fn merge(&self, other: &Self) -> Self {
        let ai = match (&self.ai, &other.ai) {
            (Some(mine), Some(theirs)) => Some(mine.merge(theirs)),
            (mine, theirs) => theirs.clone().or_else(|| mine.clone()),
        };

        Self {
            remote_timeout_secs: other.remote_timeout_secs.or(self.remote_timeout_secs),
            history_max_turns: other.history_max_turns.or(self.history_max_turns),
            debounce_ms: other.debounce_ms.or(self.debounce_ms),
            local_confidence: other.local_confidence.or(self.local_confidence),
            ai,
            search_sources: other
                .search_sources
                .clone()
                .or_else(|| self.search_sources.clone()),
            probe: other.probe.clone().or_else(|| self.probe.clone()),
        }
    }

    /// Reads credentials from the environment (and a `.env` file, if present).
    ///
    /// `DIETEC_AI_API_KEY` wins over `OPENAI_API_KEY`. `DIETEC_SEARCH_API_KEY`
    /// fills search sources that have no key of their own.
    pub fn apply_env_overrides(&mut self) {
        dotenvy::dotenv().ok();

        let ai_key = std::env::var("DIETEC_AI_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        if let Some(key) = ai_key {
            let ai = self.ai.get_or_insert_with(AiProviderConfig::default);
            ai.api_key = Some(Secret::new(key));
            debug!("AI provider credential taken from environment");
        }

        if let Ok(key) = std::env::var("DIETEC_SEARCH_API_KEY") {
            if let Some(sources) = self.search_sources.as_mut() {
                for source in sources.iter_mut().filter(|s| s.api_key.is_none()) {
                    source.api_key = Some(Secret::new(key.clone()));
                }
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.remote_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "remote_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if matches!(self.history_max_turns, Some(n) if n < 2) {
            return Err(ConfigError::Invalid(
                "history_max_turns must keep the system turn and at least one exchange turn"
                    .to_string(),
            ));
        }
        if matches!(self.local_confidence, Some(c) if c > 100) {
            return Err(ConfigError::Invalid(
                "local_confidence must be between 0 and 100".to_string(),
            ));
        }
        if let Some(sources) = &self.search_sources {
            if let Some(source) = sources.iter().find(|s| s.endpoint.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "search source '{}' has no endpoint",
                    source.name
                )));
            }
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(
            self.remote_timeout_secs
                .unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS),
        )
    }

    pub fn history_max_turns(&self) -> usize {
        self.history_max_turns.unwrap_or(DEFAULT_HISTORY_MAX_TURNS)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS))
    }

    pub fn local_confidence(&self) -> u8 {
        self.local_confidence.unwrap_or(DEFAULT_LOCAL_CONFIDENCE)
    }

    pub fn probe_url(&self) -> String {
        self.probe
            .as_ref()
            .and_then(|p| p.url.clone())
            .unwrap_or_else(|| DEFAULT_PROBE_URL.to_string())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(
            self.probe
                .as_ref()
                .and_then(|p| p.interval_secs)
                .unwrap_or(DEFAULT_PROBE_INTERVAL_SECS),
        )
    }
}

/// Helper function to get default config directory
pub fn get_default_config_dir() -> ConfigResult<PathBuf> {
    let home_dir = dirs::home_dir().ok_or_else(|| {
        ConfigError::Invalid("Could not determine home directory".to_string())
    })?;

    Ok(home_dir.join(".config").join(APP_NAME))
}

/// Helper function to get default config file path
pub fn get_default_config_file() -> ConfigResult<PathBuf> {
    Ok(get_default_config_dir()?.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_documented_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.remote_timeout(), Duration::from_secs(15));
        assert_eq!(config.history_max_turns(), 20);
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.local_confidence(), 40);
    }

    #[test]
    fn test_missing_file_yields_default() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load_from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = EngineConfig {
            remote_timeout_secs: Some(12),
            history_max_turns: Some(8),
            ai: Some(AiProviderConfig {
                model: Some("gpt-4o-mini".to_string()),
                api_key: Some(Secret::new("sk-test")),
                ..Default::default()
            }),
            search_sources: Some(vec![SearchSourceConfig {
                name: "health-kb".to_string(),
                endpoint: "https://kb.example.org/search".to_string(),
                api_key: None,
                max_results: Some(3),
            }]),
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "remote_timeout_secs = \"soon\"").unwrap();

        let err = EngineConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_merge_prefers_other() {
        let base = EngineConfig {
            remote_timeout_secs: Some(10),
            history_max_turns: Some(6),
            ai: Some(AiProviderConfig {
                model: Some("base-model".to_string()),
                temperature: Some(0.1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = EngineConfig {
            remote_timeout_secs: Some(30),
            ai: Some(AiProviderConfig {
                model: Some("overlay-model".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = base.merge(&overlay);
        assert_eq!(merged.remote_timeout_secs, Some(30));
        assert_eq!(merged.history_max_turns, Some(6));
        let ai = merged.ai.unwrap();
        assert_eq!(ai.model.as_deref(), Some("overlay-model"));
        assert_eq!(ai.temperature, Some(0.1));
    }

    #[test]
    fn test_validate_rejects_tiny_history() {
        let config = EngineConfig {
            history_max_turns: Some(1),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = EngineConfig {
            remote_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
