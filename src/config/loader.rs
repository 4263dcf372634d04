use super::{ConfigError, ConfigProvider, EngineConfig, EnvConfigProvider};
use std::path::Path;
use tracing::debug;

impl EngineConfig {
    /// Load a config file, picking the format from its extension
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let path_label = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path_label.clone(),
                source,
            })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let config = Self::parse_str(&content, &extension).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path_label.clone(),
                message,
            },
            other => other,
        })?;

        debug!("Loaded engine configuration from {}", path_label);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration text in the given format (`toml`, `yaml`/`yml`, `json`)
    pub fn parse_str(content: &str, format: &str) -> Result<Self, ConfigError> {
        let parse_err = |message: String| ConfigError::Parse {
            path: "<inline>".to_string(),
            message,
        };

        match format {
            "toml" => toml::from_str(content).map_err(|e| parse_err(e.to_string())),
            "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string())),
            "json" => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Load an optional file, then layer `BATCHWISE_*` environment overrides
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) if p.exists() => Self::load_from_path(p).await?,
            _ => Self::default(),
        };
        base.with_env()
    }

    pub fn with_env(self) -> Result<Self, ConfigError> {
        let provider: &dyn ConfigProvider = &EnvConfigProvider::default();
        let config = self.with_overrides(provider)?;
        config.validate()?;
        Ok(config)
    }
}
