//! Named-setting providers used to override [`EngineConfig`](super::EngineConfig) fields

use super::ConfigError;
use humantime_serde::re::humantime;
use std::collections::HashMap;
use std::time::Duration;

/// Source of named settings such as `memory.warn_threshold_percent`
pub trait ConfigProvider: Send + Sync {
    /// Raw string value for a dotted setting name
    fn get(&self, key: &str) -> Option<String>;

    fn get_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        self.get(key).map(|v| parse(key, &v)).transpose()
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.get(key).map(|v| parse(key, &v)).transpose()
    }

    fn get_usize(&self, key: &str) -> Result<Option<usize>, ConfigError> {
        self.get(key).map(|v| parse(key, &v)).transpose()
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get(key)
            .map(|v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, &v)),
            })
            .transpose()
    }

    /// Durations accept humantime strings (`"250ms"`, `"5m"`) or bare milliseconds
    fn get_duration(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        self.get(key)
            .map(|v| {
                let trimmed = v.trim();
                if let Ok(ms) = trimmed.parse::<u64>() {
                    return Ok(Duration::from_millis(ms));
                }
                humantime::parse_duration(trimmed).map_err(|_| invalid(key, &v))
            })
            .transpose()
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// In-memory settings table
#[derive(Debug, Clone, Default)]
pub struct MapConfigProvider {
    values: HashMap<String, String>,
}

impl MapConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigProvider for MapConfigProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Reads `PREFIX_SECTION__FIELD` environment variables.
///
/// `memory.warn_threshold_percent` is looked up as
/// `BATCHWISE_MEMORY__WARN_THRESHOLD_PERCENT` with the default prefix.
#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: String,
}

impl EnvConfigProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_name(&self, key: &str) -> String {
        format!(
            "{}_{}",
            self.prefix,
            key.replace('.', "__").to_ascii_uppercase()
        )
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new("BATCHWISE")
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.variable_name(key)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let provider = MapConfigProvider::from_pairs([
            ("a", "1.5"),
            ("b", "42"),
            ("c", "yes"),
            ("d", "250ms"),
            ("e", "1500"),
        ]);

        assert_eq!(provider.get_f64("a").unwrap(), Some(1.5));
        assert_eq!(provider.get_u64("b").unwrap(), Some(42));
        assert_eq!(provider.get_bool("c").unwrap(), Some(true));
        assert_eq!(
            provider.get_duration("d").unwrap(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            provider.get_duration("e").unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(provider.get_u64("missing").unwrap(), None);
    }

    #[test]
    fn test_bool_rejects_garbage() {
        let provider = MapConfigProvider::from_pairs([("flag", "maybe")]);
        assert!(provider.get_bool("flag").is_err());
    }

    #[test]
    fn test_env_variable_name_mapping() {
        let provider = EnvConfigProvider::default();
        assert_eq!(
            provider.variable_name("memory.warn_threshold_percent"),
            "BATCHWISE_MEMORY__WARN_THRESHOLD_PERCENT"
        );
    }

    #[test]
    fn test_env_provider_reads_process_environment() {
        let provider = EnvConfigProvider::new("BATCHWISE_TEST_ENV_PROVIDER");
        std::env::set_var(
            "BATCHWISE_TEST_ENV_PROVIDER_BATCH__MIN_BATCH_SIZE",
            "7",
        );
        assert_eq!(provider.get_usize("batch.min_batch_size").unwrap(), Some(7));
        std::env::remove_var("BATCHWISE_TEST_ENV_PROVIDER_BATCH__MIN_BATCH_SIZE");
    }
}
