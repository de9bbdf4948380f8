/// Engine settings, loaded from RON. Every field has a default so a config
/// file only needs to name what it changes.
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::registry::DEFAULT_MAX_CONDITIONAL_DEPTH;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Retry policy for the write queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Ceiling for the exponential backoff.
    pub max_delay_ms: u64,
    /// Attempts before an effect is dead-lettered. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Add up to half a delay of random jitter.
    pub jitter: bool,
    /// Delivered effects kept for inspection; older ones are forgotten.
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: Some(25),
            jitter: true,
            history_limit: 256,
        }
    }
}

impl QueueConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// How long a prompt must stay unedited before its answer is saved.
    pub quiet_period_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 1_000,
        }
    }
}

impl AutosaveConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hero image used when nothing else resolves.
    pub placeholder_image: String,
    pub max_conditional_depth: usize,
    pub queue: QueueConfig,
    pub autosave: AutosaveConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            placeholder_image: "/placeholder.png".to_string(),
            max_conditional_depth: DEFAULT_MAX_CONDITIONAL_DEPTH,
            queue: QueueConfig::default(),
            autosave: AutosaveConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_ron(path: &Path) -> Result<EngineConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = ron::from_str(input)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.queue.base_delay_ms > self.queue.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "queue.base_delay_ms {} exceeds queue.max_delay_ms {}",
                self.queue.base_delay_ms, self.queue.max_delay_ms
            )));
        }
        if self.queue.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_conditional_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_conditional_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = EngineConfig::parse_ron("()").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.queue.max_attempts, Some(25));
        assert_eq!(config.placeholder_image, "/placeholder.png");
    }

    #[test]
    fn partial_config_overrides_named_fields() {
        let config = EngineConfig::parse_ron("(queue: (max_attempts: None, jitter: false))").unwrap();
        assert_eq!(config.queue.max_attempts, None);
        assert!(!config.queue.jitter);
        assert_eq!(config.queue.base_delay_ms, 1_000);
        assert_eq!(config.autosave.quiet_period(), Duration::from_secs(1));
    }

    #[test]
    fn shipped_config_loads() {
        let config = EngineConfig::load_from_ron(Path::new("config/engine.ron")).unwrap();
        assert_eq!(config.max_conditional_depth, 8);
        assert_eq!(config.queue.max_delay(), Duration::from_secs(30));
        assert_eq!(config.queue.history_limit, 256);
    }

    #[test]
    fn inconsistent_values_are_rejected() {
        assert!(matches!(
            EngineConfig::parse_ron("(queue: (base_delay_ms: 5000, max_delay_ms: 10))"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::parse_ron("(queue: (max_attempts: Some(0)))"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(EngineConfig::parse_ron("(queue: 3)"), Err(ConfigError::Ron(_))));
    }
}
