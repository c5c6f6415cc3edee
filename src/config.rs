use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::RetryLimits;
use crate::evaluator::GroqConfig;
use crate::evaluator::groq::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::scheduler::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub queue: QueueConfig,
    pub evaluator: EvaluatorConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub requests_per_minute: u32,
    pub retry_delay_base_secs: u64,
    pub max_retry_delay_secs: u64,
    pub max_retries: u32,
    pub long_retry_delay_secs: u64,
    pub max_long_retries: u32,
    pub poll_timeout_ms: u64,
    pub cleanup_interval_secs: u64,
    pub status_retention_hours: u64,
    pub shutdown_grace_secs: u64,
    pub evaluator_timeout_secs: u64,
    pub fault_backoff_secs: u64,
    pub pause_recheck_secs: u64,
    pub store_poll_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 10,
            retry_delay_base_secs: 30,
            max_retry_delay_secs: 300,
            max_retries: 5,
            long_retry_delay_secs: 600,
            max_long_retries: 6,
            poll_timeout_ms: 1000,
            cleanup_interval_secs: 3600,
            status_retention_hours: 24,
            shutdown_grace_secs: 5,
            evaluator_timeout_secs: 90,
            fault_backoff_secs: 5,
            pause_recheck_secs: 30,
            store_poll_secs: 30,
        }
    }
}

impl QueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_delay_base: Duration::from_secs(self.retry_delay_base_secs),
            max_retry_delay: Duration::from_secs(self.max_retry_delay_secs),
            long_retry_delay: Duration::from_secs(self.long_retry_delay_secs),
        }
    }

    pub fn retry_limits(&self) -> RetryLimits {
        RetryLimits {
            max_retries: self.max_retries,
            max_long_retries: self.max_long_retries,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn status_retention(&self) -> Duration {
        Duration::from_secs(self.status_retention_hours.saturating_mul(3600))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn evaluator_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluator_timeout_secs)
    }

    pub fn fault_backoff(&self) -> Duration {
        Duration::from_secs(self.fault_backoff_secs)
    }

    pub fn pause_recheck_delay(&self) -> Duration {
        Duration::from_secs(self.pause_recheck_secs)
    }

    pub fn store_poll_interval(&self) -> Duration {
        Duration::from_secs(self.store_poll_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_ms: u64,
    pub api_key_env: String,
    pub backup_api_key_env: Option<String>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout_ms: 60000,
            api_key_env: "GROQ_API_KEY".to_string(),
            backup_api_key_env: Some("GROQ_API_KEY_BACKUP".to_string()),
        }
    }
}

impl EvaluatorConfig {
    pub fn groq_config(&self) -> GroqConfig {
        GroqConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("evalq"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            queue: QueueConfig::default(),
            evaluator: EvaluatorConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_queue_knobs() {
        let queue = QueueConfig::default();
        assert_eq!(queue.requests_per_minute, 10);
        assert_eq!(queue.retry_limits(), RetryLimits::default());
        assert_eq!(queue.retry_policy(), RetryPolicy::default());
        assert_eq!(queue.poll_timeout(), Duration::from_secs(1));
        assert_eq!(queue.status_retention(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_huge_retention_saturates() {
        let queue = QueueConfig {
            status_retention_hours: u64::MAX,
            ..Default::default()
        };
        assert_eq!(queue.status_retention(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
queue:
  requests_per_minute: 30
  max_retries: 3
evaluator:
  model: llama-3.1-8b-instant
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.queue.requests_per_minute, 30);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.max_long_retries, 6);
        assert_eq!(config.evaluator.model, "llama-3.1-8b-instant");
        assert_eq!(config.evaluator.api_key_env, "GROQ_API_KEY");
    }

    #[test]
    fn test_groq_config_mapping() {
        let evaluator = EvaluatorConfig {
            timeout_ms: 1500,
            ..Default::default()
        };
        let groq = evaluator.groq_config();
        assert_eq!(groq.timeout, Duration::from_millis(1500));
        assert_eq!(groq.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "storage:\n  data_dir: /tmp/evalq-test\nlog_level: debug").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/evalq-test"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let missing = PathBuf::from("/nonexistent/evalq.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }
}
