use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::CoreError;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "TASKFLOW_CONFIG";

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    pub id: String,
    #[serde(default = "SchedulerSection::default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,
}

impl SchedulerSection {
    const fn default_max_concurrent_handlers() -> usize {
        64
    }
}

/// Connection details for the execution queue client. Opaque to the core —
/// consumed only by whichever `ExecutionQueueClient` implementation the
/// embedding binary wires up.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub credentials_env: Option<String>,
}

/// Connection details for the broker client. Opaque to the core.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub credentials_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default = "LoggingConfig::default_audit_log_dir")]
    pub audit_log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            audit_log_dir: Self::default_audit_log_dir(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_audit_log_dir() -> PathBuf {
        PathBuf::from("data/audit")
    }
}

/// Helper to load configuration with fail-fast validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `TASKFLOW_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory.
    pub fn load(path: Option<PathBuf>) -> Result<SchedulerConfig, CoreError> {
        let candidate = resolve_path(path)?;
        let raw = fs::read_to_string(&candidate)
            .map_err(|err| CoreError::config_io(candidate.clone(), err))?;
        let config: SchedulerConfig = toml::from_str(&raw)
            .map_err(|err| CoreError::InvalidConfiguration(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &SchedulerConfig) -> Result<(), CoreError> {
        if config.scheduler.id.trim().is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "scheduler.id must be non-empty".into(),
            ));
        }
        if config.scheduler.max_concurrent_handlers == 0 {
            return Err(CoreError::InvalidConfiguration(
                "scheduler.max_concurrent_handlers must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Result<PathBuf, CoreError> {
    if let Some(path) = path {
        return Ok(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return Ok(PathBuf::from(from_env));
        }
    }

    Ok(Path::new(DEFAULT_CONFIG_PATH).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_scheduler_id() {
        let config = SchedulerConfig {
            scheduler: SchedulerSection {
                id: "  ".to_string(),
                max_concurrent_handlers: 8,
            },
            queue: QueueConfig::default(),
            broker: BrokerConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn accepts_minimal_config() {
        let config = SchedulerConfig {
            scheduler: SchedulerSection {
                id: "default".to_string(),
                max_concurrent_handlers: 8,
            },
            queue: QueueConfig::default(),
            broker: BrokerConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(ConfigLoader::validate(&config).is_ok());
    }
}
