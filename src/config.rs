use crate::engine::{BucketAlignment, RealizationPrice};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub fills_path: PathBuf,
    pub quotes_path: PathBuf,
    pub output_path: PathBuf,
    pub decomposition_path: Option<PathBuf>,
    pub derive_decomposition: bool,
    pub diagnostics_path: Option<PathBuf>,
    pub carryover_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

/// Accounting parameters, independent of where the data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub bucket_width_ms: i64,
    pub alignment: BucketAlignment,
    pub realize_at: RealizationPrice,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bucket_width_ms: 60_000,
            alignment: BucketAlignment::Calendar,
            realize_at: RealizationPrice::Trade,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |name: &str| {
            env_map
                .get(name)
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
        };
        let optional = |name: &str| {
            env_map
                .get(name)
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
        };

        let fills_path = required("PNL_FILLS_PATH")?;
        let quotes_path = required("PNL_QUOTES_PATH")?;
        let output_path = required("PNL_OUTPUT_PATH")?;

        let derive_decomposition = match env_map
            .get("PNL_DERIVE_DECOMPOSITION")
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
            .unwrap_or("false")
        {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => {
                return Err(ConfigError::InvalidValue(
                    "PNL_DERIVE_DECOMPOSITION".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        Ok(Config {
            fills_path,
            quotes_path,
            output_path,
            decomposition_path: optional("PNL_DECOMPOSITION_PATH"),
            derive_decomposition,
            diagnostics_path: optional("PNL_DIAGNOSTICS_PATH"),
            carryover_path: optional("PNL_CARRYOVER_PATH"),
            engine: EngineConfig::from_env_map(&env_map)?,
        })
    }
}

impl EngineConfig {
    pub fn from_env_map(env_map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bucket_width_ms = env_map
            .get("BUCKET_WIDTH_MS")
            .map(|s| s.trim())
            .unwrap_or("60000")
            .parse::<i64>()
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "BUCKET_WIDTH_MS".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        let alignment = match env_map
            .get("BUCKET_ALIGN")
            .map(|s| s.as_str())
            .unwrap_or("calendar")
        {
            "calendar" => BucketAlignment::Calendar,
            "first-fill" => BucketAlignment::FirstFill,
            other => {
                return Err(ConfigError::InvalidValue(
                    "BUCKET_ALIGN".to_string(),
                    format!("must be calendar or first-fill, got {}", other),
                ))
            }
        };

        let realize_at = match env_map
            .get("REALIZE_AT")
            .map(|s| s.as_str())
            .unwrap_or("trade")
        {
            "trade" => RealizationPrice::Trade,
            "mark" => RealizationPrice::Mark,
            other => {
                return Err(ConfigError::InvalidValue(
                    "REALIZE_AT".to_string(),
                    format!("must be trade or mark, got {}", other),
                ))
            }
        };

        Ok(EngineConfig {
            bucket_width_ms,
            alignment,
            realize_at,
        })
    }
}
