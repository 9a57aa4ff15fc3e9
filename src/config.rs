//! Runtime configuration: YAML file plus environment overrides
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::lifecycle::TransitionPolicy;
use crate::service::WorkflowPolicy;

const DEFAULT_DB_PATH: &str = "logistics.db";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output (development)
    #[default]
    Pretty,
    /// JSON structured logging (production)
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `tracing_subscriber::EnvFilter` directive, used when RUST_LOG is unset
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub transition_policy: TransitionPolicy,
    pub enforce_warehouse_capacity: bool,
    pub logging: LogSettings,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            transition_policy: TransitionPolicy::Permissive,
            enforce_warehouse_capacity: true,
            logging: LogSettings::default(),
        }
    }
}

impl Config {
    /// Read the optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {path:?}"))?;
                Self::from_yaml_str(&text)
                    .with_context(|| format!("failed to parse config file {path:?}"))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply `LOGISTICS_DB_PATH`, `LOGISTICS_TRANSITION_POLICY`,
    /// `LOGISTICS_ENFORCE_CAPACITY` and `LOG_FORMAT` from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("LOGISTICS_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(policy) = lookup("LOGISTICS_TRANSITION_POLICY") {
            self.transition_policy = policy
                .parse()
                .context("LOGISTICS_TRANSITION_POLICY")?;
        }
        if let Some(flag) = lookup("LOGISTICS_ENFORCE_CAPACITY") {
            self.enforce_warehouse_capacity = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => anyhow::bail!("LOGISTICS_ENFORCE_CAPACITY: expected a boolean, got '{other}'"),
            };
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => self.logging.format,
            };
        }
        Ok(())
    }

    pub fn workflow(&self) -> WorkflowPolicy {
        WorkflowPolicy {
            transitions: self.transition_policy,
            enforce_warehouse_capacity: self.enforce_warehouse_capacity,
        }
    }
}
