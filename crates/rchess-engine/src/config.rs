//! Adapter configuration, loadable from a TOML file.
//!
//! ```toml
//! engine_path = "/usr/local/bin/stockfish"
//! engine_args = []
//! grace_period_ms = 2000
//!
//! [tiers]
//! shallow = { depth = 5, move_time_ms = 500 }
//! medium = { depth = 12, move_time_ms = 1000 }
//! deep = { depth = 18, move_time_ms = 2000 }
//!
//! [options]
//! Threads = 2
//! Hash = 64
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};
use crate::protocol::UciCommand;
use crate::strength::{BudgetTiers, millis};

pub const DEFAULT_ENGINE_PATH: &str = "stockfish";
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(2000);
pub const DEFAULT_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const DEFAULT_SKILL_OPTION: &str = "Skill Level";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Engine binary; resolved through `PATH` when not absolute.
    pub engine_path: PathBuf,
    pub engine_args: Vec<String>,
    /// Added to the move time to form the per-request safety deadline.
    #[serde(rename = "grace_period_ms", with = "millis")]
    pub grace_period: Duration,
    /// How long `quit` may take before the process is killed.
    #[serde(rename = "quit_timeout_ms", with = "millis")]
    pub quit_timeout: Duration,
    /// UCI option receiving the strength level before each search.
    pub skill_option: String,
    pub tiers: BudgetTiers,
    /// Extra UCI options sent right after the handshake command.
    pub options: toml::Table,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from(DEFAULT_ENGINE_PATH),
            engine_args: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
            quit_timeout: DEFAULT_QUIT_TIMEOUT,
            skill_option: DEFAULT_SKILL_OPTION.to_string(),
            tiers: BudgetTiers::default(),
            options: toml::Table::new(),
        }
    }
}

impl AdapterConfig {
    pub fn with_engine_path(path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text).map_err(|e| AdapterError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            AdapterError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine_path.as_os_str().is_empty() {
            return Err(AdapterError::Config("engine_path is empty".into()));
        }
        self.tiers.validate().map_err(AdapterError::Config)?;
        for (name, value) in &self.options {
            if option_value_text(value).is_none() {
                return Err(AdapterError::Config(format!(
                    "option {name} must be a string, number or boolean"
                )));
            }
        }
        Ok(())
    }

    /// `setoption` commands for the configured extra options, sorted by name.
    pub fn option_commands(&self) -> Vec<UciCommand> {
        self.options
            .iter()
            .filter_map(|(name, value)| {
                option_value_text(value).map(|text| UciCommand::SetOption {
                    name: name.clone(),
                    value: Some(text),
                })
            })
            .collect()
    }
}

/// UCI option values are plain text on the wire.
fn option_value_text(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}
