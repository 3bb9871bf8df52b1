use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{plog_debug, Error, Result};

pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_WRITES_PER_FILE: u32 = 5;
pub const DEFAULT_MAX_TOOL_CALLS: u32 = 200;

/// What Deployment and Maintenance do when QA approval is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QaPolicy {
    /// Fail the handler with `ApprovalRequired`.
    #[default]
    Enforce,
    /// Log a warning and continue.
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub workspace_dir: Option<String>,
    /// Block on any rule match, not only BLOCK severity.
    #[serde(default)]
    pub strict_mode: bool,
    pub handler_timeout_secs: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
    pub max_writes_per_file: Option<u32>,
    pub max_tool_calls: Option<u32>,
    #[serde(default)]
    pub qa_policy: QaPolicy,
}

impl Config {
    pub fn home_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".phasegate"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("phasegate.toml"))
    }

    /// Resolve the workspace root: `PHASEGATE_WORKSPACE`, then the config
    /// value, then `~/.phasegate/projects`.
    pub fn workspace_root(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("PHASEGATE_WORKSPACE") {
            if !dir.is_empty() {
                return Ok(expand_tilde(&dir));
            }
        }
        match &self.workspace_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::home_dir()?.join("projects")),
        }
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(
            self.handler_timeout_secs
                .unwrap_or(DEFAULT_HANDLER_TIMEOUT_SECS),
        )
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS))
    }

    pub fn max_writes_per_file(&self) -> u32 {
        self.max_writes_per_file
            .unwrap_or(DEFAULT_MAX_WRITES_PER_FILE)
    }

    pub fn max_tool_calls(&self) -> u32 {
        self.max_tool_calls.unwrap_or(DEFAULT_MAX_TOOL_CALLS)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        plog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            plog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        plog_debug!(
            "Config loaded: workspace_dir={:?}, strict_mode={}, qa_policy={:?}",
            config.workspace_dir,
            config.strict_mode,
            config.qa_policy
        );
        Ok(config)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
