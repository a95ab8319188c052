//! Engine configuration.
//!
//! Loaded from `.kerneldiagrc` TOML files found in:
//! - a custom path given by the `KERNELDIAG_CONFIG` environment variable
//! - the current directory
//! - the user home directory

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV_VAR: &str = "KERNELDIAG_CONFIG";
pub const CONFIG_FILE_NAME: &str = ".kerneldiagrc";

/// How independent rules of one pass are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One rule at a time, in topological order
    #[default]
    Sequential,
    /// Rules of the same dependency level run concurrently
    Parallel,
}

/// Output format of the structured logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
}

/// Configuration of an analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub execution: ExecutionMode,

    /// Emit the missing-optional-metric warning at all
    pub warn_on_missing_optional: bool,

    /// Record an ERROR finding for every aborted rule
    pub report_error_findings: bool,

    /// Rules skipped for the pass; their children run without their weights
    pub disabled_rules: Vec<String>,

    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            execution: ExecutionMode::Sequential,
            warn_on_missing_optional: true,
            report_error_findings: true,
            disabled_rules: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_execution(mut self, mode: ExecutionMode) -> Self {
        self.execution = mode;
        self
    }

    pub fn with_optional_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_missing_optional = enabled;
        self
    }

    pub fn with_error_findings(mut self, enabled: bool) -> Self {
        self.report_error_findings = enabled;
        self
    }

    pub fn disable_rule(mut self, id: impl Into<String>) -> Self {
        self.disabled_rules.push(id.into());
        self
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled_rules.iter().any(|r| r == id)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Find and load the configuration file, falling back to defaults.
    ///
    /// Search order:
    /// 1. KERNELDIAG_CONFIG environment variable
    /// 2. .kerneldiagrc in current directory
    /// 3. .kerneldiagrc in user home directory
    pub fn load_default() -> Self {
        Self::candidate_paths()
            .into_iter()
            .filter(|path| path.exists())
            .find_map(|path| match Self::load(&path) {
                Ok(config) => Some(config),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring config file");
                    None
                }
            })
            .unwrap_or_default()
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(CONFIG_FILE_NAME));
        }
        paths
    }
}
