//! TOML-based configuration for gitsafe.
//!
//! Every section is optional; missing values fall back to the defaults
//! documented on each field. Only tool-level settings live here: sync options
//! remain call-scoped and are merely seeded from [`SyncDefaults`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::models::{ConflictStrategy, SyncOptions};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Git binary and timeout settings.
    #[serde(default)]
    pub git: GitConfig,

    /// Defaults for call-scoped sync options.
    #[serde(default)]
    pub sync: SyncDefaults,

    /// Batch execution settings.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// How the `git` binary is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Path or name of the git executable (default `git`).
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Timeout for local commands in seconds (default 60).
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for push / pull / fetch in seconds (default 300).
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
}

fn default_binary() -> String {
    "git".into()
}
fn default_command_timeout() -> u64 {
    60
}
fn default_network_timeout() -> u64 {
    300
}

impl GitConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            command_timeout_secs: default_command_timeout(),
            network_timeout_secs: default_network_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync defaults
// ---------------------------------------------------------------------------

/// Seed values for [`SyncOptions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDefaults {
    #[serde(default = "default_remote")]
    pub remote: String,

    #[serde(default)]
    pub auto_resolve_conflicts: bool,

    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    #[serde(default = "default_true")]
    pub include_untracked: bool,

    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,

    #[serde(default)]
    pub confirm_before_action: bool,

    #[serde(default = "default_true")]
    pub show_progress: bool,
}

fn default_remote() -> String {
    "origin".into()
}
fn default_true() -> bool {
    true
}
fn default_protected_branches() -> Vec<String> {
    vec!["main".into(), "master".into(), "develop".into()]
}

impl Default for SyncDefaults {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            auto_resolve_conflicts: false,
            conflict_strategy: ConflictStrategy::default(),
            include_untracked: true,
            protected_branches: default_protected_branches(),
            confirm_before_action: false,
            show_progress: true,
        }
    }
}

impl SyncOptions {
    /// Build call-scoped options from configured defaults.
    pub fn from_config(defaults: &SyncDefaults) -> Self {
        Self {
            remote: defaults.remote.clone(),
            branch: None,
            auto_resolve_conflicts: defaults.auto_resolve_conflicts,
            conflict_strategy: defaults.conflict_strategy,
            include_untracked: defaults.include_untracked,
            protected_branches: defaults.protected_branches.clone(),
            confirm_before_action: defaults.confirm_before_action,
            show_progress: defaults.show_progress,
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Batch execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Destructive batches larger than this need operator confirmation
    /// (default 0, i.e. always).
    #[serde(default)]
    pub confirm_threshold: usize,

    /// Upper bound for branches generated from a `{n}` pattern (default 20).
    #[serde(default = "default_max_generated")]
    pub max_generated_branches: usize,
}

fn default_max_generated() -> usize {
    20
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            confirm_threshold: 0,
            max_generated_branches: default_max_generated(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level or filter directive (default `info`).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.git.binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.binary".into(),
                detail: "git binary must not be empty".into(),
            });
        }
        if self.git.command_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "git.command_timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        if self.git.network_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "git.network_timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        if self.sync.remote.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.remote".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        if self.batch.max_generated_branches == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch.max_generated_branches".into(),
                detail: "must allow at least one branch".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}
