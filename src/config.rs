//! `.mm_config.yaml` discovery and defaults.
//!
//! Unlike the operation log, configuration never fails a command: a missing,
//! unreadable or malformed file yields the defaults plus a warning for the
//! caller to report once logging is up.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::batch::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_WORKERS};
use crate::revert::{RevertOptions, RevertScope};

/// File name searched for from the working directory upwards.
pub const CONFIG_FILE_NAME: &str = ".mm_config.yaml";

/// Settings from `.mm_config.yaml`; command-line flags override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub batch_size: usize,
    pub max_workers: usize,
    pub progress_bar: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub log_level: String,
    /// Explicit exiftool binary; looked up on `PATH` when unset.
    pub exiftool_path: Option<PathBuf>,
    pub memory_limit_mb: u64,
    pub revert_keep_markers: bool,
    pub revert_scope: RevertScope,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            progress_bar: true,
            verbose: false,
            quiet: false,
            log_level: String::from("info"),
            exiftool_path: None,
            memory_limit_mb: 1024,
            revert_keep_markers: true,
            revert_scope: RevertScope::Legacy,
        }
    }
}

/// Outcome of [`Config::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: Config,
    /// File the settings came from, if any.
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

impl Config {
    /// Load `explicit` if given, else the nearest `.mm_config.yaml` at or
    /// above `start`.
    pub fn load(explicit: Option<&Path>, start: &Path) -> LoadedConfig {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match find_config_file(start) {
                Some(path) => path,
                None => return LoadedConfig::default(),
            },
        };

        match Self::from_file(&path) {
            Ok(config) => LoadedConfig {
                config,
                source: Some(path),
                warnings: Vec::new(),
            },
            Err(reason) => LoadedConfig {
                config: Config::default(),
                source: None,
                warnings: vec![format!(
                    "ignoring config file '{}': {reason}; using defaults",
                    path.display()
                )],
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path).map_err(|err| err.to_string())?;
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(&text).map_err(|err| err.to_string())
    }

    /// Revert behaviour configured by `revert_keep_markers`/`revert_scope`.
    pub fn revert_options(&self) -> RevertOptions {
        RevertOptions {
            keep_rename_markers: self.revert_keep_markers,
            scope: self.revert_scope,
        }
    }
}

/// Nearest `.mm_config.yaml` in `start` or one of its ancestors.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}
