//! Centralized configuration for nidam.
//!
//! Constants live in unit structs grouped by concern. Filesystem locations
//! are resolved once into [`NidamPaths`], and the user-editable repo list is
//! persisted as [`UserConfig`].

use crate::atomic::{atomic_read_json, atomic_write_json};
use crate::error::{NidamError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "nidam";
    pub const HOME_ENV: &'static str = "NIDAM_HOME";
    pub const LOG_ENV: &'static str = "NIDAM_LOG";
    pub const DEFAULT_REPO_NAME: &'static str = "default";
    pub const DEFAULT_REPO_URL: &'static str = "https://github.com/jileml/nidam-models@main";
}

/// Shared directory and file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const HOME_DIR_NAME: &'static str = ".nidam";
    pub const REPOS_DIR_NAME: &'static str = "repos";
    pub const VENV_DIR_NAME: &'static str = "venv";
    pub const TEMP_DIR_NAME: &'static str = "temp";
    pub const CONFIG_FILENAME: &'static str = "config.json";
    pub const ACCELERATORS_FILENAME: &'static str = "accelerators.json";
    pub const MANIFEST_FILENAME: &'static str = "jile.yaml";
    pub const JILES_SUBDIR: &'static str = "jileml/jiles";
}

/// Runtime environment construction.
pub struct InstallConfig;

impl InstallConfig {
    /// Package installed into every environment before the model requirements.
    pub const BASE_PACKAGE: &'static str = "jileml";
    /// Completion marker written as the last build step.
    pub const SENTINEL_FILENAME: &'static str = "DONE";
    /// Normalized requirements written inside each environment.
    pub const REQUIREMENTS_FILENAME: &'static str = "requirements.txt";
    pub const LOCK_SUFFIX: &'static str = "lock";
}

/// Local serving and readiness polling.
pub struct ServeConfig;

impl ServeConfig {
    pub const DEFAULT_PORT: u16 = 3000;
    pub const RANDOM_PORT_RANGE: Range<u16> = 30000..40000;
    pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_READY_ATTEMPTS: u32 = 600;
    /// After this long without a ready signal the server output is streamed.
    pub const STREAM_OUTPUT_AFTER: Duration = Duration::from_secs(30);
    pub const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
    pub const READY_PATH: &'static str = "/readyz";
}

/// Filesystem layout rooted at the nidam home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NidamPaths {
    home: PathBuf,
}

impl NidamPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolve from `NIDAM_HOME`, falling back to `~/.nidam`.
    pub fn from_env() -> Result<Self> {
        if let Some(home) = std::env::var_os(AppConfig::HOME_ENV) {
            return Ok(Self::new(home));
        }
        let home = dirs::home_dir().ok_or_else(|| NidamError::Config {
            message: "Could not determine home directory".to_string(),
        })?;
        Ok(Self::new(home.join(PathsConfig::HOME_DIR_NAME)))
    }

    /// Create the repo, venv and temp directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.repos_dir(), self.venv_dir(), self.temp_dir()] {
            fs::create_dir_all(&dir).map_err(|e| NidamError::io_with_path(e, &dir))?;
        }
        Ok(())
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.home.join(PathsConfig::REPOS_DIR_NAME)
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.home.join(PathsConfig::VENV_DIR_NAME)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.home.join(PathsConfig::TEMP_DIR_NAME)
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join(PathsConfig::CONFIG_FILENAME)
    }

    pub fn accelerators_file(&self) -> PathBuf {
        self.home.join(PathsConfig::ACCELERATORS_FILENAME)
    }

    /// Hugging Face hub cache populated by model servers.
    pub fn model_cache_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".cache").join("huggingface").join("hub"))
    }
}

/// User configuration persisted in `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Repo name to `https://<server>/<owner>/<repo>@<branch>` URL.
    #[serde(default = "default_repos")]
    pub repos: BTreeMap<String, String>,
    #[serde(default = "default_repo_name")]
    pub default_repo: String,
}

fn default_repos() -> BTreeMap<String, String> {
    BTreeMap::from([(
        AppConfig::DEFAULT_REPO_NAME.to_string(),
        AppConfig::DEFAULT_REPO_URL.to_string(),
    )])
}

fn default_repo_name() -> String {
    AppConfig::DEFAULT_REPO_NAME.to_string()
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            repos: default_repos(),
            default_repo: default_repo_name(),
        }
    }
}

impl UserConfig {
    /// Load the config, falling back to defaults when missing or corrupt.
    pub fn load(path: &Path) -> Self {
        match atomic_read_json::<UserConfig>(path) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }
}
