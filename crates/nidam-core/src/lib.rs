//! Nidam Core - headless library for running open models on the right hardware.
//!
//! This crate finds model packages in git-backed repos, matches them against
//! the local machine or cloud instance types, and prepares cached runtime
//! environments to serve them in. It has no terminal UI; the `nidam` binary
//! is a thin layer on top.
//!
//! # Example
//!
//! ```rust,ignore
//! use nidam_core::{Nidam, NidamPaths};
//!
//! #[tokio::main]
//! async fn main() -> nidam_core::Result<()> {
//!     let nidam = Nidam::new(NidamPaths::from_env()?, false)?;
//!     let target = nidam.local_target()?;
//!
//!     for package in nidam.find_packages(Some("llama3"), None)? {
//!         let score = nidam.score(&package, &target);
//!         println!("{} -> {:.2}", package, score);
//!     }
//!     Ok(())
//! }
//! ```

pub mod accelerator;
pub mod atomic;
pub mod clean;
pub mod cloud;
pub mod config;
pub mod error;
pub mod hardware;
pub mod local;
pub mod matcher;
pub mod package;
pub mod platform;
pub mod process;
pub mod venv;

// Re-export commonly used types
pub use accelerator::{Accelerator, AcceleratorCatalog};
pub use clean::{CleanOutcome, CleanReport, CleanTarget};
pub use config::{AppConfig, NidamPaths, ServeConfig, UserConfig};
pub use error::{NidamError, Result};
pub use hardware::{CpuInfo, DeploymentTarget, TargetSource};
pub use matcher::{best_target, rank, score, ModelRequirements, RankedTarget, ResourceSpec, SelectionPolicy};
pub use package::{ManifestCache, ModelPackage, RepoInfo};
pub use venv::{EnvVars, EnvironmentCache, Fingerprint, UvBuilder, VenvSpec};

use std::sync::Arc;
use tracing::debug;

/// Main entry point for nidam operations.
///
/// Owns the on-disk layout, the user configuration, the accelerator catalog
/// and the caches, so callers do not have to thread them through every call.
pub struct Nidam {
    paths: NidamPaths,
    config: UserConfig,
    catalog: AcceleratorCatalog,
    manifests: ManifestCache,
    environments: EnvironmentCache,
}

impl Nidam {
    /// Load configuration and catalog from `paths`, creating the directory
    /// layout if needed. `verbose` shows external tool output.
    pub fn new(paths: NidamPaths, verbose: bool) -> Result<Self> {
        paths.ensure_dirs()?;
        let config = UserConfig::load(&paths.config_file());
        let catalog = AcceleratorCatalog::load(&paths.accelerators_file())?;
        let environments =
            EnvironmentCache::new(paths.venv_dir(), Arc::new(UvBuilder::new(verbose)));
        debug!(
            "nidam home {} with {} repo(s) and {} accelerator(s)",
            paths.home().display(),
            config.repos.len(),
            catalog.len()
        );
        Ok(Self {
            paths,
            config,
            catalog,
            manifests: ManifestCache::default(),
            environments,
        })
    }

    pub fn paths(&self) -> &NidamPaths {
        &self.paths
    }

    pub fn config(&self) -> &UserConfig {
        &self.config
    }

    pub fn catalog(&self) -> &AcceleratorCatalog {
        &self.catalog
    }

    pub fn environments(&self) -> &EnvironmentCache {
        &self.environments
    }

    /// Persist `config` and use it from now on.
    pub fn save_config(&mut self, config: UserConfig) -> Result<()> {
        config.save(&self.paths.config_file())?;
        self.config = config;
        self.manifests.invalidate_all();
        Ok(())
    }

    /// Configured repos, or only `name`.
    pub fn repos(&self, name: Option<&str>) -> Result<Vec<RepoInfo>> {
        package::list_repos(&self.config, &self.paths.repos_dir(), name)
    }

    /// Clone repos that were never fetched; failures only warn.
    pub async fn ensure_repos(&self, verbose: bool) -> Result<()> {
        package::ensure_repos_cloned(&self.repos(None)?, verbose).await;
        Ok(())
    }

    /// Clone or refresh every configured repo. Manifests are re-read afterwards.
    pub async fn update_repos(&self, verbose: bool) -> Result<Vec<RepoInfo>> {
        let repos = self.repos(None)?;
        for repo in &repos {
            package::update_repo(repo, verbose).await?;
        }
        self.manifests.invalidate_all();
        Ok(repos)
    }

    /// Packages matching `tag` (all when `None`).
    pub fn find_packages(&self, tag: Option<&str>, repo: Option<&str>) -> Result<Vec<ModelPackage>> {
        package::find_packages(&self.config, &self.paths.repos_dir(), tag, repo, &self.manifests)
    }

    /// Exactly one package for `tag`.
    pub fn resolve(&self, tag: &str, repo: Option<&str>) -> Result<ModelPackage> {
        package::resolve_package(&self.config, &self.paths.repos_dir(), tag, repo, &self.manifests)
    }

    /// Probe this machine.
    pub fn local_target(&self) -> Result<DeploymentTarget> {
        hardware::detect_local_target()
    }

    /// Fitness of `package` on `target`.
    pub fn score(&self, package: &ModelPackage, target: &DeploymentTarget) -> f64 {
        matcher::score(&package.requirements(), target, &self.catalog)
    }

    /// Fitness of `package` on `target` as `policy` sees it. This is what
    /// listings and target selection use.
    pub fn evaluate(
        &self,
        package: &ModelPackage,
        target: &DeploymentTarget,
        policy: &SelectionPolicy,
    ) -> f64 {
        policy.evaluate(&package.requirements(), target, &self.catalog)
    }

    /// Whether the environment `serve` would use for `package` is already
    /// built. Never builds.
    pub fn check_environment(&self, package: &ModelPackage) -> Result<bool> {
        let envs = local::serve_envs(package, |name| std::env::var(name).ok());
        let spec = venv::resolve_venv_spec(package, &envs)?;
        Ok(self.environments.check(&spec))
    }
}
