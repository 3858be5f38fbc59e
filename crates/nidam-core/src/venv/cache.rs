//! On-disk cache of prepared runtime environments.

use crate::atomic::atomic_write;
use crate::config::InstallConfig;
use crate::error::{NidamError, Result};
use crate::venv::{EnvironmentBuilder, VenvSpec};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Environments keyed by fingerprint under one root directory.
///
/// Layout: `<root>/<fingerprint>/` holds the environment, the normalized
/// `requirements.txt` and, once complete, the `DONE` sentinel. While a build
/// or reuse check runs, a sibling `<root>/<fingerprint>.lock` serializes it
/// across processes.
#[derive(Clone)]
pub struct EnvironmentCache {
    root: PathBuf,
    builder: Arc<dyn EnvironmentBuilder>,
}

/// Exclusive advisory lock on one fingerprint.
///
/// The lock file is unlinked before the lock is released, so the cache root
/// does not collect one file per environment. Waiters holding the old inode
/// notice the unlink and retry on a fresh file.
struct BuildLock {
    file: File,
    path: PathBuf,
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Lock file {} left in place: {}", self.path.display(), e);
            }
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

impl EnvironmentCache {
    pub fn new(root: impl Into<PathBuf>, builder: Arc<dyn EnvironmentBuilder>) -> Self {
        Self {
            root: root.into(),
            builder,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the environment for `spec` lives in, built or not.
    pub fn path_for(&self, spec: &VenvSpec) -> PathBuf {
        self.root.join(spec.fingerprint().as_str())
    }

    /// Lock file guarding the environment for `spec`.
    pub fn lock_path_for(&self, spec: &VenvSpec) -> PathBuf {
        self.root
            .join(format!("{}.{}", spec.fingerprint(), InstallConfig::LOCK_SUFFIX))
    }

    /// Whether a complete environment for `spec` exists. Never builds.
    pub fn check(&self, spec: &VenvSpec) -> bool {
        self.path_for(spec)
            .join(InstallConfig::SENTINEL_FILENAME)
            .is_file()
    }

    /// Return the environment for `spec`, building it if needed.
    ///
    /// A directory without the sentinel is a leftover of an interrupted
    /// build and is rebuilt from scratch. A failed build leaves nothing
    /// behind.
    pub async fn ensure(&self, spec: &VenvSpec) -> Result<PathBuf> {
        let fingerprint = spec.fingerprint();
        let venv = self.path_for(spec);
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| NidamError::io_with_path(e, &self.root))?;

        let _lock = acquire(self.lock_path_for(spec)).await?;

        if is_complete(&venv).await {
            debug!("Reusing environment {}", venv.display());
            return Ok(venv);
        }
        if fs::try_exists(&venv).await.unwrap_or(false) {
            warn!("Removing incomplete environment {}", venv.display());
            fs::remove_dir_all(&venv)
                .await
                .map_err(|e| NidamError::io_with_path(e, &venv))?;
        }

        debug!("Building environment {} for {}", fingerprint, spec.name_prefix);
        info!("Installing model dependencies ({})...", venv.display());
        match self.build(&venv, spec).await {
            Ok(()) => {
                info!("Successfully installed dependencies to {}", venv.display());
                Ok(venv)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&venv).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to clean up {}: {}", venv.display(), cleanup);
                    }
                }
                Err(NidamError::EnvironmentBuild {
                    path: venv,
                    message: e.to_string(),
                })
            }
        }
    }

    async fn build(&self, venv: &Path, spec: &VenvSpec) -> Result<()> {
        self.builder
            .create_interpreter(venv, &spec.python_version)
            .await?;
        fs::create_dir_all(venv)
            .await
            .map_err(|e| NidamError::io_with_path(e, venv))?;

        self.builder.install_base(venv, &spec.envs).await?;

        let requirements = venv.join(InstallConfig::REQUIREMENTS_FILENAME);
        fs::write(&requirements, spec.normalized_requirements())
            .await
            .map_err(|e| NidamError::io_with_path(e, &requirements))?;

        self.builder
            .install_requirements(venv, &requirements, &spec.envs)
            .await?;

        let sentinel = venv.join(InstallConfig::SENTINEL_FILENAME);
        tokio::task::spawn_blocking(move || {
            atomic_write(&sentinel, InstallConfig::SENTINEL_FILENAME.as_bytes())
        })
        .await
        .map_err(|e| NidamError::Other(format!("Sentinel task failed: {}", e)))?
    }
}

async fn is_complete(venv: &Path) -> bool {
    fs::metadata(venv.join(InstallConfig::SENTINEL_FILENAME))
        .await
        .is_ok_and(|m| m.is_file())
}

/// Block on the lock file in a worker thread.
async fn acquire(path: PathBuf) -> Result<BuildLock> {
    tokio::task::spawn_blocking(move || loop {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| NidamError::io_with_path(e, &path))?;
        FileExt::lock_exclusive(&file).map_err(|e| NidamError::io_with_path(e, &path))?;
        // The previous holder may have unlinked the file while we waited.
        if is_current(&file, &path) {
            return Ok(BuildLock { file, path });
        }
    })
    .await
    .map_err(|e| NidamError::Other(format!("Lock task failed: {}", e)))?
}

/// Whether `file` is still the one reachable at `path`.
#[cfg(unix)]
fn is_current(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(on_disk)) => held.dev() == on_disk.dev() && held.ino() == on_disk.ino(),
        _ => false,
    }
}

/// Open files cannot be unlinked here, so the held file is always current.
#[cfg(not(unix))]
fn is_current(_file: &File, _path: &Path) -> bool {
    true
}
