//! Releasing disk space held by nidam.

use crate::config::NidamPaths;
use crate::error::{NidamError, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Something `nidam clean` can remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanTarget {
    ModelCache,
    Venvs,
    Repos,
    Configs,
}

impl CleanTarget {
    pub const ALL: [CleanTarget; 4] = [
        CleanTarget::Repos,
        CleanTarget::Venvs,
        CleanTarget::ModelCache,
        CleanTarget::Configs,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            CleanTarget::ModelCache => "Hugging Face model cache",
            CleanTarget::Venvs => "virtual environments",
            CleanTarget::Repos => "cloned repositories",
            CleanTarget::Configs => "configuration files",
        }
    }

    /// Location on disk. `None` when the home directory is unknown.
    pub fn path(&self, paths: &NidamPaths) -> Option<PathBuf> {
        match self {
            CleanTarget::ModelCache => NidamPaths::model_cache_dir(),
            CleanTarget::Venvs => Some(paths.venv_dir()),
            CleanTarget::Repos => Some(paths.repos_dir()),
            CleanTarget::Configs => Some(paths.config_file()),
        }
    }
}

/// What happened to one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanOutcome {
    Missing,
    WouldRemove { bytes: u64 },
    Removed { bytes: u64 },
}

/// Result of cleaning one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub description: String,
    pub path: PathBuf,
    pub outcome: CleanOutcome,
}

impl fmt::Display for CleanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            CleanOutcome::Missing => write!(f, "{} does not exist, skipping.", self.description),
            CleanOutcome::WouldRemove { bytes } => write!(
                f,
                "[Dry Run] {} would be removed (~{:.2}MB)",
                self.description,
                megabytes(bytes)
            ),
            CleanOutcome::Removed { bytes } => write!(
                f,
                "{} has been removed (~{:.2}MB freed)",
                self.description,
                megabytes(bytes)
            ),
        }
    }
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Bytes used under `path`. Hard links are counted once on Unix.
pub fn disk_usage(path: &Path) -> u64 {
    let mut seen = HashSet::new();
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error calculating disk usage for {}: {}", path.display(), e);
                continue;
            }
        };
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !first_sighting(&mut seen, &metadata) {
            continue;
        }
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    total
}

#[cfg(unix)]
fn first_sighting(seen: &mut HashSet<(u64, u64)>, metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    seen.insert((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn first_sighting(_seen: &mut HashSet<(u64, u64)>, _metadata: &std::fs::Metadata) -> bool {
    true
}

/// Remove `path` (file or directory) unless `dry_run`.
pub fn remove_path(path: &Path, description: &str, dry_run: bool) -> Result<CleanReport> {
    let report = |outcome| CleanReport {
        description: description.to_string(),
        path: path.to_path_buf(),
        outcome,
    };

    if std::fs::symlink_metadata(path).is_err() {
        info!("{} does not exist, skipping.", description);
        return Ok(report(CleanOutcome::Missing));
    }

    let bytes = disk_usage(path);
    if dry_run {
        return Ok(report(CleanOutcome::WouldRemove { bytes }));
    }

    debug!("Removing {}", path.display());
    let removed = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    removed.map_err(|e| NidamError::io_with_path(e, path))?;
    Ok(report(CleanOutcome::Removed { bytes }))
}

/// Clean `targets` concurrently, at most one per available core.
///
/// Reports come back in the order of `targets`.
pub async fn clean(targets: &[CleanTarget], paths: &NidamPaths, dry_run: bool) -> Result<Vec<CleanReport>> {
    let workers = std::thread::available_parallelism().map_or(1, |n| n.get());
    let permits = Arc::new(Semaphore::new(workers));

    let mut handles = Vec::with_capacity(targets.len());
    for target in targets {
        let Some(path) = target.path(paths) else {
            warn!("Cannot locate {}, skipping", target.description());
            continue;
        };
        let description = target.description();
        let permits = permits.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| NidamError::Other(e.to_string()))?;
            tokio::task::spawn_blocking(move || remove_path(&path, description, dry_run))
                .await
                .map_err(|e| NidamError::Other(format!("Cleanup task failed: {}", e)))?
        }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        let report = handle
            .await
            .map_err(|e| NidamError::Other(format!("Cleanup task failed: {}", e)))??;
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn populate(paths: &NidamPaths) {
        paths.ensure_dirs().unwrap();
        let repo = paths.repos_dir().join("github.com/jileml/models/main");
        fs::create_dir_all(&repo).unwrap();
        fs::write(repo.join("a.bin"), vec![0u8; 2048]).unwrap();
        fs::write(paths.venv_dir().join("b.bin"), vec![0u8; 1024]).unwrap();
        fs::write(paths.config_file(), "{}").unwrap();
    }

    #[test]
    fn test_disk_usage_counts_files() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("x/y")).unwrap();
        fs::write(temp.path().join("x/one"), vec![0u8; 100]).unwrap();
        fs::write(temp.path().join("x/y/two"), vec![0u8; 50]).unwrap();
        assert_eq!(disk_usage(&temp.path().join("x")), 150);
        assert_eq!(disk_usage(&temp.path().join("missing")), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_usage_counts_hard_links_once() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("blob");
        fs::write(&file, vec![0u8; 4096]).unwrap();
        fs::hard_link(&file, temp.path().join("link")).unwrap();
        assert_eq!(disk_usage(temp.path()), 4096);
    }

    #[test]
    fn test_remove_missing_path_is_skipped() {
        let temp = TempDir::new().unwrap();
        let report = remove_path(&temp.path().join("nope"), "nothing", false).unwrap();
        assert_eq!(report.outcome, CleanOutcome::Missing);
        assert_eq!(report.to_string(), "nothing does not exist, skipping.");
    }

    #[test]
    fn test_dry_run_keeps_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("d");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("f"), vec![0u8; 1024 * 1024]).unwrap();

        let report = remove_path(&dir, "stuff", true).unwrap();
        assert_eq!(report.outcome, CleanOutcome::WouldRemove { bytes: 1024 * 1024 });
        assert_eq!(report.to_string(), "[Dry Run] stuff would be removed (~1.00MB)");
        assert!(dir.join("f").exists());
    }

    #[test]
    fn test_remove_file_and_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("config.json");
        fs::write(&file, "{}").unwrap();
        let report = remove_path(&file, "configuration files", false).unwrap();
        assert_eq!(report.outcome, CleanOutcome::Removed { bytes: 2 });
        assert!(!file.exists());

        let dir = temp.path().join("venv");
        fs::create_dir_all(dir.join("inner")).unwrap();
        remove_path(&dir, "virtual environments", false).unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_clean_nidam_targets() {
        let temp = TempDir::new().unwrap();
        let paths = NidamPaths::new(temp.path().join("home"));
        populate(&paths);

        let targets = [CleanTarget::Repos, CleanTarget::Venvs, CleanTarget::Configs];
        let reports = clean(&targets, &paths, true).await.unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].outcome, CleanOutcome::WouldRemove { bytes: 2048 });
        assert_eq!(reports[1].outcome, CleanOutcome::WouldRemove { bytes: 1024 });
        assert!(paths.config_file().exists());

        let reports = clean(&targets, &paths, false).await.unwrap();
        assert!(reports
            .iter()
            .all(|r| matches!(r.outcome, CleanOutcome::Removed { .. })));
        assert!(!paths.repos_dir().exists());
        assert!(!paths.venv_dir().exists());
        assert!(!paths.config_file().exists());
        assert!(paths.temp_dir().exists());
    }
}
