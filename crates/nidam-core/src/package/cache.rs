//! In-memory manifest cache.

use crate::error::Result;
use crate::package::manifest::Manifest;
use mini_moka::sync::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_CAPACITY: u64 = 1024;

/// Parsed manifests keyed by manifest file path.
///
/// Owned by the caller and passed to discovery, so repeated lookups in one
/// command parse each `jile.yaml` once. Invalidate after a repo update.
#[derive(Clone)]
pub struct ManifestCache {
    entries: Cache<PathBuf, Arc<Manifest>>,
}

impl Default for ManifestCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ManifestCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
        }
    }

    /// The parsed manifest at `path`, loading it on a miss.
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<Manifest>> {
        let key = path.to_path_buf();
        if let Some(manifest) = self.entries.get(&key) {
            return Ok(manifest);
        }
        debug!("Loading manifest {}", path.display());
        let manifest = Arc::new(Manifest::load(path)?);
        self.entries.insert(key, manifest.clone());
        Ok(manifest)
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.invalidate(&path.to_path_buf());
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(&path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = "name: tiny\nversion: \"1\"\nservices:\n  - name: svc\n";

    #[test]
    fn test_loads_once_until_invalidated() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("jile.yaml");
        std::fs::write(&path, MANIFEST).unwrap();

        let cache = ManifestCache::default();
        let first = cache.get_or_load(&path).unwrap();
        assert!(cache.contains(&path));

        std::fs::write(&path, MANIFEST.replace("tiny", "renamed")).unwrap();
        assert_eq!(cache.get_or_load(&path).unwrap().name, "tiny");
        assert!(Arc::ptr_eq(&first, &cache.get_or_load(&path).unwrap()));

        cache.invalidate(&path);
        assert_eq!(cache.get_or_load(&path).unwrap().name, "renamed");
    }

    #[test]
    fn test_errors_are_not_cached() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("jile.yaml");
        let cache = ManifestCache::default();
        assert!(cache.get_or_load(&path).is_err());
        assert!(!cache.contains(&path));

        std::fs::write(&path, MANIFEST).unwrap();
        assert!(cache.get_or_load(&path).is_ok());
    }
}
