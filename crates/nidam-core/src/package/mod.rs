//! Model packages ("jiles") and the repos that hold them.
//!
//! A repo checkout keeps packages at `jileml/jiles/<name>/<version>/jile.yaml`.
//! A plain file in place of a version directory is an alias: its content
//! names the sibling version it stands for.
//!
//! - `manifest` - typed `jile.yaml`
//! - `cache` - explicit manifest cache owned by the caller
//! - `repo` - repo URLs, checkout layout and git sync

mod cache;
mod manifest;
mod repo;

pub use cache::ManifestCache;
pub use manifest::{
    ApiSchema, EnvEntry, ImageSpec, Manifest, ManifestSummary, Route, RouteSummary, Service,
    ServiceConfig,
};
pub use repo::{add_repo, ensure_repos_cloned, list_repos, remove_repo, update_repo, RepoInfo};

use crate::accelerator::AcceleratorCatalog;
use crate::config::{AppConfig, PathsConfig, UserConfig};
use crate::error::{NidamError, Result};
use crate::matcher::{ModelRequirements, ResourceSpec};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// One model package found in a repo.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPackage {
    pub repo: RepoInfo,
    /// The real version directory, also for aliases.
    pub path: PathBuf,
    /// Alias name this package was reached through.
    pub alias: Option<String>,
    pub manifest: Arc<Manifest>,
}

impl ModelPackage {
    /// Model name: the parent directory of the version directory.
    pub fn name(&self) -> &str {
        dir_name(self.path.parent())
    }

    pub fn version(&self) -> &str {
        dir_name(Some(&self.path))
    }

    /// `name:alias` when reached through an alias, else `name:version`.
    pub fn tag(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{}:{}", self.name(), alias),
            None => self.jileml_tag(),
        }
    }

    /// `name:version` of the real package, as the model server expects it.
    pub fn jileml_tag(&self) -> String {
        format!("{}:{}", self.name(), self.version())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(PathsConfig::MANIFEST_FILENAME)
    }

    /// `<repo>/jileml`, exported as the model server's home.
    pub fn jileml_home(&self) -> PathBuf {
        self.repo.path.join("jileml")
    }

    pub fn platforms(&self) -> Vec<String> {
        self.manifest.platforms()
    }

    pub fn resources(&self) -> ResourceSpec {
        self.manifest.resources()
    }

    pub fn requirements(&self) -> ModelRequirements {
        self.manifest.requirements()
    }

    pub fn summary(&self) -> ManifestSummary {
        self.manifest.summary()
    }

    pub fn pretty_gpu(&self, catalog: &AcceleratorCatalog) -> String {
        self.resources().pretty_gpu(catalog)
    }
}

impl fmt::Display for ModelPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repo.name == AppConfig::DEFAULT_REPO_NAME {
            write!(f, "{}", self.tag())
        } else {
            write!(f, "{}/{}", self.repo.name, self.tag())
        }
    }
}

fn dir_name(path: Option<&Path>) -> &str {
    path.and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default()
}

/// A parsed model query: `name`, `name:version`, `repo/name[:version]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageQuery {
    pub repo: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
}

impl PackageQuery {
    /// Parse `tag`. An explicit `repo` wins over a `repo/` prefix in the tag.
    pub fn parse(tag: Option<&str>, repo: Option<&str>) -> Self {
        let mut query = PackageQuery {
            repo: repo.map(str::to_string),
            ..Default::default()
        };
        let Some(mut tag) = tag.map(str::trim).filter(|t| !t.is_empty()) else {
            return query;
        };
        if query.repo.is_none() {
            if let Some((repo, rest)) = tag.split_once('/') {
                query.repo = Some(repo.to_string());
                tag = rest;
            }
        }
        match tag.split_once(':') {
            Some((name, version)) => {
                query.name = Some(name.to_string());
                query.version = Some(version.to_string()).filter(|v| !v.is_empty());
            }
            None => query.name = Some(tag.to_string()),
        }
        query
    }
}

impl fmt::Display for PackageQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(repo) = &self.repo {
            write!(f, "{}/", repo)?;
        }
        write!(f, "{}", self.name.as_deref().unwrap_or("*"))?;
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

fn first_number(version: &str) -> u64 {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    NUMBER
        .get_or_init(|| Regex::new(r"\d+").ok())
        .as_ref()
        .and_then(|re| re.find(version))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(1_000_000_000)
}

/// Listing order: name, first number in the version, version length, version.
fn sort_key(path: &Path) -> (String, u64, usize, String) {
    let name = dir_name(path.parent()).to_string();
    let version = dir_name(Some(path)).to_string();
    (name, first_number(&version), version.len(), version)
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(read) => read.filter_map(|e| e.ok().map(|e| e.path())).collect(),
        Err(_) => Vec::new(),
    }
}

/// Version entries of one repo matching `query`, unsorted.
fn candidate_paths(repo: &RepoInfo, query: &PackageQuery) -> Vec<PathBuf> {
    let jiles = repo.path.join(PathsConfig::JILES_SUBDIR);
    let names = match &query.name {
        Some(name) => vec![jiles.join(name)],
        None => entries(&jiles).into_iter().filter(|p| p.is_dir()).collect(),
    };
    names
        .into_iter()
        .flat_map(|dir| match &query.version {
            Some(version) => {
                let path = dir.join(version);
                if path.exists() {
                    vec![path]
                } else {
                    Vec::new()
                }
            }
            None => entries(&dir),
        })
        .collect()
}

/// Packages of `repos` matching `query`, in listing order per repo.
///
/// Aliases that resolve to an already listed `name:version` are dropped
/// unless `include_alias` is set.
pub fn list_packages(
    repos: &[RepoInfo],
    query: &PackageQuery,
    cache: &ManifestCache,
    include_alias: bool,
) -> Result<Vec<ModelPackage>> {
    let mut packages = Vec::new();
    for repo in repos {
        let mut paths = candidate_paths(repo, query);
        paths.sort_by_cached_key(|p| sort_key(p));

        for path in paths {
            let (real, alias) = if path.is_dir() {
                (path, None)
            } else if path.is_file() {
                let target = std::fs::read_to_string(&path)
                    .map_err(|e| NidamError::io_with_path(e, &path))?;
                let alias = dir_name(Some(&path)).to_string();
                match path.parent() {
                    Some(parent) => (parent.join(target.trim()), Some(alias)),
                    None => continue,
                }
            } else {
                continue;
            };

            let manifest_path = real.join(PathsConfig::MANIFEST_FILENAME);
            if !manifest_path.is_file() {
                if alias.is_some() {
                    warn!("Alias {} points to a missing package", real.display());
                }
                continue;
            }
            let manifest = cache.get_or_load(&manifest_path)?;
            packages.push(ModelPackage {
                repo: repo.clone(),
                path: real,
                alias,
                manifest,
            });
        }
    }

    if !include_alias {
        let mut seen = HashSet::new();
        packages.retain(|p| seen.insert(p.manifest.declared_tag()));
    }
    debug!("Query {} matched {} package(s)", query, packages.len());
    Ok(packages)
}

/// Look up packages by user query across the configured repos.
pub fn find_packages(
    config: &UserConfig,
    repos_dir: &Path,
    tag: Option<&str>,
    repo: Option<&str>,
    cache: &ManifestCache,
) -> Result<Vec<ModelPackage>> {
    let query = PackageQuery::parse(tag, repo);
    let repos = list_repos(config, repos_dir, query.repo.as_deref())?;
    list_packages(&repos, &query, cache, false)
}

/// Exactly one package for `tag`.
pub fn resolve_package(
    config: &UserConfig,
    repos_dir: &Path,
    tag: &str,
    repo: Option<&str>,
    cache: &ManifestCache,
) -> Result<ModelPackage> {
    let mut packages = find_packages(config, repos_dir, Some(tag), repo, cache)?;
    match packages.len() {
        0 => Err(NidamError::ModelNotFound {
            query: tag.to_string(),
        }),
        1 => Ok(packages.remove(0)),
        _ => Err(NidamError::AmbiguousModel {
            query: tag.to_string(),
            candidates: packages.iter().map(|p| p.to_string()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_package(repo: &Path, name: &str, version: &str) {
        let dir = repo.join(PathsConfig::JILES_SUBDIR).join(name).join(version);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(PathsConfig::MANIFEST_FILENAME),
            format!("name: {name}\nversion: \"{version}\"\nservices:\n  - name: svc\n"),
        )
        .unwrap();
    }

    fn write_alias(repo: &Path, name: &str, alias: &str, target: &str) {
        let dir = repo.join(PathsConfig::JILES_SUBDIR).join(name);
        std::fs::write(dir.join(alias), format!("{target}\n")).unwrap();
    }

    fn fixture() -> (TempDir, UserConfig, RepoInfo) {
        let temp = TempDir::new().unwrap();
        let config = UserConfig::default();
        let repo = list_repos(&config, temp.path(), Some("default")).unwrap().remove(0);
        write_package(&repo.path, "llama3", "8b-instruct");
        write_package(&repo.path, "llama3", "70b-instruct");
        write_package(&repo.path, "qwen2", "7b");
        write_alias(&repo.path, "llama3", "latest", "8b-instruct");
        (temp, config, repo)
    }

    #[test]
    fn test_query_parse() {
        assert_eq!(PackageQuery::parse(None, None), PackageQuery::default());
        let q = PackageQuery::parse(Some("mine/llama3:8b"), None);
        assert_eq!(q.repo.as_deref(), Some("mine"));
        assert_eq!(q.name.as_deref(), Some("llama3"));
        assert_eq!(q.version.as_deref(), Some("8b"));

        let q = PackageQuery::parse(Some("llama3"), Some("other"));
        assert_eq!(q.repo.as_deref(), Some("other"));
        assert_eq!(q.version, None);
    }

    #[test]
    fn test_sort_key_orders_by_first_number() {
        let mut versions = vec!["70b-instruct", "8b-instruct", "latest", "8b"];
        versions.sort_by_cached_key(|v| sort_key(&Path::new("/r/llama3").join(v)));
        assert_eq!(versions, vec!["8b", "8b-instruct", "70b-instruct", "latest"]);
    }

    #[test]
    fn test_list_all_and_dedupe_aliases() {
        let (temp, config, _) = fixture();
        let cache = ManifestCache::default();

        let all = find_packages(&config, temp.path(), None, None, &cache).unwrap();
        let tags: Vec<String> = all.iter().map(|p| p.tag()).collect();
        assert_eq!(tags, vec!["llama3:8b-instruct", "llama3:70b-instruct", "qwen2:7b"]);

        let repos = list_repos(&config, temp.path(), None).unwrap();
        let with_alias =
            list_packages(&repos, &PackageQuery::default(), &cache, true).unwrap();
        assert_eq!(with_alias.len(), 4);
        let alias = with_alias.iter().find(|p| p.alias.is_some()).unwrap();
        assert_eq!(alias.tag(), "llama3:latest");
        assert_eq!(alias.jileml_tag(), "llama3:8b-instruct");
    }

    #[test]
    fn test_resolve_package() {
        let (temp, config, repo) = fixture();
        let cache = ManifestCache::default();

        let package = resolve_package(&config, temp.path(), "qwen2", None, &cache).unwrap();
        assert_eq!(package.jileml_tag(), "qwen2:7b");
        assert_eq!(package.to_string(), "qwen2:7b");
        assert_eq!(package.jileml_home(), repo.path.join("jileml"));

        let via_alias =
            resolve_package(&config, temp.path(), "default/llama3:latest", None, &cache).unwrap();
        assert_eq!(via_alias.version(), "8b-instruct");
        assert_eq!(via_alias.tag(), "llama3:latest");

        match resolve_package(&config, temp.path(), "llama3", None, &cache) {
            Err(NidamError::AmbiguousModel { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected: {:?}", other.map(|p| p.tag())),
        }
        assert!(matches!(
            resolve_package(&config, temp.path(), "mistral", None, &cache),
            Err(NidamError::ModelNotFound { .. })
        ));
        assert!(matches!(
            resolve_package(&config, temp.path(), "nope/qwen2", None, &cache),
            Err(NidamError::RepoNotFound { .. })
        ));
    }

    #[test]
    fn test_display_includes_non_default_repo() {
        let temp = TempDir::new().unwrap();
        let mut config = UserConfig::default();
        add_repo(&mut config, temp.path(), "mine", "https://github.com/me/models@dev").unwrap();
        let repo = list_repos(&config, temp.path(), Some("mine")).unwrap().remove(0);
        write_package(&repo.path, "phi3", "mini");

        let cache = ManifestCache::default();
        let package = resolve_package(&config, temp.path(), "phi3", None, &cache).unwrap();
        assert_eq!(package.to_string(), "mine/phi3:mini");
    }

    #[test]
    fn test_dangling_alias_is_skipped() {
        let (temp, config, repo) = fixture();
        write_alias(&repo.path, "qwen2", "latest", "missing");
        let cache = ManifestCache::default();
        let repos = list_repos(&config, temp.path(), None).unwrap();
        let query = PackageQuery::parse(Some("qwen2"), None);
        let found = list_packages(&repos, &query, &cache, true).unwrap();
        assert_eq!(found.len(), 1);
    }
}
