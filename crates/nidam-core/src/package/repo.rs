//! Model repositories: git checkouts holding model packages.

use crate::config::UserConfig;
use crate::error::{NidamError, Result};
use crate::process::{run_command, CommandSpec};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

const DEFAULT_BRANCH: &str = "main";

fn url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"^(?:git\+)?(?:https?://)?(?P<server>[^/@\s]+)/(?P<owner>[^/@\s]+)/(?P<repo>[^/@\s]+?)(?:\.git)?/?(?:@(?P<branch>[^@\s]+))?$",
            )
            .ok()
        })
        .as_ref()
}

/// A configured repo and where it lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoInfo {
    pub name: String,
    /// Clone URL without the branch suffix.
    pub url: String,
    pub server: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub path: PathBuf,
}

impl RepoInfo {
    /// Parse `https://<server>/<owner>/<repo>[@<branch>]`. The checkout lives at
    /// `<repos_dir>/<server>/<owner>/<repo>/<branch>`.
    pub fn parse(name: &str, url: &str, repos_dir: &Path) -> Result<Self> {
        let invalid = || NidamError::Config {
            message: format!(
                "Invalid repo url `{}` for `{}`, expected https://<server>/<owner>/<repo>@<branch>",
                url, name
            ),
        };
        let caps = url_pattern()
            .and_then(|re| re.captures(url.trim()))
            .ok_or_else(invalid)?;

        let server = caps["server"].to_string();
        let owner = caps["owner"].to_string();
        let repo = caps["repo"].to_string();
        let branch = caps
            .name("branch")
            .map(|b| b.as_str().to_string())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        let path = repos_dir.join(&server).join(&owner).join(&repo).join(&branch);

        Ok(Self {
            name: name.to_string(),
            url: format!("https://{}/{}/{}", server, owner, repo),
            server,
            owner,
            repo,
            branch,
            path,
        })
    }

    pub fn is_cloned(&self) -> bool {
        self.path.join(".git").exists()
    }
}

impl fmt::Display for RepoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}@{})", self.name, self.url, self.branch)
    }
}

/// Repos from `config`, optionally restricted to one name.
///
/// Asking for an unknown name is a [`NidamError::RepoNotFound`] listing the
/// known ones.
pub fn list_repos(config: &UserConfig, repos_dir: &Path, name: Option<&str>) -> Result<Vec<RepoInfo>> {
    if let Some(name) = name {
        let Some(url) = config.repos.get(name) else {
            return Err(NidamError::RepoNotFound {
                name: name.to_string(),
                known: config.repos.keys().cloned().collect(),
            });
        };
        return Ok(vec![RepoInfo::parse(name, url, repos_dir)?]);
    }
    config
        .repos
        .iter()
        .map(|(name, url)| RepoInfo::parse(name, url, repos_dir))
        .collect()
}

/// Register a repo after validating its URL.
pub fn add_repo(config: &mut UserConfig, repos_dir: &Path, name: &str, url: &str) -> Result<RepoInfo> {
    let name = name.trim();
    if name.is_empty() || name.contains('/') {
        return Err(NidamError::Config {
            message: format!("Invalid repo name `{}`", name),
        });
    }
    let info = RepoInfo::parse(name, url, repos_dir)?;
    if let Some(old) = config.repos.insert(name.to_string(), url.trim().to_string()) {
        warn!("Replacing repo `{}` (was {})", name, old);
    }
    Ok(info)
}

/// Unregister a repo. The checkout is left on disk for `clean repos`.
pub fn remove_repo(config: &mut UserConfig, name: &str) -> Result<()> {
    if config.repos.remove(name).is_none() {
        return Err(NidamError::RepoNotFound {
            name: name.to_string(),
            known: config.repos.keys().cloned().collect(),
        });
    }
    if config.default_repo == name {
        config.default_repo = config.repos.keys().next().cloned().unwrap_or_default();
    }
    Ok(())
}

/// Clone the repo, or fast-forward an existing checkout to its branch head.
pub async fn update_repo(repo: &RepoInfo, verbose: bool) -> Result<()> {
    if repo.is_cloned() {
        info!("Updating repo {}", repo);
        let dir = repo.path.as_os_str();
        run_command(
            &CommandSpec::new("git")
                .arg("-C")
                .arg(dir)
                .args(["fetch", "--depth", "1", "origin", repo.branch.as_str()])
                .silent(!verbose),
        )
        .await?;
        run_command(
            &CommandSpec::new("git")
                .arg("-C")
                .arg(dir)
                .args(["reset", "--hard"])
                .arg(format!("origin/{}", repo.branch))
                .silent(!verbose),
        )
        .await?;
        return Ok(());
    }

    info!("Cloning repo {}", repo);
    if repo.path.exists() {
        std::fs::remove_dir_all(&repo.path).map_err(|e| NidamError::io_with_path(e, &repo.path))?;
    }
    if let Some(parent) = repo.path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| NidamError::io_with_path(e, parent))?;
    }
    run_command(
        &CommandSpec::new("git")
            .args(["clone", "--depth", "1", "--branch", repo.branch.as_str()])
            .arg(&repo.url)
            .arg(repo.path.as_os_str())
            .silent(!verbose),
    )
    .await?;
    Ok(())
}

/// Clone repos that have never been fetched. Failures are logged and skipped.
pub async fn ensure_repos_cloned(repos: &[RepoInfo], verbose: bool) {
    for repo in repos.iter().filter(|r| !r.is_cloned()) {
        if let Err(e) = update_repo(repo, verbose).await {
            warn!("Failed to clone repo {}: {}", repo, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_with_branch() {
        let repo = RepoInfo::parse(
            "default",
            "https://github.com/jileml/nidam-models@main",
            Path::new("/home/u/.nidam/repos"),
        )
        .unwrap();
        assert_eq!(repo.server, "github.com");
        assert_eq!(repo.owner, "jileml");
        assert_eq!(repo.repo, "nidam-models");
        assert_eq!(repo.branch, "main");
        assert_eq!(repo.url, "https://github.com/jileml/nidam-models");
        assert_eq!(
            repo.path,
            PathBuf::from("/home/u/.nidam/repos/github.com/jileml/nidam-models/main")
        );
        assert_eq!(
            repo.to_string(),
            "default (https://github.com/jileml/nidam-models@main)"
        );
    }

    #[test]
    fn test_parse_url_defaults() {
        let repo = RepoInfo::parse("mine", "gitlab.com/me/models.git", Path::new("/r")).unwrap();
        assert_eq!(repo.repo, "models");
        assert_eq!(repo.branch, "main");
        assert_eq!(repo.url, "https://gitlab.com/me/models");
    }

    #[test]
    fn test_parse_url_rejects_garbage() {
        assert!(RepoInfo::parse("bad", "not a url", Path::new("/r")).is_err());
        assert!(RepoInfo::parse("bad", "https://github.com/only-owner", Path::new("/r")).is_err());
    }

    #[test]
    fn test_list_repos_unknown_name() {
        let config = UserConfig::default();
        let err = list_repos(&config, Path::new("/r"), Some("nope")).unwrap_err();
        match err {
            NidamError::RepoNotFound { name, known } => {
                assert_eq!(name, "nope");
                assert_eq!(known, vec!["default"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_add_and_remove_repo() {
        let mut config = UserConfig::default();
        add_repo(&mut config, Path::new("/r"), "mine", "https://github.com/me/models@dev").unwrap();
        assert_eq!(list_repos(&config, Path::new("/r"), None).unwrap().len(), 2);
        assert!(add_repo(&mut config, Path::new("/r"), "bad", "nope").is_err());
        assert!(add_repo(&mut config, Path::new("/r"), "a/b", "https://github.com/me/m").is_err());

        remove_repo(&mut config, "default").unwrap();
        assert_eq!(config.default_repo, "mine");
        assert!(matches!(
            remove_repo(&mut config, "default"),
            Err(NidamError::RepoNotFound { .. })
        ));
    }
}
