//! Environment specs and their fingerprints.

use crate::config::InstallConfig;
use crate::error::{NidamError, Result};
use crate::package::ModelPackage;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Environment variables with non-empty values, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct EnvVars(BTreeMap<String, String>);

impl EnvVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`. An empty value removes it.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.is_empty() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvVars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = EnvVars::new();
        for (k, v) in iter {
            vars.insert(k, v);
        }
        vars
    }
}

/// Cache key of a prepared environment: hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything that determines the contents of a runtime environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenvSpec {
    pub python_version: String,
    /// Raw requirements file text.
    pub requirements_txt: String,
    /// Human readable hint, e.g. `llama3_8b-1-`. Not part of the fingerprint.
    pub name_prefix: String,
    pub envs: EnvVars,
}

impl VenvSpec {
    /// Requirements with blank lines and comments dropped, option lines
    /// (`-i`, `--extra-index-url`, ...) sorted first, then dependencies sorted.
    pub fn normalized_requirements(&self) -> String {
        let mut parameters = Vec::new();
        let mut dependencies = Vec::new();
        for line in self.requirements_txt.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('-') {
                parameters.push(line);
            } else {
                dependencies.push(line);
            }
        }
        parameters.sort_unstable();
        dependencies.sort_unstable();
        parameters
            .into_iter()
            .chain(dependencies)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `KEY=value` lines of every retained variable, sorted by key.
    pub fn normalized_envs(&self) -> String {
        self.envs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Hash of the python version, the normalized requirements and a hash of
    /// the normalized variables. Each field is length-prefixed.
    pub fn fingerprint(&self) -> Fingerprint {
        let requirements = self.normalized_requirements();
        let envs_digest = Sha256::digest(self.normalized_envs().as_bytes());

        let mut hasher = Sha256::new();
        for field in [
            self.python_version.trim().as_bytes(),
            requirements.as_bytes(),
            envs_digest.as_slice(),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }
}

/// Lock file name preferred over the plain requirements file.
fn lock_filename() -> String {
    format!("requirements.{}.txt", InstallConfig::LOCK_SUFFIX)
}

/// Build the spec for `package`.
///
/// Requirements come from `env/python/requirements.lock.txt`, falling back
/// to `env/python/requirements.txt`. Variables are the manifest defaults
/// overridden by `runtime_envs`; variables the manifest does not declare are
/// ignored.
pub fn resolve_venv_spec(package: &ModelPackage, runtime_envs: &EnvVars) -> Result<VenvSpec> {
    let python_dir = package.path.join("env").join("python");
    let candidates: [PathBuf; 2] = [
        python_dir.join(lock_filename()),
        python_dir.join(InstallConfig::REQUIREMENTS_FILENAME),
    ];
    let Some(requirements_file) = candidates.iter().find(|p| p.is_file()) else {
        return Err(NidamError::FileNotFound(candidates[1].clone()));
    };
    let requirements_txt = std::fs::read_to_string(requirements_file)
        .map_err(|e| NidamError::io_with_path(e, requirements_file))?;

    let python_version = package
        .manifest
        .python_version(&package.manifest_path())?
        .trim()
        .to_string();

    let envs = package
        .manifest
        .env_defaults()
        .into_iter()
        .filter_map(|(name, default)| {
            let value = runtime_envs
                .get(&name)
                .map(str::to_string)
                .or(default)?;
            Some((name, value))
        })
        .collect();

    Ok(VenvSpec {
        python_version,
        requirements_txt: requirements_txt.trim().to_string(),
        name_prefix: format!("{}-1-", package.tag().replace(':', "_")),
        envs,
    })
}
