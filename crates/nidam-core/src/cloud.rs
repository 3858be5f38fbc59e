//! Cloud deployment through the `jileml` CLI.
//!
//! nidam does not talk to the cloud control plane itself. It asks the
//! `jileml` CLI for the login context and instance catalog, and hands the
//! final deploy to `jiile deploy`.

use crate::accelerator::AcceleratorCatalog;
use crate::config::AppConfig;
use crate::error::{NidamError, Result};
use crate::hardware::DeploymentTarget;
use crate::package::ModelPackage;
use crate::process::{capture_stdout, run_command, CommandSpec};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Variable naming the jileml home directory.
pub const JIILE_HOME_ENV: &str = "JIILE_HOME";
/// Cloud credentials file inside a jileml home.
pub const CLOUD_CONFIG_FILENAME: &str = ".yatai.yaml";

const LOGIN_GUIDANCE: &str = "log in with `jileml cloud login`. \
Accounts are available at https://cloud.jileml.com, or bring your own cluster (https://jileml.com/contact)";

/// Logged-in cloud context as reported by `jileml cloud current-context`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloudContext {
    #[serde(default)]
    pub name: Option<String>,
    pub endpoint: String,
}

/// One entry of `jileml deployment list-instance-types -o json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstanceType {
    pub name: String,
    #[serde(default, deserialize_with = "json_scalar")]
    pub price: String,
    #[serde(default, deserialize_with = "json_scalar")]
    pub gpu: String,
    #[serde(default)]
    pub gpu_type: Option<String>,
}

fn json_scalar<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

impl InstanceType {
    /// Deployment target for this instance type. Accelerators are only
    /// listed when the GPU type is in the catalog.
    pub fn to_target(&self, catalog: &AcceleratorCatalog) -> DeploymentTarget {
        let count = self.gpu.trim().parse::<f64>().unwrap_or(0.0).max(0.0) as usize;
        let accelerators = match self.gpu_type.as_deref().and_then(|t| catalog.get(t)) {
            Some(accelerator) if count > 0 => vec![accelerator.clone(); count],
            _ => Vec::new(),
        };
        DeploymentTarget::cloud(&self.name, &self.price, accelerators)
    }
}

/// Parse the instance type listing into cloud targets.
pub fn parse_instance_types(json: &str, catalog: &AcceleratorCatalog) -> Result<Vec<DeploymentTarget>> {
    let types: Vec<InstanceType> = serde_json::from_str(json)?;
    Ok(types.iter().map(|t| t.to_target(catalog)).collect())
}

/// Fail with login guidance unless the `jileml` CLI is logged in.
pub async fn ensure_cloud_context() -> Result<CloudContext> {
    let spec = CommandSpec::new("jileml").args(["cloud", "current-context"]);
    let stdout = capture_stdout(&spec)
        .await
        .map_err(|e| {
            debug!("current-context failed: {}", e);
            NidamError::CloudNotLoggedIn(LOGIN_GUIDANCE.to_string())
        })?;
    let context: CloudContext = serde_json::from_str(&stdout)
        .map_err(|_| NidamError::CloudNotLoggedIn(LOGIN_GUIDANCE.to_string()))?;
    info!("jileml already logged in: {}", context.endpoint);
    Ok(context)
}

/// Cloud instance types as deployment targets.
///
/// Listing failures are logged and yield no targets.
pub async fn list_cloud_targets(catalog: &AcceleratorCatalog) -> Result<Vec<DeploymentTarget>> {
    ensure_cloud_context().await?;
    let spec = CommandSpec::new("jileml").args(["deployment", "list-instance-types", "-o", "json"]);
    let stdout = match capture_stdout(&spec).await {
        Ok(stdout) => stdout,
        Err(e) => {
            warn!("Failed to get cloud instance types: {}", e);
            return Ok(Vec::new());
        }
    };
    match parse_instance_types(&stdout, catalog) {
        Ok(targets) => Ok(targets),
        Err(e) => {
            warn!("Failed to parse cloud instance types: {}", e);
            Ok(Vec::new())
        }
    }
}

/// Value for every variable the manifest declares.
///
/// `lookup` (normally the process environment) wins over manifest defaults.
/// A variable with neither is a [`NidamError::MissingEnvVar`].
pub fn resolve_deploy_envs<F>(package: &ModelPackage, lookup: F) -> Result<Vec<(String, String)>>
where
    F: Fn(&str) -> Option<String>,
{
    let declared = package.manifest.env_defaults();
    if !declared.is_empty() {
        let names: Vec<&str> = declared.iter().map(|(n, _)| n.as_str()).collect();
        info!("This model requires the following environment variables: {:?}", names);
    }
    declared
        .into_iter()
        .map(|(name, default)| {
            let value = lookup(&name)
                .filter(|v| !v.is_empty())
                .or(default.filter(|v| !v.is_empty()))
                .ok_or_else(|| NidamError::MissingEnvVar(name.clone()))?;
            Ok((name, value))
        })
        .collect()
}

/// The `jiile deploy` invocation for `package`.
pub fn deploy_command(
    package: &ModelPackage,
    envs: &[(String, String)],
    target: Option<&DeploymentTarget>,
) -> CommandSpec {
    let mut spec = CommandSpec::new("jiile")
        .args(["deploy", package.jileml_tag().as_str()])
        .env(JIILE_HOME_ENV, package.jileml_home().to_string_lossy());
    for (name, value) in envs {
        spec = spec.arg("--env").arg(format!("{}={}", name, value));
    }
    if let Some(target) = target {
        spec = spec.args(["--instance-type", target.name.as_str()]);
    }
    spec.silent(false)
}

/// Where the cloud credentials live: `$JIILE_HOME/.yatai.yaml`, else
/// `~/jileml/.yatai.yaml`.
pub fn cloud_config_path(jiile_home: Option<&Path>) -> Result<PathBuf> {
    if let Some(home) = jiile_home {
        return Ok(home.join(CLOUD_CONFIG_FILENAME));
    }
    let home = dirs::home_dir().ok_or_else(|| NidamError::Config {
        message: "Could not determine home directory".to_string(),
    })?;
    Ok(home.join("jileml").join(CLOUD_CONFIG_FILENAME))
}

/// Copy the cloud credentials into the package repo's jileml home, replacing
/// any stale copy.
pub fn stage_cloud_config(package: &ModelPackage, source: &Path) -> Result<PathBuf> {
    if !source.is_file() {
        return Err(NidamError::Config {
            message: format!("Cannot find cloud config at {}", source.display()),
        });
    }
    let home = package.jileml_home();
    std::fs::create_dir_all(&home).map_err(|e| NidamError::io_with_path(e, &home))?;
    let dest = home.join(CLOUD_CONFIG_FILENAME);
    if dest.exists() {
        std::fs::remove_file(&dest).map_err(|e| NidamError::io_with_path(e, &dest))?;
    }
    std::fs::copy(source, &dest).map_err(|e| NidamError::io_with_path(e, &dest))?;
    Ok(dest)
}

/// Deploy `package` to `target` (or the cloud's default instance type).
pub async fn deploy(package: &ModelPackage, target: Option<&DeploymentTarget>) -> Result<()> {
    ensure_cloud_context().await?;
    let envs = resolve_deploy_envs(package, |name| std::env::var(name).ok())?;
    let jiile_home = std::env::var_os(JIILE_HOME_ENV).map(PathBuf::from);
    let source = cloud_config_path(jiile_home.as_deref())?;
    stage_cloud_config(package, &source)?;

    info!(
        "Deploying {} with {}",
        package,
        target.map_or("the default instance type", |t| t.name.as_str())
    );
    run_command(&deploy_command(package, &envs, target)).await?;
    debug!("{} deploy finished", AppConfig::APP_NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;
    use crate::package::{list_repos, resolve_package, ManifestCache};
    use tempfile::TempDir;

    #[test]
    fn test_parse_instance_types() {
        let catalog = AcceleratorCatalog::builtin();
        let json = r#"[
            {"name": "cpu.small", "price": "0.10"},
            {"name": "gpu.t4.2", "price": 1.2, "gpu": 2, "gpu_type": "nvidia-tesla-t4"},
            {"name": "gpu.h200", "price": "9", "gpu": "1", "gpu_type": "nvidia-h200"}
        ]"#;
        let targets = parse_instance_types(json, &catalog).unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].accelerators_repr(), "null");
        assert_eq!(targets[1].accelerators_repr(), "T4 x2");
        assert_eq!(targets[1].price, "1.2");
        assert_eq!(targets[1].platform, "linux");
        assert!(targets[2].accelerators.is_empty());
    }

    #[test]
    fn test_parse_instance_types_rejects_garbage() {
        assert!(parse_instance_types("nope", &AcceleratorCatalog::builtin()).is_err());
    }

    fn package(temp: &TempDir) -> ModelPackage {
        let config = UserConfig::default();
        let repo = list_repos(&config, temp.path(), None).unwrap().remove(0);
        let dir = repo.path.join("jileml/jiles/llama3/8b");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("jile.yaml"),
            "name: llama3\nversion: 8b\nservices: [{}]\nenvs:\n  - name: HF_TOKEN\n  - name: MAX_TOKENS\n    value: \"4096\"\n",
        )
        .unwrap();
        resolve_package(&config, temp.path(), "llama3", None, &ManifestCache::default()).unwrap()
    }

    #[test]
    fn test_resolve_deploy_envs() {
        let temp = TempDir::new().unwrap();
        let package = package(&temp);

        let envs = resolve_deploy_envs(&package, |name| {
            (name == "HF_TOKEN").then(|| "secret".to_string())
        })
        .unwrap();
        assert_eq!(
            envs,
            vec![
                ("HF_TOKEN".to_string(), "secret".to_string()),
                ("MAX_TOKENS".to_string(), "4096".to_string()),
            ]
        );

        let err = resolve_deploy_envs(&package, |_| None).unwrap_err();
        assert!(matches!(err, NidamError::MissingEnvVar(ref n) if n == "HF_TOKEN"));
    }

    #[test]
    fn test_deploy_command() {
        let temp = TempDir::new().unwrap();
        let package = package(&temp);
        let target = DeploymentTarget::cloud("gpu.t4.1", "0.5", vec![]);
        let envs = vec![("HF_TOKEN".to_string(), "x".to_string())];

        let spec = deploy_command(&package, &envs, Some(&target));
        assert_eq!(
            spec.display(),
            "jiile deploy llama3:8b --env HF_TOKEN=x --instance-type gpu.t4.1"
        );
        assert_eq!(
            spec.env.get(JIILE_HOME_ENV).map(PathBuf::from),
            Some(package.jileml_home())
        );
    }

    #[test]
    fn test_stage_cloud_config() {
        let temp = TempDir::new().unwrap();
        let package = package(&temp);
        let source = temp.path().join("creds.yaml");

        assert!(stage_cloud_config(&package, &source).is_err());
        std::fs::write(&source, "contexts: []").unwrap();
        let dest = stage_cloud_config(&package, &source).unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "contexts: []");
    }

    #[test]
    fn test_cloud_config_path_prefers_env() {
        let path = cloud_config_path(Some(Path::new("/srv/jileml"))).unwrap();
        assert_eq!(path, PathBuf::from("/srv/jileml/.yatai.yaml"));
    }
}
