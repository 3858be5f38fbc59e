//! Typed `jile.yaml` manifest.
//!
//! Parsed and validated once when a package is loaded. Fields nidam does not
//! use are ignored.

use crate::error::{NidamError, Result};
use crate::matcher::{parse_platforms, ModelRequirements, ResourceSpec};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A model package manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, deserialize_with = "scalar_string")]
    pub name: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,
    #[serde(default, deserialize_with = "scalar_map")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub envs: Vec<EnvEntry>,
    #[serde(default)]
    pub image: Option<ImageSpec>,
    #[serde(default)]
    pub schema: Option<ApiSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: ServiceConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
}

/// An environment variable the model server reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvEntry {
    pub name: String,
    /// Default value. `None` means the user must provide one.
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Quote it in YAML: an unquoted `3.10` reads as the number `3.1`.
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub python_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSchema {
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub route: String,
    #[serde(default)]
    pub input: serde_yaml::Value,
    #[serde(default)]
    pub output: serde_yaml::Value,
}

/// Compact description of one API route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSummary {
    pub input: BTreeMap<String, String>,
    pub output: String,
}

/// What `model get` shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestSummary {
    pub apis: BTreeMap<String, RouteSummary>,
    pub resources: ResourceSpec,
    pub envs: Vec<EnvEntry>,
    pub platforms: Vec<String>,
}

impl Manifest {
    /// Parse and validate manifest text. `path` is only used in errors.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let manifest: Manifest =
            serde_yaml::from_str(text).map_err(|e| NidamError::ManifestParse {
                path: path.to_path_buf(),
                message: e.to_string(),
                source: Some(e),
            })?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    /// Read and parse `path`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(NidamError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|e| NidamError::io_with_path(e, path))?;
        Self::parse(&text, path)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |field: &str, message: &str| NidamError::ManifestInvalid {
            path: PathBuf::from(path),
            field: field.to_string(),
            message: message.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name", "is required"));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("version", "is required"));
        }
        if self.services.is_empty() {
            return Err(invalid("services", "must list at least one service"));
        }
        if self.envs.iter().any(|e| e.name.trim().is_empty()) {
            return Err(invalid("envs", "has an entry without a name"));
        }
        Ok(())
    }

    /// `name:version` as declared inside the manifest.
    pub fn declared_tag(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    pub fn platforms(&self) -> Vec<String> {
        parse_platforms(self.labels.get("platforms").map(String::as_str))
    }

    /// Resources of the first service, empty when none are declared.
    pub fn resources(&self) -> ResourceSpec {
        self.services
            .first()
            .and_then(|s| s.config.resources.clone())
            .unwrap_or_default()
    }

    pub fn requirements(&self) -> ModelRequirements {
        ModelRequirements::new(self.platforms(), self.resources())
    }

    /// Python version for the runtime environment.
    pub fn python_version(&self, path: &Path) -> Result<&str> {
        self.image
            .as_ref()
            .and_then(|i| i.python_version.as_deref())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| NidamError::ManifestInvalid {
                path: path.to_path_buf(),
                field: "image.python_version".to_string(),
                message: "is required to build an environment".to_string(),
            })
    }

    /// Declared variables with their defaults, in manifest order.
    pub fn env_defaults(&self) -> Vec<(String, Option<String>)> {
        self.envs
            .iter()
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect()
    }

    pub fn summary(&self) -> ManifestSummary {
        let apis = self
            .schema
            .as_ref()
            .map(|s| {
                s.routes
                    .iter()
                    .map(|r| (r.route.clone(), summarize_route(r)))
                    .collect()
            })
            .unwrap_or_default();
        ManifestSummary {
            apis,
            resources: self.resources(),
            envs: self.envs.clone(),
            platforms: self.platforms(),
        }
    }
}

fn summarize_route(route: &Route) -> RouteSummary {
    let input = route
        .input
        .get("properties")
        .and_then(|p| p.as_mapping())
        .map(|props| {
            props
                .iter()
                .filter_map(|(k, v)| {
                    let key = k.as_str()?.to_string();
                    let kind = v.get("type").and_then(|t| t.as_str()).unwrap_or("any");
                    Some((key, kind.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();
    let output = route
        .output
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("any")
        .to_string();
    RouteSummary { input, output }
}

fn scalar_to_string(value: serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(scalar_to_string(value).unwrap_or_default())
}

fn optional_scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(scalar_to_string(value))
}

fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_yaml::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k, v)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LLAMA: &str = r#"
name: llama3
version: 8b-instruct-fp16
labels:
  platforms: linux,macos
  model_size: 8
services:
  - name: llm
    config:
      resources:
        gpu: 1
        gpu_type: nvidia-l4
envs:
  - name: HF_TOKEN
  - name: MAX_TOKENS
    value: 4096
image:
  python_version: "3.11"
schema:
  routes:
    - route: /v1/chat/completions
      input:
        properties:
          messages: {type: array}
          stream: {type: boolean}
      output:
        type: object
"#;

    fn path() -> PathBuf {
        PathBuf::from("jile.yaml")
    }

    #[test]
    fn test_parse_full_manifest() {
        let m = Manifest::parse(LLAMA, &path()).unwrap();
        assert_eq!(m.declared_tag(), "llama3:8b-instruct-fp16");
        assert_eq!(m.labels.get("model_size").map(String::as_str), Some("8"));
        assert_eq!(m.platforms(), vec!["linux", "macos"]);
        assert_eq!(m.resources(), ResourceSpec::gpu(1, "nvidia-l4"));
        assert_eq!(m.python_version(&path()).unwrap(), "3.11");
        assert_eq!(
            m.env_defaults(),
            vec![
                ("HF_TOKEN".to_string(), None),
                ("MAX_TOKENS".to_string(), Some("4096".to_string())),
            ]
        );
    }

    #[test]
    fn test_summary() {
        let summary = Manifest::parse(LLAMA, &path()).unwrap().summary();
        let route = &summary.apis["/v1/chat/completions"];
        assert_eq!(route.input["messages"], "array");
        assert_eq!(route.input["stream"], "boolean");
        assert_eq!(route.output, "object");
        assert_eq!(summary.platforms, vec!["linux", "macos"]);
    }

    #[test]
    fn test_minimal_manifest_defaults() {
        let m = Manifest::parse("name: tiny\nversion: 1\nservices:\n  - name: svc\n", &path()).unwrap();
        assert_eq!(m.version, "1");
        assert_eq!(m.platforms(), vec!["linux"]);
        assert!(m.resources().is_empty());
        assert!(m.summary().apis.is_empty());
        assert!(matches!(
            m.python_version(&path()),
            Err(NidamError::ManifestInvalid { .. })
        ));
    }

    #[test]
    fn test_missing_required_fields() {
        let err = Manifest::parse("version: 1\nservices: [{}]\n", &path()).unwrap_err();
        assert!(matches!(err, NidamError::ManifestInvalid { ref field, .. } if field == "name"));

        let err = Manifest::parse("name: a\nversion: 1\n", &path()).unwrap_err();
        assert!(matches!(err, NidamError::ManifestInvalid { ref field, .. } if field == "services"));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = Manifest::parse("name: [unterminated", &path()).unwrap_err();
        assert!(matches!(err, NidamError::ManifestParse { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Manifest::load(Path::new("/nonexistent/jile.yaml")).unwrap_err();
        assert!(matches!(err, NidamError::FileNotFound(_)));
    }
}
