//! Declared model resource requirements.

use crate::accelerator::AcceleratorCatalog;
use serde::{Deserialize, Deserializer, Serialize};

/// Platforms assumed when a model does not declare any.
pub const DEFAULT_PLATFORM: &str = "linux";

/// Hardware a model asks for, from `services[0].config.resources`.
///
/// Every field is optional in the manifest. A spec where all fields are
/// absent or zero carries no constraint at all, see [`ResourceSpec::is_empty`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, deserialize_with = "lenient_count")]
    pub cpu: Option<u32>,
    /// Memory in GB. Kubernetes style quantities (`16Gi`, `512Mi`) are accepted.
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub memory: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub gpu: Option<u32>,
    #[serde(default)]
    pub gpu_type: Option<String>,
}

impl ResourceSpec {
    /// A spec asking for `count` accelerators of catalog type `gpu_type`.
    pub fn gpu(count: u32, gpu_type: impl Into<String>) -> Self {
        Self {
            gpu: Some(count),
            gpu_type: Some(gpu_type.into()),
            ..Default::default()
        }
    }

    /// A spec asking for CPU resources only.
    pub fn cpu_only(cpu: u32, memory: f64) -> Self {
        Self {
            cpu: Some(cpu),
            memory: Some(memory),
            ..Default::default()
        }
    }

    /// True when nothing is constrained.
    pub fn is_empty(&self) -> bool {
        self.cpu.unwrap_or(0) == 0
            && self.memory.unwrap_or(0.0) == 0.0
            && self.gpu_count() == 0
            && self.gpu_type.as_deref().map_or(true, |t| t.trim().is_empty())
    }

    pub fn gpu_count(&self) -> u32 {
        self.gpu.unwrap_or(0)
    }

    /// `80G` for one card, `80Gx2` for several, empty when no known GPU is
    /// required.
    pub fn pretty_gpu(&self, catalog: &AcceleratorCatalog) -> String {
        let count = self.gpu_count();
        if count == 0 {
            return String::new();
        }
        let Some(accelerator) = self.gpu_type.as_deref().and_then(|t| catalog.get(t)) else {
            return String::new();
        };
        if count > 1 {
            format!("{:.0}Gx{}", accelerator.memory_size, count)
        } else {
            format!("{:.0}G", accelerator.memory_size)
        }
    }
}

/// What the matcher needs to know about a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequirements {
    /// Platforms the model supports, e.g. `["linux"]`.
    pub platforms: Vec<String>,
    pub resources: ResourceSpec,
}

impl Default for ModelRequirements {
    fn default() -> Self {
        Self {
            platforms: vec![DEFAULT_PLATFORM.to_string()],
            resources: ResourceSpec::default(),
        }
    }
}

impl ModelRequirements {
    pub fn new(platforms: Vec<String>, resources: ResourceSpec) -> Self {
        Self {
            platforms,
            resources,
        }
    }

    /// Requirements from a comma separated platforms label.
    pub fn from_label(platforms: Option<&str>, resources: ResourceSpec) -> Self {
        Self::new(parse_platforms(platforms), resources)
    }

    pub fn supports_platform(&self, platform: &str) -> bool {
        self.platforms.iter().any(|p| p == platform)
    }
}

/// Split a `platforms` label, defaulting to `linux` when absent or blank.
pub fn parse_platforms(label: Option<&str>) -> Vec<String> {
    let parsed: Vec<String> = label
        .unwrap_or(DEFAULT_PLATFORM)
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parsed.is_empty() {
        vec![DEFAULT_PLATFORM.to_string()]
    } else {
        parsed
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberOrString>::deserialize(deserializer)?;
    Ok(match value {
        None => None,
        Some(NumberOrString::Number(n)) => Some(n.max(0.0) as u32),
        Some(NumberOrString::Text(s)) => parse_quantity(&s).map(|n| n.max(0.0) as u32),
    })
}

fn lenient_quantity<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberOrString>::deserialize(deserializer)?;
    Ok(match value {
        None => None,
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::Text(s)) => parse_quantity(&s),
    })
}

/// Parse `16`, `16Gi`, `512Mi`, `1Ti`, `8G` into GB.
pub fn parse_quantity(text: &str) -> Option<f64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    let factor = match unit.trim() {
        "" | "G" | "Gi" | "GB" => 1.0,
        "M" | "Mi" | "MB" => 1.0 / 1024.0,
        "K" | "Ki" | "KB" => 1.0 / (1024.0 * 1024.0),
        "T" | "Ti" | "TB" => 1024.0,
        _ => return None,
    };
    Some(value * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_spec() {
        assert!(ResourceSpec::default().is_empty());
        let zeros = ResourceSpec {
            cpu: Some(0),
            memory: Some(0.0),
            gpu: Some(0),
            gpu_type: Some(String::new()),
        };
        assert!(zeros.is_empty());
        assert!(!ResourceSpec::cpu_only(2, 8.0).is_empty());
        assert!(!ResourceSpec::gpu(1, "nvidia-tesla-t4").is_empty());
    }

    #[test]
    fn test_deserialize_lenient_fields() {
        let spec: ResourceSpec = serde_yaml::from_str(
            "cpu: \"4\"\nmemory: 16Gi\ngpu: 2\ngpu_type: nvidia-tesla-a100\n",
        )
        .unwrap();
        assert_eq!(spec.cpu, Some(4));
        assert_eq!(spec.memory, Some(16.0));
        assert_eq!(spec.gpu, Some(2));
        assert_eq!(spec.gpu_type.as_deref(), Some("nvidia-tesla-a100"));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("8"), Some(8.0));
        assert_eq!(parse_quantity("512Mi"), Some(0.5));
        assert_eq!(parse_quantity("1Ti"), Some(1024.0));
        assert_eq!(parse_quantity("lots"), None);
    }

    #[test]
    fn test_parse_platforms() {
        assert_eq!(parse_platforms(None), vec!["linux"]);
        assert_eq!(parse_platforms(Some("linux, windows")), vec!["linux", "windows"]);
        assert_eq!(parse_platforms(Some(" ")), vec!["linux"]);
    }

    #[test]
    fn test_pretty_gpu() {
        let catalog = AcceleratorCatalog::builtin();
        assert_eq!(ResourceSpec::gpu(1, "nvidia-a100-80g").pretty_gpu(&catalog), "80G");
        assert_eq!(ResourceSpec::gpu(2, "nvidia-tesla-t4").pretty_gpu(&catalog), "16Gx2");
        assert_eq!(ResourceSpec::gpu(1, "mystery-gpu").pretty_gpu(&catalog), "");
        assert_eq!(ResourceSpec::default().pretty_gpu(&catalog), "");
    }
}
