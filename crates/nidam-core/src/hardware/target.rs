//! Deployment targets: a place a model could run.

use crate::accelerator::Accelerator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Where a target comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSource {
    Local,
    Cloud,
}

impl TargetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetSource::Local => "local",
            TargetSource::Cloud => "cloud",
        }
    }
}

impl fmt::Display for TargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU capabilities relevant to CPU-only inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub brand: String,
    pub cores: usize,
    /// Total system memory in GB.
    pub memory_gb: f64,
    /// Instruction set extensions detected at runtime, e.g. `AVX2`.
    pub accelerations: BTreeSet<String>,
}

impl CpuInfo {
    pub fn supports(&self, extension: &str) -> bool {
        self.accelerations
            .iter()
            .any(|a| a.eq_ignore_ascii_case(extension))
    }
}

/// One candidate machine: the local host or a cloud instance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub source: TargetSource,
    pub name: String,
    /// Hourly price as reported by the cloud catalog. Empty for local.
    pub price: String,
    pub platform: String,
    pub accelerators: Vec<Accelerator>,
    /// Only known for the local machine.
    pub cpu: Option<CpuInfo>,
}

impl DeploymentTarget {
    pub fn local(platform: impl Into<String>, accelerators: Vec<Accelerator>) -> Self {
        Self {
            source: TargetSource::Local,
            name: "local".to_string(),
            price: String::new(),
            platform: platform.into(),
            accelerators,
            cpu: None,
        }
    }

    pub fn cloud(
        name: impl Into<String>,
        price: impl Into<String>,
        accelerators: Vec<Accelerator>,
    ) -> Self {
        Self {
            source: TargetSource::Cloud,
            name: name.into(),
            price: price.into(),
            platform: "linux".to_string(),
            accelerators,
            cpu: None,
        }
    }

    pub fn with_cpu(mut self, cpu: CpuInfo) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Total accelerator memory of one brand, in GB.
    pub fn brand_memory(&self, brand: &str) -> f64 {
        self.accelerators
            .iter()
            .filter(|a| a.brand == brand)
            .map(|a| a.memory_size)
            .sum()
    }

    /// Total accelerator memory across all brands, in GB.
    pub fn total_memory(&self) -> f64 {
        self.accelerators.iter().map(|a| a.memory_size).sum()
    }

    /// Short human description: `null`, `A100 x2`, or `T4, A10G`.
    pub fn accelerators_repr(&self) -> String {
        let distinct: BTreeSet<&str> = self.accelerators.iter().map(|a| a.model.as_str()).collect();
        match distinct.len() {
            0 => "null".to_string(),
            1 => format!(
                "{} x{}",
                self.accelerators[0].model,
                self.accelerators.len()
            ),
            _ => self
                .accelerators
                .iter()
                .map(|a| a.model.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::{BRAND_AMD, BRAND_NVIDIA};

    fn a100() -> Accelerator {
        Accelerator::new("A100", 80.0, BRAND_NVIDIA)
    }

    #[test]
    fn test_accelerators_repr() {
        let none = DeploymentTarget::local("linux", vec![]);
        assert_eq!(none.accelerators_repr(), "null");

        let same = DeploymentTarget::cloud("gpu.a100.2", "4.10", vec![a100(), a100()]);
        assert_eq!(same.accelerators_repr(), "A100 x2");

        let mixed = DeploymentTarget::local(
            "linux",
            vec![a100(), Accelerator::new("Radeon RX 6800", 16.0, BRAND_AMD)],
        );
        assert_eq!(mixed.accelerators_repr(), "A100, Radeon RX 6800");
    }

    #[test]
    fn test_memory_totals() {
        let target = DeploymentTarget::local(
            "linux",
            vec![a100(), Accelerator::new("Radeon RX 6800", 16.0, BRAND_AMD)],
        );
        assert_eq!(target.brand_memory(BRAND_NVIDIA), 80.0);
        assert_eq!(target.brand_memory(BRAND_AMD), 16.0);
        assert_eq!(target.total_memory(), 96.0);
    }

    #[test]
    fn test_cpu_supports_is_case_insensitive() {
        let cpu = CpuInfo {
            accelerations: ["AVX2".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(cpu.supports("avx2"));
        assert!(!cpu.supports("avx512f"));
    }

    #[test]
    fn test_cloud_targets_are_linux() {
        let target = DeploymentTarget::cloud("cpu.small", "0.10", vec![]);
        assert_eq!(target.platform, "linux");
        assert_eq!(target.source, TargetSource::Cloud);
    }
}
