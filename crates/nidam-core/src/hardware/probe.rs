//! Local hardware discovery.
//!
//! Each GPU vendor is queried through its own command line tool. Detection is
//! best effort: a missing tool or unparseable output counts as zero
//! accelerators for that vendor and never fails the probe as a whole.

use crate::accelerator::{Accelerator, BRAND_AMD, BRAND_INTEL, BRAND_NVIDIA};
use crate::error::{NidamError, Result};
use crate::hardware::target::{CpuInfo, DeploymentTarget};
use crate::platform;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::process::Command;
use sysinfo::System;
use tracing::debug;

/// Memory assumed for Intel devices that do not report it, in MB.
const INTEL_DEFAULT_MEMORY_MB: f64 = 4096.0;

/// Enumerates the accelerators of one vendor.
pub trait VendorProbe: Send + Sync {
    /// Brand reported on detected accelerators.
    fn vendor(&self) -> &'static str;

    /// Query the vendor tool.
    fn detect(&self) -> Result<Vec<Accelerator>>;
}

/// NVIDIA GPUs via `nvidia-smi`.
pub struct NvidiaProbe;

impl VendorProbe for NvidiaProbe {
    fn vendor(&self) -> &'static str {
        BRAND_NVIDIA
    }

    fn detect(&self) -> Result<Vec<Accelerator>> {
        let stdout = run_tool(
            "nvidia-smi",
            &["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"],
        )?;
        Ok(parse_nvidia_smi(&stdout))
    }
}

/// AMD GPUs via `rocm-smi`.
pub struct AmdProbe;

impl VendorProbe for AmdProbe {
    fn vendor(&self) -> &'static str {
        BRAND_AMD
    }

    fn detect(&self) -> Result<Vec<Accelerator>> {
        let stdout = run_tool("rocm-smi", &[])?;
        Ok(parse_rocm_smi(&stdout))
    }
}

/// Intel GPUs via `intel_gpu_top -J`.
pub struct IntelProbe;

impl VendorProbe for IntelProbe {
    fn vendor(&self) -> &'static str {
        BRAND_INTEL
    }

    fn detect(&self) -> Result<Vec<Accelerator>> {
        let stdout = run_tool("intel_gpu_top", &["-J"])?;
        parse_intel_gpu_top(&stdout)
    }
}

fn run_tool(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| NidamError::Other(format!("Failed to run {}: {}", program, e)))?;
    if !output.status.success() {
        return Err(NidamError::command_failed(
            program,
            output.status,
            &output.stderr,
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `nvidia-smi --query-gpu=name,memory.total --format=csv,noheader,nounits`.
///
/// One line per card; memory is reported in MiB.
pub fn parse_nvidia_smi(text: &str) -> Vec<Accelerator> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (name, memory) = line.rsplit_once(',')?;
            let memory_mb = memory.trim().parse::<f64>().ok()?;
            Some(Accelerator::new(
                name.trim(),
                memory_mb / 1024.0,
                BRAND_NVIDIA,
            ))
        })
        .collect()
}

/// Parse `rocm-smi` lines of the form `GPU 0: Radeon RX 6800 (Memory: 16384MB)`.
pub fn parse_rocm_smi(text: &str) -> Vec<Accelerator> {
    let Ok(re) = Regex::new(r"GPU (\d+): (.*?) \(Memory: (\d+)MB\)") else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| {
            let model = caps.get(2)?.as_str();
            let memory_mb = caps.get(3)?.as_str().parse::<f64>().ok()?;
            Some(Accelerator::new(model, memory_mb / 1024.0, BRAND_AMD))
        })
        .collect()
}

#[derive(Deserialize)]
struct IntelReport {
    devices: Vec<IntelDevice>,
}

#[derive(Deserialize)]
struct IntelDevice {
    name: String,
    memory_size: Option<f64>,
}

/// Parse the JSON report of `intel_gpu_top -J`.
pub fn parse_intel_gpu_top(text: &str) -> Result<Vec<Accelerator>> {
    let report: IntelReport = serde_json::from_str(text)?;
    Ok(report
        .devices
        .into_iter()
        .map(|d| {
            let memory_mb = d.memory_size.unwrap_or(INTEL_DEFAULT_MEMORY_MB);
            Accelerator::new(d.name, memory_mb / 1024.0, BRAND_INTEL)
        })
        .collect())
}

/// The probes used for the local machine, in reporting order.
pub fn default_probes() -> Vec<Box<dyn VendorProbe>> {
    vec![
        Box::new(NvidiaProbe),
        Box::new(AmdProbe),
        Box::new(IntelProbe),
    ]
}

/// Run every probe, treating individual failures as "none found".
pub fn detect_accelerators(probes: &[Box<dyn VendorProbe>]) -> Vec<Accelerator> {
    let mut accelerators = Vec::new();
    for probe in probes {
        match probe.detect() {
            Ok(found) => {
                debug!("Detected {} {} accelerator(s)", found.len(), probe.vendor());
                accelerators.extend(found);
            }
            Err(e) => {
                debug!("{} accelerator detection unavailable: {}", probe.vendor(), e);
            }
        }
    }
    accelerators
}

/// Instruction set extensions of the running CPU that matter for inference.
pub fn detect_cpu_accelerations() -> BTreeSet<String> {
    #[allow(unused_mut)]
    let mut found = BTreeSet::new();

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if std::arch::is_x86_feature_detected!("avx") {
            found.insert("AVX".to_string());
        }
        if std::arch::is_x86_feature_detected!("avx2") {
            found.insert("AVX2".to_string());
        }
        if std::arch::is_x86_feature_detected!("avx512f") {
            found.insert("AVX512F".to_string());
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        found.insert("NEON".to_string());
    }

    found
}

/// Describe the local CPU.
pub fn detect_cpu() -> CpuInfo {
    let mut system = System::new();
    system.refresh_cpu_all();
    system.refresh_memory();

    let brand = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .unwrap_or_else(|| "Unknown CPU".to_string());

    CpuInfo {
        brand,
        cores: system.cpus().len(),
        memory_gb: system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
        accelerations: detect_cpu_accelerations(),
    }
}

/// Describe the local machine as a deployment target.
pub fn detect_local_target() -> Result<DeploymentTarget> {
    detect_local_target_with(&default_probes())
}

/// Same as [`detect_local_target`] with explicit vendor probes.
pub fn detect_local_target_with(probes: &[Box<dyn VendorProbe>]) -> Result<DeploymentTarget> {
    let platform = platform::current_platform();
    if !platform::is_supported_platform() {
        return Err(NidamError::UnsupportedPlatform(platform.to_string()));
    }

    let accelerators = detect_accelerators(probes);
    Ok(DeploymentTarget::local(platform, accelerators).with_cpu(detect_cpu()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Vec<Accelerator>);

    impl VendorProbe for FixedProbe {
        fn vendor(&self) -> &'static str {
            BRAND_NVIDIA
        }

        fn detect(&self) -> Result<Vec<Accelerator>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenProbe;

    impl VendorProbe for BrokenProbe {
        fn vendor(&self) -> &'static str {
            BRAND_AMD
        }

        fn detect(&self) -> Result<Vec<Accelerator>> {
            Err(NidamError::Other("rocm-smi: not found".into()))
        }
    }

    #[test]
    fn test_parse_nvidia_smi() {
        let text = "NVIDIA A100-SXM4-80GB, 81920\nNVIDIA A100-SXM4-80GB, 81920\n\n";
        let gpus = parse_nvidia_smi(text);
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].model, "NVIDIA A100-SXM4-80GB");
        assert_eq!(gpus[0].memory_size, 80.0);
        assert_eq!(gpus[0].brand, BRAND_NVIDIA);
    }

    #[test]
    fn test_parse_nvidia_smi_skips_garbage() {
        let gpus = parse_nvidia_smi("No devices were found\nTesla T4, [N/A]\n");
        assert!(gpus.is_empty());
    }

    #[test]
    fn test_parse_rocm_smi() {
        let text = "===== ROCm System Management Interface =====\n\
                    GPU 0: Radeon RX 6800 (Memory: 16384MB)\n\
                    GPU 1: Radeon RX 6900 XT (Memory: 16384MB)\n";
        let gpus = parse_rocm_smi(text);
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[1].model, "Radeon RX 6900 XT");
        assert_eq!(gpus[1].memory_size, 16.0);
        assert_eq!(gpus[1].brand, BRAND_AMD);
    }

    #[test]
    fn test_parse_intel_gpu_top_defaults_memory() {
        let text = r#"{"devices": [{"name": "Intel Arc A770", "memory_size": 16384}, {"name": "Intel Xe"}]}"#;
        let gpus = parse_intel_gpu_top(text).unwrap();
        assert_eq!(gpus[0].memory_size, 16.0);
        assert_eq!(gpus[1].memory_size, 4.0);
        assert_eq!(gpus[1].brand, BRAND_INTEL);
    }

    #[test]
    fn test_parse_intel_gpu_top_rejects_invalid_json() {
        assert!(parse_intel_gpu_top("not json").is_err());
    }

    #[test]
    fn test_failed_vendor_counts_as_zero() {
        let probes: Vec<Box<dyn VendorProbe>> = vec![
            Box::new(BrokenProbe),
            Box::new(FixedProbe(vec![Accelerator::new("T4", 16.0, BRAND_NVIDIA)])),
        ];
        let found = detect_accelerators(&probes);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].model, "T4");
    }

    #[test]
    fn test_local_target_with_probes() {
        let probes: Vec<Box<dyn VendorProbe>> = vec![Box::new(BrokenProbe)];
        if platform::is_supported_platform() {
            let target = detect_local_target_with(&probes).unwrap();
            assert!(target.accelerators.is_empty());
            assert_eq!(target.platform, platform::current_platform());
            assert!(target.cpu.is_some());
        }
    }
}
