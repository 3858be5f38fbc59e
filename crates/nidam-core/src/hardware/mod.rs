//! Hardware discovery and deployment targets.
//!
//! - `target` - the [`DeploymentTarget`] shape shared by local and cloud
//! - `probe` - vendor-specific accelerator enumeration for the local machine

mod probe;
mod target;

pub use probe::{
    default_probes, detect_accelerators, detect_cpu, detect_cpu_accelerations,
    detect_local_target, detect_local_target_with, parse_intel_gpu_top, parse_nvidia_smi,
    parse_rocm_smi, AmdProbe, IntelProbe, NvidiaProbe, VendorProbe,
};
pub use target::{CpuInfo, DeploymentTarget, TargetSource};
