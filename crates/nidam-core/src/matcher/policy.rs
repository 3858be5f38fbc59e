//! Selection overrides layered on top of [`score`](super::score).

use super::{rank, score, ModelRequirements, RankedTarget};
use crate::accelerator::AcceleratorCatalog;
use crate::error::{NidamError, Result};
use crate::hardware::DeploymentTarget;

/// Accelerator families considered runnable whenever they have enough memory.
pub const PRIORITY_TIERS: &[&str] = &["H100", "A100", "RTX 40", "MI300", "M2", "M3"];

/// CPU extension required to run models on the CPU.
const FORCE_CPU_EXTENSION: &str = "AVX2";

/// Score reported when an override declares a target runnable.
const OVERRIDE_SCORE: f64 = 1.0;

/// How the user wants a target chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Only accept targets whose accelerator description contains this text.
    pub gpu_override: Option<String>,
    /// Run on the CPU. Needs AVX2.
    pub force_cpu: bool,
}

impl SelectionPolicy {
    pub fn new(gpu_override: Option<String>, force_cpu: bool) -> Self {
        Self {
            gpu_override: gpu_override.filter(|g| !g.trim().is_empty()),
            force_cpu,
        }
    }

    /// Score of `requirements` on `target` with the overrides applied.
    ///
    /// `force_cpu` wins over `gpu_override`. Both are taken at face value and
    /// skip the platform gate. Without them a priority tier card with enough
    /// memory is runnable outright; everything else falls through to the
    /// density score.
    pub fn evaluate(
        &self,
        requirements: &ModelRequirements,
        target: &DeploymentTarget,
        catalog: &AcceleratorCatalog,
    ) -> f64 {
        if self.force_cpu {
            let avx2 = target
                .cpu
                .as_ref()
                .is_some_and(|cpu| cpu.supports(FORCE_CPU_EXTENSION));
            return if avx2 { OVERRIDE_SCORE } else { 0.0 };
        }

        if let Some(wanted) = &self.gpu_override {
            let repr = target.accelerators_repr().to_lowercase();
            return if repr.contains(&wanted.trim().to_lowercase()) {
                OVERRIDE_SCORE
            } else {
                0.0
            };
        }

        if requirements.supports_platform(&target.platform) {
            if let Some(required) = required_memory(requirements, catalog) {
                let tier_fits = target.accelerators.iter().any(|a| {
                    PRIORITY_TIERS.iter().any(|tier| a.model.contains(tier))
                        && a.memory_size >= required
                });
                if tier_fits {
                    return score(requirements, target, catalog).max(OVERRIDE_SCORE);
                }
            }
        }

        score(requirements, target, catalog)
    }

    pub fn can_run(
        &self,
        requirements: &ModelRequirements,
        target: &DeploymentTarget,
        catalog: &AcceleratorCatalog,
    ) -> bool {
        self.evaluate(requirements, target, catalog) > 0.0
    }

    /// Like [`rank_for`](super::rank_for), scored with the overrides applied.
    pub fn rank(
        &self,
        requirements: &ModelRequirements,
        targets: Vec<DeploymentTarget>,
        catalog: &AcceleratorCatalog,
    ) -> Result<Vec<RankedTarget>> {
        if targets.is_empty() {
            return Err(NidamError::NoAvailableTarget);
        }
        Ok(rank(targets, |t| self.evaluate(requirements, t, catalog)))
    }

    /// The first target this policy accepts, best first.
    pub fn best_target(
        &self,
        requirements: &ModelRequirements,
        targets: Vec<DeploymentTarget>,
        catalog: &AcceleratorCatalog,
    ) -> Result<RankedTarget> {
        self.rank(requirements, targets, catalog)?
            .into_iter()
            .find(|r| r.score > 0.0)
            .ok_or(NidamError::NoAvailableTarget)
    }
}

/// Per-card memory the model needs, `0` when it needs no GPU. `None` when the
/// GPU type is unknown.
fn required_memory(requirements: &ModelRequirements, catalog: &AcceleratorCatalog) -> Option<f64> {
    let resources = &requirements.resources;
    if resources.gpu_count() == 0 {
        return Some(0.0);
    }
    let gpu_type = resources.gpu_type.as_deref()?;
    catalog.get(gpu_type).map(|a| a.memory_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::{Accelerator, BRAND_NVIDIA};
    use crate::hardware::CpuInfo;
    use crate::matcher::ResourceSpec;

    fn target(accelerators: Vec<Accelerator>) -> DeploymentTarget {
        DeploymentTarget::local("linux", accelerators)
    }

    fn cpu(extensions: &[&str]) -> CpuInfo {
        CpuInfo {
            accelerations: extensions.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_overrides_is_plain_score() {
        let catalog = AcceleratorCatalog::builtin();
        let model = ModelRequirements::from_label(None, ResourceSpec::gpu(1, "nvidia-tesla-t4"));
        let t = target(vec![Accelerator::new("T4", 16.0, BRAND_NVIDIA)]);
        let policy = SelectionPolicy::default();
        assert_eq!(policy.evaluate(&model, &t, &catalog), score(&model, &t, &catalog));
        assert!(!policy.can_run(&model, &target(vec![]), &catalog));
    }

    #[test]
    fn test_priority_tier_shortcut() {
        let catalog = AcceleratorCatalog::builtin();
        // Two T4s requested, one A100 present: density says no, the tier says yes.
        let model = ModelRequirements::from_label(None, ResourceSpec::gpu(2, "nvidia-tesla-t4"));
        let t = target(vec![Accelerator::new("NVIDIA A100-SXM4-80GB", 80.0, BRAND_NVIDIA)]);
        assert_eq!(score(&model, &t, &catalog), 0.0);
        assert!(SelectionPolicy::default().can_run(&model, &t, &catalog));
    }

    #[test]
    fn test_priority_tier_needs_memory() {
        let catalog = AcceleratorCatalog::builtin();
        let model = ModelRequirements::from_label(None, ResourceSpec::gpu(1, "nvidia-a100-80g"));
        let t = target(vec![Accelerator::new("A100", 40.0, BRAND_NVIDIA)]);
        assert!(!SelectionPolicy::default().can_run(&model, &t, &catalog));
    }

    #[test]
    fn test_priority_tier_respects_platform() {
        let catalog = AcceleratorCatalog::builtin();
        let model = ModelRequirements::from_label(None, ResourceSpec::gpu(1, "nvidia-tesla-t4"));
        let t = DeploymentTarget::local("macos", vec![Accelerator::new("A100", 80.0, BRAND_NVIDIA)]);
        assert!(!SelectionPolicy::default().can_run(&model, &t, &catalog));
    }

    #[test]
    fn test_unknown_gpu_type_disables_shortcut() {
        let catalog = AcceleratorCatalog::builtin();
        let model = ModelRequirements::from_label(None, ResourceSpec::gpu(1, "nvidia-h200"));
        let t = target(vec![Accelerator::new("H100", 80.0, BRAND_NVIDIA)]);
        assert!(!SelectionPolicy::default().can_run(&model, &t, &catalog));
    }

    #[test]
    fn test_gpu_override_matches_substring() {
        let catalog = AcceleratorCatalog::builtin();
        let model = ModelRequirements::from_label(None, ResourceSpec::gpu(4, "nvidia-a100-80g"));
        let t = target(vec![Accelerator::new("RTX 3090", 24.0, BRAND_NVIDIA)]);

        let policy = SelectionPolicy::new(Some("rtx".into()), false);
        assert!(policy.can_run(&model, &t, &catalog));
        let policy = SelectionPolicy::new(Some("a100".into()), false);
        assert!(!policy.can_run(&model, &t, &catalog));
    }

    #[test]
    fn test_blank_gpu_override_is_ignored() {
        let policy = SelectionPolicy::new(Some("  ".into()), false);
        assert_eq!(policy, SelectionPolicy::default());
    }

    #[test]
    fn test_force_cpu_requires_avx2() {
        let catalog = AcceleratorCatalog::builtin();
        let model = ModelRequirements::from_label(None, ResourceSpec::gpu(1, "nvidia-a100-80g"));
        let policy = SelectionPolicy::new(Some("a100".into()), true);

        let with = target(vec![]).with_cpu(cpu(&["AVX", "AVX2"]));
        let without = target(vec![]).with_cpu(cpu(&["AVX"]));
        assert!(policy.can_run(&model, &with, &catalog));
        assert!(!policy.can_run(&model, &without, &catalog));
        assert!(!policy.can_run(&model, &target(vec![]), &catalog));
    }

    #[test]
    fn test_tier_target_wins_selection() {
        let catalog = AcceleratorCatalog::builtin();
        let model = ModelRequirements::from_label(None, ResourceSpec::gpu(2, "nvidia-tesla-t4"));
        let targets = vec![
            DeploymentTarget::cloud("cpu.small", "0.1", vec![]),
            DeploymentTarget::cloud(
                "gpu.a100.1",
                "4",
                vec![Accelerator::new("A100", 80.0, BRAND_NVIDIA)],
            ),
        ];

        assert!(crate::matcher::best_target(&model, targets.clone(), &catalog).is_err());
        let best = SelectionPolicy::default()
            .best_target(&model, targets.clone(), &catalog)
            .unwrap();
        assert_eq!(best.target.name, "gpu.a100.1");

        let ranked = SelectionPolicy::default().rank(&model, targets, &catalog).unwrap();
        assert_eq!(ranked[1].target.name, "cpu.small");
        assert_eq!(ranked[1].score, 0.0);
    }

    #[test]
    fn test_policy_rank_rejects_empty_list() {
        let catalog = AcceleratorCatalog::builtin();
        let model = ModelRequirements::default();
        assert!(matches!(
            SelectionPolicy::default().rank(&model, vec![], &catalog),
            Err(NidamError::NoAvailableTarget)
        ));
    }
}
