//! Capability matching between models and deployment targets.
//!
//! [`score`] turns a model's declared requirements and a [`DeploymentTarget`]
//! into a number used only for ranking:
//!
//! | situation                                      | score                         |
//! |------------------------------------------------|-------------------------------|
//! | platform not supported by the model            | `0.0`                         |
//! | model declares no resources                    | `0.5`                         |
//! | GPU required, unknown type or not enough cards | `0.0`                         |
//! | GPU required and satisfied                     | required / brand memory       |
//! | no GPU required, target has accelerators       | `0.01 / total memory`         |
//! | no GPU required, target has none               | `1.0`                         |
//!
//! The GPU density score prefers targets whose accelerator memory is a tight
//! fit. CPU-only models prefer targets without accelerators, and among
//! accelerated ones the smallest.

mod policy;
mod resources;

pub use policy::{SelectionPolicy, PRIORITY_TIERS};
pub use resources::{parse_platforms, parse_quantity, ModelRequirements, ResourceSpec, DEFAULT_PLATFORM};

use crate::accelerator::AcceleratorCatalog;
use crate::error::{NidamError, Result};
use crate::hardware::DeploymentTarget;

/// Score given to models that declare no resources.
pub const UNCONSTRAINED_SCORE: f64 = 0.5;
/// Score of a CPU-only model on a target without accelerators.
pub const IDEAL_CPU_SCORE: f64 = 1.0;
/// Numerator of the penalty for running CPU-only models on accelerated targets.
pub const CPU_ON_ACCELERATOR_WEIGHT: f64 = 0.01;

/// Compatibility score of `requirements` on `target`. `0.0` means the model
/// cannot run there; higher is a better fit.
pub fn score(
    requirements: &ModelRequirements,
    target: &DeploymentTarget,
    catalog: &AcceleratorCatalog,
) -> f64 {
    if !requirements.supports_platform(&target.platform) {
        return 0.0;
    }

    let resources = &requirements.resources;
    if resources.is_empty() {
        return UNCONSTRAINED_SCORE;
    }

    let wanted = resources.gpu_count();
    if wanted > 0 {
        let Some(required) = resources.gpu_type.as_deref().and_then(|t| catalog.get(t)) else {
            return 0.0;
        };

        let compatible = target
            .accelerators
            .iter()
            .filter(|a| a.brand == required.brand && a.memory_size >= required.memory_size)
            .count();
        if (wanted as usize) > compatible {
            return 0.0;
        }

        // Non-zero: at least one compatible card of this brand exists.
        let supply = target.brand_memory(&required.brand);
        return required.memory_size * wanted as f64 / supply;
    }

    if !target.accelerators.is_empty() {
        let total = target.total_memory();
        return if total > 0.0 {
            CPU_ON_ACCELERATOR_WEIGHT / total
        } else {
            CPU_ON_ACCELERATOR_WEIGHT
        };
    }

    IDEAL_CPU_SCORE
}

/// A target paired with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedTarget {
    pub target: DeploymentTarget,
    pub score: f64,
}

/// Sort targets by descending score. Equal scores keep their input order.
pub fn rank<F>(targets: Vec<DeploymentTarget>, mut score_fn: F) -> Vec<RankedTarget>
where
    F: FnMut(&DeploymentTarget) -> f64,
{
    let mut ranked: Vec<RankedTarget> = targets
        .into_iter()
        .map(|target| {
            let score = score_fn(&target);
            RankedTarget { target, score }
        })
        .collect();
    // `sort_by` is stable.
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// Rank `targets` for `requirements`, failing when there is nothing to rank.
pub fn rank_for(
    requirements: &ModelRequirements,
    targets: Vec<DeploymentTarget>,
    catalog: &AcceleratorCatalog,
) -> Result<Vec<RankedTarget>> {
    if targets.is_empty() {
        return Err(NidamError::NoAvailableTarget);
    }
    Ok(rank(targets, |t| score(requirements, t, catalog)))
}

/// The best target that can run the model at all.
pub fn best_target(
    requirements: &ModelRequirements,
    targets: Vec<DeploymentTarget>,
    catalog: &AcceleratorCatalog,
) -> Result<RankedTarget> {
    rank_for(requirements, targets, catalog)?
        .into_iter()
        .find(|r| r.score > 0.0)
        .ok_or(NidamError::NoAvailableTarget)
}
