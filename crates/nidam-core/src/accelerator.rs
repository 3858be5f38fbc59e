//! Accelerator catalog.
//!
//! Maps normalized accelerator identifiers (`nvidia-tesla-a100`,
//! `amd-radeon-rx-6800`, ...) to their physical specs. The built-in table can
//! be extended or overridden with a JSON file so new hardware needs no code
//! change.

use crate::atomic::atomic_read_json;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

pub const BRAND_NVIDIA: &str = "NVIDIA";
pub const BRAND_AMD: &str = "AMD";
pub const BRAND_INTEL: &str = "Intel";

/// A single physical accelerator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accelerator {
    /// Display model name, e.g. `A100`.
    pub model: String,
    /// Memory in GB.
    pub memory_size: f64,
    #[serde(default = "default_brand")]
    pub brand: String,
}

fn default_brand() -> String {
    BRAND_NVIDIA.to_string()
}

impl Accelerator {
    pub fn new(model: impl Into<String>, memory_size: f64, brand: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            memory_size,
            brand: brand.into(),
        }
    }

    /// Order by memory size only. Equal memory compares equal even when the
    /// models differ.
    pub fn cmp_memory(&self, other: &Self) -> Ordering {
        self.memory_size.total_cmp(&other.memory_size)
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({}GB)", self.brand, self.model, self.memory_size)
    }
}

const BUILTIN: &[(&str, &str, f64, &str)] = &[
    // NVIDIA
    ("nvidia-gtx-1650", "GTX 1650", 4.0, BRAND_NVIDIA),
    ("nvidia-gtx-1060", "GTX 1060", 6.0, BRAND_NVIDIA),
    ("nvidia-gtx-1080-ti", "GTX 1080 Ti", 11.0, BRAND_NVIDIA),
    ("nvidia-rtx-3060", "RTX 3060", 12.0, BRAND_NVIDIA),
    ("nvidia-rtx-3060-ti", "RTX 3060 Ti", 8.0, BRAND_NVIDIA),
    ("nvidia-rtx-3070-ti", "RTX 3070 Ti", 8.0, BRAND_NVIDIA),
    ("nvidia-rtx-3080", "RTX 3080", 10.0, BRAND_NVIDIA),
    ("nvidia-rtx-3080-ti", "RTX 3080 Ti", 12.0, BRAND_NVIDIA),
    ("nvidia-rtx-3090", "RTX 3090", 24.0, BRAND_NVIDIA),
    ("nvidia-rtx-4070-ti", "RTX 4070 Ti", 12.0, BRAND_NVIDIA),
    ("nvidia-tesla-p4", "P4", 8.0, BRAND_NVIDIA),
    ("nvidia-tesla-p100", "P100", 16.0, BRAND_NVIDIA),
    ("nvidia-tesla-k80", "K80", 12.0, BRAND_NVIDIA),
    ("nvidia-tesla-t4", "T4", 16.0, BRAND_NVIDIA),
    ("nvidia-tesla-v100", "V100", 16.0, BRAND_NVIDIA),
    ("nvidia-l4", "L4", 24.0, BRAND_NVIDIA),
    ("nvidia-tesla-l4", "L4", 24.0, BRAND_NVIDIA),
    ("nvidia-tesla-a10g", "A10G", 24.0, BRAND_NVIDIA),
    ("nvidia-a100-80g", "A100", 80.0, BRAND_NVIDIA),
    ("nvidia-a100-80gb", "A100", 80.0, BRAND_NVIDIA),
    ("nvidia-tesla-a100", "A100", 80.0, BRAND_NVIDIA),
    // AMD
    ("amd-radeon-rx-6800", "Radeon RX 6800", 16.0, BRAND_AMD),
    ("amd-radeon-rx-6900", "Radeon RX 6900 XT", 16.0, BRAND_AMD),
    // Intel
    ("intel-arc-a770", "Intel Arc A770", 16.0, BRAND_INTEL),
    ("intel-xe-integrated", "Intel Xe Integrated", 4.0, BRAND_INTEL),
];

/// Lookup table from accelerator identifier to [`Accelerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct AcceleratorCatalog {
    entries: BTreeMap<String, Accelerator>,
}

impl Default for AcceleratorCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AcceleratorCatalog {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The table shipped with nidam.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for (key, model, memory, brand) in BUILTIN {
            catalog.insert(key, Accelerator::new(*model, *memory, *brand));
        }
        catalog
    }

    /// Built-ins merged with the entries of `path`, if that file exists.
    ///
    /// File entries win over built-ins with the same key.
    pub fn load(path: &Path) -> Result<Self> {
        let mut catalog = Self::builtin();
        if let Some(extra) = atomic_read_json::<BTreeMap<String, Accelerator>>(path)? {
            debug!(
                "Merging {} accelerator(s) from {}",
                extra.len(),
                path.display()
            );
            for (key, accelerator) in extra {
                catalog.insert(&key, accelerator);
            }
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, key: &str, accelerator: Accelerator) {
        self.entries.insert(normalize_key(key), accelerator);
    }

    pub fn get(&self, key: &str) -> Option<&Accelerator> {
        self.entries.get(&normalize_key(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Accelerator)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}
