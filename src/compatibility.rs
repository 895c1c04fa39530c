//! Host compatibility estimation
//!
//! Pure functions from a [`ModelRecord`] to a [`CompatibilityResult`]. Nothing
//! here touches the filesystem or probes the hardware; the host is described
//! by a conservative [`HostProfile`] taken from configuration.

use crate::config::DepotConfig;
use crate::models::{CompatibilityTier, ModelRecord, parse_parameter_count};
use crate::storage::format_bytes;
use serde::Serialize;

const GIB: u64 = 1024 * 1024 * 1024;

/// Above this many billions of parameters generation is expected to be slow
const LARGE_MODEL_BILLIONS: f64 = 30.0;

/// Conservative assumptions about the machine running the models
#[derive(Debug, Clone, PartialEq)]
pub struct HostProfile {
    pub memory_bytes: u64,
    /// Share of memory a single model may take
    pub memory_headroom: f64,
    pub min_os_version: String,
    pub architectures: Vec<String>,
}

impl Default for HostProfile {
    fn default() -> Self {
        Self {
            memory_bytes: 8 * GIB,
            memory_headroom: 0.75,
            min_os_version: "14.0".to_string(),
            architectures: vec!["arm64".to_string(), "x86_64".to_string()],
        }
    }
}

impl HostProfile {
    pub fn from_config(config: &DepotConfig) -> Self {
        Self {
            memory_bytes: config.host_memory_bytes,
            memory_headroom: config.memory_headroom,
            min_os_version: config.min_os_version.clone(),
            ..Default::default()
        }
    }

    /// Memory a model may use before it is considered too large
    pub fn memory_budget(&self) -> u64 {
        (self.memory_bytes as f64 * self.memory_headroom) as u64
    }
}

/// Resources a model needs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemRequirements {
    pub min_memory: u64,
    pub recommended_memory: u64,
    pub min_storage: u64,
    pub min_os_version: String,
    pub architectures: Vec<String>,
}

/// Outcome of a compatibility check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityResult {
    pub tier: CompatibilityTier,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub requirements: SystemRequirements,
}

impl CompatibilityResult {
    pub fn is_fully_compatible(&self) -> bool {
        self.tier == CompatibilityTier::FullyCompatible
    }
}

/// Stateless estimator of whether the host can run a model
#[derive(Debug, Clone, Default)]
pub struct CompatibilityChecker {
    host: HostProfile,
}

impl CompatibilityChecker {
    pub fn new(host: HostProfile) -> Self {
        Self { host }
    }

    /// Derive requirements from the declared size
    ///
    /// Minimum memory is twice the payload size; the recommendation adds the
    /// larger of the payload size or 1 GiB on top so it is always strictly greater.
    pub fn requirements(&self, record: &ModelRecord) -> SystemRequirements {
        let min_memory = record.size.saturating_mul(2);
        let recommended_memory = min_memory.saturating_add(record.size.max(GIB));

        SystemRequirements {
            min_memory,
            recommended_memory,
            min_storage: record.size,
            min_os_version: self.host.min_os_version.clone(),
            architectures: self.host.architectures.clone(),
        }
    }

    /// Resolve the tier a record should be presented with
    pub fn resolve_tier(&self, record: &ModelRecord) -> CompatibilityTier {
        self.check(record).tier
    }

    /// Full compatibility check with warnings and recommendations
    pub fn check(&self, record: &ModelRecord) -> CompatibilityResult {
        let requirements = self.requirements(record);
        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();

        if record.compatibility == CompatibilityTier::Incompatible {
            warnings.push("Model is marked as incompatible with this host".to_string());
            recommendations.push("Choose a different model for this machine".to_string());
            return CompatibilityResult {
                tier: CompatibilityTier::Incompatible,
                warnings,
                recommendations,
                requirements,
            };
        }

        let mut tier = match record.compatibility {
            CompatibilityTier::Unknown => {
                warnings.push(
                    "Compatibility was not declared; treating as partially compatible".to_string(),
                );
                CompatibilityTier::PartiallyCompatible
            }
            declared => declared,
        };

        let budget = self.host.memory_budget();
        if requirements.min_memory > budget {
            tier = tier.demoted();
            warnings.push(format!(
                "Estimated memory requirement of {} exceeds the {} available to models",
                format_bytes(requirements.min_memory),
                format_bytes(budget)
            ));
            recommendations.push(
                "Use a smaller quantization or a model with fewer parameters".to_string(),
            );
            recommendations.push("Close other memory-heavy applications before loading".to_string());
        }

        let billions = parse_parameter_count(&record.parameters);
        if billions > LARGE_MODEL_BILLIONS {
            warnings.push(format!(
                "{} parameters: expect slow generation on consumer hardware",
                record.parameters
            ));
        }

        tracing::trace!(
            model_id = %record.id,
            declared = %record.compatibility,
            resolved = %tier,
            "Compatibility resolved"
        );

        CompatibilityResult {
            tier,
            warnings,
            recommendations,
            requirements,
        }
    }
}
