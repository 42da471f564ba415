//! Resource tiers (§3 "Resource Tier") — immutable per-tier limits. Tiers
//! form a total order: Basic ≺ Pro ≺ Enterprise.

use std::collections::HashSet;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TierName {
    Basic,
    Pro,
    Enterprise,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceTier {
    pub name: TierName,
    pub max_mem_mb: u64,
    pub max_cpu_pct: f32,
    pub max_wall_s: u64,
    pub max_complexity: u64,
    pub max_concurrent_per_tenant: u32,
    pub allowed_export_formats: HashSet<String>,
    pub max_file_mb: u64,
}

impl ResourceTier {
    pub fn basic() -> Self {
        Self {
            name: TierName::Basic,
            max_mem_mb: 1024,
            max_cpu_pct: 100.0,
            max_wall_s: 60,
            max_complexity: 500,
            max_concurrent_per_tenant: 1,
            allowed_export_formats: ["STL", "OBJ"].into_iter().map(String::from).collect(),
            max_file_mb: 50,
        }
    }

    pub fn pro() -> Self {
        Self {
            name: TierName::Pro,
            max_mem_mb: 4096,
            max_cpu_pct: 200.0,
            max_wall_s: 300,
            max_complexity: 5_000,
            max_concurrent_per_tenant: 4,
            allowed_export_formats: ["STL", "OBJ", "STEP", "IGES", "DXF"].into_iter().map(String::from).collect(),
            max_file_mb: 500,
        }
    }

    pub fn enterprise() -> Self {
        Self {
            name: TierName::Enterprise,
            max_mem_mb: 16384,
            max_cpu_pct: 800.0,
            max_wall_s: 1800,
            max_complexity: 50_000,
            max_concurrent_per_tenant: 16,
            allowed_export_formats: ["STL", "OBJ", "STEP", "IGES", "DXF", "BREP", "GLB", "IFC"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_file_mb: 5120,
        }
    }

    pub fn for_name(name: TierName) -> Self {
        match name {
            TierName::Basic => Self::basic(),
            TierName::Pro => Self::pro(),
            TierName::Enterprise => Self::enterprise(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_totally_ordered() {
        assert!(TierName::Basic < TierName::Pro);
        assert!(TierName::Pro < TierName::Enterprise);
    }

    #[test]
    fn basic_lacks_step_export() {
        let tier = ResourceTier::basic();
        assert!(!tier.allowed_export_formats.contains("STEP"));
    }
}
