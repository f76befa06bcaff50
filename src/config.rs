//! Engine configuration.
//!
//! Replaces the teacher's two-argument `Varstore::with_limits(max_name,
//! max_data)` constructor with a single structured object, loadable from
//! a TOML file the host process passes in (ambient configuration layer,
//! see SPEC_FULL.md §2).

use serde::{Deserialize, Serialize};

/// PCI Bus/Device/Function address (spec.md §4.G, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bdf {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl Default for Bdf {
    fn default() -> Self {
        Bdf {
            bus: 0,
            device: 0x1f,
            function: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Total persistent storage size, spec.md §3 invariant 6.
    pub max_storage: usize,
    /// Per-variable name+data size, spec.md §3 invariant 6.
    pub max_per_var: usize,
    /// Synthetic PCI function identity (spec.md §4.G, §6).
    pub bdf: Bdf,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_code: [u8; 3],
    /// Size of the single MMIO BAR, in bytes.
    pub mmio_bar_size: u32,
    /// Named object the persistence adapter stores the snapshot under.
    pub persistence_object_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_storage: 64 * 1024,
            max_per_var: 32 * 1024,
            bdf: Bdf::default(),
            vendor_id: 0x1AF4,
            device_id: 0x1FF0,
            class_code: [0x00, 0x80, 0xFF],
            mmio_bar_size: 0x1000,
            persistence_object_name: "uefi-varstore".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<EngineConfig, toml::de::Error> {
        toml::from_str(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quota_matches_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.max_storage, 64 * 1024);
        assert_eq!(config.max_per_var, 32 * 1024);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = EngineConfig::from_toml_str("max_storage = 4096\n").unwrap();
        assert_eq!(config.max_storage, 4096);
        assert_eq!(config.max_per_var, 32 * 1024);
    }
}
