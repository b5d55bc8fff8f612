//! Feature flag normalization
//!
//! Flags arrive as raw strings (command line or environment) and are turned
//! into a [`FeatureSpec`] exactly once, at program entry.

use crate::error::BuildError;
use crate::models::{FeatureSpec, KsuVariant, LtoType};

const TRUTHY: &[&str] = &["1", "y", "yes", "t", "true", "on"];

/// Interpret a boolean-like flag. Anything outside the truthy set is false.
pub fn parse_flag(raw: &str) -> bool {
    let value = raw.trim().to_lowercase();
    TRUTHY.contains(&value.as_str())
}

/// Select the LTO mode; unrecognized values fall back to Thin with a warning.
pub fn parse_lto(raw: Option<&str>) -> LtoType {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => LtoType::Thin,
        Some(value) => value.parse().unwrap_or_else(|_| {
            log::warn!("[Flags] Unknown LTO mode '{}', falling back to thin", value);
            LtoType::Thin
        }),
    }
}

/// Select the KernelSU variant. Unset or empty means none; anything
/// unrecognized is rejected.
pub fn parse_variant(raw: Option<&str>) -> Result<KsuVariant, BuildError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(KsuVariant::None),
        Some(value) => value
            .parse()
            .map_err(|_| BuildError::UnsupportedVariant(value.to_string())),
    }
}

/// Unparsed flag values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFlags {
    pub ksu: Option<String>,
    pub susfs: Option<String>,
    pub lxc: Option<String>,
    pub bbg: Option<String>,
    pub lto: Option<String>,
}

impl RawFlags {
    /// Read flags through `lookup` (`KSU`, `SUSFS`, `LXC`, `BBG`, `LTO`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        RawFlags {
            ksu: lookup("KSU"),
            susfs: lookup("SUSFS"),
            lxc: lookup("LXC"),
            bbg: lookup("BBG"),
            lto: lookup("LTO"),
        }
    }

    pub fn into_spec(self) -> Result<FeatureSpec, BuildError> {
        let flag = |v: &Option<String>| v.as_deref().map_or(false, parse_flag);
        let spec = FeatureSpec {
            ksu: parse_variant(self.ksu.as_deref())?,
            susfs: flag(&self.susfs),
            lxc: flag(&self.lxc),
            bbg: flag(&self.bbg),
            lto: parse_lto(self.lto.as_deref()),
        };
        log::info!("[Flags] Feature spec: {}", spec);
        Ok(spec)
    }
}
