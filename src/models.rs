//! Core data types for the GKI builder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Root-management module integrated into the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KsuVariant {
    None,
    Official,
    Next,
    Suki,
}

impl KsuVariant {
    pub const ALL: [KsuVariant; 4] = [
        KsuVariant::None,
        KsuVariant::Official,
        KsuVariant::Next,
        KsuVariant::Suki,
    ];

    /// Canonical upper-case token, as accepted on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            KsuVariant::None => "NONE",
            KsuVariant::Official => "OFFICIAL",
            KsuVariant::Next => "NEXT",
            KsuVariant::Suki => "SUKI",
        }
    }
}

impl fmt::Display for KsuVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KsuVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NONE" => Ok(KsuVariant::None),
            "OFFICIAL" => Ok(KsuVariant::Official),
            "NEXT" => Ok(KsuVariant::Next),
            "SUKI" => Ok(KsuVariant::Suki),
            _ => Err(format!("Unknown KernelSU variant: {}", s)),
        }
    }
}

impl Default for KsuVariant {
    fn default() -> Self {
        KsuVariant::None
    }
}

/// LTO mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LtoType {
    Thin,
    Full,
}

impl FromStr for LtoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "thin" => Ok(LtoType::Thin),
            "full" => Ok(LtoType::Full),
            _ => Err(format!("Unknown LTO mode: {}", s)),
        }
    }
}

impl fmt::Display for LtoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LtoType::Thin => write!(f, "thin"),
            LtoType::Full => write!(f, "full"),
        }
    }
}

impl Default for LtoType {
    fn default() -> Self {
        LtoType::Thin
    }
}

/// Tristate kernel configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tristate {
    Enabled,
    Module,
    Disabled,
}

impl Tristate {
    /// Value as written in a `.config` assignment
    pub fn as_char(&self) -> char {
        match self {
            Tristate::Enabled => 'y',
            Tristate::Module => 'm',
            Tristate::Disabled => 'n',
        }
    }
}

/// Requested kernel variant, built once at program entry and threaded through
/// every stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub ksu: KsuVariant,
    pub susfs: bool,
    pub lxc: bool,
    pub bbg: bool,
    pub lto: LtoType,
}

impl FeatureSpec {
    pub fn new(ksu: KsuVariant, susfs: bool, lxc: bool, bbg: bool) -> Self {
        FeatureSpec {
            ksu,
            susfs,
            lxc,
            bbg,
            lto: LtoType::default(),
        }
    }

    pub fn with_lto(mut self, lto: LtoType) -> Self {
        self.lto = lto;
        self
    }
}

impl fmt::Display for FeatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ksu={} susfs={} lxc={} bbg={} lto={}",
            self.ksu, self.susfs, self.lxc, self.bbg, self.lto
        )
    }
}
