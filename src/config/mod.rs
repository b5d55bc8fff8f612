//! Configuration module for the GKI builder.
//!
//! # Module Structure
//!
//! - `loader`: settings file discovery, TOML load/save and path validation
//! - `flags`: normalization of raw feature flags into a [`FeatureSpec`]
//!
//! [`BuildSettings`] pins every external patch source. Sources are never
//! resolved to "latest": changing a pin is a settings change.
//!
//! [`FeatureSpec`]: crate::models::FeatureSpec

pub mod flags;
pub mod loader;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::kernel::sources::SourceRef;

fn pin(s: &str) -> SourceRef {
    s.parse().expect("Invalid default source pin")
}

/// Pinned references for every patch source the resolver can select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePins {
    pub ksu_official: SourceRef,
    pub ksu_next: SourceRef,
    pub ksu_suki: SourceRef,
    /// Canonical kernel-side SuSFS source
    pub susfs: SourceRef,
    /// SuSFS revision tracked by KernelSU-Next
    pub susfs_next: SourceRef,
    /// Companion repository holding version-matched fix patch sets
    pub fix_patches: SourceRef,
    pub suki_hooks: SourceRef,
    pub next_hooks: SourceRef,
    pub lxc: SourceRef,
    pub bbg: SourceRef,
}

impl Default for SourcePins {
    fn default() -> Self {
        SourcePins {
            ksu_official: pin("github:tiann/KernelSU@main"),
            ksu_next: pin("github:KernelSU-Next/KernelSU-Next@next"),
            ksu_suki: pin("github:SukiSU-Ultra/SukiSU-Ultra@main"),
            susfs: pin("gitlab:simonpunk/susfs4ksu@gki-android14-6.1"),
            susfs_next: pin("gitlab:simonpunk/susfs4ksu@gki-android14-6.1-dev"),
            fix_patches: pin("github:WildKernels/kernel_patches@main"),
            suki_hooks: pin("github:ShirkNeko/SukiSU_patch@main"),
            next_hooks: pin("github:WildKernels/kernel_patches@main"),
            lxc: pin("github:WildKernels/kernel_patches@main"),
            bbg: pin("github:vc-teahouse/Baseband-guard@main"),
        }
    }
}

/// Persistent build settings (`settings.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// First component of the artifact name
    pub kernel_name: String,
    /// GKI branch the SuSFS patches are generated for
    pub gki: String,
    pub arch: String,
    pub defconfig: String,
    /// Build output directory, relative to the kernel tree
    pub out_dir: PathBuf,
    /// Full default configuration used to fill unset keys on regeneration,
    /// relative to the kernel tree. When unset, unset keys are only filled by
    /// `make olddefconfig` on the compile path.
    pub defaults_config: Option<PathBuf>,
    /// Image target handed to the compiler collaborator
    pub image_target: String,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Source host → base URL
    pub hosts: BTreeMap<String, String>,
    pub sources: SourcePins,
}

impl Default for BuildSettings {
    fn default() -> Self {
        let mut hosts = BTreeMap::new();
        hosts.insert("github".to_string(), "https://github.com".to_string());
        hosts.insert("gitlab".to_string(), "https://gitlab.com".to_string());
        BuildSettings {
            kernel_name: "GKI".to_string(),
            gki: "android14-6.1".to_string(),
            arch: "arm64".to_string(),
            defconfig: "gki_defconfig".to_string(),
            out_dir: PathBuf::from("out"),
            defaults_config: None,
            image_target: "Image".to_string(),
            cache_dir: PathBuf::from(".gki-sources"),
            log_dir: PathBuf::from("logs"),
            hosts,
            sources: SourcePins::default(),
        }
    }
}

impl BuildSettings {
    /// Tree-relative path of the defconfig template.
    pub fn defconfig_path(&self) -> PathBuf {
        PathBuf::from("arch").join(&self.arch).join("configs").join(&self.defconfig)
    }

    /// Tree-relative path of the generated configuration.
    pub fn config_path(&self) -> PathBuf {
        self.out_dir.join(".config")
    }
}
