//! FeatureSpec → Plan resolution
//!
//! Decides which pinned sources are needed, in which order their patches are
//! applied and which configuration keys change. The only I/O is fetching the
//! header source the version gate reads when KernelSU-Next is combined with
//! SuSFS; everything else is derived from the FeatureSpec and the pinned settings.
//!
//! Ordering: root-module install and hooks, SuSFS, LXC, Baseband-guard, then
//! the unconditional BPF baseline and the LTO selector.

use std::path::{Path, PathBuf};

use crate::config::BuildSettings;
use crate::error::ResolveError;
use crate::kernel::plan::{
    ConfigMutation, ModuleInstall, OverlayCopy, PatchStep, Plan, PlanStep, TextEdit,
};
use crate::kernel::sources::{SourceProvider, SourceRef};
use crate::kernel::version_gate::VersionGate;
use crate::models::{FeatureSpec, KsuVariant, LtoType};

const SUSFS_HEADER: &str = "kernel_patches/include/linux/susfs.h";
const SUSFS_FS_OVERLAY: &str = "kernel_patches/fs";
const SUSFS_INCLUDE_OVERLAY: &str = "kernel_patches/include/linux";
const SUSFS_KSU_ENABLER: &str = "kernel_patches/KernelSU/10_enable_susfs_for_ksu.patch";
const SUSFS_GKI_FUZZ: u32 = 3;
const NEXT_FIX_ROOT: &str = "next/susfs_fix_patches";
const NEXT_HOOKS_PATCH: &str = "next/scope_min_manual_hooks_v1.4.patch";
const SUKI_HOOKS_PATCH: &str = "hooks/syscall_hooks.patch";
const LXC_PATCH: &str = "other/lxc_docker_support.patch";

/// BPF features every variant ships with.
pub const BPF_BASELINE: &[&str] = &[
    "CONFIG_BPF_SYSCALL",
    "CONFIG_BPF_JIT",
    "CONFIG_BPF_JIT_ALWAYS_ON",
    "CONFIG_DEBUG_INFO_BTF",
    "CONFIG_DEBUG_INFO_BTF_MODULES",
    "CONFIG_BPF_EVENTS",
    "CONFIG_KPROBE_EVENTS",
    "CONFIG_CGROUP_BPF",
    "CONFIG_BPF_STREAM_PARSER",
    "CONFIG_NET_CLS_BPF",
    "CONFIG_NET_ACT_BPF",
    "CONFIG_LWTUNNEL",
    "CONFIG_LWTUNNEL_BPF",
];

/// LTO selector: the complement is always disabled before the choice is enabled.
pub fn lto_mutations(lto: LtoType) -> Vec<ConfigMutation> {
    let (chosen, other) = match lto {
        LtoType::Thin => ("CONFIG_LTO_CLANG_THIN", "CONFIG_LTO_CLANG_FULL"),
        LtoType::Full => ("CONFIG_LTO_CLANG_FULL", "CONFIG_LTO_CLANG_THIN"),
    };
    vec![
        ConfigMutation::disable("CONFIG_LTO_NONE"),
        ConfigMutation::disable(other),
        ConfigMutation::enable("CONFIG_LTO_CLANG"),
        ConfigMutation::enable(chosen),
    ]
}

/// Directory the root-management checkout occupies inside the kernel tree.
pub fn ksu_checkout_dir(variant: KsuVariant) -> Option<&'static str> {
    match variant {
        KsuVariant::None => None,
        KsuVariant::Official | KsuVariant::Suki => Some("KernelSU"),
        KsuVariant::Next => Some("KernelSU-Next"),
    }
}

/// Maps feature specs to plans using the pinned sources of `settings`.
pub struct PatchResolver<'a> {
    settings: &'a BuildSettings,
}

struct PlanBuilder {
    steps: Vec<PlanStep>,
}

impl PlanBuilder {
    fn push(&mut self, step: PlanStep) {
        log::debug!("[Resolver]   + {}", step);
        self.steps.push(step);
    }

    fn patch(&mut self, step: PatchStep) {
        self.push(PlanStep::Patch(step));
    }

    fn enable(&mut self, key: &str) {
        self.push(PlanStep::Config(ConfigMutation::enable(key)));
    }

    fn disable(&mut self, key: &str) {
        self.push(PlanStep::Config(ConfigMutation::disable(key)));
    }
}

impl<'a> PatchResolver<'a> {
    pub fn new(settings: &'a BuildSettings) -> Self {
        PatchResolver { settings }
    }

    /// Build the plan for `spec`. Identical inputs and pins give identical plans.
    pub fn resolve(
        &self,
        spec: &FeatureSpec,
        sources: &mut dyn SourceProvider,
    ) -> Result<Plan, ResolveError> {
        log::info!("[Resolver] Resolving plan for {}", spec);
        let mut plan = PlanBuilder { steps: Vec::new() };

        self.add_root_module(spec.ksu, &mut plan);
        self.add_hooks(spec.ksu, &mut plan);
        if spec.susfs {
            self.add_susfs(spec.ksu, sources, &mut plan)?;
        } else {
            plan.disable("CONFIG_KSU_SUSFS");
        }
        if spec.lxc {
            plan.patch(PatchStep::kernel(&self.settings.sources.lxc, LXC_PATCH));
        }
        if spec.bbg {
            self.add_bbg(&mut plan);
        }

        for key in BPF_BASELINE {
            plan.enable(key);
        }
        for mutation in lto_mutations(spec.lto) {
            plan.push(PlanStep::Config(mutation));
        }

        let plan = Plan::new(plan.steps);
        log::info!(
            "[Resolver] ✓ Plan ready: {} steps ({} patches, {} config mutations)",
            plan.len(),
            plan.patch_steps().count(),
            plan.mutations().count()
        );
        Ok(plan)
    }

    fn add_root_module(&self, variant: KsuVariant, plan: &mut PlanBuilder) {
        let pins = &self.settings.sources;
        let source = match variant {
            KsuVariant::None => return,
            KsuVariant::Official => &pins.ksu_official,
            KsuVariant::Next => &pins.ksu_next,
            KsuVariant::Suki => &pins.ksu_suki,
        };
        let checkout = ksu_checkout_dir(variant).unwrap_or("KernelSU");
        plan.push(PlanStep::Install(ModuleInstall {
            source: source.clone(),
            checkout_dir: PathBuf::from(checkout),
            driver_subdir: PathBuf::from("kernel"),
            link: PathBuf::from("drivers/kernelsu"),
            makefile: PathBuf::from("drivers/Makefile"),
            makefile_line: "obj-$(CONFIG_KSU) += kernelsu/".to_string(),
            kconfig: PathBuf::from("drivers/Kconfig"),
            kconfig_line: "source \"drivers/kernelsu/Kconfig\"".to_string(),
        }));
        plan.enable("CONFIG_KSU");
    }

    fn add_hooks(&self, variant: KsuVariant, plan: &mut PlanBuilder) {
        let pins = &self.settings.sources;
        match variant {
            KsuVariant::None | KsuVariant::Official => {}
            KsuVariant::Suki => {
                plan.patch(PatchStep::kernel(&pins.suki_hooks, SUKI_HOOKS_PATCH));
                plan.enable("CONFIG_KSU_MANUAL_HOOK");
                plan.disable("CONFIG_KSU_KPROBES_HOOK");
                plan.enable("CONFIG_KPM");
            }
            KsuVariant::Next => {
                plan.patch(PatchStep::kernel(&pins.next_hooks, NEXT_HOOKS_PATCH));
                plan.disable("CONFIG_KSU_KPROBES_HOOK");
            }
        }
    }

    fn add_susfs(
        &self,
        variant: KsuVariant,
        sources: &mut dyn SourceProvider,
        plan: &mut PlanBuilder,
    ) -> Result<(), ResolveError> {
        let pins = &self.settings.sources;
        let gki_patch = format!("kernel_patches/50_add_susfs_in_gki-{}.patch", self.settings.gki);

        let susfs: &SourceRef = match variant {
            KsuVariant::Next => {
                let gate = VersionGate {
                    header_source: &pins.susfs_next,
                    header_path: Path::new(SUSFS_HEADER),
                    define_name: "SUSFS",
                    fix_source: &pins.fix_patches,
                    fix_root: Path::new(NEXT_FIX_ROOT),
                };
                let fix_set = gate.check(sources)?;
                let module_dir = ksu_checkout_dir(variant).unwrap_or("KernelSU-Next");

                plan.patch(PatchStep::kernel(&pins.susfs_next, SUSFS_KSU_ENABLER).in_dir(module_dir));
                for fix in &fix_set.patches {
                    plan.patch(PatchStep::kernel(&pins.fix_patches, fix.clone()).in_dir(module_dir));
                }
                // Fix sets from this generation drop the sus_su interface
                plan.disable("CONFIG_KSU_SUSFS_SUS_SU");
                &pins.susfs_next
            }
            KsuVariant::Official => {
                // Recent KernelSU trees already carry the enabler
                plan.patch(
                    PatchStep::kernel(&pins.susfs, SUSFS_KSU_ENABLER)
                        .in_dir(ksu_checkout_dir(variant).unwrap_or("KernelSU"))
                        .optional(),
                );
                &pins.susfs
            }
            KsuVariant::None | KsuVariant::Suki => &pins.susfs,
        };

        plan.push(PlanStep::Overlay(OverlayCopy {
            source: susfs.clone(),
            from: PathBuf::from(SUSFS_FS_OVERLAY),
            to: PathBuf::from("fs"),
        }));
        plan.push(PlanStep::Overlay(OverlayCopy {
            source: susfs.clone(),
            from: PathBuf::from(SUSFS_INCLUDE_OVERLAY),
            to: PathBuf::from("include/linux"),
        }));
        plan.patch(PatchStep::kernel(susfs, gki_patch).with_fuzz(SUSFS_GKI_FUZZ));
        plan.enable("CONFIG_KSU_SUSFS");
        Ok(())
    }

    fn add_bbg(&self, plan: &mut PlanBuilder) {
        plan.push(PlanStep::Install(ModuleInstall {
            source: self.settings.sources.bbg.clone(),
            checkout_dir: PathBuf::from("Baseband-guard"),
            driver_subdir: PathBuf::new(),
            link: PathBuf::from("security/baseband-guard"),
            makefile: PathBuf::from("security/Makefile"),
            makefile_line: "obj-$(CONFIG_BBG) += baseband-guard/".to_string(),
            kconfig: PathBuf::from("security/Kconfig"),
            kconfig_line: "source \"security/baseband-guard/Kconfig\"".to_string(),
        }));
        plan.push(PlanStep::Edit(TextEdit {
            file: PathBuf::from("security/Kconfig"),
            block: "config LSM".to_string(),
            line_pattern: r#"^\s*default\s+""#.to_string(),
            after: "lockdown".to_string(),
            insert: "baseband_guard".to_string(),
        }));
        plan.enable("CONFIG_BBG");
    }
}
