//! Plan resolution: scenario coverage, ordering and the KernelSU-Next version gate.

mod common;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use gki_builder::kernel::plan::PlanStep;
use gki_builder::kernel::resolver::{lto_mutations, BPF_BASELINE};
use gki_builder::{
    BuildSettings, FeatureSpec, KsuVariant, LtoType, MemorySources, PatchResolver, Plan,
    ResolveError, Tristate,
};

fn resolve(spec: FeatureSpec) -> Plan {
    let settings = BuildSettings::default();
    let mut sources = common::sources(&settings, "v1.5.9");
    PatchResolver::new(&settings)
        .resolve(&spec, &mut sources)
        .expect("resolution should succeed")
}

fn has_patch(plan: &Plan, file: &str, target: &str) -> bool {
    plan.patch_steps()
        .any(|p| p.file == Path::new(file) && p.target == Path::new(target))
}

fn install_position(plan: &Plan, checkout: &str) -> Option<usize> {
    plan.position(|s| matches!(s, PlanStep::Install(m) if m.checkout_dir == Path::new(checkout)))
}

#[test]
fn test_scenario_plain_gki() {
    let plan = resolve(FeatureSpec::new(KsuVariant::None, false, false, false));

    assert_eq!(plan.patch_steps().count(), 0);
    assert!(plan.steps().iter().all(|s| matches!(s, PlanStep::Config(_))));

    let mut allowed: HashSet<String> = BPF_BASELINE.iter().map(|k| k.to_string()).collect();
    allowed.extend(lto_mutations(LtoType::Thin).into_iter().map(|m| m.key));
    allowed.insert("CONFIG_KSU_SUSFS".to_string());
    for mutation in plan.mutations() {
        assert!(allowed.contains(&mutation.key), "unexpected mutation {}", mutation.key);
    }
    for key in BPF_BASELINE {
        assert_eq!(plan.final_value(key), Some(Tristate::Enabled), "{}", key);
    }
    assert_eq!(plan.final_value("CONFIG_KSU_SUSFS"), Some(Tristate::Disabled));
    assert_eq!(plan.final_value("CONFIG_KSU"), None);
}

#[test]
fn test_scenario_official_with_susfs() {
    let plan = resolve(FeatureSpec::new(KsuVariant::Official, true, false, false));

    let install = install_position(&plan, "KernelSU").expect("module install step");
    let enabler = plan
        .position(|s| matches!(s, PlanStep::Patch(p) if p.file.ends_with("10_enable_susfs_for_ksu.patch")))
        .expect("module-side enabler");
    let gki = plan
        .position(|s| matches!(s, PlanStep::Patch(p) if p.file == Path::new("kernel_patches/50_add_susfs_in_gki-android14-6.1.patch")))
        .expect("kernel-side SuSFS patch");

    assert!(install < enabler, "module install must precede SuSFS steps");
    assert!(install < gki);
    assert!(has_patch(&plan, "kernel_patches/KernelSU/10_enable_susfs_for_ksu.patch", "KernelSU"));

    let gki_step = plan.patch_steps().find(|p| p.file.ends_with("50_add_susfs_in_gki-android14-6.1.patch")).unwrap();
    assert_eq!((gki_step.strip, gki_step.fuzz), (1, 3));
    assert!(gki_step.must_succeed);

    let enabler_step = plan.patch_steps().find(|p| p.file.ends_with("10_enable_susfs_for_ksu.patch")).unwrap();
    assert!(!enabler_step.must_succeed);

    assert_eq!(plan.final_value("CONFIG_KSU"), Some(Tristate::Enabled));
    assert_eq!(plan.final_value("CONFIG_KSU_SUSFS"), Some(Tristate::Enabled));
    assert_eq!(plan.final_value("CONFIG_KSU_MANUAL_HOOK"), None);
}

#[test]
fn test_scenario_suki_with_lxc() {
    let plan = resolve(FeatureSpec::new(KsuVariant::Suki, false, true, false));

    assert!(has_patch(&plan, "hooks/syscall_hooks.patch", ""));
    assert!(has_patch(&plan, "other/lxc_docker_support.patch", ""));
    assert_eq!(plan.final_value("CONFIG_KSU_MANUAL_HOOK"), Some(Tristate::Enabled));
    assert_eq!(plan.final_value("CONFIG_KSU_KPROBES_HOOK"), Some(Tristate::Disabled));
    assert_eq!(plan.final_value("CONFIG_KPM"), Some(Tristate::Enabled));
    assert_eq!(plan.final_value("CONFIG_KSU_SUSFS"), Some(Tristate::Disabled));
    assert!(plan.patch_steps().all(|p| !p.file.to_string_lossy().contains("susfs")));
}

#[test]
fn test_next_with_susfs_applies_version_matched_fixes() {
    let plan = resolve(FeatureSpec::new(KsuVariant::Next, true, false, false));
    let settings = BuildSettings::default();

    assert!(has_patch(&plan, "next/scope_min_manual_hooks_v1.4.patch", ""));
    assert!(has_patch(&plan, "kernel_patches/KernelSU/10_enable_susfs_for_ksu.patch", "KernelSU-Next"));
    assert!(has_patch(&plan, "next/susfs_fix_patches/v1.5.9/fix_core_hook.patch", "KernelSU-Next"));

    let overlays: Vec<_> = plan
        .steps()
        .iter()
        .filter_map(|s| match s {
            PlanStep::Overlay(o) => Some(o),
            _ => None,
        })
        .collect();
    assert_eq!(overlays.len(), 2);
    assert!(overlays.iter().all(|o| o.source == settings.sources.susfs_next));

    assert_eq!(plan.final_value("CONFIG_KSU_SUSFS_SUS_SU"), Some(Tristate::Disabled));
    assert_eq!(plan.final_value("CONFIG_KSU_KPROBES_HOOK"), Some(Tristate::Disabled));
    assert_eq!(plan.final_value("CONFIG_KSU_SUSFS"), Some(Tristate::Enabled));
}

#[test]
fn test_version_gate_reports_token() {
    let settings = BuildSettings::default();
    let mut sources = common::sources(&settings, "v1.5.8");
    let result = PatchResolver::new(&settings)
        .resolve(&FeatureSpec::new(KsuVariant::Next, true, false, false), &mut sources);

    match result {
        Err(ResolveError::MissingFixPatchSet(token)) => assert_eq!(token, "v1.5.9"),
        other => panic!("expected MissingFixPatchSet, got {:?}", other),
    }
}

#[test]
fn test_unreachable_source_is_fetch_failure() {
    let settings = BuildSettings::default();
    let mut sources = MemorySources::new();
    let result = PatchResolver::new(&settings)
        .resolve(&FeatureSpec::new(KsuVariant::Next, true, false, false), &mut sources);
    assert!(matches!(result, Err(ResolveError::ExternalFetchFailure { .. })));
}

#[test]
fn test_resolution_fetches_only_gate_sources() {
    let settings = BuildSettings::default();
    let mut sources = common::sources(&settings, "v1.5.9");
    PatchResolver::new(&settings)
        .resolve(&FeatureSpec::new(KsuVariant::Official, true, true, true), &mut sources)
        .unwrap();
    assert!(sources.fetched().is_empty());

    PatchResolver::new(&settings)
        .resolve(&FeatureSpec::new(KsuVariant::Next, true, false, false), &mut sources)
        .unwrap();
    assert_eq!(
        sources.fetched(),
        &[settings.sources.susfs_next.clone(), settings.sources.fix_patches.clone()]
    );
}

#[test]
fn test_bbg_install_and_edit() {
    let plan = resolve(FeatureSpec::new(KsuVariant::None, false, false, true));

    let install = install_position(&plan, "Baseband-guard").expect("bbg install");
    let edit = plan.position(|s| matches!(s, PlanStep::Edit(_))).expect("LSM edit");
    assert!(install < edit);
    match &plan.steps()[install] {
        PlanStep::Install(m) => {
            assert_eq!(m.link, PathBuf::from("security/baseband-guard"));
            assert_eq!(m.driver_subdir, PathBuf::new());
        }
        _ => unreachable!(),
    }
    assert_eq!(plan.final_value("CONFIG_BBG"), Some(Tristate::Enabled));
}

#[test]
fn test_lxc_precedes_bbg_and_baseline_comes_last() {
    let plan = resolve(FeatureSpec::new(KsuVariant::Official, true, true, true));

    let lxc = plan
        .position(|s| matches!(s, PlanStep::Patch(p) if p.file.ends_with("lxc_docker_support.patch")))
        .unwrap();
    let bbg = install_position(&plan, "Baseband-guard").unwrap();
    let baseline = plan
        .position(|s| matches!(s, PlanStep::Config(m) if m.key == BPF_BASELINE[0]))
        .unwrap();
    assert!(lxc < bbg);
    assert!(bbg < baseline);
    assert!(plan.steps()[baseline..].iter().all(|s| matches!(s, PlanStep::Config(_))));
}

#[test]
fn test_full_lto_selector() {
    let plan = resolve(FeatureSpec::default().with_lto(LtoType::Full));
    assert_eq!(plan.final_value("CONFIG_LTO_CLANG_FULL"), Some(Tristate::Enabled));
    assert_eq!(plan.final_value("CONFIG_LTO_CLANG_THIN"), Some(Tristate::Disabled));
    assert_eq!(plan.final_value("CONFIG_LTO_NONE"), Some(Tristate::Disabled));
    assert_eq!(plan.final_value("CONFIG_LTO_CLANG"), Some(Tristate::Enabled));
}

#[test]
fn test_gki_branch_selects_integration_patch() {
    let mut settings = BuildSettings::default();
    settings.gki = "android15-6.6".to_string();
    let mut sources = common::sources(&settings, "v1.5.9");
    let plan = PatchResolver::new(&settings)
        .resolve(&FeatureSpec::new(KsuVariant::None, true, false, false), &mut sources)
        .unwrap();
    assert!(has_patch(&plan, "kernel_patches/50_add_susfs_in_gki-android15-6.6.patch", ""));
}
