//! Shared fixtures: pinned sources in memory, a minimal GKI tree and a
//! patcher that understands just enough unified diff to append lines.
#![allow(dead_code)]

use std::path::Path;

use gki_builder::error::PatchError;
use gki_builder::kernel::patcher::PatchResult;
use gki_builder::{BuildSettings, MemorySources, MemoryTree, Patcher, WorkingTree};

pub const SUSFS_HEADER: &str = "#ifndef KSU_SUSFS_H\n#define KSU_SUSFS_H\n#define SUSFS_VERSION \"v1.5.9\"\n#endif\n";

pub const SECURITY_KCONFIG: &str = "menu \"Security options\"\n\nconfig LSM\n\tstring \"Ordered list of enabled LSMs\"\n\tdefault \"landlock,lockdown,yama,loadpin,safesetid,integrity,selinux,bpf\"\n\nendmenu\n";

/// Appends every `+` line of a hunk to the file named by the preceding
/// `+++ b/<path>` header. Patches containing `REJECT` fail.
pub struct AppendPatcher;

impl Patcher for AppendPatcher {
    fn apply(
        &self,
        patch: &[u8],
        tree: &mut dyn WorkingTree,
        target: &Path,
        strip: u32,
        _fuzz: u32,
    ) -> PatchResult<()> {
        assert_eq!(strip, 1);
        let text = String::from_utf8_lossy(patch);
        if text.contains("REJECT") {
            return Err(PatchError::PatchFailed("1 out of 1 hunk FAILED".to_string()));
        }
        let mut current: Option<std::path::PathBuf> = None;
        for line in text.lines() {
            if let Some(path) = line.strip_prefix("+++ b/") {
                current = Some(target.join(path));
            } else if let (Some(file), Some(added)) = (&current, line.strip_prefix('+')) {
                let mut content = if tree.exists(file) {
                    tree.read_to_string(file)?
                } else {
                    String::new()
                };
                content.push_str(added);
                content.push('\n');
                tree.write(file, content.as_bytes())?;
            }
        }
        Ok(())
    }
}

fn diff(file: &str, added: &str) -> String {
    format!("--- a/{f}\n+++ b/{f}\n@@ -1,0 +1,1 @@\n+{a}\n", f = file, a = added)
}

/// Every pinned source of `settings`, populated with a small but
/// structurally faithful file set. `next_fix_token` names the fix-patch
/// directory offered for KernelSU-Next.
pub fn sources(settings: &BuildSettings, next_fix_token: &str) -> MemorySources {
    let pins = &settings.sources;
    let mut sources = MemorySources::new();

    for module in [&pins.ksu_official, &pins.ksu_next, &pins.ksu_suki] {
        sources
            .add_file(module, "kernel/Kconfig", "menu \"KernelSU\"\nconfig KSU\n\ttristate \"KernelSU\"\n")
            .add_file(module, "kernel/Makefile", "obj-$(CONFIG_KSU) += kernelsu.o\n")
            .add_file(module, "kernel/core_hook.c", "int ksu_core_init(void);\n")
            .add_file(module, "README.md", "# root\n");
    }

    let gki_patch = format!("kernel_patches/50_add_susfs_in_gki-{}.patch", settings.gki);
    for susfs in [&pins.susfs, &pins.susfs_next] {
        sources
            .add_file(susfs, "kernel_patches/fs/susfs.c", "int susfs_init(void);\n")
            .add_file(susfs, "kernel_patches/include/linux/susfs.h", SUSFS_HEADER)
            .add_file(susfs, "kernel_patches/include/linux/susfs_def.h", "#define SUSFS_DEF 1\n")
            .add_file(
                susfs,
                "kernel_patches/KernelSU/10_enable_susfs_for_ksu.patch",
                &diff("kernel/Kconfig", "config KSU_SUSFS"),
            )
            .add_file(susfs, &gki_patch, &diff("fs/namei.c", "#include <linux/susfs_def.h>"));
    }

    sources
        .add_file(
            &pins.fix_patches,
            &format!("next/susfs_fix_patches/{}/fix_core_hook.patch", next_fix_token),
            &diff("kernel/core_hook.c", "/* susfs fix */"),
        )
        .add_file(
            &pins.next_hooks,
            "next/scope_min_manual_hooks_v1.4.patch",
            &diff("fs/exec.c", "ksu_handle_execveat();"),
        )
        .add_file(
            &pins.lxc,
            "other/lxc_docker_support.patch",
            &diff("kernel/cgroup/cgroup.c", "/* lxc */"),
        );

    sources.add_file(
        &pins.suki_hooks,
        "hooks/syscall_hooks.patch",
        &diff("fs/open.c", "ksu_handle_faccessat();"),
    );

    sources
        .add_file(&pins.bbg, "Kconfig", "config BBG\n\tbool \"Baseband guard\"\n")
        .add_file(&pins.bbg, "Makefile", "obj-$(CONFIG_BBG) += baseband_guard.o\n")
        .add_file(&pins.bbg, "baseband_guard.c", "int bbg_init(void);\n");

    sources
}

/// Freshly reset kernel tree with a defconfig template.
pub fn tree() -> MemoryTree {
    MemoryTree::new()
        .with_file("Makefile", "VERSION = 6\nPATCHLEVEL = 1\nSUBLEVEL = 118\nEXTRAVERSION =\n")
        .with_file(
            "arch/arm64/configs/gki_defconfig",
            "CONFIG_LOCALVERSION=\"-android14\"\nCONFIG_LTO_NONE=y\n# CONFIG_BPF_SYSCALL is not set\nCONFIG_KSU_SUSFS=y\n",
        )
        .with_file("drivers/Makefile", "obj-y += base/\n")
        .with_file("drivers/Kconfig", "menu \"Device Drivers\"\nsource \"drivers/base/Kconfig\"\n")
        .with_file("security/Makefile", "obj-$(CONFIG_SECURITY) += commoncap.o\n")
        .with_file("security/Kconfig", SECURITY_KCONFIG)
        .with_file("fs/namei.c", "/* namei */\n")
}
