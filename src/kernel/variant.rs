//! Artifact naming.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::FeatureSpec;

static MAKEFILE_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(VERSION|PATCHLEVEL|SUBLEVEL)\s*=\s*(\d+)\s*$")
        .expect("Invalid makefile variable regex")
});

/// `<kernel-name>-<kernel-version>-<VARIANT>[-SUSFS][-LXC][-BBG]`.
///
/// Suffixes always appear in that order. The LTO mode is not part of the name.
pub fn name(kernel_name: &str, spec: &FeatureSpec, kernel_version: &str) -> String {
    let mut name = format!("{}-{}-{}", kernel_name, kernel_version, spec.ksu.as_str());
    for (enabled, suffix) in [(spec.susfs, "-SUSFS"), (spec.lxc, "-LXC"), (spec.bbg, "-BBG")] {
        if enabled {
            name.push_str(suffix);
        }
    }
    name
}

/// Read `VERSION.PATCHLEVEL.SUBLEVEL` from the top-level kernel Makefile.
pub fn kernel_version_from_makefile(makefile: &str) -> Option<String> {
    let (mut version, mut patchlevel, mut sublevel) = (None, None, None);
    for caps in MAKEFILE_VAR.captures_iter(makefile) {
        let slot = match &caps[1] {
            "VERSION" => &mut version,
            "PATCHLEVEL" => &mut patchlevel,
            _ => &mut sublevel,
        };
        if slot.is_none() {
            *slot = Some(caps[2].to_string());
        }
    }
    Some(format!("{}.{}.{}", version?, patchlevel?, sublevel?))
}
