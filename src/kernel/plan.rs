//! Build plan value objects
//!
//! A [`Plan`] is the ordered list of steps produced by the resolver and consumed
//! by the applier. It is built once and never changed afterwards.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::kernel::sources::SourceRef;
use crate::models::Tristate;

/// Apply one patch file from a source to a directory of the working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchStep {
    pub source: SourceRef,
    /// Patch file path inside `source`
    pub file: PathBuf,
    /// Directory inside the working tree the patch is applied in
    pub target: PathBuf,
    pub strip: u32,
    pub fuzz: u32,
    /// `false` lets the step no-op when the change is already present
    pub must_succeed: bool,
}

impl PatchStep {
    /// A mandatory `-p1` patch against the kernel root.
    pub fn kernel(source: &SourceRef, file: impl Into<PathBuf>) -> Self {
        PatchStep {
            source: source.clone(),
            file: file.into(),
            target: PathBuf::new(),
            strip: 1,
            fuzz: 0,
            must_succeed: true,
        }
    }

    pub fn in_dir(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_fuzz(mut self, fuzz: u32) -> Self {
        self.fuzz = fuzz;
        self
    }

    pub fn optional(mut self) -> Self {
        self.must_succeed = false;
        self
    }
}

/// Set one configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMutation {
    pub key: String,
    pub value: Tristate,
}

impl ConfigMutation {
    pub fn enable(key: &str) -> Self {
        ConfigMutation {
            key: key.to_string(),
            value: Tristate::Enabled,
        }
    }

    pub fn disable(key: &str) -> Self {
        ConfigMutation {
            key: key.to_string(),
            value: Tristate::Disabled,
        }
    }
}

/// Install an out-of-tree kernel module into the working tree: copy the
/// checkout, link its driver directory and hook it into Kbuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInstall {
    pub source: SourceRef,
    /// Where the checkout is copied inside the tree (e.g. `KernelSU-Next`)
    pub checkout_dir: PathBuf,
    /// Driver directory inside the checkout (e.g. `kernel`)
    pub driver_subdir: PathBuf,
    /// Symlink created in the tree, pointing at the driver directory
    pub link: PathBuf,
    pub makefile: PathBuf,
    pub makefile_line: String,
    pub kconfig: PathBuf,
    pub kconfig_line: String,
}

/// Copy every file below `from` in a source to `to` in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayCopy {
    pub source: SourceRef,
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Insert an entry into the comma separated list on each line matching
/// `line_pattern` inside the Kconfig block opened by `block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub file: PathBuf,
    pub block: String,
    pub line_pattern: String,
    /// Existing entry the new one is placed after
    pub after: String,
    pub insert: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    Install(ModuleInstall),
    Patch(PatchStep),
    Overlay(OverlayCopy),
    Edit(TextEdit),
    Config(ConfigMutation),
}

impl PlanStep {
    pub fn source(&self) -> Option<&SourceRef> {
        match self {
            PlanStep::Install(m) => Some(&m.source),
            PlanStep::Patch(p) => Some(&p.source),
            PlanStep::Overlay(o) => Some(&o.source),
            PlanStep::Edit(_) | PlanStep::Config(_) => None,
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::Install(m) => write!(f, "install {} into {}", m.source, m.checkout_dir.display()),
            PlanStep::Patch(p) => write!(
                f,
                "patch {}:{} in {} (-p{} -F{})",
                p.source.repo,
                p.file.display(),
                if p.target.as_os_str().is_empty() { ".".into() } else { p.target.display().to_string() },
                p.strip,
                p.fuzz
            ),
            PlanStep::Overlay(o) => write!(
                f,
                "copy {}:{} -> {}",
                o.source.repo,
                o.from.display(),
                o.to.display()
            ),
            PlanStep::Edit(e) => write!(f, "insert {} into {}", e.insert, e.file.display()),
            PlanStep::Config(m) => write!(f, "{}={}", m.key, m.value.as_char()),
        }
    }
}

/// Ordered, immutable sequence of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub(crate) fn new(steps: Vec<PlanStep>) -> Self {
        Plan { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn patch_steps(&self) -> impl Iterator<Item = &PatchStep> {
        self.steps.iter().filter_map(|s| match s {
            PlanStep::Patch(p) => Some(p),
            _ => None,
        })
    }

    pub fn mutations(&self) -> impl Iterator<Item = &ConfigMutation> {
        self.steps.iter().filter_map(|s| match s {
            PlanStep::Config(m) => Some(m),
            _ => None,
        })
    }

    /// Final value the plan assigns to `key`, if any.
    pub fn final_value(&self, key: &str) -> Option<Tristate> {
        self.mutations().filter(|m| m.key == key).last().map(|m| m.value)
    }

    /// Position of the first step matching `pred`.
    pub fn position(&self, pred: impl Fn(&PlanStep) -> bool) -> Option<usize> {
        self.steps.iter().position(pred)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
