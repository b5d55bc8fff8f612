//! Plan execution
//!
//! Steps run strictly in order against one working tree and one config store.
//! Sources are fetched lazily the first time a step needs them. The first
//! mandatory step that fails aborts the run; nothing is rolled back.

use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::error::{ApplyError, PatchError};
use crate::kernel::kconfig::ConfigStore;
use crate::kernel::patcher::{PatchResult, Patcher, WorkingTree};
use crate::kernel::plan::{ModuleInstall, OverlayCopy, PatchStep, Plan, PlanStep, TextEdit};
use crate::kernel::sources::{SourceProvider, SourceRef};

/// What happened while a plan was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Steps that changed the tree or store, in order
    pub applied: Vec<String>,
    /// Optional patch steps that failed and were passed over
    pub skipped: Vec<String>,
    /// Sources fetched during the run, in order
    pub fetched: Vec<String>,
}

pub struct PatchApplier<'a> {
    sources: &'a mut dyn SourceProvider,
    patcher: &'a dyn Patcher,
}

fn step_failure(step: &PlanStep, cause: impl std::fmt::Display) -> ApplyError {
    ApplyError::PatchApplyFailure {
        step: step.to_string(),
        cause: cause.to_string(),
    }
}

/// Relative symlink target from the directory holding `link` to `target`.
/// Both paths are tree-relative.
fn relative_target(link: &Path, target: &Path) -> PathBuf {
    let depth = link
        .parent()
        .map(|p| p.components().filter(|c| matches!(c, Component::Normal(_))).count())
        .unwrap_or(0);
    let mut rel = PathBuf::new();
    for _ in 0..depth {
        rel.push("..");
    }
    rel.join(target)
}

/// Insert `insert` into the quoted, comma separated list on every line of
/// the `block` stanza matching `line_pattern`. Returns the new content, or
/// `None` when nothing had to change.
pub fn insert_list_entry(content: &str, edit: &TextEdit) -> PatchResult<Option<String>> {
    let pattern = Regex::new(&edit.line_pattern).map_err(|e| PatchError::RegexInvalid(e.to_string()))?;

    let mut in_block = false;
    let mut found_block = false;
    let mut changed = false;
    let mut out = Vec::new();

    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches('\n');
        let top_level = !body.is_empty() && !body.starts_with(char::is_whitespace);
        if top_level {
            in_block = body.trim_end() == edit.block;
            found_block |= in_block;
        }
        if in_block && pattern.is_match(body) {
            if let Some(updated) = insert_into_quoted(body, &edit.after, &edit.insert) {
                out.push(format!("{}{}", updated, &line[body.len()..]));
                changed = true;
                continue;
            }
        }
        out.push(line.to_string());
    }

    if !found_block {
        return Err(PatchError::PatchFailed(format!("block '{}' not found", edit.block)));
    }
    Ok(if changed { Some(out.concat()) } else { None })
}

fn insert_into_quoted(line: &str, after: &str, insert: &str) -> Option<String> {
    let open = line.find('"')?;
    let close = open + 1 + line[open + 1..].find('"')?;
    let mut entries: Vec<&str> = line[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect();
    if entries.contains(&insert) {
        return None;
    }
    match entries.iter().position(|e| *e == after) {
        Some(idx) => entries.insert(idx + 1, insert),
        None => entries.push(insert),
    }
    Some(format!("{}\"{}\"{}", &line[..open], entries.join(","), &line[close + 1..]))
}

impl<'a> PatchApplier<'a> {
    pub fn new(sources: &'a mut dyn SourceProvider, patcher: &'a dyn Patcher) -> Self {
        PatchApplier { sources, patcher }
    }

    /// Execute `plan` against `tree` and `store`.
    pub fn apply(
        &mut self,
        plan: &Plan,
        tree: &mut dyn WorkingTree,
        store: &mut ConfigStore,
    ) -> Result<ApplyReport, ApplyError> {
        let mut report = ApplyReport::default();
        log::info!("[Applier] Applying {} steps", plan.len());

        for (idx, step) in plan.steps().iter().enumerate() {
            log::debug!("[Applier] [{}/{}] {}", idx + 1, plan.len(), step);
            if let Some(source) = step.source() {
                self.ensure_fetched(source, &mut report)?;
            }

            match step {
                PlanStep::Install(install) => self
                    .install(install, tree)
                    .map_err(|e| step_failure(step, e))?,
                PlanStep::Overlay(overlay) => self
                    .overlay(overlay, tree)
                    .map_err(|e| step_failure(step, e))?,
                PlanStep::Edit(edit) => edit_tree(edit, tree).map_err(|e| step_failure(step, e))?,
                PlanStep::Config(mutation) => store.apply(mutation),
                PlanStep::Patch(patch) => {
                    if let Err(e) = self.patch(patch, tree) {
                        if patch.must_succeed {
                            log::error!("[Applier] ✗ {}: {}", step, e);
                            return Err(step_failure(step, e));
                        }
                        log::warn!("[Applier] Optional step skipped: {} ({})", step, e);
                        report.skipped.push(step.to_string());
                        continue;
                    }
                }
            }
            report.applied.push(step.to_string());
        }

        log::info!(
            "[Applier] ✓ {} steps applied, {} skipped",
            report.applied.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn ensure_fetched(&mut self, source: &SourceRef, report: &mut ApplyReport) -> Result<(), ApplyError> {
        let key = source.to_string();
        if report.fetched.contains(&key) {
            return Ok(());
        }
        log::info!("[Applier] Fetching {}", source);
        self.sources
            .fetch(source)
            .map_err(|e| ApplyError::ExternalFetchFailure {
                reference: key.clone(),
                cause: e.to_string(),
            })?;
        report.fetched.push(key);
        Ok(())
    }

    fn patch(&self, step: &PatchStep, tree: &mut dyn WorkingTree) -> PatchResult<()> {
        let patch = self.sources.read(&step.source, &step.file).map_err(|e| {
            PatchError::FileNotFound(format!("{}:{} ({})", step.source, step.file.display(), e))
        })?;
        self.patcher.apply(&patch, tree, &step.target, step.strip, step.fuzz)
    }

    fn install(&self, install: &ModuleInstall, tree: &mut dyn WorkingTree) -> PatchResult<()> {
        self.copy_dir(&install.source, Path::new(""), &install.checkout_dir, tree)?;

        let driver_dir = install.checkout_dir.join(&install.driver_subdir);
        tree.symlink(&install.link, &relative_target(&install.link, &driver_dir))?;
        if tree.ensure_line(&install.makefile, &install.makefile_line)? {
            log::debug!("[Applier] Hooked {} into {}", install.link.display(), install.makefile.display());
        }
        tree.ensure_line(&install.kconfig, &install.kconfig_line)?;
        Ok(())
    }

    fn overlay(&self, overlay: &OverlayCopy, tree: &mut dyn WorkingTree) -> PatchResult<()> {
        self.copy_dir(&overlay.source, &overlay.from, &overlay.to, tree)
    }

    fn copy_dir(&self, source: &SourceRef, from: &Path, to: &Path, tree: &mut dyn WorkingTree) -> PatchResult<()> {
        let files = self.sources.list_files(source, from)?;
        for rel in &files {
            let contents = self.sources.read(source, &from.join(rel))?;
            tree.write(&to.join(rel), &contents)?;
        }
        log::debug!("[Applier] Copied {} files from {} into {}", files.len(), source, to.display());
        Ok(())
    }
}

fn edit_tree(edit: &TextEdit, tree: &mut dyn WorkingTree) -> PatchResult<()> {
    let content = tree
        .read_to_string(&edit.file)
        .map_err(|_| PatchError::FileNotFound(edit.file.display().to_string()))?;
    match insert_list_entry(&content, edit)? {
        Some(updated) => tree.write(&edit.file, updated.as_bytes())?,
        None => log::debug!("[Applier] {} already lists {}", edit.file.display(), edit.insert),
    }
    Ok(())
}
