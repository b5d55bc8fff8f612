//! Build orchestration: Preparation -> Resolution -> Patching -> Configuration -> Building.
//!
//! One run owns one working tree and one config store. Every error aborts the
//! run; nothing is retried and nothing is rolled back.

pub mod executor;
pub mod state;

use std::path::{Path, PathBuf};

pub use executor::{Compiler, MakeCompiler};
pub use state::{PipelinePhase, PipelineState};

use crate::config::BuildSettings;
use crate::error::{BuildError, ConfigError, Result};
use crate::kernel::applier::{ApplyReport, PatchApplier};
use crate::kernel::kconfig::ConfigStore;
use crate::kernel::patcher::{Patcher, WorkingTree};
use crate::kernel::plan::Plan;
use crate::kernel::resolver::PatchResolver;
use crate::kernel::sources::SourceProvider;
use crate::kernel::variant;
use crate::log_parsed;
use crate::models::FeatureSpec;

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub plan: Plan,
    pub report: ApplyReport,
    /// Tree-relative path of the written configuration
    pub config_path: PathBuf,
    pub kernel_version: String,
    /// Artifact label handed to packaging
    pub variant_name: String,
    pub compiled: bool,
}

/// Drives one build from feature spec to labeled artifact.
pub struct Pipeline<'a> {
    settings: &'a BuildSettings,
    patcher: &'a dyn Patcher,
    compiler: Option<&'a dyn Compiler>,
    state: PipelineState,
}

/// Load the starting configuration: a previous `.config` wins over the
/// defconfig template.
pub fn load_initial_config(settings: &BuildSettings, tree: &dyn WorkingTree) -> Result<ConfigStore> {
    for candidate in [settings.config_path(), settings.defconfig_path()] {
        if tree.exists(&candidate) {
            log::info!("[Pipeline] Starting from {}", candidate.display());
            let content = tree.read_to_string(&candidate).map_err(ConfigError::IoError)?;
            return Ok(ConfigStore::parse(&content));
        }
    }
    Err(BuildError::DefconfigNotFound(format!(
        "neither {} nor {} exists",
        settings.config_path().display(),
        settings.defconfig_path().display()
    )))
}

/// Tree defaults used by regeneration. Without `defaults_config` this is
/// empty: regeneration then only checks exclusive sets, and unset keys are
/// left to `make olddefconfig` on the compile path.
fn load_defaults(settings: &BuildSettings, tree: &dyn WorkingTree) -> Result<ConfigStore> {
    match &settings.defaults_config {
        Some(path) => {
            let content = tree.read_to_string(path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConfigError::FileNotFound(path.display().to_string())
                } else {
                    ConfigError::IoError(e)
                }
            })?;
            Ok(ConfigStore::parse(&content))
        }
        None => Ok(ConfigStore::new()),
    }
}

/// Kernel version from the tree's top-level Makefile.
pub fn detect_kernel_version(tree: &dyn WorkingTree) -> Result<String> {
    let makefile = tree
        .read_to_string(Path::new("Makefile"))
        .map_err(|e| BuildError::BuildFailure(format!("cannot read kernel Makefile: {}", e)))?;
    variant::kernel_version_from_makefile(&makefile)
        .ok_or_else(|| BuildError::BuildFailure("kernel Makefile has no VERSION/PATCHLEVEL/SUBLEVEL".to_string()))
}

impl<'a> Pipeline<'a> {
    pub fn new(settings: &'a BuildSettings, patcher: &'a dyn Patcher) -> Self {
        Pipeline {
            settings,
            patcher,
            compiler: None,
            state: PipelineState::new(),
        }
    }

    pub fn with_compiler(mut self, compiler: &'a dyn Compiler) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn phase(&self) -> PipelinePhase {
        self.state.phase()
    }

    fn enter(&mut self, phase: PipelinePhase) -> Result<()> {
        self.state
            .transition_to(phase)
            .map_err(BuildError::BuildFailure)?;
        log_parsed!("[Pipeline] Phase: {}", phase);
        Ok(())
    }

    /// Run every phase. On error the pipeline is left in `Failed`.
    pub fn run(
        &mut self,
        spec: &FeatureSpec,
        sources: &mut dyn SourceProvider,
        tree: &mut dyn WorkingTree,
    ) -> Result<BuildOutcome> {
        let result = self.run_phases(spec, sources, tree);
        match &result {
            Ok(outcome) => {
                let _ = self.state.transition_to(PipelinePhase::Completed);
                log_parsed!(
                    "[Pipeline] ✓ {} ready in {:.1}s",
                    outcome.variant_name,
                    self.state.elapsed().as_secs_f64()
                );
            }
            Err(e) => {
                log::error!("[Pipeline] ✗ {} failed: {}", self.state.phase(), e);
                let _ = self.state.transition_to(PipelinePhase::Failed);
            }
        }
        result
    }

    fn run_phases(
        &mut self,
        spec: &FeatureSpec,
        sources: &mut dyn SourceProvider,
        tree: &mut dyn WorkingTree,
    ) -> Result<BuildOutcome> {
        let settings = self.settings;
        log_parsed!("[Pipeline] Building {} for {} ({})", spec, settings.kernel_name, settings.gki);

        let mut store = load_initial_config(settings, tree)?;
        let kernel_version = detect_kernel_version(tree)?;

        // Resolution completes before anything touches the tree or the store
        self.enter(PipelinePhase::Resolution)?;
        let plan = PatchResolver::new(settings).resolve(spec, sources)?;

        self.enter(PipelinePhase::Patching)?;
        let report = PatchApplier::new(sources, self.patcher).apply(&plan, tree, &mut store)?;

        self.enter(PipelinePhase::Configuration)?;
        let defaults = load_defaults(settings, tree)?;
        let final_config = store.regenerate(&defaults).map_err(|e| {
            if let ConfigError::ConflictDetected(detail) = &e {
                log::error!("[Pipeline] DEFECT: resolver produced conflicting configuration: {}", detail);
            }
            BuildError::from(e)
        })?;
        let config_path = settings.config_path();
        tree.write(&config_path, final_config.render().as_bytes())
            .map_err(ConfigError::IoError)?;
        log::info!(
            "[Pipeline] Wrote {} ({} keys, {} set by plan)",
            config_path.display(),
            final_config.len(),
            store.mutated_keys().count()
        );

        let variant_name = variant::name(&settings.kernel_name, spec, &kernel_version);

        let mut compiled = false;
        if let Some(compiler) = self.compiler {
            self.enter(PipelinePhase::Building)?;
            let root = tree.root().ok_or_else(|| {
                BuildError::BuildFailure("compilation needs a kernel tree on disk".to_string())
            })?;
            compiler.compile(root, settings)?;
            compiled = true;
        }

        Ok(BuildOutcome {
            plan,
            report,
            config_path,
            kernel_version,
            variant_name,
            compiled,
        })
    }
}
