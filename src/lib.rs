//! GKI Variant Builder
//!
//! Resolves a feature selection (KernelSU variant, SuSFS, LXC, Baseband-guard,
//! LTO mode) into an ordered patch plan, applies it to a Generic Kernel Image
//! source tree, regenerates the kernel configuration and labels the result.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Feature selection types
//! - **config**: Settings, pinned sources and flag normalization
//! - **kernel**: Resolution, patch application, config store, sources and naming
//! - **orchestrator**: The sequential build pipeline and compiler collaborator
//! - **log_collector**: Disk-backed `log` backend

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;
pub mod kernel;
pub mod log_collector;
pub mod orchestrator;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{ApplyError, BuildError, ConfigError, PatchError, ResolveError, Result};

pub use models::{FeatureSpec, KsuVariant, LtoType, Tristate};

pub use config::flags::RawFlags;
pub use config::BuildSettings;

pub use kernel::applier::{ApplyReport, PatchApplier};
pub use kernel::kconfig::ConfigStore;
pub use kernel::patcher::{DiskTree, GnuPatch, MemoryTree, Patcher, WorkingTree};
pub use kernel::plan::{Plan, PlanStep};
pub use kernel::resolver::PatchResolver;
pub use kernel::sources::{GitSourceCache, MemorySources, SourceProvider, SourceRef};

pub use orchestrator::{BuildOutcome, Compiler, MakeCompiler, Pipeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
