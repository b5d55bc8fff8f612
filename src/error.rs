//! Unified error type hierarchy for the GKI builder
//!
//! Component errors (ConfigError, PatchError, ResolveError, ApplyError) convert
//! into [`BuildError`], the single taxonomy reported to the user.

use std::io;
use thiserror::Error;

/// Configuration store and settings errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid TOML in settings: {0}")]
    InvalidToml(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Conflicting settings detected: {0}")]
    ConflictDetected(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Errors raised by a [`Patcher`](crate::kernel::patcher::Patcher) or a text edit.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Invalid regex pattern: {0}")]
    RegexInvalid(String),

    #[error("Patch target file not found: {0}")]
    FileNotFound(String),

    #[error("Patch application failed: {0}")]
    PatchFailed(String),

    #[error("IO error during patching: {0}")]
    Io(#[from] io::Error),
}

/// Errors produced while turning a FeatureSpec into a Plan.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No fix patch set matches version token {0}")]
    MissingFixPatchSet(String),

    #[error("No version define found in {0}")]
    VersionTokenNotFound(String),

    #[error("Failed to fetch {reference}: {cause}")]
    ExternalFetchFailure { reference: String, cause: String },

    #[error("Version define lookup failed: {0}")]
    Patch(#[from] PatchError),
}

/// Errors produced while executing a Plan.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Step '{step}' failed: {cause}")]
    PatchApplyFailure { step: String, cause: String },

    #[error("Failed to fetch {reference}: {cause}")]
    ExternalFetchFailure { reference: String, cause: String },
}

/// Pipeline-level error taxonomy. Every variant is fatal to the run.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Unsupported KernelSU variant: '{0}'")]
    UnsupportedVariant(String),

    #[error("No fix patch set matches version token {0}")]
    MissingFixPatchSet(String),

    #[error("No kernel configuration found (looked for {0})")]
    DefconfigNotFound(String),

    #[error("Patch step '{step}' failed: {cause}")]
    PatchApplyFailure { step: String, cause: String },

    #[error("Failed to fetch {reference}: {cause}")]
    ExternalFetchFailure { reference: String, cause: String },

    #[error("Build failed: {0}")]
    BuildFailure(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BuildError {
    /// Get a user-facing error message for the reporting channel
    pub fn user_message(&self) -> String {
        match self {
            BuildError::UnsupportedVariant(raw) => format!(
                "KSU must be one of NONE, OFFICIAL, NEXT, SUKI (got '{}')",
                raw
            ),
            BuildError::MissingFixPatchSet(token) => format!(
                "SuSFS {} has no matching KernelSU-Next fix patches; pin a supported SuSFS revision",
                token
            ),
            BuildError::DefconfigNotFound(looked) => {
                format!("Kernel configuration missing: {}", looked)
            }
            BuildError::PatchApplyFailure { step, cause } => {
                format!("Could not apply {}: {}", step, cause)
            }
            BuildError::ExternalFetchFailure { reference, cause } => {
                format!("Could not fetch {}: {}", reference, cause)
            }
            BuildError::BuildFailure(cause) => format!("Kernel build failed: {}", cause),
            BuildError::Config(e) => format!("Configuration error: {}", e),
        }
    }
}

impl From<ResolveError> for BuildError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::MissingFixPatchSet(token) => BuildError::MissingFixPatchSet(token),
            ResolveError::VersionTokenNotFound(path) => BuildError::BuildFailure(format!(
                "version define missing from {}",
                path
            )),
            ResolveError::ExternalFetchFailure { reference, cause } => {
                BuildError::ExternalFetchFailure { reference, cause }
            }
            ResolveError::Patch(e) => BuildError::BuildFailure(e.to_string()),
        }
    }
}

impl From<ApplyError> for BuildError {
    fn from(e: ApplyError) -> Self {
        match e {
            ApplyError::PatchApplyFailure { step, cause } => {
                BuildError::PatchApplyFailure { step, cause }
            }
            ApplyError::ExternalFetchFailure { reference, cause } => {
                BuildError::ExternalFetchFailure { reference, cause }
            }
        }
    }
}

/// Top-level result type for pipeline operations.
pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::FileNotFound("/etc/settings.toml".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration file not found: /etc/settings.toml"
        );
    }

    #[test]
    fn test_resolve_error_maps_to_taxonomy() {
        let err: BuildError = ResolveError::MissingFixPatchSet("v1.5.9".to_string()).into();
        assert!(matches!(err, BuildError::MissingFixPatchSet(ref t) if t == "v1.5.9"));
    }

    #[test]
    fn test_apply_error_keeps_step() {
        let err: BuildError = ApplyError::PatchApplyFailure {
            step: "patch lxc".to_string(),
            cause: "hunk 1 FAILED".to_string(),
        }
        .into();
        assert!(err.user_message().contains("patch lxc"));
    }

    #[test]
    fn test_unsupported_variant_message() {
        let err = BuildError::UnsupportedVariant("MAGISK".to_string());
        assert!(err.user_message().contains("MAGISK"));
        assert_eq!(err.to_string(), "Unsupported KernelSU variant: 'MAGISK'");
    }
}
