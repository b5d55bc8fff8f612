//! Pipeline phase tracking
//!
//! The pipeline moves strictly forward through its phases; any phase may
//! fail. A failed run is never resumed, callers reset the tree and start over.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelinePhase {
    /// Load the starting configuration
    Preparation,
    /// FeatureSpec → Plan
    Resolution,
    /// Plan → working tree and config store
    Patching,
    /// Regenerate and write the final configuration
    Configuration,
    /// Hand the tree to the compiler
    Building,
    Completed,
    Failed,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Preparation => "preparation",
            PipelinePhase::Resolution => "resolution",
            PipelinePhase::Patching => "patching",
            PipelinePhase::Configuration => "configuration",
            PipelinePhase::Building => "building",
            PipelinePhase::Completed => "completed",
            PipelinePhase::Failed => "failed",
        }
    }

    pub fn valid_next_phases(&self) -> &'static [PipelinePhase] {
        use PipelinePhase::*;
        match self {
            Preparation => &[Resolution, Failed],
            Resolution => &[Patching, Failed],
            Patching => &[Configuration, Failed],
            Configuration => &[Building, Completed, Failed],
            Building => &[Completed, Failed],
            Completed | Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: PipelinePhase) -> bool {
        self.valid_next_phases().contains(&next)
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current phase plus timing, owned by one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineState {
    phase: PipelinePhase,
    started: Instant,
    phase_started: Instant,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        let now = Instant::now();
        PipelineState {
            phase: PipelinePhase::Preparation,
            started: now,
            phase_started: now,
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn transition_to(&mut self, next: PipelinePhase) -> Result<(), String> {
        if !self.phase.can_transition_to(next) {
            return Err(format!("Invalid phase transition: {} -> {}", self.phase, next));
        }
        log::debug!(
            "[Pipeline] [PHASE] {} -> {} ({} ms in {})",
            self.phase,
            next,
            self.phase_started.elapsed().as_millis(),
            self.phase
        );
        self.phase = next;
        self.phase_started = Instant::now();
        Ok(())
    }
}
