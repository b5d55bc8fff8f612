//! Kernel Source Patching Module
//!
//! Turns a feature spec into a patched kernel tree:
//! - `resolver` / `version_gate`: decide which sources, patches and config
//!   keys a spec needs
//! - `applier` / `patcher`: execute the resulting plan on a working tree
//! - `kconfig`: the `.config` store the plan mutates
//! - `sources` / `git`: pinned patch sources fetched by shallow clone
//! - `variant`: artifact naming

pub mod applier;
pub mod git;
pub mod kconfig;
pub mod patcher;
pub mod plan;
pub mod resolver;
pub mod sources;
pub mod variant;
pub mod version_gate;
