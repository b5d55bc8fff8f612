//! Kernel configuration store (`.config` / defconfig)
//!
//! Holds an ordered key → value mapping parsed from a generated `.config` or a
//! defconfig template. Mutations are last-write-wins and idempotent; every
//! mutated key is remembered so regeneration knows which values were chosen
//! explicitly and which come from the tree defaults.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::kernel::plan::ConfigMutation;
use crate::models::Tristate;

static ASSIGNMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9_]*)=(.*)$").expect("Invalid assignment regex")
});
static NOT_SET_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#\s*([A-Z][A-Z0-9_]*) is not set\s*$").expect("Invalid not-set regex")
});

/// Groups of keys of which at most one may be enabled at a time.
pub const EXCLUSIVE_SETS: &[&[&str]] = &[&[
    "CONFIG_LTO_NONE",
    "CONFIG_LTO_CLANG_THIN",
    "CONFIG_LTO_CLANG_FULL",
]];

/// Value of a single configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigValue {
    Tristate(Tristate),
    /// Non-tristate option (string, int or hex), stored verbatim
    Literal(String),
}

impl ConfigValue {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "y" => ConfigValue::Tristate(Tristate::Enabled),
            "m" => ConfigValue::Tristate(Tristate::Module),
            "n" => ConfigValue::Tristate(Tristate::Disabled),
            other => ConfigValue::Literal(other.to_string()),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Tristate(t) => write!(f, "{}", t.as_char()),
            ConfigValue::Literal(v) => f.write_str(v),
        }
    }
}

/// Ordered, mutation-tracking kernel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigStore {
    entries: Vec<(String, ConfigValue)>,
    index: HashMap<String, usize>,
    mutated: BTreeSet<String>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `.config` / defconfig text. Comments other than `is not set`
    /// markers are dropped; a repeated key keeps its last value.
    pub fn parse(content: &str) -> Self {
        let mut store = ConfigStore::new();
        for line in content.lines() {
            let line = line.trim_end();
            if let Some(caps) = NOT_SET_REGEX.captures(line) {
                store.insert(&caps[1], ConfigValue::Tristate(Tristate::Disabled));
            } else if let Some(caps) = ASSIGNMENT_REGEX.captures(line) {
                store.insert(&caps[1], ConfigValue::parse(&caps[2]));
            }
        }
        store
    }

    /// Read and parse a configuration file from disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::IoError(e)
            }
        })?;
        Ok(Self::parse(&content))
    }

    /// Render in `.config` format, one key per line, in insertion order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            match value {
                ConfigValue::Tristate(Tristate::Disabled) => {
                    out.push_str(&format!("# {} is not set\n", key));
                }
                _ => out.push_str(&format!("{}={}\n", key, value)),
            }
        }
        out
    }

    fn insert(&mut self, key: &str, value: ConfigValue) {
        match self.index.get(key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), value));
            }
        }
    }

    fn mutate(&mut self, key: &str, value: ConfigValue) {
        log::debug!("[Kconfig] {}={}", key, value);
        self.insert(key, value);
        self.mutated.insert(key.to_string());
    }

    pub fn enable(&mut self, key: &str) {
        self.mutate(key, ConfigValue::Tristate(Tristate::Enabled));
    }

    pub fn disable(&mut self, key: &str) {
        self.mutate(key, ConfigValue::Tristate(Tristate::Disabled));
    }

    pub fn set_module(&mut self, key: &str) {
        self.mutate(key, ConfigValue::Tristate(Tristate::Module));
    }

    pub fn set_literal(&mut self, key: &str, value: &str) {
        self.mutate(key, ConfigValue::Literal(value.to_string()));
    }

    /// Apply a planned mutation.
    pub fn apply(&mut self, mutation: &ConfigMutation) {
        self.mutate(&mutation.key, ConfigValue::Tristate(mutation.value));
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    pub fn tristate(&self, key: &str) -> Option<Tristate> {
        match self.get(key) {
            Some(ConfigValue::Tristate(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.tristate(key) == Some(Tristate::Enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys changed through `enable`/`disable`/`apply` since load.
    pub fn mutated_keys(&self) -> impl Iterator<Item = &str> {
        self.mutated.iter().map(|k| k.as_str())
    }

    pub fn was_mutated(&self, key: &str) -> bool {
        self.mutated.contains(key)
    }

    /// Produce the final configuration: keys missing from this store are
    /// filled from `defaults`, then the exclusive sets are checked. An empty
    /// `defaults` only checks.
    ///
    /// A conflict means the resolver emitted an inconsistent plan, so it is
    /// reported as [`ConfigError::ConflictDetected`] and logged as a defect.
    pub fn regenerate(&self, defaults: &ConfigStore) -> Result<ConfigStore, ConfigError> {
        let mut result = self.clone();
        let mut filled = 0usize;
        for (key, value) in defaults.iter() {
            if !result.index.contains_key(key) {
                result.insert(key, value.clone());
                filled += 1;
            }
        }
        log::info!(
            "[Kconfig] Regenerated: {} keys ({} explicit, {} from defaults)",
            result.len(),
            result.mutated.len(),
            filled
        );

        result.check_exclusive_sets()?;
        Ok(result)
    }

    /// Verify that no declared exclusive set has two enabled members.
    pub fn check_exclusive_sets(&self) -> Result<(), ConfigError> {
        for set in EXCLUSIVE_SETS {
            let enabled: Vec<&str> = set.iter().copied().filter(|k| self.is_enabled(k)).collect();
            if enabled.len() > 1 {
                log::error!(
                    "[Kconfig] DEFECT: mutually exclusive keys enabled together: {}",
                    enabled.join(", ")
                );
                return Err(ConfigError::ConflictDetected(enabled.join(", ")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Automatically generated file; DO NOT EDIT.
CONFIG_64BIT=y
CONFIG_LOCALVERSION=\"-android14\"
# CONFIG_KSU is not set
CONFIG_ZRAM=m
CONFIG_NR_CPUS=32
";

    #[test]
    fn test_parse_tristate_and_literals() {
        let store = ConfigStore::parse(SAMPLE);
        assert_eq!(store.len(), 5);
        assert_eq!(store.tristate("CONFIG_64BIT"), Some(Tristate::Enabled));
        assert_eq!(store.tristate("CONFIG_KSU"), Some(Tristate::Disabled));
        assert_eq!(store.tristate("CONFIG_ZRAM"), Some(Tristate::Module));
        assert_eq!(
            store.get("CONFIG_LOCALVERSION"),
            Some(&ConfigValue::Literal("\"-android14\"".to_string()))
        );
        assert_eq!(store.mutated_keys().count(), 0);
    }

    #[test]
    fn test_render_preserves_order_and_not_set() {
        let store = ConfigStore::parse(SAMPLE);
        let rendered = store.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "CONFIG_64BIT=y");
        assert_eq!(lines[2], "# CONFIG_KSU is not set");
        assert_eq!(ConfigStore::parse(&rendered).render(), rendered);
    }

    #[test]
    fn test_last_write_wins_in_place() {
        let mut store = ConfigStore::parse(SAMPLE);
        store.enable("CONFIG_KSU");
        store.disable("CONFIG_KSU");
        store.enable("CONFIG_KSU");
        assert!(store.is_enabled("CONFIG_KSU"));
        assert_eq!(store.len(), 5);
        assert!(store.was_mutated("CONFIG_KSU"));
    }

    #[test]
    fn test_mutation_is_idempotent() {
        let mut once = ConfigStore::parse(SAMPLE);
        once.enable("CONFIG_BPF_JIT");
        let mut twice = once.clone();
        twice.enable("CONFIG_BPF_JIT");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_module_and_literal_values() {
        let mut store = ConfigStore::new();
        store.set_module("CONFIG_ZRAM");
        store.set_literal("CONFIG_LOCALVERSION", "\"-wild\"");
        assert_eq!(store.render(), "CONFIG_ZRAM=m\nCONFIG_LOCALVERSION=\"-wild\"\n");
        assert_eq!(store.tristate("CONFIG_LOCALVERSION"), None);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".config");
        assert!(matches!(
            ConfigStore::from_file(&path),
            Err(ConfigError::FileNotFound(_))
        ));
        fs::write(&path, SAMPLE).unwrap();
        assert_eq!(ConfigStore::from_file(&path).unwrap().len(), 5);
    }

    #[test]
    fn test_regenerate_fills_missing_defaults_only() {
        let mut store = ConfigStore::parse(SAMPLE);
        store.disable("CONFIG_ZRAM");
        let defaults = ConfigStore::parse("CONFIG_ZRAM=y\nCONFIG_SWAP=y\n");
        let final_cfg = store.regenerate(&defaults).unwrap();
        assert_eq!(final_cfg.tristate("CONFIG_ZRAM"), Some(Tristate::Disabled));
        assert!(final_cfg.is_enabled("CONFIG_SWAP"));
        assert!(!final_cfg.was_mutated("CONFIG_SWAP"));
    }

    #[test]
    fn test_regenerate_rejects_exclusive_conflict() {
        let mut store = ConfigStore::new();
        store.enable("CONFIG_LTO_CLANG_THIN");
        store.enable("CONFIG_LTO_CLANG_FULL");
        let err = store.regenerate(&ConfigStore::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictDetected(_)));
    }

    #[test]
    fn test_regenerate_conflict_from_defaults_is_caught() {
        let mut store = ConfigStore::new();
        store.enable("CONFIG_LTO_CLANG_FULL");
        let defaults = ConfigStore::parse("CONFIG_LTO_NONE=y\n");
        assert!(store.regenerate(&defaults).is_err());
    }
}
