//! Version gating between independently versioned patch sources
//!
//! The SuSFS header declares its version as
//! `#define SUSFS_VERSION "v1.5.9"`. That token selects the companion fix-patch
//! set `<fix_root>/<token>/`; a missing set stops resolution before anything
//! touches the working tree.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{PatchError, ResolveError};
use crate::kernel::sources::{SourceProvider, SourceRef};

/// Version string extracted from a source header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the token of `#define <name>_VERSION "<token>"` from header text.
///
/// Only single-line declarations match; the first one wins.
pub fn extract_version_token(header: &str, name: &str) -> Result<Option<VersionToken>, PatchError> {
    let pattern = format!(
        r#"(?m)^\s*#\s*define\s+{}_VERSION\s+"([^"\n]+)""#,
        regex::escape(name)
    );
    let re = Regex::new(&pattern).map_err(|e| PatchError::RegexInvalid(e.to_string()))?;
    Ok(re
        .captures(header)
        .map(|caps| VersionToken(caps[1].trim().to_string())))
}

/// Outcome of a successful gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixPatchSet {
    pub token: VersionToken,
    /// Patch files of the set, relative to the fix source root, sorted
    pub patches: Vec<PathBuf>,
}

/// Cross-component check: header source → token → companion fix-patch set.
pub struct VersionGate<'a> {
    pub header_source: &'a SourceRef,
    pub header_path: &'a Path,
    pub define_name: &'a str,
    pub fix_source: &'a SourceRef,
    pub fix_root: &'a Path,
}

fn fetch_failure(source: &SourceRef, cause: impl fmt::Display) -> ResolveError {
    ResolveError::ExternalFetchFailure {
        reference: source.to_string(),
        cause: cause.to_string(),
    }
}

impl<'a> VersionGate<'a> {
    /// Fetch both sources, extract the token and locate the matching fix set.
    pub fn check(&self, sources: &mut dyn SourceProvider) -> Result<FixPatchSet, ResolveError> {
        sources
            .fetch(self.header_source)
            .map_err(|e| fetch_failure(self.header_source, e))?;
        let header = sources
            .read_to_string(self.header_source, self.header_path)
            .map_err(|e| fetch_failure(self.header_source, e))?;

        let token = extract_version_token(&header, self.define_name)?
            .ok_or_else(|| {
                ResolveError::VersionTokenNotFound(format!(
                    "{}:{}",
                    self.header_source,
                    self.header_path.display()
                ))
            })?;
        log::info!("[VersionGate] {} reports {}_VERSION {}", self.header_source, self.define_name, token);

        sources
            .fetch(self.fix_source)
            .map_err(|e| fetch_failure(self.fix_source, e))?;
        let available = match sources.list_dirs(self.fix_source, self.fix_root) {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(fetch_failure(self.fix_source, e)),
        };
        if !available.iter().any(|d| d == token.as_str()) {
            log::error!(
                "[VersionGate] No fix patches for {} in {} (available: {})",
                token,
                self.fix_source,
                if available.is_empty() { "none".to_string() } else { available.join(", ") }
            );
            return Err(ResolveError::MissingFixPatchSet(token.to_string()));
        }

        let set_dir = self.fix_root.join(token.as_str());
        let patches: Vec<PathBuf> = sources
            .list_files(self.fix_source, &set_dir)
            .map_err(|e| fetch_failure(self.fix_source, e))?
            .into_iter()
            .filter(|p| p.extension().map_or(false, |ext| ext == "patch"))
            .map(|p| set_dir.join(p))
            .collect();
        if patches.is_empty() {
            return Err(ResolveError::MissingFixPatchSet(token.to_string()));
        }

        log::info!("[VersionGate] ✓ {} fix patches selected for {}", patches.len(), token);
        Ok(FixPatchSet { token, patches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::sources::MemorySources;

    const HEADER: &str = r#"#ifndef KSU_SUSFS_H
#define KSU_SUSFS_H
#define SUSFS_VERSION "v1.5.9"
#define SUSFS_VARIANT "GKI"
#endif
"#;

    #[test]
    fn test_extract_token() {
        let token = extract_version_token(HEADER, "SUSFS").unwrap().unwrap();
        assert_eq!(token.as_str(), "v1.5.9");
    }

    #[test]
    fn test_extract_ignores_other_defines() {
        assert_eq!(extract_version_token(HEADER, "KSU").unwrap(), None);
        assert_eq!(
            extract_version_token("#define SUSFS_VERSION v1.5.9\n", "SUSFS").unwrap(),
            None
        );
    }

    #[test]
    fn test_extract_tolerates_spacing() {
        let token = extract_version_token("  #  define SUSFS_VERSION   \"1.4.2\"  \n", "SUSFS")
            .unwrap()
            .unwrap();
        assert_eq!(token.as_str(), "1.4.2");
    }

    fn fixture(fix_dir: &str) -> (MemorySources, SourceRef, SourceRef) {
        let header: SourceRef = "gitlab:simonpunk/susfs4ksu@dev".parse().unwrap();
        let fixes: SourceRef = "github:WildKernels/kernel_patches@main".parse().unwrap();
        let mut sources = MemorySources::new();
        sources.add_file(&header, "kernel_patches/include/linux/susfs.h", HEADER);
        sources
            .add_file(&fixes, &format!("next/susfs_fix_patches/{}/fix_core.patch", fix_dir), "")
            .add_file(&fixes, &format!("next/susfs_fix_patches/{}/fix_apk_sign.patch", fix_dir), "")
            .add_file(&fixes, &format!("next/susfs_fix_patches/{}/notes.txt", fix_dir), "");
        (sources, header, fixes)
    }

    #[test]
    fn test_gate_selects_matching_set() {
        let (mut sources, header, fixes) = fixture("v1.5.9");
        let gate = VersionGate {
            header_source: &header,
            header_path: Path::new("kernel_patches/include/linux/susfs.h"),
            define_name: "SUSFS",
            fix_source: &fixes,
            fix_root: Path::new("next/susfs_fix_patches"),
        };
        let set = gate.check(&mut sources).unwrap();
        assert_eq!(set.token.as_str(), "v1.5.9");
        assert_eq!(
            set.patches,
            vec![
                PathBuf::from("next/susfs_fix_patches/v1.5.9/fix_apk_sign.patch"),
                PathBuf::from("next/susfs_fix_patches/v1.5.9/fix_core.patch"),
            ]
        );
    }

    #[test]
    fn test_gate_reports_missing_set() {
        let (mut sources, header, fixes) = fixture("v1.5.8");
        let gate = VersionGate {
            header_source: &header,
            header_path: Path::new("kernel_patches/include/linux/susfs.h"),
            define_name: "SUSFS",
            fix_source: &fixes,
            fix_root: Path::new("next/susfs_fix_patches"),
        };
        match gate.check(&mut sources) {
            Err(ResolveError::MissingFixPatchSet(token)) => assert_eq!(token, "v1.5.9"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_gate_missing_header_define() {
        let header: SourceRef = "gitlab:simonpunk/susfs4ksu@dev".parse().unwrap();
        let fixes: SourceRef = "github:o/fixes@main".parse().unwrap();
        let mut sources = MemorySources::new();
        sources.add_file(&header, "susfs.h", "#define OTHER 1\n");
        sources.add_file(&fixes, "x/y.patch", "");
        let gate = VersionGate {
            header_source: &header,
            header_path: Path::new("susfs.h"),
            define_name: "SUSFS",
            fix_source: &fixes,
            fix_root: Path::new("x"),
        };
        assert!(matches!(
            gate.check(&mut sources),
            Err(ResolveError::VersionTokenNotFound(_))
        ));
    }

    /// Sources whose directory listing fails with a fixed error kind.
    struct BrokenListing {
        inner: MemorySources,
        kind: io::ErrorKind,
    }

    impl SourceProvider for BrokenListing {
        fn fetch(&mut self, source: &SourceRef) -> crate::kernel::git::GitResult<()> {
            self.inner.fetch(source)
        }

        fn read(&self, source: &SourceRef, path: &Path) -> io::Result<Vec<u8>> {
            self.inner.read(source, path)
        }

        fn list_files(&self, source: &SourceRef, dir: &Path) -> io::Result<Vec<PathBuf>> {
            self.inner.list_files(source, dir)
        }

        fn list_dirs(&self, _: &SourceRef, _: &Path) -> io::Result<Vec<String>> {
            Err(io::Error::new(self.kind, "listing failed"))
        }
    }

    fn gate<'a>(header: &'a SourceRef, fixes: &'a SourceRef) -> VersionGate<'a> {
        VersionGate {
            header_source: header,
            header_path: Path::new("kernel_patches/include/linux/susfs.h"),
            define_name: "SUSFS",
            fix_source: fixes,
            fix_root: Path::new("next/susfs_fix_patches"),
        }
    }

    #[test]
    fn test_gate_listing_error_is_fetch_failure() {
        let (inner, header, fixes) = fixture("v1.5.9");
        let mut sources = BrokenListing { inner, kind: io::ErrorKind::PermissionDenied };
        match gate(&header, &fixes).check(&mut sources) {
            Err(ResolveError::ExternalFetchFailure { reference, cause }) => {
                assert_eq!(reference, fixes.to_string());
                assert!(cause.contains("listing failed"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_gate_missing_fix_root_is_missing_set() {
        let (inner, header, fixes) = fixture("v1.5.9");
        let mut sources = BrokenListing { inner, kind: io::ErrorKind::NotFound };
        assert!(matches!(
            gate(&header, &fixes).check(&mut sources),
            Err(ResolveError::MissingFixPatchSet(ref token)) if token == "v1.5.9"
        ));
    }
}
