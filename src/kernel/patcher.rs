//! Patch application capability and working trees.
//!
//! The applier never touches the filesystem directly: it goes through a
//! [`WorkingTree`] (a kernel checkout on disk, or [`MemoryTree`] in tests) and
//! a [`Patcher`] that knows how to apply unified diffs to it.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crate::error::PatchError;

/// Result type for patching operations
pub type PatchResult<T> = std::result::Result<T, PatchError>;

/// File access to the kernel tree being patched. Paths are tree-relative.
pub trait WorkingTree {
    /// Directory backing the tree on disk, if any.
    fn root(&self) -> Option<&Path>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write a file, creating parent directories.
    fn write(&mut self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Create (or replace) a symlink at `link` pointing to `target`, where
    /// `target` is relative to the directory containing `link`.
    fn symlink(&mut self, link: &Path, target: &Path) -> io::Result<()>;

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        String::from_utf8(self.read(path)?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Append `line` unless an identical line is already present.
    fn ensure_line(&mut self, path: &Path, line: &str) -> io::Result<bool> {
        let mut content = if self.exists(path) {
            self.read_to_string(path)?
        } else {
            String::new()
        };
        if content.lines().any(|l| l.trim() == line.trim()) {
            return Ok(false);
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(line);
        content.push('\n');
        self.write(path, content.as_bytes())?;
        Ok(true)
    }
}

/// Kernel source checkout on disk.
pub struct DiskTree {
    root: PathBuf,
}

impl DiskTree {
    pub fn new(root: PathBuf) -> Self {
        DiskTree { root }
    }
}

impl WorkingTree for DiskTree {
    fn root(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(self.root.join(path))
    }

    fn write(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, contents)
    }

    fn exists(&self, path: &Path) -> bool {
        self.root.join(path).exists()
    }

    fn symlink(&mut self, link: &Path, target: &Path) -> io::Result<()> {
        let full = self.root.join(link);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        if full.symlink_metadata().is_ok() {
            if full.is_dir() && !full.symlink_metadata()?.file_type().is_symlink() {
                fs::remove_dir_all(&full)?;
            } else {
                fs::remove_file(&full)?;
            }
        }
        std::os::unix::fs::symlink(target, &full)
    }
}

/// In-memory tree. Symlinks are resolved on access by prefix rewriting.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryTree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    links: BTreeMap<PathBuf, PathBuf>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(PathBuf::from(path), contents.as_bytes().to_vec());
        self
    }

    pub fn files(&self) -> &BTreeMap<PathBuf, Vec<u8>> {
        &self.files
    }

    pub fn links(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.links
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        for (link, target) in &self.links {
            if let Ok(rest) = path.strip_prefix(link) {
                let base = link.parent().unwrap_or(Path::new(""));
                return normalize(&base.join(target).join(rest));
            }
        }
        path.to_path_buf()
    }
}

/// Collapse `..` and `.` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl WorkingTree for MemoryTree {
    fn root(&self) -> Option<&Path> {
        None
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files.get(&self.resolve(path)).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} not in tree", path.display()))
        })
    }

    fn write(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let resolved = self.resolve(path);
        self.files.insert(resolved, contents.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let resolved = self.resolve(path);
        self.files.contains_key(&resolved) || self.files.keys().any(|p| p.starts_with(&resolved) && p != &resolved)
    }

    fn symlink(&mut self, link: &Path, target: &Path) -> io::Result<()> {
        self.links.insert(link.to_path_buf(), target.to_path_buf());
        Ok(())
    }
}

/// Applies unified diffs to a working tree.
pub trait Patcher {
    /// Apply `patch` inside `target` (tree-relative) with the given strip
    /// level and fuzz factor.
    fn apply(
        &self,
        patch: &[u8],
        tree: &mut dyn WorkingTree,
        target: &Path,
        strip: u32,
        fuzz: u32,
    ) -> PatchResult<()>;
}

/// GNU `patch` invoked on a tree that lives on disk.
pub struct GnuPatch {
    program: String,
}

impl GnuPatch {
    pub fn new() -> Self {
        GnuPatch {
            program: "patch".to_string(),
        }
    }

    pub fn with_program(program: &str) -> Self {
        GnuPatch {
            program: program.to_string(),
        }
    }

    /// `--forward` makes an already-applied patch fail instead of being
    /// reverse-applied; rejects are discarded so a skipped step leaves no
    /// `.rej` files behind.
    fn args(strip: u32, fuzz: u32) -> Vec<String> {
        vec![
            format!("-p{}", strip),
            format!("-F{}", fuzz),
            "--forward".to_string(),
            "--no-backup-if-mismatch".to_string(),
            "--reject-file=-".to_string(),
        ]
    }
}

impl Default for GnuPatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Patcher for GnuPatch {
    fn apply(
        &self,
        patch: &[u8],
        tree: &mut dyn WorkingTree,
        target: &Path,
        strip: u32,
        fuzz: u32,
    ) -> PatchResult<()> {
        let root = tree.root().ok_or_else(|| {
            PatchError::PatchFailed("GNU patch needs a tree on disk".to_string())
        })?;
        let dir = root.join(target);
        if !dir.is_dir() {
            return Err(PatchError::FileNotFound(dir.display().to_string()));
        }

        let mut child = Command::new(&self.program)
            .args(Self::args(strip, fuzz))
            .current_dir(&dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || -> io::Result<()> {
                if let Some(mut stdin) = stdin {
                    stdin.write_all(patch)?;
                }
                Ok(())
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });
        let output = output?;
        match written {
            Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e.into()),
            Err(_) => return Err(PatchError::PatchFailed("patch input writer panicked".to_string())),
            _ => {}
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            log::debug!("[Patcher] {}", line);
        }
        if !output.status.success() {
            let rejected: Vec<&str> = stdout
                .lines()
                .filter(|l| l.contains("FAILED") || l.contains("Reversed") || l.contains("can't find"))
                .collect();
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PatchError::PatchFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                if rejected.is_empty() { stderr.trim().to_string() } else { rejected.join("; ") }
            )));
        }
        Ok(())
    }
}
