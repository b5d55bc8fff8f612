//! Pinned patch source references and the fetch capability
//!
//! A source is written `host:owner/repo@ref` (for example
//! `github:tiann/KernelSU@main`). The [`SourceProvider`] trait is the only way
//! the resolver and applier reach patch sources: [`GitSourceCache`] clones them
//! with git2, [`MemorySources`] serves fixtures from memory.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::kernel::git::{GitError, GitManager, GitResult};

/// Reference to a pinned repository revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceRef {
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub reference: String,
}

impl SourceRef {
    pub fn new(host: &str, owner: &str, repo: &str, reference: &str) -> Self {
        SourceRef {
            host: host.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            reference: reference.to_string(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}@{}", self.host, self.owner, self.repo, self.reference)
    }
}

impl FromStr for SourceRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("Invalid source reference '{}' (expected host:owner/repo@ref)", s);
        let (host, rest) = s.trim().split_once(':').ok_or_else(invalid)?;
        let (path, reference) = rest.rsplit_once('@').ok_or_else(invalid)?;
        let (owner, repo) = path.split_once('/').ok_or_else(invalid)?;
        if [host, owner, repo, reference].iter().any(|p| p.is_empty()) || repo.contains('/') {
            return Err(invalid());
        }
        Ok(SourceRef::new(host, owner, repo, reference))
    }
}

impl TryFrom<String> for SourceRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceRef> for String {
    fn from(value: SourceRef) -> Self {
        value.to_string()
    }
}

/// Fetch and read access to pinned patch sources.
pub trait SourceProvider {
    /// Make `source` available. Fetching the same source twice in one run is a no-op.
    fn fetch(&mut self, source: &SourceRef) -> GitResult<()>;

    /// Read a file of a fetched source.
    fn read(&self, source: &SourceRef, path: &Path) -> io::Result<Vec<u8>>;

    /// All files below `dir` (recursive, relative to `dir`, sorted, `.git` excluded).
    fn list_files(&self, source: &SourceRef, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Names of the immediate subdirectories of `dir`, sorted.
    fn list_dirs(&self, source: &SourceRef, dir: &Path) -> io::Result<Vec<String>>;

    fn read_to_string(&self, source: &SourceRef, path: &Path) -> io::Result<String> {
        let bytes = self.read(source, path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn not_fetched(source: &SourceRef) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("source {} has not been fetched", source),
    )
}

/// Git-backed source cache. Each run starts from an empty checkout per source.
pub struct GitSourceCache {
    cache_dir: PathBuf,
    hosts: BTreeMap<String, String>,
    fetched: HashSet<SourceRef>,
}

impl GitSourceCache {
    /// `hosts` maps the host part of a reference to a base URL
    /// (`github` → `https://github.com`).
    pub fn new(cache_dir: PathBuf, hosts: BTreeMap<String, String>) -> Self {
        GitSourceCache {
            cache_dir,
            hosts,
            fetched: HashSet::new(),
        }
    }

    pub fn checkout_path(&self, source: &SourceRef) -> PathBuf {
        self.cache_dir
            .join(&source.host)
            .join(&source.owner)
            .join(format!("{}@{}", source.repo, source.reference.replace('/', "_")))
    }

    pub fn url_for(&self, source: &SourceRef) -> GitResult<String> {
        let base = match self.hosts.get(&source.host) {
            Some(base) => base.trim_end_matches('/').to_string(),
            None if source.host.contains('.') => format!("https://{}", source.host),
            None => {
                return Err(GitError::InvalidRef(format!(
                    "unknown source host '{}' in {}",
                    source.host, source
                )))
            }
        };
        Ok(format!("{}/{}/{}", base, source.owner, source.repo))
    }

    fn fetched_path(&self, source: &SourceRef) -> io::Result<PathBuf> {
        if self.fetched.contains(source) {
            Ok(self.checkout_path(source))
        } else {
            Err(not_fetched(source))
        }
    }
}

impl SourceProvider for GitSourceCache {
    fn fetch(&mut self, source: &SourceRef) -> GitResult<()> {
        if self.fetched.contains(source) {
            return Ok(());
        }
        let url = self.url_for(source)?;
        let dest = self.checkout_path(source);
        if dest.exists() {
            log::debug!("[Sources] Resetting stale checkout {:?}", dest);
            fs::remove_dir_all(&dest)?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        GitManager::clone_branch(&url, &source.reference, &dest)?;
        self.fetched.insert(source.clone());
        Ok(())
    }

    fn read(&self, source: &SourceRef, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(self.fetched_path(source)?.join(path))
    }

    fn list_files(&self, source: &SourceRef, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let root = self.fetched_path(source)?.join(dir);
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no directory {}", source, dir.display()),
            ));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).into_iter().filter_entry(|e| e.file_name() != ".git") {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&root) {
                    files.push(rel.to_path_buf());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn list_dirs(&self, source: &SourceRef, dir: &Path) -> io::Result<Vec<String>> {
        let root = self.fetched_path(source)?.join(dir);
        let mut names = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-memory sources keyed by reference, used for previews and tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySources {
    repos: HashMap<SourceRef, BTreeMap<PathBuf, Vec<u8>>>,
    fetched: Vec<SourceRef>,
}

impl MemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or extend) a repository with one file.
    pub fn add_file(&mut self, source: &SourceRef, path: &str, contents: &str) -> &mut Self {
        self.repos
            .entry(source.clone())
            .or_default()
            .insert(PathBuf::from(path), contents.as_bytes().to_vec());
        self
    }

    /// Sources in the order they were first fetched.
    pub fn fetched(&self) -> &[SourceRef] {
        &self.fetched
    }

    fn repo(&self, source: &SourceRef) -> io::Result<&BTreeMap<PathBuf, Vec<u8>>> {
        if !self.fetched.contains(source) {
            return Err(not_fetched(source));
        }
        self.repos.get(source).ok_or_else(|| not_fetched(source))
    }
}

impl SourceProvider for MemorySources {
    fn fetch(&mut self, source: &SourceRef) -> GitResult<()> {
        if !self.repos.contains_key(source) {
            return Err(GitError::Clone(format!("repository {} not found", source)));
        }
        if !self.fetched.contains(source) {
            self.fetched.push(source.clone());
        }
        Ok(())
    }

    fn read(&self, source: &SourceRef, path: &Path) -> io::Result<Vec<u8>> {
        self.repo(source)?.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no file {}", source, path.display()),
            )
        })
    }

    fn list_files(&self, source: &SourceRef, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let files: Vec<PathBuf> = self
            .repo(source)?
            .keys()
            .filter_map(|p| p.strip_prefix(dir).ok().map(Path::to_path_buf))
            .collect();
        if files.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no directory {}", source, dir.display()),
            ));
        }
        Ok(files)
    }

    fn list_dirs(&self, source: &SourceRef, dir: &Path) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = self
            .repo(source)?
            .keys()
            .filter_map(|p| p.strip_prefix(dir).ok())
            .filter(|rel| rel.components().count() > 1)
            .filter_map(|rel| match rel.components().next() {
                Some(Component::Normal(name)) => Some(name.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
