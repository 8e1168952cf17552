use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no resource at '{0}'")]
    NotFound(String),
    #[error("'{0}' is not a folder")]
    NotAFolder(String),
    #[error("I/O error for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One child of a listed folder. `path` can be passed back to `list`/`download`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
}

/// Blocking access to the file tree holding lab and curve workbooks. Paths are `/`-separated
/// and relative to the store root; the empty path is the root itself.
pub trait ResourceStore {
    /// Children of a folder, sorted by name.
    fn list(&self, path: &str) -> Result<Vec<StoreEntry>, StoreError>;
    fn download(&self, path: &str) -> Result<Vec<u8>, StoreError>;
}

pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Store backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Relative paths resolve under the store root, absolute ones from `/`.
    fn resolve(&self, path: &str) -> PathBuf {
        let base = if path.starts_with('/') {
            PathBuf::from("/")
        } else {
            self.root.clone()
        };
        path.split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .fold(base, |acc, part| acc.join(part))
    }
}

impl ResourceStore for LocalStore {
    fn list(&self, path: &str) -> Result<Vec<StoreEntry>, StoreError> {
        let dir = self.resolve(path);
        if !dir.exists() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        if !dir.is_dir() {
            return Err(StoreError::NotAFolder(path.to_string()));
        }

        let io_err = |source| StoreError::Io {
            path: path.to_string(),
            source,
        };
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().map_err(io_err)?.is_dir();
            entries.push(StoreEntry {
                path: join_path(path, &name),
                name,
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let file = self.resolve(path);
        if !file.is_file() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        fs::read(&file).map_err(|source| StoreError::Io {
            path: path.to_string(),
            source,
        })
    }
}

/// In-memory store keyed by full path; folders exist implicitly. Counts downloads per path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: BTreeMap<String, Vec<u8>>,
    downloads: Mutex<HashMap<String, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(path.into(), bytes);
    }

    pub fn with_file(mut self, path: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn download_count(&self, path: &str) -> usize {
        self.downloads
            .lock()
            .map(|counts| counts.get(path).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl ResourceStore for MemoryStore {
    fn list(&self, path: &str) -> Result<Vec<StoreEntry>, StoreError> {
        let prefix = path.trim_end_matches('/');
        if self.files.contains_key(prefix) {
            return Err(StoreError::NotAFolder(path.to_string()));
        }

        let mut folders = BTreeSet::new();
        let mut files = BTreeSet::new();
        for key in self.files.keys() {
            let rest = if prefix.is_empty() {
                key.as_str()
            } else {
                match key.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('/')) {
                    Some(rest) => rest,
                    None => continue,
                }
            };
            match rest.split_once('/') {
                Some((folder, _)) => folders.insert(folder.to_string()),
                None => files.insert(rest.to_string()),
            };
        }

        if folders.is_empty() && files.is_empty() && !prefix.is_empty() {
            return Err(StoreError::NotFound(path.to_string()));
        }

        let mut entries: Vec<StoreEntry> = folders
            .into_iter()
            .map(|name| (name, true))
            .chain(files.into_iter().map(|name| (name, false)))
            .map(|(name, is_dir)| StoreEntry {
                path: join_path(prefix, &name),
                name,
                is_dir,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let bytes = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if let Ok(mut counts) = self.downloads.lock() {
            *counts.entry(path.to_string()).or_insert(0) += 1;
        }
        Ok(bytes)
    }
}
