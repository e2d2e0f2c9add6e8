//! Plugin file discovery.
//!
//! Search directories are walked in order. The first file providing a plugin
//! name wins; later files with the same name are kept as shadowed candidates
//! so they show up in reports, but they are never loaded.

use std::collections::{HashMap, HashSet};
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::resolver::NameFilter;

/// Identity of a file on disk, independent of the path used to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileIdentity {
    pub canonical: PathBuf,
    pub device: u64,
    pub inode: u64,
}

impl FileIdentity {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let canonical = std::fs::canonicalize(path)?;

        #[cfg(unix)]
        let (device, inode) = {
            use std::os::unix::fs::MetadataExt;
            let meta = std::fs::metadata(&canonical)?;
            (meta.dev(), meta.ino())
        };
        #[cfg(not(unix))]
        let (device, inode) = (0, 0);

        Ok(Self {
            canonical,
            device,
            inode,
        })
    }

    /// Device and inode where known, the canonical path otherwise.
    fn key(&self) -> (u64, u64, PathBuf) {
        if self.device == 0 && self.inode == 0 {
            (0, 0, self.canonical.clone())
        } else {
            (self.device, self.inode, PathBuf::new())
        }
    }
}

/// A plugin file found during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct PluginCandidate {
    pub name: String,
    pub path: PathBuf,
    pub identity: FileIdentity,
    /// Another file earlier in the search path provides the same name.
    pub shadowed: bool,
}

/// Whether `path` carries the platform shared-library extension.
pub fn is_plugin_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(DLL_EXTENSION)
}

/// Plugin name for a library file: the stem without the platform prefix.
pub fn plugin_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let name = stem.strip_prefix(DLL_PREFIX).unwrap_or(stem);
    (!name.is_empty()).then(|| name.to_string())
}

/// Scan `paths` for plugin files admitted by `filter`.
///
/// Candidates come back in discovery order: search path order, then file
/// name order within a directory.
pub fn discover(paths: &[PathBuf], filter: Option<&NameFilter>) -> Vec<PluginCandidate> {
    let mut candidates = Vec::new();
    let mut seen_files = HashSet::new();
    let mut first_by_name: HashMap<String, PathBuf> = HashMap::new();

    for dir in paths {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Skipping plugin directory {}: {}", dir.display(), e);
                continue;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_plugin_file(path))
            .collect();
        files.sort();

        for path in files {
            let Some(name) = plugin_name(&path) else {
                continue;
            };
            if filter.is_some_and(|f| !f.admits(&name)) {
                tracing::debug!(plugin = %name, "Excluded by name filter");
                continue;
            }

            let identity = match FileIdentity::of(&path) {
                Ok(identity) => identity,
                Err(e) => {
                    tracing::warn!("Cannot stat plugin {}: {}", path.display(), e);
                    continue;
                }
            };
            if !seen_files.insert(identity.key()) {
                tracing::debug!(path = %path.display(), "Same file reached twice, skipping");
                continue;
            }

            let shadowed = match first_by_name.get(&name) {
                Some(first) => {
                    tracing::warn!(
                        "Plugin {} at {} is shadowed by {}",
                        name,
                        path.display(),
                        first.display()
                    );
                    true
                }
                None => {
                    first_by_name.insert(name.clone(), path.clone());
                    false
                }
            };

            candidates.push(PluginCandidate {
                name,
                path,
                identity,
                shadowed,
            });
        }
    }

    candidates
}
