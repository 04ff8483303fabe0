//! Incremental build-info manifests.
//!
//! The build pipeline records, per project, the options it compiled with and
//! a SHA-256 hash of every input file. [`IncrementalStateStore`] compares that
//! record with the current state of the project to answer a single question:
//! can the previously built program be reused?

use crate::error::{ProjectError, Result};
use crate::paths::{normalize_path, resolve_relative};
use crate::tsconfig::ConfigEntry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Manifest format version written by [`BuildInfo::write`].
pub const BUILD_INFO_VERSION: &str = "tsproj-1";

/// Per-file record inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Lowercase hex SHA-256 of the file contents.
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A parsed `.tsbuildinfo` manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
    /// Keyed by path relative to the manifest's directory.
    #[serde(default)]
    pub files: BTreeMap<String, FileInfo>,
}

impl BuildInfo {
    /// Reads and parses a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Io`] if the file cannot be read and
    /// [`ProjectError::InvalidBuildInfo`] if it is not a valid manifest.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| ProjectError::InvalidBuildInfo {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Builds the manifest describing the current state of `entry`'s root files.
    pub fn capture(entry: &ConfigEntry) -> Result<Self> {
        let manifest = build_info_path(entry);
        let base = manifest.parent().unwrap_or(Path::new("/"));
        let mut files = BTreeMap::new();
        for file in &entry.root_files {
            let bytes = std::fs::read(file)?;
            files.insert(
                relative_key(base, file),
                FileInfo {
                    hash: content_hash(&bytes),
                    signature: None,
                },
            );
        }
        Ok(Self {
            version: BUILD_INFO_VERSION.to_string(),
            options: entry.options.fingerprint(),
            files,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Where the manifest for `entry` lives.
///
/// `tsBuildInfoFile` when set, otherwise `<outDir or config dir>/<stem>.tsbuildinfo`.
pub fn build_info_path(entry: &ConfigEntry) -> PathBuf {
    if let Some(path) = &entry.options.ts_build_info_file {
        return path.clone();
    }
    let stem = entry
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("tsconfig");
    let dir = entry.out_dir().unwrap_or_else(|| entry.directory());
    dir.join(format!("{stem}.tsbuildinfo"))
}

/// Lowercase hex SHA-256 digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// `file` relative to `base`, using `..` segments when it lies outside.
fn relative_key(base: &Path, file: &Path) -> String {
    let base: Vec<_> = base.components().collect();
    let target: Vec<_> = file.components().collect();
    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = vec!["..".to_string(); base.len() - common];
    parts.extend(
        target[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}

struct CachedManifest {
    info: BuildInfo,
    modified_at: SystemTime,
}

/// Decides whether a project's previous build can be reused.
///
/// Parsed manifests are cached by path and re-read when their modification
/// time changes.
#[derive(Default)]
pub struct IncrementalStateStore {
    manifests: DashMap<PathBuf, CachedManifest>,
}

impl IncrementalStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff the manifest for `entry` exists, parses, was built
    /// with the same options, lists every current root file, and every
    /// listed file still hashes to the recorded value.
    pub fn can_reuse(&self, entry: &ConfigEntry) -> bool {
        if entry.is_inferred() {
            return false;
        }
        let manifest = build_info_path(entry);
        let Some(info) = self.manifest(&manifest) else {
            tracing::debug!(config = %entry.path.display(), "no usable build info");
            return false;
        };

        match reuse_mismatch(entry, &manifest, &info) {
            None => {
                tracing::info!(config = %entry.path.display(), "build info up to date, reusing program");
                true
            }
            Some(reason) => {
                tracing::info!(config = %entry.path.display(), reason, "build info out of date, rebuilding");
                false
            }
        }
    }

    fn manifest(&self, path: &Path) -> Option<BuildInfo> {
        let path = normalize_path(path);
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;

        if let Some(cached) = self.manifests.get(&path)
            && mtime <= cached.modified_at
        {
            return Some(cached.info.clone());
        }

        match BuildInfo::read(&path) {
            Ok(info) => {
                self.manifests.insert(
                    path,
                    CachedManifest {
                        info: info.clone(),
                        modified_at: mtime,
                    },
                );
                Some(info)
            }
            Err(e) => {
                tracing::warn!(manifest = %path.display(), error = %e, "ignoring build info");
                self.manifests.remove(&path);
                None
            }
        }
    }

    /// Drops the cached manifest at `path`.
    pub fn invalidate(&self, path: &Path) {
        self.manifests.remove(&normalize_path(path));
    }
}

fn reuse_mismatch(entry: &ConfigEntry, manifest: &Path, info: &BuildInfo) -> Option<&'static str> {
    if info.version != BUILD_INFO_VERSION {
        return Some("version mismatch");
    }
    if info.options != entry.options.fingerprint() {
        return Some("compiler options changed");
    }

    let base = manifest.parent().unwrap_or(Path::new("/"));
    if entry
        .root_files
        .iter()
        .any(|file| !info.files.contains_key(&relative_key(base, file)))
    {
        return Some("new root file");
    }

    for (relative, recorded) in &info.files {
        let path = resolve_relative(base, relative);
        match std::fs::read(&path) {
            Ok(bytes) if content_hash(&bytes) == recorded.hash => {}
            Ok(_) => return Some("file content changed"),
            Err(_) => return Some("recorded file missing"),
        }
    }
    None
}
