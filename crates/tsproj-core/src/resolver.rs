//! Nearest-config resolution with a staleness-checked entry cache.

use crate::error::{ProjectError, Result};
use crate::paths::normalize_path;
use crate::tsconfig::ConfigEntry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Config file names probed at each directory when none are configured.
pub const DEFAULT_CONFIG_FILE_NAMES: &[&str] = &["tsconfig.json", "jsconfig.json"];

struct CachedConfig {
    entry: Arc<ConfigEntry>,
    modified_at: Option<SystemTime>,
}

/// Finds and caches the `tsconfig.json` files that govern source files.
///
/// Entries are re-parsed when the file's modification time moves past the
/// cached one, or after an explicit [`ConfigResolver::invalidate`].
///
/// # Examples
///
/// ```no_run
/// use tsproj_core::ConfigResolver;
/// use std::path::Path;
///
/// let resolver = ConfigResolver::new();
/// let candidates = resolver.nearest_config(Path::new("/repo/a/a.ts"));
/// if let Some(nearest) = candidates.last() {
///     println!("{} claims a.ts: {}", nearest.path.display(), nearest.claims(Path::new("/repo/a/a.ts")));
/// }
/// ```
pub struct ConfigResolver {
    file_names: Vec<String>,
    entries: DashMap<PathBuf, CachedConfig>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::with_file_names(
            DEFAULT_CONFIG_FILE_NAMES
                .iter()
                .map(|n| (*n).to_string())
                .collect(),
        )
    }

    /// Creates a resolver probing `file_names` in order at each directory.
    pub fn with_file_names(file_names: Vec<String>) -> Self {
        Self {
            file_names,
            entries: DashMap::new(),
        }
    }

    pub fn file_names(&self) -> &[String] {
        &self.file_names
    }

    /// Returns true if `path` has one of the probed config file names.
    pub fn is_config_file_name(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.file_names.iter().any(|f| f == name))
    }

    /// Returns the parsed entry for `config_path`, reading it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::ConfigNotFound`] if the file no longer exists.
    pub fn get(&self, config_path: &Path) -> Result<Arc<ConfigEntry>> {
        let config_path = normalize_path(config_path);
        let current_mtime = std::fs::metadata(&config_path)
            .and_then(|m| m.modified())
            .ok();

        if let Some(cached) = self.entries.get(&config_path)
            && current_mtime.is_some()
            && current_mtime <= cached.modified_at
        {
            tracing::trace!(config = %config_path.display(), "config cache hit");
            return Ok(Arc::clone(&cached.entry));
        }

        match ConfigEntry::load(&config_path) {
            Ok(entry) => {
                let entry = Arc::new(entry);
                self.entries.insert(
                    config_path,
                    CachedConfig {
                        entry: Arc::clone(&entry),
                        modified_at: entry.modified,
                    },
                );
                Ok(entry)
            }
            Err(e) => {
                self.entries.remove(&config_path);
                Err(e)
            }
        }
    }

    /// Walks upward from `file`'s directory collecting configs, innermost
    /// first, and stops after the first config that claims `file`.
    ///
    /// An empty result means the file has no config and belongs to an
    /// inferred project. Unreadable configs are skipped.
    pub fn nearest_config(&self, file: &Path) -> Vec<Arc<ConfigEntry>> {
        let file = normalize_path(file);
        let mut result = Vec::new();
        for entry in self.walk_ancestors(&file) {
            let claims = entry.claims(&file);
            result.push(entry);
            if claims {
                break;
            }
        }
        result
    }

    /// Every config in an ancestor directory of `file`, innermost first.
    pub fn ancestor_configs(&self, file: &Path) -> Vec<Arc<ConfigEntry>> {
        self.walk_ancestors(&normalize_path(file)).collect()
    }

    fn walk_ancestors<'a>(&'a self, file: &'a Path) -> impl Iterator<Item = Arc<ConfigEntry>> + 'a {
        file.ancestors()
            .skip(1)
            .filter_map(move |dir| self.config_in(dir))
    }

    fn config_in(&self, dir: &Path) -> Option<Arc<ConfigEntry>> {
        let candidate = self
            .file_names
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())?;
        match self.get(&candidate) {
            Ok(entry) => Some(entry),
            Err(ProjectError::ConfigNotFound(_)) => None,
            Err(e) => {
                tracing::warn!(config = %candidate.display(), error = %e, "failed to read config");
                None
            }
        }
    }

    /// Drops `path` from the cache along with every entry that extends it.
    ///
    /// Returns the config paths that were invalidated.
    pub fn invalidate(&self, path: &Path) -> Vec<PathBuf> {
        let path = normalize_path(path);
        let affected: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|e| e.value().entry.depends_on_file(&path))
            .map(|e| e.key().clone())
            .collect();

        for key in &affected {
            self.entries.remove(key);
        }
        if !affected.is_empty() {
            tracing::debug!(
                changed = %path.display(),
                invalidated = affected.len(),
                "invalidated cached configs"
            );
        }
        affected
    }

    /// Cached entries sorted by path.
    pub fn cached_entries(&self) -> Vec<Arc<ConfigEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|e| Arc::clone(&e.value().entry))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}
