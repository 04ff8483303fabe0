//! Path helpers shared by the resolver, the project graph and the compiler.
//!
//! All paths handled by tsproj are absolute and lexically normalized: `.`
//! components are dropped and `..` components are folded into their parent.
//! Normalization never touches the filesystem, so it is stable for files that
//! do not exist yet (open-but-unsaved documents, emitted outputs).

use std::path::{Component, Path, PathBuf};

/// Prefix of the synthetic key used for inferred (config-less) projects.
pub const INFERRED_PREFIX: &str = "<inferred>";

/// Extensions accepted as program root files, longest first.
pub const SOURCE_EXTENSIONS: &[&str] = &[".d.mts", ".d.cts", ".d.ts", ".tsx", ".mts", ".cts", ".ts"];

const DECLARATION_EXTENSIONS: &[&str] = &[".d.ts", ".d.mts", ".d.cts"];

/// Lexically normalizes a path.
///
/// # Examples
///
/// ```
/// use tsproj_core::paths::normalize_path;
/// use std::path::Path;
///
/// assert_eq!(
///     normalize_path(Path::new("/repo/a/../b/./c.ts")),
///     Path::new("/repo/b/c.ts")
/// );
/// ```
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Joins `relative` onto `base` unless it is already absolute, then normalizes.
pub fn resolve_relative(base: &Path, relative: &str) -> PathBuf {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        normalize_path(candidate)
    } else {
        normalize_path(&base.join(candidate))
    }
}

/// Returns true for `.d.ts`, `.d.mts` and `.d.cts` files.
pub fn is_declaration_file(path: &Path) -> bool {
    let name = file_name(path);
    DECLARATION_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Returns true if the file has one of [`SOURCE_EXTENSIONS`].
pub fn is_source_file(path: &Path) -> bool {
    let name = file_name(path);
    SOURCE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Returns the file name without its (possibly compound) source extension.
pub fn strip_source_extension(path: &Path) -> Option<String> {
    let name = file_name(path);
    SOURCE_EXTENSIONS
        .iter()
        .find(|ext| name.ends_with(*ext))
        .map(|ext| name[..name.len() - ext.len()].to_string())
}

/// Computes the declaration file the compiler would emit for `source`.
///
/// The relative location of `source` under `root_dir` is mirrored under
/// `out_dir`. Declaration inputs emit nothing and yield `None`, as do sources
/// outside `root_dir`.
///
/// # Examples
///
/// ```
/// use tsproj_core::paths::declaration_output_path;
/// use std::path::Path;
///
/// let out = declaration_output_path(
///     Path::new("/repo/a/src/a.ts"),
///     Path::new("/repo/a/src"),
///     Path::new("/repo/a/bin"),
/// );
/// assert_eq!(out.as_deref(), Some(Path::new("/repo/a/bin/a.d.ts")));
/// ```
pub fn declaration_output_path(source: &Path, root_dir: &Path, out_dir: &Path) -> Option<PathBuf> {
    if is_declaration_file(source) {
        return None;
    }
    let relative = source.strip_prefix(root_dir).ok()?;
    let stem = strip_source_extension(source)?;
    let ext = match file_name(source).rsplit('.').next() {
        Some("mts") => ".d.mts",
        Some("cts") => ".d.cts",
        _ => ".d.ts",
    };
    let mut output = out_dir.join(relative);
    output.set_file_name(format!("{stem}{ext}"));
    Some(normalize_path(&output))
}

/// Builds the synthetic project key for a file without a configuration.
pub fn inferred_project_key(file: &Path) -> PathBuf {
    let display = file.to_string_lossy();
    PathBuf::from(format!("{INFERRED_PREFIX}{}", display.trim_end_matches('/')))
}

/// Returns true if `key` was produced by [`inferred_project_key`].
pub fn is_inferred_key(key: &Path) -> bool {
    key.to_string_lossy().starts_with(INFERRED_PREFIX)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}
