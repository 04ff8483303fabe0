use std::path::PathBuf;
use thiserror::Error;

/// Core error types for tsproj.
///
/// Only failures that abort an operation are represented here. Problems the
/// project service tolerates (malformed configs, missing declaration maps,
/// failed builds) are reported as [`ProjectDiagnostic`](crate::ProjectDiagnostic)
/// values instead.
///
/// # Examples
///
/// ```
/// use tsproj_core::error::{ProjectError, Result};
/// use std::path::Path;
///
/// fn require_config(path: &Path) -> Result<()> {
///     if !path.exists() {
///         return Err(ProjectError::ConfigNotFound(path.to_path_buf()));
///     }
///     Ok(())
/// }
///
/// assert!(require_config(Path::new("/definitely/missing/tsconfig.json")).is_err());
/// ```
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("failed to parse {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("tsconfig extends cycle detected at {}", .0.display())]
    ExtendsCycle(PathBuf),

    #[error("configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("invalid declaration map {}: {reason}", path.display())]
    InvalidDeclarationMap { path: PathBuf, reason: String },

    #[error("invalid build info {}: {reason}", path.display())]
    InvalidBuildInfo { path: PathBuf, reason: String },

    #[error("invalid glob pattern {pattern}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid URI: {0}")]
    InvalidUri(String),

    #[error("project not loaded: {}", .0.display())]
    ProjectNotLoaded(PathBuf),

    #[error("request cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for `Result<T, ProjectError>`.
pub type Result<T> = std::result::Result<T, ProjectError>;
