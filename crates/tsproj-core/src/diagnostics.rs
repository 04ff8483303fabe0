//! Diagnostics attached to configs and projects.
//!
//! Configuration problems, missing inputs and compiler build failures never
//! abort a request. They are collected as [`ProjectDiagnostic`] values and
//! surfaced alongside the project they belong to.

use std::fmt;
use std::path::{Path, PathBuf};
use tower_lsp_server::ls_types::{DiagnosticSeverity, Range};

/// A single problem attached to a config file, project, or source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDiagnostic {
    /// File the problem was found in, if any.
    pub file: Option<PathBuf>,
    /// Location inside `file`, if known.
    pub range: Option<Range>,
    pub severity: DiagnosticSeverity,
    pub message: String,
}

impl ProjectDiagnostic {
    pub fn error(file: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            file,
            range: None,
            severity: DiagnosticSeverity::ERROR,
            message: message.into(),
        }
    }

    pub fn warning(file: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            file,
            range: None,
            severity: DiagnosticSeverity::WARNING,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::ERROR
    }

    /// Returns true if the diagnostic is attached to `path`.
    pub fn concerns(&self, path: &Path) -> bool {
        self.file.as_deref() == Some(path)
    }
}

impl fmt::Display for ProjectDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = if self.is_error() { "error" } else { "warning" };
        match &self.file {
            Some(file) => write!(f, "{level}: {}: {}", file.display(), self.message),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}
