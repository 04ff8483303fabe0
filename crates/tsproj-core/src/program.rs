//! Compiler collaborator interface.
//!
//! The project service never parses or checks code itself. It hands a
//! [`BuildRequest`] to a [`Compiler`] and queries the resulting [`Program`]
//! for symbols and references. Builds never fail: problems are reported as
//! diagnostics next to a possibly partial program.

use crate::diagnostics::ProjectDiagnostic;
use crate::tsconfig::CompilerOptions;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_lsp_server::ls_types::{Position, Range, SymbolKind};

/// A range inside a file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileLocation {
    pub path: PathBuf,
    pub range: Range,
}

impl FileLocation {
    pub fn new(path: impl Into<PathBuf>, range: Range) -> Self {
        Self {
            path: path.into(),
            range,
        }
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.path.display(),
            self.range.start.line + 1,
            self.range.start.character + 1
        )
    }
}

/// A declared symbol, identified by its name and declaration site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Range of the declaration's name.
    pub declaration: FileLocation,
    /// Enclosing declaration, if any.
    pub container: Option<String>,
}

/// Files a reference search is limited to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SearchScope {
    #[default]
    Program,
    Files(Vec<PathBuf>),
}

impl SearchScope {
    pub fn includes(&self, path: &Path) -> bool {
        match self {
            Self::Program => true,
            Self::Files(files) => files.iter().any(|f| f == path),
        }
    }
}

/// Input of a program build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Key of the project being built (config path or inferred key).
    pub project: PathBuf,
    pub root_files: Vec<PathBuf>,
    pub options: CompilerOptions,
    /// Whether the previous build of this project may be reused.
    pub reuse: bool,
    /// In-memory contents of open documents, taking precedence over disk.
    pub overlays: HashMap<PathBuf, Arc<str>>,
    /// Emitted `.d.ts` outputs of referenced projects mapped to their sources.
    pub redirects: HashMap<PathBuf, PathBuf>,
    pub cancel: CancellationToken,
}

impl BuildRequest {
    pub fn new(project: impl Into<PathBuf>, root_files: Vec<PathBuf>, options: CompilerOptions) -> Self {
        Self {
            project: project.into(),
            root_files,
            options,
            reuse: false,
            overlays: HashMap::new(),
            redirects: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of a program build.
#[derive(Clone)]
pub struct BuildOutput {
    pub program: Arc<dyn Program>,
    pub diagnostics: Vec<ProjectDiagnostic>,
}

impl fmt::Debug for BuildOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOutput")
            .field("files", &self.program.files().len())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

/// Builds programs from root files and options.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn build_program(&self, request: BuildRequest) -> BuildOutput;
}

/// A compiled program: the query surface of one project.
///
/// Implementations must tolerate any input and return empty results rather
/// than failing.
pub trait Program: Send + Sync {
    /// Every file in the program, roots and imported files alike.
    fn files(&self) -> Vec<PathBuf>;

    fn contains_file(&self, path: &Path) -> bool {
        self.files().iter().any(|f| f == path)
    }

    /// The symbol referenced or declared at `position` in `path`.
    fn find_symbol_at(&self, path: &Path, position: Position) -> Option<Symbol>;

    /// Declarations named `name` anywhere in the program.
    fn declarations_named(&self, name: &str) -> Vec<Symbol>;

    /// Every occurrence of `symbol` within `scope`, declaration included.
    ///
    /// `symbol` must be a declaration of this program; foreign symbols
    /// yield no results.
    fn search_references(&self, symbol: &Symbol, scope: &SearchScope) -> Vec<FileLocation>;

    /// Declarations whose names match `query`, for workspace symbol search.
    fn workspace_symbol_index(&self, query: &str) -> Vec<Symbol>;
}

/// A program with no files, used when a build produced nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyProgram;

impl Program for EmptyProgram {
    fn files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn find_symbol_at(&self, _path: &Path, _position: Position) -> Option<Symbol> {
        None
    }

    fn declarations_named(&self, _name: &str) -> Vec<Symbol> {
        Vec::new()
    }

    fn search_references(&self, _symbol: &Symbol, _scope: &SearchScope) -> Vec<FileLocation> {
        Vec::new()
    }

    fn workspace_symbol_index(&self, _query: &str) -> Vec<Symbol> {
        Vec::new()
    }
}

/// Case-insensitive subsequence match used by workspace symbol search.
///
/// An empty query matches everything.
///
/// # Examples
///
/// ```
/// use tsproj_core::program::fuzzy_matches;
///
/// assert!(fuzzy_matches("fnA", "fn"));
/// assert!(fuzzy_matches("createUser", "cu"));
/// assert!(!fuzzy_matches("fnA", "fnB"));
/// ```
pub fn fuzzy_matches(name: &str, query: &str) -> bool {
    let mut remaining = query.chars().flat_map(char::to_lowercase).peekable();
    for c in name.chars().flat_map(char::to_lowercase) {
        if remaining.peek() == Some(&c) {
            remaining.next();
        }
    }
    remaining.peek().is_none()
}
