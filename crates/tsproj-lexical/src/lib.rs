//! Lexical compiler collaborator for tsproj.
//!
//! Implements [`tsproj_core::Compiler`] without a type checker: each file is
//! scanned for declarations, module references and identifier occurrences,
//! and symbols are bound by name through the import graph. This is enough to
//! answer go-to-definition, find-all-references and workspace-symbol queries
//! over multi-project layouts.
//!
//! # Examples
//!
//! ```
//! use tsproj_lexical::scan;
//!
//! let index = scan("export function greet(name: string) {}\n");
//! assert_eq!(index.declarations[0].name, "greet");
//! assert!(index.declarations[0].exported);
//! ```

pub mod compiler;
pub mod program;
pub mod scanner;

pub use compiler::LexicalCompiler;
pub use program::{LexicalProgram, ProgramFile};
pub use scanner::{Declaration, FileIndex, Occurrence, scan};
