//! Core abstractions for tsproj.
//!
//! This crate holds the data model and leaf components shared by the
//! compiler implementation and the language server.
//!
//! # Architecture
//!
//! tsproj-core defines:
//! - **Configs**: `tsconfig.json` parsing into immutable [`ConfigEntry`] values
//!   and nearest-config lookup through [`ConfigResolver`]
//! - **Declaration maps**: decoding `.d.ts.map` files and translating emitted
//!   positions back to source ([`DeclarationMap`], [`DeclarationMapCache`])
//! - **Build info**: the reuse-or-rebuild decision ([`IncrementalStateStore`])
//! - **Traits**: the compiler collaborator surface ([`Compiler`], [`Program`])
//! - **Error types**: [`ProjectError`] and [`ProjectDiagnostic`]
//!
//! # Examples
//!
//! Implementing a compiler collaborator:
//!
//! ```no_run
//! use tsproj_core::{BuildOutput, BuildRequest, Compiler, EmptyProgram};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct NullCompiler;
//!
//! #[async_trait]
//! impl Compiler for NullCompiler {
//!     async fn build_program(&self, _request: BuildRequest) -> BuildOutput {
//!         BuildOutput {
//!             program: Arc::new(EmptyProgram),
//!             diagnostics: vec![],
//!         }
//!     }
//! }
//! ```

pub mod build_info;
pub mod declaration_map;
pub mod diagnostics;
pub mod error;
pub mod paths;
pub mod program;
pub mod resolver;
pub mod tsconfig;

// Re-export commonly used types
pub use build_info::{BuildInfo, IncrementalStateStore, build_info_path, content_hash};
pub use declaration_map::{DeclarationMap, DeclarationMapCache, SourcePosition};
pub use diagnostics::ProjectDiagnostic;
pub use error::{ProjectError, Result};
pub use program::{
    BuildOutput, BuildRequest, Compiler, EmptyProgram, FileLocation, Program, SearchScope, Symbol,
};
pub use resolver::{ConfigResolver, DEFAULT_CONFIG_FILE_NAMES};
pub use tsconfig::{CompilerOptions, ConfigEntry, ExpansionPolicy, FileSpec};
