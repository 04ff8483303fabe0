//! Lexical program: name resolution over scanned files.
//!
//! An identifier occurrence resolves to a declaration by, in order: the
//! import binding whose imported-name token it is, a declaration of the same
//! name in its own file, or an import binding that introduces the name.
//! Imported names are then chased through the target module's exports,
//! re-exports and `export *` statements. There is no block scoping.

use crate::scanner::{BindingKind, Declaration, FileIndex, ModuleKind, Occurrence};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_lsp_server::ls_types::Position;
use tsproj_core::paths::is_declaration_file;
use tsproj_core::program::fuzzy_matches;
use tsproj_core::{FileLocation, Program, SearchScope, Symbol};

/// One file of a program and the resolved targets of its module references.
#[derive(Debug, Clone)]
pub struct ProgramFile {
    pub index: Arc<FileIndex>,
    /// Aligned with `index.modules`; `None` for unresolved specifiers.
    pub targets: Vec<Option<PathBuf>>,
}

type DeclRef<'a> = (&'a Path, &'a Declaration);

/// A program built by [`LexicalCompiler`](crate::LexicalCompiler).
#[derive(Debug, Clone, Default)]
pub struct LexicalProgram {
    files: BTreeMap<PathBuf, ProgramFile>,
}

impl LexicalProgram {
    pub fn new(files: BTreeMap<PathBuf, ProgramFile>) -> Self {
        Self { files }
    }

    pub fn file(&self, path: &Path) -> Option<&ProgramFile> {
        self.files.get(path)
    }

    fn target<'a>(&self, file: &'a ProgramFile, module: usize) -> Option<&'a Path> {
        file.targets.get(module)?.as_deref()
    }

    fn resolve_occurrence<'a>(&'a self, path: &'a Path, occurrence: &Occurrence) -> Option<DeclRef<'a>> {
        let (path, file) = self.files.get_key_value(path)?;
        let mut visited = HashSet::new();

        if occurrence.member_access {
            let qualifier = occurrence.qualifier.as_deref()?;
            let namespace = file
                .index
                .bindings
                .iter()
                .find(|b| b.kind == BindingKind::Namespace && !b.reexport && b.local == qualifier)?;
            let target = self.target(file, namespace.module)?;
            return self.resolve_export(target, &occurrence.name, &mut visited);
        }

        if let Some(binding) = file
            .index
            .bindings
            .iter()
            .find(|b| b.imported_range == Some(occurrence.range))
        {
            let target = self.target(file, binding.module)?;
            return self.resolve_export(target, &binding.imported, &mut visited);
        }

        if let Some(declaration) = file
            .index
            .declarations
            .iter()
            .find(|d| d.name == occurrence.name)
        {
            return Some((path.as_path(), declaration));
        }

        let binding = file.index.bindings.iter().find(|b| {
            !b.reexport && b.kind != BindingKind::Namespace && b.local == occurrence.name
        })?;
        let target = self.target(file, binding.module)?;
        self.resolve_export(target, &binding.imported, &mut visited)
    }

    /// Finds the declaration exported as `name` from `module`.
    fn resolve_export<'a>(
        &'a self,
        module: &Path,
        name: &str,
        visited: &mut HashSet<(PathBuf, String)>,
    ) -> Option<DeclRef<'a>> {
        if !visited.insert((module.to_path_buf(), name.to_string())) {
            return None;
        }
        let (path, file) = self.files.get_key_value(module)?;
        let path = path.as_path();
        let top_level = |d: &&Declaration| d.container.is_none();

        if name == "default" {
            if let Some(declaration) = file.index.declarations.iter().find(|d| d.is_default) {
                return Some((path, declaration));
            }
        } else if let Some(declaration) = file
            .index
            .declarations
            .iter()
            .filter(top_level)
            .find(|d| d.exported && !d.is_default && d.name == name)
        {
            return Some((path, declaration));
        }

        if let Some(export) = file.index.local_exports.iter().find(|e| e.exported == name)
            && let Some(declaration) = file
                .index
                .declarations
                .iter()
                .filter(top_level)
                .find(|d| d.name == export.local)
        {
            return Some((path, declaration));
        }

        for binding in file.index.bindings.iter().filter(|b| b.reexport && b.local == name) {
            if let Some(target) = self.target(file, binding.module)
                && let Some(found) = self.resolve_export(target, &binding.imported, visited)
            {
                return Some(found);
            }
        }

        for (module_index, reference) in file.index.modules.iter().enumerate() {
            if reference.kind == ModuleKind::ExportAll
                && let Some(target) = self.target(file, module_index)
                && let Some(found) = self.resolve_export(target, name, visited)
            {
                return Some(found);
            }
        }

        if is_declaration_file(path) {
            return file
                .index
                .declarations
                .iter()
                .filter(top_level)
                .find(|d| d.name == name)
                .map(|d| (path, d));
        }
        None
    }

    fn symbol((path, declaration): DeclRef<'_>) -> Symbol {
        Symbol {
            name: declaration.name.clone(),
            kind: declaration.kind,
            declaration: FileLocation::new(path, declaration.range),
            container: declaration.container.clone(),
        }
    }

    /// Returns true if `name` could refer to `symbol` inside `file`.
    fn may_refer_to(file: &ProgramFile, name: &str, symbol: &Symbol) -> bool {
        name == symbol.name
            || file
                .index
                .bindings
                .iter()
                .any(|b| b.kind != BindingKind::Namespace && b.local == name)
    }
}

impl Program for LexicalProgram {
    fn files(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    fn contains_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn find_symbol_at(&self, path: &Path, position: Position) -> Option<Symbol> {
        let file = self.files.get(path)?;
        let occurrence = file.index.occurrences.iter().find(|o| o.contains(position))?;
        self.resolve_occurrence(path, occurrence).map(Self::symbol)
    }

    fn declarations_named(&self, name: &str) -> Vec<Symbol> {
        self.files
            .iter()
            .flat_map(|(path, file)| {
                file.index
                    .declarations
                    .iter()
                    .filter(move |d| d.name == name)
                    .map(move |d| Self::symbol((path.as_path(), d)))
            })
            .collect()
    }

    fn search_references(&self, symbol: &Symbol, scope: &SearchScope) -> Vec<FileLocation> {
        let mut locations = Vec::new();
        for (path, file) in &self.files {
            if !scope.includes(path) {
                continue;
            }
            for occurrence in &file.index.occurrences {
                if !Self::may_refer_to(file, &occurrence.name, symbol) {
                    continue;
                }
                let Some((decl_path, declaration)) = self.resolve_occurrence(path, occurrence) else {
                    continue;
                };
                if decl_path == symbol.declaration.path
                    && declaration.range == symbol.declaration.range
                {
                    locations.push(FileLocation::new(path.clone(), occurrence.range));
                }
            }
        }
        locations
    }

    fn workspace_symbol_index(&self, query: &str) -> Vec<Symbol> {
        self.files
            .iter()
            .flat_map(|(path, file)| {
                file.index
                    .declarations
                    .iter()
                    .filter(|d| fuzzy_matches(&d.name, query))
                    .map(move |d| Self::symbol((path.as_path(), d)))
            })
            .collect()
    }
}
