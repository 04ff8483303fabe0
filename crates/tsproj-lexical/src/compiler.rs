//! [`Compiler`] implementation backed by the lexical scanner.

use crate::program::{LexicalProgram, ProgramFile};
use crate::scanner::{FileIndex, ModuleKind, scan};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tsproj_core::paths::{is_source_file, normalize_path, resolve_relative};
use tsproj_core::{BuildOutput, BuildRequest, Compiler, EmptyProgram, ProjectDiagnostic};

/// Extensions tried, in order, when an import specifier has none.
const RESOLUTION_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".d.ts", ".mts", ".cts", ".d.mts", ".d.cts"];

/// Builds [`LexicalProgram`]s.
///
/// Scanned files are kept in a cache shared by all builds. A build whose
/// request allows reuse takes a cached index when the file's size and
/// modification time still match the scanned copy; any other build re-reads
/// and re-scans every file it visits.
///
/// # Examples
///
/// ```no_run
/// use tsproj_core::{BuildRequest, Compiler, CompilerOptions, Program};
/// use tsproj_lexical::LexicalCompiler;
/// use std::path::PathBuf;
///
/// # async fn example() {
/// let compiler = LexicalCompiler::new();
/// let request = BuildRequest::new(
///     "/repo/a/tsconfig.json",
///     vec![PathBuf::from("/repo/a/a.ts")],
///     CompilerOptions::default(),
/// );
/// let output = compiler.build_program(request).await;
/// println!("{} files", output.program.files().len());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LexicalCompiler {
    cache: Arc<DashMap<PathBuf, CachedIndex>>,
}

/// A scanned file and the on-disk stamp it was scanned from.
#[derive(Debug)]
struct CachedIndex {
    index: Arc<FileIndex>,
    stamp: Option<FileStamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok()?,
            len: metadata.len(),
        })
    }
}

impl LexicalCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached file indices.
    pub fn cached_files(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl Compiler for LexicalCompiler {
    async fn build_program(&self, request: BuildRequest) -> BuildOutput {
        let cache = Arc::clone(&self.cache);
        let project = request.project.clone();

        match tokio::task::spawn_blocking(move || build(&cache, &request)).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(project = %project.display(), error = %e, "build task failed");
                BuildOutput {
                    program: Arc::new(EmptyProgram),
                    diagnostics: vec![ProjectDiagnostic::error(
                        None,
                        format!("program build failed: {e}"),
                    )],
                }
            }
        }
    }
}

fn build(cache: &DashMap<PathBuf, CachedIndex>, request: &BuildRequest) -> BuildOutput {
    let mut diagnostics = Vec::new();
    let mut files: BTreeMap<PathBuf, ProgramFile> = BTreeMap::new();
    let mut queue: VecDeque<PathBuf> = request.root_files.iter().map(|p| normalize_path(p)).collect();
    let mut rescanned = 0usize;

    while let Some(path) = queue.pop_front() {
        if request.cancel.is_cancelled() {
            diagnostics.push(ProjectDiagnostic::warning(
                Some(request.project.clone()),
                "program build cancelled; results are partial",
            ));
            break;
        }
        if files.contains_key(&path) {
            continue;
        }

        let index = if let Some(text) = request.overlays.get(&path) {
            Arc::new(scan(text))
        } else if let Some(index) = request.reuse.then(|| reusable(cache, &path)).flatten() {
            index
        } else {
            let stamp = FileStamp::read(&path);
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    rescanned += 1;
                    let index = Arc::new(scan(&text));
                    cache.insert(
                        path.clone(),
                        CachedIndex {
                            index: Arc::clone(&index),
                            stamp,
                        },
                    );
                    index
                }
                Err(e) => {
                    diagnostics.push(ProjectDiagnostic::error(
                        Some(path.clone()),
                        format!("cannot read source file: {e}"),
                    ));
                    continue;
                }
            }
        };

        for problem in &index.problems {
            diagnostics.push(
                ProjectDiagnostic::error(Some(path.clone()), problem.message.clone())
                    .with_range(problem.range),
            );
        }

        let mut targets = Vec::with_capacity(index.modules.len());
        for module in &index.modules {
            let target = resolve_module(&path, &module.specifier, request);
            match &target {
                Some(target) => queue.push_back(target.clone()),
                None if is_relative(&module.specifier) => {
                    let severity_error = module.kind != ModuleKind::Import;
                    let message = format!("cannot find module '{}'", module.specifier);
                    let diagnostic = if severity_error {
                        ProjectDiagnostic::error(Some(path.clone()), message)
                    } else {
                        ProjectDiagnostic::warning(Some(path.clone()), message)
                    };
                    diagnostics.push(diagnostic.with_range(module.range));
                }
                None => {}
            }
            targets.push(target);
        }

        files.insert(path, ProgramFile { index, targets });
    }

    tracing::debug!(
        project = %request.project.display(),
        files = files.len(),
        rescanned,
        reuse = request.reuse,
        "built lexical program"
    );

    BuildOutput {
        program: Arc::new(LexicalProgram::new(files)),
        diagnostics,
    }
}

/// The cached index of `path`, if the file is unchanged since it was scanned.
fn reusable(cache: &DashMap<PathBuf, CachedIndex>, path: &Path) -> Option<Arc<FileIndex>> {
    let cached = cache.get(path)?;
    let current = FileStamp::read(path)?;
    (cached.stamp == Some(current)).then(|| Arc::clone(&cached.index))
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
}

/// Resolves a relative module specifier to a file, then applies the
/// request's output-to-source redirects.
fn resolve_module(from: &Path, specifier: &str, request: &BuildRequest) -> Option<PathBuf> {
    if !is_relative(specifier) {
        return None;
    }
    let dir = from.parent()?;
    let base = resolve_relative(dir, specifier);
    let exists = |p: &Path| request.overlays.contains_key(p) || p.is_file();

    let mut candidates = Vec::new();
    if is_source_file(&base) {
        candidates.push(base.clone());
    }
    let base_text = base.to_string_lossy();
    for (js, ts) in [(".js", ".ts"), (".jsx", ".tsx"), (".mjs", ".mts"), (".cjs", ".cts")] {
        if let Some(stem) = base_text.strip_suffix(js) {
            candidates.push(PathBuf::from(format!("{stem}{ts}")));
            candidates.push(PathBuf::from(format!("{stem}.d{ts}")));
        }
    }
    for ext in RESOLUTION_EXTENSIONS {
        candidates.push(PathBuf::from(format!("{base_text}{ext}")));
    }
    for ext in [".ts", ".tsx", ".d.ts"] {
        candidates.push(base.join(format!("index{ext}")));
    }

    let found = candidates.into_iter().find(|c| exists(c))?;
    Some(request.redirects.get(&found).cloned().unwrap_or(found))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;
    use tower_lsp_server::ls_types::Position;
    use tsproj_core::{CompilerOptions, Program};

    fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        normalize_path(&path)
    }

    fn request(roots: Vec<PathBuf>) -> BuildRequest {
        BuildRequest::new("/test/tsconfig.json", roots, CompilerOptions::default())
    }

    #[tokio::test]
    async fn test_follows_relative_imports() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "a/bin/a.d.ts", "export declare function fnA(): void;\n");
        let user = write(root, "user/user.ts", "import { fnA } from '../a/bin/a';\nfnA();\n");

        let output = LexicalCompiler::new().build_program(request(vec![user.clone()])).await;
        assert!(output.diagnostics.is_empty());
        assert_eq!(output.program.files().len(), 2);

        let symbol = output.program.find_symbol_at(&user, Position::new(1, 0)).unwrap();
        assert_eq!(symbol.declaration.path, normalize_path(&root.join("a/bin/a.d.ts")));
    }

    #[tokio::test]
    async fn test_redirects_replace_outputs_with_sources() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let dts = write(root, "a/bin/a.d.ts", "export declare function fnA(): void;\n");
        let source = write(root, "a/a.ts", "export function fnA() {}\n");
        let user = write(root, "b/b.ts", "import { fnA } from '../a/bin/a';\nfnA();\n");

        let mut req = request(vec![user.clone()]);
        req.redirects = HashMap::from([(dts.clone(), source.clone())]);
        let output = LexicalCompiler::new().build_program(req).await;

        assert!(output.program.contains_file(&source));
        assert!(!output.program.contains_file(&dts));
        let symbol = output.program.find_symbol_at(&user, Position::new(1, 0)).unwrap();
        assert_eq!(symbol.declaration.path, source);
    }

    #[tokio::test]
    async fn test_overlays_take_precedence() {
        let dir = TempDir::new().unwrap();
        let file = write(dir.path(), "main.ts", "export function onDisk() {}\n");

        let mut req = request(vec![file.clone()]);
        req.overlays
            .insert(file.clone(), Arc::from("export function inMemory() {}\n"));
        let output = LexicalCompiler::new().build_program(req).await;

        let names: Vec<_> = output
            .program
            .workspace_symbol_index("")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["inMemory"]);
    }

    #[test]
    fn test_missing_root_and_module_are_diagnostics() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let main = write(root, "main.ts", "import { x } from './nowhere';\nimport 'lodash';\n");
        let missing = root.join("missing.ts");

        let output = tokio_test::block_on(
            LexicalCompiler::new().build_program(request(vec![main.clone(), missing])),
        );

        assert_eq!(output.program.files(), vec![main]);
        assert_eq!(output.diagnostics.len(), 2);
        assert!(output.diagnostics.iter().any(|d| d.message.contains("./nowhere")));
        assert!(output.diagnostics.iter().any(|d| d.message.contains("cannot read")));
    }

    #[tokio::test]
    async fn test_reuse_keeps_unchanged_index() {
        let dir = TempDir::new().unwrap();
        let file = write(dir.path(), "main.ts", "export function first() {}\n");
        let compiler = LexicalCompiler::new();

        compiler.build_program(request(vec![file.clone()])).await;
        assert_eq!(compiler.cached_files(), 1);
        let scanned = Arc::clone(&compiler.cache.get(&file).unwrap().index);

        let mut reused = request(vec![file.clone()]);
        reused.reuse = true;
        let output = compiler.build_program(reused).await;
        assert_eq!(output.program.declarations_named("first").len(), 1);
        assert!(Arc::ptr_eq(&scanned, &compiler.cache.get(&file).unwrap().index));
    }

    #[tokio::test]
    async fn test_reuse_rescans_file_changed_on_disk() {
        let dir = TempDir::new().unwrap();
        let file = write(dir.path(), "main.ts", "export function fnA() {}\n");
        let compiler = LexicalCompiler::new();

        compiler.build_program(request(vec![file.clone()])).await;
        fs::write(&file, "export function fnNew() {}\n").unwrap();

        let mut reused = request(vec![file.clone()]);
        reused.reuse = true;
        let output = compiler.build_program(reused).await;
        assert_eq!(output.program.declarations_named("fnNew").len(), 1);
        assert!(output.program.declarations_named("fnA").is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_build_is_partial() {
        let dir = TempDir::new().unwrap();
        let file = write(dir.path(), "main.ts", "export const x = 1;\n");

        let req = request(vec![file]);
        req.cancel.cancel();
        let output = LexicalCompiler::new().build_program(req).await;
        assert!(output.program.files().is_empty());
        assert!(output.diagnostics[0].message.contains("cancelled"));
    }

    #[test]
    fn test_resolve_module_candidates() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let from = write(root, "src/main.ts", "");
        let util = write(root, "src/util/index.ts", "");
        let helper = write(root, "src/helper.ts", "");
        let req = request(vec![]);

        assert_eq!(resolve_module(&from, "./util", &req), Some(util));
        assert_eq!(resolve_module(&from, "./helper.js", &req), Some(helper));
        assert_eq!(resolve_module(&from, "react", &req), None);
        assert_eq!(resolve_module(&from, "./absent", &req), None);
    }
}
