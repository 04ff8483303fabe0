//! Open documents and their project assignment.

use crate::project::ProjectGraph;
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_lsp_server::ls_types::Uri;
use tsproj_core::ConfigEntry;
use tsproj_core::paths::{inferred_project_key, normalize_path};

/// Where an open file belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Project used for language features on the file.
    pub default: PathBuf,
    /// `default` first, then every enclosing solution config, innermost
    /// first.
    pub containing: Vec<PathBuf>,
}

/// Picks the default and containing projects of `file`.
///
/// The default is the innermost config that claims the file. When no
/// ancestor claims it, configs with references are searched depth-first
/// for a leaf that does, unless that ancestor disables solution searching.
/// Failing both, the file gets its own inferred project. Ties between
/// sibling configs go to the first one reached.
pub fn assign_projects(graph: &ProjectGraph, file: &Path) -> Assignment {
    let file = normalize_path(file);
    let resolver = graph.resolver();
    let candidates = resolver.nearest_config(&file);

    let default = candidates
        .iter()
        .find(|entry| entry.claims(&file))
        .map(|entry| entry.path.clone())
        .or_else(|| {
            candidates
                .iter()
                .filter(|entry| !entry.references.is_empty())
                .filter(|entry| !graph.policy(entry).disable_solution_searching)
                .find_map(|entry| search_references(graph, entry, &file))
        })
        .unwrap_or_else(|| inferred_project_key(&file));

    let mut containing = vec![default.clone()];
    for entry in resolver.ancestor_configs(&file) {
        if entry.is_solution() && !containing.contains(&entry.path) {
            containing.push(entry.path.clone());
        }
    }

    tracing::debug!(
        file = %file.display(),
        default = %default.display(),
        containing = containing.len(),
        "assigned projects"
    );
    Assignment {
        default,
        containing,
    }
}

/// Depth-first search through `root`'s references for a config claiming
/// `file`.
fn search_references(graph: &ProjectGraph, root: &ConfigEntry, file: &Path) -> Option<PathBuf> {
    let mut visited: HashSet<PathBuf> = HashSet::from([root.path.clone()]);
    let mut stack: Vec<PathBuf> = root.references.iter().rev().cloned().collect();

    while let Some(path) = stack.pop() {
        if !visited.insert(path.clone()) {
            continue;
        }
        let entry = match graph.resolver().get(&path) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(config = %path.display(), error = %e, "skipping unreadable reference");
                continue;
            }
        };
        if entry.claims(file) {
            return Some(entry.path.clone());
        }
        stack.extend(entry.references.iter().rev().cloned());
    }
    None
}

/// An open document.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub uri: Uri,
    pub path: PathBuf,
    pub version: i32,
    pub text: Arc<str>,
    pub default_project: PathBuf,
    pub containing_projects: Vec<PathBuf>,
}

impl OpenFile {
    pub fn new(uri: Uri, path: PathBuf, version: i32, text: Arc<str>, assignment: Assignment) -> Self {
        Self {
            uri,
            path,
            version,
            text,
            default_project: assignment.default,
            containing_projects: assignment.containing,
        }
    }
}

/// Open documents keyed by normalized path.
#[derive(Default)]
pub struct OpenFileTracker {
    files: DashMap<PathBuf, OpenFile>,
}

impl OpenFileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `file`, returning the record it replaced.
    pub fn insert(&self, file: OpenFile) -> Option<OpenFile> {
        self.files.insert(file.path.clone(), file)
    }

    pub fn remove(&self, path: &Path) -> Option<OpenFile> {
        self.files.remove(path).map(|(_, file)| file)
    }

    pub fn get(&self, path: &Path) -> Option<OpenFile> {
        self.files.get(path).map(|file| file.clone())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn default_project(&self, path: &Path) -> Option<PathBuf> {
        self.files.get(path).map(|file| file.default_project.clone())
    }

    /// Replaces the text of an open file. Returns false if it is not open.
    pub fn update_text(&self, path: &Path, version: i32, text: Arc<str>) -> bool {
        let Some(mut file) = self.files.get_mut(path) else {
            return false;
        };
        file.version = version;
        file.text = text;
        true
    }

    /// Stores a new assignment, returning the previous default project.
    pub fn reassign(&self, path: &Path, assignment: Assignment) -> Option<PathBuf> {
        let mut file = self.files.get_mut(path)?;
        file.containing_projects = assignment.containing;
        Some(std::mem::replace(&mut file.default_project, assignment.default))
    }

    /// Every open file, sorted by path.
    pub fn files(&self) -> Vec<OpenFile> {
        let mut files: Vec<OpenFile> = self.files.iter().map(|file| file.clone()).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyOverrides;
    use crate::test_utils::test_helpers::Fixture;
    use tsproj_core::ConfigResolver;
    use tsproj_lexical::LexicalCompiler;

    fn graph() -> ProjectGraph {
        ProjectGraph::new(
            Arc::new(LexicalCompiler::new()),
            Arc::new(ConfigResolver::new()),
            PolicyOverrides::default(),
        )
    }

    #[test]
    fn test_leaf_config_is_default() {
        let fixture = Fixture::solution();
        let assignment = assign_projects(&graph(), &fixture.path("a/a.ts"));

        assert_eq!(assignment.default, fixture.config("a"));
        assert_eq!(assignment.containing, vec![fixture.config("a"), fixture.config("")]);
    }

    #[test]
    fn test_file_without_config_is_inferred() {
        let fixture = Fixture::solution();
        let user = fixture.path("user/user.ts");
        let assignment = assign_projects(&graph(), &user);

        assert_eq!(assignment.default, inferred_project_key(&user));
        assert!(assignment.containing.contains(&assignment.default));
        assert!(assignment.containing.contains(&fixture.config("")));
    }

    #[test]
    fn test_solution_search_finds_leaf() {
        let fixture = Fixture::new();
        fixture.write(
            "tsconfig.json",
            r#"{"files": [], "references": [{"path": "./configs/app"}]}"#,
        );
        fixture.write(
            "configs/app/tsconfig.json",
            r#"{"include": ["../../src"]}"#,
        );
        fixture.write("src/main.ts", "export const main = 1;\n");

        let assignment = assign_projects(&graph(), &fixture.path("src/main.ts"));
        assert_eq!(assignment.default, fixture.config("configs/app"));
        assert_eq!(
            assignment.containing,
            vec![fixture.config("configs/app"), fixture.config("")]
        );
    }

    #[test]
    fn test_solution_search_can_be_disabled() {
        let fixture = Fixture::new();
        fixture.write(
            "tsconfig.json",
            r#"{
                "files": [],
                "compilerOptions": { "disableSolutionSearching": true },
                "references": [{"path": "./configs/app"}]
            }"#,
        );
        fixture.write("configs/app/tsconfig.json", r#"{"include": ["../../src"]}"#);
        fixture.write("src/main.ts", "export const main = 1;\n");
        let main = fixture.path("src/main.ts");

        let assignment = assign_projects(&graph(), &main);
        assert_eq!(assignment.default, inferred_project_key(&main));
    }

    #[test]
    fn test_first_sibling_wins() {
        let fixture = Fixture::new();
        fixture.write(
            "tsconfig.json",
            r#"{"files": [], "references": [{"path": "./one"}, {"path": "./two"}]}"#,
        );
        fixture.write("one/tsconfig.json", r#"{"include": ["../shared"]}"#);
        fixture.write("two/tsconfig.json", r#"{"include": ["../shared"]}"#);
        fixture.write("shared/util.ts", "export const util = 1;\n");

        let graph = graph();
        let util = fixture.path("shared/util.ts");
        let first = assign_projects(&graph, &util);
        let second = assign_projects(&graph, &util);
        assert_eq!(first.default, fixture.config("one"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_tracker_update_and_reassign() {
        let fixture = Fixture::solution();
        let tracker = OpenFileTracker::new();
        let path = fixture.path("a/a.ts");
        let uri = Uri::from_file_path(&path).unwrap();
        let assignment = Assignment {
            default: fixture.config("a"),
            containing: vec![fixture.config("a")],
        };

        tracker.insert(OpenFile::new(uri, path.clone(), 1, Arc::from("x"), assignment));
        assert!(tracker.update_text(&path, 2, Arc::from("y")));
        assert_eq!(tracker.get(&path).unwrap().version, 2);
        assert!(!tracker.update_text(&fixture.path("a/none.ts"), 1, Arc::from("z")));

        let previous = tracker.reassign(
            &path,
            Assignment {
                default: fixture.config("b"),
                containing: vec![fixture.config("b")],
            },
        );
        assert_eq!(previous, Some(fixture.config("a")));
        assert_eq!(tracker.default_project(&path), Some(fixture.config("b")));

        assert!(tracker.remove(&path).is_some());
        assert!(tracker.is_empty());
    }
}
