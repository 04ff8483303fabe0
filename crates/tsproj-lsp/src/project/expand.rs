//! Reference-graph expansion.
//!
//! Pure functions over config keys. Callers supply the edges, so the same
//! walk serves loaded projects, cached configs and test fixtures.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tsproj_core::ExpansionPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Projects the start project references, transitively.
    Outgoing,
    /// Projects that reference the start project, transitively.
    Incoming,
}

/// Result of [`expand_references`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// Reached projects in depth-first preorder, excluding the start.
    pub projects: Vec<PathBuf>,
    /// `(from, to)` edges that close a cycle.
    pub cycles: Vec<(PathBuf, PathBuf)>,
}

/// Walks the reference graph from `start` in `direction`.
///
/// Outgoing walks stop at the start when `disable_referenced_project_load`
/// is set; incoming walks stop when `disable_solution_searching` is set.
/// Every node is visited at most once.
///
/// # Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use tsproj_core::ExpansionPolicy;
/// use tsproj_lsp::project::expand::{Direction, expand_references};
///
/// let edges = |p: &Path| -> Vec<PathBuf> {
///     match p.to_str() {
///         Some("/b") => vec![PathBuf::from("/a")],
///         Some("/a") => vec![PathBuf::from("/b")],
///         _ => vec![],
///     }
/// };
/// let expansion = expand_references(Path::new("/b"), Direction::Outgoing, ExpansionPolicy::default(), edges);
/// assert_eq!(expansion.projects, vec![PathBuf::from("/a")]);
/// assert_eq!(expansion.cycles, vec![(PathBuf::from("/a"), PathBuf::from("/b"))]);
/// ```
pub fn expand_references<F>(
    start: &Path,
    direction: Direction,
    policy: ExpansionPolicy,
    mut edges: F,
) -> Expansion
where
    F: FnMut(&Path) -> Vec<PathBuf>,
{
    let blocked = match direction {
        Direction::Outgoing => policy.disable_referenced_project_load,
        Direction::Incoming => policy.disable_solution_searching,
    };
    let mut expansion = Expansion::default();
    if blocked {
        return expansion;
    }

    let mut visited: HashSet<PathBuf> = HashSet::from([start.to_path_buf()]);
    let mut on_path: Vec<PathBuf> = vec![start.to_path_buf()];
    // (node, its remaining neighbours)
    let mut stack: Vec<(PathBuf, std::vec::IntoIter<PathBuf>)> =
        vec![(start.to_path_buf(), edges(start).into_iter())];

    while let Some((node, neighbours)) = stack.last_mut() {
        let Some(next) = neighbours.next() else {
            stack.pop();
            on_path.pop();
            continue;
        };
        if on_path.contains(&next) {
            tracing::warn!(
                from = %node.display(),
                to = %next.display(),
                "project reference cycle"
            );
            expansion.cycles.push((node.clone(), next));
            continue;
        }
        if !visited.insert(next.clone()) {
            continue;
        }
        expansion.projects.push(next.clone());
        let children = edges(&next).into_iter();
        on_path.push(next.clone());
        stack.push((next, children));
    }

    expansion
}

/// Inverts a `config → references` table into `config → referencing configs`.
///
/// Referencing lists are sorted so incoming walks are deterministic.
pub fn incoming_edges(outgoing: &HashMap<PathBuf, Vec<PathBuf>>) -> HashMap<PathBuf, Vec<PathBuf>> {
    let mut incoming: HashMap<PathBuf, BTreeSet<PathBuf>> = HashMap::new();
    for (from, targets) in outgoing {
        for to in targets {
            incoming.entry(to.clone()).or_default().insert(from.clone());
        }
    }
    incoming
        .into_iter()
        .map(|(to, froms)| (to, froms.into_iter().collect()))
        .collect()
}
