//! Request dispatch over the project graph.
//!
//! [`ProjectService`] owns every piece of project state for one server
//! session. Document notifications move projects in and out of the graph;
//! queries pick a project set, load what they need retained by the request,
//! and release it when they finish.

use crate::config::ServiceConfig;
use crate::project::{
    Assignment, BuiltProgram, DeclarationMapResolver, Direction, OpenFile, OpenFileTracker,
    ProjectGraph, ProjectInfo, Retainer, assign_projects, defining_config, expand_references,
    incoming_edges,
};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tower_lsp_server::ls_types::{Position, Uri};
use tsproj_core::paths::{inferred_project_key, is_declaration_file, is_inferred_key, is_source_file, normalize_path};
use tsproj_core::{
    Compiler, ConfigEntry, ConfigResolver, ExpansionPolicy, FileLocation, ProjectDiagnostic,
    ProjectError, Result, SearchScope, Symbol,
};

/// Converts a `file://` URI to a normalized path.
///
/// # Errors
///
/// Returns [`ProjectError::InvalidUri`] for URIs that do not name a file.
pub fn uri_to_path(uri: &Uri) -> Result<PathBuf> {
    let invalid = || ProjectError::InvalidUri(uri.as_str().to_string());
    // Schemes compare case-insensitively.
    let is_file = uri
        .as_str()
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("file:"));
    if !is_file {
        return Err(invalid());
    }
    uri.to_file_path()
        .map(|path| normalize_path(&path))
        .ok_or_else(invalid)
}

/// True if `site` names the declaration at `target`. Columns count: two
/// declarations of one name can share a line.
fn same_declaration(site: &FileLocation, target: &FileLocation) -> bool {
    site.path == target.path && site.range.start == target.range.start
}

/// Releases a query's request retainers when dropped.
struct QueryRetention<'a> {
    graph: &'a ProjectGraph,
    id: u64,
}

impl QueryRetention<'_> {
    fn retainer(&self) -> Retainer {
        Retainer::Request(self.id)
    }
}

impl Drop for QueryRetention<'_> {
    fn drop(&mut self) {
        self.graph.release_request(self.id);
    }
}

/// A workspace symbol and the project it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSymbolMatch {
    /// Declaration redirected to source where a map allows.
    pub symbol: Symbol,
    pub project: PathBuf,
}

/// What kind of watched file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchedFile {
    Config,
    DeclarationMap,
    BuildInfo,
    Source,
    Other,
}

pub struct ProjectService {
    graph: ProjectGraph,
    open_files: OpenFileTracker,
    maps: DeclarationMapResolver,
    config: ServiceConfig,
    next_request: AtomicU64,
}

impl ProjectService {
    pub fn new(config: ServiceConfig, compiler: Arc<dyn Compiler>) -> Self {
        let resolver = Arc::new(ConfigResolver::with_file_names(
            config.config_file_names.clone(),
        ));
        Self {
            graph: ProjectGraph::new(compiler, resolver, config.policy_overrides),
            open_files: OpenFileTracker::new(),
            maps: DeclarationMapResolver::new(),
            config,
            next_request: AtomicU64::new(1),
        }
    }

    pub fn graph(&self) -> &ProjectGraph {
        &self.graph
    }

    pub fn open_files(&self) -> &OpenFileTracker {
        &self.open_files
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn resolver(&self) -> &ConfigResolver {
        self.graph.resolver()
    }

    fn begin_query(&self) -> QueryRetention<'_> {
        QueryRetention {
            graph: &self.graph,
            id: self.next_request.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn policy_of(&self, key: &Path) -> ExpansionPolicy {
        self.graph
            .config(key)
            .or_else(|| self.graph.config_for_key(key).ok())
            .map(|config| self.graph.policy(&config))
            .unwrap_or_default()
    }

    /// Opens a document and loads its default project.
    ///
    /// Re-opening an open document replaces it. If the default project's
    /// config cannot be loaded, the document falls back to an inferred
    /// project.
    ///
    /// # Errors
    ///
    /// Returns an error if `uri` is not a file URI or no project could be
    /// loaded for it.
    pub async fn did_open(&self, uri: Uri, version: i32, text: String) -> Result<Assignment> {
        let path = uri_to_path(&uri)?;
        let retainer = Retainer::OpenFile(path.clone());
        let text: Arc<str> = Arc::from(text);

        if let Some(previous) = self.open_files.remove(&path) {
            tracing::debug!(file = %path.display(), "document re-opened");
            self.graph.release(&previous.default_project, &retainer);
        }

        let differs_from_disk = tokio::fs::read_to_string(&path).await.ok().as_deref() != Some(&*text);
        self.graph.set_overlay(path.clone(), Arc::clone(&text));
        if differs_from_disk {
            self.graph.mark_dirty(&path);
        }

        let mut assignment = assign_projects(&self.graph, &path);
        if let Err(e) = self.graph.load(&assignment.default, retainer.clone()).await {
            tracing::warn!(
                file = %path.display(),
                project = %assignment.default.display(),
                error = %e,
                "default project failed to load, using inferred project"
            );
            let inferred = inferred_project_key(&path);
            self.graph.load(&inferred, retainer).await?;
            assignment.containing.retain(|key| *key != assignment.default);
            assignment.containing.insert(0, inferred.clone());
            assignment.default = inferred;
        }

        tracing::info!(
            file = %path.display(),
            project = %assignment.default.display(),
            "document opened"
        );
        self.open_files.insert(OpenFile::new(
            uri,
            path,
            version,
            text,
            assignment.clone(),
        ));
        Ok(assignment)
    }

    /// Replaces an open document's text. Projects that see the file rebuild
    /// on their next query.
    ///
    /// # Errors
    ///
    /// Returns an error if `uri` is not a file URI.
    pub fn did_change(&self, uri: &Uri, version: i32, text: String) -> Result<Vec<PathBuf>> {
        let path = uri_to_path(uri)?;
        let text: Arc<str> = Arc::from(text);
        if !self.open_files.update_text(&path, version, Arc::clone(&text)) {
            tracing::warn!(file = %path.display(), "change for a document that is not open ignored");
            return Ok(Vec::new());
        }
        self.graph.set_overlay(path.clone(), text);
        Ok(self.graph.mark_dirty(&path))
    }

    /// Closes a document, releasing its default project.
    ///
    /// Closing a document that is not open is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if `uri` is not a file URI.
    pub fn did_close(&self, uri: &Uri) -> Result<()> {
        let path = uri_to_path(uri)?;
        let Some(file) = self.open_files.remove(&path) else {
            tracing::warn!(file = %path.display(), "close for a document that is not open ignored");
            return Ok(());
        };

        self.graph.remove_overlay(&path);
        self.graph
            .release(&file.default_project, &Retainer::OpenFile(path.clone()));
        self.graph.mark_dirty(&path);
        tracing::info!(file = %path.display(), "document closed");
        Ok(())
    }

    fn classify(&self, path: &Path) -> WatchedFile {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if self.resolver().is_config_file_name(path) {
            WatchedFile::Config
        } else if name.ends_with(".d.ts.map") {
            WatchedFile::DeclarationMap
        } else if name.ends_with(".tsbuildinfo") {
            WatchedFile::BuildInfo
        } else if is_source_file(path) {
            WatchedFile::Source
        } else {
            WatchedFile::Other
        }
    }

    /// Reacts to a file created, changed or deleted on disk.
    pub async fn did_change_watched_file(&self, path: &Path) {
        let path = normalize_path(path);
        let invalidated = self.resolver().invalidate(&path);

        match self.classify(&path) {
            WatchedFile::Config => self.config_changed(&path).await,
            WatchedFile::Other if !invalidated.is_empty() => self.config_changed(&path).await,
            WatchedFile::DeclarationMap => {
                tracing::debug!(map = %path.display(), "declaration map changed");
                self.maps.invalidate(&path);
            }
            WatchedFile::BuildInfo => {
                tracing::debug!(manifest = %path.display(), "build info changed");
                self.graph.incremental().invalidate(&path);
            }
            WatchedFile::Source => {
                if is_declaration_file(&path) {
                    self.maps.invalidate(&path);
                }
                if !self.open_files.contains(&path) {
                    self.graph.mark_dirty(&path);
                }
            }
            WatchedFile::Other => {}
        }
    }

    async fn config_changed(&self, path: &Path) {
        let stale = self.graph.mark_stale(path);
        tracing::info!(config = %path.display(), projects = stale.len(), "config changed");
        for key in &stale {
            if let Err(e) = self.graph.refresh_config(key).await {
                tracing::warn!(project = %key.display(), error = %e, "config reload failed");
            }
        }
        self.reassign_open_files().await;
    }

    /// Re-runs project assignment for every open document, moving
    /// documents whose default project changed.
    async fn reassign_open_files(&self) {
        for file in self.open_files.files() {
            let assignment = assign_projects(&self.graph, &file.path);
            if assignment.default == file.default_project {
                self.open_files.reassign(&file.path, assignment);
                continue;
            }

            let retainer = Retainer::OpenFile(file.path.clone());
            if let Err(e) = self.graph.load(&assignment.default, retainer.clone()).await {
                tracing::warn!(file = %file.path.display(), error = %e, "new default project failed to load");
                continue;
            }
            tracing::info!(
                file = %file.path.display(),
                from = %file.default_project.display(),
                to = %assignment.default.display(),
                "document moved to another project"
            );
            self.open_files.reassign(&file.path, assignment);
            self.graph.release(&file.default_project, &retainer);
        }
    }

    /// Default project of `path` and its program: the open document's
    /// project, or one loaded for the query.
    async fn start_project(
        &self,
        path: &Path,
        retention: &QueryRetention<'_>,
    ) -> Result<(PathBuf, BuiltProgram)> {
        if let Some(key) = self.open_files.default_project(path)
            && let Some(built) = self.graph.program(&key).await
        {
            return Ok((key, built));
        }
        let key = assign_projects(&self.graph, path).default;
        let built = self.graph.load(&key, retention.retainer()).await?;
        Ok((key, built))
    }

    /// Diagnostics of a loaded project: config and build problems plus
    /// problems found while wiring up its references.
    pub async fn project_diagnostics(&self, key: &Path) -> Vec<ProjectDiagnostic> {
        let mut diagnostics = self
            .graph
            .program(key)
            .await
            .map(|built| built.diagnostics)
            .unwrap_or_default();
        if let Some(info) = self.graph.info(key) {
            diagnostics.extend(info.diagnostics);
        }
        diagnostics
    }

    /// Declaration of the symbol at `position`.
    ///
    /// Declarations in emitted `.d.ts` files are redirected to their source
    /// unless the project disables source redirects. The defining project is
    /// not loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if `uri` is not a file URI or its project cannot be
    /// loaded.
    pub async fn definition(&self, uri: &Uri, position: Position) -> Result<Option<FileLocation>> {
        let path = uri_to_path(uri)?;
        let retention = self.begin_query();
        let (key, built) = self.start_project(&path, &retention).await?;

        let Some(symbol) = built.program.find_symbol_at(&path, position) else {
            return Ok(None);
        };
        let location = if self.policy_of(&key).redirects_to_source() {
            self.maps.redirect_or_keep(symbol.declaration)
        } else {
            symbol.declaration
        };
        Ok(Some(location))
    }

    /// Every reference to the symbol at `position`, across projects.
    ///
    /// The search covers the start project, every loaded project, the
    /// project defining a redirected declaration, and unless the start
    /// project disables solution searching, projects connected to those by
    /// references in either direction. Projects loaded for the search are
    /// released when it ends. The declaration itself is listed only when
    /// `include_declaration` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Cancelled`] if `cancel` fires, or an error if
    /// `uri` is not a file URI or its project cannot be loaded.
    pub async fn references(
        &self,
        uri: &Uri,
        position: Position,
        include_declaration: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileLocation>> {
        let path = uri_to_path(uri)?;
        let retention = self.begin_query();
        let (start, built) = self.start_project(&path, &retention).await?;

        let Some(symbol) = built.program.find_symbol_at(&path, position) else {
            tracing::debug!(file = %path.display(), ?position, "no symbol at position");
            return Ok(Vec::new());
        };
        let policy = self.policy_of(&start);
        let redirects = policy.redirects_to_source();
        let target = if redirects {
            self.maps.redirect_or_keep(symbol.declaration.clone())
        } else {
            symbol.declaration.clone()
        };

        let mut keys: BTreeSet<PathBuf> = self.graph.keys().into_iter().collect();
        keys.insert(start.clone());
        if let Some(defining) = defining_config(self.resolver(), &target.path) {
            keys.insert(defining);
        }
        let seeds: Vec<PathBuf> = keys.iter().cloned().collect();
        keys.extend(self.related_projects(&seeds, policy));

        tracing::debug!(
            symbol = %symbol.name,
            target = %target,
            projects = keys.len(),
            "searching references"
        );

        let searches = keys.into_iter().map(|key| {
            self.search_project(key, &symbol.name, &target, redirects, &retention, cancel)
        });
        let found: Vec<Vec<FileLocation>> = stream::iter(searches)
            .buffer_unordered(self.config.max_concurrent_loads)
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(ProjectError::Cancelled);
        }

        let mut locations: Vec<FileLocation> = found.into_iter().flatten().collect();
        if !include_declaration {
            locations.retain(|l| !same_declaration(l, &target));
        }
        sort_locations(&mut locations);
        Ok(locations)
    }

    async fn search_project(
        &self,
        key: PathBuf,
        name: &str,
        target: &FileLocation,
        redirects: bool,
        retention: &QueryRetention<'_>,
        cancel: &CancellationToken,
    ) -> Vec<FileLocation> {
        if cancel.is_cancelled() {
            return Vec::new();
        }
        let built = match self.graph.load(&key, retention.retainer()).await {
            Ok(built) => built,
            Err(e) => {
                tracing::debug!(project = %key.display(), error = %e, "skipping project in reference search");
                return Vec::new();
            }
        };
        if cancel.is_cancelled() {
            return Vec::new();
        }

        let redirect = |location: FileLocation| {
            if redirects {
                self.maps.redirect_or_keep(location)
            } else {
                location
            }
        };

        let mut found = Vec::new();
        for declaration in built.program.declarations_named(name) {
            let site = redirect(declaration.declaration.clone());
            if !same_declaration(&site, target) {
                continue;
            }
            found.extend(
                built
                    .program
                    .search_references(&declaration, &SearchScope::Program)
                    .into_iter()
                    .map(redirect),
            );
        }
        tracing::trace!(project = %key.display(), references = found.len(), "searched project");
        found
    }

    /// Projects connected to `seeds` by references, in both directions,
    /// among every config the service knows about. Solution configs are
    /// walked through but not returned.
    fn related_projects(&self, seeds: &[PathBuf], policy: ExpansionPolicy) -> BTreeSet<PathBuf> {
        let outgoing = self.known_reference_table(seeds);
        let incoming = incoming_edges(&outgoing);
        let edges_of = |table: &HashMap<PathBuf, Vec<PathBuf>>, path: &Path| {
            table.get(path).cloned().unwrap_or_default()
        };

        let mut related = BTreeSet::new();
        for seed in seeds.iter().filter(|seed| !is_inferred_key(seed)) {
            let up = expand_references(seed, Direction::Incoming, policy, |p| edges_of(&incoming, p));
            let down = expand_references(seed, Direction::Outgoing, policy, |p| edges_of(&outgoing, p));
            related.extend(up.projects);
            related.extend(down.projects);
        }

        related.retain(|key| {
            !seeds.contains(key)
                && self
                    .resolver()
                    .get(key)
                    .is_ok_and(|entry| !entry.is_solution())
        });
        related
    }

    /// `config → references` for every config reachable from the seeds,
    /// their ancestor configs and every cached config.
    fn known_reference_table(&self, seeds: &[PathBuf]) -> HashMap<PathBuf, Vec<PathBuf>> {
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        for seed in seeds.iter().filter(|seed| !is_inferred_key(seed)) {
            queue.push_back(seed.clone());
            queue.extend(self.resolver().ancestor_configs(seed).iter().map(|e| e.path.clone()));
        }
        queue.extend(self.resolver().cached_entries().iter().map(|e| e.path.clone()));

        let mut table = HashMap::new();
        while let Some(path) = queue.pop_front() {
            if table.contains_key(&path) {
                continue;
            }
            let references = self
                .resolver()
                .get(&path)
                .map(|entry| entry.references.clone())
                .unwrap_or_default();
            queue.extend(references.iter().cloned());
            table.insert(path, references);
        }
        table
    }

    /// Declarations matching `query` in every project reachable from the
    /// loaded projects and the solutions containing open documents.
    ///
    /// Projects loaded for the search are released when it ends. Results
    /// are redirected to source, deduplicated in favour of the project that
    /// owns the file, and capped at the configured limit.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Cancelled`] if `cancel` fires.
    pub async fn workspace_symbol(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkspaceSymbolMatch>> {
        let retention = self.begin_query();

        let mut roots: BTreeSet<PathBuf> = self.graph.keys().into_iter().collect();
        for file in self.open_files.files() {
            roots.extend(file.containing_projects);
        }
        let keys = self.reachable_leaves(roots);
        tracing::debug!(query, projects = keys.len(), "workspace symbol search");

        let searches = keys.into_iter().map(|key| self.symbols_in(key, query, &retention, cancel));
        let found: Vec<Vec<(WorkspaceSymbolMatch, bool)>> = stream::iter(searches)
            .buffer_unordered(self.config.max_concurrent_loads)
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(ProjectError::Cancelled);
        }

        let mut matches: Vec<(WorkspaceSymbolMatch, bool)> = found.into_iter().flatten().collect();
        let identity = |m: &WorkspaceSymbolMatch| {
            let location = &m.symbol.declaration;
            (
                m.symbol.name.clone(),
                location.path.clone(),
                location.range.start.line,
                location.range.start.character,
            )
        };
        matches.sort_by(|(a, a_owns), (b, b_owns)| {
            identity(a)
                .cmp(&identity(b))
                .then(b_owns.cmp(a_owns))
                .then(a.project.cmp(&b.project))
        });
        matches.dedup_by(|(later, _), (earlier, _)| identity(later) == identity(earlier));

        let mut matches: Vec<WorkspaceSymbolMatch> = matches.into_iter().map(|(m, _)| m).collect();
        if matches.len() > self.config.workspace_symbol_limit {
            tracing::debug!(
                total = matches.len(),
                limit = self.config.workspace_symbol_limit,
                "truncating workspace symbol results"
            );
            matches.truncate(self.config.workspace_symbol_limit);
        }
        Ok(matches)
    }

    /// Non-solution projects reachable from `roots` through references.
    fn reachable_leaves(&self, roots: BTreeSet<PathBuf>) -> BTreeSet<PathBuf> {
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
        let mut leaves = BTreeSet::new();
        let mut queue: VecDeque<PathBuf> = roots.into_iter().collect();

        while let Some(key) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            if is_inferred_key(&key) {
                leaves.insert(key);
                continue;
            }
            let entry = match self.graph.config(&key).map_or_else(|| self.resolver().get(&key), Ok) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(config = %key.display(), error = %e, "skipping unreadable config");
                    continue;
                }
            };
            if !self.graph.policy(&entry).disable_solution_searching {
                queue.extend(entry.references.iter().cloned());
            }
            if !entry.is_solution() {
                leaves.insert(key);
            }
        }
        leaves
    }

    async fn symbols_in(
        &self,
        key: PathBuf,
        query: &str,
        retention: &QueryRetention<'_>,
        cancel: &CancellationToken,
    ) -> Vec<(WorkspaceSymbolMatch, bool)> {
        if cancel.is_cancelled() {
            return Vec::new();
        }
        let built = match self.graph.load(&key, retention.retainer()).await {
            Ok(built) => built,
            Err(e) => {
                tracing::debug!(project = %key.display(), error = %e, "skipping project in symbol search");
                return Vec::new();
            }
        };
        let Some(config) = self.graph.config(&key) else {
            return Vec::new();
        };
        let redirects = self.graph.policy(&config).redirects_to_source();

        built
            .program
            .workspace_symbol_index(query)
            .into_iter()
            .map(|mut symbol| {
                if redirects {
                    symbol.declaration = self.maps.redirect_or_keep(symbol.declaration);
                }
                let owns = config.claims(&symbol.declaration.path);
                let project = key.clone();
                (WorkspaceSymbolMatch { symbol, project }, owns)
            })
            .collect()
    }

    /// Current state of every project, open document and cached config.
    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            projects: self.graph.infos(),
            open_files: self.open_files.files(),
            configs: self.resolver().cached_entries(),
        }
    }
}

fn sort_locations(locations: &mut Vec<FileLocation>) {
    let key = |l: &FileLocation| {
        (
            l.path.clone(),
            l.range.start.line,
            l.range.start.character,
            l.range.end.line,
            l.range.end.character,
        )
    };
    locations.sort_by_key(key);
    locations.dedup();
}

/// Point-in-time dump of a [`ProjectService`].
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub projects: Vec<ProjectInfo>,
    pub open_files: Vec<OpenFile>,
    pub configs: Vec<Arc<ConfigEntry>>,
}

impl ServiceSnapshot {
    pub fn project(&self, key: &Path) -> Option<&ProjectInfo> {
        self.projects.iter().find(|p| p.key == key)
    }

    pub fn project_keys(&self) -> Vec<PathBuf> {
        self.projects.iter().map(|p| p.key.clone()).collect()
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for ServiceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Projects::")?;
        for project in &self.projects {
            writeln!(f, "    {} ({})", project.key.display(), project.state)?;
            writeln!(f, "        Retaining projects: {}", join_paths(&project.retaining_projects))?;
            writeln!(f, "        Retaining open files: {}", join_paths(&project.retaining_open_files))?;
            if project.dirty || project.stale {
                writeln!(f, "        Dirty: {} Stale: {}", project.dirty, project.stale)?;
            }
            writeln!(f, "        Root files:")?;
            for file in &project.config.root_files {
                writeln!(f, "            {}", file.display())?;
            }
        }

        writeln!(f, "Open Files::")?;
        for file in &self.open_files {
            writeln!(f, "    {} (version {})", file.path.display(), file.version)?;
            writeln!(f, "        Default project: {}", file.default_project.display())?;
            writeln!(f, "        Containing projects: {}", join_paths(&file.containing_projects))?;
        }

        writeln!(f, "Config::")?;
        for config in &self.configs {
            writeln!(f, "    {}", config.path.display())?;
            writeln!(f, "        References: {}", join_paths(&config.references))?;
        }
        Ok(())
    }
}
