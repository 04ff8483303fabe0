//! The project registry.
//!
//! Projects live in a flat table keyed by config path. Edges between them
//! (who retains whom, who depends on whom) are sets of keys, so teardown is a
//! key-set operation and cyclic references need no special ownership.
//!
//! Each record carries a build cell. Concurrent callers asking for the same
//! project's program await the same cell, so at most one build per project
//! is in flight. Marking a project dirty swaps in a fresh cell; the next
//! query rebuilds.

use crate::config::PolicyOverrides;
use crate::project::expand::{Direction, expand_references};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tsproj_core::paths::{INFERRED_PREFIX, is_inferred_key};
use tsproj_core::{
    BuildRequest, Compiler, ConfigEntry, ConfigResolver, ExpansionPolicy, IncrementalStateStore,
    Program, ProjectDiagnostic, ProjectError, Result,
};

/// Something keeping a project alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Retainer {
    /// A loaded project that references this one.
    Project(PathBuf),
    /// An open document whose default project this is.
    OpenFile(PathBuf),
    /// A query that loaded the project for its own duration.
    Request(u64),
}

impl fmt::Display for Retainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project(path) => write!(f, "project {}", path.display()),
            Self::OpenFile(path) => write!(f, "open file {}", path.display()),
            Self::Request(id) => write!(f, "request #{id}"),
        }
    }
}

/// Lifecycle state of a project.
///
/// Records in the registry are `Loading`, `Loaded` or `Deleted`;
/// `Unloaded` is what [`ProjectGraph::state`] reports for a key with no
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectState {
    Unloaded,
    Loading,
    Loaded,
    Deleted,
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "Unloaded",
            Self::Loading => "Loading",
            Self::Loaded => "Loaded",
            Self::Deleted => "*deleted*",
        };
        f.write_str(name)
    }
}

/// The outcome of one build of a project.
#[derive(Clone)]
pub struct BuiltProgram {
    pub program: Arc<dyn Program>,
    /// Config diagnostics followed by compiler diagnostics.
    pub diagnostics: Vec<ProjectDiagnostic>,
    /// True when build info allowed the compiler to reuse cached state.
    pub reused: bool,
}

impl fmt::Debug for BuiltProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltProgram")
            .field("files", &self.program.files().len())
            .field("diagnostics", &self.diagnostics.len())
            .field("reused", &self.reused)
            .finish()
    }
}

type BuildCell = Arc<OnceCell<BuiltProgram>>;

/// What loading a config entails, computed before the record is inserted.
struct LoadPlan {
    dependencies: Vec<PathBuf>,
    redirects: HashMap<PathBuf, PathBuf>,
    diagnostics: Vec<ProjectDiagnostic>,
}

struct ProjectRecord {
    config: Arc<ConfigEntry>,
    state: ProjectState,
    retaining_projects: BTreeSet<PathBuf>,
    retaining_open_files: BTreeSet<PathBuf>,
    retaining_requests: BTreeSet<u64>,
    /// Referenced projects this record retains.
    dependencies: Vec<PathBuf>,
    /// Emitted `.d.ts` of referenced projects mapped to their sources.
    redirects: Arc<HashMap<PathBuf, PathBuf>>,
    diagnostics: Vec<ProjectDiagnostic>,
    build: BuildCell,
    /// Program from the most recent completed build.
    program: Option<Arc<dyn Program>>,
    dirty: bool,
    stale: bool,
}

impl ProjectRecord {
    fn new(config: Arc<ConfigEntry>, plan: LoadPlan, retainer: Retainer) -> Self {
        let mut record = Self {
            config,
            state: ProjectState::Loading,
            retaining_projects: BTreeSet::new(),
            retaining_open_files: BTreeSet::new(),
            retaining_requests: BTreeSet::new(),
            dependencies: plan.dependencies,
            redirects: Arc::new(plan.redirects),
            diagnostics: plan.diagnostics,
            build: Arc::new(OnceCell::new()),
            program: None,
            dirty: false,
            stale: false,
        };
        record.add_retainer(retainer);
        record
    }

    fn add_retainer(&mut self, retainer: Retainer) -> bool {
        match retainer {
            Retainer::Project(path) => self.retaining_projects.insert(path),
            Retainer::OpenFile(path) => self.retaining_open_files.insert(path),
            Retainer::Request(id) => self.retaining_requests.insert(id),
        }
    }

    fn remove_retainer(&mut self, retainer: &Retainer) -> bool {
        match retainer {
            Retainer::Project(path) => self.retaining_projects.remove(path),
            Retainer::OpenFile(path) => self.retaining_open_files.remove(path),
            Retainer::Request(id) => self.retaining_requests.remove(id),
        }
    }

    fn is_unretained(&self) -> bool {
        self.retaining_projects.is_empty()
            && self.retaining_open_files.is_empty()
            && self.retaining_requests.is_empty()
    }

    /// Held directly by an open file or an in-flight request.
    fn has_root_retainer(&self) -> bool {
        !self.retaining_open_files.is_empty() || !self.retaining_requests.is_empty()
    }

    fn invalidate_build(&mut self) {
        self.build = Arc::new(OnceCell::new());
        self.dirty = true;
    }
}

/// Read-only view of one project.
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub key: PathBuf,
    pub state: ProjectState,
    pub config: Arc<ConfigEntry>,
    pub retaining_projects: Vec<PathBuf>,
    pub retaining_open_files: Vec<PathBuf>,
    pub retaining_requests: usize,
    pub dependencies: Vec<PathBuf>,
    pub diagnostics: Vec<ProjectDiagnostic>,
    pub dirty: bool,
    pub stale: bool,
}

/// Registry of loaded projects.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use tsproj_core::ConfigResolver;
/// use tsproj_lexical::LexicalCompiler;
/// use tsproj_lsp::config::PolicyOverrides;
/// use tsproj_lsp::project::{ProjectGraph, Retainer};
///
/// # async fn example() -> tsproj_core::Result<()> {
/// let graph = ProjectGraph::new(
///     Arc::new(LexicalCompiler::new()),
///     Arc::new(ConfigResolver::new()),
///     PolicyOverrides::default(),
/// );
/// let config = Path::new("/repo/b/tsconfig.json");
/// let file = Retainer::OpenFile("/repo/b/b.ts".into());
///
/// graph.load(config, file.clone()).await?;
/// graph.release(config, &file);
/// assert!(graph.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct ProjectGraph {
    projects: DashMap<PathBuf, ProjectRecord>,
    resolver: Arc<ConfigResolver>,
    compiler: Arc<dyn Compiler>,
    incremental: Arc<IncrementalStateStore>,
    overlays: DashMap<PathBuf, Arc<str>>,
    overrides: PolicyOverrides,
}

impl ProjectGraph {
    pub fn new(
        compiler: Arc<dyn Compiler>,
        resolver: Arc<ConfigResolver>,
        overrides: PolicyOverrides,
    ) -> Self {
        Self {
            projects: DashMap::new(),
            resolver,
            compiler,
            incremental: Arc::new(IncrementalStateStore::new()),
            overlays: DashMap::new(),
            overrides,
        }
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    pub fn incremental(&self) -> &IncrementalStateStore {
        &self.incremental
    }

    /// The config's own flags with server-wide overrides applied.
    pub fn policy(&self, config: &ConfigEntry) -> ExpansionPolicy {
        self.overrides.apply(config.policy())
    }

    /// Parsed config for a project key, synthesizing inferred entries.
    pub fn config_for_key(&self, key: &Path) -> Result<Arc<ConfigEntry>> {
        if is_inferred_key(key) {
            let display = key.to_string_lossy();
            let file = display
                .strip_prefix(INFERRED_PREFIX)
                .ok_or_else(|| ProjectError::ConfigNotFound(key.to_path_buf()))?;
            return Ok(Arc::new(ConfigEntry::inferred(Path::new(file))));
        }
        self.resolver.get(key)
    }

    /// Loads `key` retained by `retainer` and returns its program.
    ///
    /// An already loaded project only gains the retainer. A new project is
    /// created together with the referenced projects its policy allows, each
    /// retained by its referrer, and built.
    ///
    /// # Errors
    ///
    /// Returns an error if the config for `key` cannot be read, or
    /// [`ProjectError::ProjectNotLoaded`] if the project was released before
    /// its build finished.
    pub async fn load(&self, key: &Path, retainer: Retainer) -> Result<BuiltProgram> {
        let created = self.attach(key, retainer)?;
        let built = self
            .program(key)
            .await
            .ok_or_else(|| ProjectError::ProjectNotLoaded(key.to_path_buf()))?;

        let dependencies = created.iter().filter(|k| k.as_path() != key);
        futures::future::join_all(dependencies.map(|k| self.program(k))).await;
        Ok(built)
    }

    /// Adds `retainer` to an existing project. Returns false if `key` is not
    /// in the registry.
    pub fn retain(&self, key: &Path, retainer: Retainer) -> bool {
        let Some(mut record) = self.projects.get_mut(key) else {
            return false;
        };
        if record.add_retainer(retainer.clone()) {
            tracing::trace!(project = %key.display(), %retainer, "retained");
        }
        true
    }

    fn attach(&self, key: &Path, retainer: Retainer) -> Result<Vec<PathBuf>> {
        let mut created = Vec::new();
        let mut queue = VecDeque::from([(key.to_path_buf(), retainer)]);

        while let Some((key, retainer)) = queue.pop_front() {
            if self.retain(&key, retainer.clone()) {
                continue;
            }

            let config = match self.config_for_key(&key) {
                Ok(config) => config,
                Err(e) => match retainer {
                    Retainer::Project(parent) => {
                        self.drop_dependency(&parent, &key, &e);
                        continue;
                    }
                    _ => return Err(e),
                },
            };
            let plan = self.plan(&config);
            let dependencies = plan.dependencies.clone();

            match self.projects.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().add_retainer(retainer);
                    continue;
                }
                Entry::Vacant(entry) => {
                    entry.insert(ProjectRecord::new(config, plan, retainer));
                }
            }

            tracing::info!(
                project = %key.display(),
                dependencies = dependencies.len(),
                "project created"
            );
            queue.extend(
                dependencies
                    .into_iter()
                    .map(|dependency| (dependency, Retainer::Project(key.clone()))),
            );
            created.push(key);
        }

        Ok(created)
    }

    fn plan(&self, config: &ConfigEntry) -> LoadPlan {
        let policy = self.policy(config);
        let mut configs: HashMap<PathBuf, Arc<ConfigEntry>> = HashMap::new();

        let expansion = expand_references(&config.path, Direction::Outgoing, policy, |path| {
            if path == config.path.as_path() {
                return config.references.clone();
            }
            match self.resolver.get(path) {
                Ok(entry) => {
                    let references = entry.references.clone();
                    configs.insert(path.to_path_buf(), entry);
                    references
                }
                Err(_) => Vec::new(),
            }
        });

        let diagnostics = expansion
            .cycles
            .iter()
            .map(|(from, to)| {
                ProjectDiagnostic::warning(
                    Some(from.clone()),
                    format!(
                        "project reference cycle: {} references {}",
                        from.display(),
                        to.display()
                    ),
                )
            })
            .collect();

        let mut redirects = HashMap::new();
        if policy.redirects_to_source() {
            for key in &expansion.projects {
                if let Some(entry) = configs.get(key) {
                    redirects.extend(entry.declaration_outputs());
                }
            }
        }

        let dependencies = if policy.disable_referenced_project_load {
            Vec::new()
        } else {
            config.references.clone()
        };

        LoadPlan {
            dependencies,
            redirects,
            diagnostics,
        }
    }

    fn drop_dependency(&self, parent: &Path, dependency: &Path, error: &ProjectError) {
        tracing::warn!(
            project = %parent.display(),
            reference = %dependency.display(),
            error = %error,
            "referenced project could not be loaded"
        );
        if let Some(mut record) = self.projects.get_mut(parent) {
            record.dependencies.retain(|d| d != dependency);
            record.diagnostics.push(ProjectDiagnostic::error(
                Some(parent.to_path_buf()),
                format!(
                    "referenced project {} could not be loaded: {error}",
                    dependency.display()
                ),
            ));
        }
    }

    /// Returns the project's program, building it if needed.
    ///
    /// Returns `None` if `key` is not loaded.
    pub async fn program(&self, key: &Path) -> Option<BuiltProgram> {
        let (cell, config, redirects) = {
            let record = self.projects.get(key)?;
            (
                Arc::clone(&record.build),
                Arc::clone(&record.config),
                Arc::clone(&record.redirects),
            )
        };

        let built = cell
            .get_or_init(|| self.build(config, redirects))
            .await
            .clone();

        if let Some(mut record) = self.projects.get_mut(key)
            && Arc::ptr_eq(&record.build, &cell)
        {
            if record.state != ProjectState::Loaded {
                tracing::info!(
                    project = %key.display(),
                    files = built.program.files().len(),
                    reused = built.reused,
                    "project loaded"
                );
            }
            record.state = ProjectState::Loaded;
            record.dirty = false;
            record.program = Some(Arc::clone(&built.program));
        }
        Some(built)
    }

    async fn build(
        &self,
        config: Arc<ConfigEntry>,
        redirects: Arc<HashMap<PathBuf, PathBuf>>,
    ) -> BuiltProgram {
        // Reading and hashing every manifest entry is blocking work.
        let store = Arc::clone(&self.incremental);
        let entry = Arc::clone(&config);
        let reused = tokio::task::spawn_blocking(move || store.can_reuse(&entry))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(project = %config.path.display(), error = %e, "reuse check failed");
                false
            });

        let mut request = BuildRequest::new(
            config.path.clone(),
            config.root_files.clone(),
            config.options.clone(),
        );
        request.reuse = reused;
        request.redirects = (*redirects).clone();
        request.overlays = self
            .overlays
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let output = self.compiler.build_program(request).await;
        let mut diagnostics = config.diagnostics.clone();
        diagnostics.extend(output.diagnostics);

        tracing::debug!(
            project = %config.path.display(),
            files = output.program.files().len(),
            diagnostics = diagnostics.len(),
            "build finished"
        );

        BuiltProgram {
            program: output.program,
            diagnostics,
            reused,
        }
    }

    /// Removes `retainer` from `key`, evicting the project when nothing
    /// retains it any more.
    ///
    /// Eviction releases the evicted project's own dependencies in turn.
    /// Projects left retained only through a reference cycle with no open
    /// file or request anywhere above them are evicted as a group.
    /// Releasing an unknown project or an absent retainer is logged and
    /// ignored.
    pub fn release(&self, key: &Path, retainer: &Retainer) {
        self.release_all(vec![(key.to_path_buf(), retainer.clone())]);
    }

    fn release_all(&self, mut pending: Vec<(PathBuf, Retainer)>) {
        let mut survivors: Vec<PathBuf> = Vec::new();

        loop {
            while let Some((key, retainer)) = pending.pop() {
                let unretained = {
                    let Some(mut record) = self.projects.get_mut(&key) else {
                        tracing::warn!(project = %key.display(), %retainer, "release of unknown project ignored");
                        continue;
                    };
                    if !record.remove_retainer(&retainer) {
                        tracing::warn!(project = %key.display(), %retainer, "release of absent retainer ignored");
                        continue;
                    }
                    record.is_unretained()
                };

                if !unretained {
                    survivors.push(key);
                    continue;
                }
                if let Some(dependencies) = self.evict(&key, ProjectRecord::is_unretained) {
                    pending.extend(
                        dependencies
                            .into_iter()
                            .map(|dependency| (dependency, Retainer::Project(key.clone()))),
                    );
                }
            }

            let Some(candidate) = survivors.pop() else {
                break;
            };
            let Some(component) = self.unrooted_component(&candidate) else {
                continue;
            };
            tracing::debug!(
                project = %candidate.display(),
                members = component.len(),
                "collecting unrooted reference cycle"
            );
            for key in &component {
                if let Some(dependencies) = self.evict(key, |_| true) {
                    pending.extend(
                        dependencies
                            .into_iter()
                            .filter(|dependency| !component.contains(dependency))
                            .map(|dependency| (dependency, Retainer::Project(key.clone()))),
                    );
                }
            }
        }
    }

    /// Walks retaining projects upward from `start`. Returns every project
    /// reached if none of them is held by an open file or request.
    fn unrooted_component(&self, start: &Path) -> Option<Vec<PathBuf>> {
        let mut seen: HashSet<PathBuf> = HashSet::from([start.to_path_buf()]);
        let mut queue = VecDeque::from([start.to_path_buf()]);
        let mut component = Vec::new();

        while let Some(key) = queue.pop_front() {
            let parents: Vec<PathBuf> = {
                let record = self.projects.get(&key)?;
                if record.has_root_retainer() {
                    return None;
                }
                record.retaining_projects.iter().cloned().collect()
            };
            for parent in parents {
                if seen.insert(parent.clone()) {
                    queue.push_back(parent);
                }
            }
            component.push(key);
        }
        Some(component)
    }

    fn evict(&self, key: &Path, condition: impl FnOnce(&ProjectRecord) -> bool) -> Option<Vec<PathBuf>> {
        let (key, mut record) = self.projects.remove_if(key, |_, record| condition(record))?;
        record.state = ProjectState::Deleted;
        record.program = None;
        tracing::info!(project = %key.display(), state = %record.state, "project released");
        Some(std::mem::take(&mut record.dependencies))
    }

    /// Releases every project retained by request `id`.
    pub fn release_request(&self, id: u64) {
        let keys: Vec<PathBuf> = self
            .projects
            .iter()
            .filter(|record| record.retaining_requests.contains(&id))
            .map(|record| record.key().clone())
            .collect();
        for key in keys {
            self.release(&key, &Retainer::Request(id));
        }
    }

    /// Re-reads the config of a loaded project after it changed on disk.
    ///
    /// New references are loaded and built, dropped ones released. The
    /// project's own program is rebuilt on its next query.
    ///
    /// # Errors
    ///
    /// Returns an error if the config can no longer be read; the project is
    /// then flagged stale and keeps its previous state.
    pub async fn refresh_config(&self, key: &Path) -> Result<()> {
        let config = match self.config_for_key(key) {
            Ok(config) => config,
            Err(e) => {
                if let Some(mut record) = self.projects.get_mut(key) {
                    record.stale = true;
                    record.diagnostics.push(ProjectDiagnostic::error(
                        Some(key.to_path_buf()),
                        e.to_string(),
                    ));
                }
                return Err(e);
            }
        };
        let plan = self.plan(&config);

        let (added, removed) = {
            let Some(mut record) = self.projects.get_mut(key) else {
                return Ok(());
            };
            let added: Vec<PathBuf> = plan
                .dependencies
                .iter()
                .filter(|d| !record.dependencies.contains(d))
                .cloned()
                .collect();
            let removed: Vec<PathBuf> = record
                .dependencies
                .iter()
                .filter(|d| !plan.dependencies.contains(d))
                .cloned()
                .collect();

            record.config = config;
            record.dependencies = plan.dependencies;
            record.redirects = Arc::new(plan.redirects);
            record.diagnostics = plan.diagnostics;
            record.stale = false;
            record.invalidate_build();
            (added, removed)
        };

        let retainer = Retainer::Project(key.to_path_buf());
        let mut created = Vec::new();
        for dependency in added {
            match self.attach(&dependency, retainer.clone()) {
                Ok(keys) => created.extend(keys),
                Err(e) => {
                    tracing::warn!(project = %key.display(), error = %e, "failed to load new reference");
                }
            }
        }
        futures::future::join_all(created.iter().map(|k| self.program(k))).await;
        for dependency in removed {
            self.release(&dependency, &retainer);
        }
        tracing::info!(project = %key.display(), "project config reloaded");
        Ok(())
    }

    /// Flags every project that may see `file` for rebuild.
    pub fn mark_dirty(&self, file: &Path) -> Vec<PathBuf> {
        let mut dirty = Vec::new();
        for mut record in self.projects.iter_mut() {
            let affected = record.config.claims(file)
                || record
                    .program
                    .as_ref()
                    .is_some_and(|program| program.contains_file(file));
            if affected {
                record.invalidate_build();
                dirty.push(record.key().clone());
            }
        }
        if !dirty.is_empty() {
            tracing::debug!(file = %file.display(), projects = dirty.len(), "marked projects dirty");
        }
        dirty
    }

    /// Flags projects whose config is, or extends, `config_path`.
    pub fn mark_stale(&self, config_path: &Path) -> Vec<PathBuf> {
        let mut stale = Vec::new();
        for mut record in self.projects.iter_mut() {
            if record.config.depends_on_file(config_path) {
                record.stale = true;
                stale.push(record.key().clone());
            }
        }
        stale.sort();
        stale
    }

    pub fn set_overlay(&self, path: PathBuf, text: Arc<str>) {
        self.overlays.insert(path, text);
    }

    pub fn remove_overlay(&self, path: &Path) {
        self.overlays.remove(path);
    }

    pub fn contains(&self, key: &Path) -> bool {
        self.projects.contains_key(key)
    }

    pub fn state(&self, key: &Path) -> ProjectState {
        self.projects
            .get(key)
            .map_or(ProjectState::Unloaded, |record| record.state)
    }

    pub fn config(&self, key: &Path) -> Option<Arc<ConfigEntry>> {
        self.projects.get(key).map(|record| Arc::clone(&record.config))
    }

    /// Loaded project keys, sorted.
    pub fn keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self.projects.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn info(&self, key: &Path) -> Option<ProjectInfo> {
        let record = self.projects.get(key)?;
        Some(ProjectInfo {
            key: key.to_path_buf(),
            state: record.state,
            config: Arc::clone(&record.config),
            retaining_projects: record.retaining_projects.iter().cloned().collect(),
            retaining_open_files: record.retaining_open_files.iter().cloned().collect(),
            retaining_requests: record.retaining_requests.len(),
            dependencies: record.dependencies.clone(),
            diagnostics: record.diagnostics.clone(),
            dirty: record.dirty,
            stale: record.stale,
        })
    }

    /// Views of every loaded project, sorted by key.
    pub fn infos(&self) -> Vec<ProjectInfo> {
        self.keys().iter().filter_map(|key| self.info(key)).collect()
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
