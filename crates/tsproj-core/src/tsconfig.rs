//! `tsconfig.json` parsing.
//!
//! A [`ConfigEntry`] is the immutable, fully resolved view of one config file
//! on disk: its `extends` chain applied, its `references` resolved to config
//! paths, its `files`/`include`/`exclude` specification compiled into
//! matchers, and its root files expanded from the filesystem.
//!
//! Parsing is tolerant. Malformed JSON, a broken `extends` link or an
//! `extends` cycle produce [`ProjectDiagnostic`]s on the entry rather than an
//! error, so dependent projects can still partially resolve. The only hard
//! failure is a config file that cannot be read at all.

use crate::diagnostics::ProjectDiagnostic;
use crate::error::{ProjectError, Result};
use crate::paths::{
    declaration_output_path, inferred_project_key, is_source_file, normalize_path,
    resolve_relative,
};
use globset::{GlobBuilder, GlobMatcher};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Directories excluded when a config does not specify `exclude`.
const DEFAULT_EXCLUDES: &[&str] = &["node_modules", "bower_components", "jspm_packages"];

/// Accepts both `true` and `"true"` for boolean compiler options.
fn deserialize_bool_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    match Option::<BoolOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrString::Bool(b)) => Ok(Some(b)),
        Some(BoolOrString::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(Error::custom(format!(
                "invalid boolean value: '{s}'. Expected true or false"
            ))),
        },
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTsConfig {
    #[serde(default)]
    extends: Option<String>,
    #[serde(default)]
    compiler_options: Option<RawCompilerOptions>,
    #[serde(default)]
    files: Option<Vec<String>>,
    #[serde(default)]
    include: Option<Vec<String>>,
    #[serde(default)]
    exclude: Option<Vec<String>>,
    #[serde(default)]
    references: Option<Vec<RawReference>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawReference {
    path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCompilerOptions {
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    composite: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    declaration: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    declaration_map: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    incremental: Option<bool>,
    #[serde(default)]
    out_dir: Option<String>,
    #[serde(default)]
    root_dir: Option<String>,
    #[serde(default)]
    ts_build_info_file: Option<String>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    disable_solution_searching: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    disable_referenced_project_load: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_or_string")]
    disable_source_of_project_reference_redirect: Option<bool>,
}

/// The subset of `compilerOptions` the project service reads.
///
/// Path-valued options are absolute, resolved against the directory of the
/// config file that declared them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerOptions {
    pub composite: Option<bool>,
    pub declaration: Option<bool>,
    pub declaration_map: Option<bool>,
    pub incremental: Option<bool>,
    pub out_dir: Option<PathBuf>,
    pub root_dir: Option<PathBuf>,
    pub ts_build_info_file: Option<PathBuf>,
    pub disable_solution_searching: Option<bool>,
    pub disable_referenced_project_load: Option<bool>,
    pub disable_source_of_project_reference_redirect: Option<bool>,
}

impl CompilerOptions {
    fn from_raw(raw: &RawCompilerOptions, base_dir: &Path) -> Self {
        Self {
            composite: raw.composite,
            declaration: raw.declaration,
            declaration_map: raw.declaration_map,
            incremental: raw.incremental,
            out_dir: raw.out_dir.as_deref().map(|p| resolve_relative(base_dir, p)),
            root_dir: raw.root_dir.as_deref().map(|p| resolve_relative(base_dir, p)),
            ts_build_info_file: raw
                .ts_build_info_file
                .as_deref()
                .map(|p| resolve_relative(base_dir, p)),
            disable_solution_searching: raw.disable_solution_searching,
            disable_referenced_project_load: raw.disable_referenced_project_load,
            disable_source_of_project_reference_redirect: raw
                .disable_source_of_project_reference_redirect,
        }
    }

    /// Overlays `child` on top of `self`; values set in `child` win.
    fn extended_by(self, child: Self) -> Self {
        Self {
            composite: child.composite.or(self.composite),
            declaration: child.declaration.or(self.declaration),
            declaration_map: child.declaration_map.or(self.declaration_map),
            incremental: child.incremental.or(self.incremental),
            out_dir: child.out_dir.or(self.out_dir),
            root_dir: child.root_dir.or(self.root_dir),
            ts_build_info_file: child.ts_build_info_file.or(self.ts_build_info_file),
            disable_solution_searching: child
                .disable_solution_searching
                .or(self.disable_solution_searching),
            disable_referenced_project_load: child
                .disable_referenced_project_load
                .or(self.disable_referenced_project_load),
            disable_source_of_project_reference_redirect: child
                .disable_source_of_project_reference_redirect
                .or(self.disable_source_of_project_reference_redirect),
        }
    }

    pub fn is_composite(&self) -> bool {
        self.composite.unwrap_or(false)
    }

    /// Composite projects always emit declarations.
    pub fn emits_declarations(&self) -> bool {
        self.declaration.unwrap_or(false) || self.is_composite()
    }

    pub fn emits_declaration_maps(&self) -> bool {
        self.emits_declarations() && self.declaration_map.unwrap_or(false)
    }

    /// Options recorded in build-info manifests, keyed by their JSON name.
    ///
    /// Only options that are explicitly set appear in the map.
    pub fn fingerprint(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        let flags = [
            ("composite", self.composite),
            ("declaration", self.declaration),
            ("declarationMap", self.declaration_map),
            ("incremental", self.incremental),
        ];
        for (name, value) in flags {
            if let Some(value) = value {
                map.insert(name.to_string(), serde_json::Value::Bool(value));
            }
        }
        map
    }
}

/// Graph-expansion switches, threaded explicitly through graph walks and
/// declaration-map redirects.
///
/// # Examples
///
/// ```
/// use tsproj_core::{CompilerOptions, ExpansionPolicy};
///
/// let options = CompilerOptions {
///     disable_solution_searching: Some(true),
///     ..Default::default()
/// };
/// let policy = ExpansionPolicy::from_options(&options);
/// assert!(policy.disable_solution_searching);
/// assert!(!policy.disable_referenced_project_load);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpansionPolicy {
    pub disable_solution_searching: bool,
    pub disable_referenced_project_load: bool,
    pub disable_source_of_project_reference_redirect: bool,
}

impl ExpansionPolicy {
    pub fn from_options(options: &CompilerOptions) -> Self {
        Self {
            disable_solution_searching: options.disable_solution_searching.unwrap_or(false),
            disable_referenced_project_load: options
                .disable_referenced_project_load
                .unwrap_or(false),
            disable_source_of_project_reference_redirect: options
                .disable_source_of_project_reference_redirect
                .unwrap_or(false),
        }
    }

    /// Returns true when project-reference outputs should be redirected to
    /// their sources.
    pub fn redirects_to_source(&self) -> bool {
        !self.disable_source_of_project_reference_redirect
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    /// A single file named without wildcards.
    Exact,
    /// A directory named without wildcards: everything below it.
    Subtree,
    Glob(GlobMatcher),
}

/// One `include` or `exclude` entry, split into a literal base directory and
/// an optional glob over paths relative to it.
#[derive(Debug, Clone)]
struct PathPattern {
    base: PathBuf,
    matcher: Matcher,
}

impl PathPattern {
    fn parse(config_dir: &Path, raw: &str, is_include: bool) -> Result<Self> {
        let full = resolve_relative(config_dir, raw);
        let mut base = PathBuf::new();
        let mut rest: Vec<String> = Vec::new();

        for component in full.components() {
            let text = component.as_os_str().to_string_lossy();
            if !rest.is_empty() || text.contains(['*', '?']) {
                rest.push(text.into_owned());
            } else {
                base.push(component);
            }
        }

        let matcher = if rest.is_empty() {
            if is_include && is_source_file(&base) {
                Matcher::Exact
            } else {
                Matcher::Subtree
            }
        } else {
            let pattern = rest.join("/");
            let glob = GlobBuilder::new(&pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| ProjectError::Glob {
                    pattern: raw.to_string(),
                    source,
                })?;
            Matcher::Glob(glob.compile_matcher())
        };

        Ok(Self { base, matcher })
    }

    fn matches(&self, path: &Path) -> bool {
        match &self.matcher {
            Matcher::Exact => path == self.base,
            Matcher::Subtree => path.starts_with(&self.base),
            Matcher::Glob(glob) => path
                .strip_prefix(&self.base)
                .is_ok_and(|relative| glob.is_match(relative)),
        }
    }
}

/// Compiled `files` / `include` / `exclude` specification of a config.
#[derive(Debug, Clone, Default)]
pub struct FileSpec {
    files: Vec<PathBuf>,
    include: Vec<PathPattern>,
    exclude: Vec<PathPattern>,
}

impl FileSpec {
    fn single(file: &Path) -> Self {
        Self {
            files: vec![file.to_path_buf()],
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Returns true if the spec can never claim a file by inclusion.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.include.is_empty()
    }

    /// Returns true if `path` belongs to this spec, whether or not it exists.
    ///
    /// Entries listed in `files` are claimed unconditionally; `include`
    /// matches only claim source files not matched by `exclude`.
    pub fn claims(&self, path: &Path) -> bool {
        if self.files.iter().any(|f| f == path) {
            return true;
        }
        is_source_file(path)
            && self.include.iter().any(|p| p.matches(path))
            && !self.is_excluded(path)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.iter().any(|p| p.matches(path))
    }

    /// Walks the filesystem below every include base and collects claimed files.
    fn expand(&self, config_path: &Path, diagnostics: &mut Vec<ProjectDiagnostic>) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = Vec::new();

        for file in &self.files {
            if file.is_file() {
                roots.push(file.clone());
            } else {
                diagnostics.push(ProjectDiagnostic::error(
                    Some(config_path.to_path_buf()),
                    format!("file '{}' not found", file.display()),
                ));
            }
        }

        let mut walk_bases: Vec<&Path> = self.include.iter().map(|p| p.base.as_path()).collect();
        walk_bases.sort();
        walk_bases.dedup_by(|later, earlier| later.starts_with(&**earlier));

        for base in walk_bases {
            let walker = WalkDir::new(base)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| !self.is_excluded(entry.path()));
            for entry in walker.filter_map(std::result::Result::ok) {
                if entry.file_type().is_file() && self.claims(entry.path()) {
                    roots.push(normalize_path(entry.path()));
                }
            }
        }

        roots.sort();
        roots.dedup();
        roots
    }
}

/// One level of an `extends` chain, with paths already made absolute.
#[derive(Debug, Default)]
struct Layer {
    options: CompilerOptions,
    files: Option<Vec<PathBuf>>,
    include: Option<Vec<(PathBuf, String)>>,
    exclude: Option<Vec<(PathBuf, String)>>,
}

impl Layer {
    fn from_raw(raw: &RawTsConfig, dir: &Path) -> Self {
        let patterns = |list: &Option<Vec<String>>| {
            list.as_ref().map(|items| {
                items
                    .iter()
                    .map(|item| (dir.to_path_buf(), item.clone()))
                    .collect::<Vec<_>>()
            })
        };
        Self {
            options: raw
                .compiler_options
                .as_ref()
                .map(|o| CompilerOptions::from_raw(o, dir))
                .unwrap_or_default(),
            files: raw
                .files
                .as_ref()
                .map(|files| files.iter().map(|f| resolve_relative(dir, f)).collect()),
            include: patterns(&raw.include),
            exclude: patterns(&raw.exclude),
        }
    }

    fn extended_by(self, child: Self) -> Self {
        Self {
            options: self.options.extended_by(child.options),
            files: child.files.or(self.files),
            include: child.include.or(self.include),
            exclude: child.exclude.or(self.exclude),
        }
    }
}

/// A parsed, resolved configuration file.
///
/// Immutable once built; a changed config file produces a new entry.
///
/// # Examples
///
/// ```
/// use tsproj_core::ConfigEntry;
/// use std::path::Path;
///
/// let entry = ConfigEntry::parse(
///     Path::new("/repo/tsconfig.json"),
///     r#"{ "files": [], "references": [{ "path": "./a" }, { "path": "./b" }] }"#,
/// );
/// assert!(entry.is_solution());
/// assert_eq!(entry.references.len(), 2);
/// assert!(!entry.claims(Path::new("/repo/a/a.ts")));
/// ```
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    /// Absolute path of the config file (or synthetic key for inferred projects).
    pub path: PathBuf,
    pub options: CompilerOptions,
    /// Referenced config paths, in declaration order.
    pub references: Vec<PathBuf>,
    pub file_spec: FileSpec,
    /// Root files found on disk when the entry was built.
    pub root_files: Vec<PathBuf>,
    /// Config files pulled in through `extends`, nearest first.
    pub extended: Vec<PathBuf>,
    pub diagnostics: Vec<ProjectDiagnostic>,
    /// Modification time of the config file when it was read.
    pub modified: Option<SystemTime>,
    inferred: bool,
}

impl ConfigEntry {
    /// Reads and parses a config file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::ConfigNotFound`] if the file does not exist and
    /// [`ProjectError::Io`] if it cannot be read. Content problems are
    /// reported through [`ConfigEntry::diagnostics`].
    pub fn load(path: &Path) -> Result<Self> {
        let path = normalize_path(path);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProjectError::ConfigNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        let mut entry = Self::parse(&path, &text);
        entry.modified = modified;
        Ok(entry)
    }

    /// Parses config text as if it were located at `path`.
    ///
    /// `extends` targets are still read from disk.
    pub fn parse(path: &Path, text: &str) -> Self {
        let path = normalize_path(path);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut diagnostics = Vec::new();

        let raw: RawTsConfig = match parse_jsonc(text) {
            Ok(raw) => raw,
            Err(e) => {
                let error = ProjectError::ConfigParse {
                    path: path.clone(),
                    source: Box::new(e),
                };
                diagnostics.push(ProjectDiagnostic::error(Some(path.clone()), error.to_string()));
                RawTsConfig::default()
            }
        };

        let own = Layer::from_raw(&raw, &dir);
        let mut extended = Vec::new();
        let layer = match raw.extends.as_deref() {
            Some(spec) => {
                let mut visiting = vec![path.clone()];
                match load_base(&dir, spec, &mut visiting, &mut extended, &mut diagnostics) {
                    Some(base) => base.extended_by(own),
                    None => own,
                }
            }
            None => own,
        };

        let references: Vec<PathBuf> = raw
            .references
            .unwrap_or_default()
            .iter()
            .map(|r| resolve_reference(&dir, &r.path))
            .collect();

        let file_spec = build_file_spec(&path, &dir, &layer, &mut diagnostics);
        let root_files = file_spec.expand(&path, &mut diagnostics);

        if file_spec.is_empty() && references.is_empty() {
            diagnostics.push(ProjectDiagnostic::warning(
                Some(path.clone()),
                "config specifies no input files and no project references",
            ));
        }

        tracing::debug!(
            config = %path.display(),
            roots = root_files.len(),
            references = references.len(),
            "parsed config"
        );

        Self {
            path,
            options: layer.options,
            references,
            file_spec,
            root_files,
            extended,
            diagnostics,
            modified: None,
            inferred: false,
        }
    }

    /// Builds the synthetic config of a file that has no `tsconfig.json`.
    pub fn inferred(file: &Path) -> Self {
        let file = normalize_path(file);
        Self {
            path: inferred_project_key(&file),
            options: CompilerOptions::default(),
            references: Vec::new(),
            file_spec: FileSpec::single(&file),
            root_files: vec![file],
            extended: Vec::new(),
            diagnostics: Vec::new(),
            modified: None,
            inferred: true,
        }
    }

    pub fn is_inferred(&self) -> bool {
        self.inferred
    }

    /// Directory containing the config file.
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    /// Returns true if this config directly claims `file` by inclusion.
    pub fn claims(&self, file: &Path) -> bool {
        self.file_spec.claims(file)
    }

    /// A container config: no direct inputs, only project references.
    pub fn is_solution(&self) -> bool {
        !self.inferred && self.file_spec.is_empty() && !self.references.is_empty()
    }

    pub fn policy(&self) -> ExpansionPolicy {
        ExpansionPolicy::from_options(&self.options)
    }

    /// Effective `rootDir`: the option when set, otherwise the config directory.
    pub fn root_dir(&self) -> PathBuf {
        self.options
            .root_dir
            .clone()
            .unwrap_or_else(|| self.directory().to_path_buf())
    }

    pub fn out_dir(&self) -> Option<&Path> {
        self.options.out_dir.as_deref()
    }

    /// Pairs of `(emitted .d.ts, source file)` this project produces.
    pub fn declaration_outputs(&self) -> Vec<(PathBuf, PathBuf)> {
        if self.inferred || !self.options.emits_declarations() {
            return Vec::new();
        }
        let root_dir = self.root_dir();
        let out_dir = self
            .out_dir()
            .map_or_else(|| root_dir.clone(), Path::to_path_buf);
        self.root_files
            .iter()
            .filter_map(|source| {
                declaration_output_path(source, &root_dir, &out_dir)
                    .map(|dts| (dts, source.clone()))
            })
            .collect()
    }

    /// Returns true if `path` is the config itself or one it extends.
    pub fn depends_on_file(&self, path: &Path) -> bool {
        self.path == path || self.extended.iter().any(|p| p == path)
    }
}

fn build_file_spec(
    config_path: &Path,
    dir: &Path,
    layer: &Layer,
    diagnostics: &mut Vec<ProjectDiagnostic>,
) -> FileSpec {
    let mut compile = |entries: Vec<(PathBuf, String)>, is_include: bool| {
        entries
            .iter()
            .filter_map(|(base, raw)| match PathPattern::parse(base, raw, is_include) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    diagnostics.push(ProjectDiagnostic::error(
                        Some(config_path.to_path_buf()),
                        e.to_string(),
                    ));
                    None
                }
            })
            .collect::<Vec<_>>()
    };

    let include = match (&layer.files, &layer.include) {
        (_, Some(include)) => compile(include.clone(), true),
        (Some(_), None) => Vec::new(),
        (None, None) => compile(vec![(dir.to_path_buf(), "**/*".to_string())], true),
    };

    let exclude = match &layer.exclude {
        Some(exclude) => compile(exclude.clone(), false),
        None => {
            let mut defaults: Vec<(PathBuf, String)> = DEFAULT_EXCLUDES
                .iter()
                .map(|d| (dir.to_path_buf(), (*d).to_string()))
                .collect();
            if let Some(out_dir) = &layer.options.out_dir {
                defaults.push((dir.to_path_buf(), out_dir.to_string_lossy().into_owned()));
            }
            compile(defaults, false)
        }
    };

    FileSpec {
        files: layer.files.clone().unwrap_or_default(),
        include,
        exclude,
    }
}

fn load_base(
    dir: &Path,
    spec: &str,
    visiting: &mut Vec<PathBuf>,
    extended: &mut Vec<PathBuf>,
    diagnostics: &mut Vec<ProjectDiagnostic>,
) -> Option<Layer> {
    let owner = visiting.last().cloned();

    let Some(base_path) = resolve_extends_path(dir, spec) else {
        diagnostics.push(ProjectDiagnostic::error(
            owner,
            format!("file '{spec}' specified in extends not found"),
        ));
        return None;
    };

    if visiting.contains(&base_path) {
        diagnostics.push(ProjectDiagnostic::error(
            owner,
            ProjectError::ExtendsCycle(base_path).to_string(),
        ));
        return None;
    }

    let raw: RawTsConfig = match std::fs::read_to_string(&base_path)
        .map_err(|e| e.to_string())
        .and_then(|text| parse_jsonc(&text).map_err(|e| e.to_string()))
    {
        Ok(raw) => raw,
        Err(e) => {
            diagnostics.push(ProjectDiagnostic::error(
                Some(base_path.clone()),
                format!("failed to read extended config: {e}"),
            ));
            return None;
        }
    };

    extended.push(base_path.clone());
    visiting.push(base_path.clone());

    let base_dir = base_path.parent().map(Path::to_path_buf).unwrap_or_default();
    let own = Layer::from_raw(&raw, &base_dir);
    let layer = match raw.extends.as_deref() {
        Some(next) => match load_base(&base_dir, next, visiting, extended, diagnostics) {
            Some(base) => base.extended_by(own),
            None => own,
        },
        None => own,
    };

    visiting.pop();
    Some(layer)
}

fn resolve_extends_path(dir: &Path, spec: &str) -> Option<PathBuf> {
    let with_json = |p: PathBuf| {
        if p.extension().is_some_and(|e| e == "json") {
            p
        } else {
            let mut name = p.into_os_string();
            name.push(".json");
            PathBuf::from(name)
        }
    };

    if spec.starts_with('.') || Path::new(spec).is_absolute() {
        return Some(with_json(resolve_relative(dir, spec)));
    }

    // Bare specifier: look it up in node_modules of every ancestor.
    for ancestor in dir.ancestors() {
        let candidate = ancestor.join("node_modules").join(spec);
        if candidate.is_dir() {
            let nested = candidate.join("tsconfig.json");
            if nested.is_file() {
                return Some(normalize_path(&nested));
            }
        }
        let file = with_json(candidate);
        if file.is_file() {
            return Some(normalize_path(&file));
        }
    }
    None
}

/// Resolves a `references[].path` entry to a config file path.
pub fn resolve_reference(dir: &Path, raw: &str) -> PathBuf {
    let resolved = resolve_relative(dir, raw);
    if resolved.extension().is_some_and(|e| e == "json") {
        resolved
    } else {
        resolved.join("tsconfig.json")
    }
}

/// Deserializes JSON that may contain comments and trailing commas.
pub fn parse_jsonc<T: DeserializeOwned>(text: &str) -> serde_json::Result<T> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    serde_json::from_str(&strip_trailing_commas(&strip_comments(text)))
}

fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match (ch, chars.peek().copied()) {
            ('"', _) => {
                in_string = true;
                out.push(ch);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let mut lookahead = chars.clone();
            let next = lookahead.find(|c| !c.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(ch);
    }

    out
}
