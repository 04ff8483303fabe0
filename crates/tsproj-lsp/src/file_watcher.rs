//! Watcher registration for project files.
//!
//! Configs, declaration maps and build-info manifests change outside the
//! editor, usually from a build. The client watches them for us and reports
//! changes through `workspace/didChangeWatchedFiles`.

use tower_lsp_server::Client;
use tower_lsp_server::ls_types::{
    DidChangeWatchedFilesRegistrationOptions, FileSystemWatcher, GlobPattern, Registration,
    WatchKind,
};

/// Glob patterns for every project file the service reacts to.
///
/// # Examples
///
/// ```
/// use tsproj_lsp::file_watcher::watch_patterns;
///
/// let patterns = watch_patterns(&["tsconfig.json".to_string()]);
/// assert_eq!(patterns, vec!["**/tsconfig.json", "**/*.d.ts.map", "**/*.tsbuildinfo"]);
/// ```
pub fn watch_patterns(config_file_names: &[String]) -> Vec<String> {
    config_file_names
        .iter()
        .map(|name| format!("**/{name}"))
        .chain(["**/*.d.ts.map".to_string(), "**/*.tsbuildinfo".to_string()])
        .collect()
}

/// Asks the client to watch `patterns`.
///
/// # Errors
///
/// Returns an error if the client doesn't support dynamic registration
/// or if the registration request fails.
pub async fn register_project_file_watchers(
    client: &Client,
    patterns: &[String],
) -> Result<(), String> {
    if patterns.is_empty() {
        tracing::debug!("no project file patterns to watch");
        return Ok(());
    }

    let watchers: Vec<FileSystemWatcher> = patterns
        .iter()
        .map(|pattern| FileSystemWatcher {
            glob_pattern: GlobPattern::String(pattern.clone()),
            kind: Some(WatchKind::Create | WatchKind::Change | WatchKind::Delete),
        })
        .collect();

    let options = DidChangeWatchedFilesRegistrationOptions { watchers };

    let registration = Registration {
        id: "tsproj-project-file-watcher".to_string(),
        method: "workspace/didChangeWatchedFiles".to_string(),
        register_options: Some(serde_json::to_value(options).map_err(|e| e.to_string())?),
    };

    client
        .register_capability(vec![registration])
        .await
        .map_err(|e| format!("failed to register file watchers: {e}"))?;

    tracing::info!(count = patterns.len(), "registered project file watchers");
    Ok(())
}
