use serde::Deserialize;
use tsproj_core::{DEFAULT_CONFIG_FILE_NAMES, ExpansionPolicy};

/// Root configuration for the tsproj-lsp server.
///
/// Provided by the client through `initializationOptions`. Keys may be
/// written in camelCase or snake_case; every field falls back to its default
/// when omitted.
///
/// # Examples
///
/// ```
/// use tsproj_lsp::config::ServiceConfig;
///
/// let json = r#"{
///     "workspaceSymbolLimit": 50,
///     "policyOverrides": { "disableSolutionSearching": true }
/// }"#;
///
/// let config: ServiceConfig = serde_json::from_str(json).unwrap();
/// assert_eq!(config.workspace_symbol_limit, 50);
/// assert_eq!(config.policy_overrides.disable_solution_searching, Some(true));
/// assert_eq!(config.max_concurrent_loads, 4);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// File names probed in each ancestor directory, in order.
    #[serde(default = "default_config_file_names", alias = "config_file_names")]
    pub config_file_names: Vec<String>,
    /// Upper bound on merged `workspace/symbol` results.
    #[serde(default = "default_symbol_limit", alias = "workspace_symbol_limit")]
    pub workspace_symbol_limit: usize,
    /// Query-driven project loads allowed to run at once.
    #[serde(
        default = "default_max_concurrent_loads",
        alias = "max_concurrent_loads",
        deserialize_with = "deserialize_concurrency"
    )]
    pub max_concurrent_loads: usize,
    #[serde(default, alias = "policy_overrides")]
    pub policy_overrides: PolicyOverrides,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            config_file_names: default_config_file_names(),
            workspace_symbol_limit: default_symbol_limit(),
            max_concurrent_loads: default_max_concurrent_loads(),
            policy_overrides: PolicyOverrides::default(),
        }
    }
}

/// Server-wide overrides for the per-project expansion flags.
///
/// A flag set here wins over the value in every `tsconfig.json`.
///
/// # Examples
///
/// ```
/// use tsproj_core::ExpansionPolicy;
/// use tsproj_lsp::config::PolicyOverrides;
///
/// let overrides = PolicyOverrides {
///     disable_source_of_project_reference_redirect: Some(true),
///     ..Default::default()
/// };
/// let policy = overrides.apply(ExpansionPolicy::default());
/// assert!(!policy.redirects_to_source());
/// ```
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOverrides {
    #[serde(default, alias = "disable_solution_searching")]
    pub disable_solution_searching: Option<bool>,
    #[serde(default, alias = "disable_referenced_project_load")]
    pub disable_referenced_project_load: Option<bool>,
    #[serde(default, alias = "disable_source_of_project_reference_redirect")]
    pub disable_source_of_project_reference_redirect: Option<bool>,
}

impl PolicyOverrides {
    pub fn apply(&self, policy: ExpansionPolicy) -> ExpansionPolicy {
        ExpansionPolicy {
            disable_solution_searching: self
                .disable_solution_searching
                .unwrap_or(policy.disable_solution_searching),
            disable_referenced_project_load: self
                .disable_referenced_project_load
                .unwrap_or(policy.disable_referenced_project_load),
            disable_source_of_project_reference_redirect: self
                .disable_source_of_project_reference_redirect
                .unwrap_or(policy.disable_source_of_project_reference_redirect),
        }
    }
}

fn default_config_file_names() -> Vec<String> {
    DEFAULT_CONFIG_FILE_NAMES
        .iter()
        .map(|name| (*name).to_string())
        .collect()
}

const fn default_symbol_limit() -> usize {
    256
}

const fn default_max_concurrent_loads() -> usize {
    4
}

/// Clamps the load concurrency to at least one.
fn deserialize_concurrency<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = usize::deserialize(deserializer)?;
    if value == 0 {
        tracing::warn!("maxConcurrentLoads must be at least 1, using 1");
        return Ok(1);
    }
    Ok(value)
}
