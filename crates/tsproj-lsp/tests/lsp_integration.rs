//! Integration tests for the tsproj-lsp binary.
//!
//! These tests spawn the server against an on-disk solution and drive it
//! over JSON-RPC the way an editor would.

mod common;

use common::{LspClient, Solution, file_uri, locations};
use serde_json::json;

#[test]
fn test_initialize_response() {
    let mut client = LspClient::spawn();
    let response = client.initialize(None);

    let result = &response["result"];
    assert_eq!(result["serverInfo"]["name"], "tsproj-lsp");
    assert!(result["serverInfo"]["version"].is_string());

    let capabilities = &result["capabilities"];
    assert_eq!(capabilities["referencesProvider"], json!(true));
    assert_eq!(capabilities["definitionProvider"], json!(true));
    assert_eq!(capabilities["workspaceSymbolProvider"], json!(true));
    assert_eq!(
        capabilities["executeCommandProvider"]["commands"],
        json!(["tsproj.dumpProjects"])
    );
}

#[test]
fn test_shutdown_response() {
    let mut client = LspClient::spawn();
    client.initialize(None);

    let response = client.shutdown();
    assert_eq!(response["result"], json!(null));
    assert_eq!(response["id"], json!(999));
}

#[test]
fn test_references_across_projects() {
    let solution = Solution::new();
    let mut client = LspClient::spawn();
    client.initialize(None);

    let b = solution.path("b/b.ts");
    client.did_open(&b);

    let response = client.references(10, &b, 2, 5);
    assert!(response.get("error").is_none(), "{response:?}");
    let found = locations(&response);

    let a_uri = file_uri(&solution.path("a/a.ts"));
    let c_uri = file_uri(&solution.path("c/c.ts"));
    assert!(found.contains(&(a_uri, 0, 16)), "{found:?}");
    assert!(found.contains(&(file_uri(&b), 2, 4)), "{found:?}");
    assert!(found.contains(&(c_uri, 2, 4)), "{found:?}");
    assert!(found.iter().all(|(uri, _, _)| !uri.ends_with(".d.ts")));
}

#[test]
fn test_references_without_redirect() {
    let solution = Solution::new();
    let mut client = LspClient::spawn();
    client.initialize(Some(json!({
        "policyOverrides": { "disableSourceOfProjectReferenceRedirect": true }
    })));

    let b = solution.path("b/b.ts");
    client.did_open(&b);

    let found = locations(&client.references(10, &b, 2, 5));
    let declaration = file_uri(&solution.path("a/bin/a.d.ts"));
    assert!(found.contains(&(declaration, 0, 24)), "{found:?}");
    assert!(!found.iter().any(|(uri, _, _)| uri.ends_with("/a/a.ts")));
}

#[test]
fn test_definition_from_file_outside_projects() {
    let solution = Solution::new();
    let mut client = LspClient::spawn();
    client.initialize(None);

    let user = solution.path("user/user.ts");
    client.did_open(&user);

    let response = client.definition(10, &user, 2, 5);
    let result = &response["result"];
    assert_eq!(result["uri"], json!(file_uri(&solution.path("a/a.ts"))));
    assert_eq!(result["range"]["start"], json!({ "line": 0, "character": 16 }));
}

#[test]
fn test_workspace_symbol_covers_solution() {
    let solution = Solution::new();
    let mut client = LspClient::spawn();
    client.initialize(None);
    client.did_open(&solution.path("user/user.ts"));

    let response = client.workspace_symbol(10, "fn");
    let names: Vec<&str> = response["result"]
        .as_array()
        .expect("flat symbol list")
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();

    for expected in ["fnA", "fnB", "fnC"] {
        assert!(names.contains(&expected), "{names:?}");
    }
    assert_eq!(names.iter().filter(|n| **n == "fnA").count(), 1);
}

#[test]
fn test_dump_projects_tracks_open_and_close() {
    let solution = Solution::new();
    let mut client = LspClient::spawn();
    client.initialize(None);

    let a = solution.path("a/a.ts");
    let config = solution.path("a/tsconfig.json");
    client.did_open(&a);

    let dump = client.dump_projects(10);
    assert!(dump.starts_with("Projects::"), "{dump}");
    assert!(dump.contains(&format!("Default project: {}", config.display())));

    client.did_close(&a);
    let dump = client.dump_projects(11);
    assert!(!dump.contains("Default project:"), "{dump}");
}

#[test]
fn test_open_publishes_diagnostics() {
    let solution = Solution::new();
    let mut client = LspClient::spawn();
    client.initialize(None);

    let params = client.did_open(&solution.path("a/a.ts"));
    assert!(params["diagnostics"].as_array().is_some());
}
