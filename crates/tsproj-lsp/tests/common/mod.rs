//! Common test utilities for integration tests.
//!
//! This module provides shared infrastructure for LSP integration tests,
//! including the `LspClient` for communicating with the server binary and
//! an on-disk solution fixture.

use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tempfile::TempDir;

/// LSP test client for communicating with the server binary.
pub(crate) struct LspClient {
    process: Child,
    /// Notifications received while waiting for responses.
    notifications: Vec<Value>,
    reader: BufReader<std::process::ChildStdout>,
}

impl LspClient {
    /// Spawn the tsproj-lsp binary.
    pub(crate) fn spawn() -> Self {
        let mut process = Command::new(env!("CARGO_BIN_EXE_tsproj-lsp"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn tsproj-lsp binary");

        let stdout = process.stdout.take().expect("Failed to capture stdout");

        Self {
            process,
            notifications: Vec::new(),
            reader: BufReader::new(stdout),
        }
    }

    /// Send a JSON-RPC message to the server.
    pub(crate) fn send(&mut self, message: &Value) {
        let body = serde_json::to_string(message).unwrap();
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        let stdin = self.process.stdin.as_mut().expect("stdin not captured");
        stdin.write_all(header.as_bytes()).unwrap();
        stdin.write_all(body.as_bytes()).unwrap();
        stdin.flush().unwrap();
    }

    /// Read the next message of any kind.
    fn read_message(&mut self) -> Value {
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .expect("Failed to read header");

            assert!(bytes_read != 0, "Server closed connection unexpectedly");

            if line == "\r\n" || line == "\n" {
                break;
            }

            if line.to_lowercase().starts_with("content-length:") {
                content_length = line
                    .split(':')
                    .nth(1)
                    .unwrap()
                    .trim()
                    .parse()
                    .expect("Invalid content length");
            }
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .expect("Failed to read body");

        serde_json::from_slice(&body).unwrap_or_else(|e| {
            panic!("Invalid JSON: {e} in: {:?}", String::from_utf8_lossy(&body))
        })
    }

    /// Handles a server-to-client message; returns it if it is a response.
    ///
    /// Server requests such as `client/registerCapability` are answered with
    /// a null result, notifications are captured.
    fn dispatch(&mut self, message: Value) -> Option<Value> {
        match (message.get("id"), message.get("method")) {
            (Some(id), Some(_)) => {
                let id = id.clone();
                self.send(&json!({ "jsonrpc": "2.0", "id": id, "result": null }));
                None
            }
            (None, Some(_)) => {
                self.notifications.push(message);
                None
            }
            _ => Some(message),
        }
    }

    /// Read the JSON-RPC response with `id`.
    pub(crate) fn read_response(&mut self, id: i64) -> Value {
        loop {
            let message = self.read_message();
            if let Some(response) = self.dispatch(message)
                && response.get("id") == Some(&json!(id))
            {
                return response;
            }
        }
    }

    /// Wait until diagnostics for `uri` are published.
    pub(crate) fn wait_for_diagnostics(&mut self, uri: &str) -> Value {
        loop {
            if let Some(index) = self.notifications.iter().position(|n| {
                n["method"] == "textDocument/publishDiagnostics" && n["params"]["uri"] == uri
            }) {
                return self.notifications.remove(index)["params"].clone();
            }
            let message = self.read_message();
            self.dispatch(message);
        }
    }

    /// Initialize the LSP session.
    pub(crate) fn initialize(&mut self, options: Option<Value>) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "processId": null,
                "capabilities": {
                    "workspace": {
                        "didChangeWatchedFiles": { "dynamicRegistration": true }
                    },
                    "textDocument": {
                        "publishDiagnostics": {}
                    }
                },
                "rootUri": null,
                "initializationOptions": options,
                "workspaceFolders": null
            }
        }));

        let response = self.read_response(1);

        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "initialized",
            "params": {}
        }));

        response
    }

    /// Open a text document and wait for its diagnostics.
    pub(crate) fn did_open(&mut self, path: &Path) -> Value {
        let uri = file_uri(path);
        let text = std::fs::read_to_string(path).unwrap();
        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {
                "textDocument": {
                    "uri": uri,
                    "languageId": "typescript",
                    "version": 1,
                    "text": text
                }
            }
        }));
        self.wait_for_diagnostics(&uri)
    }

    pub(crate) fn did_close(&mut self, path: &Path) {
        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didClose",
            "params": { "textDocument": { "uri": file_uri(path) } }
        }));
    }

    /// Request references, declarations included.
    pub(crate) fn references(&mut self, id: i64, path: &Path, line: u32, character: u32) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "textDocument/references",
            "params": {
                "textDocument": { "uri": file_uri(path) },
                "position": { "line": line, "character": character },
                "context": { "includeDeclaration": true }
            }
        }));
        self.read_response(id)
    }

    pub(crate) fn definition(&mut self, id: i64, path: &Path, line: u32, character: u32) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "textDocument/definition",
            "params": {
                "textDocument": { "uri": file_uri(path) },
                "position": { "line": line, "character": character }
            }
        }));
        self.read_response(id)
    }

    pub(crate) fn workspace_symbol(&mut self, id: i64, query: &str) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "workspace/symbol",
            "params": { "query": query }
        }));
        self.read_response(id)
    }

    /// Run `tsproj.dumpProjects` and return the dump text.
    pub(crate) fn dump_projects(&mut self, id: i64) -> String {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "workspace/executeCommand",
            "params": { "command": "tsproj.dumpProjects", "arguments": [] }
        }));
        let response = self.read_response(id);
        response["result"]
            .as_str()
            .expect("dump should be a string")
            .to_string()
    }

    /// Shutdown the server.
    pub(crate) fn shutdown(&mut self) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": 999,
            "method": "shutdown"
        }));
        self.read_response(999)
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}

pub(crate) fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// `(path, line, character)` of every location in a response.
pub(crate) fn locations(response: &Value) -> Vec<(String, u64, u64)> {
    response["result"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|l| {
                    (
                        l["uri"].as_str().unwrap_or_default().to_string(),
                        l["range"]["start"]["line"].as_u64().unwrap_or_default(),
                        l["range"]["start"]["character"].as_u64().unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// A solution with composite projects `a`, `b` (references `a`) and `c`
/// (references `a`), plus `user/user.ts` outside every project.
pub(crate) struct Solution {
    dir: TempDir,
}

impl Solution {
    pub(crate) fn new() -> Self {
        let solution = Self {
            dir: TempDir::new().unwrap(),
        };
        solution.write(
            "tsconfig.json",
            r#"{ "files": [], "references": [{ "path": "./a" }, { "path": "./b" }, { "path": "./c" }] }"#,
        );
        solution.write(
            "a/tsconfig.json",
            r#"{ "compilerOptions": { "composite": true, "declarationMap": true, "outDir": "bin" } }"#,
        );
        solution.write("a/a.ts", "export function fnA() {}\n");
        solution.write(
            "a/bin/a.d.ts",
            "export declare function fnA(): void;\n//# sourceMappingURL=a.d.ts.map\n",
        );
        solution.write(
            "a/bin/a.d.ts.map",
            r#"{"version":3,"file":"a.d.ts","sourceRoot":"","sources":["../a.ts"],"names":[],"mappings":"AAAA,wBAAgB"}"#,
        );
        for (leaf, function) in [("b", "fnB"), ("c", "fnC")] {
            solution.write(
                &format!("{leaf}/tsconfig.json"),
                r#"{
                    "compilerOptions": { "composite": true, "declarationMap": true, "outDir": "bin" },
                    "references": [{ "path": "../a" }]
                }"#,
            );
            solution.write(
                &format!("{leaf}/{leaf}.ts"),
                &format!(
                    "import {{ fnA }} from '../a/bin/a';\nexport function {function}() {{\n    fnA();\n}}\n"
                ),
            );
        }
        solution.write(
            "user/user.ts",
            "import { fnA } from '../a/bin/a';\nexport function user() {\n    fnA();\n}\n",
        );
        solution
    }

    pub(crate) fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}
