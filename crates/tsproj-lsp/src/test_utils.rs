//! Test utilities: on-disk project fixtures and instrumented compilers.

#[cfg(test)]
pub(crate) mod test_helpers {
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower_lsp_server::ls_types::Uri;
    use tsproj_core::paths::normalize_path;
    use tsproj_core::{BuildOutput, BuildRequest, Compiler};
    use tsproj_lexical::LexicalCompiler;

    /// A temporary directory tree of configs and sources.
    pub struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        /// A solution with three composite leaves and a config-less file.
        ///
        /// `b` and `c` reference `a` and import its emitted declarations;
        /// `user/user.ts` imports the emitted declarations of `a` and `b`.
        pub fn solution() -> Self {
            let fixture = Self::new();
            fixture.write(
                "tsconfig.json",
                r#"{
                    "files": [],
                    "references": [{ "path": "./a" }, { "path": "./b" }, { "path": "./c" }]
                }"#,
            );

            fixture.write(
                "a/tsconfig.json",
                r#"{ "compilerOptions": { "composite": true, "declarationMap": true, "outDir": "bin" } }"#,
            );
            fixture.write("a/a.ts", "export function fnA() {}\n");
            fixture.write(
                "a/bin/a.d.ts",
                "export declare function fnA(): void;\n//# sourceMappingURL=a.d.ts.map\n",
            );
            fixture.write(
                "a/bin/a.d.ts.map",
                r#"{"version":3,"file":"a.d.ts","sourceRoot":"","sources":["../a.ts"],"names":[],"mappings":"AAAA,wBAAgB"}"#,
            );

            for (leaf, function) in [("b", "fnB"), ("c", "fnC")] {
                fixture.write(
                    &format!("{leaf}/tsconfig.json"),
                    r#"{
                        "compilerOptions": { "composite": true, "declarationMap": true, "outDir": "bin" },
                        "references": [{ "path": "../a" }]
                    }"#,
                );
                fixture.write(
                    &format!("{leaf}/{leaf}.ts"),
                    &format!("import {{ fnA }} from '../a/bin/a';\nexport function {function}() {{\n    fnA();\n}}\n"),
                );
            }
            fixture.write(
                "b/bin/b.d.ts",
                "export declare function fnB(): void;\n//# sourceMappingURL=b.d.ts.map\n",
            );
            fixture.write(
                "b/bin/b.d.ts.map",
                r#"{"version":3,"file":"b.d.ts","sourceRoot":"","sources":["../b.ts"],"names":[],"mappings":"AAAA,wBACgB"}"#,
            );

            fixture.write(
                "user/user.ts",
                "import { fnA } from '../a/bin/a';\nimport { fnB } from '../b/bin/b';\nexport function user() {\n    fnA();\n    fnB();\n}\n",
            );
            fixture
        }

        pub fn root(&self) -> PathBuf {
            normalize_path(self.dir.path())
        }

        /// Absolute path of `rel` inside the fixture.
        pub fn path(&self, rel: &str) -> PathBuf {
            normalize_path(&self.dir.path().join(rel))
        }

        /// Config path of the project in directory `rel`; `""` is the root.
        pub fn config(&self, rel: &str) -> PathBuf {
            if rel.is_empty() {
                self.path("tsconfig.json")
            } else {
                self.path(&format!("{rel}/tsconfig.json"))
            }
        }

        pub fn write(&self, rel: &str, content: &str) -> PathBuf {
            let path = self.path(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
            path
        }
    }

    pub fn uri(path: &Path) -> Uri {
        Uri::from_file_path(path).unwrap()
    }

    /// A lexical compiler that records every build it performs.
    pub struct CountingCompiler {
        inner: LexicalCompiler,
        builds: AtomicUsize,
        projects: Mutex<Vec<PathBuf>>,
        delay: Option<Duration>,
    }

    impl CountingCompiler {
        pub fn new() -> Self {
            Self {
                inner: LexicalCompiler::new(),
                builds: AtomicUsize::new(0),
                projects: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        /// Sleeps for `delay` before each build, widening race windows.
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new()
            }
        }

        pub fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }

        /// Keys of the projects built, in build order.
        pub fn built_projects(&self) -> Vec<PathBuf> {
            self.projects.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Compiler for CountingCompiler {
        async fn build_program(&self, request: BuildRequest) -> BuildOutput {
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.projects.lock().unwrap().push(request.project.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.build_program(request).await
        }
    }
}
