//! Lexical scanner for TypeScript sources.
//!
//! Extracts declarations, module references, import bindings and identifier
//! occurrences with LSP positions, using regex patterns over a masked copy
//! of the source in which comments and string contents are blanked out.
//! Masking preserves byte offsets, so every match maps straight back to the
//! original text.
//!
//! The scanner never fails. Unterminated comments or strings and unbalanced
//! braces are recorded as [`ScanProblem`]s and scanning continues.

use once_cell::sync::Lazy;
use regex::Regex;
use tower_lsp_server::ls_types::{Position, Range, SymbolKind};

static DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|[^\w$.])(export\s+)?(default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?(function\s*\*?|class|interface|type|const\s+enum|enum|namespace|module|const|let|var)\s+([A-Za-z_$][\w$]*)",
    )
    .unwrap()
});
static MEMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:(?:public|private|protected|static|readonly|async|abstract|declare|override|get|set)\s+)*([A-Za-z_$][\w$]*)\s*[?!]?\s*([(<:=;])",
    )
    .unwrap()
});
static IMPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s+(?:type\s+)?([^;'"]*?)\s*\bfrom\s*['"]([^'"\n]+)['"]"#).unwrap()
});
static IMPORT_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\s*['"]([^'"\n]+)['"]"#).unwrap());
static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\bexport\s+(?:type\s+)?(\*(?:\s+as\s+[A-Za-z_$][\w$]*)?|\{[^}]*\})\s*from\s*['"]([^'"\n]+)['"]"#,
    )
    .unwrap()
});
static EXPORT_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bexport\s+(?:type\s+)?\{([^}]*)\}").unwrap());
static EXPORT_DEFAULT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bexport\s+default\s+([A-Za-z_$][\w$]*)").unwrap());
static FROM_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*from\b").unwrap());
static CLAUSE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_$][\w$]*|[{}*,]").unwrap());
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_$][\w$]*").unwrap());

/// A declaration found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub kind: SymbolKind,
    /// Range of the declared name.
    pub range: Range,
    pub container: Option<String>,
    pub exported: bool,
    pub is_default: bool,
}

/// How a module specifier is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Import,
    ReExport,
    ExportAll,
}

/// A module specifier appearing in an import or export-from statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReference {
    pub specifier: String,
    pub range: Range,
    pub kind: ModuleKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Named,
    Default,
    Namespace,
}

/// A name bound from another module by an import or re-export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub kind: BindingKind,
    /// Exported name in the target module (`default` for default imports).
    pub imported: String,
    /// Range of the imported name token, for named bindings.
    pub imported_range: Option<Range>,
    /// Name visible in this file (or exported again, for re-exports).
    pub local: String,
    /// Index into [`FileIndex::modules`].
    pub module: usize,
    pub reexport: bool,
}

/// An `export { local as exported }` entry without a `from` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalExport {
    pub local: String,
    pub exported: String,
}

/// An identifier token outside comments and strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub name: String,
    pub range: Range,
    /// True when the identifier follows a `.`.
    pub member_access: bool,
    /// Identifier directly before the `.`, for member accesses.
    pub qualifier: Option<String>,
}

impl Occurrence {
    pub fn contains(&self, position: Position) -> bool {
        self.range.start <= position && position <= self.range.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanProblem {
    pub range: Range,
    pub message: String,
}

/// Everything the scanner extracts from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIndex {
    pub declarations: Vec<Declaration>,
    pub modules: Vec<ModuleReference>,
    pub bindings: Vec<ImportBinding>,
    pub local_exports: Vec<LocalExport>,
    pub occurrences: Vec<Occurrence>,
    pub problems: Vec<ScanProblem>,
}

/// Pre-computed line start byte offsets for O(log n) position lookups.
struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, c) in content.char_indices() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    /// Converts byte offset to LSP Position (line, UTF-16 character).
    fn position(&self, content: &str, offset: usize) -> Position {
        let line = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        let line_start = self.line_starts[line];

        let character = content[line_start..offset]
            .chars()
            .map(|c| c.len_utf16() as u32)
            .sum();

        Position::new(line as u32, character)
    }

    fn range(&self, content: &str, start: usize, end: usize) -> Range {
        Range::new(self.position(content, start), self.position(content, end))
    }
}

struct Masked {
    /// Comments and string contents blanked.
    code: String,
    /// Only comments blanked; module specifiers stay readable.
    statements: String,
}

fn blank(buffer: &mut [u8], from: usize, to: usize) {
    for byte in &mut buffer[from..to] {
        if *byte != b'\n' {
            *byte = b' ';
        }
    }
}

fn mask(content: &str, problems: &mut Vec<(usize, usize, &'static str)>) -> Masked {
    let bytes = content.as_bytes();
    let len = bytes.len();
    let mut code = bytes.to_vec();
    let mut statements = bytes.to_vec();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let end = content[i..].find('\n').map_or(len, |p| i + p);
                blank(&mut code, i, end);
                blank(&mut statements, i, end);
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = match content[i + 2..].find("*/") {
                    Some(p) => i + 2 + p + 2,
                    None => {
                        problems.push((i, i + 2, "unterminated block comment"));
                        len
                    }
                };
                blank(&mut code, i, end);
                blank(&mut statements, i, end);
                i = end;
            }
            quote @ (b'\'' | b'"' | b'`') => {
                let mut j = i + 1;
                let mut terminated = false;
                while j < len {
                    match bytes[j] {
                        b'\\' => j += 2,
                        c if c == quote => {
                            terminated = true;
                            break;
                        }
                        b'\n' if quote != b'`' => break,
                        _ => j += 1,
                    }
                }
                let end = j.min(len);
                if !terminated {
                    problems.push((i, i + 1, "unterminated string literal"));
                }
                blank(&mut code, i + 1, end);
                i = if terminated { end + 1 } else { end };
            }
            _ => i += 1,
        }
    }

    Masked {
        code: into_string(code),
        statements: into_string(statements),
    }
}

/// Masked buffers only replace whole characters with ASCII spaces.
fn into_string(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$'
}

fn previous_non_whitespace(bytes: &[u8], before: usize) -> Option<usize> {
    bytes[..before].iter().rposition(|b| !b.is_ascii_whitespace())
}

/// Matched `{ ... }` pairs as `(open, close)` byte offsets.
fn match_braces(code: &str, problems: &mut Vec<(usize, usize, &'static str)>) -> Vec<(usize, usize)> {
    let mut stack = Vec::new();
    let mut blocks = Vec::new();
    for (i, byte) in code.bytes().enumerate() {
        match byte {
            b'{' => stack.push(i),
            b'}' => match stack.pop() {
                Some(open) => blocks.push((open, i)),
                None => problems.push((i, i + 1, "unexpected '}'")),
            },
            _ => {}
        }
    }
    for open in stack {
        problems.push((open, open + 1, "'{' is never closed"));
    }
    blocks.sort_unstable();
    blocks
}

fn declaration_kind(keyword: &str) -> SymbolKind {
    match keyword.split_whitespace().next().unwrap_or(keyword) {
        k if k.starts_with("function") => SymbolKind::FUNCTION,
        "class" => SymbolKind::CLASS,
        "interface" => SymbolKind::INTERFACE,
        "type" => SymbolKind::TYPE_PARAMETER,
        "enum" => SymbolKind::ENUM,
        "const" if keyword.ends_with("enum") => SymbolKind::ENUM,
        "namespace" => SymbolKind::NAMESPACE,
        "module" => SymbolKind::MODULE,
        "const" => SymbolKind::CONSTANT,
        _ => SymbolKind::VARIABLE,
    }
}

fn owns_body(kind: SymbolKind) -> bool {
    kind == SymbolKind::CLASS
        || kind == SymbolKind::INTERFACE
        || kind == SymbolKind::ENUM
        || kind == SymbolKind::NAMESPACE
        || kind == SymbolKind::MODULE
}

struct RawDeclaration {
    name: String,
    kind: SymbolKind,
    start: usize,
    end: usize,
    exported: bool,
    is_default: bool,
}

/// Scans a TypeScript source file.
///
/// # Examples
///
/// ```
/// use tsproj_lexical::scan;
///
/// let index = scan("import { fnA } from '../a/bin/a';\nexport function fnUser() { fnA(); }\n");
/// assert_eq!(index.modules[0].specifier, "../a/bin/a");
/// assert_eq!(index.bindings[0].imported, "fnA");
/// assert_eq!(index.declarations[0].name, "fnUser");
/// assert_eq!(index.occurrences.iter().filter(|o| o.name == "fnA").count(), 2);
/// ```
pub fn scan(content: &str) -> FileIndex {
    let lines = LineIndex::new(content);
    let mut raw_problems = Vec::new();
    let masked = mask(content, &mut raw_problems);
    let code = masked.code.as_str();
    let blocks = match_braces(code, &mut raw_problems);

    let mut raw = scan_declarations(code);

    // Body block of each class/interface/enum/namespace declaration.
    let mut owners: Vec<(usize, usize, usize)> = Vec::new();
    for (index, decl) in raw.iter().enumerate() {
        if !owns_body(decl.kind) {
            continue;
        }
        let rest = &code[decl.end..];
        if let Some(offset) = rest.find(['{', ';'])
            && rest.as_bytes()[offset] == b'{'
        {
            let open = decl.end + offset;
            if let Ok(found) = blocks.binary_search_by_key(&open, |&(o, _)| o) {
                owners.push((blocks[found].0, blocks[found].1, index));
            }
        }
    }

    let innermost_block = |offset: usize| {
        blocks
            .iter()
            .filter(|&&(open, close)| open < offset && offset < close)
            .max_by_key(|&&(open, _)| open)
            .copied()
    };
    let container_of = |offset: usize, raw: &[RawDeclaration]| {
        owners
            .iter()
            .filter(|&&(open, close, _)| open < offset && offset < close)
            .max_by_key(|&&(open, _, _)| open)
            .map(|&(_, _, owner)| raw[owner].name.clone())
    };

    let mut members = Vec::new();
    for &(open, close, owner) in &owners {
        let owner_kind = raw[owner].kind;
        if owner_kind == SymbolKind::ENUM {
            members.extend(scan_enum_members(code, open, close));
            continue;
        }
        if owner_kind != SymbolKind::CLASS && owner_kind != SymbolKind::INTERFACE {
            continue;
        }
        for caps in MEMBER.captures_iter(&code[open + 1..close]) {
            let Some(name) = caps.get(1) else { continue };
            let start = open + 1 + name.start();
            if innermost_block(start) != Some((open, close)) {
                continue;
            }
            let kind = if name.as_str() == "constructor" {
                SymbolKind::CONSTRUCTOR
            } else {
                match caps.get(2).map(|m| m.as_str()) {
                    Some("(" | "<") => SymbolKind::METHOD,
                    _ => SymbolKind::PROPERTY,
                }
            };
            members.push(RawDeclaration {
                name: name.as_str().to_string(),
                kind,
                start,
                end: open + 1 + name.end(),
                exported: false,
                is_default: false,
            });
        }
    }

    let top_level = raw.len();
    raw.extend(members);
    let mut declarations: Vec<(usize, Declaration)> = raw
        .iter()
        .map(|d| {
            (
                d.start,
                Declaration {
                    name: d.name.clone(),
                    kind: d.kind,
                    range: lines.range(content, d.start, d.end),
                    container: container_of(d.start, &raw[..top_level]),
                    exported: d.exported,
                    is_default: d.is_default,
                },
            )
        })
        .collect();
    declarations.sort_by_key(|(start, _)| *start);

    let mut index = FileIndex {
        declarations: declarations.into_iter().map(|(_, d)| d).collect(),
        ..FileIndex::default()
    };

    scan_modules(content, &masked.statements, &lines, &mut index);
    index.occurrences = scan_occurrences(content, code, &lines);
    index.problems = raw_problems
        .into_iter()
        .map(|(start, end, message)| ScanProblem {
            range: lines.range(content, start, end.min(content.len())),
            message: message.to_string(),
        })
        .collect();
    index
}

/// Enum members are the leading identifiers of the comma-separated entries.
fn scan_enum_members(code: &str, open: usize, close: usize) -> Vec<RawDeclaration> {
    let mut members = Vec::new();
    let mut entry_start = open + 1;
    for entry in code[open + 1..close].split(',') {
        let leading = entry.len() - entry.trim_start().len();
        if let Some(name) = IDENTIFIER.find(entry.trim_start())
            && name.start() == 0
        {
            let start = entry_start + leading;
            members.push(RawDeclaration {
                name: name.as_str().to_string(),
                kind: SymbolKind::ENUM_MEMBER,
                start,
                end: start + name.end(),
                exported: false,
                is_default: false,
            });
        }
        entry_start += entry.len() + 1;
    }
    members
}

fn scan_declarations(code: &str) -> Vec<RawDeclaration> {
    let mut found = Vec::new();
    for caps in DECLARATION.captures_iter(code) {
        let (Some(keyword), Some(name)) = (caps.get(3), caps.get(4)) else {
            continue;
        };
        let before = code[..caps.get(1).map_or(keyword.start(), |m| m.start())].trim_end();
        if before.ends_with("import") {
            continue;
        }
        if keyword.as_str() == "type" {
            let after = code[name.end()..].trim_start();
            if !after.starts_with(['=', '<']) {
                continue;
            }
        }
        found.push(RawDeclaration {
            name: name.as_str().to_string(),
            kind: declaration_kind(keyword.as_str()),
            start: name.start(),
            end: name.end(),
            exported: caps.get(1).is_some(),
            is_default: caps.get(2).is_some(),
        });
    }
    found
}

struct ClauseBinding {
    kind: BindingKind,
    imported: String,
    imported_span: Option<(usize, usize)>,
    local: String,
}

/// Parses an import or export clause such as `Def, { a, b as c }` or `* as ns`.
///
/// `base` is the byte offset of the clause in the file.
fn parse_clause(clause: &str, base: usize) -> Vec<ClauseBinding> {
    let tokens: Vec<(&str, usize)> = CLAUSE_TOKEN
        .find_iter(clause)
        .map(|m| (m.as_str(), base + m.start()))
        .collect();
    let is_name = |t: &str| t.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '$');

    let mut bindings = Vec::new();
    let mut in_braces = false;
    let mut i = 0;
    while i < tokens.len() {
        let (token, offset) = tokens[i];
        match token {
            "{" => in_braces = true,
            "}" => in_braces = false,
            "," => {}
            "*" => {
                if let (Some(("as", _)), Some(&(local, _))) = (tokens.get(i + 1).copied(), tokens.get(i + 2))
                    && is_name(local)
                {
                    bindings.push(ClauseBinding {
                        kind: BindingKind::Namespace,
                        imported: "*".to_string(),
                        imported_span: None,
                        local: local.to_string(),
                    });
                    i += 2;
                }
            }
            "type" if tokens.get(i + 1).is_some_and(|&(next, _)| is_name(next) && next != "as") => {}
            name => {
                let alias = match (tokens.get(i + 1), tokens.get(i + 2)) {
                    (Some(&("as", _)), Some(&(local, _))) if is_name(local) => {
                        i += 2;
                        Some(local)
                    }
                    _ => None,
                };
                if in_braces {
                    bindings.push(ClauseBinding {
                        kind: BindingKind::Named,
                        imported: name.to_string(),
                        imported_span: Some((offset, offset + name.len())),
                        local: alias.unwrap_or(name).to_string(),
                    });
                } else {
                    bindings.push(ClauseBinding {
                        kind: BindingKind::Default,
                        imported: "default".to_string(),
                        imported_span: None,
                        local: name.to_string(),
                    });
                }
            }
        }
        i += 1;
    }
    bindings
}

fn scan_modules(content: &str, statements: &str, lines: &LineIndex, index: &mut FileIndex) {
    let push_module = |index: &mut FileIndex, specifier: regex::Match<'_>, kind: ModuleKind| {
        index.modules.push(ModuleReference {
            specifier: specifier.as_str().to_string(),
            range: lines.range(content, specifier.start(), specifier.end()),
            kind,
        });
        index.modules.len() - 1
    };
    let add_bindings = |index: &mut FileIndex, clause: regex::Match<'_>, module: usize, reexport: bool| {
        for binding in parse_clause(clause.as_str(), clause.start()) {
            index.bindings.push(ImportBinding {
                kind: binding.kind,
                imported: binding.imported,
                imported_range: binding
                    .imported_span
                    .map(|(start, end)| lines.range(content, start, end)),
                local: binding.local,
                module,
                reexport,
            });
        }
    };

    let mut found: Vec<(usize, regex::Captures<'_>, u8)> = Vec::new();
    for caps in IMPORT_FROM.captures_iter(statements) {
        found.push((caps.get(0).map_or(0, |m| m.start()), caps, 0));
    }
    for caps in IMPORT_BARE.captures_iter(statements) {
        found.push((caps.get(0).map_or(0, |m| m.start()), caps, 1));
    }
    for caps in EXPORT_FROM.captures_iter(statements) {
        found.push((caps.get(0).map_or(0, |m| m.start()), caps, 2));
    }
    found.sort_by_key(|(start, _, _)| *start);

    for (_, caps, form) in found {
        match form {
            0 => {
                let (Some(clause), Some(specifier)) = (caps.get(1), caps.get(2)) else { continue };
                let module = push_module(index, specifier, ModuleKind::Import);
                add_bindings(index, clause, module, false);
            }
            1 => {
                let Some(specifier) = caps.get(1) else { continue };
                push_module(index, specifier, ModuleKind::Import);
            }
            _ => {
                let (Some(clause), Some(specifier)) = (caps.get(1), caps.get(2)) else { continue };
                if clause.as_str() == "*" {
                    push_module(index, specifier, ModuleKind::ExportAll);
                } else {
                    let module = push_module(index, specifier, ModuleKind::ReExport);
                    add_bindings(index, clause, module, true);
                }
            }
        }
    }

    for caps in EXPORT_LIST.captures_iter(statements) {
        let (Some(whole), Some(list)) = (caps.get(0), caps.get(1)) else { continue };
        if FROM_KEYWORD.is_match(&statements[whole.end()..]) {
            continue;
        }
        for binding in parse_clause(&format!("{{{}}}", list.as_str()), 0) {
            index.local_exports.push(LocalExport {
                exported: binding.local,
                local: binding.imported,
            });
        }
    }

    for caps in EXPORT_DEFAULT_NAME.captures_iter(statements) {
        let Some(name) = caps.get(1) else { continue };
        if matches!(
            name.as_str(),
            "function" | "class" | "abstract" | "async" | "interface" | "enum"
        ) {
            continue;
        }
        index.local_exports.push(LocalExport {
            local: name.as_str().to_string(),
            exported: "default".to_string(),
        });
    }
}

fn scan_occurrences(content: &str, code: &str, lines: &LineIndex) -> Vec<Occurrence> {
    let bytes = code.as_bytes();
    let mut occurrences = Vec::new();

    for m in IDENTIFIER.find_iter(code) {
        if m.start() > 0 && is_identifier_byte(bytes[m.start() - 1]) {
            continue;
        }

        let dot = previous_non_whitespace(bytes, m.start()).filter(|&p| bytes[p] == b'.');
        let member_access = dot.is_some_and(|p| p == 0 || bytes[p - 1] != b'.');
        let qualifier = dot.filter(|_| member_access).and_then(|p| {
            let end = previous_non_whitespace(bytes, p)? + 1;
            let start = bytes[..end]
                .iter()
                .rposition(|&b| !is_identifier_byte(b))
                .map_or(0, |s| s + 1);
            (start < end && !bytes[start].is_ascii_digit()).then(|| code[start..end].to_string())
        });

        occurrences.push(Occurrence {
            name: m.as_str().to_string(),
            range: lines.range(content, m.start(), m.end()),
            member_access,
            qualifier,
        });
    }

    occurrences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(index: &FileIndex) -> Vec<&str> {
        index.declarations.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_top_level_declarations() {
        let index = scan(
            "export function fnA() {}\n\
             export declare function fnB(): void;\n\
             const local = 1;\n\
             export default class Widget {}\n\
             export type Id = string;\n\
             export interface Shape { area(): number; }\n\
             export const enum Color { Red, Green }\n",
        );
        assert_eq!(
            names(&index),
            vec!["fnA", "fnB", "local", "Widget", "Id", "Shape", "area", "Color", "Red", "Green"]
        );
        let widget = &index.declarations[3];
        assert_eq!(widget.kind, SymbolKind::CLASS);
        assert!(widget.exported && widget.is_default);
        assert!(!index.declarations[2].exported);
        assert_eq!(index.declarations[7].kind, SymbolKind::ENUM);
    }

    #[test]
    fn test_declaration_ranges_are_name_ranges() {
        let index = scan("export function fnA() {}\n");
        assert_eq!(
            index.declarations[0].range,
            Range::new(Position::new(0, 16), Position::new(0, 19))
        );
    }

    #[test]
    fn test_class_members_and_containers() {
        let index = scan(
            "export class Store {\n\
             \x20 private items: string[] = [];\n\
             \x20 constructor() {}\n\
             \x20 add(item: string) {\n\
             \x20   const count = 1;\n\
             \x20 }\n\
             }\n",
        );
        let items = index.declarations.iter().find(|d| d.name == "items").unwrap();
        assert_eq!(items.kind, SymbolKind::PROPERTY);
        assert_eq!(items.container.as_deref(), Some("Store"));
        let add = index.declarations.iter().find(|d| d.name == "add").unwrap();
        assert_eq!(add.kind, SymbolKind::METHOD);
        let ctor = index.declarations.iter().find(|d| d.name == "constructor").unwrap();
        assert_eq!(ctor.kind, SymbolKind::CONSTRUCTOR);
        let count = index.declarations.iter().find(|d| d.name == "count").unwrap();
        assert_eq!(count.container.as_deref(), Some("Store"));
        assert!(index.declarations.iter().all(|d| d.name != "item"));
    }

    #[test]
    fn test_comments_and_strings_are_ignored() {
        let index = scan(
            "// function hidden() {}\n\
             /* class Hidden {} */\n\
             const message = \"function alsoHidden() {}\";\n",
        );
        assert_eq!(names(&index), vec!["message"]);
        assert!(index.occurrences.iter().all(|o| o.name != "alsoHidden"));
    }

    #[test]
    fn test_import_forms() {
        let index = scan(
            "import Def, { a, b as c, type T } from './mod';\n\
             import * as ns from \"../ns\";\n\
             import './side-effect';\n\
             import type { Only } from './types';\n",
        );
        let specifiers: Vec<_> = index.modules.iter().map(|m| m.specifier.as_str()).collect();
        assert_eq!(specifiers, vec!["./mod", "../ns", "./side-effect", "./types"]);

        let bindings: Vec<_> = index
            .bindings
            .iter()
            .map(|b| (b.kind, b.imported.as_str(), b.local.as_str(), b.module))
            .collect();
        assert_eq!(
            bindings,
            vec![
                (BindingKind::Default, "default", "Def", 0),
                (BindingKind::Named, "a", "a", 0),
                (BindingKind::Named, "b", "c", 0),
                (BindingKind::Named, "T", "T", 0),
                (BindingKind::Namespace, "*", "ns", 1),
                (BindingKind::Named, "Only", "Only", 3),
            ]
        );
        assert!(index.declarations.is_empty());
        assert_eq!(
            index.bindings[2].imported_range,
            Some(Range::new(Position::new(0, 17), Position::new(0, 18)))
        );
    }

    #[test]
    fn test_exports() {
        let index = scan(
            "export * from './all';\n\
             export { x as y } from './one';\n\
             const z = 1;\n\
             export { z, z as zz };\n\
             export default z;\n",
        );
        assert_eq!(index.modules[0].kind, ModuleKind::ExportAll);
        assert_eq!(index.modules[1].kind, ModuleKind::ReExport);
        assert_eq!(index.bindings.len(), 1);
        assert!(index.bindings[0].reexport);
        assert_eq!(index.bindings[0].local, "y");
        assert_eq!(
            index.local_exports,
            vec![
                LocalExport { local: "z".into(), exported: "z".into() },
                LocalExport { local: "z".into(), exported: "zz".into() },
                LocalExport { local: "z".into(), exported: "default".into() },
            ]
        );
    }

    #[test]
    fn test_member_access_occurrences() {
        let index = scan("ns.fnA();\nconst spread = [...items];\nfoo().bar;\n");
        let fna = index.occurrences.iter().find(|o| o.name == "fnA").unwrap();
        assert!(fna.member_access);
        assert_eq!(fna.qualifier.as_deref(), Some("ns"));

        let items = index.occurrences.iter().find(|o| o.name == "items").unwrap();
        assert!(!items.member_access);

        let bar = index.occurrences.iter().find(|o| o.name == "bar").unwrap();
        assert!(bar.member_access);
        assert_eq!(bar.qualifier, None);
    }

    #[test]
    fn test_utf16_positions() {
        let index = scan("const s = '😀'; const after = 1;\n");
        let after = index.declarations.iter().find(|d| d.name == "after").unwrap();
        assert_eq!(after.range.start, Position::new(0, 22));
    }

    #[test]
    fn test_problems_do_not_stop_scanning() {
        let index = scan("function broken() {\nconst s = 'open\nexport function ok() {}\n");
        assert!(
            index
                .problems
                .iter()
                .any(|p| p.message == "unterminated string literal")
        );
        assert!(index.problems.iter().any(|p| p.message == "'{' is never closed"));
        assert!(names(&index).contains(&"ok"));
    }
}
