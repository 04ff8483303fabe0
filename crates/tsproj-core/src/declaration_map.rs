//! Declaration maps: source maps from emitted `.d.ts` files back to sources.
//!
//! Only the parts of the source-map format needed for position lookup are
//! decoded: `sources`, `sourceRoot` and the VLQ `mappings` string. Segments
//! are grouped by generated line and sorted by generated column, so a lookup
//! is a binary search within one line.

use crate::error::{ProjectError, Result};
use crate::paths::{normalize_path, resolve_relative};
use dashmap::DashMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tower_lsp_server::ls_types::Position;

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const SOURCE_MAPPING_URL: &str = "//# sourceMappingURL=";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    source_root: Option<String>,
    sources: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    names: Vec<String>,
    mappings: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    generated_column: u32,
    source: u32,
    original_line: u32,
    original_column: u32,
}

/// A position inside an original source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub path: PathBuf,
    pub position: Position,
}

/// A decoded declaration map for one emitted `.d.ts` file.
#[derive(Debug, Clone)]
pub struct DeclarationMap {
    /// The `.d.ts.map` file this map was read from.
    pub map_path: PathBuf,
    /// The `.d.ts` file the map describes.
    pub generated: PathBuf,
    sources: Vec<PathBuf>,
    lines: Vec<Vec<Segment>>,
}

impl DeclarationMap {
    /// Parses source-map JSON read from `map_path`, describing `generated`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::InvalidDeclarationMap`] for unsupported
    /// versions, malformed JSON, or corrupt `mappings`.
    pub fn parse(map_path: &Path, generated: &Path, text: &str) -> Result<Self> {
        let invalid = |reason: String| ProjectError::InvalidDeclarationMap {
            path: map_path.to_path_buf(),
            reason,
        };

        let raw: RawSourceMap =
            serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?;
        if let Some(version) = raw.version
            && version != 3
        {
            return Err(invalid(format!("unsupported source map version {version}")));
        }

        let map_dir = map_path.parent().unwrap_or(Path::new("/"));
        let source_base = match raw.source_root.as_deref() {
            Some(root) if !root.is_empty() => resolve_relative(map_dir, root),
            _ => map_dir.to_path_buf(),
        };
        let sources: Vec<PathBuf> = raw
            .sources
            .iter()
            .map(|s| resolve_relative(&source_base, s))
            .collect();

        let lines = decode_mappings(&raw.mappings).map_err(invalid)?;
        if lines
            .iter()
            .flatten()
            .any(|segment| segment.source as usize >= sources.len())
        {
            return Err(invalid("mapping refers to unknown source".to_string()));
        }

        Ok(Self {
            map_path: normalize_path(map_path),
            generated: normalize_path(generated),
            sources,
            lines,
        })
    }

    /// Locates and reads the map for `generated`.
    ///
    /// Returns `Ok(None)` when the `.d.ts` has no map.
    pub fn load(generated: &Path) -> Result<Option<Self>> {
        let Some(map_path) = locate_map(generated) else {
            return Ok(None);
        };
        let text = std::fs::read_to_string(&map_path)?;
        Self::parse(&map_path, generated, &text).map(Some)
    }

    /// Original source files named by the map.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Maps a position in the `.d.ts` to the original source position.
    ///
    /// Uses the closest mapping segment at or before `position` on the same
    /// line. Returns `None` when the line has no such segment.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsproj_core::DeclarationMap;
    /// use tower_lsp_server::ls_types::Position;
    /// use std::path::Path;
    ///
    /// let map = DeclarationMap::parse(
    ///     Path::new("/repo/a/bin/a.d.ts.map"),
    ///     Path::new("/repo/a/bin/a.d.ts"),
    ///     r#"{"version":3,"sources":["../a.ts"],"names":[],"mappings":"AAAA,wBAAgB"}"#,
    /// )
    /// .unwrap();
    ///
    /// let original = map.original_position(Position::new(0, 24)).unwrap();
    /// assert_eq!(original.path, Path::new("/repo/a/a.ts"));
    /// assert_eq!(original.position, Position::new(0, 16));
    /// ```
    pub fn original_position(&self, position: Position) -> Option<SourcePosition> {
        let segments = self.lines.get(position.line as usize)?;
        let index = segments.partition_point(|s| s.generated_column <= position.character);
        let segment = segments.get(index.checked_sub(1)?)?;
        Some(SourcePosition {
            path: self.sources[segment.source as usize].clone(),
            position: Position::new(segment.original_line, segment.original_column),
        })
    }

    /// Number of decoded mapping segments.
    pub fn segment_count(&self) -> usize {
        self.lines.iter().map(Vec::len).sum()
    }
}

/// Finds the map of a `.d.ts` file.
///
/// Honors a trailing `//# sourceMappingURL=` comment (inline `data:` URLs
/// are not supported) and falls back to the sibling `<file>.map`.
pub fn locate_map(generated: &Path) -> Option<PathBuf> {
    let dir = generated.parent()?;

    if let Ok(text) = std::fs::read_to_string(generated)
        && let Some(url) = text
            .lines()
            .rev()
            .find_map(|line| line.trim().strip_prefix(SOURCE_MAPPING_URL))
    {
        let url = url.trim();
        if url.starts_with("data:") {
            return None;
        }
        let path = resolve_relative(dir, url);
        if path.is_file() {
            return Some(path);
        }
    }

    let mut sibling = generated.as_os_str().to_os_string();
    sibling.push(".map");
    let sibling = PathBuf::from(sibling);
    sibling.is_file().then(|| normalize_path(&sibling))
}

fn decode_vlq(bytes: &[u8], cursor: &mut usize) -> std::result::Result<i64, String> {
    let mut value: i64 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes
            .get(*cursor)
            .ok_or_else(|| "unterminated VLQ value".to_string())?;
        *cursor += 1;
        let digit = BASE64_ALPHABET
            .iter()
            .position(|&c| c == byte)
            .ok_or_else(|| format!("invalid base64 character '{}'", byte as char))?
            as i64;
        if shift > 60 {
            return Err("VLQ value overflow".to_string());
        }
        value |= (digit & 31) << shift;
        shift += 5;
        if digit & 32 == 0 {
            break;
        }
    }
    let negative = value & 1 == 1;
    let magnitude = value >> 1;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Appends the base64 VLQ encoding of `value` to `out`.
pub fn encode_vlq(value: i64, out: &mut String) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = vlq & 31;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 32;
        }
        out.push(BASE64_ALPHABET[digit as usize] as char);
        if vlq == 0 {
            break;
        }
    }
}

fn decode_mappings(mappings: &str) -> std::result::Result<Vec<Vec<Segment>>, String> {
    let mut lines = Vec::new();
    let mut source: i64 = 0;
    let mut original_line: i64 = 0;
    let mut original_column: i64 = 0;

    for line in mappings.split(';') {
        let mut generated_column: i64 = 0;
        let mut segments = Vec::new();

        for field in line.split(',').filter(|f| !f.is_empty()) {
            let bytes = field.as_bytes();
            let mut cursor = 0;
            let mut values = [0i64; 5];
            let mut count = 0;
            while cursor < bytes.len() {
                if count == values.len() {
                    return Err(format!("segment '{field}' has too many fields"));
                }
                values[count] = decode_vlq(bytes, &mut cursor)?;
                count += 1;
            }

            generated_column = advance(generated_column, values[0], field)?;
            match count {
                1 => continue,
                4 | 5 => {
                    source = advance(source, values[1], field)?;
                    original_line = advance(original_line, values[2], field)?;
                    original_column = advance(original_column, values[3], field)?;
                }
                n => return Err(format!("segment '{field}' has {n} fields")),
            }

            segments.push(Segment {
                generated_column: position(generated_column, field)?,
                source: position(source, field)?,
                original_line: position(original_line, field)?,
                original_column: position(original_column, field)?,
            });
        }

        segments.sort_by_key(|s| s.generated_column);
        lines.push(segments);
    }

    Ok(lines)
}

fn advance(total: i64, delta: i64, field: &str) -> std::result::Result<i64, String> {
    total
        .checked_add(delta)
        .ok_or_else(|| format!("segment '{field}' overflows a running total"))
}

/// Narrows a running total to a position; negative or oversized values are
/// rejected rather than wrapped.
fn position(total: i64, field: &str) -> std::result::Result<u32, String> {
    u32::try_from(total).map_err(|_| format!("segment '{field}' decodes to an out-of-range position"))
}

struct CachedMap {
    map: Option<Arc<DeclarationMap>>,
    modified_at: Option<SystemTime>,
}

/// Cache of decoded declaration maps keyed by `.d.ts` path.
///
/// Missing or invalid maps are cached as absent so repeated lookups do not
/// re-read the filesystem; [`DeclarationMapCache::invalidate`] clears them.
#[derive(Default)]
pub struct DeclarationMapCache {
    entries: DashMap<PathBuf, CachedMap>,
}

impl DeclarationMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the map for `generated`, or `None` if it has no usable map.
    pub fn get(&self, generated: &Path) -> Option<Arc<DeclarationMap>> {
        let generated = normalize_path(generated);

        if let Some(cached) = self.entries.get(&generated) {
            let fresh = match (&cached.map, cached.modified_at) {
                (Some(map), Some(at)) => modified(&map.map_path).is_some_and(|m| m <= at),
                (None, _) => true,
                (Some(_), None) => false,
            };
            if fresh {
                return cached.map.clone();
            }
        }

        let map = match DeclarationMap::load(&generated) {
            Ok(map) => map.map(Arc::new),
            Err(e) => {
                tracing::warn!(
                    generated = %generated.display(),
                    error = %e,
                    "ignoring unusable declaration map"
                );
                None
            }
        };
        let modified_at = map.as_ref().and_then(|m| modified(&m.map_path));
        self.entries.insert(
            generated,
            CachedMap {
                map: map.clone(),
                modified_at,
            },
        );
        map
    }

    /// Drops cached entries for a changed `.d.ts` or `.d.ts.map` file.
    pub fn invalidate(&self, changed: &Path) {
        let changed = normalize_path(changed);
        self.entries.retain(|generated, cached| {
            let stale = *generated == changed
                || changed.to_string_lossy().strip_suffix(".map") == generated.to_str()
                || cached.map.as_ref().is_some_and(|m| m.map_path == changed);
            !stale
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn mappings(lines: &[&[[i64; 4]]]) -> String {
        let mut out = String::new();
        let mut prev = [0i64; 4];
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            prev[0] = 0;
            for (j, segment) in line.iter().enumerate() {
                if j > 0 {
                    out.push(',');
                }
                for k in 0..4 {
                    encode_vlq(segment[k] - prev[k], &mut out);
                    prev[k] = segment[k];
                }
            }
        }
        out
    }

    #[test]
    fn test_vlq_known_values() {
        let mut out = String::new();
        encode_vlq(0, &mut out);
        encode_vlq(16, &mut out);
        encode_vlq(-1, &mut out);
        encode_vlq(24, &mut out);
        assert_eq!(out, "AgBDwB");

        let bytes = out.as_bytes();
        let mut cursor = 0;
        let decoded: Vec<i64> = (0..4)
            .map(|_| decode_vlq(bytes, &mut cursor).unwrap())
            .collect();
        assert_eq!(decoded, vec![0, 16, -1, 24]);
    }

    #[test]
    fn test_original_position_multiline() {
        let text = format!(
            r#"{{"version":3,"file":"a.d.ts","sourceRoot":"","sources":["../src/a.ts"],"names":[],"mappings":"{}"}}"#,
            mappings(&[&[[0, 0, 0, 0], [24, 0, 0, 16]], &[], &[[4, 0, 5, 2]]])
        );
        let map = DeclarationMap::parse(
            Path::new("/repo/a/bin/a.d.ts.map"),
            Path::new("/repo/a/bin/a.d.ts"),
            &text,
        )
        .unwrap();

        assert_eq!(map.segment_count(), 3);
        assert_eq!(map.sources(), &[PathBuf::from("/repo/a/src/a.ts")]);

        let exact = map.original_position(Position::new(0, 24)).unwrap();
        assert_eq!(exact.position, Position::new(0, 16));

        let within = map.original_position(Position::new(0, 10)).unwrap();
        assert_eq!(within.position, Position::new(0, 0));

        assert!(map.original_position(Position::new(1, 3)).is_none());
        assert!(map.original_position(Position::new(2, 1)).is_none());
        assert_eq!(
            map.original_position(Position::new(2, 9)).unwrap().position,
            Position::new(5, 2)
        );
        assert!(map.original_position(Position::new(7, 0)).is_none());
    }

    #[test]
    fn test_invalid_maps_rejected() {
        let map_path = Path::new("/repo/a.d.ts.map");
        let dts = Path::new("/repo/a.d.ts");
        assert!(DeclarationMap::parse(map_path, dts, "not json").is_err());
        assert!(
            DeclarationMap::parse(
                map_path,
                dts,
                r#"{"version":2,"sources":[],"mappings":""}"#
            )
            .is_err()
        );
        assert!(
            DeclarationMap::parse(
                map_path,
                dts,
                r#"{"version":3,"sources":["a.ts"],"mappings":"AA!A"}"#
            )
            .is_err()
        );
        assert!(
            DeclarationMap::parse(
                map_path,
                dts,
                r#"{"version":3,"sources":["a.ts"],"mappings":"ACAA"}"#
            )
            .is_err()
        );
    }

    #[test]
    fn test_overflowing_running_total_rejected() {
        let field = "ggggggggggggE";
        let mut cursor = 0;
        assert_eq!(decode_vlq(field.as_bytes(), &mut cursor).unwrap(), 1 << 61);

        let text = format!(
            r#"{{"version":3,"sources":["a.ts"],"mappings":"{}"}}"#,
            [field; 4].join(",")
        );
        let result = DeclarationMap::parse(
            Path::new("/repo/a.d.ts.map"),
            Path::new("/repo/a.d.ts"),
            &text,
        );
        assert!(matches!(result, Err(ProjectError::InvalidDeclarationMap { .. })));
    }

    #[test]
    fn test_out_of_range_column_not_wrapped() {
        let mut mappings = String::new();
        for value in [(1i64 << 32) + 5, 0, 0, 0] {
            encode_vlq(value, &mut mappings);
        }
        let text = format!(r#"{{"version":3,"sources":["a.ts"],"mappings":"{mappings}"}}"#);

        let result = DeclarationMap::parse(
            Path::new("/repo/a.d.ts.map"),
            Path::new("/repo/a.d.ts"),
            &text,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_locate_map_via_comment_and_sibling() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let with_comment = root.join("a.d.ts");
        fs::write(&with_comment, "export {};\n//# sourceMappingURL=maps/a.map\n").unwrap();
        fs::create_dir_all(root.join("maps")).unwrap();
        fs::write(root.join("maps/a.map"), "{}").unwrap();
        assert_eq!(
            locate_map(&with_comment),
            Some(normalize_path(&root.join("maps/a.map")))
        );

        let sibling = root.join("b.d.ts");
        fs::write(&sibling, "export {};\n").unwrap();
        assert_eq!(locate_map(&sibling), None);
        fs::write(root.join("b.d.ts.map"), "{}").unwrap();
        assert_eq!(
            locate_map(&sibling),
            Some(normalize_path(&root.join("b.d.ts.map")))
        );
    }

    #[test]
    fn test_cache_degrades_and_invalidates() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let dts = normalize_path(&root.join("a.d.ts"));
        fs::write(&dts, "export declare function fnA(): void;\n").unwrap();
        fs::write(root.join("a.d.ts.map"), "{ broken").unwrap();

        let cache = DeclarationMapCache::new();
        assert!(cache.get(&dts).is_none());
        assert_eq!(cache.len(), 1);

        fs::write(
            root.join("a.d.ts.map"),
            r#"{"version":3,"sources":["a.ts"],"names":[],"mappings":"AAAA,wBAAgB"}"#,
        )
        .unwrap();
        // Still cached as absent until invalidated.
        assert!(cache.get(&dts).is_none());

        cache.invalidate(&root.join("a.d.ts.map"));
        assert!(cache.is_empty());
        let map = cache.get(&dts).unwrap();
        assert_eq!(map.sources(), &[normalize_path(&root.join("a.ts"))]);
    }
}
