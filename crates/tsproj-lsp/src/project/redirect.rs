//! Maps locations in emitted `.d.ts` files back to their sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_lsp_server::ls_types::{Position, Range};
use tsproj_core::paths::is_declaration_file;
use tsproj_core::{ConfigResolver, DeclarationMap, DeclarationMapCache, FileLocation};

/// Redirects `.d.ts` locations through their `.d.ts.map` files.
///
/// A location without a usable map is left where it is.
#[derive(Default)]
pub struct DeclarationMapResolver {
    maps: DeclarationMapCache,
}

impl DeclarationMapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source location for a location inside an emitted declaration file.
    ///
    /// Returns `None` when `location` is not in a `.d.ts` file or the file
    /// has no usable map. A range on one line keeps its width.
    pub fn redirect(&self, location: &FileLocation) -> Option<FileLocation> {
        if !is_declaration_file(&location.path) {
            return None;
        }
        let map = self.maps.get(&location.path)?;
        let redirected = map_range(&map, location.range)?;
        tracing::trace!(from = %location, to = %redirected, "redirected through declaration map");
        Some(redirected)
    }

    /// The redirected location, or `location` unchanged.
    pub fn redirect_or_keep(&self, location: FileLocation) -> FileLocation {
        self.redirect(&location).unwrap_or(location)
    }

    /// Drops cached maps affected by a changed `.d.ts` or `.d.ts.map`.
    pub fn invalidate(&self, changed: &Path) {
        self.maps.invalidate(changed);
    }

    pub fn cached_maps(&self) -> usize {
        self.maps.len()
    }
}

fn map_range(map: &Arc<DeclarationMap>, range: Range) -> Option<FileLocation> {
    let start = map.original_position(range.start)?;
    let width = if range.end.line == range.start.line {
        range.end.character.saturating_sub(range.start.character)
    } else {
        0
    };
    let end = Position::new(start.position.line, start.position.character + width);
    Some(FileLocation::new(start.path, Range::new(start.position, end)))
}

/// Config of the project that owns `source`.
///
/// Used to load the defining project of a redirected declaration.
pub fn defining_config(resolver: &ConfigResolver, source: &Path) -> Option<PathBuf> {
    resolver
        .nearest_config(source)
        .into_iter()
        .find(|entry| entry.claims(source))
        .map(|entry| entry.path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::Fixture;

    fn location(path: PathBuf, line: u32, start: u32, end: u32) -> FileLocation {
        FileLocation::new(path, Range::new(Position::new(line, start), Position::new(line, end)))
    }

    #[test]
    fn test_redirect_maps_to_source() {
        let fixture = Fixture::solution();
        let resolver = DeclarationMapResolver::new();

        let redirected = resolver
            .redirect(&location(fixture.path("a/bin/a.d.ts"), 0, 24, 27))
            .unwrap();
        assert_eq!(redirected, location(fixture.path("a/a.ts"), 0, 16, 19));
        assert_eq!(resolver.cached_maps(), 1);
    }

    #[test]
    fn test_source_locations_are_not_redirected() {
        let fixture = Fixture::solution();
        let resolver = DeclarationMapResolver::new();
        let source = location(fixture.path("a/a.ts"), 0, 16, 19);

        assert!(resolver.redirect(&source).is_none());
        assert_eq!(resolver.redirect_or_keep(source.clone()), source);
    }

    #[test]
    fn test_missing_map_keeps_location() {
        let fixture = Fixture::solution();
        fixture.write("lib/lib.d.ts", "export declare const lib: number;\n");
        let resolver = DeclarationMapResolver::new();
        let dts = location(fixture.path("lib/lib.d.ts"), 0, 21, 24);

        assert_eq!(resolver.redirect_or_keep(dts.clone()), dts);
    }

    #[test]
    fn test_corrupt_map_keeps_location() {
        let fixture = Fixture::solution();
        fixture.write("a/bin/a.d.ts.map", "{ not json");
        let resolver = DeclarationMapResolver::new();
        let dts = location(fixture.path("a/bin/a.d.ts"), 0, 24, 27);

        assert!(resolver.redirect(&dts).is_none());
    }

    #[test]
    fn test_invalidate_rereads_map() {
        let fixture = Fixture::solution();
        let resolver = DeclarationMapResolver::new();
        let dts = location(fixture.path("a/bin/a.d.ts"), 0, 24, 27);
        assert!(resolver.redirect(&dts).is_some());

        fixture.write("a/bin/a.d.ts.map", "{ not json");
        resolver.invalidate(&fixture.path("a/bin/a.d.ts.map"));
        assert!(resolver.redirect(&dts).is_none());
    }

    #[test]
    fn test_defining_config() {
        let fixture = Fixture::solution();
        let resolver = ConfigResolver::new();

        assert_eq!(
            defining_config(&resolver, &fixture.path("a/a.ts")),
            Some(fixture.config("a"))
        );
        assert_eq!(defining_config(&resolver, &fixture.path("user/user.ts")), None);
    }
}
