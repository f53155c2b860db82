//! The library resolver adapter (`spec.md` §4.9).
//!
//! Library discovery — scanning filesystem paths, classifying libc
//! implementations — is deliberately outside the core (`spec.md` §1). The
//! core only consumes a [`LibraryCatalog`]: something that can answer
//! "does any configured library provide this symbol name?" so an
//! undefined-but-externally-provided symbol can be marked resolved instead
//! of failing the link.

use std::collections::HashSet;

/// A source of externally-provided symbol names, queried once per
/// still-undefined name during [`crate::linker::LinkerState::resolve_symbols`].
pub trait LibraryCatalog {
    /// The library's name, used only for diagnostics.
    fn name(&self) -> &str;

    /// Whether this library claims to provide `symbol_name`.
    fn contains_symbol(&self, symbol_name: &str) -> bool;
}

/// A trivial in-memory [`LibraryCatalog`]: a named set of symbols. Stands
/// in for a real filesystem/libc scan so the CLI binary link-and-runs
/// end-to-end without one; a real adapter implements the same trait.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    name: String,
    symbols: HashSet<String>,
}

impl StaticCatalog {
    /// Build a catalog named `name` providing exactly `symbols`.
    pub fn new(name: impl Into<String>, symbols: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            symbols: symbols.into_iter().collect(),
        }
    }
}

impl LibraryCatalog for StaticCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn contains_symbol(&self, symbol_name: &str) -> bool {
        self.symbols.contains(symbol_name)
    }
}

/// An ordered collection of catalogs, queried in order; the resolver stops
/// at the first library claiming a name, the way a real linker searches
/// `-l` arguments left to right.
#[derive(Default)]
pub struct CatalogSet {
    catalogs: Vec<Box<dyn LibraryCatalog>>,
}

impl CatalogSet {
    /// An empty catalog set: no symbol is ever externally provided.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a catalog to the search order.
    pub fn push(&mut self, catalog: Box<dyn LibraryCatalog>) {
        self.catalogs.push(catalog);
    }

    /// Whether any configured catalog provides `symbol_name`, and if so,
    /// which library's name claimed it (for diagnostics).
    pub fn find(&self, symbol_name: &str) -> Option<&str> {
        self.catalogs
            .iter()
            .find(|c| c.contains_symbol(symbol_name))
            .map(|c| c.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_catalog_wins() {
        let mut set = CatalogSet::new();
        set.push(Box::new(StaticCatalog::new(
            "libc",
            ["malloc".to_string(), "printf".to_string()],
        )));
        set.push(Box::new(StaticCatalog::new(
            "libm",
            ["sin".to_string()],
        )));
        assert_eq!(set.find("printf"), Some("libc"));
        assert_eq!(set.find("sin"), Some("libm"));
        assert_eq!(set.find("nonexistent"), None);
    }
}
