//! Linker state, and the symbol resolver that merges per-object symbol
//! tables into one global table with well-defined precedence.
//!
//! Implements `spec.md` §4.4. The whole link is a single [`LinkerState`]
//! value, created per invocation and discarded on any error (§5).

use std::collections::{HashMap, HashSet};

use crate::error::Error;
use crate::format::{SymbolBinding, SHN_UNDEF};
use crate::layout::MemoryRegion;
use crate::library::CatalogSet;
use crate::parser::ElfObject;
use log::{debug, warn};
use typed_builder::TypedBuilder;

/// The options the core reads, per `spec.md` §6: output path, entry symbol
/// name, and base virtual address. Built the way the teacher crate builds
/// its own `Config` — a `TypedBuilder` struct with sensible defaults, so
/// callers only set what they mean to override.
#[derive(Debug, Clone, TypedBuilder)]
pub struct LinkerConfig {
    #[builder(default = "a.out".to_string(), setter(into))]
    /// Output path for the written executable.
    pub output_path: String,
    #[builder(default = "main".to_string(), setter(into))]
    /// Name of the symbol whose resolved address becomes `e_entry`.
    pub entry_symbol: String,
    #[builder(default = 0x400000)]
    /// Base virtual address the first loadable section is placed above.
    pub base_address: u64,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        LinkerConfig::builder().build()
    }
}

/// The resolved form of a symbol kept in the global table. Populated during
/// [`LinkerState::load_object`], mutated once during
/// [`LinkerState::resolve_symbols`], and finalized by
/// [`crate::layout::allocate_layout`].
#[derive(Debug, Clone)]
pub struct GlobalSymbol {
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub binding: SymbolBinding,
    pub symbol_type: Option<crate::format::SymbolType>,
    pub section_index: u16,
    pub defined: bool,
    pub source_object_id: String,
    /// Absolute address, populated after layout. `None` until then; `Some(0)`
    /// for a weak symbol that stayed unresolved, or for a symbol an
    /// external library claims to provide.
    pub resolved_address: Option<u64>,
}

impl GlobalSymbol {
    fn from_entry(entry: &crate::format::SymbolEntry, source_object_id: &str) -> Option<Self> {
        let binding = entry.binding()?;
        Some(Self {
            name: entry.name.clone(),
            value: entry.value,
            size: entry.size,
            binding,
            symbol_type: entry.symbol_type(),
            section_index: entry.section_index,
            defined: entry.is_defined(),
            source_object_id: source_object_id.to_string(),
            resolved_address: None,
        })
    }
}

/// The composite state of one link: loaded objects, the global symbol
/// table, the allocated memory regions, and the address cursor.
pub struct LinkerState {
    pub config: LinkerConfig,
    pub objects: Vec<ElfObject>,
    object_ids: HashSet<String>,
    pub globals: HashMap<String, GlobalSymbol>,
    pub regions: Vec<MemoryRegion>,
    /// Maps `(object_index, section_index)` to an index into `regions`, so
    /// the relocation engine can find the region owning a given section
    /// without objects or regions holding pointers into each other.
    pub region_index: HashMap<(usize, usize), usize>,
    pub base_address: u64,
    pub next_address: u64,
}

impl LinkerState {
    /// Create an empty state for a new link.
    pub fn new(config: LinkerConfig) -> Self {
        let base_address = config.base_address;
        Self {
            config,
            objects: Vec::new(),
            object_ids: HashSet::new(),
            globals: HashMap::new(),
            regions: Vec::new(),
            region_index: HashMap::new(),
            base_address,
            next_address: base_address,
        }
    }

    pub(crate) fn object_index_of(&self, id: &str) -> Option<usize> {
        self.objects.iter().position(|o| o.id == id)
    }

    /// Load one parsed object: append it to the object list and publish
    /// each of its symbols into the global table. Loading the same object
    /// identifier twice is an error.
    pub fn load_object(&mut self, object: ElfObject) -> Result<(), Error> {
        if !self.object_ids.insert(object.id.clone()) {
            return Err(Error::DuplicateObject(object.id.clone()));
        }

        for entry in &object.symbols {
            if entry.name.is_empty() {
                continue;
            }
            let Some(incoming) = GlobalSymbol::from_entry(entry, &object.id) else {
                continue;
            };
            self.publish_symbol(incoming)?;
        }

        debug!("loaded object `{}` ({} symbols)", object.id, object.symbols.len());
        self.objects.push(object);
        Ok(())
    }

    /// Load every object in `objects`, in order.
    pub fn load_all(&mut self, objects: impl IntoIterator<Item = ElfObject>) -> Result<(), Error> {
        for object in objects {
            self.load_object(object)?;
        }
        Ok(())
    }

    /// Apply the full precedence table of `spec.md` §4.4 for merging
    /// `incoming` into the global table under its name.
    fn publish_symbol(&mut self, incoming: GlobalSymbol) -> Result<(), Error> {
        let name = incoming.name.clone();
        let Some(existing) = self.globals.get(&name) else {
            self.globals.insert(name, incoming);
            return Ok(());
        };

        if existing.source_object_id == incoming.source_object_id
            && existing.defined == incoming.defined
            && existing.binding == incoming.binding
            && existing.value == incoming.value
        {
            // Re-publishing the exact same contribution from the same
            // object is a no-op: `publish_symbol(name, s)` followed by
            // `publish_symbol(name, s)` leaves the table unchanged.
            return Ok(());
        }

        match (existing.defined, incoming.defined) {
            (_, false) => {
                // present-and-undefined-incoming: keep the existing entry,
                // whatever it is (defined or itself still undefined).
            }
            (false, true) => {
                self.globals.insert(name, incoming);
            }
            (true, true) => match (existing.binding, incoming.binding) {
                (SymbolBinding::Weak, SymbolBinding::Global) => {
                    self.globals.insert(name, incoming);
                }
                (SymbolBinding::Global, SymbolBinding::Weak) => {
                    // keep existing
                }
                (SymbolBinding::Global, SymbolBinding::Global) => {
                    return Err(Error::MultipleStrongDefinitions(name));
                }
                (SymbolBinding::Weak, SymbolBinding::Weak) => {
                    // first-seen wins
                }
                _ => {
                    // STB_LOCAL symbols do not participate in global
                    // resolution under this precedence table; treat any
                    // remaining pairing as "keep existing" to stay total.
                }
            },
        }
        Ok(())
    }

    /// Confirm resolution state: consult `catalog` for every still-undefined
    /// name, promoting library-provided names to defined placeholders and
    /// defaulting unresolved weak symbols to address zero. Returns an error
    /// naming any symbol that remains undefined and is not weak.
    ///
    /// Idempotent: running this twice leaves the same state, since every
    /// branch below either already terminates in a defined entry or fails
    /// the whole link before a second call could observe it.
    pub fn resolve_symbols(&mut self, catalog: &CatalogSet) -> Result<(), Error> {
        let undefined: Vec<String> = self
            .globals
            .iter()
            .filter(|(_, s)| !s.defined)
            .map(|(name, _)| name.clone())
            .collect();

        let mut library_provided = 0usize;
        let mut weak_defaulted = 0usize;
        let mut still_unresolved = Vec::new();

        for name in undefined {
            let Some(binding) = self.globals.get(&name).map(|s| s.binding) else {
                continue;
            };
            if let Some(lib) = catalog.find(&name) {
                if let Some(sym) = self.globals.get_mut(&name) {
                    sym.defined = true;
                    sym.resolved_address = Some(0);
                }
                debug!("symbol `{name}` provided externally by `{lib}`");
                library_provided += 1;
                continue;
            }
            if binding == SymbolBinding::Weak {
                if let Some(sym) = self.globals.get_mut(&name) {
                    sym.resolved_address = Some(0);
                }
                warn!("weak symbol `{name}` left unresolved, defaulting to address 0");
                weak_defaulted += 1;
                continue;
            }
            still_unresolved.push(name);
        }

        debug!(
            "resolve_symbols: {library_provided} externally provided, {weak_defaulted} weak-defaulted, {} unresolved",
            still_unresolved.len()
        );

        if !still_unresolved.is_empty() {
            still_unresolved.sort();
            return Err(Error::UnresolvedSymbols(still_unresolved));
        }
        Ok(())
    }

    /// Look up the global symbol named `name` by object-local symbol table
    /// index `index` within `object`. Applies no index shift: ELF symbol
    /// tables are 0-indexed and so are Rust slices (`spec.md` §9's
    /// "index-base correction" is a non-issue here, not an off-by-one to
    /// paper over).
    pub fn symbol_by_index<'a>(
        &'a self,
        object: &ElfObject,
        index: u32,
    ) -> Result<&'a GlobalSymbol, Error> {
        let entry = object
            .symbols
            .get(index as usize)
            .ok_or(Error::SymbolIndexOutOfRange(index))?;
        if entry.name.is_empty() {
            // The reserved null symbol table entry at index 0, or a local
            // entry with no name (e.g. STT_SECTION): neither participates
            // in the global table.
            return Err(Error::SymbolIndexOutOfRange(index));
        }
        self.globals
            .get(&entry.name)
            .ok_or(Error::SymbolIndexOutOfRange(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SymbolBinding;

    fn sym(
        name: &str,
        defined: bool,
        binding: SymbolBinding,
        source: &str,
    ) -> GlobalSymbol {
        GlobalSymbol {
            name: name.to_string(),
            value: 0,
            size: 0,
            binding,
            symbol_type: None,
            section_index: if defined { 1 } else { SHN_UNDEF },
            defined,
            source_object_id: source.to_string(),
            resolved_address: None,
        }
    }

    #[test]
    fn undefined_then_defined_promotes() {
        let mut state = LinkerState::new(LinkerConfig::default());
        state
            .publish_symbol(sym("helper", false, SymbolBinding::Global, "a.o"))
            .unwrap();
        assert!(!state.globals["helper"].defined);
        state
            .publish_symbol(sym("helper", true, SymbolBinding::Global, "b.o"))
            .unwrap();
        assert!(state.globals["helper"].defined);
    }

    #[test]
    fn weak_then_global_replaces() {
        let mut state = LinkerState::new(LinkerConfig::default());
        state
            .publish_symbol(sym("x", true, SymbolBinding::Weak, "a.o"))
            .unwrap();
        state
            .publish_symbol(sym("x", true, SymbolBinding::Global, "b.o"))
            .unwrap();
        assert_eq!(state.globals["x"].binding, SymbolBinding::Global);
        assert_eq!(state.globals["x"].source_object_id, "b.o");
    }

    #[test]
    fn global_then_weak_keeps_existing() {
        let mut state = LinkerState::new(LinkerConfig::default());
        state
            .publish_symbol(sym("x", true, SymbolBinding::Global, "a.o"))
            .unwrap();
        state
            .publish_symbol(sym("x", true, SymbolBinding::Weak, "b.o"))
            .unwrap();
        assert_eq!(state.globals["x"].binding, SymbolBinding::Global);
        assert_eq!(state.globals["x"].source_object_id, "a.o");
    }

    #[test]
    fn two_strong_definitions_conflict() {
        let mut state = LinkerState::new(LinkerConfig::default());
        state
            .publish_symbol(sym("main", true, SymbolBinding::Global, "a.o"))
            .unwrap();
        let err = state
            .publish_symbol(sym("main", true, SymbolBinding::Global, "b.o"))
            .unwrap_err();
        assert_eq!(err, Error::MultipleStrongDefinitions("main".to_string()));
    }

    #[test]
    fn two_weak_definitions_first_wins() {
        let mut state = LinkerState::new(LinkerConfig::default());
        state
            .publish_symbol(sym("x", true, SymbolBinding::Weak, "a.o"))
            .unwrap();
        state
            .publish_symbol(sym("x", true, SymbolBinding::Weak, "b.o"))
            .unwrap();
        assert_eq!(state.globals["x"].source_object_id, "a.o");
    }

    #[test]
    fn duplicate_publish_is_idempotent() {
        let mut state = LinkerState::new(LinkerConfig::default());
        let s = sym("x", true, SymbolBinding::Global, "a.o");
        state.publish_symbol(s.clone()).unwrap();
        // Re-publishing the identical contribution from the same object
        // must not be treated as a second strong definition.
        state.publish_symbol(s).unwrap();
        assert_eq!(state.globals["x"].source_object_id, "a.o");
    }

    #[test]
    fn resolve_symbols_is_idempotent() {
        let mut state = LinkerState::new(LinkerConfig::default());
        state
            .publish_symbol(sym("hook", false, SymbolBinding::Weak, "a.o"))
            .unwrap();
        let catalog = CatalogSet::new();
        state.resolve_symbols(&catalog).unwrap();
        let after_first = state.globals["hook"].resolved_address;
        state.resolve_symbols(&catalog).unwrap();
        let after_second = state.globals["hook"].resolved_address;
        assert_eq!(after_first, after_second);
        assert_eq!(after_first, Some(0));
    }

    #[test]
    fn library_provided_symbol_resolves_to_zero() {
        let mut state = LinkerState::new(LinkerConfig::default());
        state
            .publish_symbol(sym("malloc", false, SymbolBinding::Global, "a.o"))
            .unwrap();
        let mut catalog = CatalogSet::new();
        catalog.push(Box::new(crate::library::StaticCatalog::new(
            "libc",
            ["malloc".to_string()],
        )));
        state.resolve_symbols(&catalog).unwrap();
        assert!(state.globals["malloc"].defined);
        assert_eq!(state.globals["malloc"].resolved_address, Some(0));
    }

    #[test]
    fn truly_unresolved_strong_symbol_errors() {
        let mut state = LinkerState::new(LinkerConfig::default());
        state
            .publish_symbol(sym("missing", false, SymbolBinding::Global, "a.o"))
            .unwrap();
        let catalog = CatalogSet::new();
        let err = state.resolve_symbols(&catalog).unwrap_err();
        assert_eq!(
            err,
            Error::UnresolvedSymbols(vec!["missing".to_string()])
        );
    }
}
