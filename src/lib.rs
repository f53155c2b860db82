//! A minimal static linker for ELF-64 objects targeting the AMD64 System V
//! ABI: parse relocatable objects, resolve symbols across them, lay out
//! non-overlapping memory regions, apply relocations, and write a static
//! `ET_EXEC` executable.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod error;
pub mod format;
pub mod layout;
pub mod library;
pub mod linker;
pub mod parser;
pub mod reader;
pub mod relocation;
pub mod writer;

pub use error::{Error, Result};
pub use linker::{LinkerConfig, LinkerState};

/// Run the full pipeline over already-read input bytes: parse every object,
/// load it into a fresh [`LinkerState`], resolve symbols against `catalog`,
/// allocate memory layout, apply relocations, and write the resulting
/// executable to `config.output_path`.
///
/// `inputs` pairs each object's bytes with an identifier used in
/// diagnostics (typically its source path).
pub fn link(
    config: LinkerConfig,
    inputs: impl IntoIterator<Item = (String, Vec<u8>)>,
    catalog: &library::CatalogSet,
) -> Result<()> {
    let output_path = config.output_path.clone();
    let mut state = LinkerState::new(config);

    for (id, bytes) in inputs {
        let object = parser::parse(id, &bytes)?;
        state.load_object(object)?;
    }

    state.resolve_symbols(catalog)?;
    layout::allocate_layout(&mut state)?;
    relocation::apply_relocations(&mut state)?;
    writer::write_executable(&state, &output_path)?;
    Ok(())
}
