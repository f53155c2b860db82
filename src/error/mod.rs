//! Closed error taxonomy for the linking pipeline.
//!
//! Every fallible operation in the core either succeeds or returns one of
//! these variants; recovery is never attempted inside the core itself.

use crate::format::RelocationType;

#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone)]
/// An error produced while parsing, resolving, laying out, relocating, or
/// writing an ELF-64/AMD64 link.
pub enum Error {
    // --- parse errors ---
    #[error("not an ELF file: missing magic bytes")]
    InvalidMagic,
    #[error("unsupported ELF class {0} (only ELFCLASS64 is accepted)")]
    UnsupportedClass(u8),
    #[error("unsupported data encoding {0} (only ELFDATA2LSB is accepted)")]
    UnsupportedEncoding(u8),
    #[error("unsupported machine {0} (only EM_X86_64 is accepted)")]
    UnsupportedMachine(u16),
    #[error("unsupported file type {0} (only ET_REL is accepted as input)")]
    UnsupportedFileType(u16),
    #[error("input truncated: needed {needed} bytes at offset {offset}, had {available}")]
    TruncatedInput {
        /// byte offset the read started at
        offset: usize,
        /// bytes requested
        needed: usize,
        /// bytes actually remaining
        available: usize,
    },
    #[error(
        "section {index} truncated: offset {offset} + size {size} exceeds file length {file_len}"
    )]
    TruncatedSection {
        /// section header index
        index: usize,
        offset: u64,
        size: u64,
        file_len: usize,
    },
    #[error("malformed string table: unterminated string at offset {offset}")]
    MalformedStringTable {
        /// offset within the string table
        offset: usize,
    },
    #[error("object carries unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    // --- resolve errors ---
    #[error("multiple strong definitions of symbol `{0}`")]
    MultipleStrongDefinitions(String),
    #[error("unresolved symbols: {}", .0.join(", "))]
    UnresolvedSymbols(Vec<String>),
    #[error("entry point symbol `{0}` is missing")]
    MissingEntryPoint(String),
    #[error("object `{0}` was already loaded")]
    DuplicateObject(String),

    // --- layout errors ---
    #[error("address space overflowed while laying out section {0}")]
    AddressSpaceOverflow(String),
    #[error("section {section} has non-power-of-two alignment {align}")]
    AlignmentImpossible { section: String, align: u64 },

    // --- relocation errors ---
    #[error("unsupported relocation type {0}")]
    UnsupportedRelocation(u32),
    #[error("relocation offset {offset} out of range for section of size {size}")]
    RelocationOffsetOutOfRange { offset: u64, size: u64 },
    #[error("relocation {0:?} overflowed narrowing to its target width with value {1}")]
    NarrowingOverflow(RelocationType, i64),
    #[error("symbol index {0} out of range")]
    SymbolIndexOutOfRange(u32),

    // --- I/O errors ---
    #[error("failed to read input: {0}")]
    ReadFailed(String),
    #[error("failed to write output: {0}")]
    WriteFailed(String),
    #[error("failed to create output file `{0}`: {1}")]
    CannotCreateOutput(String, String),
}

/// Convenience alias for fallible core operations.
pub type Result<T> = std::result::Result<T, Error>;
