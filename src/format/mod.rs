//! On-disk record layouts and constants for ELF-64, AMD64 System V ABI.
//!
//! Every record here has a fixed byte size on disk: [`ElfHeader`] = 64,
//! [`ProgramHeader`] = 56, [`SectionHeader`] = 64, [`SymbolEntry`] = 24,
//! [`RelaEntry`] = 24. Only the subset of the ABI this linker implements is
//! modeled; unsupported values are rejected by the parser rather than
//! silently passed through, per the 32-bit/big-endian/other-machine
//! Non-goals.

use crate::error::Error;
use crate::reader::ByteReader;
use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// The four magic bytes every ELF file starts with.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Only accepted `EI_CLASS` value: 64-bit objects.
pub const ELFCLASS64: u8 = 2;
/// Only accepted `EI_DATA` value: little-endian.
pub const ELFDATA2LSB: u8 = 1;
/// Only accepted `e_machine` value: AMD64.
pub const EM_X86_64: u16 = 62;
/// Expected input file type: relocatable object.
pub const ET_REL: u16 = 1;
/// Written output file type: executable.
pub const ET_EXEC: u16 = 2;

/// Size in bytes of an on-disk [`ElfHeader`].
pub const ELF_HEADER_SIZE: usize = 64;
/// Size in bytes of an on-disk [`ProgramHeader`].
pub const PROGRAM_HEADER_SIZE: usize = 56;
/// Size in bytes of an on-disk [`SectionHeader`].
pub const SECTION_HEADER_SIZE: usize = 64;
/// Size in bytes of an on-disk [`SymbolEntry`].
pub const SYMBOL_ENTRY_SIZE: usize = 24;
/// Size in bytes of an on-disk [`RelaEntry`].
pub const RELA_ENTRY_SIZE: usize = 24;

/// Special section index meaning "undefined".
pub const SHN_UNDEF: u16 = 0;
/// Special section index meaning "the symbol has an absolute value".
pub const SHN_ABS: u16 = 0xFFF1;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[non_exhaustive]
/// `sh_type`: the contents and semantics of a section.
pub enum SectionType {
    /// Inactive section header; no associated section.
    Null = 0,
    /// Program-defined data (code, initialized data, ...).
    ProgBits = 1,
    /// A symbol table.
    SymTab = 2,
    /// A string table.
    StrTab = 3,
    /// Relocation entries with explicit addends (`Elf64_Rela`).
    Rela = 4,
    /// A symbol hash table.
    Hash = 5,
    /// Dynamic linking information.
    Dynamic = 6,
    /// Auxiliary information that marks the file in some way.
    Note = 7,
    /// Occupies no file space but otherwise resembles `ProgBits`.
    NoBits = 8,
    /// Relocation entries without explicit addends (`Elf64_Rel`).
    Rel = 9,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// `sh_flags`: a section's miscellaneous attribute bitset.
    pub struct SectionFlags: u64 {
        /// Writable during process execution.
        const WRITE = 0x1;
        /// Occupies memory during process execution.
        const ALLOC = 0x2;
        /// Contains executable machine instructions.
        const EXECINSTR = 0x4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// `p_flags`: a segment's load-time permission bitset.
    pub struct SegmentFlags: u32 {
        /// Executable.
        const X = 0x1;
        /// Writable.
        const W = 0x2;
        /// Readable.
        const R = 0x4;
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
/// `STB_*`: a symbol's binding, decoded from the top nibble of `st_info`.
pub enum SymbolBinding {
    /// Not visible outside the object that defines it.
    Local = 0,
    /// Visible to all objects being combined.
    Global = 1,
    /// Like `Global`, but lower precedence: may be overridden by a strong
    /// definition without conflict.
    Weak = 2,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
/// `STT_*`: a symbol's type, decoded from the low nibble of `st_info`.
pub enum SymbolType {
    /// Type not specified.
    NoType = 0,
    /// Data object (variable, array, ...).
    Object = 1,
    /// Function or other executable code.
    Func = 2,
    /// Associated with a section.
    Section = 3,
    /// Name of the source file for this object.
    File = 4,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Hash)]
#[non_exhaustive]
/// `R_X86_64_*`: the relocation types this engine implements. The ABI
/// defines many more; any value not listed here is rejected by the
/// relocation engine with `Error::UnsupportedRelocation` rather than
/// silently skipped.
pub enum RelocationType {
    /// No relocation; writeback is a no-op.
    None = 0,
    /// `S + A`, written as a full 64-bit word.
    Direct64 = 1,
    /// `S + A - P`, a signed 32-bit PC-relative displacement.
    Pc32 = 2,
    /// `S + A - P` absent a PLT (documented degradation, see `spec.md` §9).
    Plt32 = 4,
    /// `S + A`, truncated to an unsigned 32-bit word.
    Direct32 = 10,
    /// `S + A`, truncated to a signed 32-bit word.
    Direct32Signed = 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The 64-byte ELF file header.
pub struct ElfHeader {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl ElfHeader {
    /// Parse and validate the identification plus the rest of the header,
    /// per `spec.md` §4.3 step 1.
    pub fn from_reader(r: &mut ByteReader) -> Result<Self, Error> {
        let magic = r.read_bytes(4)?;
        if magic != ELF_MAGIC {
            return Err(Error::InvalidMagic);
        }
        let class = r.read_u8()?;
        if class != ELFCLASS64 {
            return Err(Error::UnsupportedClass(class));
        }
        let data = r.read_u8()?;
        if data != ELFDATA2LSB {
            return Err(Error::UnsupportedEncoding(data));
        }
        let _ei_version = r.read_u8()?;
        let _ei_osabi = r.read_u8()?;
        let _ei_abiversion = r.read_u8()?;
        r.read_bytes(7)?; // EI_PAD

        let e_type = r.read_u16()?;
        let e_machine = r.read_u16()?;
        if e_machine != EM_X86_64 {
            return Err(Error::UnsupportedMachine(e_machine));
        }
        if e_type != ET_REL {
            return Err(Error::UnsupportedFileType(e_type));
        }
        let e_version = r.read_u32()?;
        let e_entry = r.read_u64()?;
        let e_phoff = r.read_u64()?;
        let e_shoff = r.read_u64()?;
        let e_flags = r.read_u32()?;
        let e_ehsize = r.read_u16()?;
        let e_phentsize = r.read_u16()?;
        let e_phnum = r.read_u16()?;
        let e_shentsize = r.read_u16()?;
        let e_shnum = r.read_u16()?;
        let e_shstrndx = r.read_u16()?;

        Ok(Self {
            e_type,
            e_machine,
            e_version,
            e_entry,
            e_phoff,
            e_shoff,
            e_flags,
            e_ehsize,
            e_phentsize,
            e_phnum,
            e_shentsize,
            e_shnum,
            e_shstrndx,
        })
    }

    /// Serialize an executable header per `spec.md` §4.7 step 1.
    pub fn write_exec(buf: &mut Vec<u8>, entry: u64, phnum: u16) {
        buf.extend_from_slice(&ELF_MAGIC);
        buf.push(ELFCLASS64);
        buf.push(ELFDATA2LSB);
        buf.push(1); // EI_VERSION
        buf.push(0); // EI_OSABI: ELFOSABI_NONE
        buf.push(0); // EI_ABIVERSION
        buf.extend_from_slice(&[0u8; 7]); // EI_PAD
        buf.extend_from_slice(&ET_EXEC.to_le_bytes());
        buf.extend_from_slice(&EM_X86_64.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes()); // e_version
        buf.extend_from_slice(&entry.to_le_bytes());
        buf.extend_from_slice(&(ELF_HEADER_SIZE as u64).to_le_bytes()); // e_phoff
        buf.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        buf.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        buf.extend_from_slice(&(ELF_HEADER_SIZE as u16).to_le_bytes()); // e_ehsize
        buf.extend_from_slice(&(PROGRAM_HEADER_SIZE as u16).to_le_bytes()); // e_phentsize
        buf.extend_from_slice(&phnum.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
        buf.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        buf.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        debug_assert_eq!(buf.len(), ELF_HEADER_SIZE);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A single section header entry, as parsed from the section header table.
pub struct SectionHeader {
    /// Offset of this section's name within the section-name string table.
    pub name_offset: u32,
    /// Resolved name, looked up against `.shstrtab`.
    pub name: String,
    pub sh_type: u32,
    pub flags: SectionFlags,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

impl SectionHeader {
    /// Parse one 64-byte section header entry. Name resolution happens
    /// afterwards, once the section-name string table has been located.
    pub fn from_reader(r: &mut ByteReader) -> Result<Self, Error> {
        let name_offset = r.read_u32()?;
        let sh_type = r.read_u32()?;
        let flags = SectionFlags::from_bits_truncate(r.read_u64()?);
        let addr = r.read_u64()?;
        let offset = r.read_u64()?;
        let size = r.read_u64()?;
        let link = r.read_u32()?;
        let info = r.read_u32()?;
        let addralign = r.read_u64()?;
        let entsize = r.read_u64()?;
        Ok(Self {
            name_offset,
            name: String::new(),
            sh_type,
            flags,
            addr,
            offset,
            size,
            link,
            info,
            addralign,
            entsize,
        })
    }

    /// Whether this section is allocatable (occupies process memory).
    pub fn is_alloc(&self) -> bool {
        self.flags.contains(SectionFlags::ALLOC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A symbol table entry (`Elf64_Sym`).
pub struct SymbolEntry {
    pub name_offset: u32,
    pub name: String,
    pub info: u8,
    pub other: u8,
    pub section_index: u16,
    pub value: u64,
    pub size: u64,
}

impl SymbolEntry {
    /// Parse one 24-byte symbol table entry.
    pub fn from_reader(r: &mut ByteReader) -> Result<Self, Error> {
        let name_offset = r.read_u32()?;
        let info = r.read_u8()?;
        let other = r.read_u8()?;
        let section_index = r.read_u16()?;
        let value = r.read_u64()?;
        let size = r.read_u64()?;
        Ok(Self {
            name_offset,
            name: String::new(),
            info,
            other,
            section_index,
            value,
            size,
        })
    }

    /// `binding = info >> 4`.
    pub fn binding(&self) -> Option<SymbolBinding> {
        SymbolBinding::from_u8(self.info >> 4)
    }

    /// `type = info & 0x0F`.
    pub fn symbol_type(&self) -> Option<SymbolType> {
        SymbolType::from_u8(self.info & 0x0F)
    }

    /// A symbol is undefined iff its section index is `SHN_UNDEF`.
    pub fn is_defined(&self) -> bool {
        self.section_index != SHN_UNDEF
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A RELA relocation entry (`Elf64_Rela`).
pub struct RelaEntry {
    pub offset: u64,
    pub symbol_index: u32,
    pub r#type: u32,
    pub addend: i64,
}

impl RelaEntry {
    /// Parse one 24-byte RELA entry. The packed `info` field decomposes as
    /// `type = info mod 2^32`, `symbol_index = info div 2^32`.
    pub fn from_reader(r: &mut ByteReader) -> Result<Self, Error> {
        let offset = r.read_u64()?;
        let info = r.read_u64()?;
        let addend = r.read_i64()?;
        Ok(Self {
            offset,
            symbol_index: (info >> 32) as u32,
            r#type: (info & 0xFFFF_FFFF) as u32,
            addend,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A program header (`Elf64_Phdr`), describing one loadable segment.
pub struct ProgramHeader {
    pub p_type: u32,
    pub flags: SegmentFlags,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

/// `PT_LOAD`: a loadable segment.
pub const PT_LOAD: u32 = 1;

impl ProgramHeader {
    /// Serialize one 56-byte program header entry.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.p_type.to_le_bytes());
        buf.extend_from_slice(&self.flags.bits().to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.vaddr.to_le_bytes());
        buf.extend_from_slice(&self.paddr.to_le_bytes());
        buf.extend_from_slice(&self.filesz.to_le_bytes());
        buf.extend_from_slice(&self.memsz.to_le_bytes());
        buf.extend_from_slice(&self.align.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_binding_and_type_decode_from_info_byte() {
        // STB_GLOBAL (1) << 4 | STT_FUNC (2)
        let sym = SymbolEntry {
            name_offset: 0,
            name: String::new(),
            info: (1 << 4) | 2,
            other: 0,
            section_index: 1,
            value: 0,
            size: 0,
        };
        assert_eq!(sym.binding(), Some(SymbolBinding::Global));
        assert_eq!(sym.symbol_type(), Some(SymbolType::Func));
        assert!(sym.is_defined());
    }

    #[test]
    fn rela_packs_type_and_symbol_index() {
        // symbol_index = 5, type = R_X86_64_PC32 (2)
        let info: u64 = (5u64 << 32) | 2u64;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u64.to_le_bytes()); // offset
        bytes.extend_from_slice(&info.to_le_bytes());
        bytes.extend_from_slice(&(-4i64).to_le_bytes()); // addend
        let mut r = ByteReader::new(&bytes);
        let rela = RelaEntry::from_reader(&mut r).unwrap();
        assert_eq!(rela.symbol_index, 5);
        assert_eq!(rela.r#type, 2);
        assert_eq!(rela.addend, -4);
    }
}
