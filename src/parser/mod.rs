//! Bytes → [`ElfObject`]: header, sections, symbols, string tables, and the
//! `.rela.text` relocations a single-pass linker needs.
//!
//! Implements `spec.md` §4.3. Never returns a partially-populated object: an
//! error anywhere aborts the whole parse.

use crate::error::Error;
use crate::format::{ElfHeader, RelaEntry, SectionHeader, SectionType, SymbolEntry, SHN_UNDEF};
use crate::reader::ByteReader;

/// One parsed input file, owned exclusively by the [`crate::linker::LinkerState`]
/// once loaded.
#[derive(Debug, Clone)]
pub struct ElfObject {
    /// A human-readable identifier (typically the input path) used in
    /// diagnostics and `DuplicateObject` errors.
    pub id: String,
    pub header: ElfHeader,
    pub sections: Vec<SectionHeader>,
    /// Per-section raw payload, indexed the same as `sections`. `None` for
    /// `SHT_NOBITS` sections, which have no file bytes.
    pub section_data: Vec<Option<Vec<u8>>>,
    pub symbols: Vec<SymbolEntry>,
    /// Relocations filtered to those targeting `.rela.text` (`spec.md` §4.3
    /// step 6); other `.rela.*` sections are deliberately not collected.
    pub relocations: Vec<RelaEntry>,
    /// Index into `sections` of `.text`, if the object defines code that
    /// relocations and layout need to find. `None` for an object with no
    /// code section (e.g. a pure data object).
    pub text_section_index: Option<usize>,
}

impl ElfObject {
    /// Resolve the [`crate::format::SectionHeader`] that owns symbol table
    /// index `idx`'s defining section, if that symbol is defined and its
    /// section index is in range.
    pub fn section_of(&self, section_index: u16) -> Option<&SectionHeader> {
        self.sections.get(section_index as usize)
    }
}

/// Parse a single relocatable object file's bytes into an [`ElfObject`].
///
/// `id` is an opaque label (the source path, typically) carried for
/// diagnostics and duplicate-load detection; it plays no role in parsing.
pub fn parse(id: impl Into<String>, bytes: &[u8]) -> Result<ElfObject, Error> {
    let id = id.into();
    let mut r = ByteReader::new(bytes);
    let header = ElfHeader::from_reader(&mut r)?;

    if header.e_shentsize != 0 && header.e_shentsize as usize != crate::format::SECTION_HEADER_SIZE
    {
        return Err(Error::UnsupportedFeature("non-standard section header size"));
    }

    let shnum = header.e_shnum as usize;
    let mut sections = Vec::with_capacity(shnum);
    r.seek(header.e_shoff as usize);
    for _ in 0..shnum {
        sections.push(SectionHeader::from_reader(&mut r)?);
    }

    if shnum == 0 {
        // Boundary behavior (`spec.md` §8): an object with no sections
        // parses successfully and contributes nothing further.
        return Ok(ElfObject {
            id,
            header,
            sections,
            section_data: Vec::new(),
            symbols: Vec::new(),
            relocations: Vec::new(),
            text_section_index: None,
        });
    }

    let shstrndx = header.e_shstrndx as usize;
    if shstrndx >= shnum {
        return Err(Error::TruncatedSection {
            index: shstrndx,
            offset: 0,
            size: 0,
            file_len: bytes.len(),
        });
    }
    if sections[shstrndx].sh_type != SectionType::StrTab as u32 {
        return Err(Error::UnsupportedFeature("e_shstrndx is not SHT_STRTAB"));
    }

    let shstrtab = read_section_bytes(bytes, &sections[shstrndx], shstrndx)?;
    for section in sections.iter_mut() {
        section.name = read_cstr(&shstrtab, section.name_offset as usize)?;
    }

    let mut section_data = Vec::with_capacity(shnum);
    for (index, section) in sections.iter().enumerate() {
        if section.sh_type == SectionType::NoBits as u32 {
            section_data.push(None);
        } else {
            section_data.push(Some(read_section_bytes(bytes, section, index)?));
        }
    }

    for (index, section) in sections.iter().enumerate() {
        if is_tls_section(section) {
            let _ = index;
            return Err(Error::UnsupportedFeature(
                "thread-local storage sections are not supported",
            ));
        }
    }

    let symtab_index = sections
        .iter()
        .position(|s| s.sh_type == SectionType::SymTab as u32);

    let mut symbols = Vec::new();
    if let Some(symtab_index) = symtab_index {
        let symtab_section = &sections[symtab_index];
        let strtab_index = symtab_section.link as usize;
        let strtab = sections.get(strtab_index).ok_or(Error::UnsupportedFeature(
            "symbol table's sh_link does not reference a valid string table",
        ))?;
        let strtab_bytes = read_section_bytes(bytes, strtab, strtab_index)?;

        let symtab_bytes = section_data[symtab_index]
            .as_ref()
            .ok_or(Error::UnsupportedFeature("SHT_SYMTAB section has no file bytes"))?;
        let count = symtab_bytes.len() / crate::format::SYMBOL_ENTRY_SIZE;
        let mut sr = ByteReader::new(symtab_bytes);
        symbols.reserve(count);
        for _ in 0..count {
            let mut sym = SymbolEntry::from_reader(&mut sr)?;
            sym.name = read_cstr(&strtab_bytes, sym.name_offset as usize)?;
            symbols.push(sym);
        }
    }

    let text_section_index = sections.iter().position(|s| s.name == ".text");

    let mut relocations = Vec::new();
    for (index, section) in sections.iter().enumerate() {
        if section.sh_type == SectionType::Rela as u32 && section.name == ".rela.text" {
            let rela_bytes = section_data[index]
                .as_ref()
                .ok_or(Error::UnsupportedFeature("SHT_RELA section has no file bytes"))?;
            let count = rela_bytes.len() / crate::format::RELA_ENTRY_SIZE;
            let mut rr = ByteReader::new(rela_bytes);
            relocations.reserve(count);
            for _ in 0..count {
                relocations.push(RelaEntry::from_reader(&mut rr)?);
            }
        }
    }

    Ok(ElfObject {
        id,
        header,
        sections,
        section_data,
        symbols,
        relocations,
        text_section_index,
    })
}

fn is_tls_section(section: &SectionHeader) -> bool {
    const SHF_TLS: u64 = 0x400;
    (section.flags.bits() & SHF_TLS) != 0
}

fn read_section_bytes(
    file_bytes: &[u8],
    section: &SectionHeader,
    index: usize,
) -> Result<Vec<u8>, Error> {
    let offset = section.offset as usize;
    let size = section.size as usize;
    let end = offset
        .checked_add(size)
        .filter(|&end| end <= file_bytes.len())
        .ok_or(Error::TruncatedSection {
            index,
            offset: section.offset,
            size: section.size,
            file_len: file_bytes.len(),
        })?;
    Ok(file_bytes[offset..end].to_vec())
}

fn read_cstr(table: &[u8], offset: usize) -> Result<String, Error> {
    if offset > table.len() {
        return Err(Error::MalformedStringTable { offset });
    }
    let rest = &table[offset..];
    match rest.iter().position(|&b| b == 0) {
        Some(end) => Ok(String::from_utf8_lossy(&rest[..end]).into_owned()),
        None => Err(Error::MalformedStringTable { offset }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{SectionType, ELF_MAGIC, ELFCLASS64, ELFDATA2LSB, EM_X86_64, ET_REL};

    /// Build a minimal single-object ET_REL file with one `.text` section,
    /// one GLOBAL FUNC symbol `main`, and no relocations, mirroring
    /// `spec.md` §8 end-to-end scenario 1.
    pub fn build_minimal_object(text: &[u8], symbol_name: &str, binding: u8) -> Vec<u8> {
        // Sections: [0]=NULL [1]=.text [2]=.symtab [3]=.strtab [4]=.shstrtab
        let shstrtab_names = b"\0.text\0.symtab\0.strtab\0.shstrtab\0";
        let strtab = {
            let mut s = vec![0u8];
            s.extend_from_slice(symbol_name.as_bytes());
            s.push(0);
            s
        };

        let mut file = Vec::new();
        file.extend_from_slice(&ELF_MAGIC);
        file.push(ELFCLASS64);
        file.push(ELFDATA2LSB);
        file.push(1);
        file.push(0);
        file.push(0);
        file.extend_from_slice(&[0u8; 7]);
        file.extend_from_slice(&ET_REL.to_le_bytes());
        file.extend_from_slice(&EM_X86_64.to_le_bytes());
        file.extend_from_slice(&1u32.to_le_bytes());
        file.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        file.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        let shoff_patch_index = file.len();
        file.extend_from_slice(&0u64.to_le_bytes()); // e_shoff, patched below
        file.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        file.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        file.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        file.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        file.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
        file.extend_from_slice(&5u16.to_le_bytes()); // e_shnum
        file.extend_from_slice(&4u16.to_le_bytes()); // e_shstrndx
        assert_eq!(file.len(), 64);

        // Place section payloads after the header.
        let text_offset = file.len() as u64;
        file.extend_from_slice(text);

        let symtab_offset = file.len() as u64;
        // null symbol entry
        file.extend_from_slice(&[0u8; 24]);
        // main symbol entry
        file.extend_from_slice(&1u32.to_le_bytes()); // name offset into strtab
        file.push((binding << 4) | 2); // info: binding, STT_FUNC
        file.push(0);
        file.extend_from_slice(&1u16.to_le_bytes()); // section index: .text
        file.extend_from_slice(&0u64.to_le_bytes()); // value
        file.extend_from_slice(&(text.len() as u64).to_le_bytes()); // size
        let symtab_size = 48u64;

        let strtab_offset = file.len() as u64;
        file.extend_from_slice(&strtab);

        let shstrtab_offset = file.len() as u64;
        file.extend_from_slice(shstrtab_names);

        let shoff = file.len() as u64;
        file.extend_from_slice(&[0u8; 64 * 5]);
        file[shoff_patch_index..shoff_patch_index + 8].copy_from_slice(&shoff.to_le_bytes());

        let sh_base = shoff as usize;
        // [0] NULL
        write_section_header(&mut file, sh_base, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0);
        // [1] .text
        write_section_header(
            &mut file,
            sh_base,
            1,
            1,
            SectionType::ProgBits as u32,
            0x6, // ALLOC|EXECINSTR
            0,
            text_offset,
            text.len() as u64,
            0,
            0,
            1,
        );
        // [2] .symtab
        write_section_header(
            &mut file,
            sh_base,
            2,
            7,
            SectionType::SymTab as u32,
            0,
            0,
            symtab_offset,
            symtab_size,
            3,
            1,
            8,
        );
        // [3] .strtab
        write_section_header(
            &mut file,
            sh_base,
            3,
            15,
            SectionType::StrTab as u32,
            0,
            0,
            strtab_offset,
            strtab.len() as u64,
            0,
            0,
            1,
        );
        // [4] .shstrtab
        write_section_header(
            &mut file,
            sh_base,
            4,
            23,
            SectionType::StrTab as u32,
            0,
            0,
            shstrtab_offset,
            shstrtab_names.len() as u64,
            0,
            0,
            1,
        );

        file
    }

    #[allow(clippy::too_many_arguments)]
    fn write_section_header(
        file: &mut [u8],
        sh_base: usize,
        index: usize,
        name_offset: u32,
        sh_type: u32,
        flags: u64,
        addr: u64,
        offset: u64,
        size: u64,
        link: u32,
        info: u32,
        addralign: u64,
    ) {
        let base = sh_base + index * 64;
        file[base..base + 4].copy_from_slice(&name_offset.to_le_bytes());
        file[base + 4..base + 8].copy_from_slice(&sh_type.to_le_bytes());
        file[base + 8..base + 16].copy_from_slice(&flags.to_le_bytes());
        file[base + 16..base + 24].copy_from_slice(&addr.to_le_bytes());
        file[base + 24..base + 32].copy_from_slice(&offset.to_le_bytes());
        file[base + 32..base + 40].copy_from_slice(&size.to_le_bytes());
        file[base + 40..base + 44].copy_from_slice(&link.to_le_bytes());
        file[base + 44..base + 48].copy_from_slice(&info.to_le_bytes());
        file[base + 48..base + 56].copy_from_slice(&addralign.to_le_bytes());
        file[base + 56..base + 64].copy_from_slice(&0u64.to_le_bytes());
    }

    #[test]
    fn parses_minimal_object() {
        let text = [0xB8, 42, 0, 0, 0, 0xC3]; // mov eax, 42; ret (truncated example)
        let bytes = build_minimal_object(&text, "main", 1);
        let obj = parse("test.o", &bytes).unwrap();
        assert_eq!(obj.header.e_type, ET_REL);
        assert_eq!(obj.sections.len(), 5);
        assert_eq!(obj.sections[1].name, ".text");
        assert_eq!(obj.symbols.len(), 2);
        assert_eq!(obj.symbols[1].name, "main");
        assert!(obj.symbols[1].is_defined());
        assert_eq!(obj.symbols[1].binding(), Some(crate::format::SymbolBinding::Global));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_minimal_object(&[0xC3], "main", 1);
        bytes[0] = 0;
        assert_eq!(parse("bad.o", &bytes), Err(Error::InvalidMagic));
    }

    #[test]
    fn shnum_zero_parses_with_no_contributions() {
        let mut file = Vec::new();
        file.extend_from_slice(&ELF_MAGIC);
        file.push(ELFCLASS64);
        file.push(ELFDATA2LSB);
        file.push(1);
        file.push(0);
        file.push(0);
        file.extend_from_slice(&[0u8; 7]);
        file.extend_from_slice(&ET_REL.to_le_bytes());
        file.extend_from_slice(&EM_X86_64.to_le_bytes());
        file.extend_from_slice(&1u32.to_le_bytes());
        file.extend_from_slice(&0u64.to_le_bytes());
        file.extend_from_slice(&0u64.to_le_bytes());
        file.extend_from_slice(&0u64.to_le_bytes());
        file.extend_from_slice(&0u32.to_le_bytes());
        file.extend_from_slice(&64u16.to_le_bytes());
        file.extend_from_slice(&0u16.to_le_bytes());
        file.extend_from_slice(&0u16.to_le_bytes());
        file.extend_from_slice(&64u16.to_le_bytes());
        file.extend_from_slice(&0u16.to_le_bytes()); // e_shnum = 0
        file.extend_from_slice(&0u16.to_le_bytes());

        let obj = parse("empty.o", &file).unwrap();
        assert!(obj.sections.is_empty());
        assert!(obj.symbols.is_empty());
        assert!(obj.relocations.is_empty());
    }
}
