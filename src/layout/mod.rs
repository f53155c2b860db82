//! Assigns non-overlapping virtual addresses to loadable sections.
//!
//! Implements `spec.md` §4.5. Every defined global symbol gets a computable
//! absolute address once this stage completes.

use crate::error::Error;
use crate::format::{SectionFlags, SegmentFlags, SHN_ABS};
use crate::linker::LinkerState;
use log::debug;

/// A contiguous, page-aligned virtual address range backing one loaded
/// section.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
    pub permissions: SegmentFlags,
    /// Bytes backing this region: a copy of the section's file payload, or
    /// a zero buffer of length `size` for `SHT_NOBITS` sections. Mutated in
    /// place during relocation.
    pub data: Vec<u8>,
    pub source_object_index: usize,
    pub source_section_index: usize,
}

impl MemoryRegion {
    /// Whether `addr` falls within `[base, base + size)`.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }
}

/// `align_up(x, a) = (x + a - 1) & !(a - 1)` for power-of-two `a`.
fn align_up(x: u64, align: u64) -> Option<u64> {
    if align <= 1 {
        return Some(x);
    }
    let added = x.checked_add(align - 1)?;
    Some(added & !(align - 1))
}

fn permissions_for(flags: SectionFlags) -> SegmentFlags {
    let mut perms = SegmentFlags::R;
    if flags.contains(SectionFlags::WRITE) {
        perms |= SegmentFlags::W;
    }
    if flags.contains(SectionFlags::EXECINSTR) {
        perms |= SegmentFlags::X;
    }
    perms
}

/// Run the layout algorithm of `spec.md` §4.5 over every object currently
/// loaded in `state`, populating `state.regions`, `state.region_index`, and
/// every global symbol's `resolved_address`.
pub fn allocate_layout(state: &mut LinkerState) -> Result<(), Error> {
    let mut cursor = state
        .base_address
        .checked_add(0x1000)
        .ok_or_else(|| Error::AddressSpaceOverflow("<base address>".to_string()))?;

    for object_index in 0..state.objects.len() {
        // Clone the section list up front: we need `state` mutably below to
        // record regions, and object data never changes during layout.
        let sections = state.objects[object_index].sections.clone();
        let section_data = state.objects[object_index].section_data.clone();

        for (section_index, section) in sections.iter().enumerate() {
            if !section.is_alloc() {
                continue;
            }

            let align = if section.addralign == 0 {
                1
            } else {
                section.addralign
            };
            if !align.is_power_of_two() {
                return Err(Error::AlignmentImpossible {
                    section: section.name.clone(),
                    align,
                });
            }

            let aligned = align_up(cursor, align)
                .ok_or_else(|| Error::AddressSpaceOverflow(section.name.clone()))?;

            let data = match &section_data[section_index] {
                Some(bytes) => bytes.clone(),
                None => vec![0u8; section.size as usize],
            };

            let region = MemoryRegion {
                base: aligned,
                size: section.size,
                permissions: permissions_for(section.flags),
                data,
                source_object_index: object_index,
                source_section_index: section_index,
            };

            let region_index = state.regions.len();
            state.regions.push(region);
            state
                .region_index
                .insert((object_index, section_index), region_index);

            cursor = aligned
                .checked_add(section.size)
                .ok_or_else(|| Error::AddressSpaceOverflow(section.name.clone()))?;
        }
    }
    state.next_address = cursor;

    debug!(
        "laid out {} region(s), next free address 0x{:x}",
        state.regions.len(),
        state.next_address
    );

    resolve_symbol_addresses(state)?;
    check_regions_disjoint(state);
    Ok(())
}

fn resolve_symbol_addresses(state: &mut LinkerState) -> Result<(), Error> {
    let names: Vec<String> = state.globals.keys().cloned().collect();
    for name in names {
        let Some(global) = state.globals.get(&name) else {
            continue;
        };
        if !global.defined {
            continue;
        }
        if global.section_index == SHN_ABS {
            let value = global.value;
            if let Some(sym) = state.globals.get_mut(&name) {
                sym.resolved_address = Some(value);
            }
            continue;
        }
        if global.resolved_address.is_some() {
            // Weak-but-unresolved placeholders from library consultation
            // already carry `resolved_address = 0`; leave them alone.
            continue;
        }
        let Some(object_index) = state.object_index_of(&global.source_object_id) else {
            continue;
        };
        // A defined symbol whose section index doesn't map to an allocated
        // region is one tied to a non-`SHF_ALLOC` section (e.g. `.symtab`,
        // `.comment`, debug sections) rather than a malformed input. Its
        // address is simply never needed: leave `resolved_address` unset
        // and let whatever actually needs it later (relocation lookup, the
        // entry-point check) report the error, instead of failing the
        // whole link here for a symbol nothing may reference.
        let Some(&region_index) = state
            .region_index
            .get(&(object_index, global.section_index as usize))
        else {
            continue;
        };
        let region = &state.regions[region_index];
        let address = region.base + global.value;
        if let Some(sym) = state.globals.get_mut(&name) {
            sym.resolved_address = Some(address);
        }
    }
    Ok(())
}

fn check_regions_disjoint(state: &LinkerState) {
    for (i, a) in state.regions.iter().enumerate() {
        for b in state.regions.iter().skip(i + 1) {
            let overlap = a.base < b.base + b.size && b.base < a.base + a.size;
            debug_assert!(!overlap, "layout produced overlapping regions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_next_multiple() {
        assert_eq!(align_up(0x1001, 0x1000), Some(0x2000));
        assert_eq!(align_up(0x1000, 0x1000), Some(0x1000));
        assert_eq!(align_up(5, 1), Some(5));
    }

    #[test]
    fn align_up_overflow_is_none() {
        assert_eq!(align_up(u64::MAX, 0x1000), None);
    }

    #[test]
    fn symbol_in_non_allocated_section_is_skipped_not_an_error() {
        use crate::linker::{GlobalSymbol, LinkerConfig};
        use crate::parser::ElfObject;

        let mut state = LinkerState::new(LinkerConfig::default());
        state.objects.push(ElfObject {
            id: "a.o".to_string(),
            header: crate::format::ElfHeader {
                e_type: crate::format::ET_REL,
                e_machine: crate::format::EM_X86_64,
                e_version: 1,
                e_entry: 0,
                e_phoff: 0,
                e_shoff: 0,
                e_flags: 0,
                e_ehsize: 64,
                e_phentsize: 0,
                e_phnum: 0,
                e_shentsize: 64,
                e_shnum: 0,
                e_shstrndx: 0,
            },
            sections: Vec::new(),
            section_data: Vec::new(),
            symbols: Vec::new(),
            relocations: Vec::new(),
            text_section_index: None,
        });
        // No region was ever recorded for (object 0, section 3): this
        // mirrors a symbol defined relative to a non-`SHF_ALLOC` section
        // such as `.comment`.
        state.globals.insert(
            "build_id".to_string(),
            GlobalSymbol {
                name: "build_id".to_string(),
                value: 0,
                size: 0,
                binding: crate::format::SymbolBinding::Global,
                symbol_type: None,
                section_index: 3,
                defined: true,
                source_object_id: "a.o".to_string(),
                resolved_address: None,
            },
        );

        resolve_symbol_addresses(&mut state).unwrap();
        assert_eq!(state.globals["build_id"].resolved_address, None);
    }
}
