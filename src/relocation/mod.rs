//! Patches section bytes using the x86-64 relocation calculus.
//!
//! Implements `spec.md` §4.6. Per the design note in §9, relocation types
//! are a small closed enumeration handled by one exhaustive match rather
//! than a table of function pointers; any type outside that enumeration is
//! a hard error (`Error::UnsupportedRelocation`), never a silent skip.

use num_traits::FromPrimitive;

use crate::error::Error;
use crate::format::RelocationType;
use crate::linker::LinkerState;

/// Apply every relocation of every loaded object in `state`, patching the
/// owning region's backing bytes in place. Relocations within an object
/// write to distinct offsets (enforced by the ELF producer), so processing
/// order is not observable; objects are nonetheless visited in load order
/// for deterministic diagnostics.
pub fn apply_relocations(state: &mut LinkerState) -> Result<(), Error> {
    for object_index in 0..state.objects.len() {
        let object = state.objects[object_index].clone();
        let Some(text_section_index) = object.text_section_index else {
            if !object.relocations.is_empty() {
                return Err(Error::RelocationOffsetOutOfRange {
                    offset: 0,
                    size: 0,
                });
            }
            continue;
        };

        let region_index = *state
            .region_index
            .get(&(object_index, text_section_index))
            .ok_or(Error::RelocationOffsetOutOfRange { offset: 0, size: 0 })?;
        let patch_base = state.regions[region_index].base;

        for rela in &object.relocations {
            apply_one(state, &object, region_index, patch_base, rela)?;
        }
    }
    Ok(())
}

/// Writeback width in bytes for a relocation type. `R_X86_64_NONE` is
/// handled by its callers before this is consulted.
fn writeback_width(reloc_type: RelocationType) -> u64 {
    match reloc_type {
        RelocationType::None => 0,
        RelocationType::Direct64 => 8,
        RelocationType::Pc32
        | RelocationType::Plt32
        | RelocationType::Direct32
        | RelocationType::Direct32Signed => 4,
    }
}

fn apply_one(
    state: &mut LinkerState,
    object: &crate::parser::ElfObject,
    region_index: usize,
    patch_base: u64,
    rela: &crate::format::RelaEntry,
) -> Result<(), Error> {
    let reloc_type = match RelocationType::from_u32(rela.r#type) {
        Some(t) => t,
        None => {
            if rela.symbol_index == 0 && rela.r#type == RelocationType::None as u32 {
                return Ok(());
            }
            return Err(Error::UnsupportedRelocation(rela.r#type));
        }
    };

    if reloc_type == RelocationType::None {
        return Ok(());
    }

    // The whole byte range the writeback touches must land inside the
    // target region, not just its first byte: an offset in the last 1-7
    // bytes of a section must not pass a check that only looks at the
    // start.
    let region_size = state.regions[region_index].size;
    let width = writeback_width(reloc_type);
    {
        let region = &state.regions[region_index];
        let start_addr = region.base.checked_add(rela.offset);
        let in_bounds = start_addr.is_some_and(|s| {
            region.contains(s)
                && s.checked_add(width - 1)
                    .is_some_and(|last| region.contains(last))
        });
        if !in_bounds {
            return Err(Error::RelocationOffsetOutOfRange {
                offset: rela.offset,
                size: region_size,
            });
        }
    }

    // Boundary behavior (`spec.md` §8): the reserved null symbol table
    // entry at index 0 is treated as a no-op, consistent with
    // `R_X86_64_NONE`, rather than `SymbolIndexOutOfRange`.
    if rela.symbol_index == 0 {
        return Ok(());
    }

    let symbol = state.symbol_by_index(object, rela.symbol_index)?;
    let s = symbol
        .resolved_address
        .ok_or(Error::SymbolIndexOutOfRange(rela.symbol_index))?;
    let a = rela.addend;
    let p = patch_base + rela.offset;

    let region = &mut state.regions[region_index];
    let at = rela.offset as usize;

    match reloc_type {
        RelocationType::None => unreachable!("handled above"),
        RelocationType::Direct64 => {
            let value = (s as i64).wrapping_add(a) as u64;
            region.data[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }
        RelocationType::Pc32 | RelocationType::Plt32 => {
            // S + A - (P + 4), computed in signed 64-bit before narrowing,
            // per the design note in `spec.md` §9 (never subtract in 32
            // bits first; that yields silent wraparound).
            let value = (s as i64) + a - (p as i64 + 4);
            if value < i32::MIN as i64 || value > i32::MAX as i64 {
                return Err(Error::NarrowingOverflow(reloc_type, value));
            }
            region.data[at..at + 4].copy_from_slice(&(value as i32).to_le_bytes());
        }
        RelocationType::Direct32 => {
            let value = (s as i64).wrapping_add(a);
            if !(0..=u32::MAX as i64).contains(&value) {
                return Err(Error::NarrowingOverflow(reloc_type, value));
            }
            region.data[at..at + 4].copy_from_slice(&(value as u32).to_le_bytes());
        }
        RelocationType::Direct32Signed => {
            let value = (s as i64).wrapping_add(a);
            if value < i32::MIN as i64 || value > i32::MAX as i64 {
                return Err(Error::NarrowingOverflow(reloc_type, value));
            }
            region.data[at..at + 4].copy_from_slice(&(value as i32).to_le_bytes());
        }
    }
    Ok(())
}
