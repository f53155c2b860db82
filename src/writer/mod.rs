//! Serializes a finished link to an ET_EXEC output file.
//!
//! Implements `spec.md` §4.7. Writes header, program header table, and
//! segment bytes with no section header table, matching the "minimum
//! writer" byte layout exactly.

use std::fs;
use std::io::Write;

use crate::error::Error;
use crate::format::{ElfHeader, ProgramHeader, SegmentFlags, ELF_HEADER_SIZE, PROGRAM_HEADER_SIZE, PT_LOAD};
use crate::layout::MemoryRegion;
use crate::linker::LinkerState;
use log::debug;

/// A group of contiguous, identically-permissioned regions destined for one
/// `PT_LOAD` segment.
struct Segment {
    vaddr: u64,
    permissions: SegmentFlags,
    /// Concatenated bytes of every region in the segment except trailing
    /// BSS-equivalents, in address order.
    file_bytes: Vec<u8>,
    /// Total in-memory size, including any BSS-equivalent tail and any
    /// alignment padding between regions.
    memsz: u64,
}

fn group_into_segments(regions: &[MemoryRegion]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut iter = regions.iter().peekable();

    while let Some(first) = iter.next() {
        let vaddr = first.base;
        let permissions = first.permissions;
        let mut file_bytes = first.data.clone();
        let mut memsz = first.size;
        let mut cursor_end = first.base + first.size;

        while let Some(next) = iter.next_if(|r| r.permissions == permissions && r.base >= cursor_end)
        {
            let gap = next.base - cursor_end;
            memsz += gap + next.size;
            file_bytes.extend(std::iter::repeat(0u8).take(gap as usize));
            file_bytes.extend_from_slice(&next.data);
            cursor_end = next.base + next.size;
        }

        // Trailing zero bytes are BSS-equivalent: trimmed from `filesz`,
        // still counted in `memsz`.
        let trimmed = file_bytes
            .iter()
            .rposition(|&b| b != 0)
            .map(|last_nonzero| last_nonzero + 1)
            .unwrap_or(0);
        file_bytes.truncate(trimmed);

        segments.push(Segment {
            vaddr,
            permissions,
            file_bytes,
            memsz,
        });
    }

    segments
}

/// Serialize the finished link in `state` to `path`, returning the entry
/// address written into the header. Removes a partially-written file if any
/// step after creation fails.
pub fn write_executable(state: &LinkerState, path: &str) -> Result<(), Error> {
    let entry = state
        .globals
        .get(&state.config.entry_symbol)
        .and_then(|g| g.resolved_address)
        .ok_or_else(|| Error::MissingEntryPoint(state.config.entry_symbol.clone()))?;

    let mut regions: Vec<MemoryRegion> = state.regions.clone();
    regions.sort_by_key(|r| r.base);
    let segments = group_into_segments(&regions);

    let phnum = segments.len() as u16;
    let header_and_phdrs_size = ELF_HEADER_SIZE + PROGRAM_HEADER_SIZE * segments.len();

    let mut file_offsets = Vec::with_capacity(segments.len());
    let mut cursor = header_and_phdrs_size as u64;
    for segment in &segments {
        let aligned = align_up_page(cursor);
        file_offsets.push(aligned);
        cursor = aligned + segment.file_bytes.len() as u64;
    }

    let mut buf = Vec::with_capacity(cursor as usize);
    ElfHeader::write_exec(&mut buf, entry, phnum);

    for (segment, &offset) in segments.iter().zip(&file_offsets) {
        let program_header = ProgramHeader {
            p_type: PT_LOAD,
            flags: segment.permissions,
            offset,
            vaddr: segment.vaddr,
            paddr: segment.vaddr,
            filesz: segment.file_bytes.len() as u64,
            memsz: segment.memsz,
            align: 0x1000,
        };
        program_header.write(&mut buf);
    }

    for (segment, &offset) in segments.iter().zip(&file_offsets) {
        if (buf.len() as u64) < offset {
            buf.resize(offset as usize, 0);
        }
        buf.extend_from_slice(&segment.file_bytes);
    }

    debug!(
        "writing {} segment(s), entry 0x{:x}, {} total bytes",
        segments.len(),
        entry,
        buf.len()
    );

    if let Err(io_err) = write_and_mark_executable(path, &buf) {
        let _ = fs::remove_file(path);
        return Err(io_err);
    }
    Ok(())
}

fn align_up_page(x: u64) -> u64 {
    const PAGE: u64 = 0x1000;
    (x + PAGE - 1) & !(PAGE - 1)
}

fn write_and_mark_executable(path: &str, bytes: &[u8]) -> Result<(), Error> {
    let mut file = fs::File::create(path)
        .map_err(|e| Error::CannotCreateOutput(path.to_string(), e.to_string()))?;
    file.write_all(bytes)
        .map_err(|e| Error::WriteFailed(e.to_string()))?;
    mark_executable(&file);
    Ok(())
}

#[cfg(unix)]
fn mark_executable(file: &fs::File) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = file.metadata() {
        let mut perms = metadata.permissions();
        perms.set_mode(perms.mode() | 0o111);
        let _ = file.set_permissions(perms);
    }
}

#[cfg(not(unix))]
fn mark_executable(_file: &fs::File) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SegmentFlags;

    fn region(base: u64, size: u64, permissions: SegmentFlags, data: Vec<u8>) -> MemoryRegion {
        MemoryRegion {
            base,
            size,
            permissions,
            data,
            source_object_index: 0,
            source_section_index: 0,
        }
    }

    #[test]
    fn adjacent_same_permission_regions_merge_into_one_segment() {
        let regions = vec![
            region(0x401000, 4, SegmentFlags::R | SegmentFlags::X, vec![1, 2, 3, 4]),
            region(0x401004, 4, SegmentFlags::R | SegmentFlags::X, vec![5, 6, 7, 8]),
        ];
        let segments = group_into_segments(&regions);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].vaddr, 0x401000);
        assert_eq!(segments[0].file_bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(segments[0].memsz, 8);
    }

    #[test]
    fn differing_permissions_form_separate_segments() {
        let regions = vec![
            region(0x401000, 4, SegmentFlags::R | SegmentFlags::X, vec![1, 2, 3, 4]),
            region(0x402000, 4, SegmentFlags::R | SegmentFlags::W, vec![5, 6, 7, 8]),
        ];
        let segments = group_into_segments(&regions);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn trailing_zero_bytes_are_excluded_from_filesz() {
        let regions = vec![region(
            0x403000,
            8,
            SegmentFlags::R | SegmentFlags::W,
            vec![1, 2, 0, 0, 0, 0, 0, 0],
        )];
        let segments = group_into_segments(&regions);
        assert_eq!(segments[0].file_bytes, vec![1, 2]);
        assert_eq!(segments[0].memsz, 8);
    }

    #[test]
    fn missing_entry_symbol_errors() {
        let state = LinkerState::new(crate::linker::LinkerConfig::default());
        let err = write_executable(&state, "/tmp/does-not-matter").unwrap_err();
        assert_eq!(err, Error::MissingEntryPoint("main".to_string()));
    }
}
