//! Minimal `ar`-format archive expansion.
//!
//! The core's contract is "a sequence of object byte streams" (`spec.md`
//! §1); something has to turn a `.a` file into that sequence for a
//! standalone binary to link against static libraries. This reader handles
//! the common-format subset: a magic header followed by fixed 60-byte
//! member headers, each immediately preceding that member's data, padded to
//! an even byte boundary. GNU/BSD long-filename extensions are not
//! implemented; such archives fail with a descriptive error rather than
//! silently misreading member names.

const ARCHIVE_MAGIC: &[u8; 8] = b"!<arch>\n";
const MEMBER_HEADER_SIZE: usize = 60;

/// Whether `bytes` begins with the `ar` magic.
pub fn is_archive(bytes: &[u8]) -> bool {
    bytes.starts_with(ARCHIVE_MAGIC)
}

/// Split an `ar` archive's bytes into `(member_name, member_bytes)` pairs,
/// in archive order, skipping the `/` and `//` symbol-table and
/// long-name-table pseudo-members GNU `ar` emits.
pub fn expand(archive_id: &str, bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, String> {
    if !is_archive(bytes) {
        return Err(format!("`{archive_id}` is not an ar archive"));
    }
    let mut members = Vec::new();
    let mut pos = ARCHIVE_MAGIC.len();

    while pos + MEMBER_HEADER_SIZE <= bytes.len() {
        let header = &bytes[pos..pos + MEMBER_HEADER_SIZE];
        if &header[58..60] != b"`\n" {
            return Err(format!(
                "`{archive_id}`: malformed member header at offset {pos}"
            ));
        }
        let name = String::from_utf8_lossy(&header[0..16])
            .trim_end()
            .to_string();
        let size_field = String::from_utf8_lossy(&header[48..58]);
        let size: usize = size_field
            .trim()
            .parse()
            .map_err(|_| format!("`{archive_id}`: malformed member size at offset {pos}"))?;

        let data_start = pos + MEMBER_HEADER_SIZE;
        let data_end = data_start
            .checked_add(size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| format!("`{archive_id}`: member `{name}` overruns archive"))?;
        let data = bytes[data_start..data_end].to_vec();

        if name != "/" && name != "//" && !name.is_empty() {
            members.push((format!("{archive_id}({name})"), data));
        }

        pos = data_end + (size % 2); // members are padded to an even offset
    }

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = ARCHIVE_MAGIC.to_vec();
        for (name, data) in members {
            let mut header = [0x20u8; MEMBER_HEADER_SIZE];
            header[0..name.len()].copy_from_slice(name.as_bytes());
            let size_str = data.len().to_string();
            header[48..48 + size_str.len()].copy_from_slice(size_str.as_bytes());
            header[58] = b'`';
            header[59] = b'\n';
            out.extend_from_slice(&header);
            out.extend_from_slice(data);
            if data.len() % 2 == 1 {
                out.push(b'\n');
            }
        }
        out
    }

    #[test]
    fn expands_members_in_order() {
        let archive = build_archive(&[("a.o", b"AAAA"), ("b.o", b"BBB")]);
        let members = expand("libfoo.a", &archive).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].0, "libfoo.a(a.o)");
        assert_eq!(members[0].1, b"AAAA");
        assert_eq!(members[1].0, "libfoo.a(b.o)");
        assert_eq!(members[1].1, b"BBB");
    }

    #[test]
    fn rejects_non_archive_bytes() {
        assert!(expand("not-an-archive.a", b"garbage").is_err());
    }
}
