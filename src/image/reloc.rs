//! Base relocation processing.
//!
//! The relocation directory is a run of variable-size blocks, each covering one page: an
//! 8-byte header (page RVA + total block size) followed by packed 16-bit entries of
//! `(type << 12) | offset`. The loader applies the difference between a section's actual
//! resident base and its preferred address to every 64-bit fixup target.
//!
//! Only the no-op padding type and the 64-bit absolute fixup are implemented. Any other
//! type aborts the process: skipping it would leave a stale absolute address in a page
//! that is about to become executable.

use crate::{format::DataDirectory, image::map::SectionMap, Result};

/// No-op entry, used to pad blocks to 32-bit alignment.
const ABSOLUTE: u16 = 0;
/// 64-bit fixup: the delta is added to the qword at the target RVA.
const DIR64: u16 = 10;

/// Applies all base relocations against the actual mapped base.
///
/// # Arguments
///
/// * `map` - The resolved section map; fixups are written through it.
/// * `dir` - The BASE_RELOCATION data directory.
/// * `image_base` - The image's preferred load address from the optional header.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] when a block's page RVA resolves outside every
/// section and [`crate::Error::OutOfBounds`] when a fixup target or block header lies
/// outside the region. An absent directory is a no-op. Unknown relocation types abort
/// the process.
pub(crate) fn apply(map: &mut SectionMap, dir: &DataDirectory, image_base: u64) -> Result<()> {
    let Some(start) = map.resolve_dir(dir) else {
        return Ok(());
    };

    let end = start + dir.size as usize;
    let mut cursor = start;

    while cursor < end {
        let page_rva = map.read_u32(cursor)?;
        let block_size = map.read_u32(cursor + 4)? as usize;
        if page_rva == 0 || block_size == 0 {
            break;
        }

        let (section_va, section_offset) = {
            let section = map.section_for_rva(page_rva).ok_or_else(|| {
                malformed_error!("relocation page RVA outside any section - {:#x}", page_rva)
            })?;
            (section.header.virtual_address, section.offset)
        };

        // How far the section landed from where the image expected it.
        let resident = map.region_ptr() as u64 + section_offset as u64;
        let preferred = image_base.wrapping_add(u64::from(section_va));
        let delta = resident.wrapping_sub(preferred);

        let mut entry_offset = 8;
        while entry_offset < block_size {
            let raw = map.read_u16(cursor + entry_offset)?;
            entry_offset += 2;

            // Top 4 bits are the type, bottom 12 the offset within the page.
            let kind = raw >> 12;
            let offset = u32::from(raw & 0x0FFF);

            match kind {
                ABSOLUTE => {}

                DIR64 => {
                    let target_rva = page_rva + offset;
                    let target = section_offset + (target_rva - section_va) as usize;
                    let value = map.read_u64(target)?;
                    map.write_u64(target, value.wrapping_add(delta))?;
                }

                kind => {
                    eprintln!("peload: unknown relocation type: {kind:#X}");
                    std::process::abort();
                }
            }
        }

        // The size in the header also counts the header.
        cursor += block_size;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file::ByteSource,
        format::{SectionFlags, SectionHeader},
    };

    fn section(name: &[u8; 8], rva: u32, raw_offset: u32, raw_size: u32) -> SectionHeader {
        SectionHeader {
            name: *name,
            virtual_size: 0x1000,
            virtual_address: rva,
            size_of_raw_data: raw_size,
            pointer_to_raw_data: raw_offset,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionFlags::MEM_READ | SectionFlags::MEM_WRITE,
        }
    }

    /// A .text section carrying one absolute address at +0x10 and a .reloc section with
    /// one DIR64 entry (plus padding) covering it.
    fn relocatable_map(image_base: u64) -> SectionMap {
        relocatable_map_with_page(image_base, 0x1000)
    }

    fn relocatable_map_with_page(image_base: u64, page_rva: u32) -> SectionMap {
        let mut file = vec![0u8; 0x410];

        // .text raw data at file 0x10: the qword at +0x10 holds image_base + 0x2000.
        let absolute = image_base + 0x2000;
        file[0x20..0x28].copy_from_slice(&absolute.to_le_bytes());

        // .reloc raw data at file 0x210: one block, size 12, DIR64 @ 0x10, pad.
        file[0x210..0x214].copy_from_slice(&page_rva.to_le_bytes());
        file[0x214..0x218].copy_from_slice(&12_u32.to_le_bytes());
        file[0x218..0x21A].copy_from_slice(&((10_u16 << 12) | 0x10).to_le_bytes());
        file[0x21A..0x21C].copy_from_slice(&0_u16.to_le_bytes());

        let headers = vec![
            section(b".text\0\0\0", 0x1000, 0x10, 0x200),
            section(b".reloc\0\0", 0x5000, 0x210, 0x200),
        ];

        let mut source = ByteSource::from_vec(file).unwrap();
        SectionMap::build(&mut source, headers).unwrap()
    }

    #[test]
    fn dir64_entries_get_the_delta() {
        let image_base = 0x1_8000_0000_u64;
        let mut map = relocatable_map(image_base);
        let dir = DataDirectory {
            virtual_address: 0x5000,
            size: 12,
        };

        apply(&mut map, &dir, image_base).unwrap();

        // The fixed-up word must now point at RVA 0x2000 inside the live region.
        let expect = map.region_ptr() as u64 + 0x1000;
        assert_eq!(map.read_u64(0x10).unwrap(), expect);
    }

    #[test]
    fn absent_directory_is_a_noop() {
        let image_base = 0x1_8000_0000_u64;
        let mut map = relocatable_map(image_base);
        let before = map.read_u64(0x10).unwrap();

        apply(&mut map, &DataDirectory::default(), image_base).unwrap();
        assert_eq!(map.read_u64(0x10).unwrap(), before);
    }

    #[test]
    fn zero_header_terminates_the_walk() {
        let image_base = 0x1_8000_0000_u64;
        let mut map = relocatable_map(image_base);
        let before = map.read_u64(0x10).unwrap();

        // The directory claims more data than the one block; the zeroed bytes after it
        // read as a terminator and the walk stops cleanly.
        let dir = DataDirectory {
            virtual_address: 0x5000,
            size: 0x40,
        };
        apply(&mut map, &dir, image_base).unwrap();

        // The delta was applied exactly once.
        let delta = (map.region_ptr() as u64).wrapping_sub(image_base + 0x1000);
        assert_eq!(map.read_u64(0x10).unwrap(), before.wrapping_add(delta));
    }

    #[test]
    fn dangling_page_rva_is_malformed() {
        let image_base = 0x1_8000_0000_u64;
        let mut map = relocatable_map_with_page(image_base, 0x9000);

        let dir = DataDirectory {
            virtual_address: 0x5000,
            size: 12,
        };
        assert!(matches!(
            apply(&mut map, &dir, image_base),
            Err(crate::Error::Malformed { .. })
        ));
    }
}
