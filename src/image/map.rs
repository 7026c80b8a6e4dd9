//! Contiguous mapping of an image's sections.
//!
//! All sections of an image land in one anonymous private mapping sized to the hull of
//! their virtual address range. Working with a single region keeps RVA arithmetic trivial:
//! a section's resident bytes start at `region + (virtual_address - base_rva)`, and every
//! RVA resolves to a plain offset into the region.
//!
//! The region is created read+write so the pipeline can copy raw data, install import
//! slots, and apply relocations; the protection pass downgrades each section to its
//! declared permissions as the final step.

use std::ffi::CStr;
use std::os::raw::c_void;
use std::ptr::NonNull;

use memmap2::MmapMut;

use crate::{
    file::{io, ByteSource},
    format::{DataDirectory, SectionFlags, SectionHeader},
    Error,
    Error::OutOfBounds,
    Result,
};

/// One section of a loaded image, resident inside the shared region.
///
/// Sections whose `virtualSize` is zero have no resident bytes; their header is kept but
/// `size` stays zero and the offset is meaningless.
#[derive(Debug)]
pub struct Section {
    pub(crate) header: SectionHeader,
    /// Offset of the resident base inside the region.
    pub(crate) offset: usize,
    /// Resident size; zero when the section only exists in the header table.
    pub(crate) size: usize,
}

impl Section {
    /// The section name with its NUL padding stripped.
    #[must_use]
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// The section's RVA.
    #[must_use]
    pub fn virtual_address(&self) -> u32 {
        self.header.virtual_address
    }

    /// The section's size in memory.
    #[must_use]
    pub fn virtual_size(&self) -> u32 {
        self.header.virtual_size
    }

    /// File offset of the section's raw data; zero when the section has no file backing.
    #[must_use]
    pub fn raw_data_offset(&self) -> u32 {
        self.header.pointer_to_raw_data
    }

    /// Size of the section's raw data in the file.
    #[must_use]
    pub fn raw_data_size(&self) -> u32 {
        self.header.size_of_raw_data
    }

    /// The section's characteristic flags.
    #[must_use]
    pub fn characteristics(&self) -> SectionFlags {
        self.header.characteristics
    }

    /// Returns `true` when the section occupies resident memory.
    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.size != 0
    }
}

/// The mapped region and the section records resolved into it.
pub(crate) struct SectionMap {
    region: MmapMut,
    base_rva: u32,
    sections: Vec<Section>,
}

impl SectionMap {
    /// Maps all sections into one anonymous region and copies their raw bytes in.
    ///
    /// The hull runs from the lowest RVA of any resident section to the highest section
    /// end, rounded one page past the end (preserving the sizing the loader has always
    /// produced, which over-allocates a page when the end is already aligned). Sections
    /// without file backing keep the zero fill of the fresh mapping.
    ///
    /// # Arguments
    ///
    /// * `source` - The byte source to copy raw section data from.
    /// * `headers` - The parsed section header table.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Malformed`] when no section occupies memory.
    /// - [`crate::Error::Os`] when the anonymous mapping cannot be created.
    /// - [`crate::Error::FileError`] when raw data reads past the end of the input.
    pub fn build(source: &mut ByteSource, headers: Vec<SectionHeader>) -> Result<SectionMap> {
        let mut start = u64::MAX;
        let mut end = 0_u64;

        for header in &headers {
            if header.virtual_size == 0 {
                continue;
            }
            start = start.min(u64::from(header.virtual_address));
            end = end.max(u64::from(header.virtual_address) + u64::from(header.virtual_size));
        }

        if start == u64::MAX {
            return Err(malformed_error!("image has no resident sections"));
        }

        let end = (end + 0x1000) & !0xFFF;
        let region_size = usize::try_from(end - start)
            .map_err(|_| malformed_error!("section hull too large to map - {} bytes", end - start))?;

        let mut region = MmapMut::map_anon(region_size).map_err(|source| Error::Os {
            syscall: "mmap",
            source,
        })?;

        let base_rva = start as u32;
        let mut sections = Vec::with_capacity(headers.len());

        for header in headers {
            let size = header.virtual_size as usize;
            let offset = if size != 0 {
                (header.virtual_address - base_rva) as usize
            } else {
                0
            };

            // Sections that only exist in memory (like BSS) have no raw pointer and stay
            // zero-filled.
            if size != 0 && header.pointer_to_raw_data != 0 {
                let copy = (header.size_of_raw_data as usize).min(size);
                source.read_full_at(
                    u64::from(header.pointer_to_raw_data),
                    &mut region[offset..offset + copy],
                )?;
            }

            sections.push(Section {
                header,
                offset,
                size,
            });
        }

        Ok(SectionMap {
            region,
            base_rva,
            sections,
        })
    }

    /// All section records, resident or not.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The lowest RVA of any resident section; the region starts here.
    pub fn base_rva(&self) -> u32 {
        self.base_rva
    }

    /// Base address of the mapped region.
    pub fn region_ptr(&self) -> *const u8 {
        self.region.as_ptr()
    }

    /// Size of the mapped region in bytes.
    pub fn region_len(&self) -> usize {
        self.region.len()
    }

    /// Finds the section whose resident range contains `rva`.
    pub fn section_for_rva(&self, rva: u32) -> Option<&Section> {
        self.sections.iter().find(|section| {
            section.header.virtual_address <= rva
                && u64::from(section.header.virtual_address) + section.size as u64 > u64::from(rva)
        })
    }

    /// Resolves an RVA to its offset inside the region. Zero RVAs and RVAs outside every
    /// section resolve to `None`.
    pub fn resolve(&self, rva: u32) -> Option<usize> {
        if rva == 0 {
            return None;
        }

        let section = self.section_for_rva(rva)?;
        Some(section.offset + (rva - section.header.virtual_address) as usize)
    }

    /// Resolves a data directory to its region offset; `None` when the directory is
    /// absent or its RVA lies outside every section.
    pub fn resolve_dir(&self, dir: &DataDirectory) -> Option<usize> {
        if dir.is_absent() {
            return None;
        }

        self.resolve(dir.virtual_address)
    }

    /// Resolves an RVA known to belong to `section` to its region offset.
    pub fn resolve_in(&self, section: &Section, rva: u32) -> usize {
        section.offset + (rva - section.header.virtual_address) as usize
    }

    /// The absolute address of a region offset, for handing out resolved symbols.
    pub fn address_of(&self, offset: usize) -> NonNull<c_void> {
        // The region allocation is never null and offsets are bounds-checked by callers.
        unsafe { NonNull::new_unchecked(self.region.as_ptr().add(offset).cast_mut().cast()) }
    }

    /// A view of `count` bytes at a region offset.
    pub fn bytes_at(&self, offset: usize, count: usize) -> Result<&[u8]> {
        let end = offset.checked_add(count).ok_or(OutOfBounds)?;
        self.region.get(offset..end).ok_or(OutOfBounds)
    }

    /// Reads a `u16` at a region offset.
    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        let mut offset = offset;
        io::read_le_at(&self.region, &mut offset)
    }

    /// Reads a `u32` at a region offset.
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let mut offset = offset;
        io::read_le_at(&self.region, &mut offset)
    }

    /// Reads a `u64` at a region offset.
    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        let mut offset = offset;
        io::read_le_at(&self.region, &mut offset)
    }

    /// Writes a `u64` at a region offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        let mut offset = offset;
        io::write_le_at(&mut self.region, &mut offset, value)
    }

    /// Reads the NUL-terminated string starting at a region offset.
    pub fn cstr_at(&self, offset: usize) -> Result<&CStr> {
        let data = self.region.get(offset..).ok_or(OutOfBounds)?;
        CStr::from_bytes_until_nul(data)
            .map_err(|_| malformed_error!("unterminated string at region offset {:#x}", offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SectionFlags;

    fn header(name: &[u8], rva: u32, vsize: u32, raw_offset: u32, raw_size: u32) -> SectionHeader {
        let mut padded = [0u8; 8];
        padded[..name.len()].copy_from_slice(name);
        SectionHeader {
            name: padded,
            virtual_size: vsize,
            virtual_address: rva,
            size_of_raw_data: raw_size,
            pointer_to_raw_data: raw_offset,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionFlags::MEM_READ,
        }
    }

    #[test]
    fn maps_sections_into_one_region() {
        // 64 bytes of file data: a marker at 0x10 for .text and one at 0x30 for .data.
        let mut file = vec![0u8; 64];
        file[0x10..0x14].copy_from_slice(b"CODE");
        file[0x30..0x34].copy_from_slice(b"DATA");

        let headers = vec![
            header(b".text", 0x1000, 0x800, 0x10, 4),
            header(b".data", 0x3000, 0x100, 0x30, 4),
            header(b".bss", 0x4000, 0x200, 0, 0),
            header(b".empty", 0x9000, 0, 0, 0),
        ];

        let mut source = ByteSource::from_vec(file).unwrap();
        let map = SectionMap::build(&mut source, headers).unwrap();

        assert_eq!(map.base_rva(), 0x1000);
        // Hull 0x1000..0x4200, end rounded up past the page boundary to 0x5000.
        assert_eq!(map.region_len(), 0x4000);

        assert_eq!(map.bytes_at(0, 4).unwrap(), b"CODE");
        assert_eq!(map.bytes_at(0x2000, 4).unwrap(), b"DATA");
        // Unbacked section stays zero-filled.
        assert_eq!(map.bytes_at(0x3000, 4).unwrap(), &[0, 0, 0, 0]);

        assert!(map.sections()[0].is_resident());
        assert!(!map.sections()[3].is_resident());
    }

    #[test]
    fn resolves_rvas_to_offsets() {
        let file = vec![0u8; 64];
        let headers = vec![
            header(b".text", 0x1000, 0x1000, 0, 0),
            header(b".data", 0x2000, 0x100, 0, 0),
        ];

        let mut source = ByteSource::from_vec(file).unwrap();
        let map = SectionMap::build(&mut source, headers).unwrap();

        assert_eq!(map.resolve(0x1000), Some(0));
        assert_eq!(map.resolve(0x1FFF), Some(0xFFF));
        assert_eq!(map.resolve(0x2010), Some(0x1010));

        // Zero never resolves, nor do RVAs outside every section.
        assert_eq!(map.resolve(0), None);
        assert_eq!(map.resolve(0x2100), None);
        assert_eq!(map.resolve(0x8000), None);

        let absent = DataDirectory::default();
        assert_eq!(map.resolve_dir(&absent), None);

        let dir = DataDirectory {
            virtual_address: 0x2000,
            size: 0x10,
        };
        assert_eq!(map.resolve_dir(&dir), Some(0x1000));
    }

    #[test]
    fn typed_access_roundtrip() {
        let file = vec![0u8; 16];
        let headers = vec![header(b".data", 0x1000, 0x100, 0, 0)];

        let mut source = ByteSource::from_vec(file).unwrap();
        let mut map = SectionMap::build(&mut source, headers).unwrap();

        map.write_u64(0x20, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(map.read_u64(0x20).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(map.read_u32(0x20).unwrap(), 0x5566_7788);

        assert!(matches!(
            map.read_u64(map.region_len() - 4),
            Err(OutOfBounds)
        ));
    }

    #[test]
    fn reads_strings_from_the_region() {
        let mut file = vec![0u8; 32];
        file[4..15].copy_from_slice(b"msvcrt.dll\0");

        let headers = vec![header(b".rdata", 0x1000, 0x100, 4, 28)];
        let mut source = ByteSource::from_vec(file).unwrap();
        let map = SectionMap::build(&mut source, headers).unwrap();

        assert_eq!(map.cstr_at(0).unwrap().to_bytes(), b"msvcrt.dll");
        assert!(map.cstr_at(map.region_len()).is_err());
    }

    #[test]
    fn image_without_resident_sections_is_malformed() {
        let file = vec![0u8; 16];
        let headers = vec![header(b".empty", 0x1000, 0, 0, 0)];

        let mut source = ByteSource::from_vec(file).unwrap();
        assert!(matches!(
            SectionMap::build(&mut source, headers),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn raw_data_past_input_end_is_an_io_error() {
        let file = vec![0u8; 16];
        let headers = vec![header(b".text", 0x1000, 0x100, 0x8, 0x100)];

        let mut source = ByteSource::from_vec(file).unwrap();
        assert!(matches!(
            SectionMap::build(&mut source, headers),
            Err(crate::Error::FileError(_))
        ));
    }
}
