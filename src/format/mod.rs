//! PE32+ container parsing.
//!
//! This module turns a [`crate::file::ByteSource`] positioned at the start of an image into
//! the set of header records the rest of the pipeline works from: the COFF header, the
//! optional header (standard and windows-specific fields), the 16-entry data-directory
//! array, and the section header table.
//!
//! # Truncated optional headers
//!
//! `sizeOfOptionalHeader` is allowed to be smaller than the full PE32+ layout. The parser
//! reads the optional-header blocks against the declared byte budget and zero-extends
//! whatever the budget cannot cover, so a directory that was cut off simply reads as
//! absent. This mirrors how the Windows loader treats short optional headers and is what
//! makes minimal hand-written images loadable.
//!
//! # Examples
//!
//! ```rust,no_run
//! use peload::{format::ParsedHeaders, ByteSource};
//! use std::path::Path;
//!
//! let mut source = ByteSource::open_file(Path::new("library.dll"))?;
//! let headers = ParsedHeaders::parse(&mut source)?;
//!
//! println!("image base: {:#x}", headers.windows.image_base);
//! println!("{} sections", headers.sections.len());
//! # Ok::<(), peload::Error>(())
//! ```

pub mod headers;

pub use headers::{
    directory, CoffHeader, DataDirectory, DosHeader, ExportDescriptor, ImportDescriptor,
    OptionalStandard, OptionalWindows, SectionFlags, SectionHeader, DOS_MAGIC, PE32_PLUS_MAGIC,
    PE_SIGNATURE,
};

use crate::{file::ByteSource, Error::NotSupported, Result};

/// Everything the header parser extracts from an image, in parse order.
#[derive(Debug)]
pub struct ParsedHeaders {
    /// The PE signature and COFF header.
    pub coff: CoffHeader,
    /// Standard optional-header fields; zero where the optional header was truncated.
    pub standard: OptionalStandard,
    /// Windows-specific optional-header fields; zero where truncated.
    pub windows: OptionalWindows,
    /// The data-directory array. Zeroed entries mean the directory is absent.
    pub directories: [DataDirectory; directory::COUNT],
    /// The section header table.
    pub sections: Vec<SectionHeader>,
}

impl ParsedHeaders {
    /// Parses the container headers from a source positioned at the start of the image.
    ///
    /// # Arguments
    ///
    /// * `source` - The byte source to consume. On success it is left positioned right
    ///   after the section header table.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Malformed`] for a bad DOS magic, a bad PE signature, or a
    ///   `sizeOfOptionalHeader` below 2.
    /// - [`crate::Error::NotSupported`] when the optional-header magic is not PE32+.
    /// - [`crate::Error::FileError`] when the image ends inside a mandatory structure.
    pub fn parse(source: &mut ByteSource) -> Result<ParsedHeaders> {
        let mut dos_bytes = [0u8; DosHeader::SIZE];
        source.read_full(&mut dos_bytes)?;

        let dos = DosHeader::from_bytes(&dos_bytes)?;
        if dos.magic != DOS_MAGIC {
            return Err(malformed_error!("bad DOS magic {:#06x}", dos.magic));
        }

        source.seek(u64::from(dos.pe_offset))?;

        let mut coff_bytes = [0u8; CoffHeader::SIZE];
        source.read_full(&mut coff_bytes)?;

        let coff = CoffHeader::from_bytes(&coff_bytes)?;
        if coff.signature != PE_SIGNATURE {
            return Err(malformed_error!("bad PE signature {:#010x}", coff.signature));
        }
        if coff.size_of_optional_header < 2 {
            return Err(malformed_error!(
                "optional header too small for its magic - {} bytes",
                coff.size_of_optional_header
            ));
        }

        let mut magic_bytes = [0u8; 2];
        source.read_full(&mut magic_bytes)?;
        let magic = u16::from_le_bytes(magic_bytes);
        if magic != PE32_PLUS_MAGIC {
            return Err(NotSupported);
        }

        // Whatever the declared optional-header size does not cover stays zero.
        let mut remaining = coff.size_of_optional_header - 2;

        let mut standard_bytes = [0u8; OptionalStandard::SIZE];
        read_truncated(source, &mut remaining, &mut standard_bytes)?;
        let standard = OptionalStandard::from_bytes(&standard_bytes)?;

        let mut windows_bytes = [0u8; OptionalWindows::SIZE];
        read_truncated(source, &mut remaining, &mut windows_bytes)?;
        let windows = OptionalWindows::from_bytes(&windows_bytes)?;

        let mut directories = [DataDirectory::default(); directory::COUNT];
        for entry in &mut directories {
            if remaining == 0 {
                break;
            }
            let mut entry_bytes = [0u8; DataDirectory::SIZE];
            read_truncated(source, &mut remaining, &mut entry_bytes)?;
            *entry = DataDirectory::from_bytes(&entry_bytes)?;
        }

        // The section headers follow the optional header directly, no pointers involved.
        let mut sections = Vec::with_capacity(coff.number_of_sections as usize);
        for _ in 0..coff.number_of_sections {
            let mut section_bytes = [0u8; SectionHeader::SIZE];
            source.read_full(&mut section_bytes)?;
            sections.push(SectionHeader::from_bytes(&section_bytes)?);
        }

        Ok(ParsedHeaders {
            coff,
            standard,
            windows,
            directories,
            sections,
        })
    }
}

/// Reads as much of `buffer` as the remaining optional-header budget allows.
///
/// The read may also come up short when the file itself ends early; either way the tail of
/// `buffer` keeps its zero fill and the budget shrinks by what actually arrived.
fn read_truncated(source: &mut ByteSource, remaining: &mut u16, buffer: &mut [u8]) -> Result<()> {
    let want = buffer.len().min(*remaining as usize);
    if want == 0 {
        return Ok(());
    }

    let transferred = source.read_partial(&mut buffer[..want])?;
    *remaining -= transferred as u16;

    Ok(())
}
