//! Loaded-image handle and the open pipeline.
//!
//! [`PeImage`] is the long-lived result of loading a PE32+ image: the mapped region, the
//! section table, the import and export tables, and the saved optional-header fields. The
//! open pipeline runs in a fixed order — parse the container, map the sections, walk the
//! imports (arming every slot with the trap stub), walk the exports, apply base
//! relocations, downgrade section permissions, close the byte source. Ordering matters:
//! section bytes must be in place before relocation, and relocation must finish before
//! write permission goes away.
//!
//! Any failure along the way unwinds the partially built state through RAII; a handle
//! only exists once every step has succeeded.
//!
//! # Calling into the image
//!
//! Addresses handed out by [`PeImage::lookup_export`] point at code compiled for the
//! Microsoft x64 calling convention. Call them through `extern "win64"` function types,
//! and give [`PeImage::bind_import`] only `extern "win64"` functions; the image will call
//! straight into them.
//!
//! # Examples
//!
//! ```rust,no_run
//! use peload::{PeImage, SymbolQuery};
//! use std::os::raw::c_char;
//!
//! extern "win64" fn host_strlen(s: *const c_char) -> usize {
//!     unsafe { std::ffi::CStr::from_ptr(s) }.to_bytes().len()
//! }
//!
//! let mut image = PeImage::open("plugin.dll")?;
//!
//! let stub: extern "win64" fn(*const c_char) -> usize = host_strlen;
//! let address = std::ptr::NonNull::new(stub as usize as *mut _).unwrap();
//! image.bind_import("msvcrt.dll", SymbolQuery::name("strlen"), address)?;
//!
//! let entry = image.lookup_export(SymbolQuery::name("run"))?;
//! if let Some(run) = entry.address {
//!     let run: extern "win64" fn() -> i32 = unsafe { std::mem::transmute(run.as_ptr()) };
//!     println!("image returned {}", run());
//! }
//! # Ok::<(), peload::Error>(())
//! ```

mod exports;
mod imports;
pub(crate) mod map;
mod protect;
mod reloc;

pub use map::Section;

use std::ffi::CStr;
use std::os::raw::c_void;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use crate::{
    file::ByteSource,
    format::{directory, DataDirectory, OptionalStandard, OptionalWindows, ParsedHeaders},
    Error::InvalidArgument,
    Result,
};

use exports::ExportSymbol;
use imports::ImportModule;
use map::SectionMap;

/// The current version of the [`OpenOptions`] record.
pub const OPTIONS_VERSION: u32 = 1;

/// Version-tagged options for [`PeImage::open_with`].
///
/// The version tag lets callers built against an older record shape fail cleanly instead
/// of being misread.
pub struct OpenOptions {
    /// Must equal [`OPTIONS_VERSION`].
    pub version: u32,
    /// The input to load the image from.
    pub input: OpenInput,
}

impl OpenOptions {
    /// Options for the current version with the given input.
    #[must_use]
    pub fn new(input: OpenInput) -> OpenOptions {
        OpenOptions {
            version: OPTIONS_VERSION,
            input,
        }
    }
}

/// The input selector inside [`OpenOptions`].
pub enum OpenInput {
    /// Read the image from a file on disk.
    File(PathBuf),
    /// Read the image from an owned buffer.
    Buffer(Vec<u8>),
    /// Read the image from a prebuilt byte source, e.g. external host memory created
    /// with [`ByteSource::from_raw_parts`].
    Source(ByteSource),
}

/// Selects an import or export symbol by ordinal, by name, or by both.
///
/// When both are present the ordinal is tried first and the name is the fallback, which
/// is also the cheaper order for images that export by ordinal.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymbolQuery<'a> {
    name: Option<&'a str>,
    ordinal: Option<u32>,
}

impl<'a> SymbolQuery<'a> {
    /// A query matching by name.
    #[must_use]
    pub fn name(name: &'a str) -> SymbolQuery<'a> {
        SymbolQuery {
            name: Some(name),
            ordinal: None,
        }
    }

    /// A query matching by ordinal.
    #[must_use]
    pub fn ordinal(ordinal: u32) -> SymbolQuery<'a> {
        SymbolQuery {
            name: None,
            ordinal: Some(ordinal),
        }
    }

    /// Adds a fallback name to an ordinal query.
    #[must_use]
    pub fn with_name(mut self, name: &'a str) -> SymbolQuery<'a> {
        self.name = Some(name);
        self
    }
}

/// One imported symbol as seen through enumeration.
///
/// The slot itself is not exposed; binding goes exclusively through
/// [`PeImage::bind_import`].
#[derive(Clone, Copy, Debug)]
pub struct Import<'a> {
    /// The symbol's name, absent for imports by ordinal.
    pub name: Option<&'a CStr>,
    /// The import ordinal, absent for imports by name.
    pub ordinal: Option<u16>,
}

/// One exported symbol.
#[derive(Clone, Copy, Debug)]
pub struct Export<'a> {
    /// The symbol's name, absent for unnamed exports.
    pub name: Option<&'a CStr>,
    /// The export ordinal.
    pub ordinal: u32,
    /// The resolved address inside the mapped region; absent when the export's RVA did
    /// not resolve to any section.
    pub address: Option<NonNull<c_void>>,
}

/// A PE32+ image mapped into the current process.
///
/// Created by [`PeImage::open`] and friends; dropping the handle unmaps the region and
/// releases every table. The interior tables are immutable after open — the only mutation
/// the handle supports is writing import slots through [`PeImage::bind_import`].
///
/// A handle is independent of every other handle; several can be opened from different
/// threads. It is *not* internally synchronized: binds race against any thread currently
/// dispatching through the image, so complete all binds before first dispatch.
pub struct PeImage {
    map: SectionMap,
    imports: Vec<ImportModule>,
    exports: Vec<ExportSymbol>,
    standard: OptionalStandard,
    windows: OptionalWindows,
    directories: [DataDirectory; directory::COUNT],
}

impl PeImage {
    /// Loads an image from a file.
    ///
    /// # Errors
    ///
    /// Anything the pipeline can produce: [`crate::Error::FileError`] for I/O problems,
    /// [`crate::Error::Malformed`] / [`crate::Error::NotSupported`] for container
    /// problems, [`crate::Error::Os`] when the host refuses memory operations.
    pub fn open(path: impl AsRef<Path>) -> Result<PeImage> {
        Self::from_source(ByteSource::open_file(path.as_ref())?)
    }

    /// Loads an image from an owned byte buffer.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Empty`] for an empty buffer, otherwise as [`PeImage::open`].
    pub fn from_vec(data: Vec<u8>) -> Result<PeImage> {
        Self::from_source(ByteSource::from_vec(data)?)
    }

    /// Loads an image according to a version-tagged options record.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidArgument`] when the record's version is not
    /// [`OPTIONS_VERSION`], otherwise as [`PeImage::open`].
    pub fn open_with(options: OpenOptions) -> Result<PeImage> {
        if options.version != OPTIONS_VERSION {
            return Err(InvalidArgument("options version mismatch"));
        }

        match options.input {
            OpenInput::File(path) => Self::open(path),
            OpenInput::Buffer(data) => Self::from_vec(data),
            OpenInput::Source(source) => Self::from_source(source),
        }
    }

    /// Runs the load pipeline over an open byte source.
    ///
    /// # Errors
    ///
    /// As [`PeImage::open`]. On error all partially acquired resources are released
    /// before returning.
    pub fn from_source(mut source: ByteSource) -> Result<PeImage> {
        let parsed = ParsedHeaders::parse(&mut source)?;

        let mut map = SectionMap::build(&mut source, parsed.sections)?;

        let imports = imports::walk(&mut map, &parsed.directories[directory::IMPORT_TABLE])?;
        let exports = exports::walk(&map, &parsed.directories[directory::EXPORT_TABLE])?;

        reloc::apply(
            &mut map,
            &parsed.directories[directory::BASE_RELOCATION_TABLE],
            parsed.windows.image_base,
        )?;

        protect::apply(&map)?;

        // Everything lives in the region now; the input is no longer needed.
        source.close();

        Ok(PeImage {
            map,
            imports,
            exports,
            standard: parsed.standard,
            windows: parsed.windows,
            directories: parsed.directories,
        })
    }

    /// Binds a host symbol to one of the image's import slots.
    ///
    /// The module is selected by name; within it the query's ordinal is tried first,
    /// then its name. On a match the slot word is replaced with `address`, and the next
    /// dispatch through the slot calls the host function.
    ///
    /// `address` must be an `extern "win64"` function; the image calls it under that
    /// convention.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidArgument`] when no module or symbol matches.
    pub fn bind_import(
        &mut self,
        module: &str,
        query: SymbolQuery<'_>,
        address: NonNull<c_void>,
    ) -> Result<()> {
        let module = self
            .imports
            .iter()
            .find(|candidate| {
                self.map
                    .cstr_at(candidate.name)
                    .is_ok_and(|name| name.to_bytes() == module.as_bytes())
            })
            .ok_or(InvalidArgument("no import module with that name"))?;

        let mut found = None;
        // Ordinals should be faster, check those first (if present).
        if let Some(ordinal) = query.ordinal {
            found = module
                .functions
                .iter()
                .find(|function| function.ordinal.map(u32::from) == Some(ordinal));
        }
        if found.is_none() {
            if let Some(name) = query.name {
                found = module.functions.iter().find(|function| {
                    function.name.is_some_and(|offset| {
                        self.map
                            .cstr_at(offset)
                            .is_ok_and(|candidate| candidate.to_bytes() == name.as_bytes())
                    })
                });
            }
        }

        let slot = found
            .ok_or(InvalidArgument("no import symbol matching the query"))?
            .slot;

        self.map.write_u64(slot, address.as_ptr() as u64)
    }

    /// Looks up an exported symbol, preferring the query's ordinal over its name.
    ///
    /// The returned record carries the resolved address; it is absent when the export's
    /// address RVA resolved outside every section.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidArgument`] when nothing matches the query.
    pub fn lookup_export(&self, query: SymbolQuery<'_>) -> Result<Export<'_>> {
        let mut found = None;
        // Ordinals should be faster, check those first (if present).
        if let Some(ordinal) = query.ordinal {
            found = self.exports.iter().find(|export| export.ordinal == ordinal);
        }
        if found.is_none() {
            if let Some(name) = query.name {
                found = self.exports.iter().find(|export| {
                    export.name.is_some_and(|offset| {
                        self.map
                            .cstr_at(offset)
                            .is_ok_and(|candidate| candidate.to_bytes() == name.as_bytes())
                    })
                });
            }
        }

        found
            .map(|export| self.export_view(export))
            .ok_or(InvalidArgument("no export symbol matching the query"))
    }

    /// The names of all modules the image imports from, in descriptor order.
    pub fn modules(&self) -> impl Iterator<Item = &CStr> + '_ {
        self.imports
            .iter()
            .map(move |module| self.map.cstr_at(module.name).unwrap_or_default())
    }

    /// The imports of one module, in thunk-array order.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidArgument`] when the image imports no module of that name.
    pub fn imports(&self, module: &str) -> Result<impl Iterator<Item = Import<'_>> + '_> {
        let module = self
            .imports
            .iter()
            .find(|candidate| {
                self.map
                    .cstr_at(candidate.name)
                    .is_ok_and(|name| name.to_bytes() == module.as_bytes())
            })
            .ok_or(InvalidArgument("no import module with that name"))?;

        Ok(module.functions.iter().map(move |function| Import {
            name: function
                .name
                .map(|offset| self.map.cstr_at(offset).unwrap_or_default()),
            ordinal: function.ordinal,
        }))
    }

    /// All exported symbols, one per address-table entry.
    pub fn exports(&self) -> impl Iterator<Item = Export<'_>> + '_ {
        self.exports.iter().map(move |export| self.export_view(export))
    }

    /// The sections of the image, in header-table order.
    pub fn sections(&self) -> impl Iterator<Item = &Section> + '_ {
        self.map.sections().iter()
    }

    /// The image's preferred load address from the optional header.
    #[must_use]
    pub fn image_base(&self) -> u64 {
        self.windows.image_base
    }

    /// The entry point RVA, when the image declares one.
    #[must_use]
    pub fn entry_point(&self) -> Option<u32> {
        (self.standard.address_of_entry_point != 0).then_some(self.standard.address_of_entry_point)
    }

    /// The 16-entry data-directory array. Zeroed entries mean the directory is absent.
    #[must_use]
    pub fn directories(&self) -> &[DataDirectory] {
        &self.directories
    }

    /// Base address of the mapped region.
    #[must_use]
    pub fn region_base(&self) -> NonNull<c_void> {
        self.map.address_of(0)
    }

    /// Size of the mapped region in bytes.
    #[must_use]
    pub fn region_size(&self) -> usize {
        self.map.region_len()
    }

    /// Unmaps the image and releases every table. Equivalent to dropping the handle;
    /// provided so call sites can make the teardown explicit.
    pub fn close(self) {}

    fn export_view(&self, export: &ExportSymbol) -> Export<'_> {
        Export {
            name: export
                .name
                .map(|offset| self.map.cstr_at(offset).unwrap_or_default()),
            ordinal: export.ordinal,
            address: export.address.map(|offset| self.map.address_of(offset)),
        }
    }
}
