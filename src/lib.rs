#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
// Unsafe is confined to the places the problem demands it:
// - 'file/mod.rs' wraps host-owned buffer memory behind a release hook
// - 'image/map.rs' hands out raw addresses into the mapped region
// - 'image/protect.rs' calls mprotect on section ranges

//! # peload
//!
//! A user-space loader for Windows PE32+ images on POSIX hosts. `peload` maps an image's
//! sections into one contiguous anonymous region, arms every import slot with a trap
//! stub, exposes the export table, applies base relocations against the actual load
//! address, and finally downgrades each section to the memory permissions its headers
//! declare. After that the image's code can be called directly, subject to the Microsoft
//! x64 calling convention at every boundary.
//!
//! # Architecture
//!
//! The crate is organized as a pipeline over a handful of small modules:
//!
//! - **Byte source** ([`crate::file`]) - a tagged abstraction over file and in-memory
//!   inputs, consumed by the parser and discarded before the handle is returned
//! - **Container parsing** ([`crate::format`]) - DOS/COFF/optional headers, data
//!   directories, and section headers, tolerant of truncated optional headers
//! - **Image assembly** ([`crate::image`]) - section mapping, import and export walking,
//!   relocation, permission finalization, and the long-lived [`PeImage`] handle
//!
//! # Scope
//!
//! `peload` deliberately does *not* behave like a full Windows loader:
//!
//! - Imports are never resolved automatically; the host binds each one explicitly
//!   through [`PeImage::bind_import`]. Unbound imports abort on first call.
//! - TLS callbacks, `DllMain`, and CRT initialization are never invoked.
//! - Only PE32+ (x86-64) images are accepted, and only base-relocation types 0 and 10
//!   are handled; any other type aborts the load process.
//!
//! # Usage Examples
//!
//! ## Loading and calling an export
//!
//! ```rust,no_run
//! use peload::{PeImage, SymbolQuery};
//! use std::os::raw::c_char;
//!
//! let image = PeImage::open("plugin.dll")?;
//!
//! let export = image.lookup_export(SymbolQuery::name("testFunc"))?;
//! let address = export.address.expect("export did not resolve");
//!
//! // The image's code expects the Microsoft x64 calling convention.
//! let test_func: extern "win64" fn() -> *const c_char =
//!     unsafe { std::mem::transmute(address.as_ptr()) };
//! let message = unsafe { std::ffi::CStr::from_ptr(test_func()) };
//! println!("{}", message.to_string_lossy());
//! # Ok::<(), peload::Error>(())
//! ```
//!
//! ## Binding an import
//!
//! ```rust,no_run
//! use peload::{PeImage, SymbolQuery};
//! use std::os::raw::c_char;
//! use std::ptr::NonNull;
//!
//! extern "win64" fn host_strlen(s: *const c_char) -> usize {
//!     unsafe { std::ffi::CStr::from_ptr(s) }.to_bytes().len()
//! }
//!
//! let mut image = PeImage::open("plugin.dll")?;
//!
//! let stub: extern "win64" fn(*const c_char) -> usize = host_strlen;
//! let address = NonNull::new(stub as usize as *mut _).unwrap();
//! image.bind_import("msvcrt.dll", SymbolQuery::name("strlen"), address)?;
//! # Ok::<(), peload::Error>(())
//! ```
//!
//! ## Loading from memory
//!
//! ```rust,no_run
//! use peload::PeImage;
//!
//! let data = std::fs::read("plugin.dll")?;
//! let image = PeImage::from_vec(data)?;
//!
//! for module in image.modules() {
//!     println!("imports from {}", module.to_string_lossy());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Conditions that would otherwise
//! execute or corrupt memory the loader cannot reason about — a call through an unbound
//! import, an unimplemented relocation type — abort the process instead of returning.
//!
//! # Thread Safety
//!
//! Handles share no mutable state; independent images can be loaded concurrently from
//! different threads. A single handle is not internally synchronized: finish all
//! [`PeImage::bind_import`] calls before any thread dispatches into the image.

#[cfg(not(all(target_arch = "x86_64", unix)))]
compile_error!(
    "peload only supports x86-64 POSIX hosts; the loaded code and the trap stub require the Microsoft x64 ABI"
);

#[macro_use]
pub(crate) mod error;

/// Byte-source abstraction over files and in-memory buffers.
pub mod file;

/// PE32+ container structures and header parsing.
pub mod format;

/// Section mapping, linkage tables, relocation, and the loaded-image handle.
pub mod image;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

pub use error::Error;
pub use file::ByteSource;
pub use image::{
    Export, Import, OpenInput, OpenOptions, PeImage, Section, SymbolQuery, OPTIONS_VERSION,
};

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
