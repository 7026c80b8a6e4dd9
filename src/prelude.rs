//! Convenient re-exports of the most commonly used types and traits.
//!
//! This module provides a curated selection of the most frequently used types from across
//! the library, allowing for convenient glob imports.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use peload::prelude::*;
//!
//! let image = PeImage::open("plugin.dll")?;
//! let export = image.lookup_export(SymbolQuery::name("testFunc"))?;
//! # Ok::<(), peload::Error>(())
//! ```

pub use crate::{
    file::ByteSource,
    format::{DataDirectory, SectionFlags},
    image::{Export, Import, OpenInput, OpenOptions, PeImage, Section, SymbolQuery},
    Error, Result,
};
