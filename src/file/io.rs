//! Low-level byte order and safe reading utilities for PE parsing.
//!
//! This module provides the [`PeIO`] trait for safe, endian-aware access to primitive types
//! in byte slices. It is used by the header parser and by the walkers that read structures
//! out of the mapped region. PE structures are little-endian throughout, so only the
//! little-endian direction is implemented.

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type specific safe reader / writers
///
/// This trait abstracts over reading and writing primitive types in byte slices in a safe
/// and endian-aware way. It is implemented for the integer widths that occur in the PE
/// container.
pub trait PeIO: Sized {
    #[allow(missing_docs)]
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

impl PeIO for u64 {
    type Bytes = [u8; 8];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u64::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u64::to_le_bytes(self)
    }
}

impl PeIO for u32 {
    type Bytes = [u8; 4];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u32::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u32::to_le_bytes(self)
    }
}

impl PeIO for u16 {
    type Bytes = [u8; 2];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u16::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u16::to_le_bytes(self)
    }
}

impl PeIO for u8 {
    type Bytes = [u8; 1];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u8::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u8::to_le_bytes(self)
    }
}

/// Generic method to safely read T in little-endian from a data buffer.
///
/// ## Arguments
/// * 'data' - The data buffer to read from
pub fn read_le<T: PeIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Generic method to safely read T from an offset and in little-endian from a data buffer.
///
/// ## Arguments
/// * 'data'    - The data buffer to read from
/// * 'offset'  - An offset to read from, will be advanced by the amount of bytes read
pub fn read_le_at<T: PeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Generic method to safely write T at an offset in little-endian into a data buffer.
///
/// ## Arguments
/// * 'data'    - The data buffer to write to
/// * 'offset'  - An offset to write at, will be advanced by the amount of bytes written
/// * 'value'   - The value to write
pub fn write_le_at<T: PeIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());

    *offset = end;

    Ok(())
}
