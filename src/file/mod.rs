//! Byte-source abstraction over the inputs an image can be loaded from.
//!
//! The loader consumes its input strictly through [`ByteSource`], a tagged sum over the two
//! supported providers: a file on disk (streamed through seek + read) and a caller-supplied
//! byte buffer. The source only lives for the duration of the open pipeline; once every
//! segment has been read it is closed, and the loaded image no longer references it.
//!
//! # Data Sources
//!
//! - **Files** — opened read-only and with `O_NOFOLLOW`, so a symbolic link at the final
//!   path component is refused rather than followed.
//! - **Owned buffers** — a `Vec<u8>` handed over to the source.
//! - **External buffers** — a raw pointer + length owned by the host, together with an
//!   optional release hook that runs exactly once when the source is closed (or dropped).
//!
//! # Examples
//!
//! ```rust,no_run
//! use peload::ByteSource;
//! use std::path::Path;
//!
//! let mut source = ByteSource::open_file(Path::new("library.dll"))?;
//!
//! let mut magic = [0u8; 2];
//! source.read_full(&mut magic)?;
//! assert_eq!(&magic, b"MZ");
//!
//! source.close();
//! # Ok::<(), peload::Error>(())
//! ```

pub mod io;

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr::NonNull;

use crate::{Error, Error::Empty, Error::InvalidArgument, Result};

/// A release hook for externally owned buffer memory.
///
/// Invoked exactly once when the source is closed or dropped. The host's `userdata` style
/// context is captured by the closure itself.
pub type ReleaseFn = Box<dyn FnOnce()>;

/// Constructs the error returned for operations on a closed source.
fn closed() -> Error {
    Error::FileError(std::io::Error::from_raw_os_error(libc::EBADF))
}

/// The input provider an image is parsed from.
///
/// A three-state tagged sum: an open file, an open buffer, or closed. All read operations
/// on the closed state fail with an I/O error; [`ByteSource::close`] is idempotent.
pub enum ByteSource {
    /// An open file descriptor, read through seek + read.
    File(fs::File),
    /// An in-memory byte buffer with a read cursor.
    Buffer(BufferSource),
    /// The terminal state; all reads fail.
    Closed,
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ByteSource::File(file) => f.debug_tuple("File").field(file).finish(),
            ByteSource::Buffer(buffer) => f.debug_tuple("Buffer").field(buffer).finish(),
            ByteSource::Closed => write!(f, "Closed"),
        }
    }
}

impl ByteSource {
    /// Opens the named file for reading.
    ///
    /// The open refuses to follow a symbolic link at the final path component
    /// (`O_NOFOLLOW`); loading through a link would let the link's owner swap the image
    /// after the caller vetted the path.
    ///
    /// # Arguments
    ///
    /// * `path` - The file to open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the file cannot be opened.
    pub fn open_file(path: &Path) -> Result<ByteSource> {
        let file = fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOFOLLOW)
            .open(path)?;

        Ok(ByteSource::File(file))
    }

    /// Creates a source over an owned byte buffer.
    ///
    /// # Arguments
    ///
    /// * `data` - The bytes of the image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] when the buffer has no bytes.
    pub fn from_vec(data: Vec<u8>) -> Result<ByteSource> {
        if data.is_empty() {
            return Err(Empty);
        }

        Ok(ByteSource::Buffer(BufferSource {
            data: BufferData::Owned(data),
            cursor: 0,
        }))
    }

    /// Creates a source over memory owned by the host.
    ///
    /// The optional `release` hook is invoked exactly once, when the source is closed or
    /// dropped, and never before the last read. Context the hook needs travels inside the
    /// closure.
    ///
    /// # Arguments
    ///
    /// * `ptr` - The start of the buffer.
    /// * `len` - The length of the buffer in bytes.
    /// * `release` - Hook to run once the loader is done with the memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when `ptr` is null, [`Error::Empty`] when `len`
    /// is zero.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` readable bytes that stay valid and unmodified until the
    /// release hook has run.
    pub unsafe fn from_raw_parts(
        ptr: *const u8,
        len: usize,
        release: Option<ReleaseFn>,
    ) -> Result<ByteSource> {
        let Some(ptr) = NonNull::new(ptr.cast_mut()) else {
            return Err(InvalidArgument("buffer pointer is null"));
        };
        if len == 0 {
            return Err(Empty);
        }

        Ok(ByteSource::Buffer(BufferSource {
            data: BufferData::External { ptr, len, release },
            cursor: 0,
        }))
    }

    /// Reads up to `buffer.len()` bytes, returning how many arrived.
    ///
    /// Files are read in a loop until the buffer is full, the file ends, or an error
    /// occurs, so the count is only short at end of file. Buffers copy
    /// `min(len, remaining)` bytes and advance the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] on an OS read failure or when the source is closed.
    pub fn read_partial(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self {
            ByteSource::File(file) => {
                let mut filled = 0;
                while filled < buffer.len() {
                    match file.read(&mut buffer[filled..]) {
                        Ok(0) => break,
                        Ok(transferred) => filled += transferred,
                        Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(error) => return Err(error.into()),
                    }
                }
                Ok(filled)
            }
            ByteSource::Buffer(buf) => {
                let data = buf.data.as_slice();
                let remaining = data.len() - buf.cursor;
                let count = buffer.len().min(remaining);
                buffer[..count].copy_from_slice(&data[buf.cursor..buf.cursor + count]);
                buf.cursor += count;
                Ok(count)
            }
            ByteSource::Closed => Err(closed()),
        }
    }

    /// Reads exactly `buffer.len()` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] when fewer bytes are available than requested.
    pub fn read_full(&mut self, buffer: &mut [u8]) -> Result<()> {
        let transferred = self.read_partial(buffer)?;
        if transferred != buffer.len() {
            return Err(Error::FileError(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "input ended before the requested length",
            )));
        }

        Ok(())
    }

    /// Seeks to `offset` and reads exactly `buffer.len()` bytes from there.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] when the seek fails or fewer bytes are available
    /// than requested.
    pub fn read_full_at(&mut self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        self.seek(offset)?;
        self.read_full(buffer)
    }

    /// Moves the read position to an absolute offset.
    ///
    /// Files delegate to the OS; buffers move their cursor and reject offsets past the
    /// end of the data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] when the OS rejects the seek, when a buffer offset
    /// lies past the end, or when the source is closed.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        match self {
            ByteSource::File(file) => {
                file.seek(SeekFrom::Start(offset))?;
                Ok(())
            }
            ByteSource::Buffer(buf) => {
                let len = buf.data.as_slice().len() as u64;
                if offset > len {
                    return Err(Error::FileError(std::io::Error::from_raw_os_error(
                        libc::EINVAL,
                    )));
                }
                buf.cursor = offset as usize;
                Ok(())
            }
            ByteSource::Closed => Err(closed()),
        }
    }

    /// Closes the source, releasing the file descriptor or running the buffer's release
    /// hook. Idempotent; subsequent reads fail with an I/O error.
    pub fn close(&mut self) {
        // Dropping the replaced value closes the fd / runs the release hook.
        drop(std::mem::replace(self, ByteSource::Closed));
    }

    /// Returns `true` once the source has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, ByteSource::Closed)
    }
}

/// An open in-memory input with a read cursor.
pub struct BufferSource {
    data: BufferData,
    cursor: usize,
}

impl std::fmt::Debug for BufferSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferSource")
            .field("data", &self.data)
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Ownership of the bytes behind a [`BufferSource`].
enum BufferData {
    /// The source owns the bytes.
    Owned(Vec<u8>),
    /// The host owns the bytes; `release` hands them back.
    External {
        ptr: NonNull<u8>,
        len: usize,
        release: Option<ReleaseFn>,
    },
}

impl std::fmt::Debug for BufferData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferData::Owned(data) => f.debug_tuple("Owned").field(data).finish(),
            BufferData::External { ptr, len, .. } => f
                .debug_struct("External")
                .field("ptr", ptr)
                .field("len", len)
                .field("release", &"<fn>")
                .finish(),
        }
    }
}

impl BufferData {
    fn as_slice(&self) -> &[u8] {
        match self {
            BufferData::Owned(data) => data.as_slice(),
            // Validity for the lifetime of the source is the contract of `from_raw_parts`.
            BufferData::External { ptr, len, .. } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), *len)
            },
        }
    }
}

impl Drop for BufferData {
    fn drop(&mut self) {
        if let BufferData::External { release, .. } = self {
            if let Some(release) = release.take() {
                release();
            }
        }
    }
}
