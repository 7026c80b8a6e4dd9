use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Each variant maps to one of the failure classes a loader can hit: a caller handed us
/// something unusable ([`Error::InvalidArgument`], [`Error::Empty`]), the image itself is
/// damaged ([`Error::Malformed`], [`Error::OutOfBounds`]), the image is valid but outside
/// what this loader handles ([`Error::NotSupported`]), or the host refused an operation
/// ([`Error::FileError`], [`Error::Os`]).
///
/// Two conditions deliberately do *not* surface here and abort the process instead: a call
/// through an import slot that was never bound, and a base-relocation type the loader does
/// not implement. Both mean control is about to flow through memory whose contents the
/// loader cannot describe, so continuing would execute garbage.
///
/// # Examples
///
/// ```rust,no_run
/// use peload::{Error, PeImage};
/// use std::path::Path;
///
/// match PeImage::open(Path::new("library.dll")) {
///     Ok(image) => {
///         println!("loaded {} exports", image.exports().count());
///     }
///     Err(Error::NotSupported) => {
///         eprintln!("not a PE32+ image");
///     }
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("malformed image: {} ({}:{})", message, file, line);
///     }
///     Err(e) => {
///         eprintln!("error: {}", e);
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument was missing or inconsistent.
    ///
    /// Produced by the binding surface: an options record with the wrong version tag,
    /// a buffer input with a null pointer or zero length, a bind or lookup that names
    /// no known module or symbol.
    #[error("invalid argument - {0}")]
    InvalidArgument(&'static str),

    /// The image is damaged and could not be parsed.
    ///
    /// The error carries the source location where the malformation was detected,
    /// which is usually more useful than the file offset when debugging a parser.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the image.
    ///
    /// This is a safety check to prevent reads or writes beyond the end of a buffer
    /// or the mapped region.
    #[error("Out of Bound access would have occurred!")]
    OutOfBounds,

    /// This image is not supported.
    ///
    /// The container parsed, but the optional-header magic is not PE32+. Only x86-64
    /// images are handled.
    #[error("This image type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors from the byte source: open failures, short reads,
    /// seeks past the end of a buffer, reads after close.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// A host virtual-memory call failed.
    ///
    /// Carries the name of the failing call (`mmap`, `mprotect`) and the OS error.
    #[error("{syscall} failed: {source}")]
    Os {
        /// The system call that failed
        syscall: &'static str,
        /// The OS error it failed with
        source: std::io::Error,
    },
}
