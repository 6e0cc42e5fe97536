//! Centralized error handling for the GameBox engine.
//!
//! Every failure condition is reported through [`GbxError`]. The library does not panic on
//! malformed input; `#![deny(clippy::panic)]` and `#![deny(clippy::unwrap_used)]` enforce it.
//!
//! ## Error Categories
//!
//! - **Stream errors** ([`GbxError::UnexpectedEndOfStream`], [`GbxError::InvalidLength`]):
//!   the primitive codec ran out of bytes or met a negative length prefix.
//! - **Container errors** ([`GbxError::Format`], [`GbxError::VersionNotSupported`],
//!   [`GbxError::TextFormatNotSupported`]): the header is not something this crate can read.
//! - **Node errors** ([`GbxError::NodeNotImplemented`], [`GbxError::ChunkParse`],
//!   [`GbxError::IgnoredUnskippableChunk`]): the chunk stream references a class or chunk the
//!   registry cannot handle.
//! - **Envelope errors** ([`GbxError::Compression`], [`GbxError::MissingCompressionSupport`],
//!   [`GbxError::Crypto`]): LZO, zlib or Blowfish failures.
//!
//! Unknown skippable chunks are never errors; they are kept as raw bytes. A stream that ends
//! in the middle of a chunk is logged and ends the node instead of failing the call.
//!
//! ## Usage
//!
//! ```rust
//! use gamebox::GbxError;
//!
//! fn describe(err: &GbxError) -> &'static str {
//!     match err {
//!         GbxError::VersionNotSupported(_) => "too old",
//!         GbxError::ChunkParse(_) => "unknown unskippable chunk",
//!         _ => "other",
//!     }
//! }
//! # assert_eq!(describe(&GbxError::VersionNotSupported(2)), "too old");
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for GameBox operations.
pub type Result<T> = std::result::Result<T, GbxError>;

/// Context attached to a fatal chunk dispatch failure.
///
/// Holds the offending chunk ID, the chunk that was read right before it (if any), and the
/// class names the registry knows for both. `None` names print as `unknown class`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkParseError {
    /// The chunk ID that could not be dispatched (after alias normalization).
    pub chunk_id: u32,
    /// The previously read chunk of the same node, if any.
    pub previous_chunk_id: Option<u32>,
    /// Registry name of the class part of `chunk_id`.
    pub class_name: Option<String>,
    /// Registry name of the class part of `previous_chunk_id`.
    pub previous_class_name: Option<String>,
}

impl fmt::Display for ChunkParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.class_name.as_deref().unwrap_or("unknown class");
        write!(f, "chunk 0x{:08X} ({name}) cannot be parsed", self.chunk_id)?;
        match self.previous_chunk_id {
            Some(prev) => {
                let prev_name = self.previous_class_name.as_deref().unwrap_or("unknown class");
                write!(f, ", previous chunk 0x{prev:08X} ({prev_name})")
            }
            None => write!(f, ", previous chunk: not a class"),
        }
    }
}

/// The master error enum covering all failure domains of the crate.
///
/// This type is `Clone` so that errors captured in parallel discovery can be stored and
/// re-raised. I/O errors are wrapped in `Arc` to make cloning cheap.
#[derive(Debug, Clone)]
pub enum GbxError {
    /// Low-level I/O failure (file not found, permission denied, ...).
    Io(Arc<io::Error>),

    /// A read needed more bytes than the stream had left.
    ///
    /// `offset` is the cursor position at which the read was attempted.
    UnexpectedEndOfStream {
        /// Position of the failed read.
        offset: usize,
        /// Bytes requested.
        need: usize,
        /// Bytes still available.
        have: usize,
    },

    /// A length prefix was negative or does not fit the remaining data.
    InvalidLength(i64),

    /// The data does not follow the GBX or PAK layout (bad magic, bad marker, bad index).
    Format(String),

    /// The GBX header declares a version below 3.
    VersionNotSupported(i16),

    /// The GBX header declares the text serialization format (`'T'`).
    TextFormatNotSupported,

    /// The registry has no constructor for this class ID (after alias normalization).
    NodeNotImplemented(u32),

    /// An unskippable chunk the registry does not know, or a skippable chunk without its
    /// `SKIP` marker.
    ChunkParse(Box<ChunkParseError>),

    /// An unskippable chunk registered as ignored was found in the body.
    IgnoredUnskippableChunk {
        /// Class of the node being read.
        class_id: u32,
        /// The ignored chunk.
        chunk_id: u32,
    },

    /// The body uses a compression scheme this build was compiled without.
    MissingCompressionSupport(&'static str),

    /// LZO or zlib failure.
    Compression(String),

    /// Blowfish key or block failure.
    Crypto(String),

    /// The requested operation is not available for this input.
    Unsupported(String),

    /// The operation observed its cancellation token and stopped.
    Cancelled,

    /// Logic error inside the library (poisoned lock, handler type mismatch).
    Internal(String),
}

impl GbxError {
    /// Returns `true` for [`GbxError::UnexpectedEndOfStream`].
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::UnexpectedEndOfStream { .. })
    }
}

impl fmt::Display for GbxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::UnexpectedEndOfStream { offset, need, have } => write!(
                f,
                "Unexpected end of stream at offset {offset}: need {need} bytes, have {have}"
            ),
            Self::InvalidLength(len) => write!(f, "Invalid length: {len}"),
            Self::Format(s) => write!(f, "Format Error: {s}"),
            Self::VersionNotSupported(v) => write!(f, "GBX version {v} is not supported"),
            Self::TextFormatNotSupported => write!(f, "Text-formatted GBX is not supported"),
            Self::NodeNotImplemented(id) => write!(f, "Node 0x{id:08X} is not implemented"),
            Self::ChunkParse(ctx) => write!(f, "Chunk Parse Error: {ctx}"),
            Self::IgnoredUnskippableChunk { class_id, chunk_id } => write!(
                f,
                "Chunk 0x{chunk_id:08X} of node 0x{class_id:08X} is ignored but cannot be skipped"
            ),
            Self::MissingCompressionSupport(algo) => {
                write!(f, "{algo} compression support is not compiled in")
            }
            Self::Compression(s) => write!(f, "Compression Error: {s}"),
            Self::Crypto(s) => write!(f, "Crypto Error: {s}"),
            Self::Unsupported(s) => write!(f, "Unsupported: {s}"),
            Self::Cancelled => write!(f, "Operation cancelled"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for GbxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for GbxError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<ChunkParseError> for GbxError {
    fn from(err: ChunkParseError) -> Self {
        Self::ChunkParse(Box::new(err))
    }
}
