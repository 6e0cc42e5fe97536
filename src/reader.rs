//! The Read-Side Engine.
//!
//! Handles memory-mapping files, validating the container layout, and handing the body to
//! the chunk dispatch engine.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use memmap2::Mmap;

use crate::container::Gbx;
use crate::error::{GbxError, Result};
use crate::format::{Body, Header};
use crate::id::DEFAULT_LOOKBACK_VERSION;
use crate::io::Cursor;
use crate::reftable::ReferenceTable;
use crate::registry::NodeRegistry;
use crate::session::CancellationToken;

/// Bytes backing a parse: a memory-mapped file or an owned buffer.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// A read-only memory map.
    Mmap(Arc<Mmap>),
    /// An in-memory buffer.
    Memory(Arc<[u8]>),
}

impl DataSource {
    /// Maps a file into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: the map is read-only; concurrent truncation by another process is not
        // guarded against.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self::Mmap(Arc::new(mmap)))
    }

    /// Wraps an owned buffer.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Memory(bytes.into())
    }

    /// The backing bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Mmap(m) => m,
            Self::Memory(b) => b,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` for an empty source.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Options of a read call.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Stop after the header, header chunks and reference table; the body is decoded on
    /// demand by [`Gbx::decode_body`].
    pub header_only: bool,
    /// Lookback table version assumed for writes of chunks decoded in this container.
    pub lookback_version: i32,
    /// Cancellation observed between chunks and nodes.
    pub cancel: CancellationToken,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            header_only: false,
            lookback_version: DEFAULT_LOOKBACK_VERSION,
            cancel: CancellationToken::new(),
        }
    }
}

/// Parses a container from bytes.
pub fn read_bytes(
    bytes: &[u8],
    registry: Arc<dyn NodeRegistry>,
    options: &ReadOptions,
    file_path: Option<PathBuf>,
) -> Result<Gbx> {
    if options.cancel.is_cancelled() {
        return Err(GbxError::Cancelled);
    }

    let mut r = Cursor::new(bytes);
    let header = Header::read(&mut r)?;
    let reference_table = ReferenceTable::read(&mut r, header.version)?;
    let body = Body::read(&mut r, header.body_compression)?;
    debug!(
        "GBX v{} class 0x{:08X}: {} user data bytes, {} external nodes, {} body bytes",
        header.version,
        header.class_id,
        header.user_data.len(),
        reference_table.as_ref().map_or(0, |t| t.nodes.len()),
        body.stored_len()
    );

    let mut gbx = Gbx::from_parts(header, reference_table, body, registry, options.clone(), file_path);
    gbx.read_header_chunks()?;
    if !options.header_only {
        gbx.decode_body()?;
    }
    Ok(gbx)
}

/// Parses a container from a file through a memory map.
pub fn read_file(path: &Path, registry: Arc<dyn NodeRegistry>, options: &ReadOptions) -> Result<Gbx> {
    let source = DataSource::open(path)?;
    read_bytes(source.as_bytes(), registry, options, Some(path.to_path_buf()))
}

/// Parses a container from any reader.
pub fn read_stream<R: Read>(mut reader: R, registry: Arc<dyn NodeRegistry>, options: &ReadOptions) -> Result<Gbx> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    read_bytes(&bytes, registry, options, None)
}
