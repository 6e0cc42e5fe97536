use std::sync::Arc;

use super::core::Node;
use crate::error::Result;
use crate::session::{ChunkReader, ChunkWriter};

/// How a chunk is framed in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Written inline; the reader must understand it to find the next chunk.
    Unskippable,
    /// Wrapped as `SKIP` + length + body; parsed lazily.
    Skippable,
    /// Stored in the header's user data.
    Header,
}

/// Per-chunk dispatch configuration.
/// Kept small for efficient pass-by-copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Framing of the chunk.
    pub kind: ChunkKind,
    /// Skippable chunks only: decode during the body parse with the live session instead of
    /// on discovery. Required when the chunk refers to lookback strings of the body.
    pub eager: bool,
    /// The chunk is known but must not be decoded. Unskippable ignored chunks are fatal.
    pub ignored: bool,
}

impl ChunkConfig {
    /// An unskippable chunk.
    pub const fn unskippable() -> Self {
        Self {
            kind: ChunkKind::Unskippable,
            eager: false,
            ignored: false,
        }
    }

    /// A lazily decoded skippable chunk.
    pub const fn skippable() -> Self {
        Self {
            kind: ChunkKind::Skippable,
            eager: false,
            ignored: false,
        }
    }

    /// A header (user data) chunk.
    pub const fn header() -> Self {
        Self {
            kind: ChunkKind::Header,
            eager: false,
            ignored: false,
        }
    }

    /// Decode this skippable chunk while the body is being read.
    pub const fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    /// Mark the chunk as known but never decoded.
    pub const fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// `true` for [`ChunkKind::Skippable`].
    pub fn is_skippable(&self) -> bool {
        self.kind == ChunkKind::Skippable
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::unskippable()
    }
}

/// Reads and writes one chunk's payload against its owning node.
///
/// A handler receives the node as `dyn Node` and downcasts it to its concrete type; see
/// [`crate::rt::handler`] for the usual way to build one from two functions.
pub trait ChunkHandler: Send + Sync {
    /// Decodes the chunk payload into `node`.
    fn read(&self, node: &mut dyn Node, r: &mut ChunkReader<'_, '_>) -> Result<()>;

    /// Encodes the chunk payload from `node`.
    fn write(&self, node: &dyn Node, w: &mut ChunkWriter<'_>) -> Result<()>;
}

/// A registered chunk: its configuration plus the handler that decodes it.
#[derive(Clone)]
pub struct ChunkEntry {
    /// Dispatch configuration.
    pub config: ChunkConfig,
    /// Decoder/encoder.
    pub handler: Arc<dyn ChunkHandler>,
}

impl std::fmt::Debug for ChunkEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChunkEntry({:?})", self.config)
    }
}
