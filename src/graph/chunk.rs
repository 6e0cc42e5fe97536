use std::collections::BTreeMap;
use std::collections::btree_map;

use super::id::ChunkId;

/// Payload state of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkData {
    /// Decoded inline while the body was read; its fields live on the node.
    Unskippable,
    /// Skippable chunk. `raw` is the payload as found on disk and stays authoritative until
    /// `discovered` is set.
    Skippable {
        /// Payload bytes without the `SKIP` marker and length.
        raw: Vec<u8>,
        /// The payload was decoded into the node (or the chunk was created in memory).
        discovered: bool,
    },
    /// Header chunk from the container's user data.
    Header {
        /// Payload bytes.
        raw: Vec<u8>,
        /// The payload was decoded into the node.
        discovered: bool,
        /// The size entry carried bit 31 ("heavy", skipped by quick header readers).
        heavy: bool,
    },
}

/// One chunk of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    id: ChunkId,
    wire_id: u32,
    /// Version read by the handler, if the chunk is versioned.
    pub version: Option<i32>,
    /// Payload state.
    pub data: ChunkData,
}

impl Chunk {
    /// Creates a chunk read from disk under `wire_id` and normalized to `id`.
    pub fn from_wire(id: ChunkId, wire_id: u32, data: ChunkData) -> Self {
        Self {
            id,
            wire_id,
            version: None,
            data,
        }
    }

    /// An unskippable chunk created in memory.
    pub fn unskippable(id: ChunkId) -> Self {
        Self::from_wire(id, id.as_u32(), ChunkData::Unskippable)
    }

    /// A skippable chunk created in memory; it is written through its handler.
    pub fn skippable(id: ChunkId) -> Self {
        Self::from_wire(
            id,
            id.as_u32(),
            ChunkData::Skippable {
                raw: Vec::new(),
                discovered: true,
            },
        )
    }

    /// A header chunk created in memory.
    pub fn header(id: ChunkId, heavy: bool) -> Self {
        Self::from_wire(
            id,
            id.as_u32(),
            ChunkData::Header {
                raw: Vec::new(),
                discovered: true,
                heavy,
            },
        )
    }

    /// Normalized chunk ID.
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// The ID as it appears on disk (before alias normalization).
    pub fn wire_id(&self) -> u32 {
        self.wire_id
    }

    /// `true` for skippable chunks.
    pub fn is_skippable(&self) -> bool {
        matches!(self.data, ChunkData::Skippable { .. })
    }

    /// `false` only for skippable and header chunks whose payload was never decoded.
    pub fn is_discovered(&self) -> bool {
        match &self.data {
            ChunkData::Unskippable => true,
            ChunkData::Skippable { discovered, .. } | ChunkData::Header { discovered, .. } => {
                *discovered
            }
        }
    }

    /// The undecoded payload, if any.
    pub fn raw(&self) -> Option<&[u8]> {
        match &self.data {
            ChunkData::Unskippable => None,
            ChunkData::Skippable { raw, .. } | ChunkData::Header { raw, .. } => Some(raw),
        }
    }

    pub(crate) fn set_discovered(&mut self) {
        if let ChunkData::Skippable { discovered, .. } | ChunkData::Header { discovered, .. } =
            &mut self.data
        {
            *discovered = true;
        }
    }
}

/// The chunks of one node, at most one per ID, iterated in ascending ID order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSet {
    chunks: BTreeMap<ChunkId, Chunk>,
}

impl ChunkSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk. Returns `false` (and keeps the existing chunk) if the ID is taken.
    pub fn insert(&mut self, chunk: Chunk) -> bool {
        match self.chunks.entry(chunk.id) {
            btree_map::Entry::Occupied(_) => false,
            btree_map::Entry::Vacant(slot) => {
                slot.insert(chunk);
                true
            }
        }
    }

    /// Looks up a chunk by ID.
    pub fn get(&self, id: impl Into<ChunkId>) -> Option<&Chunk> {
        self.chunks.get(&id.into())
    }

    /// Looks up a chunk by ID for modification.
    pub fn get_mut(&mut self, id: impl Into<ChunkId>) -> Option<&mut Chunk> {
        self.chunks.get_mut(&id.into())
    }

    /// Removes a chunk; its fields stay on the node but it will no longer be written.
    pub fn remove(&mut self, id: impl Into<ChunkId>) -> Option<Chunk> {
        self.chunks.remove(&id.into())
    }

    /// Returns `true` if a chunk with this ID exists.
    pub fn contains(&self, id: impl Into<ChunkId>) -> bool {
        self.chunks.contains_key(&id.into())
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if there are no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks in ascending ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// Chunk IDs in ascending order.
    pub fn ids(&self) -> Vec<ChunkId> {
        self.chunks.keys().copied().collect()
    }

    /// IDs of skippable or header chunks that have not been decoded yet.
    pub fn undiscovered(&self) -> Vec<ChunkId> {
        self.chunks
            .values()
            .filter(|c| !c.is_discovered())
            .map(Chunk::id)
            .collect()
    }
}

impl<'a> IntoIterator for &'a ChunkSet {
    type Item = &'a Chunk;
    type IntoIter = btree_map::Values<'a, ChunkId, Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.values()
    }
}
