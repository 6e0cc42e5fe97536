use std::fmt;

/// Mask selecting the class part of a chunk ID (upper 20 bits).
pub const CLASS_MASK: u32 = 0xFFFF_F000;

/// A chunk identifier: the upper 20 bits name the owning class, the lower 12 bits the
/// chunk index within that class.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(u32);

impl ChunkId {
    /// Wraps a raw chunk ID.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// The class this chunk belongs to.
    pub const fn class_id(&self) -> u32 {
        self.0 & CLASS_MASK
    }

    /// The chunk index within its class.
    pub const fn index(&self) -> u32 {
        self.0 & !CLASS_MASK
    }
}

impl From<u32> for ChunkId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId(0x{:08X})", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}
