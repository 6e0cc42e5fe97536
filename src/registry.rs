//! Node-type registry.
//!
//! The engine never knows concrete game classes. It asks a [`NodeRegistry`] to construct a
//! node for a class ID, to map legacy IDs onto current ones, and to find the
//! [`ChunkHandler`](crate::graph::ChunkHandler) for each chunk it meets.
//!
//! [`Registry`] is the table-driven implementation: classes are registered explicitly with
//! their parent class, constructor and chunks.
//!
//! ```rust
//! use gamebox::registry::{NodeClass, NodeRegistry, Registry};
//!
//! let mut registry = Registry::new();
//! registry.register(NodeClass::new(0x0304_3000, "CGameCtnChallenge"));
//! registry.alias(0x2400_3000, 0x0304_3000);
//!
//! assert_eq!(registry.normalize_class_id(0x2400_3000), 0x0304_3000);
//! assert_eq!(registry.normalize_chunk_id(0x2400_3002), 0x0304_3002);
//! assert_eq!(registry.class_name(0x0304_3000), Some("CGameCtnChallenge"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::{CLASS_MASK, Chunk, ChunkConfig, ChunkEntry, ChunkHandler, ChunkId, ChunkKind, Node};

/// Bound on alias chains and parent walks. Guards against cyclic tables.
const MAX_DEPTH: usize = 32;

/// Lookup interface the engine consumes.
pub trait NodeRegistry: Send + Sync {
    /// Maps a legacy class ID to its current form. Unknown IDs are returned unchanged.
    fn normalize_class_id(&self, class_id: u32) -> u32;

    /// Maps a legacy chunk ID to its current form by normalizing its class part.
    fn normalize_chunk_id(&self, chunk_id: u32) -> u32 {
        self.normalize_class_id(chunk_id & CLASS_MASK) | (chunk_id & !CLASS_MASK)
    }

    /// Constructs an empty node of the (normalized) class, if it is implemented.
    fn construct(&self, class_id: u32) -> Option<Box<dyn Node>>;

    /// Finds the chunk registration for a node of `class_id`, including inherited chunks.
    fn chunk_entry(&self, class_id: u32, chunk_id: ChunkId) -> Option<&ChunkEntry>;

    /// Human-readable class name.
    fn class_name(&self, class_id: u32) -> Option<&str>;

    /// Creates an empty chunk of the right kind, for building nodes in memory.
    fn create_chunk(&self, class_id: u32, chunk_id: ChunkId) -> Chunk {
        match self.chunk_entry(class_id, chunk_id).map(|e| e.config.kind) {
            Some(ChunkKind::Skippable) => Chunk::skippable(chunk_id),
            Some(ChunkKind::Header) => Chunk::header(chunk_id, false),
            Some(ChunkKind::Unskippable) | None => Chunk::unskippable(chunk_id),
        }
    }
}

/// Registration of one class.
#[derive(Clone)]
pub struct NodeClass {
    class_id: u32,
    name: String,
    parent: Option<u32>,
    constructor: Option<fn() -> Box<dyn Node>>,
    chunks: HashMap<ChunkId, ChunkEntry>,
}

fn construct_default<N: Node + Default>() -> Box<dyn Node> {
    Box::new(N::default())
}

impl NodeClass {
    /// A class without constructor or chunks (a pure base class).
    pub fn new(class_id: u32, name: impl Into<String>) -> Self {
        Self {
            class_id,
            name: name.into(),
            parent: None,
            constructor: None,
            chunks: HashMap::new(),
        }
    }

    /// Sets the base class whose chunks are inherited.
    pub fn parent(mut self, class_id: u32) -> Self {
        self.parent = Some(class_id);
        self
    }

    /// Constructs instances with `N::default()`.
    pub fn node<N: Node + Default>(mut self) -> Self {
        self.constructor = Some(construct_default::<N>);
        self
    }

    /// Constructs instances with a custom function.
    pub fn constructor(mut self, f: fn() -> Box<dyn Node>) -> Self {
        self.constructor = Some(f);
        self
    }

    /// Registers a chunk handler.
    pub fn chunk(
        mut self,
        chunk_id: u32,
        config: ChunkConfig,
        handler: Arc<dyn ChunkHandler>,
    ) -> Self {
        self.chunks
            .insert(ChunkId::new(chunk_id), ChunkEntry { config, handler });
        self
    }

    /// The class ID.
    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    /// The class name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for NodeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClass")
            .field("class_id", &format_args!("0x{:08X}", self.class_id))
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

/// Table-driven [`NodeRegistry`].
#[derive(Debug, Default, Clone)]
pub struct Registry {
    classes: HashMap<u32, NodeClass>,
    aliases: HashMap<u32, u32>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class. A class with the same ID is replaced.
    pub fn register(&mut self, class: NodeClass) -> &mut Self {
        self.classes.insert(class.class_id, class);
        self
    }

    /// Maps a legacy class ID onto `to`.
    pub fn alias(&mut self, from: u32, to: u32) -> &mut Self {
        self.aliases.insert(from, to);
        self
    }

    /// Wraps the registry for sharing with containers and sessions.
    pub fn into_shared(self) -> Arc<dyn NodeRegistry> {
        Arc::new(self)
    }
}

impl NodeRegistry for Registry {
    fn normalize_class_id(&self, class_id: u32) -> u32 {
        let mut current = class_id;
        for _ in 0..MAX_DEPTH {
            match self.aliases.get(&current) {
                Some(&next) if next != current => current = next,
                _ => break,
            }
        }
        current
    }

    fn construct(&self, class_id: u32) -> Option<Box<dyn Node>> {
        self.classes.get(&class_id)?.constructor.map(|f| f())
    }

    fn chunk_entry(&self, class_id: u32, chunk_id: ChunkId) -> Option<&ChunkEntry> {
        let mut current = Some(class_id);
        for _ in 0..MAX_DEPTH {
            let class = self.classes.get(&current?)?;
            if let Some(entry) = class.chunks.get(&chunk_id) {
                return Some(entry);
            }
            current = class.parent;
        }
        None
    }

    fn class_name(&self, class_id: u32) -> Option<&str> {
        self.classes.get(&class_id).map(|c| c.name.as_str())
    }
}
