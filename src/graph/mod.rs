//! The in-memory node model.
//!
//! A GBX body is a tree of [`Node`]s. Each node owns a [`ChunkSet`]; each chunk is decoded
//! by the [`ChunkHandler`] the registry associates with its [`ChunkId`].

/// Chunks and chunk sets.
pub mod chunk;
/// The `Node` trait and the shared `NodeRef` handle.
pub mod core;
/// Defines the `ChunkId` type.
pub mod id;
/// Defines the `ChunkHandler` trait and `ChunkConfig`.
pub mod job;

pub use chunk::{Chunk, ChunkData, ChunkSet};
pub use self::core::{Node, NodeRef};
pub use id::{CLASS_MASK, ChunkId};
pub use job::{ChunkConfig, ChunkEntry, ChunkHandler, ChunkKind};
