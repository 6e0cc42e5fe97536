use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::chunk::ChunkSet;
use crate::error::{GbxError, Result};

/// An instance of a registered GBX class.
///
/// Concrete node types are plain structs holding their decoded fields plus a [`ChunkSet`];
/// [`crate::impl_node!`] writes this impl for them.
pub trait Node: Any + Send + Sync + fmt::Debug {
    /// The (normalized) class ID this node was constructed for.
    fn class_id(&self) -> u32;

    /// The chunks read for, or created on, this node.
    fn chunks(&self) -> &ChunkSet;

    /// Mutable access to the chunk set.
    fn chunks_mut(&mut self) -> &mut ChunkSet;

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Shared handle to a node.
///
/// Inline nodes can be referenced from several places of the same body (the reader hands out
/// the same handle for every back-reference), so nodes live behind `Arc<RwLock<..>>`.
#[derive(Clone)]
pub struct NodeRef(Arc<RwLock<Box<dyn Node>>>);

impl NodeRef {
    /// Wraps a boxed node.
    pub fn new(node: Box<dyn Node>) -> Self {
        Self(Arc::new(RwLock::new(node)))
    }

    /// Wraps a concrete node.
    pub fn from_node<N: Node>(node: N) -> Self {
        Self::new(Box::new(node))
    }

    /// Locks the node for reading.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, Box<dyn Node>>> {
        self.0
            .read()
            .map_err(|_| GbxError::Internal(format!("RwLock poisoned on node {self:?}")))
    }

    /// Locks the node for writing.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Box<dyn Node>>> {
        self.0
            .write()
            .map_err(|_| GbxError::Internal(format!("RwLock poisoned on node {self:?}")))
    }

    /// Returns `true` if both handles point to the same node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the node, stable for the lifetime of the handle.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// The node's class ID.
    pub fn class_id(&self) -> Result<u32> {
        Ok(self.read()?.class_id())
    }

    /// Runs `f` on the node as its concrete type.
    ///
    /// # Errors
    /// [`GbxError::Internal`] if the node is not an `N`.
    pub fn with<N: Node, R>(&self, f: impl FnOnce(&N) -> R) -> Result<R> {
        let guard = self.read()?;
        let node = guard
            .as_any()
            .downcast_ref::<N>()
            .ok_or_else(|| type_mismatch::<N>(guard.class_id()))?;
        Ok(f(node))
    }

    /// Runs `f` on the node as its concrete type, mutably.
    pub fn with_mut<N: Node, R>(&self, f: impl FnOnce(&mut N) -> R) -> Result<R> {
        let mut guard = self.write()?;
        let class_id = guard.class_id();
        let node = guard
            .as_any_mut()
            .downcast_mut::<N>()
            .ok_or_else(|| type_mismatch::<N>(class_id))?;
        Ok(f(node))
    }
}

pub(crate) fn type_mismatch<N>(class_id: u32) -> GbxError {
    GbxError::Internal(format!(
        "node 0x{class_id:08X} is not a {}",
        std::any::type_name::<N>()
    ))
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({:#x})", self.addr())
    }
}
