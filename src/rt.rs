//! Runtime helpers for node type definitions.
//!
//! Concrete node types are plain structs; [`impl_node!`](crate::impl_node) implements
//! [`Node`] for them and [`handler`] turns a pair of typed functions into a
//! [`ChunkHandler`] for the registry.

use std::sync::Arc;

use crate::error::Result;
use crate::graph::core::type_mismatch;
use crate::graph::{ChunkHandler, Node};
use crate::session::{ChunkReader, ChunkWriter};

/// Typed chunk read function.
pub type ReadFn<N> = fn(&mut N, &mut ChunkReader<'_, '_>) -> Result<()>;

/// Typed chunk write function.
pub type WriteFn<N> = fn(&N, &mut ChunkWriter<'_>) -> Result<()>;

/// A [`ChunkHandler`] dispatching to typed functions after downcasting the node.
pub struct FnHandler<N> {
    read: ReadFn<N>,
    write: WriteFn<N>,
}

impl<N: Node> ChunkHandler for FnHandler<N> {
    fn read(&self, node: &mut dyn Node, r: &mut ChunkReader<'_, '_>) -> Result<()> {
        let class_id = node.class_id();
        let node = node
            .as_any_mut()
            .downcast_mut::<N>()
            .ok_or_else(|| type_mismatch::<N>(class_id))?;
        (self.read)(node, r)
    }

    fn write(&self, node: &dyn Node, w: &mut ChunkWriter<'_>) -> Result<()> {
        let node = node
            .as_any()
            .downcast_ref::<N>()
            .ok_or_else(|| type_mismatch::<N>(node.class_id()))?;
        (self.write)(node, w)
    }
}

/// Wraps typed read/write functions for [`NodeClass::chunk`](crate::registry::NodeClass::chunk).
pub fn handler<N: Node>(read: ReadFn<N>, write: WriteFn<N>) -> Arc<dyn ChunkHandler> {
    Arc::new(FnHandler { read, write })
}

/// Implements [`Node`](crate::graph::Node) for a struct with a `chunks: ChunkSet` field.
///
/// ```rust,ignore
/// #[derive(Debug, Default)]
/// struct Block {
///     chunks: ChunkSet,
///     name: Id,
/// }
/// gamebox::impl_node!(Block, 0x0305_7000);
/// ```
#[macro_export]
macro_rules! impl_node {
    ($ty:ty, $class_id:expr) => {
        impl $crate::graph::Node for $ty {
            fn class_id(&self) -> u32 {
                $class_id
            }

            fn chunks(&self) -> &$crate::graph::ChunkSet {
                &self.chunks
            }

            fn chunks_mut(&mut self) -> &mut $crate::graph::ChunkSet {
                &mut self.chunks
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
}
