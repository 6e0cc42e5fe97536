//! Node references.
//!
//! Inside a body, a reference to another node is an `i32` index:
//!
//! ```text
//! -1                        no node
//! index in reference table  external node, loaded from another file on demand
//! index already bound       back-reference to a node read earlier in this body
//! new index                 class ID (u32) and the node's chunk stream follow inline
//! ```
//!
//! The writer mirrors this: the first occurrence of a node gets the next free index and is
//! serialized inline, every later occurrence (by identity) only writes the index.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::trace;

use crate::error::{GbxError, Result};
use crate::executor;
use crate::graph::NodeRef;
use crate::io::{Cursor, Writer};
use crate::session::Session;

/// A reference held by a node field.
#[derive(Debug, Clone)]
pub enum NodeLink {
    /// A node stored in the same body.
    Inline(NodeRef),
    /// A node stored in another file, listed in the container's reference table.
    /// Resolve it with [`Gbx::resolve`](crate::container::Gbx::resolve).
    External {
        /// Index of the node in the reference table.
        node_index: i32,
    },
}

impl NodeLink {
    /// The inline node, if this is not an external link.
    pub fn as_inline(&self) -> Option<&NodeRef> {
        match self {
            Self::Inline(node) => Some(node),
            Self::External { .. } => None,
        }
    }

    /// The reference-table index, if this is an external link.
    pub fn external_index(&self) -> Option<i32> {
        match self {
            Self::External { node_index } => Some(*node_index),
            Self::Inline(_) => None,
        }
    }
}

impl From<NodeRef> for NodeLink {
    fn from(node: NodeRef) -> Self {
        Self::Inline(node)
    }
}

/// Index ↔ node bindings of one body.
///
/// Indices come from the stream and may be sparse, so bindings are kept in an ordered map.
#[derive(Debug, Clone, Default)]
pub struct AuxNodeTable {
    nodes: BTreeMap<i32, NodeRef>,
    by_identity: HashMap<usize, i32>,
}

impl AuxNodeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The node bound at `index`.
    pub fn get(&self, index: i32) -> Option<&NodeRef> {
        self.nodes.get(&index)
    }

    /// The index `node` is bound at, by identity.
    pub fn index_of(&self, node: &NodeRef) -> Option<i32> {
        self.by_identity.get(&node.addr()).copied()
    }

    /// Binds `node` at `index`.
    ///
    /// # Errors
    /// [`GbxError::Format`] for negative indices or indices already bound.
    pub fn bind(&mut self, index: i32, node: NodeRef) -> Result<()> {
        if index < 0 {
            return Err(GbxError::Format(format!("negative node index {index}")));
        }
        if self.nodes.contains_key(&index) {
            return Err(GbxError::Format(format!("node index {index} bound twice")));
        }
        self.by_identity.insert(node.addr(), index);
        self.nodes.insert(index, node);
        Ok(())
    }

    pub(crate) fn unbind(&mut self, index: i32) {
        if let Some(node) = self.nodes.remove(&index) {
            self.by_identity.remove(&node.addr());
        }
    }

    /// Binds `node` at the current table size, skipping `reserved` indices.
    pub fn append(&mut self, node: NodeRef, reserved: &HashSet<i32>) -> Result<i32> {
        let mut index = self.size();
        while reserved.contains(&index) {
            index += 1;
        }
        self.bind(index, node)?;
        Ok(index)
    }

    /// One past the highest bound index.
    pub fn size(&self) -> i32 {
        self.nodes.keys().next_back().map_or(0, |last| last + 1)
    }

    /// Number of bound nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bindings in index order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &NodeRef)> {
        self.nodes.iter().map(|(i, n)| (*i, n))
    }

    /// Moves bindings of `other` that are not bound here.
    pub(crate) fn merge(&mut self, other: AuxNodeTable) -> Vec<NodeRef> {
        let mut added = Vec::new();
        for (index, node) in other.nodes {
            if !self.nodes.contains_key(&index) {
                self.by_identity.insert(node.addr(), index);
                self.nodes.insert(index, node.clone());
                added.push(node);
            }
        }
        added
    }
}

fn instantiate(session: &Session, raw_class_id: u32) -> Result<NodeRef> {
    let class_id = session.registry().normalize_class_id(raw_class_id);
    let node = session
        .registry()
        .construct(class_id)
        .ok_or(GbxError::NodeNotImplemented(class_id))?;
    Ok(NodeRef::new(node))
}

/// Runs the chunk dispatch engine on a node handle.
pub(crate) fn read_node_body(node: &NodeRef, cursor: &mut Cursor<'_>, session: &mut Session) -> Result<()> {
    session.check_cancelled()?;
    let mut guard = node.write()?;
    executor::read_chunks(&mut **guard, cursor, session)
}

/// Reads a node reference.
pub fn read_node_ref(cursor: &mut Cursor<'_>, session: &mut Session) -> Result<Option<NodeLink>> {
    let index = cursor.read_i32()?;
    if index == -1 {
        return Ok(None);
    }
    if session.is_external(index) {
        return Ok(Some(NodeLink::External { node_index: index }));
    }
    if let Some(node) = session.aux_nodes().get(index) {
        return Ok(Some(NodeLink::Inline(node.clone())));
    }

    let class_id = cursor.read_u32()?;
    let node = instantiate(session, class_id)?;
    trace!(
        "[{}] node #{index} 0x{class_id:08X} at offset {}",
        session.token(),
        cursor.position()
    );
    // Bound before recursing so that references back to it resolve.
    session.bind_aux(index, node.clone())?;
    read_node_body(&node, cursor, session)?;
    Ok(Some(NodeLink::Inline(node)))
}

/// Reads a node stored without index: class ID then chunk stream.
pub fn read_inline_node(cursor: &mut Cursor<'_>, session: &mut Session) -> Result<NodeRef> {
    let class_id = cursor.read_u32()?;
    let node = instantiate(session, class_id)?;
    read_node_body(&node, cursor, session)?;
    Ok(node)
}

/// Writes a node reference.
pub fn write_node_ref(w: &mut Writer, session: &mut Session, link: Option<&NodeLink>) -> Result<()> {
    let node = match link {
        None => {
            w.write_i32(-1);
            return Ok(());
        }
        Some(NodeLink::External { node_index }) => {
            w.write_i32(*node_index);
            return Ok(());
        }
        Some(NodeLink::Inline(node)) => node,
    };

    if let Some(index) = session.aux_nodes().index_of(node) {
        w.write_i32(index);
        return Ok(());
    }

    let index = session.append_aux(node.clone())?;
    w.write_i32(index);
    write_inline_node(w, session, node)
}

/// Writes a node without index: class ID then chunk stream.
pub fn write_inline_node(w: &mut Writer, session: &mut Session, node: &NodeRef) -> Result<()> {
    session.check_cancelled()?;
    let guard = node.read()?;
    w.write_u32(guard.class_id());
    executor::write_chunks(&**guard, w, session)
}
