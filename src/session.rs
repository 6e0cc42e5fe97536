//! Per-call parse/write state.
//!
//! A [`Session`] bundles everything that must be reset between two reads or writes: the
//! lookback string table, the auxiliary node table, the set of node indices that belong to
//! the reference table, and the cancellation token. Sessions are never shared between calls.
//!
//! Chunk handlers see the session through [`ChunkReader`] and [`ChunkWriter`], which also
//! expose the primitive codec through `Deref`.

use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{GbxError, Result};
use crate::graph::{ChunkId, NodeRef};
use crate::id::{DEFAULT_LOOKBACK_VERSION, Id, Ident, LookbackTable};
use crate::io::{Cursor, Writer};
use crate::registry::NodeRegistry;
use crate::resolver::{self, AuxNodeTable, NodeLink};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Node index of the container's root node. Inline nodes are numbered from 1.
pub const ROOT_INDEX: i32 = 0;

/// Opaque identifier of one session, used to tag log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gbx#{}", self.0)
    }
}

/// Cooperative cancellation flag, checked between chunks and before every node.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every operation observing this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// State of one read or write call.
pub struct Session {
    token: SessionToken,
    registry: Arc<dyn NodeRegistry>,
    lookback_version: i32,
    lookback: LookbackTable,
    aux: AuxNodeTable,
    external: HashSet<i32>,
    cancel: CancellationToken,
    root_bound: bool,
}

impl Session {
    /// Creates a fresh session.
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self {
            token: SessionToken::next(),
            registry,
            lookback_version: DEFAULT_LOOKBACK_VERSION,
            lookback: LookbackTable::new(DEFAULT_LOOKBACK_VERSION),
            aux: AuxNodeTable::new(),
            external: HashSet::new(),
            cancel: CancellationToken::new(),
            root_bound: false,
        }
    }

    /// Sets the lookback table version written before the first Id.
    pub fn with_lookback_version(mut self, version: i32) -> Self {
        self.lookback_version = version;
        self.lookback = LookbackTable::new(version);
        self
    }

    /// Observes `token` for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Node indices that refer to the reference table instead of inline nodes.
    pub fn with_external_indices(mut self, indices: impl IntoIterator<Item = i32>) -> Self {
        self.external = indices.into_iter().collect();
        self
    }

    /// Starts from an existing auxiliary node table (deferred discovery).
    pub fn with_aux_nodes(mut self, aux: AuxNodeTable) -> Self {
        self.aux = aux;
        self
    }

    /// Binds the container's root at [`ROOT_INDEX`], so references back to the root keep
    /// their identity. Skipped when the reference table claims that index.
    ///
    /// Call after [`with_external_indices`](Self::with_external_indices) and
    /// [`with_aux_nodes`](Self::with_aux_nodes).
    pub fn with_root(mut self, root: NodeRef) -> Self {
        if !self.external.contains(&ROOT_INDEX) && self.aux.get(ROOT_INDEX).is_none() {
            self.root_bound = self.aux.bind(ROOT_INDEX, root).is_ok();
        }
        self
    }

    /// Token identifying this session in logs.
    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// The registry resolving classes and chunks.
    pub fn registry(&self) -> &Arc<dyn NodeRegistry> {
        &self.registry
    }

    /// The lookback table of this session.
    pub fn lookback(&self) -> &LookbackTable {
        &self.lookback
    }

    /// The auxiliary node table of this session.
    pub fn aux_nodes(&self) -> &AuxNodeTable {
        &self.aux
    }

    /// Ends the session, handing over its node table. The root binding is not part of it.
    pub fn into_aux_nodes(mut self) -> AuxNodeTable {
        if self.root_bound {
            self.aux.unbind(ROOT_INDEX);
        }
        self.aux
    }

    /// One past the highest node index in use, reference-table indices included.
    pub fn node_count(&self) -> i32 {
        let external = self.external.iter().max().map_or(0, |i| i + 1);
        self.aux.size().max(external)
    }

    /// Returns `true` if `index` names a reference-table entry.
    pub fn is_external(&self, index: i32) -> bool {
        self.external.contains(&index)
    }

    /// Fails with [`GbxError::Cancelled`] once the token was cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GbxError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn bind_aux(&mut self, index: i32, node: NodeRef) -> Result<()> {
        self.aux.bind(index, node)
    }

    pub(crate) fn append_aux(&mut self, node: NodeRef) -> Result<i32> {
        self.aux.append(node, &self.external)
    }

    /// Runs `f` with an empty lookback table, restoring the current one afterwards.
    ///
    /// Lazily decoded skippable chunks carry their own string table.
    pub(crate) fn with_private_lookback<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let fresh = LookbackTable::new(self.lookback_version);
        let saved = std::mem::replace(&mut self.lookback, fresh);
        let out = f(self);
        self.lookback = saved;
        out
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("lookback", &self.lookback)
            .field("aux", &self.aux.len())
            .field("external", &self.external.len())
            .finish()
    }
}

/// Read context handed to [`ChunkHandler::read`](crate::graph::ChunkHandler::read).
pub struct ChunkReader<'a, 'd> {
    cursor: &'a mut Cursor<'d>,
    session: &'a mut Session,
    chunk_id: ChunkId,
    version: Option<i32>,
}

impl<'a, 'd> ChunkReader<'a, 'd> {
    pub(crate) fn new(cursor: &'a mut Cursor<'d>, session: &'a mut Session, chunk_id: ChunkId) -> Self {
        Self {
            cursor,
            session,
            chunk_id,
            version: None,
        }
    }

    /// The chunk being decoded.
    pub fn chunk_id(&self) -> ChunkId {
        self.chunk_id
    }

    /// The surrounding session.
    pub fn session(&self) -> &Session {
        &*self.session
    }

    /// Reads the chunk version (`i32`) and records it on the chunk.
    pub fn read_version(&mut self) -> Result<i32> {
        let version = self.cursor.read_i32()?;
        self.version = Some(version);
        Ok(version)
    }

    /// The version recorded by [`read_version`](Self::read_version).
    pub fn version(&self) -> Option<i32> {
        self.version
    }

    /// Reads a lookback Id.
    pub fn read_id(&mut self) -> Result<Id> {
        self.session.lookback.read(self.cursor)
    }

    /// Reads an Ident (three lookback Ids).
    pub fn read_ident(&mut self) -> Result<Ident> {
        self.session.lookback.read_ident(self.cursor)
    }

    /// Reads a node reference: `None` for `-1`, the bound node for a known index, an
    /// external link for a reference-table index, or a new inline node.
    pub fn read_node_ref(&mut self) -> Result<Option<NodeLink>> {
        resolver::read_node_ref(self.cursor, self.session)
    }

    /// Reads an `i32` count followed by that many node references.
    pub fn read_node_ref_list(&mut self) -> Result<Vec<Option<NodeLink>>> {
        let session = &mut *self.session;
        self.cursor
            .read_list(|c| resolver::read_node_ref(c, session))
    }

    /// Reads a node stored without index: class ID then chunk stream.
    pub fn read_inline_node(&mut self) -> Result<NodeRef> {
        resolver::read_inline_node(self.cursor, self.session)
    }
}

impl<'d> Deref for ChunkReader<'_, 'd> {
    type Target = Cursor<'d>;

    fn deref(&self) -> &Self::Target {
        &*self.cursor
    }
}

impl DerefMut for ChunkReader<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.cursor
    }
}

/// Write context handed to [`ChunkHandler::write`](crate::graph::ChunkHandler::write).
pub struct ChunkWriter<'a> {
    writer: &'a mut Writer,
    session: &'a mut Session,
    chunk_id: ChunkId,
    version: Option<i32>,
}

impl<'a> ChunkWriter<'a> {
    pub(crate) fn new(
        writer: &'a mut Writer,
        session: &'a mut Session,
        chunk_id: ChunkId,
        version: Option<i32>,
    ) -> Self {
        Self {
            writer,
            session,
            chunk_id,
            version,
        }
    }

    /// The chunk being encoded.
    pub fn chunk_id(&self) -> ChunkId {
        self.chunk_id
    }

    /// The version the chunk was read with, if any.
    pub fn version(&self) -> Option<i32> {
        self.version
    }

    /// Writes the chunk version, defaulting to the version it was read with.
    pub fn write_version(&mut self, default: i32) -> i32 {
        let version = self.version.unwrap_or(default);
        self.writer.write_i32(version);
        version
    }

    /// Writes a lookback Id.
    pub fn write_id(&mut self, id: &Id) -> Result<()> {
        self.session.lookback.write(self.writer, id)
    }

    /// Writes an Ident.
    pub fn write_ident(&mut self, ident: &Ident) -> Result<()> {
        self.session.lookback.write_ident(self.writer, ident)
    }

    /// Writes a node reference, serializing the node inline on first use.
    pub fn write_node_ref(&mut self, link: Option<&NodeLink>) -> Result<()> {
        resolver::write_node_ref(self.writer, self.session, link)
    }

    /// Writes an `i32` count followed by every node reference.
    pub fn write_node_ref_list(&mut self, links: &[Option<NodeLink>]) -> Result<()> {
        self.writer.write_length(links.len())?;
        for link in links {
            resolver::write_node_ref(self.writer, self.session, link.as_ref())?;
        }
        Ok(())
    }

    /// Writes a node without index: class ID then chunk stream.
    pub fn write_inline_node(&mut self, node: &NodeRef) -> Result<()> {
        resolver::write_inline_node(self.writer, self.session, node)
    }
}

impl Deref for ChunkWriter<'_> {
    type Target = Writer;

    fn deref(&self) -> &Self::Target {
        &*self.writer
    }
}

impl DerefMut for ChunkWriter<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.writer
    }
}
