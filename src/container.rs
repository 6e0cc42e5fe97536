//! The GBX container: header, header chunks, reference table and root node.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::compression::CompressorRegistry;
use crate::error::{GbxError, Result};
use crate::executor;
use crate::format::{self, Body, Compression, Header};
use crate::graph::{Chunk, ChunkData, ChunkId, ChunkKind, ChunkSet, NodeRef};
use crate::io::{Cursor, Writer};
use crate::reader::ReadOptions;
use crate::reftable::ReferenceTable;
use crate::registry::NodeRegistry;
use crate::resolver::{self, AuxNodeTable, NodeLink};
use crate::session::Session;

/// A parsed (or newly built) GBX container.
pub struct Gbx {
    header: Header,
    reference_table: Option<ReferenceTable>,
    header_chunks: ChunkSet,
    body: Option<Body>,
    node: Option<NodeRef>,
    aux_nodes: AuxNodeTable,
    registry: Arc<dyn NodeRegistry>,
    compressors: CompressorRegistry,
    options: ReadOptions,
    file_path: Option<PathBuf>,
}

impl Gbx {
    /// Wraps a node built in memory into a new version 6 container.
    ///
    /// The body is LZO-compressed when the `lzo` feature is enabled.
    pub fn new(node: NodeRef, registry: Arc<dyn NodeRegistry>) -> Result<Self> {
        let mut header = Header::new(node.class_id()?);
        if !cfg!(feature = "lzo") {
            header.body_compression = Compression::Uncompressed;
        }
        Ok(Self {
            header,
            reference_table: None,
            header_chunks: ChunkSet::new(),
            body: None,
            node: Some(node),
            aux_nodes: AuxNodeTable::new(),
            registry,
            compressors: CompressorRegistry::new(),
            options: ReadOptions::default(),
            file_path: None,
        })
    }

    pub(crate) fn from_parts(
        header: Header,
        reference_table: Option<ReferenceTable>,
        body: Body,
        registry: Arc<dyn NodeRegistry>,
        options: ReadOptions,
        file_path: Option<PathBuf>,
    ) -> Self {
        let class_id = registry.normalize_class_id(header.class_id);
        let node = registry.construct(class_id).map(NodeRef::new);
        Self {
            header,
            reference_table,
            header_chunks: ChunkSet::new(),
            body: Some(body),
            node,
            aux_nodes: AuxNodeTable::new(),
            registry,
            compressors: CompressorRegistry::new(),
            options,
            file_path,
        }
    }

    /// The header as read (or as it will be written, apart from `num_nodes` and user data).
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable header access (version, compression bytes).
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Root class ID after alias normalization.
    pub fn class_id(&self) -> u32 {
        self.registry.normalize_class_id(self.header.class_id)
    }

    /// Chooses the body compression used by the next write.
    pub fn set_body_compression(&mut self, compression: Compression) {
        self.header.body_compression = compression;
    }

    /// The root node. `None` when the class is not registered (header-only reads).
    pub fn node(&self) -> Option<&NodeRef> {
        self.node.as_ref()
    }

    /// Header chunks from the user data.
    pub fn header_chunks(&self) -> &ChunkSet {
        &self.header_chunks
    }

    /// Mutable header chunk access, to add or remove header chunks before writing.
    pub fn header_chunks_mut(&mut self) -> &mut ChunkSet {
        &mut self.header_chunks
    }

    /// The reference table, if the container has external nodes.
    pub fn reference_table(&self) -> Option<&ReferenceTable> {
        self.reference_table.as_ref()
    }

    /// Installs a reference table for the next write.
    pub fn set_reference_table(&mut self, table: Option<ReferenceTable>) {
        self.reference_table = table;
    }

    /// Inline nodes of the body, by node index.
    pub fn aux_nodes(&self) -> &AuxNodeTable {
        &self.aux_nodes
    }

    /// The file this container was read from.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// The undecoded body, present after a header-only read.
    pub fn raw_body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Returns `true` once the body has been decoded into the root node.
    pub fn is_body_decoded(&self) -> bool {
        self.body.is_none()
    }

    /// The registry this container resolves classes with.
    pub fn registry(&self) -> &Arc<dyn NodeRegistry> {
        &self.registry
    }

    fn external_indices(&self) -> Vec<i32> {
        self.reference_table
            .as_ref()
            .map(ReferenceTable::node_indices)
            .unwrap_or_default()
    }

    fn session(&self) -> Session {
        self.session_with(AuxNodeTable::new())
    }

    fn session_with(&self, aux: AuxNodeTable) -> Session {
        let session = Session::new(Arc::clone(&self.registry))
            .with_lookback_version(self.options.lookback_version)
            .with_cancellation(self.options.cancel.clone())
            .with_external_indices(self.external_indices())
            .with_aux_nodes(aux);
        match &self.node {
            Some(root) => session.with_root(root.clone()),
            None => session,
        }
    }

    /// Splits the user data into header chunks and decodes those with a handler.
    pub(crate) fn read_header_chunks(&mut self) -> Result<()> {
        let entries = format::split_user_data(&self.header.user_data)?;
        if entries.is_empty() {
            return Ok(());
        }

        let class_id = self.class_id();
        let mut session = self.session();
        let mut guard = match &self.node {
            Some(node) => Some(node.write()?),
            None => None,
        };

        for entry in entries {
            let id = ChunkId::new(self.registry.normalize_chunk_id(entry.chunk_id));
            let mut chunk = Chunk::from_wire(
                id,
                entry.chunk_id,
                ChunkData::Header {
                    raw: entry.data.to_vec(),
                    discovered: false,
                    heavy: entry.heavy,
                },
            );

            let handler = self
                .registry
                .chunk_entry(class_id, id)
                .filter(|e| e.config.kind == ChunkKind::Header && !e.config.ignored);
            if let (Some(node), Some(handler)) = (guard.as_mut(), handler) {
                chunk.version =
                    executor::decode_payload(&mut ***node, entry.data, &mut session, id, handler)?;
                chunk.set_discovered();
            }

            if !self.header_chunks.insert(chunk) {
                warn!("[{}] duplicate header chunk {id} ignored", session.token());
            }
        }
        Ok(())
    }

    /// Decodes the body into the root node (a no-op once decoded).
    ///
    /// # Errors
    /// [`GbxError::NodeNotImplemented`] if the root class is not registered.
    pub fn decode_body(&mut self) -> Result<&NodeRef> {
        let Some(body) = self.body.as_ref() else {
            return self
                .node
                .as_ref()
                .ok_or_else(|| GbxError::Internal("container has neither body nor node".into()));
        };

        let class_id = self.class_id();
        let node = self
            .node
            .clone()
            .ok_or(GbxError::NodeNotImplemented(class_id))?;

        let raw = body.decode(&self.compressors)?;
        let mut cursor = Cursor::new(&raw);
        let mut session = self.session();
        resolver::read_node_body(&node, &mut cursor, &mut session)?;
        if cursor.remaining() > 0 {
            debug!(
                "[{}] {} bytes after the root chunk stream",
                session.token(),
                cursor.remaining()
            );
        }

        self.aux_nodes = session.into_aux_nodes();
        self.body = None;
        Ok(self.node.get_or_insert(node))
    }

    /// Resolves a node link, loading external nodes from disk on first use.
    pub fn resolve(&self, link: &NodeLink) -> Result<Option<NodeRef>> {
        match link {
            NodeLink::Inline(node) => Ok(Some(node.clone())),
            NodeLink::External { node_index } => match &self.reference_table {
                Some(table) => table.resolve(
                    *node_index,
                    self.file_path.as_deref(),
                    &self.registry,
                    &self.options,
                ),
                None => Ok(None),
            },
        }
    }

    /// Decodes one stored chunk of `node`, a node of this container. Idempotent.
    ///
    /// Inline nodes found in the chunk join [`aux_nodes`](Self::aux_nodes), so the next write
    /// keeps their indices.
    pub fn discover(&mut self, node: &NodeRef, chunk_id: u32) -> Result<()> {
        self.decode_body()?;
        let id = ChunkId::new(self.registry.normalize_chunk_id(chunk_id));
        let mut session = self.session_with(self.aux_nodes.clone());
        {
            let mut guard = node.write()?;
            executor::discover(&mut **guard, id, &mut session)?;
        }
        let found = self.aux_nodes.merge(session.into_aux_nodes());
        if !found.is_empty() {
            debug!("{} inline nodes found in chunk {id}", found.len());
        }
        Ok(())
    }

    /// Decodes every skippable chunk of every node in the body.
    ///
    /// With `parallel`, nodes are discovered concurrently (one task per node). Nodes found
    /// inside newly decoded chunks are discovered in a following round.
    pub fn discover_all(&mut self, parallel: bool) -> Result<()> {
        let root = self.decode_body()?.clone();
        let external = self.external_indices();

        let mut pending: Vec<NodeRef> = std::iter::once(root)
            .chain(self.aux_nodes.iter().map(|(_, n)| n.clone()))
            .collect();

        while !pending.is_empty() {
            let found = executor::discover_nodes(
                &pending,
                &self.registry,
                self.node.as_ref(),
                &self.aux_nodes,
                &external,
                &self.options.cancel,
                parallel,
            )?;
            pending = self.aux_nodes.merge(found);
        }
        Ok(())
    }

    fn encode_user_data(&self) -> Result<Vec<u8>> {
        let stored = format::split_user_data(&self.header.user_data)?.len();
        if stored == self.header_chunks.len() && self.header_chunks.iter().all(|c| !c.is_discovered()) {
            return Ok(self.header.user_data.clone());
        }

        let class_id = self.class_id();
        let mut session = self.session();
        let guard = match &self.node {
            Some(node) => Some(node.read()?),
            None => None,
        };

        let mut entries = Vec::with_capacity(self.header_chunks.len());
        for chunk in &self.header_chunks {
            let ChunkData::Header {
                raw,
                discovered,
                heavy,
            } = &chunk.data
            else {
                continue;
            };
            let handler = self
                .registry
                .chunk_entry(class_id, chunk.id())
                .filter(|e| e.config.kind == ChunkKind::Header && !e.config.ignored);
            let data = match (guard.as_ref(), handler) {
                (Some(node), Some(handler)) if *discovered => {
                    executor::encode_payload(&***node, chunk, handler, &mut session)?
                }
                _ => raw.clone(),
            };
            entries.push((chunk.wire_id(), *heavy, data));
        }
        format::build_user_data(&entries)
    }

    fn encode_body(&self, header: &mut Header) -> Result<Body> {
        if let Some(body) = &self.body {
            if body.compression() == header.body_compression {
                return Ok(body.clone());
            }
            let raw = body.decode(&self.compressors)?.into_owned();
            return Body::encode(raw, header.body_compression, &self.compressors);
        }

        let node = self
            .node
            .as_ref()
            .ok_or_else(|| GbxError::Internal("container has neither body nor node".into()))?;
        let mut session = self.session();
        let mut w = Writer::new();
        {
            let guard = node.read()?;
            executor::write_chunks(&**guard, &mut w, &mut session)?;
        }
        // Nodes inside undiscovered chunks are not counted by the writer.
        header.num_nodes = header.num_nodes.max(session.node_count().max(1));
        Body::encode(w.into_bytes(), header.body_compression, &self.compressors)
    }

    /// Serializes the container.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = self.header.clone();
        let body = self.encode_body(&mut header)?;
        header.user_data = self.encode_user_data()?;

        let mut w = Writer::with_capacity(body.stored_len() + header.user_data.len() + 64);
        header.write(&mut w)?;
        match &self.reference_table {
            Some(table) => table.write(&mut w, header.version)?,
            None => w.write_i32(0),
        }
        body.write(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Serializes the container into `out`.
    pub fn write<W: Write>(&self, mut out: W) -> Result<()> {
        out.write_all(&self.to_bytes()?)?;
        out.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Gbx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gbx")
            .field("header", &self.header)
            .field("header_chunks", &self.header_chunks.len())
            .field("reference_table", &self.reference_table.as_ref().map(|t| t.nodes.len()))
            .field("body_decoded", &self.is_body_decoded())
            .field("node", &self.node)
            .field("aux_nodes", &self.aux_nodes.len())
            .field("file_path", &self.file_path)
            .finish()
    }
}
