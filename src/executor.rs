//! The Chunk Dispatch Engine.
//!
//! A node's body is a flat sequence of chunks terminated by `0xFACADE01`:
//!
//! ```text
//! [chunk id] [payload]                              unskippable
//! [chunk id] ["SKIP"] [i32 length] [payload]        skippable
//! ...
//! [0xFACADE01]
//! ```
//!
//! Unskippable payloads have no length, so the reader must know their handler to find the
//! next chunk. Skippable payloads are stored raw and decoded later through [`discover`].
//!
//! Reading is a small state machine per node:
//!
//! ```text
//! NextChunkHeader ──► Unskippable ──┐
//!        │  ▲                        │
//!        │  └──── SkippableKnown ◄───┤
//!        │  └──── SkippableUnknown ◄─┘
//!        ▼
//!       Done
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::error::{ChunkParseError, GbxError, Result};
use crate::graph::{Chunk, ChunkData, ChunkEntry, ChunkId, ChunkKind, Node, NodeRef};
use crate::io::{Cursor, Writer};
use crate::registry::NodeRegistry;
use crate::resolver::AuxNodeTable;
use crate::session::{CancellationToken, ChunkReader, ChunkWriter, Session};

/// Terminates every chunk stream.
pub const FACADE: u32 = 0xFACA_DE01;
/// Marks a skippable chunk (`"PIKS"` little-endian).
pub const SKIP: u32 = 0x534B_4950;

enum State {
    NextChunkHeader,
    Unskippable {
        id: ChunkId,
        wire_id: u32,
        entry: ChunkEntry,
    },
    SkippableKnown {
        id: ChunkId,
        wire_id: u32,
        entry: ChunkEntry,
    },
    SkippableUnknown {
        id: ChunkId,
        wire_id: u32,
    },
    Done,
}

/// Reads chunks into `node` until `0xFACADE01` or the end of the stream.
pub fn read_chunks(node: &mut dyn Node, cursor: &mut Cursor<'_>, session: &mut Session) -> Result<()> {
    let registry = Arc::clone(session.registry());
    let class_id = node.class_id();
    let mut previous: Option<ChunkId> = None;
    let mut state = State::NextChunkHeader;

    loop {
        state = match state {
            State::NextChunkHeader => {
                session.check_cancelled()?;
                if cursor.remaining() < 4 {
                    warn!(
                        "[{}] stream ended inside node 0x{class_id:08X} at offset {} (last chunk {:?}), treating as end of node",
                        session.token(),
                        cursor.position(),
                        previous
                    );
                    State::Done
                } else {
                    let wire_id = cursor.read_u32()?;
                    if wire_id == FACADE {
                        State::Done
                    } else {
                        let id = ChunkId::new(registry.normalize_chunk_id(wire_id));
                        match registry.chunk_entry(class_id, id) {
                            Some(entry) if entry.config.kind == ChunkKind::Unskippable => {
                                State::Unskippable {
                                    id,
                                    wire_id,
                                    entry: entry.clone(),
                                }
                            }
                            Some(entry) if entry.config.kind == ChunkKind::Skippable => {
                                State::SkippableKnown {
                                    id,
                                    wire_id,
                                    entry: entry.clone(),
                                }
                            }
                            _ => State::SkippableUnknown { id, wire_id },
                        }
                    }
                }
            }
            State::Unskippable { id, wire_id, entry } => {
                if entry.config.ignored {
                    return Err(GbxError::IgnoredUnskippableChunk {
                        class_id,
                        chunk_id: id.as_u32(),
                    });
                }
                let (version, truncated) = run_handler(node, cursor, session, id, &entry)?;
                let mut chunk = Chunk::from_wire(id, wire_id, ChunkData::Unskippable);
                chunk.version = version;
                insert_chunk(node, chunk, session);
                previous = Some(id);
                // Without a length there is no way to find the next chunk.
                if truncated { State::Done } else { State::NextChunkHeader }
            }
            State::SkippableKnown { id, wire_id, entry } => {
                match read_skippable(node, cursor, session, &*registry, id, wire_id, previous, Some(&entry))? {
                    true => {
                        previous = Some(id);
                        State::NextChunkHeader
                    }
                    false => State::Done,
                }
            }
            State::SkippableUnknown { id, wire_id } => {
                match read_skippable(node, cursor, session, &*registry, id, wire_id, previous, None)? {
                    true => {
                        previous = Some(id);
                        State::NextChunkHeader
                    }
                    false => State::Done,
                }
            }
            State::Done => return Ok(()),
        };
    }
}

/// Invokes a read handler. A premature end of stream is logged and reported as `true`
/// next to the chunk version.
fn run_handler(
    node: &mut dyn Node,
    cursor: &mut Cursor<'_>,
    session: &mut Session,
    id: ChunkId,
    entry: &ChunkEntry,
) -> Result<(Option<i32>, bool)> {
    let token = session.token();
    let mut reader = ChunkReader::new(cursor, session, id);
    match entry.handler.read(node, &mut reader) {
        Ok(()) => Ok((reader.version(), false)),
        Err(e) if e.is_end_of_stream() => {
            warn!("[{token}] chunk {id} ended early: {e}");
            Ok((reader.version(), true))
        }
        Err(e) => Err(e),
    }
}

/// Reads a `SKIP`-framed chunk. Returns `false` if the stream ended inside it.
#[allow(clippy::too_many_arguments)]
fn read_skippable(
    node: &mut dyn Node,
    cursor: &mut Cursor<'_>,
    session: &mut Session,
    registry: &dyn NodeRegistry,
    id: ChunkId,
    wire_id: u32,
    previous: Option<ChunkId>,
    entry: Option<&ChunkEntry>,
) -> Result<bool> {
    let marker = match cursor.read_u32() {
        Ok(marker) => marker,
        Err(e) if e.is_end_of_stream() => {
            warn!("[{}] stream ended before chunk {id} payload", session.token());
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    if marker != SKIP {
        return Err(ChunkParseError {
            chunk_id: id.as_u32(),
            previous_chunk_id: previous.map(|p| p.as_u32()),
            class_name: registry.class_name(id.class_id()).map(str::to_owned),
            previous_class_name: previous
                .and_then(|p| registry.class_name(p.class_id()))
                .map(str::to_owned),
        }
        .into());
    }

    let raw = match cursor.read_byte_array() {
        Ok(raw) => raw,
        Err(e) if e.is_end_of_stream() => {
            warn!("[{}] skippable chunk {id} is truncated: {e}", session.token());
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let mut chunk = Chunk::from_wire(
        id,
        wire_id,
        ChunkData::Skippable {
            raw: raw.to_vec(),
            discovered: false,
        },
    );

    if let Some(entry) = entry.filter(|e| e.config.eager && !e.config.ignored) {
        chunk.version = decode_payload(node, raw, session, id, entry)?;
        chunk.set_discovered();
    } else if entry.is_none() {
        debug!("[{}] unknown skippable chunk {id} ({} bytes)", session.token(), raw.len());
    }

    insert_chunk(node, chunk, session);
    Ok(true)
}

fn insert_chunk(node: &mut dyn Node, chunk: Chunk, session: &Session) {
    let id = chunk.id();
    if !node.chunks_mut().insert(chunk) {
        warn!("[{}] duplicate chunk {id} ignored", session.token());
    }
}

/// Decodes a stored payload through a private cursor.
///
/// The payload is length-framed, so a handler running past its end only cuts this chunk
/// short; the surrounding stream is unaffected.
pub(crate) fn decode_payload(
    node: &mut dyn Node,
    raw: &[u8],
    session: &mut Session,
    id: ChunkId,
    entry: &ChunkEntry,
) -> Result<Option<i32>> {
    let mut cursor = Cursor::new(raw);
    let (version, _) = run_handler(node, &mut cursor, session, id, entry)?;
    if cursor.remaining() > 0 {
        debug!(
            "[{}] chunk {id} not fully parsed ({}/{} bytes)",
            session.token(),
            cursor.position(),
            raw.len()
        );
    }
    Ok(version)
}

/// Decodes one stored skippable or header chunk into its node. Idempotent.
///
/// Chunks without a registered handler, and chunks registered as ignored, stay undiscovered.
pub fn discover(node: &mut dyn Node, chunk_id: ChunkId, session: &mut Session) -> Result<()> {
    let class_id = node.class_id();
    let chunk = node.chunks().get(chunk_id).ok_or_else(|| {
        GbxError::Unsupported(format!("node 0x{class_id:08X} has no chunk {chunk_id}"))
    })?;
    if chunk.is_discovered() {
        return Ok(());
    }
    let raw = chunk.raw().map(<[u8]>::to_vec).unwrap_or_default();

    let registry = Arc::clone(session.registry());
    let Some(entry) = registry.chunk_entry(class_id, chunk_id) else {
        debug!("[{}] no handler for chunk {chunk_id}, left undiscovered", session.token());
        return Ok(());
    };
    if entry.config.ignored {
        return Ok(());
    }

    let version = session.with_private_lookback(|s| decode_payload(node, &raw, s, chunk_id, entry))?;
    if let Some(chunk) = node.chunks_mut().get_mut(chunk_id) {
        chunk.version = version;
        chunk.set_discovered();
    }
    Ok(())
}

/// Discovers every undiscovered chunk of `node`.
pub fn discover_node(node: &mut dyn Node, session: &mut Session) -> Result<()> {
    for id in node.chunks().undiscovered() {
        session.check_cancelled()?;
        discover(node, id, session)?;
    }
    Ok(())
}

pub(crate) fn encode_payload(node: &dyn Node, chunk: &Chunk, entry: &ChunkEntry, session: &mut Session) -> Result<Vec<u8>> {
    let mut buf = Writer::new();
    let mut writer = ChunkWriter::new(&mut buf, session, chunk.id(), chunk.version);
    entry.handler.write(node, &mut writer)?;
    Ok(buf.into_bytes())
}

/// Writes every chunk of `node` followed by `0xFACADE01`.
pub fn write_chunks(node: &dyn Node, w: &mut Writer, session: &mut Session) -> Result<()> {
    let registry = Arc::clone(session.registry());
    let class_id = node.class_id();

    for chunk in node.chunks() {
        session.check_cancelled()?;
        let entry = registry
            .chunk_entry(class_id, chunk.id())
            .filter(|e| !e.config.ignored);

        match (&chunk.data, entry) {
            (ChunkData::Header { .. }, _) => continue,
            (ChunkData::Skippable { raw, discovered }, entry) => {
                let body = match entry {
                    Some(entry) if *discovered && entry.config.eager => {
                        encode_payload(node, chunk, entry, session)?
                    }
                    Some(entry) if *discovered => {
                        session.with_private_lookback(|s| encode_payload(node, chunk, entry, s))?
                    }
                    _ => raw.clone(),
                };
                w.write_u32(chunk.wire_id());
                w.write_u32(SKIP);
                w.write_byte_array(&body)?;
            }
            (ChunkData::Unskippable, Some(entry)) => {
                let body = encode_payload(node, chunk, entry, session)?;
                w.write_u32(chunk.wire_id());
                w.write_bytes(&body);
            }
            (ChunkData::Unskippable, None) => {
                return Err(GbxError::Unsupported(format!(
                    "no handler to write chunk {} of node 0x{class_id:08X}",
                    chunk.id()
                )));
            }
        }
    }

    w.write_u32(FACADE);
    Ok(())
}

/// Context shared among discovery workers.
struct DiscoveryContext<'a> {
    registry: &'a Arc<dyn NodeRegistry>,
    root: Option<&'a NodeRef>,
    seed: &'a AuxNodeTable,
    external: &'a [i32],
    cancel: &'a CancellationToken,
    abort_flag: AtomicBool,
    error_capture: Mutex<Option<GbxError>>,
    discovered: Mutex<AuxNodeTable>,
}

impl DiscoveryContext<'_> {
    fn signal_error(&self, err: GbxError) {
        let mut guard = self.error_capture.lock().unwrap_or_else(|p| p.into_inner());
        if guard.is_none() {
            *guard = Some(err);
            self.abort_flag.store(true, Ordering::SeqCst);
        }
    }

    fn should_abort(&self) -> bool {
        self.abort_flag.load(Ordering::Relaxed)
    }

    fn run(&self, node: &NodeRef) -> Result<()> {
        let mut session = Session::new(Arc::clone(self.registry))
            .with_aux_nodes(self.seed.clone())
            .with_external_indices(self.external.iter().copied())
            .with_cancellation(self.cancel.clone());
        if let Some(root) = self.root {
            session = session.with_root(root.clone());
        }
        {
            let mut guard = node.write()?;
            discover_node(&mut **guard, &mut session)?;
        }
        let found = session.into_aux_nodes();
        if found.len() > self.seed.len() {
            let mut all = self
                .discovered
                .lock()
                .map_err(|_| GbxError::Internal("Discovery mutex poisoned".into()))?;
            all.merge(found);
        }
        Ok(())
    }
}

/// Discovers all chunks of `nodes`, one task per node when `parallel` is set.
///
/// Each task gets its own session seeded with `root` and `seed`. Returns the table of inline
/// nodes found inside the discovered chunks (a superset of `seed`).
pub(crate) fn discover_nodes(
    nodes: &[NodeRef],
    registry: &Arc<dyn NodeRegistry>,
    root: Option<&NodeRef>,
    seed: &AuxNodeTable,
    external: &[i32],
    cancel: &CancellationToken,
    parallel: bool,
) -> Result<AuxNodeTable> {
    let ctx = DiscoveryContext {
        registry,
        root,
        seed,
        external,
        cancel,
        abort_flag: AtomicBool::new(false),
        error_capture: Mutex::new(None),
        discovered: Mutex::new(seed.clone()),
    };

    if parallel {
        rayon::scope(|s| {
            let ctx_ref = &ctx;
            for node in nodes {
                s.spawn(move |_| {
                    if ctx_ref.should_abort() {
                        return;
                    }
                    if let Err(e) = ctx_ref.run(node) {
                        ctx_ref.signal_error(e);
                    }
                });
            }
        });
    } else {
        for node in nodes {
            if let Err(e) = ctx.run(node) {
                ctx.signal_error(e);
                break;
            }
        }
    }

    if ctx.should_abort() {
        let guard = ctx.error_capture.lock().unwrap_or_else(|p| p.into_inner());
        return Err(guard
            .clone()
            .unwrap_or_else(|| GbxError::Internal("Unknown discovery error".into())));
    }

    ctx.discovered
        .into_inner()
        .map_err(|_| GbxError::Internal("Discovery mutex poisoned".into()))
}
