#![allow(dead_code)]

use std::sync::Arc;

use gamebox::graph::ChunkData;
use gamebox::io::Writer;
use gamebox::session::{ChunkReader, ChunkWriter};
use gamebox::{
    Chunk, ChunkConfig, ChunkId, ChunkSet, Gbx, Id, Ident, NodeClass, NodeLink, NodeRef,
    NodeRegistry, Registry, Result, rt,
};

pub const CHALLENGE: u32 = 0x0304_3000;
pub const CHALLENGE_LEGACY: u32 = 0x2400_3000;
pub const BLOCK: u32 = 0x0305_7000;
pub const SAMPLE: u32 = 0x0301_A000;

pub const CHALLENGE_HEADER: u32 = 0x0304_3008;

// --- NODE TYPES ---

#[derive(Debug, Default)]
pub struct Challenge {
    pub chunks: ChunkSet,
    pub name: Id,
    pub author: Id,
    pub laps: i32,
    pub comment: String,
    pub mood: Id,
    pub blocks: Vec<Option<NodeLink>>,
    pub tags: Vec<Id>,
    pub header_name: String,
    pub header_ident: Ident,
}
gamebox::impl_node!(Challenge, CHALLENGE);

#[derive(Debug, Default)]
pub struct Block {
    pub chunks: ChunkSet,
    pub name: Id,
    pub direction: u8,
    pub variant: i32,
    pub linked: Option<NodeLink>,
    pub parent: Option<NodeLink>,
}
gamebox::impl_node!(Block, BLOCK);

#[derive(Debug, Default)]
pub struct Sample {
    pub chunks: ChunkSet,
    pub value: u64,
    pub tail: u64,
}
gamebox::impl_node!(Sample, SAMPLE);

// --- CHUNK HANDLERS ---

fn read_challenge_001(n: &mut Challenge, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    let version = r.read_version()?;
    n.name = r.read_id()?;
    n.author = r.read_id()?;
    if version >= 2 {
        n.laps = r.read_i32()?;
    }
    Ok(())
}

fn write_challenge_001(n: &Challenge, w: &mut ChunkWriter<'_>) -> Result<()> {
    let version = w.write_version(2);
    w.write_id(&n.name)?;
    w.write_id(&n.author)?;
    if version >= 2 {
        w.write_i32(n.laps);
    }
    Ok(())
}

fn read_challenge_002(n: &mut Challenge, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    n.comment = r.read_string()?;
    n.mood = r.read_id()?;
    Ok(())
}

fn write_challenge_002(n: &Challenge, w: &mut ChunkWriter<'_>) -> Result<()> {
    w.write_string(&n.comment)?;
    w.write_id(&n.mood)
}

fn read_challenge_003(n: &mut Challenge, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    n.blocks = r.read_node_ref_list()?;
    Ok(())
}

fn write_challenge_003(n: &Challenge, w: &mut ChunkWriter<'_>) -> Result<()> {
    w.write_node_ref_list(&n.blocks)
}

fn read_challenge_004(n: &mut Challenge, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    let count = r.read_length()?;
    n.tags.clear();
    for _ in 0..count {
        let tag = r.read_id()?;
        n.tags.push(tag);
    }
    Ok(())
}

fn write_challenge_004(n: &Challenge, w: &mut ChunkWriter<'_>) -> Result<()> {
    w.write_length(n.tags.len())?;
    for tag in &n.tags {
        w.write_id(tag)?;
    }
    Ok(())
}

fn read_challenge_008(n: &mut Challenge, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    r.read_version()?;
    n.header_name = r.read_string()?;
    n.header_ident = r.read_ident()?;
    Ok(())
}

fn write_challenge_008(n: &Challenge, w: &mut ChunkWriter<'_>) -> Result<()> {
    w.write_version(1);
    w.write_string(&n.header_name)?;
    w.write_ident(&n.header_ident)
}

fn read_block_002(n: &mut Block, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    n.name = r.read_id()?;
    n.direction = r.read_u8()?;
    Ok(())
}

fn write_block_002(n: &Block, w: &mut ChunkWriter<'_>) -> Result<()> {
    w.write_id(&n.name)?;
    w.write_u8(n.direction);
    Ok(())
}

fn read_block_003(n: &mut Block, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    n.variant = r.read_i32()?;
    n.linked = r.read_node_ref()?;
    Ok(())
}

fn write_block_003(n: &Block, w: &mut ChunkWriter<'_>) -> Result<()> {
    w.write_i32(n.variant);
    w.write_node_ref(n.linked.as_ref())
}

fn read_block_004(n: &mut Block, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    n.parent = r.read_node_ref()?;
    Ok(())
}

fn write_block_004(n: &Block, w: &mut ChunkWriter<'_>) -> Result<()> {
    w.write_node_ref(n.parent.as_ref())
}

fn read_sample_001(n: &mut Sample, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    n.value = r.read_u64()?;
    Ok(())
}

fn write_sample_001(n: &Sample, w: &mut ChunkWriter<'_>) -> Result<()> {
    w.write_u64(n.value);
    Ok(())
}

fn read_sample_004(n: &mut Sample, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    n.tail = r.read_u64()?;
    Ok(())
}

fn write_sample_004(n: &Sample, w: &mut ChunkWriter<'_>) -> Result<()> {
    w.write_u64(n.tail);
    Ok(())
}

// --- REGISTRY ---

pub fn registry() -> Arc<dyn NodeRegistry> {
    let mut registry = Registry::new();
    registry
        .register(
            NodeClass::new(CHALLENGE, "CGameCtnChallenge")
                .node::<Challenge>()
                .chunk(
                    0x0304_3001,
                    ChunkConfig::unskippable(),
                    rt::handler::<Challenge>(read_challenge_001, write_challenge_001),
                )
                .chunk(
                    0x0304_3002,
                    ChunkConfig::skippable(),
                    rt::handler::<Challenge>(read_challenge_002, write_challenge_002),
                )
                .chunk(
                    0x0304_3003,
                    ChunkConfig::unskippable(),
                    rt::handler::<Challenge>(read_challenge_003, write_challenge_003),
                )
                .chunk(
                    0x0304_3004,
                    ChunkConfig::skippable().eager(),
                    rt::handler::<Challenge>(read_challenge_004, write_challenge_004),
                )
                .chunk(
                    CHALLENGE_HEADER,
                    ChunkConfig::header(),
                    rt::handler::<Challenge>(read_challenge_008, write_challenge_008),
                ),
        )
        .register(
            NodeClass::new(BLOCK, "CGameCtnBlock")
                .node::<Block>()
                .chunk(
                    0x0305_7002,
                    ChunkConfig::unskippable(),
                    rt::handler::<Block>(read_block_002, write_block_002),
                )
                .chunk(
                    0x0305_7003,
                    ChunkConfig::skippable(),
                    rt::handler::<Block>(read_block_003, write_block_003),
                )
                .chunk(
                    0x0305_7004,
                    ChunkConfig::unskippable(),
                    rt::handler::<Block>(read_block_004, write_block_004),
                ),
        )
        .register(
            NodeClass::new(SAMPLE, "CSample")
                .node::<Sample>()
                .chunk(
                    0x0301_A001,
                    ChunkConfig::unskippable(),
                    rt::handler::<Sample>(read_sample_001, write_sample_001),
                )
                .chunk(
                    0x0301_A003,
                    ChunkConfig::unskippable().ignored(),
                    rt::handler::<Sample>(read_sample_004, write_sample_004),
                )
                .chunk(
                    0x0301_A004,
                    ChunkConfig::unskippable(),
                    rt::handler::<Sample>(read_sample_004, write_sample_004),
                ),
        )
        .alias(CHALLENGE_LEGACY, CHALLENGE);
    registry.into_shared()
}

// --- FIXTURES ---

pub fn block(name: &str, direction: u8) -> NodeRef {
    let mut chunks = ChunkSet::new();
    chunks.insert(Chunk::unskippable(ChunkId::new(0x0305_7002)));
    NodeRef::from_node(Block {
        chunks,
        name: Id::from(name),
        direction,
        ..Block::default()
    })
}

/// A block whose skippable chunk references `linked`.
pub fn linking_block(name: &str, linked: NodeRef) -> NodeRef {
    let mut chunks = ChunkSet::new();
    chunks.insert(Chunk::unskippable(ChunkId::new(0x0305_7002)));
    chunks.insert(Chunk::skippable(ChunkId::new(0x0305_7003)));
    NodeRef::from_node(Block {
        chunks,
        name: Id::from(name),
        variant: 7,
        linked: Some(NodeLink::Inline(linked)),
        ..Block::default()
    })
}

pub fn challenge(blocks: Vec<Option<NodeLink>>) -> Challenge {
    let mut chunks = ChunkSet::new();
    chunks.insert(Chunk::unskippable(ChunkId::new(0x0304_3001)));
    chunks.insert(Chunk::skippable(ChunkId::new(0x0304_3002)));
    chunks.insert(Chunk::unskippable(ChunkId::new(0x0304_3003)));
    chunks.insert(Chunk::skippable(ChunkId::new(0x0304_3004)));
    Challenge {
        chunks,
        name: Id::from("Spring Loop"),
        author: Id::from("nadeo"),
        laps: 3,
        comment: "Mind the gap".to_string(),
        mood: Id::from("Sunset"),
        blocks,
        tags: vec![Id::from("race"), Id::from("nadeo"), Id::from("race"), Id::CollectionIndex(7)],
        header_name: "Spring Loop".to_string(),
        header_ident: Ident::new("UID42", 7, "nadeo"),
    }
}

/// A challenge with three blocks: one referenced twice, one through a null slot, and one
/// carrying a node that only appears inside a skippable chunk.
pub fn challenge_graph() -> Challenge {
    let start = block("StadiumRoadMainStartLine", 2);
    let nested = block("StadiumCircuitToRoadMain", 1);
    let finish = linking_block("StadiumRoadMainFinishLine", nested);
    challenge(vec![
        Some(NodeLink::Inline(start.clone())),
        Some(NodeLink::Inline(start)),
        None,
        Some(NodeLink::Inline(finish)),
    ])
}

/// Wraps a challenge into a container with its header chunk.
pub fn container(node: Challenge, registry: &Arc<dyn NodeRegistry>) -> Result<Gbx> {
    let mut gbx = Gbx::new(NodeRef::from_node(node), Arc::clone(registry))?;
    gbx.header_chunks_mut()
        .insert(Chunk::header(ChunkId::new(CHALLENGE_HEADER), false));
    Ok(gbx)
}

pub fn challenge_bytes() -> Result<Vec<u8>> {
    let registry = registry();
    container(challenge_graph(), &registry)?.to_bytes()
}

/// Raw payload of an undiscovered chunk.
pub fn raw_payload(chunk: &Chunk) -> Option<Vec<u8>> {
    match &chunk.data {
        ChunkData::Skippable { raw, .. } | ChunkData::Header { raw, .. } => Some(raw.clone()),
        ChunkData::Unskippable => None,
    }
}

/// Appends a chunk ID, the `SKIP` marker and a length-prefixed payload.
pub fn write_skippable(w: &mut Writer, chunk_id: u32, payload: &[u8]) -> Result<()> {
    w.write_u32(chunk_id);
    w.write_u32(gamebox::constants::SKIP);
    w.write_byte_array(payload)
}
