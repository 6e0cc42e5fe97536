#![allow(missing_docs)]

mod common;

use common::{CHALLENGE, Challenge, SAMPLE, Sample, write_skippable};
use gamebox::constants::{FACADE, SKIP};
use gamebox::executor;
use gamebox::id::LookbackTable;
use gamebox::io::{Cursor, Writer};
use gamebox::session::{CancellationToken, Session};
use gamebox::{Chunk, ChunkId, GbxError, Id, Result};

fn read_sample(bytes: &[u8]) -> Result<Sample> {
    let mut sample = Sample::default();
    let mut session = Session::new(common::registry());
    executor::read_chunks(&mut sample, &mut Cursor::new(bytes), &mut session)?;
    Ok(sample)
}

fn chunk_parse_error(bytes: &[u8]) -> Box<gamebox::error::ChunkParseError> {
    match read_sample(bytes) {
        Err(GbxError::ChunkParse(ctx)) => ctx,
        other => panic!("expected a chunk parse error, got {other:?}"),
    }
}

// --- TESTS ---

/// An unskippable chunk followed by an unknown empty skippable chunk survives a round trip
/// byte for byte.
#[test]
fn test_mixed_stream_round_trip() -> Result<()> {
    let mut w = Writer::new();
    w.write_u32(0x0301_A001);
    w.write_u64(0x1122_3344_5566_7788);
    write_skippable(&mut w, 0x0301_A002, &[])?;
    w.write_u32(FACADE);
    let bytes = w.into_bytes();

    let sample = read_sample(&bytes)?;
    assert_eq!(sample.value, 0x1122_3344_5566_7788);
    assert_eq!(sample.chunks.len(), 2);
    let unknown = sample.chunks.get(0x0301_A002).map(Chunk::is_discovered);
    assert_eq!(unknown, Some(false));

    let mut out = Writer::new();
    executor::write_chunks(&sample, &mut out, &mut Session::new(common::registry()))?;
    assert_eq!(out.as_slice(), bytes.as_slice());
    Ok(())
}

/// A stream holding only the terminator yields an empty node.
#[test]
fn test_terminator_only() -> Result<()> {
    let sample = read_sample(&FACADE.to_le_bytes())?;
    assert!(sample.chunks.is_empty());
    Ok(())
}

/// An unknown first chunk without the skip marker names no previous chunk.
#[test]
fn test_unknown_unskippable_first_chunk() {
    let mut w = Writer::new();
    w.write_u32(0x0301_A0FF);
    w.write_u32(0xDEAD_BEEF);
    let ctx = chunk_parse_error(w.as_slice());

    assert_eq!(ctx.chunk_id, 0x0301_A0FF);
    assert_eq!(ctx.previous_chunk_id, None);
    assert_eq!(ctx.class_name.as_deref(), Some("CSample"));
    assert!(ctx.to_string().contains("not a class"));
}

/// A later unknown chunk reports the chunk read before it.
#[test]
fn test_unknown_unskippable_after_known_chunk() {
    let mut w = Writer::new();
    w.write_u32(0x0301_A001);
    w.write_u64(1);
    w.write_u32(0x0777_7005);
    w.write_u32(0);
    let ctx = chunk_parse_error(w.as_slice());

    assert_eq!(ctx.chunk_id, 0x0777_7005);
    assert_eq!(ctx.class_name, None);
    assert_eq!(ctx.previous_chunk_id, Some(0x0301_A001));
    assert_eq!(ctx.previous_class_name.as_deref(), Some("CSample"));
}

/// An unskippable chunk registered as ignored cannot be stepped over.
#[test]
fn test_ignored_unskippable_chunk() {
    let mut w = Writer::new();
    w.write_u32(0x0301_A003);
    w.write_u64(5);
    w.write_u32(FACADE);

    let result = read_sample(w.as_slice());
    assert!(matches!(
        result,
        Err(GbxError::IgnoredUnskippableChunk {
            class_id: SAMPLE,
            chunk_id: 0x0301_A003
        })
    ));
}

/// Streams that stop early end the node instead of failing the read.
#[test]
fn test_truncated_streams_are_tolerated() -> Result<()> {
    // Payload cut in the middle.
    let mut w = Writer::new();
    w.write_u32(0x0301_A001);
    w.write_u64(9);
    w.write_u32(0x0301_A004);
    w.write_u32(0xABCD);
    let sample = read_sample(w.as_slice())?;
    assert_eq!(sample.value, 9);
    assert!(sample.chunks.contains(0x0301_A004));

    // No terminator.
    let mut w = Writer::new();
    w.write_u32(0x0301_A001);
    w.write_u64(3);
    w.write_u8(0x01);
    assert_eq!(read_sample(w.as_slice())?.value, 3);

    // Skippable length larger than the stream.
    let mut w = Writer::new();
    w.write_u32(0x0301_A002);
    w.write_u32(SKIP);
    w.write_i32(100);
    w.write_bytes(&[1, 2, 3]);
    let sample = read_sample(w.as_slice())?;
    assert!(sample.chunks.is_empty());
    Ok(())
}

/// A handler that runs out of bytes ends the node; the bytes left after the cut are
/// never read as a chunk header.
#[test]
fn test_truncated_handler_ends_node() -> Result<()> {
    let mut w = Writer::new();
    w.write_u32(0x0304_3001);
    w.write_i32(2);
    LookbackTable::new(3).write(&mut w, &Id::from("Track"))?;
    // The author claims 64 bytes but the stream holds 12.
    w.write_u32(0x4000_0000);
    w.write_i32(64);
    w.write_bytes(b"short string");

    let mut node = Challenge::default();
    let mut session = Session::new(common::registry());
    executor::read_chunks(&mut node, &mut Cursor::new(w.as_slice()), &mut session)?;

    assert_eq!(node.name, Id::from("Track"));
    assert_eq!(node.author, Id::default());
    assert_eq!(node.laps, 0);
    assert_eq!(node.chunks.len(), 1);
    assert_eq!(node.chunks.get(0x0304_3001).and_then(|c| c.version), Some(2));
    Ok(())
}

/// The first of two chunks with the same ID is kept.
#[test]
fn test_duplicate_chunk_keeps_one_entry() -> Result<()> {
    let mut w = Writer::new();
    write_skippable(&mut w, 0x0301_A00A, &[1])?;
    write_skippable(&mut w, 0x0301_A00A, &[2, 2])?;
    w.write_u32(FACADE);

    let sample = read_sample(w.as_slice())?;
    assert_eq!(sample.chunks.len(), 1);
    assert_eq!(sample.chunks.get(0x0301_A00A).and_then(Chunk::raw), Some(&[1u8][..]));
    Ok(())
}

/// Lazy chunks are decoded on discovery, once; eager chunks during the read.
#[test]
fn test_discover_is_idempotent() -> Result<()> {
    let registry = common::registry();
    let source = common::challenge(Vec::new());
    let mut w = Writer::new();
    executor::write_chunks(&source, &mut w, &mut Session::new(registry.clone()))?;
    let bytes = w.into_bytes();

    let mut node = Challenge::default();
    let mut session = Session::new(registry.clone());
    executor::read_chunks(&mut node, &mut Cursor::new(&bytes), &mut session)?;

    let lazy = ChunkId::new(0x0304_3002);
    assert_eq!(node.name, Id::from("Spring Loop"));
    assert_eq!(node.tags, source.tags);
    assert!(node.comment.is_empty());
    assert_eq!(node.chunks.undiscovered(), vec![lazy]);

    executor::discover(&mut node, lazy, &mut session)?;
    assert_eq!(node.comment, "Mind the gap");
    assert_eq!(node.mood, Id::from("Sunset"));
    assert!(node.chunks.undiscovered().is_empty());

    node.comment = "edited".to_string();
    executor::discover(&mut node, lazy, &mut session)?;
    assert_eq!(node.comment, "edited");

    let missing = executor::discover(&mut node, ChunkId::new(0x0304_30FF), &mut session);
    assert!(matches!(missing, Err(GbxError::Unsupported(_))));

    node.comment = "Mind the gap".to_string();
    let mut out = Writer::new();
    executor::write_chunks(&node, &mut out, &mut Session::new(registry))?;
    assert_eq!(out.as_slice(), bytes.as_slice());
    Ok(())
}

/// A lazy chunk carries its own lookback table; the body table is unaffected.
#[test]
fn test_lazy_chunk_private_lookback() -> Result<()> {
    let mut payload = Writer::new();
    payload.write_string("quiet")?;
    LookbackTable::new(3).write(&mut payload, &Id::from("Night"))?;

    let mut lookback = LookbackTable::new(3);
    let mut w = Writer::new();
    w.write_u32(0x0304_3001);
    w.write_i32(1);
    lookback.write(&mut w, &Id::from("Track"))?;
    lookback.write(&mut w, &Id::from("Track"))?;
    write_skippable(&mut w, 0x0304_3002, payload.as_slice())?;
    w.write_u32(FACADE);

    let mut node = Challenge::default();
    let mut session = Session::new(common::registry());
    executor::read_chunks(&mut node, &mut Cursor::new(w.as_slice()), &mut session)?;
    assert_eq!(node.laps, 0);
    assert_eq!(node.chunks.get(0x0304_3001).and_then(|c| c.version), Some(1));

    executor::discover_node(&mut node, &mut session)?;
    assert_eq!(node.comment, "quiet");
    assert_eq!(node.mood, Id::from("Night"));
    assert_eq!(session.lookback().strings(), ["Track"]);
    Ok(())
}

/// Legacy chunk IDs are normalized for dispatch and written back as found.
#[test]
fn test_aliased_chunk_ids() -> Result<()> {
    let registry = common::registry();
    let mut lookback = LookbackTable::new(3);
    let mut w = Writer::new();
    w.write_u32(0x2400_3001);
    w.write_i32(2);
    lookback.write(&mut w, &Id::from("Old"))?;
    lookback.write(&mut w, &Id::from("author"))?;
    w.write_i32(5);
    w.write_u32(FACADE);
    let bytes = w.into_bytes();

    let mut node = Challenge::default();
    executor::read_chunks(&mut node, &mut Cursor::new(&bytes), &mut Session::new(registry.clone()))?;
    assert_eq!(node.laps, 5);
    let chunk = node.chunks.get(0x0304_3001).map(|c| (c.id().class_id(), c.wire_id()));
    assert_eq!(chunk, Some((CHALLENGE, 0x2400_3001)));

    let mut out = Writer::new();
    executor::write_chunks(&node, &mut out, &mut Session::new(registry))?;
    assert_eq!(out.as_slice(), bytes.as_slice());
    Ok(())
}

/// Unskippable chunks cannot be written without a handler.
#[test]
fn test_write_requires_handler() {
    let mut sample = Sample::default();
    sample.chunks.insert(Chunk::unskippable(ChunkId::new(0x0301_A0FF)));

    let result = executor::write_chunks(&sample, &mut Writer::new(), &mut Session::new(common::registry()));
    assert!(matches!(result, Err(GbxError::Unsupported(_))));
}

/// A cancelled token stops the read before the next chunk.
#[test]
fn test_cancellation() {
    let token = CancellationToken::new();
    token.cancel();
    let mut session = Session::new(common::registry()).with_cancellation(token);

    let mut sample = Sample::default();
    let result = executor::read_chunks(&mut sample, &mut Cursor::new(&FACADE.to_le_bytes()), &mut session);
    assert!(matches!(result, Err(GbxError::Cancelled)));
}
