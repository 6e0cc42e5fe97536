#![allow(missing_docs)]

mod common;

use common::{CHALLENGE, CHALLENGE_HEADER};
use gamebox::inspector::GbxInspector;
use gamebox::{Chunk, ChunkId, Compression, GameBox, Result};

// --- TESTS ---

/// Inspecting a file reads the header only.
#[test]
fn test_inspect_file_header() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Inspect.Challenge.Gbx");
    std::fs::write(&path, common::challenge_bytes()?)?;

    let report = GameBox::inspect(&path, common::registry())?;
    assert_eq!(report.class_id, CHALLENGE);
    assert_eq!(report.class_name.as_deref(), Some("CGameCtnChallenge"));
    assert_eq!(report.num_nodes, 4);
    assert!(report.body_size.is_some());
    assert!(report.root.is_none());
    assert_eq!(report.header_chunks.len(), 1);
    assert_eq!(report.header_chunks[0].chunk_id, CHALLENGE_HEADER);
    assert!(report.header_chunks[0].discovered);
    assert!(!report.header_chunks[0].heavy);

    let text = report.to_string();
    assert!(text.starts_with("=== GBX INSPECTOR REPORT ==="));
    assert!(text.contains("0x03043008"));
    assert!(text.contains("CGameCtnChallenge"));
    Ok(())
}

/// A decoded body reports its chunks with their state.
#[test]
fn test_inspect_decoded_body() -> Result<()> {
    let registry = common::registry();
    let gbx = GameBox::parse_bytes(&common::challenge_bytes()?, registry)?;
    let report = GbxInspector::inspect(&gbx)?;

    let Some(root) = &report.root else {
        panic!("expected a decoded root");
    };
    let chunks: Vec<(u32, &str, bool)> = root
        .chunks
        .iter()
        .map(|c| (c.chunk_id, c.kind, c.discovered))
        .collect();
    assert_eq!(
        chunks,
        vec![
            (0x0304_3001, "unskippable", true),
            (0x0304_3002, "skippable", false),
            (0x0304_3003, "unskippable", true),
            (0x0304_3004, "skippable", true),
        ]
    );
    assert_eq!(root.chunks[0].version, Some(2));
    assert!(root.chunks[1].raw_size.is_some_and(|s| s > 0));
    assert!(report.body_size.is_none());
    assert!(report.to_string().contains("undiscovered"));
    Ok(())
}

/// Reports serialize to JSON; heavy header chunks keep their flag.
#[test]
fn test_report_json() -> Result<()> {
    let registry = common::registry();
    let mut gbx = common::container(common::challenge(Vec::new()), &registry)?;
    gbx.set_body_compression(Compression::Uncompressed);
    gbx.header_chunks_mut().remove(CHALLENGE_HEADER);
    gbx.header_chunks_mut()
        .insert(Chunk::header(ChunkId::new(CHALLENGE_HEADER), true));
    let parsed = GameBox::builder(registry)
        .header_only(true)
        .parse_bytes(&gbx.to_bytes()?)?;

    let report = GbxInspector::inspect(&parsed)?;
    let json = serde_json::to_value(&report)
        .map_err(|e| gamebox::GbxError::Internal(e.to_string()))?;
    assert_eq!(json["class_id"], serde_json::json!(CHALLENGE));
    assert_eq!(json["body_compression"], serde_json::json!("Uncompressed"));
    assert_eq!(json["header_chunks"][0]["heavy"], serde_json::json!(true));
    assert_eq!(json["root"], serde_json::Value::Null);
    Ok(())
}
