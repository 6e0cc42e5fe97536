#![allow(missing_docs)]

mod common;

use std::collections::HashSet;
use std::path::Path;

use common::{BLOCK, Block, block};
use gamebox::io::{Cursor, Writer};
use gamebox::reftable::{ExternalFile, ExternalNode, RefFolder, ReferenceTable};
use gamebox::resolver::{self, AuxNodeTable};
use gamebox::session::Session;
use gamebox::{Chunk, ChunkId, GbxError, NodeLink, NodeRef, Result};

fn name_of(link: &Option<NodeLink>) -> Result<String> {
    match link.as_ref().and_then(NodeLink::as_inline) {
        Some(node) => node.with::<Block, _>(|b| b.name.to_string()),
        None => Ok(String::new()),
    }
}

// --- TESTS ---

/// Repeated references keep pointing at one node after a round trip.
#[test]
fn test_back_references_preserve_identity() -> Result<()> {
    let registry = common::registry();
    let shared = block("Shared", 0);
    let other = block("Other", 1);
    let links = vec![
        Some(NodeLink::Inline(shared.clone())),
        None,
        Some(NodeLink::Inline(other)),
        Some(NodeLink::Inline(shared)),
    ];

    let mut w = Writer::new();
    let mut session = Session::new(registry.clone());
    for link in &links {
        resolver::write_node_ref(&mut w, &mut session, link.as_ref())?;
    }
    assert_eq!(session.aux_nodes().len(), 2);
    let bytes = w.into_bytes();
    assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0x00, 0x70, 0x05, 0x03]);

    let mut session = Session::new(registry);
    let mut r = Cursor::new(&bytes);
    let read: Vec<Option<NodeLink>> = (0..links.len())
        .map(|_| resolver::read_node_ref(&mut r, &mut session))
        .collect::<Result<_>>()?;
    assert_eq!(r.remaining(), 0);

    assert!(read[1].is_none());
    let first = read[0].as_ref().and_then(NodeLink::as_inline);
    let last = read[3].as_ref().and_then(NodeLink::as_inline);
    match (first, last) {
        (Some(a), Some(b)) => assert!(a.ptr_eq(b)),
        _ => panic!("expected inline nodes"),
    }
    assert_eq!(name_of(&read[0])?, "Shared");
    assert_eq!(name_of(&read[2])?, "Other");
    assert_eq!(session.aux_nodes().get(1).map(|n| n.class_id()).transpose()?, Some(BLOCK));
    Ok(())
}

/// A node referencing itself is bound before its chunks are read.
#[test]
fn test_self_reference() -> Result<()> {
    let registry = common::registry();
    let node = block("Loop", 0);
    let handle = node.clone();
    node.with_mut::<Block, _>(|b| {
        b.chunks.insert(Chunk::unskippable(ChunkId::new(0x0305_7004)));
        b.parent = Some(NodeLink::Inline(handle));
    })?;

    let mut w = Writer::new();
    resolver::write_node_ref(&mut w, &mut Session::new(registry.clone()), Some(&NodeLink::Inline(node)))?;
    let bytes = w.into_bytes();

    let mut session = Session::new(registry);
    let read = resolver::read_node_ref(&mut Cursor::new(&bytes), &mut session)?;
    let Some(NodeLink::Inline(read)) = read else {
        panic!("expected an inline node");
    };
    let parent = read.with::<Block, _>(|b| b.parent.clone())?;
    match parent {
        Some(NodeLink::Inline(parent)) => assert!(parent.ptr_eq(&read)),
        other => panic!("expected a self link, got {other:?}"),
    }
    Ok(())
}

/// Reference-table indices are neither read inline nor handed out by the writer.
#[test]
fn test_external_indices() -> Result<()> {
    let registry = common::registry();

    let mut w = Writer::new();
    let mut session = Session::new(registry.clone()).with_external_indices([0, 2]);
    resolver::write_node_ref(&mut w, &mut session, Some(&NodeLink::Inline(block("A", 0))))?;
    resolver::write_node_ref(&mut w, &mut session, Some(&NodeLink::Inline(block("B", 0))))?;
    resolver::write_node_ref(&mut w, &mut session, Some(&NodeLink::External { node_index: 2 }))?;
    let indices: Vec<i32> = session.aux_nodes().iter().map(|(i, _)| i).collect();
    assert_eq!(indices, vec![1, 3]);
    let bytes = w.into_bytes();

    let mut session = Session::new(registry).with_external_indices([0, 2]);
    let mut r = Cursor::new(&bytes);
    assert_eq!(name_of(&resolver::read_node_ref(&mut r, &mut session)?)?, "A");
    assert_eq!(name_of(&resolver::read_node_ref(&mut r, &mut session)?)?, "B");
    let external = resolver::read_node_ref(&mut r, &mut session)?;
    assert_eq!(external.and_then(|l| l.external_index()), Some(2));
    Ok(())
}

/// An unregistered class behind a new index fails the read.
#[test]
fn test_unknown_class() {
    let mut w = Writer::new();
    w.write_i32(0);
    w.write_u32(0x0909_9000);
    w.write_u32(gamebox::constants::FACADE);
    let bytes = w.into_bytes();

    let mut session = Session::new(common::registry());
    let result = resolver::read_node_ref(&mut Cursor::new(&bytes), &mut session);
    assert!(matches!(result, Err(GbxError::NodeNotImplemented(0x0909_9000))));
}

/// Binding rules of the auxiliary node table.
#[test]
fn test_aux_table_binding() -> Result<()> {
    let mut table = AuxNodeTable::new();
    let a = NodeRef::from_node(Block::default());
    let b = NodeRef::from_node(Block::default());

    table.bind(4, a.clone())?;
    assert!(table.bind(4, b.clone()).is_err());
    assert!(table.bind(-3, b.clone()).is_err());
    assert_eq!(table.size(), 5);
    assert_eq!(table.append(b.clone(), &HashSet::from([5, 6]))?, 7);
    assert_eq!(table.index_of(&a), Some(4));
    assert_eq!(table.index_of(&b), Some(7));
    assert_eq!(table.len(), 2);
    Ok(())
}

/// Folder indices are depth-first and 1-based; the ancestor level walks up from the owner.
#[test]
fn test_reference_table_layout() -> Result<()> {
    let mut table = ReferenceTable::new(1);
    let mut skins = RefFolder::new("Skins");
    skins.folders.push(RefFolder::new("Models"));
    table.folders = vec![skins, RefFolder::new("Items")];
    table.nodes = vec![
        ExternalNode::file(3, "Car.Gbx", 2),
        ExternalNode::file(5, "Tree.Item.Gbx", 3),
        ExternalNode::file(6, "Root.Gbx", 0),
    ];

    let mut w = Writer::new();
    table.write(&mut w, 6)?;
    let bytes = w.into_bytes();
    let read = ReferenceTable::read(&mut Cursor::new(&bytes), 6)?;
    let Some(read) = read else {
        panic!("expected a reference table");
    };
    assert_eq!(read.nodes, table.nodes);
    assert_eq!(read.folders, table.folders);
    assert_eq!(read.node_indices(), vec![3, 5, 6]);
    assert!(matches!(&read.nodes[0].file, ExternalFile::Path(p) if p == "Car.Gbx"));

    let owner = Path::new("base").join("maps");
    let car = read.get(3).and_then(|n| read.file_path(n, &owner));
    assert_eq!(car, Some(Path::new("base").join("Skins").join("Models").join("Car.Gbx")));
    let tree = read.get(5).and_then(|n| read.file_path(n, &owner));
    assert_eq!(tree, Some(Path::new("base").join("Items").join("Tree.Item.Gbx")));
    let root = read.get(6).and_then(|n| read.file_path(n, &owner));
    assert_eq!(root, Some(Path::new("base").join("Root.Gbx")));

    let mut empty = Writer::new();
    ReferenceTable::new(0).write(&mut empty, 6)?;
    assert_eq!(empty.as_slice(), &[0, 0, 0, 0]);
    assert!(ReferenceTable::read(&mut Cursor::new(empty.as_slice()), 6)?.is_none());
    Ok(())
}
