//! Tools for inspecting the physical structure of GBX files.
//! Useful for triaging files from unseen game versions.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::container::Gbx;
use crate::error::Result;
use crate::format::Compression;
use crate::graph::{ChunkData, Node};
use crate::reader::{self, ReadOptions};
use crate::reftable::ExternalFile;
use crate::registry::NodeRegistry;

/// A structural report of a GBX container.
#[derive(Debug, Serialize)]
pub struct HeaderReport {
    /// Header version.
    pub version: i16,
    /// Body compression byte.
    pub body_compression: Compression,
    /// Root class ID (normalized).
    pub class_id: u32,
    /// Registered name of the root class.
    pub class_name: Option<String>,
    /// Node count stored in the header.
    pub num_nodes: i32,
    /// Size of the user data blob.
    pub user_data_size: usize,
    /// Header chunks in ID order.
    pub header_chunks: Vec<HeaderChunkInfo>,
    /// External node descriptors, as `index: path`.
    pub external_nodes: Vec<String>,
    /// Stored body size, when the body is still undecoded.
    pub body_size: Option<usize>,
    /// Chunk tree of the root node, when the body is decoded.
    pub root: Option<NodeInfo>,
}

/// Metadata of one header chunk.
#[derive(Debug, Serialize)]
pub struct HeaderChunkInfo {
    /// Chunk ID as stored.
    pub chunk_id: u32,
    /// Payload size.
    pub size: usize,
    /// Bit 31 of the size entry.
    pub heavy: bool,
    /// Decoded by a registered handler.
    pub discovered: bool,
}

/// Metadata of one body chunk.
#[derive(Debug, Serialize)]
pub struct ChunkInfo {
    /// Chunk ID as stored.
    pub chunk_id: u32,
    /// `"unskippable"` or `"skippable"`.
    pub kind: &'static str,
    /// Version read by the handler.
    pub version: Option<i32>,
    /// Undecoded payload size, for skippable chunks.
    pub raw_size: Option<usize>,
    /// Decoded into the node.
    pub discovered: bool,
}

/// A node with its chunks.
#[derive(Debug, Serialize)]
pub struct NodeInfo {
    /// Class ID.
    pub class_id: u32,
    /// Registered class name.
    pub class_name: Option<String>,
    /// Chunks in ID order.
    pub chunks: Vec<ChunkInfo>,
}

/// The GBX inspector tool.
#[derive(Debug)]
pub struct GbxInspector;

impl GbxInspector {
    /// Reads the header of a file (the body is left undecoded) and reports it.
    pub fn inspect_file<P: AsRef<Path>>(path: P, registry: Arc<dyn NodeRegistry>) -> Result<HeaderReport> {
        let options = ReadOptions {
            header_only: true,
            ..ReadOptions::default()
        };
        let gbx = reader::read_file(path.as_ref(), registry, &options)?;
        Self::inspect(&gbx)
    }

    /// Reports the structure of a container.
    pub fn inspect(gbx: &Gbx) -> Result<HeaderReport> {
        let registry = gbx.registry();
        let header = gbx.header();

        let header_chunks = gbx
            .header_chunks()
            .iter()
            .map(|chunk| match &chunk.data {
                ChunkData::Header {
                    raw,
                    discovered,
                    heavy,
                } => HeaderChunkInfo {
                    chunk_id: chunk.wire_id(),
                    size: raw.len(),
                    heavy: *heavy,
                    discovered: *discovered,
                },
                _ => HeaderChunkInfo {
                    chunk_id: chunk.wire_id(),
                    size: 0,
                    heavy: false,
                    discovered: chunk.is_discovered(),
                },
            })
            .collect();

        let external_nodes = gbx
            .reference_table()
            .map(|table| {
                table
                    .nodes
                    .iter()
                    .map(|n| match &n.file {
                        ExternalFile::Path(p) => format!("#{}: {p}", n.node_index),
                        ExternalFile::Resource(r) => format!("#{}: resource {r}", n.node_index),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let root = match gbx.node().filter(|_| gbx.is_body_decoded()) {
            Some(node) => Some(Self::inspect_node(&**node.read()?, registry.as_ref())),
            None => None,
        };

        Ok(HeaderReport {
            version: header.version,
            body_compression: header.body_compression,
            class_id: gbx.class_id(),
            class_name: registry.class_name(gbx.class_id()).map(str::to_string),
            num_nodes: header.num_nodes,
            user_data_size: header.user_data.len(),
            header_chunks,
            external_nodes,
            body_size: gbx.raw_body().map(|b| b.stored_len()),
            root,
        })
    }

    fn inspect_node(node: &dyn Node, registry: &dyn NodeRegistry) -> NodeInfo {
        let chunks = node
            .chunks()
            .iter()
            .map(|chunk| ChunkInfo {
                chunk_id: chunk.wire_id(),
                kind: if chunk.is_skippable() { "skippable" } else { "unskippable" },
                version: chunk.version,
                raw_size: chunk.raw().map(<[u8]>::len),
                discovered: chunk.is_discovered(),
            })
            .collect();
        NodeInfo {
            class_id: node.class_id(),
            class_name: registry.class_name(node.class_id()).map(str::to_string),
            chunks,
        }
    }
}

impl fmt::Display for HeaderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== GBX INSPECTOR REPORT ===")?;
        writeln!(
            f,
            "Class:       0x{:08X} ({})",
            self.class_id,
            self.class_name.as_deref().unwrap_or("unknown")
        )?;
        writeln!(f, "Version:     {} | Body: {:?}", self.version, self.body_compression)?;
        writeln!(f, "Nodes:       {}", self.num_nodes)?;
        if let Some(size) = self.body_size {
            writeln!(f, "Body size:   {size}b (undecoded)")?;
        }

        writeln!(f, "\n[HEADER CHUNKS] {}b", self.user_data_size)?;
        for (i, chunk) in self.header_chunks.iter().enumerate() {
            let connector = if i + 1 == self.header_chunks.len() { "└── " } else { "├── " };
            writeln!(
                f,
                "{connector}0x{:08X} Size: {}b{}{}",
                chunk.chunk_id,
                chunk.size,
                if chunk.heavy { " | heavy" } else { "" },
                if chunk.discovered { " | decoded" } else { "" }
            )?;
        }

        if !self.external_nodes.is_empty() {
            writeln!(f, "\n[EXTERNAL NODES]")?;
            for (i, node) in self.external_nodes.iter().enumerate() {
                let connector = if i + 1 == self.external_nodes.len() { "└── " } else { "├── " };
                writeln!(f, "{connector}{node}")?;
            }
        }

        if let Some(root) = &self.root {
            writeln!(f, "\n[BODY]")?;
            root.fmt_tree(f)?;
        }
        Ok(())
    }
}

impl NodeInfo {
    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "0x{:08X} ({})",
            self.class_id,
            self.class_name.as_deref().unwrap_or("unknown")
        )?;
        for (i, chunk) in self.chunks.iter().enumerate() {
            let connector = if i + 1 == self.chunks.len() { "└── " } else { "├── " };
            let version = chunk.version.map(|v| format!(" v{v}")).unwrap_or_default();
            let raw = chunk
                .raw_size
                .map(|s| format!(" | {s}b"))
                .unwrap_or_default();
            writeln!(
                f,
                "{connector}0x{:08X} [{}]{version}{raw}{}",
                chunk.chunk_id,
                chunk.kind,
                if chunk.discovered { "" } else { " | undiscovered" }
            )?;
        }
        Ok(())
    }
}
