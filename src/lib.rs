//! # GameBox
//!
//! A reader and writer for Nadeo's GameBox (GBX) containers and NadeoPak archives.
//!
//! ## Overview
//!
//! A GBX file stores one serialized node graph: a root node and the nodes it references,
//! each encoded as a stream of independently versioned chunks. This crate implements the
//! generic machinery every concrete game object plugs into; the object layouts themselves
//! are supplied by the caller through a [`NodeRegistry`].
//!
//! ### Key Features
//!
//! *   **Round-trip fidelity:** Chunks nobody asked for are kept as raw bytes and written back
//!     unchanged, so parsing then saving an unmodified file reproduces it byte for byte.
//! *   **Lazy chunks:** Skippable chunks are stored undecoded and decoded on
//!     [`executor::discover`], at most once.
//! *   **Header-only reads:** Header chunks and the reference table are available without
//!     touching the body, and the class ID can be peeked from the first 13 bytes.
//! *   **Parallel discovery:** [`Gbx::discover_all`] decodes every node's skippable chunks with
//!     one Rayon task per node.
//! *   **PAK archives:** Blowfish-CBC encrypted catalogs with zlib-compressed entries.
//!
//! ## Architecture
//!
//! ### File Format
//!
//! ```text
//! "GBX" [Version] [Format 'B'] [Compression bytes] [Class ID] [User Data] [Num Nodes]
//! [Reference Table] [Body: chunk stream, optionally LZO-compressed]
//! ```
//!
//! Each node's chunk stream is a sequence of chunks ended by `0xFACADE01`:
//! ```text
//! [Chunk ID] [Unskippable payload]
//! [Chunk ID] ["SKIP"] [Length] [Skippable payload]
//! ```
//!
//! ## Core Concepts
//!
//! ### Registry
//!
//! The [`registry::Registry`] maps class IDs to constructors and chunk IDs to
//! [`graph::ChunkHandler`]s, walking parent classes and the alias table for IDs renamed
//! across game versions.
//!
//! ### Session
//!
//! Every read or write call owns a [`session::Session`]: the lookback string table, the
//! table of inline nodes met so far and the cancellation token. Sessions are never shared,
//! so concurrent parses need no locking.
//!
//! ### Executor
//!
//! The [`executor`] module is the chunk dispatch state machine. It reads unskippable chunks
//! through their handler, stores skippable ones, and writes both back.
//!
//! ## Usage Patterns
//!
//! ### Defining a node type
//!
//! ```rust,ignore
//! use gamebox::{ChunkConfig, ChunkSet, Id, NodeClass, Registry, rt};
//!
//! #[derive(Debug, Default)]
//! struct Block {
//!     chunks: ChunkSet,
//!     name: Id,
//! }
//! gamebox::impl_node!(Block, 0x0305_7000);
//!
//! let mut registry = Registry::new();
//! registry.register(NodeClass::new(0x0305_7000, "CGameCtnBlock").node::<Block>().chunk(
//!     0x0305_7002,
//!     ChunkConfig::unskippable(),
//!     rt::handler::<Block>(|n, r| { n.name = r.read_id()?; Ok(()) }, |n, w| w.write_id(&n.name)),
//! ));
//! let registry = registry.into_shared();
//! ```
//!
//! ### Reading and writing
//!
//! ```rust,ignore
//! use gamebox::GameBox;
//!
//! let gbx = GameBox::open("Map.Challenge.Gbx", registry.clone())?;
//! GameBox::save("Copy.Challenge.Gbx", &gbx)?;
//!
//! // Metadata only
//! let header = GameBox::builder(registry).header_only(true).open("Map.Challenge.Gbx")?;
//! println!("{} header chunks", header.header_chunks().len());
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** `unsafe` is used only to memory-map files in the `reader`
//!   module.
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** All failures correspond to a [`GbxError`] variant.
//! * **Tolerant Reads:** Truncated chunks are logged through `log` and end the node instead
//!   of failing the whole parse.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod compression;
pub mod container;
pub mod crypto;
pub mod error;
pub mod format;
pub mod id;
pub mod inspector;
pub mod pak;
pub mod reader;
pub mod reftable;
pub mod registry;
pub mod session;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod executor;
#[doc(hidden)]
pub mod graph;
#[doc(hidden)]
pub mod io;
#[doc(hidden)]
pub mod resolver;

// --- NODE DEFINITION SUPPORT ---

/// Runtime utilities used by node type definitions.
pub mod rt;

// --- RE-EXPORTS ---

pub use compression::{Compressor, ZlibCompressor};
#[cfg(feature = "lzo")]
pub use compression::LzoCompressor;

pub use api::{GameBox, GbxOptions};
pub use container::Gbx;
pub use error::{GbxError, Result};
pub use format::Compression;
pub use graph::{Chunk, ChunkConfig, ChunkId, ChunkSet, Node, NodeRef};
pub use id::{Id, Ident};
pub use pak::{PakArchive, PakWriter};
pub use registry::{NodeClass, NodeRegistry, Registry};
pub use resolver::NodeLink;
pub use session::CancellationToken;

/// Constants used throughout the library.
pub mod constants {
    /// Terminates a node's chunk stream.
    pub const FACADE: u32 = crate::executor::FACADE;
    /// Marks a skippable chunk.
    pub const SKIP: u32 = crate::executor::SKIP;
    /// Lookback table version written by default.
    pub const DEFAULT_LOOKBACK_VERSION: i32 = crate::id::DEFAULT_LOOKBACK_VERSION;
}
