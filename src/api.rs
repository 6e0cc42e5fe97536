//! High-level entry points: parse, peek, save and transcode GBX files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::compression::CompressorRegistry;
use crate::container::Gbx;
use crate::error::{GbxError, Result};
use crate::format::{self, Body, Compression, Header};
use crate::graph::NodeRef;
use crate::id::DEFAULT_LOOKBACK_VERSION;
use crate::inspector::{GbxInspector, HeaderReport};
use crate::io::{Cursor, Writer};
use crate::reader::{self, DataSource, ReadOptions};
use crate::reftable::ReferenceTable;
use crate::registry::NodeRegistry;
use crate::session::CancellationToken;

/// The main entry point for reading and writing GBX files.
#[derive(Debug)]
pub struct GameBox;

impl GameBox {
    /// Starts configuring a read or write against `registry`.
    pub fn builder(registry: Arc<dyn NodeRegistry>) -> GbxOptions {
        GbxOptions::new(registry)
    }

    /// Parses a file with default options.
    pub fn open<P: AsRef<Path>>(path: P, registry: Arc<dyn NodeRegistry>) -> Result<Gbx> {
        Self::builder(registry).open(path)
    }

    /// Parses an in-memory container with default options.
    pub fn parse_bytes(bytes: &[u8], registry: Arc<dyn NodeRegistry>) -> Result<Gbx> {
        Self::builder(registry).parse_bytes(bytes)
    }

    /// Parses a container from a reader with default options.
    pub fn read_from<R: Read>(reader: R, registry: Arc<dyn NodeRegistry>) -> Result<Gbx> {
        Self::builder(registry).read_from(reader)
    }

    /// Parses a file and returns its root node.
    ///
    /// # Errors
    /// [`GbxError::NodeNotImplemented`] if the root class is not registered.
    pub fn parse_node<P: AsRef<Path>>(path: P, registry: Arc<dyn NodeRegistry>) -> Result<NodeRef> {
        let gbx = Self::open(path, registry)?;
        gbx.node()
            .cloned()
            .ok_or(GbxError::NodeNotImplemented(gbx.class_id()))
    }

    /// Reads the class ID without parsing the container.
    ///
    /// Returns `None` when the stream is not a binary GBX container of a supported version.
    pub fn peek_class_id<R: Read>(reader: R) -> Result<Option<u32>> {
        let mut limited = reader.take(format::PEEK_SIZE as u64);
        match format::peek_class_id(&mut limited) {
            Err(e) if e.is_end_of_stream() => Ok(None),
            other => other,
        }
    }

    /// [`peek_class_id`](Self::peek_class_id) on a file.
    pub fn peek_class_id_file<P: AsRef<Path>>(path: P) -> Result<Option<u32>> {
        Self::peek_class_id(BufReader::new(File::open(path)?))
    }

    /// Writes a container to a file.
    pub fn save<P: AsRef<Path>>(path: P, gbx: &Gbx) -> Result<()> {
        let file = File::create(path.as_ref())?;
        gbx.write(BufWriter::new(file))
    }

    /// Writes a container to any writer.
    pub fn write<W: Write>(writer: W, gbx: &Gbx) -> Result<()> {
        gbx.write(writer)
    }

    /// Rewrites a container with an uncompressed body.
    pub fn decompress<R: Read, W: Write>(input: R, output: W) -> Result<()> {
        transcode(input, output, Compression::Uncompressed)
    }

    /// Rewrites a container with an LZO-compressed body.
    pub fn compress<R: Read, W: Write>(input: R, output: W) -> Result<()> {
        transcode(input, output, Compression::Compressed)
    }

    /// Reports the structure of a file (header only).
    pub fn inspect<P: AsRef<Path>>(path: P, registry: Arc<dyn NodeRegistry>) -> Result<HeaderReport> {
        GbxInspector::inspect_file(path, registry)
    }
}

fn transcode<R: Read, W: Write>(mut input: R, mut output: W, target: Compression) -> Result<()> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;

    let mut r = Cursor::new(&bytes);
    let mut header = Header::read(&mut r)?;
    if ReferenceTable::read(&mut r, header.version)?.is_some() {
        return Err(GbxError::Unsupported(
            "transcoding containers with external references".into(),
        ));
    }
    let body = Body::read(&mut r, header.body_compression)?;

    if body.compression() == target {
        debug!("body already {target:?}, copying through");
        output.write_all(&bytes)?;
        output.flush()?;
        return Ok(());
    }

    let compressors = CompressorRegistry::new();
    let raw = body.decode(&compressors)?.into_owned();
    let body = Body::encode(raw, target, &compressors)?;
    header.body_compression = target;

    let mut w = Writer::with_capacity(bytes.len());
    header.write(&mut w)?;
    w.write_i32(0);
    body.write(&mut w)?;
    output.write_all(w.as_slice())?;
    output.flush()?;
    Ok(())
}

/// Read and write configuration.
///
/// ```rust,ignore
/// let gbx = GameBox::builder(registry)
///     .header_only(true)
///     .open("Map.Challenge.Gbx")?;
/// ```
#[derive(Clone)]
pub struct GbxOptions {
    registry: Arc<dyn NodeRegistry>,
    header_only: bool,
    lookback_version: i32,
    cancel: CancellationToken,
    discover: bool,
    parallel: bool,
    body_compression: Option<Compression>,
}

impl std::fmt::Debug for GbxOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GbxOptions")
            .field("header_only", &self.header_only)
            .field("lookback_version", &self.lookback_version)
            .field("discover", &self.discover)
            .field("parallel", &self.parallel)
            .field("body_compression", &self.body_compression)
            .finish_non_exhaustive()
    }
}

impl GbxOptions {
    /// Default options: full parse, no discovery, lookback version 3.
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self {
            registry,
            header_only: false,
            lookback_version: DEFAULT_LOOKBACK_VERSION,
            cancel: CancellationToken::new(),
            discover: false,
            parallel: false,
            body_compression: None,
        }
    }

    /// Stops after the header chunks and reference table.
    pub fn header_only(mut self, enabled: bool) -> Self {
        self.header_only = enabled;
        self
    }

    /// Lookback table version used for writes of chunks decoded from parsed files.
    pub fn lookback_version(mut self, version: i32) -> Self {
        self.lookback_version = version;
        self
    }

    /// Observes `token` between chunks and nodes.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Decodes every skippable chunk after parsing.
    pub fn discover(mut self, enabled: bool) -> Self {
        self.discover = enabled;
        self
    }

    /// Runs discovery with one task per node.
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// Overrides the body compression on save.
    pub fn body_compression(mut self, compression: Compression) -> Self {
        self.body_compression = Some(compression);
        self
    }

    fn read_options(&self) -> ReadOptions {
        ReadOptions {
            header_only: self.header_only,
            lookback_version: self.lookback_version,
            cancel: self.cancel.clone(),
        }
    }

    fn finish(&self, bytes: &[u8], path: Option<PathBuf>) -> Result<Gbx> {
        let mut gbx = reader::read_bytes(bytes, Arc::clone(&self.registry), &self.read_options(), path)?;
        if self.discover && !self.header_only {
            gbx.discover_all(self.parallel)?;
        }
        Ok(gbx)
    }

    /// Parses a file through a memory map.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<Gbx> {
        let path = path.as_ref();
        let source = DataSource::open(path)?;
        self.finish(source.as_bytes(), Some(path.to_path_buf()))
    }

    /// Parses an in-memory container.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Gbx> {
        self.finish(bytes, None)
    }

    /// Parses a container from a reader.
    pub fn read_from<R: Read>(&self, mut reader: R) -> Result<Gbx> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.finish(&bytes, None)
    }

    /// Writes `gbx` to a file, applying the configured body compression.
    pub fn save<P: AsRef<Path>>(&self, path: P, gbx: &mut Gbx) -> Result<()> {
        if let Some(compression) = self.body_compression {
            gbx.set_body_compression(compression);
        }
        GameBox::save(path, gbx)
    }

    /// Reads a file asynchronously and parses it on the blocking pool.
    #[cfg(feature = "tokio")]
    pub async fn open_async<P: AsRef<Path>>(&self, path: P) -> Result<Gbx> {
        let path = path.as_ref().to_path_buf();
        let bytes = tokio::fs::read(&path).await?;
        let options = self.clone();
        tokio::task::spawn_blocking(move || options.finish(&bytes, Some(path)))
            .await
            .map_err(|e| GbxError::Internal(format!("parse task failed: {e}")))?
    }
}
