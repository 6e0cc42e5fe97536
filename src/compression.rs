//! Pluggable compression backend.
//!
//! GBX bodies are LZO1X-compressed; PAK metadata and file contents are zlib streams. This
//! module defines the `Compressor` trait and a registry mapping IDs to the algorithms
//! compiled into this build.

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::Compression as Level;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{GbxError, Result};

/// Registry ID of the LZO compressor.
pub const LZO_ID: u8 = 1;
/// Registry ID of [`ZlibCompressor`].
pub const ZLIB_ID: u8 = 2;

/// Interface for compression algorithms.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// Returns the registry ID.
    fn id(&self) -> u8;

    /// Human-readable algorithm name.
    fn name(&self) -> &'static str;

    /// Compresses the data.
    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    /// Decompresses the data. `expected_len` is the decompressed size when the container
    /// records it; implementations use it as a capacity hint.
    fn decompress<'a>(&self, data: &'a [u8], expected_len: usize) -> Result<Cow<'a, [u8]>>;
}

// --- LZO Implementation ---

#[cfg(feature = "lzo")]
/// LZO1X, the GBX body compression.
///
/// This compressor is available when the `lzo` feature is enabled.
#[derive(Debug, Clone, Copy)]
pub struct LzoCompressor;

#[cfg(feature = "lzo")]
impl Compressor for LzoCompressor {
    fn id(&self) -> u8 {
        LZO_ID
    }

    fn name(&self) -> &'static str {
        "LZO"
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let compressed =
            lzokay_native::compress(data).map_err(|e| GbxError::Compression(format!("LZO: {e:?}")))?;
        Ok(Cow::Owned(compressed))
    }

    fn decompress<'a>(&self, data: &'a [u8], expected_len: usize) -> Result<Cow<'a, [u8]>> {
        let raw = lzokay_native::decompress_all(data, Some(expected_len))
            .map_err(|e| GbxError::Compression(format!("LZO: {e:?}")))?;
        Ok(Cow::Owned(raw))
    }
}

// --- Zlib Implementation ---

/// zlib (deflate with header and checksum), used by PAK archives.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor;

impl Compressor for ZlibCompressor {
    fn id(&self) -> u8 {
        ZLIB_ID
    }

    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Level::default());
        encoder.write_all(data)?;
        Ok(Cow::Owned(encoder.finish()?))
    }

    fn decompress<'a>(&self, data: &'a [u8], expected_len: usize) -> Result<Cow<'a, [u8]>> {
        let mut out = Vec::with_capacity(expected_len);
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| GbxError::Compression(format!("zlib: {e}")))?;
        Ok(Cow::Owned(out))
    }
}

// --- REGISTRY ---

/// Centralized registry for compression algorithms.
#[derive(Debug)]
pub struct CompressorRegistry {
    algorithms: Vec<Option<Box<dyn Compressor>>>,
}

impl CompressorRegistry {
    /// Creates a new registry with default algorithms registered.
    ///
    /// *   ID 1: `LzoCompressor` (if the `lzo` feature is enabled)
    /// *   ID 2: `ZlibCompressor`
    pub fn new() -> Self {
        let mut reg = Self {
            algorithms: (0..4).map(|_| None).collect(),
        };

        #[cfg(feature = "lzo")]
        reg.register(Box::new(LzoCompressor));

        reg.register(Box::new(ZlibCompressor));

        reg
    }

    /// Registers a new compressor, replacing any compressor with the same ID.
    pub fn register(&mut self, algo: Box<dyn Compressor>) {
        let id = usize::from(algo.id());
        if id >= self.algorithms.len() {
            self.algorithms.resize_with(id + 1, || None);
        }
        if let Some(slot) = self.algorithms.get_mut(id) {
            *slot = Some(algo);
        }
    }

    /// Retrieves a compressor by its ID.
    ///
    /// # Errors
    /// [`GbxError::MissingCompressionSupport`] for LZO when the `lzo` feature is disabled,
    /// [`GbxError::Compression`] for any other unregistered ID.
    pub fn get(&self, id: u8) -> Result<&dyn Compressor> {
        if let Some(algo) = self.algorithms.get(usize::from(id)).and_then(|opt| opt.as_ref()) {
            return Ok(algo.as_ref());
        }

        match id {
            LZO_ID => Err(GbxError::MissingCompressionSupport("LZO")),
            _ => Err(GbxError::Compression(format!(
                "Algorithm ID {id} is not registered or available"
            ))),
        }
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
