//! Defines the physical binary layout of GBX containers.
//!
//! ```text
//! "GBX"                       magic
//! i16  version                >= 3
//! u8   format                 'B' (binary) or 'T' (text, unsupported)
//! u8   ref table compression  'C' / 'U'
//! u8   body compression       'C' / 'U'
//! u8   unknown                version >= 4 only ('R' or 'E')
//! u32  class id
//! i32  user data length       version >= 6 only, followed by the user data
//! i32  num nodes
//! i32  num external nodes     followed by the reference table when non-zero
//! body                        chunk stream, or i32 uncompressed size + i32 compressed size + LZO data
//! ```
//!
//! The user data carries the header chunks:
//!
//! ```text
//! i32 count, count * (u32 chunk id, u32 size | 0x80000000 if heavy), concatenated payloads
//! ```

use std::borrow::Cow;
use std::io::Read;

use serde::Serialize;

use crate::compression::{CompressorRegistry, LZO_ID};
use crate::error::{GbxError, Result};
use crate::io::{Cursor, ReadExt, Writer};

/// Magic bytes identifying a GBX container.
pub const MAGIC: [u8; 3] = *b"GBX";

/// Oldest supported header version.
pub const MIN_VERSION: i16 = 3;

/// Header version used for new containers.
pub const DEFAULT_VERSION: i16 = 6;

/// Binary serialization format byte.
pub const FORMAT_BINARY: u8 = b'B';

/// Text serialization format byte.
pub const FORMAT_TEXT: u8 = b'T';

/// Upper bound on the bytes needed to peek the class ID.
/// Magic(3) + Version(2) + Format(3) + Unknown(1) + ClassId(4) = 13
pub const PEEK_SIZE: usize = 13;

const HEAVY_FLAG: u32 = 0x8000_0000;

/// Compression byte of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Compression {
    /// `'C'`: LZO for the body.
    Compressed,
    /// `'U'`.
    Uncompressed,
}

impl Compression {
    /// Parses the header byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            b'C' => Ok(Self::Compressed),
            b'U' => Ok(Self::Uncompressed),
            other => Err(GbxError::Format(format!(
                "invalid compression byte 0x{other:02X}"
            ))),
        }
    }

    /// The header byte.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Compressed => b'C',
            Self::Uncompressed => b'U',
        }
    }
}

/// The fixed part of a GBX container, up to and including `num_nodes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header version (3..=6 in the wild).
    pub version: i16,
    /// Reference table compression (informational; tables are stored uncompressed).
    pub ref_table_compression: Compression,
    /// Body compression.
    pub body_compression: Compression,
    /// The extra byte present from version 4 on.
    pub unknown_byte: Option<u8>,
    /// Class ID of the root node as stored on disk.
    pub class_id: u32,
    /// Raw user data (header chunks). Empty before version 6.
    pub user_data: Vec<u8>,
    /// Number of nodes in the body, root included.
    pub num_nodes: i32,
}

impl Header {
    /// A version 6 header for a new container.
    pub fn new(class_id: u32) -> Self {
        Self {
            version: DEFAULT_VERSION,
            ref_table_compression: Compression::Uncompressed,
            body_compression: Compression::Compressed,
            unknown_byte: Some(b'R'),
            class_id,
            user_data: Vec::new(),
            num_nodes: 0,
        }
    }

    /// Reads and validates the header.
    pub fn read(r: &mut Cursor<'_>) -> Result<Self> {
        if r.read_bytes(3)? != MAGIC {
            return Err(GbxError::Format("not a GBX file (bad magic)".into()));
        }

        let version = r.read_i16()?;
        if version < MIN_VERSION {
            return Err(GbxError::VersionNotSupported(version));
        }

        match r.read_u8()? {
            FORMAT_BINARY => {}
            FORMAT_TEXT => return Err(GbxError::TextFormatNotSupported),
            other => {
                return Err(GbxError::Format(format!(
                    "invalid format byte 0x{other:02X}"
                )));
            }
        }
        let ref_table_compression = Compression::from_byte(r.read_u8()?)?;
        let body_compression = Compression::from_byte(r.read_u8()?)?;
        let unknown_byte = if version >= 4 { Some(r.read_u8()?) } else { None };

        let class_id = r.read_u32()?;
        let user_data = if version >= 6 {
            r.read_byte_array()?.to_vec()
        } else {
            Vec::new()
        };
        let num_nodes = r.read_i32()?;

        Ok(Self {
            version,
            ref_table_compression,
            body_compression,
            unknown_byte,
            class_id,
            user_data,
            num_nodes,
        })
    }

    /// Writes the header.
    pub fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_bytes(&MAGIC);
        w.write_i16(self.version);
        w.write_u8(FORMAT_BINARY);
        w.write_u8(self.ref_table_compression.as_byte());
        w.write_u8(self.body_compression.as_byte());
        if self.version >= 4 {
            w.write_u8(self.unknown_byte.unwrap_or(b'R'));
        }
        w.write_u32(self.class_id);
        if self.version >= 6 {
            w.write_byte_array(&self.user_data)?;
        }
        w.write_i32(self.num_nodes);
        Ok(())
    }
}

/// Reads the class ID from the start of a stream.
///
/// Returns `None` when the stream is not a binary GBX container or its version is unsupported.
/// Reads at most [`PEEK_SIZE`] bytes.
pub fn peek_class_id<R: Read>(r: &mut R) -> Result<Option<u32>> {
    let mut magic = [0u8; 3];
    match r.read_exact_gbx(&mut magic) {
        Ok(()) => {}
        Err(e) if e.is_end_of_stream() => return Ok(None),
        Err(e) => return Err(e),
    }
    if magic != MAGIC {
        return Ok(None);
    }

    let version = r.read_i16_le()?;
    if version < MIN_VERSION {
        return Ok(None);
    }
    let mut flags = [0u8; 3];
    r.read_exact_gbx(&mut flags)?;
    if flags[0] != FORMAT_BINARY {
        return Ok(None);
    }
    if version >= 4 {
        r.read_u8_le()?;
    }
    Ok(Some(r.read_u32_le()?))
}

/// One entry of the user data chunk table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderChunkEntry<'a> {
    /// Chunk ID as stored.
    pub chunk_id: u32,
    /// Size flag bit 31.
    pub heavy: bool,
    /// Payload.
    pub data: &'a [u8],
}

/// Splits user data into its header chunks. Empty user data has no chunks.
pub fn split_user_data(user_data: &[u8]) -> Result<Vec<HeaderChunkEntry<'_>>> {
    if user_data.is_empty() {
        return Ok(Vec::new());
    }
    let mut r = Cursor::new(user_data);
    let count = r.read_length()?;
    let table = r.read_array(count, |r| {
        let chunk_id = r.read_u32()?;
        let size = r.read_u32()?;
        Ok((chunk_id, size & !HEAVY_FLAG, size & HEAVY_FLAG != 0))
    })?;

    table
        .into_iter()
        .map(|(chunk_id, size, heavy)| {
            Ok(HeaderChunkEntry {
                chunk_id,
                heavy,
                data: r.read_bytes(size as usize)?,
            })
        })
        .collect()
}

/// Joins header chunks into user data.
pub fn build_user_data(entries: &[(u32, bool, Vec<u8>)]) -> Result<Vec<u8>> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    let mut w = Writer::new();
    w.write_length(entries.len())?;
    for (chunk_id, heavy, data) in entries {
        let size = u32::try_from(data.len())
            .ok()
            .filter(|s| s & HEAVY_FLAG == 0)
            .ok_or(GbxError::InvalidLength(data.len() as i64))?;
        w.write_u32(*chunk_id);
        w.write_u32(if *heavy { size | HEAVY_FLAG } else { size });
    }
    for (_, _, data) in entries {
        w.write_bytes(data);
    }
    Ok(w.into_bytes())
}

/// The body as stored after the reference table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Plain chunk stream.
    Uncompressed(Vec<u8>),
    /// LZO-compressed chunk stream.
    Compressed {
        /// Size of the chunk stream after decompression.
        uncompressed_size: usize,
        /// Compressed bytes.
        data: Vec<u8>,
    },
}

impl Body {
    /// Reads the rest of the stream as a body.
    pub fn read(r: &mut Cursor<'_>, compression: Compression) -> Result<Self> {
        match compression {
            Compression::Uncompressed => Ok(Self::Uncompressed(r.read_to_end().to_vec())),
            Compression::Compressed => {
                let uncompressed_size = r.read_length()?;
                let data = r.read_byte_array()?.to_vec();
                Ok(Self::Compressed {
                    uncompressed_size,
                    data,
                })
            }
        }
    }

    /// Writes the body.
    pub fn write(&self, w: &mut Writer) -> Result<()> {
        match self {
            Self::Uncompressed(data) => w.write_bytes(data),
            Self::Compressed {
                uncompressed_size,
                data,
            } => {
                w.write_length(*uncompressed_size)?;
                w.write_byte_array(data)?;
            }
        }
        Ok(())
    }

    /// Wraps a chunk stream in the requested form.
    pub fn encode(raw: Vec<u8>, compression: Compression, compressors: &CompressorRegistry) -> Result<Self> {
        match compression {
            Compression::Uncompressed => Ok(Self::Uncompressed(raw)),
            Compression::Compressed => {
                let data = compressors.get(LZO_ID)?.compress(&raw)?.into_owned();
                Ok(Self::Compressed {
                    uncompressed_size: raw.len(),
                    data,
                })
            }
        }
    }

    /// The chunk stream.
    pub fn decode(&self, compressors: &CompressorRegistry) -> Result<Cow<'_, [u8]>> {
        match self {
            Self::Uncompressed(data) => Ok(Cow::Borrowed(data)),
            Self::Compressed {
                uncompressed_size,
                data,
            } => {
                let raw = compressors.get(LZO_ID)?.decompress(data, *uncompressed_size)?;
                if raw.len() != *uncompressed_size {
                    return Err(GbxError::Compression(format!(
                        "body decompressed to {} bytes, header says {uncompressed_size}",
                        raw.len()
                    )));
                }
                Ok(raw)
            }
        }
    }

    /// The form of this body.
    pub fn compression(&self) -> Compression {
        match self {
            Self::Uncompressed(_) => Compression::Uncompressed,
            Self::Compressed { .. } => Compression::Compressed,
        }
    }

    /// Stored size in bytes (without size fields).
    pub fn stored_len(&self) -> usize {
        match self {
            Self::Uncompressed(data) | Self::Compressed { data, .. } => data.len(),
        }
    }
}
