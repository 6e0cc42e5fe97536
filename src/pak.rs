//! NadeoPak archives: an encrypted catalog of folders and files, each file a GBX container.
//!
//! ```text
//! "NadeoPak"  i32 version  u64 header IV
//! Blowfish-CBC (key from the caller):
//!   [u8; 16] MD5, i32 metadata start, i32 data start
//!   i32 gbx headers size, i32 gbx headers compressed size     version >= 2
//!   [u8; 16] unused                                           version >= 3
//!   i32 flags
//!   i32 num folders, (i32 parent, string name)*               third folder may re-key the cipher
//!   i32 num files, (i32 folder, string name, i32 u01, i32 uncompressed size,
//!                   i32 compressed size, i32 offset, u32 class id, u64 flags)*
//! at metadata start: u64 IV, Blowfish-CBC(zlib((i32 file index, GBX header)* i32 -1))
//! at data start + offset: u64 IV, Blowfish-CBC(file bytes, zlib'd when sizes differ)
//! ```
//!
//! Files are decrypted on demand; opening an archive only reads the catalog.

use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::compression::{Compressor, ZlibCompressor};
use crate::container::Gbx;
use crate::crypto::{BLOCK_SIZE, BlowfishCbc, BlowfishCbcReader, padded_len};
use crate::error::{GbxError, Result};
use crate::format::Header;
use crate::graph::NodeRef;
use crate::io::{Cursor, ReadExt, Writer};
use crate::reader::{self, DataSource, ReadOptions};
use crate::registry::NodeRegistry;

/// Magic bytes of a NadeoPak archive.
pub const PAK_MAGIC: [u8; 8] = *b"NadeoPak";

/// Archive version written by [`PakWriter`].
pub const DEFAULT_PAK_VERSION: i32 = 3;

const FOLDER_SEPARATOR: char = '\\';

/// A folder of the archive. Names carry a trailing `\`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PakFolder {
    /// Index of the parent folder; `None` for top-level folders.
    pub parent: Option<usize>,
    /// Folder name, including the trailing separator.
    pub name: String,
}

/// A file entry of the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct PakFile {
    /// Index of the containing folder; `None` for top-level files.
    pub folder: Option<usize>,
    /// File name.
    pub name: String,
    /// Unknown field stored after the name.
    pub u01: i32,
    /// Size of the file contents.
    pub uncompressed_size: i32,
    /// Stored size before encryption padding.
    pub compressed_size: i32,
    /// Offset of the file from the data section start.
    pub offset: i32,
    /// Class ID of the GBX container in the file, as stored.
    pub class_id: u32,
    /// Raw file flags.
    pub flags: u64,
    /// The GBX header from the metadata catalog, when the archive has one for this file.
    pub header: Option<Header>,
}

impl PakFile {
    /// Returns `true` when the contents are zlib-compressed.
    pub fn is_compressed(&self) -> bool {
        self.compressed_size != self.uncompressed_size
    }
}

/// An opened NadeoPak archive.
pub struct PakArchive {
    source: DataSource,
    key: Vec<u8>,
    /// Archive version.
    pub version: i32,
    /// Header checksum (recorded, not verified).
    pub md5: [u8; 16],
    /// Absolute offset of the metadata catalog.
    pub metadata_start: i32,
    /// Absolute offset of the data section.
    pub data_start: i32,
    /// Inflated catalog size (version >= 2).
    pub gbx_headers_size: Option<i32>,
    /// Stored catalog size (version >= 2).
    pub gbx_headers_compressed_size: Option<i32>,
    /// Archive flags.
    pub flags: i32,
    /// Folder table.
    pub folders: Vec<PakFolder>,
    /// File table.
    pub files: Vec<PakFile>,
}

impl std::fmt::Debug for PakArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PakArchive")
            .field("version", &self.version)
            .field("metadata_start", &self.metadata_start)
            .field("data_start", &self.data_start)
            .field("folders", &self.folders.len())
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}

fn read_count<R: ReadExt + ?Sized>(r: &mut R) -> Result<usize> {
    let count = r.read_i32_le()?;
    usize::try_from(count).map_err(|_| GbxError::InvalidLength(i64::from(count)))
}

fn to_offset(value: i32) -> Result<usize> {
    usize::try_from(value).map_err(|_| GbxError::Format(format!("negative PAK offset {value}")))
}

/// The key installed after the folder table: bytes 4..8 of the third folder name in UTF-16LE,
/// when that name is longer than four characters.
fn folder_key(folders: &[PakFolder]) -> Option<Vec<u8>> {
    let name = &folders.get(2)?.name;
    let utf16: Vec<u8> = name.encode_utf16().flat_map(u16::to_le_bytes).collect();
    (utf16.len() > 8).then(|| utf16[4..8].to_vec())
}

impl PakArchive {
    /// Opens an archive through a memory map.
    pub fn open<P: AsRef<Path>>(path: P, key: &[u8]) -> Result<Self> {
        Self::from_source(DataSource::open(path)?, key)
    }

    /// Opens an archive held in memory.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, key: &[u8]) -> Result<Self> {
        Self::from_source(DataSource::from_bytes(bytes), key)
    }

    fn from_source(source: DataSource, key: &[u8]) -> Result<Self> {
        let mut r: &[u8] = source.as_bytes();
        if r.read_vec(PAK_MAGIC.len())? != PAK_MAGIC {
            return Err(GbxError::Format("not a NadeoPak archive".into()));
        }
        let version = r.read_i32_le()?;
        let header_iv = r.read_u64_le()?;

        let mut er = BlowfishCbcReader::new(r, key, header_iv)?;
        let mut md5 = [0u8; 16];
        er.read_exact_gbx(&mut md5)?;
        let metadata_start = er.read_i32_le()?;
        let data_start = er.read_i32_le()?;
        let (gbx_headers_size, gbx_headers_compressed_size) = if version >= 2 {
            (Some(er.read_i32_le()?), Some(er.read_i32_le()?))
        } else {
            (None, None)
        };
        if version >= 3 {
            er.read_vec(16)?;
        }
        let flags = er.read_i32_le()?;

        let num_folders = read_count(&mut er)?;
        let mut folders: Vec<PakFolder> = Vec::with_capacity(num_folders.min(4096));
        for i in 0..num_folders {
            let parent = er.read_i32_le()?;
            let name = er.read_string_le()?;
            let parent = match parent {
                -1 => None,
                p => Some(usize::try_from(p).ok().filter(|p| *p < i).ok_or_else(|| {
                    GbxError::Format(format!("folder {i} has invalid parent {p}"))
                })?),
            };
            folders.push(PakFolder { parent, name });
        }
        if let Some(key) = folder_key(&folders) {
            debug!("re-keying PAK header cipher after the folder table");
            er.rekey(&key)?;
        }

        let num_files = read_count(&mut er)?;
        let mut files = Vec::with_capacity(num_files.min(4096));
        for _ in 0..num_files {
            let folder = er.read_i32_le()?;
            let name = er.read_string_le()?;
            files.push(PakFile {
                folder: usize::try_from(folder).ok().filter(|f| *f < folders.len()),
                name,
                u01: er.read_i32_le()?,
                uncompressed_size: er.read_i32_le()?,
                compressed_size: er.read_i32_le()?,
                offset: er.read_i32_le()?,
                class_id: er.read_u32_le()?,
                flags: er.read_u64_le()?,
                header: None,
            });
        }

        let mut pak = Self {
            source,
            key: key.to_vec(),
            version,
            md5,
            metadata_start,
            data_start,
            gbx_headers_size,
            gbx_headers_compressed_size,
            flags,
            folders,
            files,
        };
        pak.read_metadata()?;
        debug!(
            "NadeoPak v{version}: {} folders, {} files",
            pak.folders.len(),
            pak.files.len()
        );
        Ok(pak)
    }

    fn read_metadata(&mut self) -> Result<()> {
        let bytes = self.source.as_bytes();
        let start = to_offset(self.metadata_start)?;
        if start == 0 || start >= bytes.len() {
            debug!("PAK has no metadata catalog");
            return Ok(());
        }
        let end = match to_offset(self.data_start)? {
            d if d > start && d <= bytes.len() => d,
            _ => bytes.len(),
        };

        let mut c = Cursor::new(bytes);
        c.seek(start)?;
        let iv = c.read_u64()?;
        let available = end.saturating_sub(c.position());
        let mut catalog = c.read_bytes(available - available % BLOCK_SIZE)?.to_vec();
        BlowfishCbc::new(&self.key, iv)?.decrypt(&mut catalog)?;

        let hint = self
            .gbx_headers_size
            .and_then(|s| usize::try_from(s).ok())
            .unwrap_or(catalog.len() * 2);
        let catalog = ZlibCompressor.decompress(&catalog, hint)?;

        let mut r = Cursor::new(&catalog);
        loop {
            let file_index = r.read_i32()?;
            if file_index == -1 {
                break;
            }
            let header = Header::read(&mut r)?;
            match usize::try_from(file_index).ok().and_then(|i| self.files.get_mut(i)) {
                Some(file) => file.header = Some(header),
                None => warn!("PAK catalog entry for unknown file #{file_index}"),
            }
        }
        Ok(())
    }

    /// Full path of a folder, from the top level down.
    pub fn folder_path(&self, index: usize) -> String {
        let mut parts = Vec::new();
        let mut current = Some(index);
        while let Some(folder) = current.and_then(|i| self.folders.get(i)) {
            parts.push(folder.name.as_str());
            current = folder.parent;
            if parts.len() > self.folders.len() {
                break;
            }
        }
        parts.reverse();
        parts.concat()
    }

    /// Looks up a file by path. Both `/` and `\` separate elements and `..` goes up a folder.
    pub fn find(&self, path: &str) -> Option<&PakFile> {
        let elements: Vec<&str> = path.split(['/', '\\']).collect();
        let (file_name, dirs) = elements.split_last()?;

        let mut current: Option<usize> = None;
        for element in dirs.iter().filter(|e| !e.is_empty()) {
            if *element == ".." {
                current = current.and_then(|i| self.folders.get(i)).and_then(|f| f.parent);
                continue;
            }
            let wanted = format!("{element}{FOLDER_SEPARATOR}");
            current = Some(
                self.folders
                    .iter()
                    .position(|f| f.parent == current && f.name == wanted)?,
            );
        }

        self.files
            .iter()
            .find(|f| f.folder == current && f.name == *file_name)
    }

    /// Decrypts (and inflates) the contents of `file`.
    pub fn read_file(&self, file: &PakFile) -> Result<Vec<u8>> {
        let start = to_offset(self.data_start)? + to_offset(file.offset)?;
        let stored = to_offset(file.compressed_size)?;
        let size = to_offset(file.uncompressed_size)?;

        let mut c = Cursor::new(self.source.as_bytes());
        c.seek(start)?;
        let iv = c.read_u64()?;
        let mut data = c.read_bytes(padded_len(stored))?.to_vec();
        BlowfishCbc::new(&self.key, iv)?.decrypt(&mut data)?;
        data.truncate(stored);

        if !file.is_compressed() {
            return Ok(data);
        }
        let data = ZlibCompressor.decompress(&data, size)?.into_owned();
        if data.len() != size {
            return Err(GbxError::Compression(format!(
                "{} inflated to {} bytes, catalog says {size}",
                file.name,
                data.len()
            )));
        }
        Ok(data)
    }

    /// Parses `file` as a GBX container.
    pub fn open_gbx(&self, file: &PakFile, registry: Arc<dyn NodeRegistry>) -> Result<Gbx> {
        let bytes = self.read_file(file)?;
        reader::read_bytes(&bytes, registry, &ReadOptions::default(), None)
    }

    /// Parses the file at `path` and returns its root node, or `None` when no file matches.
    pub fn node_from_path(&self, path: &str, registry: Arc<dyn NodeRegistry>) -> Result<Option<NodeRef>> {
        let Some(file) = self.find(path) else {
            return Ok(None);
        };
        Ok(self.open_gbx(file, registry)?.node().cloned())
    }
}

struct PendingFile {
    folder: Option<usize>,
    name: String,
    data: Vec<u8>,
    compress: bool,
    flags: u64,
}

/// Builds NadeoPak archives in the layout [`PakArchive`] reads.
///
/// The header comes first, then the metadata catalog, then the file data. The MD5 field is
/// left zeroed.
pub struct PakWriter {
    key: Vec<u8>,
    version: i32,
    flags: i32,
    iv_seed: u64,
    folders: Vec<PakFolder>,
    files: Vec<PendingFile>,
}

impl PakWriter {
    /// Creates an empty archive encrypted with `key`.
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            version: DEFAULT_PAK_VERSION,
            flags: 0,
            iv_seed: 0x4E61_6465_6F50_616B,
            folders: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Sets the archive version (1..=3 change the header layout).
    pub fn version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Seeds the IVs; every region gets a distinct IV derived from it.
    pub fn iv_seed(mut self, seed: u64) -> Self {
        self.iv_seed = seed;
        self
    }

    /// Adds a folder and returns its index. A trailing `\` is appended when missing.
    pub fn add_folder(&mut self, parent: Option<usize>, name: &str) -> usize {
        let mut name = name.to_string();
        if !name.ends_with(FOLDER_SEPARATOR) {
            name.push(FOLDER_SEPARATOR);
        }
        self.folders.push(PakFolder { parent, name });
        self.folders.len() - 1
    }

    /// Adds a file and returns its index. GBX contents get a metadata catalog entry.
    pub fn add_file(&mut self, folder: Option<usize>, name: &str, data: Vec<u8>, compress: bool) -> usize {
        self.files.push(PendingFile {
            folder,
            name: name.to_string(),
            data,
            compress,
            flags: 0,
        });
        self.files.len() - 1
    }

    fn encrypt_region(&self, iv: u64, mut plain: Vec<u8>) -> Result<Vec<u8>> {
        plain.resize(padded_len(plain.len()), 0);
        BlowfishCbc::new(&self.key, iv)?.encrypt(&mut plain)?;
        let mut out = Vec::with_capacity(plain.len() + 8);
        out.extend_from_slice(&iv.to_le_bytes());
        out.extend_from_slice(&plain);
        Ok(out)
    }

    /// Serializes the archive.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header_iv = self.iv_seed;
        let metadata_iv = self.iv_seed.rotate_left(17) ^ 0x5A5A_5A5A_5A5A_5A5A;

        // File payloads and the catalog do not depend on absolute offsets.
        let mut data_section = Vec::new();
        let mut entries = Vec::with_capacity(self.files.len());
        let mut catalog = Writer::new();
        for (index, file) in self.files.iter().enumerate() {
            let stored = if file.compress {
                let packed = ZlibCompressor.compress(&file.data)?.into_owned();
                if packed.len() == file.data.len() { file.data.clone() } else { packed }
            } else {
                file.data.clone()
            };
            let header = Header::read(&mut Cursor::new(&file.data)).ok();
            if let Some(header) = &header {
                catalog.write_i32(to_i32(index)?);
                header.write(&mut catalog)?;
            }

            let offset = to_i32(data_section.len())?;
            let iv = self.iv_seed.wrapping_add(index as u64 + 1).rotate_left(29);
            data_section.extend(self.encrypt_region(iv, stored.clone())?);
            entries.push((
                offset,
                to_i32(file.data.len())?,
                to_i32(stored.len())?,
                header.map_or(0, |h| h.class_id),
            ));
        }
        catalog.write_i32(-1);
        let catalog_size = to_i32(catalog.len())?;
        let catalog = ZlibCompressor.compress(catalog.as_slice())?.into_owned();
        let catalog_compressed_size = to_i32(catalog.len())?;
        let metadata_section = self.encrypt_region(metadata_iv, catalog)?;

        let mut h = Writer::new();
        h.write_bytes(&[0; 16]);
        let offsets_at = h.len();
        h.write_i32(0);
        h.write_i32(0);
        if self.version >= 2 {
            h.write_i32(catalog_size);
            h.write_i32(catalog_compressed_size);
        }
        if self.version >= 3 {
            h.write_bytes(&[0; 16]);
        }
        h.write_i32(self.flags);
        h.write_length(self.folders.len())?;
        for folder in &self.folders {
            h.write_i32(folder.parent.map_or(Ok(-1), to_i32)?);
            h.write_string(&folder.name)?;
        }
        let rekey_at = h.len();
        h.write_length(self.files.len())?;
        for (file, (offset, size, stored, class_id)) in self.files.iter().zip(&entries) {
            h.write_i32(file.folder.map_or(Ok(-1), to_i32)?);
            h.write_string(&file.name)?;
            h.write_i32(0);
            h.write_i32(*size);
            h.write_i32(*stored);
            h.write_i32(*offset);
            h.write_u32(*class_id);
            h.write_u64(file.flags);
        }

        let header_len = PAK_MAGIC.len() + 4 + 8 + padded_len(h.len());
        let metadata_start = header_len;
        let data_start = metadata_start + metadata_section.len();
        h.patch_u32(offsets_at, to_i32(metadata_start)? as u32)?;
        h.patch_u32(offsets_at + 4, to_i32(data_start)? as u32)?;

        let mut plain = h.into_bytes();
        plain.resize(padded_len(plain.len()), 0);
        let mut cbc = BlowfishCbc::new(&self.key, header_iv)?;
        match folder_key(&self.folders) {
            Some(key) => {
                let split = padded_len(rekey_at);
                let (before, after) = plain.split_at_mut(split);
                cbc.encrypt(before)?;
                cbc.rekey(&key)?;
                cbc.encrypt(after)?;
            }
            None => cbc.encrypt(&mut plain)?,
        }

        let mut out = Vec::with_capacity(data_start + data_section.len());
        out.extend_from_slice(&PAK_MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&header_iv.to_le_bytes());
        out.extend_from_slice(&plain);
        out.extend_from_slice(&metadata_section);
        out.extend_from_slice(&data_section);
        Ok(out)
    }
}

fn to_i32(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| GbxError::InvalidLength(value as i64))
}
