//! The reference table: nodes stored in other files.
//!
//! ```text
//! i32 num external nodes            (0: no table)
//! i32 ancestor level                directories to go up from the owning file
//! i32 num sub folders, folders      recursive: string name, i32 count, sub folders
//! external nodes:
//!   i32 flags
//!   string file name                if flags & 4 == 0
//!   i32 resource index              if flags & 4 != 0
//!   i32 node index
//!   bool use file                   header version >= 5
//!   i32 folder index                if flags & 4 == 0 (1-based, depth-first; 0 = none)
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::{GbxError, Result};
use crate::graph::NodeRef;
use crate::io::{Cursor, Writer};
use crate::reader::{self, ReadOptions};
use crate::registry::NodeRegistry;

const RESOURCE_FLAG: i32 = 4;
const MAX_FOLDER_DEPTH: usize = 64;

/// A folder of the reference table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefFolder {
    /// Folder name.
    pub name: String,
    /// Nested folders.
    pub folders: Vec<RefFolder>,
}

impl RefFolder {
    /// Creates a folder without sub folders.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            folders: Vec::new(),
        }
    }

    fn read(r: &mut Cursor<'_>, depth: usize) -> Result<Self> {
        if depth > MAX_FOLDER_DEPTH {
            return Err(GbxError::Format("reference table folders nested too deep".into()));
        }
        let name = r.read_string()?;
        let folders = r.read_list(|r| Self::read(r, depth + 1))?;
        Ok(Self { name, folders })
    }

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_string(&self.name)?;
        w.write_list(&self.folders, |w, f| f.write(w))
    }

    fn flatten(&self, parent: &Path, out: &mut Vec<PathBuf>) {
        let mut path = parent.to_path_buf();
        path.extend(self.name.split(['\\', '/']).filter(|s| !s.is_empty()));
        out.push(path.clone());
        for folder in &self.folders {
            folder.flatten(&path, out);
        }
    }
}

/// Where an external node lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalFile {
    /// A file next to (or below) the owning file.
    Path(String),
    /// A game resource by index; cannot be resolved from disk.
    Resource(i32),
}

/// One external node descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalNode {
    /// Raw flags (bit 2: resource reference).
    pub flags: i32,
    /// File or resource.
    pub file: ExternalFile,
    /// Node index used by references in the body.
    pub node_index: i32,
    /// Stored from header version 5 on.
    pub use_file: Option<bool>,
    /// 1-based folder index for file references.
    pub folder_index: Option<i32>,
}

impl ExternalNode {
    /// An external node in `file_name`, placed in folder `folder_index` (0 = the ancestor
    /// directory itself).
    pub fn file(node_index: i32, file_name: impl Into<String>, folder_index: i32) -> Self {
        Self {
            flags: 0,
            file: ExternalFile::Path(file_name.into()),
            node_index,
            use_file: Some(true),
            folder_index: Some(folder_index),
        }
    }
}

/// Descriptor table of external nodes, with a cache of the nodes already loaded.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    /// Directories to go up from the owning file.
    pub ancestor_level: i32,
    /// Folder tree.
    pub folders: Vec<RefFolder>,
    /// External node descriptors.
    pub nodes: Vec<ExternalNode>,
    cache: Mutex<HashMap<i32, NodeRef>>,
}

impl Clone for ReferenceTable {
    fn clone(&self) -> Self {
        let cache = self
            .cache
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();
        Self {
            ancestor_level: self.ancestor_level,
            folders: self.folders.clone(),
            nodes: self.nodes.clone(),
            cache: Mutex::new(cache),
        }
    }
}

impl ReferenceTable {
    /// Creates an empty table.
    pub fn new(ancestor_level: i32) -> Self {
        Self {
            ancestor_level,
            ..Self::default()
        }
    }

    /// Reads the table, or `None` when the container has no external nodes.
    pub fn read(r: &mut Cursor<'_>, version: i16) -> Result<Option<Self>> {
        let count = r.read_length()?;
        if count == 0 {
            return Ok(None);
        }

        let ancestor_level = r.read_i32()?;
        let folders = r.read_list(|r| RefFolder::read(r, 0))?;
        let nodes = r.read_array(count, |r| {
            let flags = r.read_i32()?;
            let file = if flags & RESOURCE_FLAG == 0 {
                ExternalFile::Path(r.read_string()?)
            } else {
                ExternalFile::Resource(r.read_i32()?)
            };
            let node_index = r.read_i32()?;
            let use_file = if version >= 5 { Some(r.read_bool()?) } else { None };
            let folder_index = if flags & RESOURCE_FLAG == 0 {
                Some(r.read_i32()?)
            } else {
                None
            };
            Ok(ExternalNode {
                flags,
                file,
                node_index,
                use_file,
                folder_index,
            })
        })?;

        Ok(Some(Self {
            ancestor_level,
            folders,
            nodes,
            cache: Mutex::new(HashMap::new()),
        }))
    }

    /// Writes the table, including the leading count.
    pub fn write(&self, w: &mut Writer, version: i16) -> Result<()> {
        w.write_length(self.nodes.len())?;
        if self.nodes.is_empty() {
            return Ok(());
        }
        w.write_i32(self.ancestor_level);
        w.write_list(&self.folders, |w, f| f.write(w))?;
        for node in &self.nodes {
            w.write_i32(node.flags);
            match &node.file {
                ExternalFile::Path(name) => w.write_string(name)?,
                ExternalFile::Resource(index) => w.write_i32(*index),
            }
            w.write_i32(node.node_index);
            if version >= 5 {
                w.write_bool(node.use_file.unwrap_or(true));
            }
            if node.flags & RESOURCE_FLAG == 0 {
                w.write_i32(node.folder_index.unwrap_or(0));
            }
        }
        Ok(())
    }

    /// Node indices claimed by this table.
    pub fn node_indices(&self) -> Vec<i32> {
        self.nodes.iter().map(|n| n.node_index).collect()
    }

    /// The descriptor for `node_index`.
    pub fn get(&self, node_index: i32) -> Option<&ExternalNode> {
        self.nodes.iter().find(|n| n.node_index == node_index)
    }

    /// Folder paths relative to the ancestor directory, in folder-index order (index 1 first).
    pub fn folder_paths(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for folder in &self.folders {
            folder.flatten(Path::new(""), &mut out);
        }
        out
    }

    /// Path of an external file relative to `owner_dir`, the directory of the owning file.
    pub fn file_path(&self, node: &ExternalNode, owner_dir: &Path) -> Option<PathBuf> {
        let ExternalFile::Path(name) = &node.file else {
            return None;
        };
        let mut path = owner_dir.to_path_buf();
        for _ in 0..self.ancestor_level {
            path.pop();
        }
        if let Some(index) = node.folder_index.filter(|i| *i > 0) {
            let folder = self.folder_paths().into_iter().nth(index as usize - 1)?;
            path.push(folder);
        }
        path.extend(name.split(['\\', '/']).filter(|s| !s.is_empty()));
        Some(path)
    }

    /// Loads the node at `node_index`, parsing its file on first use.
    ///
    /// Returns `Ok(None)` for resource references and unknown indices.
    pub fn resolve(
        &self,
        node_index: i32,
        owner_file: Option<&Path>,
        registry: &Arc<dyn NodeRegistry>,
        options: &ReadOptions,
    ) -> Result<Option<NodeRef>> {
        {
            let cache = self
                .cache
                .lock()
                .map_err(|_| GbxError::Internal("Reference cache mutex poisoned".into()))?;
            if let Some(node) = cache.get(&node_index) {
                return Ok(Some(node.clone()));
            }
        }

        let Some(descriptor) = self.get(node_index) else {
            return Ok(None);
        };
        let owner_dir = owner_file
            .and_then(Path::parent)
            .ok_or_else(|| GbxError::Unsupported("container was not read from a file".into()))?;
        let Some(path) = self.file_path(descriptor, owner_dir) else {
            debug!("external node #{node_index} is a resource reference, not resolved");
            return Ok(None);
        };

        debug!("loading external node #{node_index} from {}", path.display());
        let options = ReadOptions {
            header_only: false,
            ..options.clone()
        };
        let gbx = reader::read_file(&path, Arc::clone(registry), &options)?;
        let Some(node) = gbx.node().cloned() else {
            return Ok(None);
        };

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| GbxError::Internal("Reference cache mutex poisoned".into()))?;
        Ok(Some(cache.entry(node_index).or_insert(node).clone()))
    }
}
