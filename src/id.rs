//! Lookback IDs.
//!
//! GBX bodies store most identifier strings once and refer back to them by position. The
//! [`LookbackTable`] holds those strings for exactly one read or write session.
//!
//! Encoding of a single [`Id`]:
//!
//! ```text
//! 0xFFFFFFFF                 ""
//! 0xBFFFFFFF                 "Unassigned"
//! 0x00000000..=0x3FFFFFFF    collection index (environment number)
//! 0x40000000 / 0x80000000    new string follows (i32 prefix), appended to the table
//! 0x40000001..               back-reference: table[(v & 0x3FFFFFFF) - 1]
//! ```
//!
//! The first Id of a session is preceded by the table version (an `i32`, normally 3).

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{GbxError, Result};
use crate::io::{Cursor, Writer};

/// Table version written before the first Id of a session.
pub const DEFAULT_LOOKBACK_VERSION: i32 = 3;

const EMPTY: u32 = 0xFFFF_FFFF;
const UNASSIGNED: u32 = 0xBFFF_FFFF;
const NEW_STRING: u32 = 0x4000_0000;
const FLAG_MASK: u32 = 0xC000_0000;
const INDEX_MASK: u32 = 0x3FFF_FFFF;

/// The string carried by the `0xBFFFFFFF` sentinel.
pub const UNASSIGNED_STR: &str = "Unassigned";

/// Well-known collection (environment) numbers.
static COLLECTIONS: &[(i32, &str)] = &[
    (0, "Desert"),
    (1, "Snow"),
    (2, "Rally"),
    (3, "Island"),
    (4, "Bay"),
    (5, "Coast"),
    (6, "Valley"),
    (7, "Stadium"),
    (8, "Canyon"),
    (9, "Lagoon"),
    (11, "TMCommon"),
    (12, "Canyon4"),
    (13, "Canyon256"),
    (14, "Valley4"),
    (15, "Valley256"),
    (16, "Lagoon4"),
    (17, "Lagoon256"),
    (18, "Stadium4"),
    (19, "Stadium256"),
    (26, "Stadium"),
    (100, "History"),
    (101, "Society"),
    (102, "Galaxy"),
    (103, "Gothic"),
    (104, "Paris"),
    (200, "Storm"),
    (201, "Cryo"),
    (202, "Meteor"),
    (301, "SMCommon"),
    (10003, "Common"),
];

/// Returns the collection name for a collection index, if it is well known.
pub fn collection_name(index: i32) -> Option<&'static str> {
    COLLECTIONS
        .iter()
        .find(|(i, _)| *i == index)
        .map(|(_, name)| *name)
}

fn is_known_collection(index: i32) -> bool {
    collection_name(index).is_some()
}

/// An identifier as stored in a lookback table.
///
/// Equality, hashing and `Display` go through the collection-name table, so
/// `Id::CollectionIndex(7) == Id::from("Stadium")`.
#[derive(Debug, Clone)]
pub enum Id {
    /// A plain string.
    String(String),
    /// A numeric collection index.
    CollectionIndex(i32),
}

impl Id {
    /// The empty Id.
    pub fn empty() -> Self {
        Self::String(String::new())
    }

    /// The `"Unassigned"` Id.
    pub fn unassigned() -> Self {
        Self::String(UNASSIGNED_STR.to_owned())
    }

    /// Returns `true` for the empty string.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::String(s) if s.is_empty())
    }

    /// The collection index, if this Id is (or names) one.
    pub fn collection_index(&self) -> Option<i32> {
        match self {
            Self::CollectionIndex(i) => Some(*i),
            Self::String(s) => COLLECTIONS
                .iter()
                .find(|(_, name)| *name == s)
                .map(|(i, _)| *i),
        }
    }

    fn normalized(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Self::String(s) => std::borrow::Cow::Borrowed(s.as_str()),
            Self::CollectionIndex(i) => match collection_name(*i) {
                Some(name) => std::borrow::Cow::Borrowed(name),
                None => std::borrow::Cow::Owned(i.to_string()),
            },
        }
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized())
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i32> for Id {
    fn from(value: i32) -> Self {
        Self::CollectionIndex(value)
    }
}

/// Identifier triple used by most asset references: name, collection and author.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Ident {
    /// Asset name or UID.
    pub id: Id,
    /// Collection (environment).
    pub collection: Id,
    /// Author login.
    pub author: Id,
}

impl Ident {
    /// Builds an ident from its three parts.
    pub fn new(id: impl Into<Id>, collection: impl Into<Id>, author: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            author: author.into(),
        }
    }
}

/// Per-session string interning table.
#[derive(Debug, Clone)]
pub struct LookbackTable {
    version: i32,
    version_seen: bool,
    strings: Vec<String>,
}

impl Default for LookbackTable {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK_VERSION)
    }
}

impl LookbackTable {
    /// Creates an empty table that writes `version` before its first Id.
    pub fn new(version: i32) -> Self {
        Self {
            version,
            version_seen: false,
            strings: Vec::new(),
        }
    }

    /// The table version (read from the stream once the first Id was read).
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Interned strings in insertion order.
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Reads one Id.
    pub fn read(&mut self, r: &mut Cursor<'_>) -> Result<Id> {
        if !self.version_seen {
            self.version = r.read_i32()?;
            self.version_seen = true;
        }

        let value = r.read_u32()?;
        if value == EMPTY {
            return Ok(Id::empty());
        }
        if value == UNASSIGNED {
            return Ok(Id::unassigned());
        }
        if value & FLAG_MASK == 0 {
            return Ok(Id::CollectionIndex(value as i32));
        }

        let index = value & INDEX_MASK;
        if index == 0 {
            let s = r.read_string()?;
            self.strings.push(s.clone());
            return Ok(Id::String(s));
        }

        self.strings
            .get(index as usize - 1)
            .cloned()
            .map(Id::String)
            .ok_or_else(|| {
                GbxError::Format(format!(
                    "lookback index {index} out of range ({} strings interned)",
                    self.strings.len()
                ))
            })
    }

    /// Writes one Id, interning new strings.
    ///
    /// # Errors
    /// [`GbxError::InvalidLength`] for collection indices outside `0..0x4000_0000`; those
    /// would collide with the string flags.
    pub fn write(&mut self, w: &mut Writer, id: &Id) -> Result<()> {
        if let Id::CollectionIndex(i) = id {
            if !(0..=INDEX_MASK as i32).contains(i) {
                return Err(GbxError::InvalidLength(i64::from(*i)));
            }
        }
        if !self.version_seen {
            w.write_i32(self.version);
            self.version_seen = true;
        }

        let s = match id {
            Id::CollectionIndex(i) => {
                w.write_u32(*i as u32);
                return Ok(());
            }
            Id::String(s) => s,
        };

        if s == UNASSIGNED_STR {
            w.write_u32(UNASSIGNED);
        } else if s.is_empty() {
            w.write_u32(EMPTY);
        } else if let Some(pos) = self.strings.iter().position(|x| x == s) {
            w.write_u32(pos as u32 + 1 + NEW_STRING);
        } else if let Some(index) = s.parse::<i32>().ok().filter(|i| is_known_collection(*i)) {
            w.write_u32(index as u32);
        } else {
            w.write_u32(NEW_STRING);
            w.write_string(s)?;
            self.strings.push(s.clone());
        }
        Ok(())
    }

    /// Reads an [`Ident`] (three Ids).
    pub fn read_ident(&mut self, r: &mut Cursor<'_>) -> Result<Ident> {
        Ok(Ident {
            id: self.read(r)?,
            collection: self.read(r)?,
            author: self.read(r)?,
        })
    }

    /// Writes an [`Ident`] (three Ids).
    pub fn write_ident(&mut self, w: &mut Writer, ident: &Ident) -> Result<()> {
        self.write(w, &ident.id)?;
        self.write(w, &ident.collection)?;
        self.write(w, &ident.author)
    }
}
