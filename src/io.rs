//! Primitive codec.
//!
//! [`Cursor`] decodes little-endian primitives from a borrowed byte slice and [`Writer`] is
//! its exact mirror. Every `read_*` has a `write_*` counterpart producing the same bytes.
//!
//! [`ReadExt`] provides the handful of primitives needed on plain [`std::io::Read`] streams,
//! where the total length is unknown (class ID peeking, the encrypted PAK header).

use std::io::Read;

use crate::error::{GbxError, Result};

/// How a string length is stored in front of its UTF-8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPrefix {
    /// No prefix; the caller supplies the length.
    None(usize),
    /// One unsigned byte.
    U8,
    /// Little-endian `i32`; negative values are rejected.
    I32,
}

/// Two `f32` components.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    #[allow(missing_docs)]
    pub x: f32,
    #[allow(missing_docs)]
    pub y: f32,
}

/// Three `f32` components.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    #[allow(missing_docs)]
    pub x: f32,
    #[allow(missing_docs)]
    pub y: f32,
    #[allow(missing_docs)]
    pub z: f32,
}

/// Four `f32` components.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec4 {
    #[allow(missing_docs)]
    pub x: f32,
    #[allow(missing_docs)]
    pub y: f32,
    #[allow(missing_docs)]
    pub z: f32,
    #[allow(missing_docs)]
    pub w: f32,
}

/// Two `i32` components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Int2 {
    #[allow(missing_docs)]
    pub x: i32,
    #[allow(missing_docs)]
    pub y: i32,
}

/// Three `i32` components (block coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Int3 {
    #[allow(missing_docs)]
    pub x: i32,
    #[allow(missing_docs)]
    pub y: i32,
    #[allow(missing_docs)]
    pub z: i32,
}

/// Three `u8` components (compact block coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Byte3 {
    #[allow(missing_docs)]
    pub x: u8,
    #[allow(missing_docs)]
    pub y: u8,
    #[allow(missing_docs)]
    pub z: u8,
}

/// Axis-aligned box stored as two corners.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GbxBox {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

/// A read position over a borrowed byte slice.
///
/// Failed reads never advance the position, so the caller can inspect `position()` after
/// an [`GbxError::UnexpectedEndOfStream`].
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

macro_rules! read_le {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Reads a little-endian `", stringify!($ty), "`.")]
            pub fn $name(&mut self) -> Result<$ty> {
                let bytes = self.read_array_const::<{ std::mem::size_of::<$ty>() }>()?;
                Ok(<$ty>::from_le_bytes(bytes))
            }
        )*
    };
}

impl<'a> Cursor<'a> {
    /// Creates a cursor at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying slice.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying slice is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Moves to an absolute position (may equal the length).
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(GbxError::UnexpectedEndOfStream {
                offset: pos,
                need: 0,
                have: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn ensure(&self, need: usize) -> Result<()> {
        let have = self.remaining();
        if need > have {
            return Err(GbxError::UnexpectedEndOfStream {
                offset: self.pos,
                need,
                have,
            });
        }
        Ok(())
    }

    /// Borrows the next `n` bytes and advances past them.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Advances past `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Borrows everything after the current position.
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        slice
    }

    fn read_array_const<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Reads the next `u32` without advancing.
    pub fn peek_u32(&self) -> Result<u32> {
        self.ensure(4)?;
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        Ok(u32::from_le_bytes(out))
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array_const::<1>()?[0])
    }

    read_le! {
        read_i8 => i8,
        read_i16 => i16,
        read_u16 => u16,
        read_i32 => i32,
        read_u32 => u32,
        read_i64 => i64,
        read_u64 => u64,
        read_f32 => f32,
        read_f64 => f64,
    }

    /// Reads a 4-byte boolean (any non-zero value is `true`).
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u32()? != 0)
    }

    /// Reads a 1-byte boolean.
    pub fn read_bool8(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads an `i32` length prefix, rejecting negative values.
    pub fn read_length(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| GbxError::InvalidLength(i64::from(len)))
    }

    /// Reads a UTF-8 string with the given prefix. Invalid UTF-8 is replaced lossily.
    pub fn read_string_with(&mut self, prefix: StringPrefix) -> Result<String> {
        let len = match prefix {
            StringPrefix::None(len) => len,
            StringPrefix::U8 => usize::from(self.read_u8()?),
            StringPrefix::I32 => self.read_length()?,
        };
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Reads an `i32`-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        self.read_string_with(StringPrefix::I32)
    }

    /// Reads an `i32`-prefixed byte buffer.
    pub fn read_byte_array(&mut self) -> Result<&'a [u8]> {
        let len = self.read_length()?;
        self.read_bytes(len)
    }

    /// Reads an `i32` where `-1` means "not set".
    pub fn read_optional_i32(&mut self) -> Result<Option<i32>> {
        let value = self.read_i32()?;
        Ok((value != -1).then_some(value))
    }

    #[allow(missing_docs)]
    pub fn read_vec2(&mut self) -> Result<Vec2> {
        Ok(Vec2 {
            x: self.read_f32()?,
            y: self.read_f32()?,
        })
    }

    #[allow(missing_docs)]
    pub fn read_vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3 {
            x: self.read_f32()?,
            y: self.read_f32()?,
            z: self.read_f32()?,
        })
    }

    #[allow(missing_docs)]
    pub fn read_vec4(&mut self) -> Result<Vec4> {
        Ok(Vec4 {
            x: self.read_f32()?,
            y: self.read_f32()?,
            z: self.read_f32()?,
            w: self.read_f32()?,
        })
    }

    #[allow(missing_docs)]
    pub fn read_int2(&mut self) -> Result<Int2> {
        Ok(Int2 {
            x: self.read_i32()?,
            y: self.read_i32()?,
        })
    }

    #[allow(missing_docs)]
    pub fn read_int3(&mut self) -> Result<Int3> {
        Ok(Int3 {
            x: self.read_i32()?,
            y: self.read_i32()?,
            z: self.read_i32()?,
        })
    }

    #[allow(missing_docs)]
    pub fn read_byte3(&mut self) -> Result<Byte3> {
        Ok(Byte3 {
            x: self.read_u8()?,
            y: self.read_u8()?,
            z: self.read_u8()?,
        })
    }

    #[allow(missing_docs)]
    pub fn read_box(&mut self) -> Result<GbxBox> {
        Ok(GbxBox {
            min: self.read_vec3()?,
            max: self.read_vec3()?,
        })
    }

    /// Reads `count` elements with `f`.
    pub fn read_array<T>(
        &mut self,
        count: usize,
        mut f: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        // Preallocation is capped by the bytes left.
        let mut out = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            out.push(f(self)?);
        }
        Ok(out)
    }

    /// Reads an `i32` count followed by that many elements.
    pub fn read_list<T>(&mut self, f: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let count = self.read_length()?;
        self.read_array(count, f)
    }
}

/// Growable little-endian output buffer.
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

macro_rules! write_le {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Writes a little-endian `", stringify!($ty), "`.")]
            pub fn $name(&mut self, value: $ty) {
                self.buf.extend_from_slice(&value.to_le_bytes());
            }
        )*
    };
}

impl Writer {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrows the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    write_le! {
        write_i8 => i8,
        write_i16 => i16,
        write_u16 => u16,
        write_i32 => i32,
        write_u32 => u32,
        write_i64 => i64,
        write_u64 => u64,
        write_f32 => f32,
        write_f64 => f64,
    }

    /// Overwrites a previously written `u32` at `offset`.
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let slot = self
            .buf
            .get_mut(offset..offset + 4)
            .ok_or_else(|| GbxError::Internal(format!("patch offset {offset} out of range")))?;
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Writes a 4-byte boolean.
    pub fn write_bool(&mut self, value: bool) {
        self.write_u32(u32::from(value));
    }

    /// Writes a 1-byte boolean.
    pub fn write_bool8(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Writes an `i32` length prefix.
    pub fn write_length(&mut self, len: usize) -> Result<()> {
        let len = i32::try_from(len).map_err(|_| GbxError::InvalidLength(len as i64))?;
        self.write_i32(len);
        Ok(())
    }

    /// Writes a UTF-8 string with the given prefix.
    ///
    /// With [`StringPrefix::None`] the string must be exactly the announced length.
    pub fn write_string_with(&mut self, value: &str, prefix: StringPrefix) -> Result<()> {
        let bytes = value.as_bytes();
        match prefix {
            StringPrefix::None(len) if len != bytes.len() => {
                return Err(GbxError::InvalidLength(bytes.len() as i64));
            }
            StringPrefix::None(_) => {}
            StringPrefix::U8 => {
                let len =
                    u8::try_from(bytes.len()).map_err(|_| GbxError::InvalidLength(bytes.len() as i64))?;
                self.write_u8(len);
            }
            StringPrefix::I32 => self.write_length(bytes.len())?,
        }
        self.write_bytes(bytes);
        Ok(())
    }

    /// Writes an `i32`-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_string_with(value, StringPrefix::I32)
    }

    /// Writes an `i32`-prefixed byte buffer.
    pub fn write_byte_array(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_length(bytes.len())?;
        self.write_bytes(bytes);
        Ok(())
    }

    /// Writes `-1` for `None`.
    pub fn write_optional_i32(&mut self, value: Option<i32>) {
        self.write_i32(value.unwrap_or(-1));
    }

    #[allow(missing_docs)]
    pub fn write_vec2(&mut self, v: Vec2) {
        self.write_f32(v.x);
        self.write_f32(v.y);
    }

    #[allow(missing_docs)]
    pub fn write_vec3(&mut self, v: Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    #[allow(missing_docs)]
    pub fn write_vec4(&mut self, v: Vec4) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
        self.write_f32(v.w);
    }

    #[allow(missing_docs)]
    pub fn write_int2(&mut self, v: Int2) {
        self.write_i32(v.x);
        self.write_i32(v.y);
    }

    #[allow(missing_docs)]
    pub fn write_int3(&mut self, v: Int3) {
        self.write_i32(v.x);
        self.write_i32(v.y);
        self.write_i32(v.z);
    }

    #[allow(missing_docs)]
    pub fn write_byte3(&mut self, v: Byte3) {
        self.write_u8(v.x);
        self.write_u8(v.y);
        self.write_u8(v.z);
    }

    #[allow(missing_docs)]
    pub fn write_box(&mut self, b: GbxBox) {
        self.write_vec3(b.min);
        self.write_vec3(b.max);
    }

    /// Writes every element with `f`, without a count.
    pub fn write_array<T>(
        &mut self,
        items: &[T],
        mut f: impl FnMut(&mut Self, &T) -> Result<()>,
    ) -> Result<()> {
        for item in items {
            f(self, item)?;
        }
        Ok(())
    }

    /// Writes an `i32` count followed by every element.
    pub fn write_list<T>(
        &mut self,
        items: &[T],
        f: impl FnMut(&mut Self, &T) -> Result<()>,
    ) -> Result<()> {
        self.write_length(items.len())?;
        self.write_array(items, f)
    }
}

/// Primitive reads over any [`Read`] stream.
///
/// A short read maps to [`GbxError::UnexpectedEndOfStream`] with the offset unknown (`0`).
pub trait ReadExt: Read {
    /// Fills `buf` completely.
    fn read_exact_gbx(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_exact(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => GbxError::UnexpectedEndOfStream {
                offset: 0,
                need: buf.len(),
                have: 0,
            },
            _ => GbxError::from(e),
        })
    }

    /// Reads one byte.
    fn read_u8_le(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact_gbx(&mut b)?;
        Ok(b[0])
    }

    /// Reads a little-endian `i16`.
    fn read_i16_le(&mut self) -> Result<i16> {
        let mut b = [0u8; 2];
        self.read_exact_gbx(&mut b)?;
        Ok(i16::from_le_bytes(b))
    }

    /// Reads a little-endian `i32`.
    fn read_i32_le(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_exact_gbx(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    /// Reads a little-endian `u32`.
    fn read_u32_le(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact_gbx(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    /// Reads a little-endian `u64`.
    fn read_u64_le(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact_gbx(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    /// Reads `n` bytes into a new buffer.
    fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        // Lengths come from the stream; grow with the data instead of trusting them.
        let mut out = Vec::with_capacity(n.min(4096));
        Read::take(&mut *self, n as u64).read_to_end(&mut out)?;
        if out.len() != n {
            return Err(GbxError::UnexpectedEndOfStream {
                offset: 0,
                need: n,
                have: out.len(),
            });
        }
        Ok(out)
    }

    /// Reads an `i32`-prefixed UTF-8 string.
    fn read_string_le(&mut self) -> Result<String> {
        let len = self.read_i32_le()?;
        let len = usize::try_from(len).map_err(|_| GbxError::InvalidLength(i64::from(len)))?;
        let bytes = self.read_vec(len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<R: Read + ?Sized> ReadExt for R {}
