//! Binary codec shared by every persisted entity
//!
//! All persisted structures (bin identifiers, numeric datasets, dimension
//! definitions, index strategies, index metadata) are written with the same
//! two primitives:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ fixed-width integer / float  │  big-endian
//! ├──────────────────────────────┤
//! │ block                        │
//! │   length: u32 (big-endian)   │
//! │   payload: [u8; length]      │
//! └──────────────────────────────┘
//! ```
//!
//! Nested entities are written as blocks, so a reader always knows exactly
//! how many bytes belong to each sub-field. Truncated input is a hard
//! decode failure; nothing is partially interpreted.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Errors raised while decoding persisted bytes
#[derive(Error, Debug)]
pub enum CodecError {
    /// Input ended before a field could be read
    #[error("Truncated input: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Bytes left over after a complete value was decoded
    #[error("Trailing bytes: {0} unread bytes after value")]
    TrailingBytes(usize),

    /// Type tag not recognised
    #[error("Unknown {kind} tag: {tag}")]
    UnknownTag { kind: &'static str, tag: u8 },

    /// Decoded value violates an invariant of its type
    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Result type alias for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Entities that round-trip through the binary codec
pub trait Persistable: Sized {
    /// Append this value's encoding to `writer`
    fn write_to(&self, writer: &mut BinaryWriter);

    /// Decode a value previously written by [`Persistable::write_to`]
    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self>;

    /// Encode to a standalone byte vector
    fn to_binary(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.write_to(&mut writer);
        writer.into_bytes()
    }

    /// Decode from a standalone byte slice, rejecting trailing bytes
    fn from_binary(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = BinaryReader::new(bytes);
        let value = Self::read_from(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Growable big-endian writer
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        // Writing into a Vec cannot fail
        let _ = self.buf.write_u32::<BigEndian>(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        let _ = self.buf.write_u64::<BigEndian>(value);
    }

    pub fn put_f64(&mut self, value: f64) {
        let _ = self.buf.write_f64::<BigEndian>(value);
    }

    /// Write a length-prefixed block
    pub fn put_block(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Write a nested entity as a length-prefixed block
    pub fn put_entity<P: Persistable>(&mut self, value: &P) {
        self.put_block(&value.to_binary());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Big-endian reader over a borrowed slice
#[derive(Debug)]
pub struct BinaryReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> BinaryReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    fn offset(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.offset())
    }

    fn ensure(&self, needed: usize) -> CodecResult<()> {
        let available = self.remaining();
        if available < needed {
            return Err(CodecError::Truncated {
                offset: self.offset(),
                needed,
                available,
            });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> CodecResult<u8> {
        self.ensure(1)?;
        self.cursor.read_u8().map_err(|e| CodecError::Invalid(e.to_string()))
    }

    pub fn get_u32(&mut self) -> CodecResult<u32> {
        self.ensure(4)?;
        self.cursor
            .read_u32::<BigEndian>()
            .map_err(|e| CodecError::Invalid(e.to_string()))
    }

    pub fn get_u64(&mut self) -> CodecResult<u64> {
        self.ensure(8)?;
        self.cursor
            .read_u64::<BigEndian>()
            .map_err(|e| CodecError::Invalid(e.to_string()))
    }

    pub fn get_f64(&mut self) -> CodecResult<f64> {
        self.ensure(8)?;
        self.cursor
            .read_f64::<BigEndian>()
            .map_err(|e| CodecError::Invalid(e.to_string()))
    }

    /// Read a length-prefixed block
    pub fn get_block(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.get_u32()? as usize;
        self.ensure(len)?;
        let start = self.offset();
        let bytes: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + len) as u64);
        Ok(&bytes[start..start + len])
    }

    /// Read a nested entity written with [`BinaryWriter::put_entity`]
    pub fn get_entity<P: Persistable>(&mut self) -> CodecResult<P> {
        let block = self.get_block()?;
        P::from_binary(block)
    }

    /// Fail if any input is left unread
    pub fn finish(self) -> CodecResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}
