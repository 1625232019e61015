//! Wire format serialization and deserialization.
//!
//! All multi-byte fields are big-endian (network order).
//!
//! ## Policy-Sharing Wire Format
//!
//! ```text
//! sender (2) || samples (1) || table_size (2) || table_size × value (4, IEEE-754 bits)
//! ```
//!
//! A buffer is valid only if its length is exactly `5 + 4 × table_size`.
//!
//! ## Application Payload Format
//!
//! ```text
//! sequence (4) || fill ('a'..'z' repeating)
//! ```
//!
//! The receiver only counts application payloads; content is never inspected.

use alloc::vec::Vec;

use crate::types::NodeId;

/// Fixed header bytes before the value table.
pub const POLICY_HEADER_LEN: usize = 5;

/// Bytes per encoded table value.
pub const POLICY_VALUE_LEN: usize = 4;

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// Buffer length disagrees with the declared table size, or trailing bytes.
    InvalidLength,
    /// Declared table size differs from the local value table.
    TableSizeMismatch,
}

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read an f32 from its big-endian IEEE-754 bit pattern.
    pub fn read_f32_be(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_u32_be()?))
    }
}

/// Writer for encoding messages.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u32_be(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Write an f32 as its big-endian IEEE-754 bit pattern.
    pub fn write_f32_be(&mut self, v: f32) {
        self.write_u32_be(v.to_bits());
    }

    /// Finish writing and return the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    fn encode(&self, w: &mut Writer);

    /// Encode and return the bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(result)
    }
}

/// A node's learned policy, as broadcast by the sync loop.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyMessage {
    pub sender: NodeId,
    /// Completed learning cycles, saturated at 255.
    pub samples: u8,
    pub table: Vec<f32>,
}

impl PolicyMessage {
    /// Encoded size for a table of `table_size` values.
    pub const fn encoded_len(table_size: usize) -> usize {
        POLICY_HEADER_LEN + POLICY_VALUE_LEN * table_size
    }

    /// Decode and additionally require the table to have `table_size` values.
    pub fn decode_expecting(data: &[u8], table_size: usize) -> Result<Self, DecodeError> {
        let msg = Self::decode_from_slice(data)?;
        if msg.table.len() != table_size {
            return Err(DecodeError::TableSizeMismatch);
        }
        Ok(msg)
    }
}

impl Encode for PolicyMessage {
    fn encode(&self, w: &mut Writer) {
        // Tables are bounded by config far below u16::MAX
        let len = self.table.len().min(u16::MAX as usize);
        w.write_u16_be(self.sender);
        w.write_u8(self.samples);
        w.write_u16_be(len as u16);
        for &v in &self.table[..len] {
            w.write_f32_be(v);
        }
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::encoded_len(self.table.len()));
        self.encode(&mut w);
        w.finish()
    }
}

impl Decode for PolicyMessage {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let sender = r.read_u16_be()?;
        let samples = r.read_u8()?;
        let table_size = r.read_u16_be()? as usize;

        if r.remaining() != table_size * POLICY_VALUE_LEN {
            return Err(DecodeError::InvalidLength);
        }

        let mut table = Vec::with_capacity(table_size);
        for _ in 0..table_size {
            table.push(r.read_f32_be()?);
        }

        Ok(Self {
            sender,
            samples,
            table,
        })
    }
}

/// Build an application payload of exactly `len` bytes (at least the sequence number).
pub fn app_payload(sequence: u32, len: usize) -> Vec<u8> {
    let mut w = Writer::with_capacity(len.max(4));
    w.write_u32_be(sequence);
    for i in 0..len.saturating_sub(4) {
        w.write_u8(b'a' + (i % 26) as u8);
    }
    w.finish()
}
