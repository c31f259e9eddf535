//! Packet buffer implementation
//!
//! Provides a byte buffer with the field encodings used by the Rhisis protocol:
//! - Fixed-width little-endian integers (byte, short, int, long)
//! - Length-prefixed strings (i32 length, then bytes) and null-terminated strings
//! - Positional back-patching for counters written before their contents
//!
//! Reads never fabricate data: reading past the end yields
//! [`ProtocolError::UnexpectedEof`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Default maximum packet payload size (64KB)
pub const MAX_PACKET_SIZE: usize = 65535;

/// Longest string accepted by [`PacketBuffer::read_string`]
pub const MAX_STRING_LENGTH: usize = 4096;

type ReadResult<T> = std::result::Result<T, ProtocolError>;

/// Packet buffer for reading and writing game protocol data
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    /// Internal byte buffer
    data: BytesMut,
    /// Current read position
    read_pos: usize,
}

impl PacketBuffer {
    /// Create a new empty packet buffer
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
            read_pos: 0,
        }
    }

    /// Create a packet buffer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Create a packet buffer from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    /// Create a packet buffer by wrapping a BytesMut
    pub fn wrap(data: BytesMut) -> Self {
        Self { data, read_pos: 0 }
    }

    // ============ Properties ============

    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    #[inline]
    pub fn write_position(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get the underlying BytesMut
    #[inline]
    pub fn into_inner(self) -> BytesMut {
        self.data
    }

    /// Freeze the written bytes for hand-off to a transport
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Clear the buffer and reset positions
    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    /// Reset read position to start
    pub fn reset(&mut self) {
        self.read_pos = 0;
    }

    /// Skip a number of bytes when reading
    pub fn skip(&mut self, count: usize) -> ReadResult<()> {
        self.take(count).map(|_| ())
    }

    /// Borrow the next `count` bytes and advance the cursor
    fn take(&mut self, count: usize) -> ReadResult<&[u8]> {
        if self.remaining() < count {
            return Err(ProtocolError::UnexpectedEof {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let start = self.read_pos;
        self.read_pos += count;
        Ok(&self.data[start..start + count])
    }

    fn take_array<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    // ============ Reading Methods (Little-Endian) ============

    pub fn read_byte(&mut self) -> ReadResult<i8> {
        Ok(self.take_array::<1>()?[0] as i8)
    }

    pub fn read_ubyte(&mut self) -> ReadResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> ReadResult<bool> {
        Ok(self.read_ubyte()? != 0)
    }

    pub fn read_short(&mut self) -> ReadResult<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_ushort(&mut self) -> ReadResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_int(&mut self) -> ReadResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_uint(&mut self) -> ReadResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_long(&mut self) -> ReadResult<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_ulong(&mut self) -> ReadResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    // ============ String Reading ============

    /// Read an i32 length-prefixed string
    pub fn read_string(&mut self) -> ReadResult<String> {
        let length = self.read_int()?;
        if length < 0 || length as usize > MAX_STRING_LENGTH {
            return Err(ProtocolError::InvalidStringLength(length));
        }
        let bytes = self.take(length as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidStringEncoding)
    }

    /// Read a null-terminated string
    pub fn read_cstring(&mut self) -> ReadResult<String> {
        let rest = &self.data[self.read_pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::UnexpectedEof {
                needed: rest.len() + 1,
                remaining: rest.len(),
            })?;
        let value = String::from_utf8(rest[..end].to_vec())
            .map_err(|_| ProtocolError::InvalidStringEncoding)?;
        self.read_pos += end + 1;
        Ok(value)
    }

    /// Read a specific number of bytes
    pub fn read_bytes(&mut self, length: usize) -> ReadResult<Vec<u8>> {
        Ok(self.take(length)?.to_vec())
    }

    // ============ Writing Methods (Little-Endian) ============

    pub fn write_byte(&mut self, value: i8) {
        self.data.put_i8(value);
    }

    pub fn write_ubyte(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.put_u8(u8::from(value));
    }

    pub fn write_short(&mut self, value: i16) {
        self.data.put_i16_le(value);
    }

    pub fn write_ushort(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    pub fn write_int(&mut self, value: i32) {
        self.data.put_i32_le(value);
    }

    pub fn write_uint(&mut self, value: u32) {
        self.data.put_u32_le(value);
    }

    pub fn write_long(&mut self, value: i64) {
        self.data.put_i64_le(value);
    }

    pub fn write_ulong(&mut self, value: u64) {
        self.data.put_u64_le(value);
    }

    // ============ String Writing ============

    /// Write an i32 length-prefixed string
    pub fn write_string(&mut self, value: &str) {
        self.write_int(value.len() as i32);
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Write a null-terminated string
    pub fn write_cstring(&mut self, value: &str) {
        self.data.extend_from_slice(value.as_bytes());
        self.write_ubyte(0);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    // ============ Back-patching ============

    /// Overwrite a little-endian u16 previously written at `position`
    pub fn patch_ushort(&mut self, position: usize, value: u16) {
        self.data[position..position + 2].copy_from_slice(&value.to_le_bytes());
    }
}

impl From<Vec<u8>> for PacketBuffer {
    fn from(vec: Vec<u8>) -> Self {
        Self::wrap(BytesMut::from(&vec[..]))
    }
}

impl From<&[u8]> for PacketBuffer {
    fn from(slice: &[u8]) -> Self {
        Self::from_bytes(slice)
    }
}

impl AsRef<[u8]> for PacketBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
