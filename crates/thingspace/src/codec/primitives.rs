//! Primitive encoding/decoding for the Thing wire format.
//!
//! Implements varint, signed varint (zigzag), length-prefixed strings and the
//! LSB-first bit packing used for field flags and null bitmaps.

use crate::error::DecodeError;
use crate::limits::MAX_VARINT_BYTES;

// =============================================================================
// DECODING
// =============================================================================

/// Cursor over an encoded Thing. Every read is bounds checked and names
/// the field it was reading when it fails.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Starts at offset zero.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Byte offset of the next read.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Unread tail of the input.
    pub fn remaining(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or(&[])
    }

    pub fn remaining_len(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// True once the cursor reached the end of the input.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[inline]
    pub fn read_byte(&mut self, context: &'static str) -> Result<u8, DecodeError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof { context })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Borrows the next `n` bytes.
    #[inline]
    pub fn read_bytes(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining_len() {
            return Err(DecodeError::UnexpectedEof { context });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    /// Reads a 0x00/0x01 boolean byte.
    pub fn read_bool(&mut self, context: &'static str) -> Result<bool, DecodeError> {
        match self.read_byte(context)? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(DecodeError::InvalidBool { value }),
        }
    }

    /// LEB128 unsigned integer, at most ten bytes.
    #[inline]
    pub fn read_varint(&mut self, context: &'static str) -> Result<u64, DecodeError> {
        let mut acc = 0u64;
        for index in 0..MAX_VARINT_BYTES {
            let group = self.read_byte(context)?;
            let payload = u64::from(group & 0x7F);
            // The tenth group only has room for bit 63.
            if index == MAX_VARINT_BYTES - 1 && payload > 1 {
                return Err(DecodeError::VarintOverflow);
            }
            acc |= payload << (7 * index);
            if group < 0x80 {
                return Ok(acc);
            }
        }
        Err(DecodeError::VarintTooLong)
    }

    /// Reads a varint used as a length, bounded by `max`.
    pub fn read_len(&mut self, max: usize, field: &'static str) -> Result<usize, DecodeError> {
        let len = self.read_varint(field)?;
        if len > max as u64 {
            return Err(DecodeError::LengthExceedsLimit {
                field,
                len: usize::try_from(len).unwrap_or(usize::MAX),
                max,
            });
        }
        Ok(len as usize)
    }

    /// Zigzag signed integer.
    pub fn read_signed_varint(&mut self, context: &'static str) -> Result<i64, DecodeError> {
        self.read_varint(context).map(zigzag_decode)
    }

    /// Varint byte length followed by UTF-8 text.
    #[inline]
    pub fn read_string(&mut self, max_len: usize, field: &'static str) -> Result<String, DecodeError> {
        let raw = self.read_bytes_prefixed(max_len, field)?;
        match std::str::from_utf8(raw) {
            Ok(text) => Ok(text.to_owned()),
            Err(_) => Err(DecodeError::InvalidUtf8 { field }),
        }
    }

    /// Reads a length-prefixed byte slice without copying.
    pub fn read_bytes_prefixed(&mut self, max_len: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let len = self.read_len(max_len, field)?;
        self.read_bytes(len, field)
    }

    /// Reads a little-endian f64. NaN payloads are preserved.
    #[inline]
    pub fn read_f64(&mut self, context: &'static str) -> Result<f64, DecodeError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.read_bytes(8, context)?);
        Ok(f64::from_le_bytes(raw))
    }
}

/// Reads single bits, least significant bit of each byte first.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bits consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn read_bit(&mut self, context: &'static str) -> Result<bool, DecodeError> {
        let byte = self
            .data
            .get(self.pos / 8)
            .ok_or(DecodeError::UnexpectedEof { context })?;
        let bit = byte & (1 << (self.pos % 8)) != 0;
        self.pos += 1;
        Ok(bit)
    }
}

// =============================================================================
// ENCODING
// =============================================================================

/// Growable output buffer for the binary form.
#[derive(Debug, Clone, Default)]
pub struct Writer {
    out: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preallocates `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { out: Vec::with_capacity(capacity) }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    /// Everything written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.out
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    #[inline]
    pub fn write_byte(&mut self, byte: u8) {
        self.out.push(byte);
    }

    /// Appends bytes without a length prefix.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// LEB128 unsigned integer.
    #[inline]
    pub fn write_varint(&mut self, value: u64) {
        let mut rest = value;
        while rest >= 0x80 {
            self.out.push((rest as u8) | 0x80);
            rest >>= 7;
        }
        self.out.push(rest as u8);
    }

    /// Zigzag signed integer.
    pub fn write_signed_varint(&mut self, value: i64) {
        self.write_varint(zigzag_encode(value));
    }

    /// Varint byte length followed by UTF-8 text.
    pub fn write_string(&mut self, text: &str) {
        self.write_bytes_prefixed(text.as_bytes());
    }

    /// Varint byte length followed by the bytes.
    pub fn write_bytes_prefixed(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.out.extend_from_slice(bytes);
    }

    /// Little-endian IEEE 754, NaN payload included.
    pub fn write_f64(&mut self, value: f64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Packs single bits, least significant bit of each byte first.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bits.div_ceil(8)),
            bits: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, bit: bool) {
        if self.bits % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            if let Some(last) = self.bytes.last_mut() {
                *last |= 1 << (self.bits % 8);
            }
        }
        self.bits += 1;
    }

    /// Number of bits pushed.
    pub fn bit_len(&self) -> usize {
        self.bits
    }

    /// Returns the packed bytes, zero padded to a byte boundary.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// =============================================================================
// SIGNED INTEGERS
// =============================================================================

/// Interleaves signs so small magnitudes stay short: 0, -1, 1, -2 map to
/// 0, 1, 2, 3.
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    (value.wrapping_shl(1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(encoded: u64) -> i64 {
    (encoded >> 1) as i64 ^ (encoded & 1).wrapping_neg() as i64
}
