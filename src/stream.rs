//! Sequential encoding and decoding of wire values.
//!
//! [`InputStream`] and [`OutputStream`] cover the small set of primitives the dispatch core needs:
//! bytes, little-endian integers, compact sizes, strings, string sequences and encapsulations.
//!
//! An encapsulation is a self-delimited region: an `i32` byte count (covering the six byte
//! encapsulation header itself) followed by a major/minor encoding version and the payload. A
//! reader that finishes an encapsulation early skips whatever it did not understand, which is what
//! makes nested payloads forward compatible.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::StreamError;

/// Major version of the only supported encoding.
pub const ENCODING_MAJOR: u8 = 1;
/// Minor version of the only supported encoding.
pub const ENCODING_MINOR: u8 = 0;

/// Size of an encapsulation header: `i32` size, major and minor version.
pub const ENCAPS_HEADER_SIZE: usize = 6;

/// Sizes up to this value are encoded in a single byte.
const SIZE_ONE_BYTE_MAX: usize = 254;

/// Reads wire values from an immutable buffer.
#[derive(Debug, Default)]
pub struct InputStream {
    buf: Bytes,
    pos: usize,
    encaps: Vec<usize>,
}

impl InputStream {
    /// Creates a stream reading `buf` from the start.
    pub fn new(buf: impl Into<Bytes>) -> Self {
        InputStream {
            buf: buf.into(),
            pos: 0,
            encaps: Vec::new(),
        }
    }

    /// The current read position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Number of unread bytes in the innermost open encapsulation, or the whole buffer if none.
    pub fn remaining_in_encaps(&self) -> usize {
        self.encaps
            .last()
            .map(|end| end.saturating_sub(self.pos))
            .unwrap_or_else(|| self.remaining())
    }

    /// Reads never cross the end of the innermost open encapsulation.
    fn check_available(&self, len: usize) -> Result<(), StreamError> {
        let remaining = self.remaining_in_encaps();
        if remaining < len {
            return Err(StreamError::UnexpectedEnd {
                needed: len,
                remaining,
            });
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&[u8], StreamError> {
        self.check_available(len)?;
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }

    /// Reads a single byte.
    pub fn read_byte(&mut self) -> Result<u8, StreamError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a boolean encoded as a single byte.
    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.read_byte()? != 0)
    }

    /// Reads a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, StreamError> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(bytes))
    }

    /// Reads a little-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, StreamError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(bytes))
    }

    /// Reads a compact size.
    pub fn read_size(&mut self) -> Result<usize, StreamError> {
        match self.read_byte()? {
            255 => {
                let size = self.read_i32()?;
                usize::try_from(size).map_err(|_| StreamError::NegativeSize(size))
            }
            b => Ok(b as usize),
        }
    }

    /// Reads `len` raw bytes.
    pub fn read_blob(&mut self, len: usize) -> Result<Bytes, StreamError> {
        self.check_available(len)?;
        let blob = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(blob)
    }

    /// Reads a size-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, StreamError> {
        let len = self.read_size()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| StreamError::InvalidUtf8)
    }

    /// Reads a size-prefixed sequence of strings.
    pub fn read_string_seq(&mut self) -> Result<Vec<String>, StreamError> {
        let len = self.read_size()?;
        // Every element takes at least one byte, so a bogus size fails before allocating.
        self.check_available(len)?;
        (0..len).map(|_| self.read_string()).collect()
    }

    /// Opens an encapsulation, returning its payload size.
    pub fn start_read_encaps(&mut self) -> Result<usize, StreamError> {
        let start = self.pos;
        let size = self.read_i32()?;
        let size = usize::try_from(size).map_err(|_| StreamError::NegativeSize(size))?;
        let available = self.remaining_in_encaps() + 4;
        if size < ENCAPS_HEADER_SIZE || size > available {
            return Err(StreamError::EncapsulationOverrun { size, available });
        }
        let major = self.read_byte()?;
        let minor = self.read_byte()?;
        if major != ENCODING_MAJOR || minor > ENCODING_MINOR {
            return Err(StreamError::UnsupportedEncoding { major, minor });
        }
        self.encaps.push(start + size);
        Ok(size - ENCAPS_HEADER_SIZE)
    }

    /// Closes the innermost encapsulation, skipping any bytes left unread inside it.
    pub fn end_read_encaps(&mut self) -> Result<(), StreamError> {
        let end = self.encaps.pop().ok_or(StreamError::NoEncapsulation)?;
        if self.pos > end {
            return Err(StreamError::EncapsulationOverrun {
                size: self.pos,
                available: end,
            });
        }
        self.pos = end;
        Ok(())
    }

    /// Skips an encapsulation without decoding it, returning its raw payload.
    pub fn read_encaps_payload(&mut self) -> Result<Bytes, StreamError> {
        let len = self.start_read_encaps()?;
        let payload = self.read_blob(len)?;
        self.end_read_encaps()?;
        Ok(payload)
    }
}

/// Writes wire values into a growable buffer.
#[derive(Debug, Default)]
pub struct OutputStream {
    buf: BytesMut,
    encaps: Vec<usize>,
}

impl OutputStream {
    /// Creates an empty stream.
    pub fn new() -> Self {
        OutputStream::default()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Writes a single byte.
    pub fn write_byte(&mut self, b: u8) {
        self.buf.put_u8(b);
    }

    /// Writes a boolean as a single byte.
    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    /// Writes a little-endian `i32`.
    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    /// Writes a little-endian `i64`.
    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    /// Writes a compact size.
    ///
    /// # Panics
    ///
    /// Panics if `size` does not fit in an `i32`.
    pub fn write_size(&mut self, size: usize) {
        if size <= SIZE_ONE_BYTE_MAX {
            self.buf.put_u8(size as u8);
        } else {
            let size = i32::try_from(size).expect("size exceeds i32::MAX");
            self.buf.put_u8(255);
            self.buf.put_i32_le(size);
        }
    }

    /// Writes raw bytes without a size prefix.
    pub fn write_blob(&mut self, blob: &[u8]) {
        self.buf.put_slice(blob);
    }

    /// Writes a size-prefixed UTF-8 string.
    pub fn write_string(&mut self, s: &str) {
        self.write_size(s.len());
        self.buf.put_slice(s.as_bytes());
    }

    /// Writes a size-prefixed sequence of strings.
    pub fn write_string_seq<S: AsRef<str>>(&mut self, seq: &[S]) {
        self.write_size(seq.len());
        for s in seq {
            self.write_string(s.as_ref());
        }
    }

    /// Opens an encapsulation. The size is filled in by [`end_write_encaps`](Self::end_write_encaps).
    pub fn start_write_encaps(&mut self) {
        self.encaps.push(self.buf.len());
        self.buf.put_i32_le(0);
        self.buf.put_u8(ENCODING_MAJOR);
        self.buf.put_u8(ENCODING_MINOR);
    }

    /// Closes the innermost encapsulation and patches its size.
    pub fn end_write_encaps(&mut self) -> Result<(), StreamError> {
        let start = self.encaps.pop().ok_or(StreamError::NoEncapsulation)?;
        let size = i32::try_from(self.buf.len() - start).map_err(|_| {
            StreamError::EncapsulationOverrun {
                size: self.buf.len() - start,
                available: i32::MAX as usize,
            }
        })?;
        self.buf[start..start + 4].copy_from_slice(&size.to_le_bytes());
        Ok(())
    }

    /// Number of encapsulations opened and not yet closed.
    pub fn open_encaps(&self) -> usize {
        self.encaps.len()
    }

    /// Writes `payload` as a complete encapsulation.
    pub fn write_encaps(&mut self, payload: &[u8]) {
        self.start_write_encaps();
        self.write_blob(payload);
        // The encapsulation was opened just above.
        let _ = self.end_write_encaps();
    }

    /// Truncates the stream to `pos`, forgetting encapsulations opened at or after it.
    pub fn reset_to(&mut self, pos: usize) {
        self.buf.truncate(pos);
        self.encaps.retain(|start| *start < pos);
    }

    /// Overwrites the byte at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is past the end of the written bytes.
    pub fn set_byte(&mut self, pos: usize, b: u8) {
        self.buf[pos] = b;
    }

    /// Overwrites four bytes at `pos` with a little-endian `i32`.
    ///
    /// # Panics
    ///
    /// Panics if the range is past the end of the written bytes.
    pub fn set_i32(&mut self, pos: usize, v: i32) {
        self.buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Consumes the stream, returning the written bytes.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}
