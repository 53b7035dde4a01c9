//! Bounds-checked reading over an immutable byte slice.
//!
//! Every parser in this crate reads through [`ByteCursor`]. A read either
//! returns exactly the bytes it promises or fails with
//! [`Error::Truncated`]; there is no partial read. After a failed read the
//! cursor position is unspecified and the caller is expected to abort.
//!
//! All multi-byte integers are little-endian.

use crate::error::{Error, Result};

/// A position-tracking view over a borrowed buffer.
///
/// Cursors are `Copy`, so lookahead is done by copying the cursor and reading
/// from the copy.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    /// Creates a cursor positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current absolute position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Length of the underlying buffer
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the underlying buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes between the position and the end of the buffer
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Returns true once every byte has been consumed
    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// The whole underlying buffer
    pub fn buffer(&self) -> &'a [u8] {
        self.data
    }

    /// Moves to an absolute offset. Seeking to exactly `len()` is allowed.
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(Error::out_of_range(offset, 0, self.data.len()));
        }
        self.position = offset;
        Ok(())
    }

    /// Returns the next `n` bytes without advancing
    pub fn peek(&self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::truncated(self.position, n, self.remaining()));
        }
        Ok(&self.data[self.position..self.position + n])
    }

    /// Reads `n` bytes as a slice of the underlying buffer
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes = self.peek(n)?;
        self.position += n;
        Ok(bytes)
    }

    /// Reads exactly `N` bytes into a fixed-size array
    pub fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Skips `n` bytes
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Reads one byte
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_fixed::<1>()?[0])
    }

    /// Reads a little-endian `u16`
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_fixed().map(u16::from_le_bytes)
    }

    /// Reads a little-endian `u32`
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_fixed().map(u32::from_le_bytes)
    }

    /// Reads a `u16` length followed by that many bytes.
    ///
    /// On failure the reported offset is the start of the length field.
    pub fn read_length_prefixed(&mut self) -> Result<&'a [u8]> {
        let start = self.position;
        let available = self.data.len() - start;
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
            .map_err(|_| Error::truncated(start, 2 + len, available))
    }
}
