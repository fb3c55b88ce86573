//! Byte sinks: the per-section growable [`CodeBuffer`] and the
//! stack-allocated [`InstrBytes`] used as encoder output.

#[allow(unused_imports)]
use alloc::format;
use alloc::vec::Vec;

use crate::error::Error;

// ─── InstrBytes ────────────────────────────────────────────

/// Stack-allocated instruction byte buffer.
///
/// x86/x86-64 instructions are at most 15 bytes and AArch64 words are fixed
/// at 4, so a 16-byte inline buffer covers every encoder without touching
/// the heap on the emission hot path.
#[derive(Clone)]
pub struct InstrBytes {
    data: [u8; 16],
    len: u8,
}

impl InstrBytes {
    /// Create an empty buffer.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: [0; 16],
            len: 0,
        }
    }

    /// Create a buffer pre-filled from a byte slice.
    ///
    /// # Panics
    ///
    /// Panics if `src` exceeds 16 bytes.
    #[inline]
    #[must_use]
    pub fn from_slice(src: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.extend_from_slice(src);
        buf
    }

    /// Append a single byte.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is already full.
    #[inline]
    pub fn push(&mut self, byte: u8) {
        assert!(
            (self.len as usize) < 16,
            "InstrBytes overflow: cannot push beyond 16 bytes"
        );
        self.data[self.len as usize] = byte;
        self.len += 1;
    }

    /// Append a slice of bytes.
    ///
    /// # Panics
    ///
    /// Panics if appending would exceed the 16-byte capacity.
    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let start = self.len as usize;
        let end = start + bytes.len();
        assert!(
            end <= 16,
            "InstrBytes overflow: {} + {} exceeds 16-byte capacity",
            start,
            bytes.len()
        );
        self.data[start..end].copy_from_slice(bytes);
        self.len = end as u8;
    }

    /// Append a 32-bit little-endian word.
    #[inline]
    pub fn push_u32(&mut self, word: u32) {
        self.extend_from_slice(&word.to_le_bytes());
    }

    /// Number of bytes in the buffer.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the buffer is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for InstrBytes {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl core::ops::Deref for InstrBytes {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl core::ops::DerefMut for InstrBytes {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len as usize]
    }
}

impl AsRef<[u8]> for InstrBytes {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl core::fmt::Debug for InstrBytes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// ─── CodeBuffer ────────────────────────────────────────────

/// Growable byte vector backing one section.
///
/// Append-only except for [`CodeBuffer::write_at`], the in-place patch
/// primitive used when labels bind and relocations resolve.
#[derive(Debug, Clone, Default)]
pub struct CodeBuffer {
    data: Vec<u8>,
}

impl CodeBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Current size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// The bytes, mutably (the in-place patch surface).
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Clear all bytes.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Shrink back to `len` bytes; used to drop a partial write after an
    /// emission error.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Append raw bytes.
    #[inline]
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append `count` copies of `fill`.
    pub fn append_fill(&mut self, fill: u8, count: usize) {
        self.data.resize(self.data.len() + count, fill);
    }

    /// Append `count` zero bytes.
    pub fn append_zeros(&mut self, count: usize) {
        self.append_fill(0, count);
    }

    /// Append a little-endian scalar of `size` bytes (1, 2, 4, or 8).
    pub fn append_le(&mut self, value: u64, size: u8) {
        debug_assert!(matches!(size, 1 | 2 | 4 | 8));
        self.data
            .extend_from_slice(&value.to_le_bytes()[..size as usize]);
    }

    /// Overwrite `bytes.len()` bytes at `offset`.
    ///
    /// Out-of-bounds writes surface as an error instead of panicking;
    /// patch offsets come from recorded patch sites and must never be able
    /// to take the process down.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or_else(|| Error::invalid_arg("patch range overflows"))?;
        let buf_len = self.data.len();
        let dst = self.data.get_mut(offset..end).ok_or_else(|| {
            Error::invalid_arg(format!(
                "patch range {}..{} out of bounds (buffer len {})",
                offset, end, buf_len
            ))
        })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Read a little-endian `u32` at `offset`, with bounds checking.
    pub fn read_u32_at(&self, offset: usize) -> Result<u32, Error> {
        let slice = self
            .data
            .get(offset..offset + 4)
            .ok_or_else(|| Error::invalid_arg("read range out of bounds"))?;
        let arr: [u8; 4] = slice
            .try_into()
            .map_err(|_| Error::invalid_arg("read range out of bounds"))?;
        Ok(u32::from_le_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instr_bytes_push_and_deref() {
        let mut b = InstrBytes::new();
        b.push(0x90);
        b.push_u32(0xD503_201F);
        assert_eq!(&*b, &[0x90, 0x1F, 0x20, 0x03, 0xD5]);
        assert_eq!(b.len(), 5);
    }

    #[test]
    #[should_panic(expected = "InstrBytes overflow")]
    fn instr_bytes_overflow_panics() {
        let mut b = InstrBytes::from_slice(&[0; 16]);
        b.push(0);
    }

    #[test]
    fn code_buffer_append_le() {
        let mut b = CodeBuffer::new();
        b.append_le(0x1122_3344, 4);
        assert_eq!(b.as_slice(), &[0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn code_buffer_patch() {
        let mut b = CodeBuffer::new();
        b.append_zeros(8);
        b.write_at(2, &[0xAB, 0xCD]).unwrap();
        assert_eq!(b.as_slice()[2], 0xAB);
        assert!(b.write_at(7, &[0, 0]).is_err());
    }

    #[test]
    fn code_buffer_truncate_restores_length() {
        let mut b = CodeBuffer::new();
        b.append(&[1, 2, 3]);
        let mark = b.len();
        b.append(&[4, 5]);
        b.truncate(mark);
        assert_eq!(b.as_slice(), &[1, 2, 3]);
    }
}
