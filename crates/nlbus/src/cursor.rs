// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Bounds-checked byte cursor.
//
// Every decoder in the crate reads through this type instead of indexing the
// buffer directly. A short read never panics; it reports how many bytes were
// wanted so the caller can turn it into MalformedFrame / MalformedAttributes.

/// Netlink alignment unit.
pub const ALIGN_TO: usize = 4;

/// Round `len` up to the next multiple of [`ALIGN_TO`].
#[inline]
pub const fn align4(len: usize) -> usize {
    (len + ALIGN_TO - 1) & !(ALIGN_TO - 1)
}

/// A read past the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortRead {
    /// Cursor position when the read was attempted.
    pub offset: usize,
    /// Bytes the read needed.
    pub wanted: usize,
    /// Bytes that were left.
    pub remaining: usize,
}

impl std::fmt::Display for ShortRead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "need {} bytes at offset {}, only {} left",
            self.wanted, self.offset, self.remaining
        )
    }
}

/// Forward-only reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes not yet consumed, without advancing.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ShortRead> {
        if n > self.remaining() {
            return Err(self.short(n));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Borrow the next `n` bytes without advancing.
    pub fn peek(&self, n: usize) -> Result<&'a [u8], ShortRead> {
        if n > self.remaining() {
            return Err(self.short(n));
        }
        Ok(&self.buf[self.pos..self.pos + n])
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ShortRead> {
        self.take(n).map(|_| ())
    }

    /// Skip up to `n` bytes, stopping at the end of the buffer.
    pub fn skip_saturating(&mut self, n: usize) {
        self.pos += n.min(self.remaining());
    }

    pub fn read_u8(&mut self) -> Result<u8, ShortRead> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ShortRead> {
        let b = self.take(2)?;
        Ok(u16::from_ne_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ShortRead> {
        let b = self.take(4)?;
        Ok(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, ShortRead> {
        self.read_u32().map(|v| v as i32)
    }

    fn short(&self, wanted: usize) -> ShortRead {
        ShortRead {
            offset: self.pos,
            wanted,
            remaining: self.remaining(),
        }
    }
}
