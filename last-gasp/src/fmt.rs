//! Fixed capacity text buffers.
//!
//! Everything that is formatted while handling a fatal event goes through
//! [`FixedBuf`], which lives on the stack and silently truncates instead of
//! growing, so that `core::fmt` can be used without touching the allocator.

use std::fmt;

/// A UTF-8 text buffer with a capacity of `N` bytes.
#[derive(Clone)]
pub struct FixedBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> FixedBuf<N> {
    #[inline]
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    /// Creates a buffer holding the formatted arguments, truncated to `N` bytes.
    #[inline]
    pub fn from_fmt(args: fmt::Arguments<'_>) -> Self {
        let mut fb = Self::new();
        let _ = fmt::Write::write_fmt(&mut fb, args);
        fb
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        // SAFETY: only whole `str`s, cut at char boundaries, are ever copied in
        unsafe { std::str::from_utf8_unchecked(&self.buf[..self.len]) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Appends as much of `s` as fits, returning `false` if anything was cut.
    pub fn push_str(&mut self, s: &str) -> bool {
        let room = N - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }

        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        take == s.len()
    }
}

impl<const N: usize> Default for FixedBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for FixedBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // Truncation is not an error, otherwise `write!` would stop at the
        // first oversized argument instead of keeping what fits
        self.push_str(s);
        Ok(())
    }
}

impl<const N: usize> fmt::Display for FixedBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for FixedBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> PartialEq<str> for FixedBuf<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl<const N: usize> PartialEq<&str> for FixedBuf<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}
