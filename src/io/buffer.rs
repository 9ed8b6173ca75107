//! Fixed-capacity byte storage used on the request hot path.

use crate::{
    errors::SocketError,
    http::types::to_lower_case,
    io::socket::{read_ready, Socket},
};
use memchr::memmem;
use std::{fmt, time::Duration};

/// A byte string stored inline in a fixed `N`-byte array.
///
/// Bytes past [`len`](InlineBytes::len) are always zero, so two values with
/// the same contents compare and hash equal. Used for start-lines and for
/// literal route components, keeping both off the heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InlineBytes<const N: usize> {
    len: usize,
    bytes: [u8; N],
}

impl<const N: usize> InlineBytes<N> {
    /// Number of bytes the value can hold.
    pub const CAPACITY: usize = N;

    /// Creates an empty value.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            len: 0,
            bytes: [0; N],
        }
    }

    /// Copies `src` into a new value, or returns `None` when it does not fit.
    #[inline]
    pub fn from_slice(src: &[u8]) -> Option<Self> {
        if src.len() > N {
            return None;
        }

        let mut value = Self::new();
        value.bytes[..src.len()].copy_from_slice(src);
        value.len = src.len();
        Some(value)
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns an ASCII-lowercased copy, leaving `self` untouched.
    #[inline]
    pub fn to_lowercase(&self) -> Self {
        let mut copy = *self;
        to_lower_case(&mut copy.bytes[..copy.len]);
        copy
    }

    #[inline]
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.as_slice().starts_with(prefix)
    }

    #[inline]
    pub fn ends_with(&self, suffix: &[u8]) -> bool {
        self.as_slice().ends_with(suffix)
    }

    /// Bounds-checked sub-slice; `None` instead of a panic when out of range.
    #[inline(always)]
    pub fn get(&self, start: usize, end: usize) -> Option<&[u8]> {
        self.as_slice().get(start..end)
    }
}

impl<const N: usize> Default for InlineBytes<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> AsRef<[u8]> for InlineBytes<N> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<const N: usize> fmt::Debug for InlineBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_slice()))
    }
}

//

/// Pre-allocated receive buffer owned by a connection worker.
///
/// Allocated once from [`ReqLimits::buffer_size`](crate::limits::ReqLimits)
/// and reused for every accepted descriptor.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReadBuffer {
    len: usize,
    buffer: Box<[u8]>,
}

impl ReadBuffer {
    #[inline]
    pub(crate) fn new(size: usize) -> Self {
        Self {
            len: 0,
            buffer: vec![0; size].into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.buffer[..self.len].fill(0);
        self.len = 0;
    }

    #[inline(always)]
    pub(crate) fn filled(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    #[inline(always)]
    pub(crate) fn is_full(&self) -> bool {
        self.len == self.buffer.len()
    }

    /// Reads whatever the socket has into the free tail of the buffer,
    /// waiting for readiness at most `time`.
    #[inline]
    pub(crate) async fn fill<S: Socket>(
        &mut self,
        socket: &mut S,
        time: Duration,
    ) -> Result<usize, SocketError> {
        if self.is_full() {
            return Ok(0);
        }

        let n = read_ready(socket, &mut self.buffer[self.len..], time).await?;
        self.len += n;
        Ok(n)
    }

    /// Keeps reading until a CRLF is buffered; returns the index of its `\r`.
    ///
    /// Fails with [`SocketError::Truncated`] when the buffer fills up first.
    pub(crate) async fn read_line<S: Socket>(
        &mut self,
        socket: &mut S,
        time: Duration,
    ) -> Result<usize, SocketError> {
        let mut searched = 0;
        loop {
            if let Some(pos) = memmem::find(&self.filled()[searched..], b"\r\n") {
                return Ok(searched + pos);
            }
            searched = self.len.saturating_sub(1);

            if self.fill(socket, time).await? == 0 {
                return Err(SocketError::Truncated);
            }
        }
    }

    /// Keeps reading until the blank line ending the header block is
    /// buffered; returns the index just past it.
    pub(crate) async fn read_head<S: Socket>(
        &mut self,
        socket: &mut S,
        time: Duration,
    ) -> Result<Option<usize>, SocketError> {
        let mut searched = 0;
        loop {
            if let Some(pos) = memmem::find(&self.filled()[searched..], b"\r\n\r\n") {
                return Ok(Some(searched + pos + 4));
            }
            searched = self.len.saturating_sub(3);

            if self.is_full() {
                return Ok(None);
            }
            self.fill(socket, time).await?;
        }
    }

    /// Keeps reading until at least `count` bytes are buffered or the buffer
    /// is full; returns the number of buffered bytes.
    pub(crate) async fn read_count<S: Socket>(
        &mut self,
        socket: &mut S,
        count: usize,
        time: Duration,
    ) -> Result<usize, SocketError> {
        while self.len < count && !self.is_full() {
            self.fill(socket, time).await?;
        }
        Ok(self.len)
    }
}

#[cfg(test)]
impl ReadBuffer {
    pub(crate) fn from<V: AsRef<[u8]>>(size: usize, value: V) -> Self {
        let mut buffer = Self::new(size);
        let value = value.as_ref();
        buffer.buffer[..value.len()].copy_from_slice(value);
        buffer.len = value.len();
        buffer
    }
}
