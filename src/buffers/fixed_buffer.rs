//! Fixed-length buffers for reuse. Their main purpose is to minimize allocation and
//!  copying on the datagram send and receive paths: the buffer backing a framing writer
//!  is rented from a pool and returned unchanged in capacity.
//!
//! Salient points:
//!
//! * backed by a fixed-length, pre-allocated buffer
//! * implement `BufMut` to fit into the `bytes` ecosystem

use bytes::buf::UninitSlice;
use std::borrow::Borrow;
use std::fmt::{Debug, Formatter};

/// A fixed-length dynamically allocated buffer
#[derive(Eq)]
pub struct FixedBuf {
    buf: Vec<u8>,
    len: usize,
}

impl FixedBuf {
    /// create a new FixedBuf instance with the given buffer capacity
    pub fn new(capacity: usize) -> FixedBuf {
        FixedBuf {
            // buffers are reused aggressively, so we trade the overhead of initial
            //  zero-initialization for simplicity
            buf: vec![0; capacity],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn truncate(&mut self, len: usize) {
        assert!(len <= self.capacity());
        if len < self.len {
            self.len = len;
        }
    }

    /// make the entire underlying buffer available through as_ref() etc.
    pub fn maximize_len(&mut self) {
        self.len = self.capacity();
    }

}

impl PartialEq for FixedBuf {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().eq(other.as_ref())
    }
}

impl Debug for FixedBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl Borrow<[u8]> for FixedBuf {
    fn borrow(&self) -> &[u8] {
        self.as_ref()
    }
}

impl AsRef<[u8]> for FixedBuf {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl AsMut<[u8]> for FixedBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

unsafe impl bytes::BufMut for FixedBuf {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.len
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.len + cnt <= self.capacity());
        self.len += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.len..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use rstest::rstest;

    fn new_buf(capacity: usize, content: &[u8]) -> FixedBuf {
        let mut result = FixedBuf::new(capacity);
        result.put_slice(content);
        result
    }

    #[rstest]
    #[case::empty(new_buf(100, b""), 0)]
    #[case::simple(new_buf(100, b"abc"), 3)]
    fn test_len(#[case] buf: FixedBuf, #[case] expected: usize) {
        assert_eq!(buf.len(), expected);
        assert_eq!(buf.is_empty(), expected == 0);
    }

    #[rstest]
    #[case::empty_100(new_buf(100, b""), 100)]
    #[case::data_100(new_buf(100, b"abc"), 100)]
    #[case::full(new_buf(5, b"abcde"), 5)]
    fn test_capacity(#[case] buf: FixedBuf, #[case] expected: usize) {
        assert_eq!(buf.capacity(), expected);
    }

    #[rstest]
    #[case::empty(new_buf(100, b""))]
    #[case::data(new_buf(200, b"123"))]
    #[case::full(new_buf(5, b"12345"))]
    fn test_clear(#[case] mut buf: FixedBuf) {
        let capacity = buf.capacity();

        buf.clear();

        assert_eq!(0, buf.len());
        assert_eq!(b"", buf.as_ref());
        assert_eq!(capacity, buf.capacity());
    }

    #[rstest]
    #[case::shorten(5, b"hello", 3, b"hel")]
    #[case::zero(5, b"hello", 0, b"")]
    #[case::same(5, b"hello", 5, b"hello")]
    #[case::beyond_len(10, b"hello", 8, b"hello")]
    fn test_truncate(
        #[case] capacity: usize,
        #[case] content: &[u8],
        #[case] truncate_to: usize,
        #[case] expected: &[u8],
    ) {
        let mut buf = new_buf(capacity, content);
        buf.truncate(truncate_to);
        assert_eq!(buf.as_ref(), expected);
    }

    #[rstest]
    #[case::empty(new_buf(3, b""), b"\0\0\0")]
    #[case::data(new_buf(4, b"abc"), b"abc\0")]
    #[case::full(new_buf(5, b"abcde"), b"abcde")]
    fn test_maximize_len(#[case] mut buf: FixedBuf, #[case] expected: &[u8]) {
        buf.maximize_len();
        assert_eq!(buf.as_ref(), expected);
    }

    #[rstest]
    #[case::empty(new_buf(100, b""), new_buf(100, b""), true)]
    #[case::empty_different_capacity(new_buf(100, b""), new_buf(200, b""), true)]
    #[case::simple(new_buf(100, b"hi"), new_buf(200, b"hi"), true)]
    #[case::different(new_buf(100, b"hi"), new_buf(100, b"yo"), false)]
    #[case::prefix(new_buf(100, b"h"), new_buf(100, b"hi"), false)]
    fn test_eq(#[case] buf1: FixedBuf, #[case] buf2: FixedBuf, #[case] expected: bool) {
        assert_eq!(buf1.eq(&buf2), expected);
        assert_eq!(buf2.eq(&buf1), expected);
    }

    #[test]
    fn test_buf_mut_chunk_mut() {
        let mut buffer = FixedBuf::new(1000);
        buffer.put_slice(b"hello");

        assert_eq!(buffer.remaining_mut(), 1000 - 5);

        let chunk = buffer.chunk_mut();
        assert_eq!(chunk.len(), 1000 - 5);

        chunk[..7].copy_from_slice(b" world!");
        assert_eq!(buffer.as_ref(), b"hello");

        unsafe {
            buffer.advance_mut(6);
        }
        assert_eq!(buffer.remaining_mut(), 1000 - 11);
        assert_eq!(buffer.as_ref(), b"hello world");
    }

    #[test]
    fn test_as_mut_modification() {
        let mut buf = new_buf(20, b"abc");
        buf.as_mut()[0] = 65;
        assert_eq!(buf.as_ref(), b"Abc");
    }
}
