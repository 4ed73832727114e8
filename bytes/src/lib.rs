//! The binary stream format used as the wire representation everywhere in
//! lockstep.
//!
//! A [`BinStream`] is a byte buffer with an implicit write tail and a read
//! head (`front`). Values are appended with [`BinStream::push`] and read back
//! with [`BinStream::pop`] in the same order; the encoding rules live with
//! the [`Serialize`] trait. All multi-byte scalars use the host's byte order,
//! as the engine assumes a homogeneous cluster.
//!
//! # Examples
//! ```
//! use lockstep_bytes::BinStream;
//!
//! let mut bin = BinStream::new();
//! bin.push(&42u64);
//! bin.push(&"hello".to_string());
//! assert_eq!(bin.pop::<u64>(), 42);
//! assert_eq!(bin.pop::<String>(), "hello");
//! assert_eq!(bin.size(), 0);
//! ```

mod serialize;

pub use serialize::Serialize;

/// A self-describing byte buffer with a read head and a write tail.
///
/// Reading past the end is a logic error and panics: a stream is always
/// produced and consumed by code that agrees on the layout, so underflow
/// means a bug, not a recoverable condition.
#[derive(Clone, Default)]
pub struct BinStream {
    buffer: Vec<u8>,
    front: usize,
}

impl BinStream {
    /// Creates an empty stream.
    pub fn new() -> Self {
        BinStream { buffer: Vec::new(), front: 0 }
    }

    /// Creates an empty stream with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        BinStream { buffer: Vec::with_capacity(capacity), front: 0 }
    }

    /// Wraps an owned byte vector; the read head starts at the beginning.
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        BinStream { buffer, front: 0 }
    }

    /// Number of unread bytes remaining.
    pub fn size(&self) -> usize {
        self.buffer.len() - self.front
    }

    /// True when no unread bytes remain.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Discards all content but keeps the allocation.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.front = 0;
    }

    /// Discards all content and releases the allocation.
    pub fn purge(&mut self) {
        self.buffer = Vec::new();
        self.front = 0;
    }

    /// Moves the read head to an absolute position.
    pub fn seek(&mut self, pos: usize) {
        assert!(pos <= self.buffer.len(), "BinStream::seek: position {} out of range", pos);
        self.front = pos;
    }

    /// Appends raw bytes at the tail.
    pub fn push_bytes(&mut self, src: &[u8]) {
        self.buffer.extend_from_slice(src);
    }

    /// Reads `sz` bytes from the head and advances it.
    pub fn pop_bytes(&mut self, sz: usize) -> &[u8] {
        assert!(
            self.size() >= sz,
            "BinStream::pop_bytes: {} bytes requested, {} remain",
            sz,
            self.size()
        );
        let start = self.front;
        self.front += sz;
        &self.buffer[start..self.front]
    }

    /// Appends the unread content of another stream.
    pub fn append(&mut self, other: &BinStream) {
        self.buffer.extend_from_slice(other.remaining());
    }

    /// The unread content as a slice.
    pub fn remaining(&self) -> &[u8] {
        &self.buffer[self.front..]
    }

    /// Consumes the stream, returning the unread content.
    pub fn into_vec(mut self) -> Vec<u8> {
        if self.front > 0 {
            self.buffer.drain(..self.front);
        }
        self.buffer
    }

    /// Serializes a value at the tail.
    pub fn push<T: Serialize + ?Sized>(&mut self, value: &T) {
        value.serialize(self);
    }

    /// Deserializes a value from the head.
    pub fn pop<T: Serialize>(&mut self) -> T {
        T::deserialize(self)
    }
}

impl std::fmt::Debug for BinStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinStream")
            .field("len", &self.buffer.len())
            .field("front", &self.front)
            .finish()
    }
}

impl From<Vec<u8>> for BinStream {
    fn from(buffer: Vec<u8>) -> Self {
        BinStream::from_vec(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip() {
        let mut bin = BinStream::new();
        bin.push_bytes(b"abcdef");
        assert_eq!(bin.size(), 6);
        assert_eq!(bin.pop_bytes(2), b"ab");
        assert_eq!(bin.pop_bytes(4), b"cdef");
        assert_eq!(bin.size(), 0);
    }

    #[test]
    #[should_panic(expected = "pop_bytes")]
    fn underflow_is_fatal() {
        let mut bin = BinStream::new();
        bin.push_bytes(b"ab");
        bin.pop_bytes(3);
    }

    #[test]
    fn seek_rewinds() {
        let mut bin = BinStream::new();
        bin.push(&7u32);
        assert_eq!(bin.pop::<u32>(), 7);
        bin.seek(0);
        assert_eq!(bin.pop::<u32>(), 7);
    }

    #[test]
    fn append_copies_unread_content_only() {
        let mut a = BinStream::new();
        a.push(&1u32);
        a.push(&2u32);
        let _ = a.pop::<u32>();

        let mut b = BinStream::new();
        b.push(&9u32);
        b.append(&a);
        assert_eq!(b.pop::<u32>(), 9);
        assert_eq!(b.pop::<u32>(), 2);
        assert!(b.is_empty());
    }

    #[test]
    fn clear_resets_head() {
        let mut bin = BinStream::new();
        bin.push(&3.5f64);
        bin.clear();
        assert_eq!(bin.size(), 0);
        bin.push(&1u8);
        assert_eq!(bin.pop::<u8>(), 1);
    }
}
