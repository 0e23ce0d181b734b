//! Sliding-window append/consume buffer used for connection inbound/outbound I/O.
//!
//! Ported from `zest/net/tcp_buffer.h`'s `TcpBuffer`, generalized from a template over a
//! `std::string` backing store to a plain growable `Vec<u8>`.

/// A byte queue with O(1) `append` and O(1) `consume_front`.
///
/// The backing store never shrinks on its own; bytes already consumed from the front are
/// only reclaimed by shifting the remainder down to index `0`, which happens either when
/// the wasted prefix grows large relative to capacity, or right before an operation (like
/// [`view`](Self::view)) that needs contiguous storage starting at index `0`.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    start: usize,
}

impl ByteBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new(), start: 0 }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity), start: 0 }
    }

    /// Number of unconsumed bytes currently held.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len() - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Appends bytes to the back of the queue. Grows the backing store unboundedly;
    /// callers are responsible for backpressure.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Advances the start offset by `n`, discarding those bytes. Compacts the backing
    /// store down to index `0` once the wasted prefix reaches a third of capacity.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`size`](Self::size) — callers must check first, matching
    /// the original's assumption that the caller already knows how much data it
    /// consumed.
    pub fn consume_front(&mut self, n: usize) {
        assert!(n <= self.size(), "consume_front: n > size()");
        self.start += n;
        if self.start * 3 >= self.data.capacity() {
            self.compact();
        }
    }

    /// Returns a contiguous view of the unconsumed bytes, compacting first if necessary.
    pub fn view(&mut self) -> &[u8] {
        if self.start != 0 {
            self.compact();
        }
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }

    /// Swaps contents with `other`, including the start offset.
    pub fn swap(&mut self, other: &mut ByteBuffer) {
        std::mem::swap(&mut self.data, &mut other.data);
        std::mem::swap(&mut self.start, &mut other.start);
    }

    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.data.drain(0..self.start);
        self.start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::ByteBuffer;

    #[test]
    fn append_then_consume_round_trips_in_order() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.size(), 11);
        assert_eq!(buf.view(), b"hello world");
        buf.consume_front(6);
        assert_eq!(buf.view(), b"world");
        assert_eq!(buf.size(), 5);
    }

    #[test]
    fn consume_front_compacts_past_threshold() {
        let mut buf = ByteBuffer::with_capacity(30);
        buf.append(&[0u8; 30]);
        buf.consume_front(11); // start*3 = 33 >= capacity 30 -> compacts
        assert_eq!(buf.size(), 19);
        assert_eq!(buf.view().len(), 19);
    }

    #[test]
    fn swap_exchanges_contents() {
        let mut a = ByteBuffer::new();
        a.append(b"abc");
        let mut b = ByteBuffer::new();
        b.append(b"xyz");
        a.swap(&mut b);
        assert_eq!(a.view(), b"xyz");
        assert_eq!(b.view(), b"abc");
    }

    #[test]
    #[should_panic(expected = "consume_front: n > size()")]
    fn consume_front_panics_past_size() {
        let mut buf = ByteBuffer::new();
        buf.append(b"ab");
        buf.consume_front(3);
    }

    #[test]
    fn empty_buffer_reports_empty() {
        let buf = ByteBuffer::new();
        assert!(buf.is_empty());
    }
}
