//! Fixed-capacity byte ring buffer
//!
//! The exchange primitive between interrupt and application context.
//! One side pushes, the other pops; the owning driver masks its
//! peripheral's interrupt line around index updates, so the buffer itself
//! does no locking.

/// Byte rejected by a push onto a full buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Full(pub u8);

/// Ring buffer of `N` bytes
///
/// A push onto a full buffer is rejected; stored bytes are never
/// overwritten.
#[derive(Debug, Clone)]
pub struct RingBuffer<const N: usize> {
    buf: [u8; N],
    /// Next slot to pop
    head: usize,
    /// Next slot to push
    tail: usize,
    count: usize,
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<N> {
    const NON_ZERO: () = assert!(N > 0, "ring buffer capacity must be non-zero");

    /// Create an empty buffer
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NON_ZERO;
        Self {
            buf: [0; N],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Append a byte, rejecting it if the buffer is full
    pub fn push(&mut self, byte: u8) -> Result<(), Full> {
        if self.count == N {
            return Err(Full(byte));
        }
        self.buf[self.tail] = byte;
        self.tail = (self.tail + 1) % N;
        self.count += 1;
        Ok(())
    }

    /// Remove the oldest byte
    pub fn pop(&mut self) -> Option<u8> {
        if self.count == 0 {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % N;
        self.count -= 1;
        Some(byte)
    }

    /// Look at the oldest byte without removing it
    pub fn peek(&self) -> Option<u8> {
        if self.count == 0 {
            None
        } else {
            Some(self.buf[self.head])
        }
    }

    /// Push bytes until the buffer fills, returning how many were taken
    pub fn push_slice(&mut self, bytes: &[u8]) -> usize {
        let mut pushed = 0;
        for &byte in bytes {
            if self.push(byte).is_err() {
                break;
            }
            pushed += 1;
        }
        pushed
    }

    /// Pop into `out` until it is full or the buffer is empty
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let mut popped = 0;
        for slot in out.iter_mut() {
            match self.pop() {
                Some(byte) => *slot = byte,
                None => break,
            }
            popped += 1;
        }
        popped
    }

    /// Bytes stored
    pub fn available(&self) -> usize {
        self.count
    }

    /// Bytes that can still be pushed
    pub fn free_space(&self) -> usize {
        N - self.count
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == N
    }

    /// Discard all stored bytes
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[test]
    fn test_fifo_order() {
        let mut ring: RingBuffer<4> = RingBuffer::new();
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        ring.push(3).unwrap();

        assert_eq!(ring.peek(), Some(1));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_full_rejects_without_overwrite() {
        let mut ring: RingBuffer<2> = RingBuffer::new();
        ring.push(0xAA).unwrap();
        ring.push(0xBB).unwrap();

        assert!(ring.is_full());
        assert_eq!(ring.push(0xCC), Err(Full(0xCC)));
        assert_eq!(ring.pop(), Some(0xAA));
        assert_eq!(ring.pop(), Some(0xBB));
    }

    #[test]
    fn test_wraparound() {
        let mut ring: RingBuffer<3> = RingBuffer::new();
        for round in 0..10u8 {
            ring.push(round).unwrap();
            ring.push(round.wrapping_add(100)).unwrap();
            assert_eq!(ring.pop(), Some(round));
            assert_eq!(ring.pop(), Some(round.wrapping_add(100)));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_clear_empties() {
        let mut ring: RingBuffer<8> = RingBuffer::new();
        ring.push_slice(&[1, 2, 3]);
        ring.clear();

        assert_eq!(ring.pop(), None);
        assert_eq!(ring.free_space(), 8);
    }

    #[test]
    fn test_slice_helpers() {
        let mut ring: RingBuffer<4> = RingBuffer::new();
        assert_eq!(ring.push_slice(&[1, 2, 3, 4, 5, 6]), 4);

        let mut out = [0u8; 3];
        assert_eq!(ring.pop_into(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(ring.pop_into(&mut out), 1);
        assert_eq!(out[0], 4);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(u8),
        Pop,
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => any::<u8>().prop_map(Op::Push),
            3 => Just(Op::Pop),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn test_matches_queue_model(ops in proptest::collection::vec(op(), 0..200)) {
            let mut ring: RingBuffer<16> = RingBuffer::new();
            let mut model: VecDeque<u8> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Push(byte) => {
                        let accepted = ring.push(byte).is_ok();
                        prop_assert_eq!(accepted, model.len() < 16);
                        if accepted {
                            model.push_back(byte);
                        }
                    }
                    Op::Pop => prop_assert_eq!(ring.pop(), model.pop_front()),
                    Op::Clear => {
                        ring.clear();
                        model.clear();
                        prop_assert_eq!(ring.pop(), None);
                    }
                }
                prop_assert_eq!(ring.available() + ring.free_space(), 16);
                prop_assert_eq!(ring.available(), model.len());
            }
        }
    }
}
