//! Fixed-capacity circular byte store over caller-owned memory.
//!
//! [`RingBuffer`] sits between the byte link and the [`PacketParser`](crate::parser::PacketParser).
//! The I/O poll path writes into it, the parser reads from it. Neither side ever
//! blocks and the buffer never grows: bulk transfers return how many bytes actually
//! moved, bounded by the data available or the space free.
//!
//! ## Invariants
//!
//! - `0 <= len <= capacity`
//! - `head` and `tail` always lie in `[0, capacity)`
//! - bytes come out in exactly the order they went in
//!
//! Bulk operations copy in at most two contiguous segments: the run up to the end of
//! the backing slice, then the wrapped remainder from its start.

use embedded_io::{Read, ReadReady};

/// A single-producer/single-consumer circular byte buffer.
///
/// The backing memory is borrowed from the caller, so the buffer can live in
/// DMA-capable or external RAM chosen by the firmware.
///
/// ## Example
///
/// ```rust
/// use axislink::ring::RingBuffer;
///
/// let mut storage = [0u8; 8];
/// let mut ring = RingBuffer::new(&mut storage);
/// assert_eq!(ring.write_bytes(b"hello"), 5);
/// let mut out = [0u8; 3];
/// assert_eq!(ring.read_bytes(&mut out), 3);
/// assert_eq!(&out, b"hel");
/// assert_eq!(ring.len(), 2);
/// ```
#[derive(Debug)]
pub struct RingBuffer<'a> {
    buf: &'a mut [u8],
    head: usize,
    tail: usize,
    count: usize,
}

impl<'a> RingBuffer<'a> {
    /// Wraps `storage` as an empty ring buffer. Capacity is `storage.len()`.
    pub fn new(storage: &'a mut [u8]) -> Self {
        Self {
            buf: storage,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Total number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes currently stored.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Number of bytes that can be written before the buffer is full.
    pub fn free(&self) -> usize {
        self.capacity() - self.count
    }

    /// Returns `true` if no bytes are stored.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns `true` if no more bytes can be written.
    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Drops all stored bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    /// Appends one byte. Returns `false` (and stores nothing) if the buffer is full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.buf[self.head] = byte;
        self.head = (self.head + 1) % self.capacity();
        self.count += 1;
        true
    }

    /// Removes and returns the oldest byte.
    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % self.capacity();
        self.count -= 1;
        Some(byte)
    }

    /// Returns the byte `index` positions after the oldest one without removing it.
    pub fn peek(&self, index: usize) -> Option<u8> {
        if index >= self.count {
            return None;
        }
        Some(self.buf[(self.tail + index) % self.capacity()])
    }

    /// Moves up to `dest.len()` bytes out of the buffer.
    ///
    /// # Returns
    /// The number of bytes copied, `min(dest.len(), len())`.
    pub fn read_bytes(&mut self, dest: &mut [u8]) -> usize {
        let to_read = dest.len().min(self.count);
        if to_read == 0 {
            return 0;
        }
        let first = to_read.min(self.capacity() - self.tail);
        dest[..first].copy_from_slice(&self.buf[self.tail..self.tail + first]);
        let rest = to_read - first;
        if rest > 0 {
            dest[first..to_read].copy_from_slice(&self.buf[..rest]);
        }
        self.tail = (self.tail + to_read) % self.capacity();
        self.count -= to_read;
        to_read
    }

    /// Copies up to `src.len()` bytes into the buffer.
    ///
    /// A write larger than the free space is truncated; the excess is dropped.
    ///
    /// # Returns
    /// The number of bytes stored, `min(src.len(), free())`.
    pub fn write_bytes(&mut self, src: &[u8]) -> usize {
        let to_write = src.len().min(self.free());
        if to_write == 0 {
            return 0;
        }
        let first = to_write.min(self.capacity() - self.head);
        self.buf[self.head..self.head + first].copy_from_slice(&src[..first]);
        let rest = to_write - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&src[first..to_write]);
        }
        self.head = (self.head + to_write) % self.capacity();
        self.count += to_write;
        to_write
    }

    /// Pulls whatever `source` has ready straight into free space.
    ///
    /// Reads at most twice (front segment, then wrapped remainder) and stops early when
    /// the source reports nothing ready, returns a short read, or the buffer fills.
    /// Never blocks on a source that implements [`ReadReady`] honestly.
    ///
    /// # Returns
    /// The number of bytes stored, or the source's error.
    pub fn read_stream<S>(&mut self, source: &mut S) -> Result<usize, S::Error>
    where
        S: Read + ReadReady,
    {
        let mut total = 0;
        for _ in 0..2 {
            if self.is_full() || !source.read_ready()? {
                break;
            }
            let end = if self.head >= self.tail || self.is_empty() {
                self.capacity()
            } else {
                self.tail
            };
            let segment = &mut self.buf[self.head..end];
            let want = segment.len();
            let got = source.read(segment)?;
            self.head = (self.head + got) % self.capacity();
            self.count += got;
            total += got;
            if got < want {
                break;
            }
        }
        Ok(total)
    }

    /// Discards bytes up to and including the first `marker`.
    ///
    /// This is the resynchronization primitive used after a framing failure.
    ///
    /// # Returns
    /// - `true`: the marker was found and consumed; bytes after it are untouched
    /// - `false`: no marker was stored; the buffer is now empty
    pub fn consume_until(&mut self, marker: u8) -> bool {
        while let Some(byte) = self.pop() {
            if byte == marker {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSerial;

    #[test]
    fn test_push_pop_fifo_order() {
        let mut storage = [0u8; 4];
        let mut ring = RingBuffer::new(&mut storage);
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(ring.push(3));
        assert!(ring.push(4));
        assert!(!ring.push(5));
        assert!(ring.is_full());
        assert_eq!(ring.pop(), Some(1));
        assert!(ring.push(5));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
        assert_eq!(ring.pop(), Some(5));
        assert_eq!(ring.pop(), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_bulk_transfers_wrap_around() {
        let mut storage = [0u8; 8];
        let mut ring = RingBuffer::new(&mut storage);
        assert_eq!(ring.write_bytes(&[0, 1, 2, 3, 4, 5]), 6);
        let mut out = [0u8; 5];
        assert_eq!(ring.read_bytes(&mut out), 5);
        assert_eq!(out, [0, 1, 2, 3, 4]);

        // head sits at 6, so this write wraps
        assert_eq!(ring.write_bytes(&[6, 7, 8, 9, 10]), 5);
        assert_eq!(ring.len(), 6);
        assert_eq!(ring.peek(0), Some(5));
        assert_eq!(ring.peek(5), Some(10));
        assert_eq!(ring.peek(6), None);

        let mut out = [0u8; 8];
        assert_eq!(ring.read_bytes(&mut out), 6);
        assert_eq!(&out[..6], &[5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_write_truncates_when_full() {
        let mut storage = [0u8; 4];
        let mut ring = RingBuffer::new(&mut storage);
        assert_eq!(ring.write_bytes(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(ring.write_bytes(&[7]), 0);
        assert_eq!(ring.len(), 4);
        let mut out = [0u8; 2];
        assert_eq!(ring.read_bytes(&mut out), 2);
        assert_eq!(out, [1, 2]);
    }

    #[test]
    fn test_interleaved_operations_keep_count_and_order() {
        let mut storage = [0u8; 7];
        let mut ring = RingBuffer::new(&mut storage);
        let mut next_in: u8 = 0;
        let mut next_out: u8 = 0;

        for round in 0..200usize {
            let burst = [next_in, next_in.wrapping_add(1), next_in.wrapping_add(2)];
            let take = round % 4;
            let written = ring.write_bytes(&burst[..take.min(3)]);
            next_in = next_in.wrapping_add(written as u8);
            if ring.push(next_in) {
                next_in = next_in.wrapping_add(1);
            }
            assert!(ring.len() <= ring.capacity());

            let mut out = [0u8; 3];
            let n = ring.read_bytes(&mut out[..(round % 3) + 1]);
            for &b in &out[..n] {
                assert_eq!(b, next_out);
                next_out = next_out.wrapping_add(1);
            }
            if round % 5 == 0 {
                if let Some(b) = ring.pop() {
                    assert_eq!(b, next_out);
                    next_out = next_out.wrapping_add(1);
                }
            }
            assert!(ring.len() <= ring.capacity());
        }
    }

    #[test]
    fn test_consume_until_marker_found() {
        let mut storage = [0u8; 8];
        let mut ring = RingBuffer::new(&mut storage);
        let _ = ring.write_bytes(&[0xAA, 0xBB, 0x01, 0xCC, 0xDD]);
        assert!(ring.consume_until(0x01));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop(), Some(0xCC));
        assert_eq!(ring.pop(), Some(0xDD));
    }

    #[test]
    fn test_consume_until_marker_missing_empties_buffer() {
        let mut storage = [0u8; 8];
        let mut ring = RingBuffer::new(&mut storage);
        let _ = ring.write_bytes(&[0xAA, 0xBB, 0xCC]);
        assert!(!ring.consume_until(0x01));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_read_stream_bounded_by_free_space() {
        let mut storage = [0u8; 6];
        let mut ring = RingBuffer::new(&mut storage);
        let _ = ring.write_bytes(&[9, 9, 9, 9]);
        let mut out = [0u8; 3];
        let _ = ring.read_bytes(&mut out);

        // tail = 3, head = 4, one stored byte, five free across the wrap
        let mut serial = MockSerial::with_bytes(&[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(ring.read_stream(&mut serial), Ok(5));
        assert!(ring.is_full());
        assert_eq!(serial.rx, [6, 7]);

        let mut out = [0u8; 6];
        assert_eq!(ring.read_bytes(&mut out), 6);
        assert_eq!(out, [9, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_read_stream_stops_when_source_idle() {
        let mut storage = [0u8; 16];
        let mut ring = RingBuffer::new(&mut storage);
        let mut serial = MockSerial::with_bytes(&[1, 2, 3]);
        assert_eq!(ring.read_stream(&mut serial), Ok(3));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.read_stream(&mut serial), Ok(0));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_read_stream_partial_reads() {
        let mut storage = [0u8; 16];
        let mut ring = RingBuffer::new(&mut storage);
        let mut serial = MockSerial {
            max_read: 2,
            ..MockSerial::with_bytes(&[1, 2, 3, 4, 5])
        };
        assert_eq!(ring.read_stream(&mut serial), Ok(2));
        assert_eq!(ring.read_stream(&mut serial), Ok(2));
        assert_eq!(ring.read_stream(&mut serial), Ok(1));
        assert_eq!(ring.read_stream(&mut serial), Ok(0));

        let mut out = [0u8; 8];
        assert_eq!(ring.read_bytes(&mut out), 5);
        assert_eq!(&out[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_read_stream_ready_but_empty() {
        let mut storage = [0u8; 8];
        let mut ring = RingBuffer::new(&mut storage);
        let mut serial = MockSerial {
            ready_when_empty: true,
            ..MockSerial::default()
        };
        assert_eq!(ring.read_stream(&mut serial), Ok(0));
        assert!(ring.is_empty());

        serial.rx.extend([7, 8]);
        assert_eq!(ring.read_stream(&mut serial), Ok(2));
        assert_eq!(ring.pop(), Some(7));
    }

    #[test]
    fn test_read_stream_passes_source_error() {
        let mut storage = [0u8; 8];
        let mut ring = RingBuffer::new(&mut storage);
        let mut serial = MockSerial {
            fault: Some(embedded_io::ErrorKind::TimedOut),
            ..MockSerial::with_bytes(&[1])
        };
        assert_eq!(
            ring.read_stream(&mut serial),
            Err(embedded_io::ErrorKind::TimedOut)
        );
        assert!(ring.is_empty());
    }
}
