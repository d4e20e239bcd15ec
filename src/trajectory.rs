//! Row table for uploaded trajectories.
//!
//! The table lives in caller-owned memory (typically a large external RAM region) and
//! is filled by the [`Dispatcher`](crate::dispatch::Dispatcher) straight from the
//! packet stream. Rows are read back field by field as [`MoveCommand`]s.
//!
//! The storage is split into two banks. Playback reads the active bank while an upload
//! streams into the other one, and [`TrajectoryBuffer::commit`] swaps them. A corrupt
//! or truncated upload therefore never touches the rows being played.

use crate::consts::ROW_SIZE;
use crate::message::MoveCommand;

/// Rows of one `f32` target per axis, stored little-endian in a borrowed byte slice.
///
/// Bulk writes land in the staging bank and only become visible through
/// [`commit`](Self::commit), so a half-received or corrupt upload changes neither
/// [`len`](Self::len) nor any committed row.
#[derive(Debug)]
pub struct TrajectoryBuffer<'a> {
    storage: &'a mut [u8],
    active: usize,
    rows: usize,
}

impl<'a> TrajectoryBuffer<'a> {
    /// Wraps `storage`, half of which holds the committed rows and half the next
    /// upload. Trailing bytes that do not fill a whole row in each half are unused.
    pub fn new(storage: &'a mut [u8]) -> Self {
        Self {
            storage,
            active: 0,
            rows: 0,
        }
    }

    /// Maximum number of rows one upload holds.
    pub fn capacity_rows(&self) -> usize {
        self.storage.len() / 2 / ROW_SIZE
    }

    fn bank_len(&self) -> usize {
        self.capacity_rows() * ROW_SIZE
    }

    /// Number of committed rows.
    pub fn len(&self) -> usize {
        self.rows
    }

    /// `true` if no rows are committed.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Whether an upload of `payload_len` bytes fits.
    pub fn fits(&self, payload_len: usize) -> bool {
        payload_len / ROW_SIZE <= self.capacity_rows()
    }

    /// Copies `chunk` into the staging bank at byte `offset`, clipped to whole-row
    /// capacity.
    ///
    /// # Returns
    /// Bytes actually stored.
    pub fn write_at(&mut self, offset: usize, chunk: &[u8]) -> usize {
        let limit = self.bank_len();
        if offset >= limit {
            return 0;
        }
        let n = chunk.len().min(limit - offset);
        let base = (1 - self.active) * limit + offset;
        self.storage[base..base + n].copy_from_slice(&chunk[..n]);
        n
    }

    /// Makes the staging bank active with `rows` rows, clamped to capacity. The
    /// previous rows become the next staging area.
    pub fn commit(&mut self, rows: usize) {
        self.active = 1 - self.active;
        self.rows = rows.min(self.capacity_rows());
    }

    /// Forgets every row.
    pub fn clear(&mut self) {
        self.rows = 0;
    }

    /// Row `index`, if committed.
    pub fn row(&self, index: usize) -> Option<MoveCommand> {
        if index >= self.rows {
            return None;
        }
        let start = self.active * self.bank_len() + index * ROW_SIZE;
        MoveCommand::decode(&self.storage[start..start + ROW_SIZE])
    }

    /// Row `index % len()`, so playback can loop.
    pub fn row_wrapping(&self, index: usize) -> Option<MoveCommand> {
        if self.rows == 0 {
            return None;
        }
        self.row(index % self.rows)
    }
}

/// Cursor stepping through a [`TrajectoryBuffer`] during playback.
///
/// `feed_divider` ticks pass between rows; `1` emits a row every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Playback {
    index: usize,
    feed_divider: u32,
    countdown: u32,
}

impl Playback {
    /// Starts at row 0.
    pub fn new(feed_divider: u32) -> Self {
        let feed_divider = feed_divider.max(1);
        Self {
            index: 0,
            feed_divider,
            countdown: 0,
        }
    }

    /// Index of the next row to emit.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Goes back to row 0.
    pub fn rewind(&mut self) {
        self.index = 0;
        self.countdown = 0;
    }

    /// Advances one tick and returns the row due on it, if any.
    pub fn tick(&mut self, trajectory: &TrajectoryBuffer<'_>) -> Option<MoveCommand> {
        if trajectory.is_empty() {
            return None;
        }
        if self.countdown > 0 {
            self.countdown -= 1;
            return None;
        }
        self.countdown = self.feed_divider - 1;
        let row = trajectory.row_wrapping(self.index);
        self.index = (self.index + 1) % trajectory.len();
        row
    }
}
