//! Sliding windows over frame-index space
//!
//! The transport never stores frames in hash maps or growable queues: both
//! endpoints work on fixed-capacity rings addressed by the absolute frame
//! index, with the live range `[range_begin, range_end)` advancing only
//! forward. Evicting a slot is irrevocable.

use crate::frame::MediaFrame;
use thiserror::Error;

/// Frame store errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("cannot pop {requested} frames, only {available} held contiguously")]
    PopBeyondContiguous { requested: u32, available: u32 },
}

/// Fixed-capacity ring indexed by absolute position.
///
/// Indices in `[range_begin, range_end)` are live; each maps to one slot
/// that may or may not hold a value. `pop(n)` slides the window forward by
/// discarding the oldest `n` slots. Accessing an index outside the live
/// range is a caller bug and panics.
pub struct SlidingWindow<T> {
    slots: Vec<Option<T>>,
    range_begin: u32,
}

impl<T> SlidingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        SlidingWindow {
            slots,
            range_begin: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn range_begin(&self) -> u32 {
        self.range_begin
    }

    pub fn range_end(&self) -> u32 {
        self.range_begin + self.slots.len() as u32
    }

    pub fn contains(&self, index: u32) -> bool {
        index >= self.range_begin && index < self.range_end()
    }

    #[inline]
    fn slot(&self, index: u32) -> usize {
        assert!(
            self.contains(index),
            "index {} outside window [{}, {})",
            index,
            self.range_begin,
            self.range_end()
        );
        index as usize % self.slots.len()
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.slots[self.slot(index)].as_ref()
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        let slot = self.slot(index);
        self.slots[slot].as_mut()
    }

    pub fn set(&mut self, index: u32, value: T) {
        let slot = self.slot(index);
        self.slots[slot] = Some(value);
    }

    pub fn take(&mut self, index: u32) -> Option<T> {
        let slot = self.slot(index);
        self.slots[slot].take()
    }

    /// Discard the oldest `num` slots, sliding the window forward.
    pub fn pop(&mut self, num: u32) {
        for index in self.range_begin..self.range_begin + num {
            let slot = index as usize % self.slots.len();
            self.slots[slot] = None;
        }
        self.range_begin += num;
    }
}

/// Outcome of a frame-store insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The frame was stored.
    Stored,
    /// A value already existed at this index; first arrival wins.
    Redundant,
}

/// Sliding window of received frames plus the delivery pointers.
///
/// `next_frame_needed` is the first index not yet received; it advances
/// only over contiguously held values and never skips a gap. `frontier` is
/// the highest index the peer claims to have transmitted plus one; it may
/// run ahead of what has actually arrived and never decreases.
pub struct FrameStore<F> {
    window: SlidingWindow<F>,
    next_frame_needed: u32,
    frontier: u32,
    dropped: u64,
    redundant: u64,
    popped: u64,
}

impl<F: MediaFrame> FrameStore<F> {
    pub fn new(capacity: usize) -> Self {
        FrameStore {
            window: SlidingWindow::new(capacity),
            next_frame_needed: 0,
            frontier: 0,
            dropped: 0,
            redundant: 0,
            popped: 0,
        }
    }

    pub fn range_begin(&self) -> u32 {
        self.window.range_begin()
    }

    pub fn range_end(&self) -> u32 {
        self.window.range_end()
    }

    pub fn next_frame_needed(&self) -> u32 {
        self.next_frame_needed
    }

    /// Highest frame index the peer has ever transmitted, plus one.
    pub fn frontier(&self) -> u32 {
        self.frontier
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn redundant(&self) -> u64 {
        self.redundant
    }

    pub fn popped(&self) -> u64 {
        self.popped
    }

    /// Number of frames held contiguously from the start of the window.
    pub fn contiguous_count(&self) -> u32 {
        self.next_frame_needed - self.window.range_begin()
    }

    /// Value at `index`, or `None` if within the window but unfilled.
    ///
    /// # Panics
    /// Panics if `index` is outside the live window.
    pub fn at(&self, index: u32) -> Option<&F> {
        self.window.get(index)
    }

    /// Whether `index` is in the live window and holds a value.
    pub fn has(&self, index: u32) -> bool {
        self.window.contains(index) && self.window.get(index).is_some()
    }

    /// Record that the peer has transmitted everything before `index_end`.
    pub fn raise_frontier(&mut self, index_end: u32) {
        self.frontier = self.frontier.max(index_end);
    }

    /// Insert a frame, evicting the oldest slots if `index` lies beyond the
    /// current window. First arrival wins: an occupied slot is left alone.
    pub fn insert(&mut self, index: u32, frame: F) -> InsertOutcome {
        if index >= self.window.range_end() {
            let num_to_drop = index - self.window.range_end() + 1;
            self.window.pop(num_to_drop);
            self.dropped += u64::from(num_to_drop);
            if self.next_frame_needed < self.window.range_begin() {
                self.next_frame_needed = self.window.range_begin();
            }
        }

        if self.window.get(index).is_some() {
            self.redundant += 1;
            return InsertOutcome::Redundant;
        }

        self.window.set(index, frame);
        InsertOutcome::Stored
    }

    /// Advance `next_frame_needed` over contiguously held values.
    pub fn advance_next_frame_needed(&mut self) {
        while self.next_frame_needed < self.window.range_end()
            && self.window.get(self.next_frame_needed).is_some()
        {
            self.next_frame_needed += 1;
        }
    }

    /// Release the oldest `num` frames after the cursor has consumed them.
    pub fn pop_through(&mut self, num: u32) -> Result<(), StoreError> {
        let available = self.contiguous_count();
        if num > available {
            return Err(StoreError::PopBeyondContiguous {
                requested: num,
                available,
            });
        }

        self.window.pop(num);
        self.popped += u64::from(num);
        Ok(())
    }
}
