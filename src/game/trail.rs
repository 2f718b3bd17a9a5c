//! Fixed-capacity ring buffer of trail samples

use super::constants::TRAIL_CAPACITY;

/// Outcome of a single push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Sample stored in a free slot
    Appended { slot: usize, logical: usize },
    /// Buffer was full; the oldest sample was overwritten
    Overwrote { slot: usize },
}

/// Circular history of a competitor's past positions.
///
/// Logical index `i` (0 = oldest live sample) lives in physical slot
/// `(start + i) % capacity`. `sent` counts the oldest samples that have
/// already been transmitted and is always `<= len`.
#[derive(Debug, Clone)]
pub struct TrailStore {
    xs: Vec<f32>,
    ys: Vec<f32>,
    start: usize,
    len: usize,
    sent: usize,
}

impl TrailStore {
    pub fn new() -> Self {
        Self::with_capacity(TRAIL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            xs: vec![0.0; capacity],
            ys: vec![0.0; capacity],
            start: 0,
            len: 0,
            sent: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.xs.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Append a sample, evicting the oldest one when full
    pub fn push(&mut self, x: f32, y: f32) -> PushOutcome {
        let capacity = self.capacity();
        if self.len < capacity {
            let slot = (self.start + self.len) % capacity;
            self.xs[slot] = x;
            self.ys[slot] = y;
            let logical = self.len;
            self.len += 1;
            PushOutcome::Appended { slot, logical }
        } else {
            let slot = self.start;
            self.xs[slot] = x;
            self.ys[slot] = y;
            self.start = (self.start + 1) % capacity;
            self.sent = self.sent.saturating_sub(1);
            PushOutcome::Overwrote { slot }
        }
    }

    pub fn reset(&mut self) {
        self.start = 0;
        self.len = 0;
        self.sent = 0;
    }

    /// Physical slot of a logical index
    pub fn slot_of(&self, logical: usize) -> usize {
        (self.start + logical) % self.capacity()
    }

    /// Sample at a logical index
    pub fn get(&self, logical: usize) -> Option<(f32, f32)> {
        if logical >= self.len {
            return None;
        }
        Some(self.at_slot(self.slot_of(logical)))
    }

    /// Sample stored in a physical slot
    pub fn at_slot(&self, slot: usize) -> (f32, f32) {
        (self.xs[slot], self.ys[slot])
    }

    pub fn newest(&self) -> Option<(f32, f32)> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Samples in logical order from `from` (inclusive) to the newest one
    pub fn iter_from(&self, from: usize) -> impl Iterator<Item = (f32, f32)> + '_ {
        (from.min(self.len)..self.len).map(move |i| self.at_slot(self.slot_of(i)))
    }

    /// `(slot, logical, x, y)` for every live sample, oldest first
    pub fn indexed(&self) -> impl Iterator<Item = (usize, usize, f32, f32)> + '_ {
        (0..self.len).map(move |i| {
            let slot = self.slot_of(i);
            (slot, i, self.xs[slot], self.ys[slot])
        })
    }

    /// Samples not yet transmitted
    pub fn unsent(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.iter_from(self.sent)
    }

    /// Record that every live sample has been transmitted
    pub fn mark_sent(&mut self) {
        self.sent = self.len;
    }
}

impl Default for TrailStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_push_until_full_keeps_order() {
        let mut trail = TrailStore::with_capacity(4);
        for i in 0..4 {
            trail.push(i as f32, 0.0);
        }
        assert_eq!(trail.len(), 4);
        assert_eq!(trail.start(), 0);
        assert_eq!(trail.get(0), Some((0.0, 0.0)));
        assert_eq!(trail.newest(), Some((3.0, 0.0)));
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let capacity = rng.gen_range(1..64);
            let pushes = capacity + rng.gen_range(1..200);
            let mut trail = TrailStore::with_capacity(capacity);
            for i in 0..pushes {
                trail.push(i as f32, -(i as f32));
                assert!(trail.len() <= capacity);
            }
            let oldest = (pushes - capacity) as f32;
            assert_eq!(trail.len(), capacity);
            assert_eq!(trail.get(0), Some((oldest, -oldest)));
            assert_eq!(trail.newest(), Some(((pushes - 1) as f32, -((pushes - 1) as f32))));
        }
    }

    #[test]
    fn test_wraparound_decrements_sent() {
        let mut trail = TrailStore::with_capacity(3);
        trail.push(0.0, 0.0);
        trail.push(1.0, 0.0);
        trail.push(2.0, 0.0);
        trail.mark_sent();
        assert_eq!(trail.sent(), 3);

        assert_eq!(trail.push(3.0, 0.0), PushOutcome::Overwrote { slot: 0 });
        assert_eq!(trail.sent(), 2);
        assert_eq!(trail.unsent().collect::<Vec<_>>(), vec![(3.0, 0.0)]);

        trail.push(4.0, 0.0);
        trail.push(5.0, 0.0);
        trail.push(6.0, 0.0);
        assert_eq!(trail.sent(), 0);
        assert_eq!(trail.unsent().count(), 3);
    }

    #[test]
    fn test_reset() {
        let mut trail = TrailStore::with_capacity(2);
        trail.push(1.0, 1.0);
        trail.push(2.0, 2.0);
        trail.push(3.0, 3.0);
        trail.mark_sent();
        trail.reset();
        assert!(trail.is_empty());
        assert_eq!(trail.start(), 0);
        assert_eq!(trail.sent(), 0);
        assert_eq!(trail.newest(), None);
    }
}
