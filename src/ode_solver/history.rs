//! Ring of recently accepted states.

use std::collections::VecDeque;

use crate::scalar::Float;

/// Fixed-capacity ring of the last accepted `(t, x)` pairs, newest first.
///
/// Index 0 is `x_n`, index 1 is `x_{n-1}` and so on. Pushing past the
/// capacity recycles the oldest slot's buffer, so steady-state stepping does
/// not allocate.
pub(crate) struct HistoryRing {
    entries: VecDeque<(Float, Vec<Float>)>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, t: Float, x: &[Float]) {
        let mut buf = if self.entries.len() == self.capacity {
            self.entries.pop_back().unwrap().1
        } else {
            Vec::with_capacity(x.len())
        };
        buf.clear();
        buf.extend_from_slice(x);
        self.entries.push_front((t, buf));
    }

    /// Timestamp of the `i`-th most recent state (0 = newest).
    pub fn time(&self, i: usize) -> Float {
        self.entries[i].0
    }

    /// The `i`-th most recent state (0 = newest).
    pub fn state(&self, i: usize) -> &[Float] {
        &self.entries[i].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_orders_newest_first() {
        let mut h = HistoryRing::new(3);
        h.push(0.0, &[0.0]);
        h.push(1.0, &[10.0]);
        h.push(2.0, &[20.0]);
        assert_eq!(h.len(), 3);
        assert_eq!(h.time(0), 2.0);
        assert_eq!(h.state(2), &[0.0]);
    }

    #[test]
    fn test_ring_discards_oldest_at_capacity() {
        let mut h = HistoryRing::new(2);
        for i in 0..5 {
            h.push(i as Float, &[i as Float]);
        }
        assert_eq!(h.len(), 2);
        assert_eq!(h.time(0), 4.0);
        assert_eq!(h.time(1), 3.0);
    }
}
