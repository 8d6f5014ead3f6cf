//! Fixed-length history of integration points.

use std::ops::{Index, IndexMut};

/// Ring of past points, newest first.
///
/// Index 0 is the working slot (the point being probed or just accepted);
/// higher indices are progressively older accepted points.
#[derive(Debug, Clone)]
pub struct History<T> {
    points: Vec<T>,
}

impl<T: Clone> History<T> {
    /// Create a history of `length` copies of `value`.
    pub fn new(length: usize, value: T) -> Self {
        Self {
            points: vec![value; length.max(1)],
        }
    }

    /// Overwrite every slot with a copy of slot 0.
    pub fn replicate_current(&mut self) {
        let current = self.points[0].clone();
        for point in self.points.iter_mut().skip(1) {
            point.clone_from(&current);
        }
    }
}

impl<T> History<T> {
    /// Shift every point back by one; the oldest point becomes the new slot 0.
    pub fn cycle(&mut self) {
        self.points.rotate_right(1);
    }

    /// The working slot.
    pub fn current(&self) -> &T {
        &self.points[0]
    }

    /// The working slot, mutably.
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.points[0]
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; a history holds at least one slot.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.points.iter()
    }

    /// Iterate newest first, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.points.iter_mut()
    }
}

impl<T> Index<usize> for History<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.points[index]
    }
}

impl<T> IndexMut<usize> for History<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.points[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_shifts_by_one() {
        for length in 2..=6 {
            let mut history = History::new(length, 0usize);
            for (i, point) in history.iter_mut().enumerate() {
                *point = i * 10;
            }
            let before: Vec<usize> = history.iter().copied().collect();

            history.cycle();

            assert_eq!(history[1], before[0]);
            for i in 1..length {
                assert_eq!(history[i], before[i - 1]);
            }
            assert_eq!(history[0], before[length - 1]);
        }
    }

    #[test]
    fn test_replicate_current() {
        let mut history = History::new(4, vec![0.0]);
        history[0] = vec![1.5];
        history.replicate_current();
        assert!(history.iter().all(|p| p == &vec![1.5]));
    }
}
