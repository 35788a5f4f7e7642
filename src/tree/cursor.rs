//! "Current stage" pointer of a detail view.

use serde::{Deserialize, Serialize};

/// Index into a project's stage list that stays valid across removals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCursor {
    index: usize,
}

impl StageCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Move to `index`, clamped to a list of `len` stages.
    pub fn set(&mut self, index: usize, len: usize) {
        self.index = index.min(len.saturating_sub(1));
    }

    pub fn next(&mut self, len: usize) {
        self.set(self.index + 1, len);
    }

    pub fn prev(&mut self) {
        self.index = self.index.saturating_sub(1);
    }

    /// Clamp to `max(0, len - 1)`. Returns `(from, to)` when the index moved.
    pub fn clamp(&mut self, len: usize) -> Option<(usize, usize)> {
        let from = self.index;
        self.set(from, len);
        (from != self.index).then_some((from, self.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_after_removing_last_stage() {
        let mut cursor = StageCursor::new();
        cursor.set(2, 3);
        assert_eq!(cursor.clamp(2), Some((2, 1)));
        assert_eq!(cursor.index(), 1);
        assert_eq!(cursor.clamp(2), None);
    }

    #[test]
    fn test_clamp_to_zero_when_empty() {
        let mut cursor = StageCursor::new();
        cursor.set(0, 1);
        assert_eq!(cursor.clamp(0), None);
        assert_eq!(cursor.index(), 0);

        cursor.set(4, 5);
        assert_eq!(cursor.clamp(0), Some((4, 0)));
    }

    #[test]
    fn test_navigation_stays_in_range() {
        let mut cursor = StageCursor::new();
        cursor.prev();
        assert_eq!(cursor.index(), 0);
        cursor.next(2);
        cursor.next(2);
        assert_eq!(cursor.index(), 1);
        cursor.set(10, 3);
        assert_eq!(cursor.index(), 2);
    }
}
