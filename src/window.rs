use std::collections::VecDeque;

use crate::stats::percentile_sorted;

/// Trailing window of the last `capacity` z-scores.
///
/// Keeps arrival order for eviction and a sorted copy so percentiles are read
/// without re-sorting on every step. Non-finite values are rejected.
#[derive(Debug, Clone)]
pub struct ZScoreWindow {
    capacity: usize,
    values: VecDeque<f64>,
    sorted: Vec<f64>,
    observed: u64,
}

impl ZScoreWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
            sorted: Vec::with_capacity(capacity),
            observed: 0,
        }
    }

    /// Appends `z`, evicting the oldest value once full. Returns false (and
    /// leaves the window untouched) for NaN or infinite input.
    pub fn push(&mut self, z: f64) -> bool {
        if !z.is_finite() {
            return false;
        }
        if self.values.len() >= self.capacity {
            if let Some(oldest) = self.values.pop_front() {
                if let Ok(idx) = self.sorted.binary_search_by(|v| v.total_cmp(&oldest)) {
                    self.sorted.remove(idx);
                }
            }
        }
        self.values.push_back(z);
        let idx = self
            .sorted
            .binary_search_by(|v| v.total_cmp(&z))
            .unwrap_or_else(|i| i);
        self.sorted.insert(idx, z);
        self.observed += 1;
        true
    }

    /// True once `capacity` observations have been accepted.
    pub fn is_ready(&self) -> bool {
        self.values.len() >= self.capacity
    }

    pub fn percentile(&self, pct: f64) -> Option<f64> {
        percentile_sorted(&self.sorted, pct)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total accepted observations since construction, including evicted ones.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_and_keeps_sorted_copy() {
        let mut w = ZScoreWindow::new(3);
        for z in [0.5, -1.0, 2.0, 1.0] {
            assert!(w.push(z));
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.observed(), 4);
        assert_eq!(w.sorted, vec![-1.0, 1.0, 2.0]);
        assert_eq!(w.percentile(50.0), Some(1.0));
        assert_eq!(w.latest(), Some(1.0));
    }

    #[test]
    fn duplicate_values_evict_one_copy() {
        let mut w = ZScoreWindow::new(2);
        w.push(1.0);
        w.push(1.0);
        w.push(3.0);
        assert_eq!(w.sorted, vec![1.0, 3.0]);
    }

    #[test]
    fn rejects_non_finite_values() {
        let mut w = ZScoreWindow::new(2);
        assert!(!w.push(f64::NAN));
        assert!(!w.push(f64::INFINITY));
        assert!(w.is_empty());
        assert!(!w.is_ready());
        w.push(0.0);
        w.push(1.0);
        assert!(w.is_ready());
    }

    #[test]
    fn matches_full_sort_over_a_long_run() {
        let mut w = ZScoreWindow::new(5);
        let mut all = Vec::new();
        for i in 0..40 {
            let z = ((i * 37) % 11) as f64 - 5.0;
            w.push(z);
            all.push(z);
            let mut tail: Vec<f64> = all.iter().rev().take(5).copied().collect();
            tail.sort_by(|a, b| a.total_cmp(b));
            assert_eq!(w.sorted, tail);
        }
    }
}
