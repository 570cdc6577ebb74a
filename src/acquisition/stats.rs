//! Running statistics and change tracking for monitored values

use std::collections::VecDeque;

/// Lifetime aggregates of one monitored point
#[derive(Debug, Clone)]
pub struct RunningStats {
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags value movements larger than a fixed threshold
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    threshold: f64,
    previous: Option<f64>,
    changes: u64,
}

impl ChangeDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            previous: None,
            changes: 0,
        }
    }

    /// Record a value; true when it moved at least the threshold away from
    /// the previous one. The first value never counts as a change.
    pub fn observe(&mut self, value: f64) -> bool {
        let changed = match self.previous {
            Some(previous) => (value - previous).abs() >= self.threshold,
            None => false,
        };
        if changed {
            self.changes += 1;
        }
        self.previous = Some(value);
        changed
    }

    pub fn changes(&self) -> u64 {
        self.changes
    }
}

/// Bounded window of recent values, oldest dropped first
#[derive(Debug, Clone)]
pub struct History {
    capacity: usize,
    values: VecDeque<f64>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            values: VecDeque::new(),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Minimum, maximum and mean over the window
    pub fn window_stats(&self) -> Option<(f64, f64, f64)> {
        if self.values.is_empty() {
            return None;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &value in &self.values {
            min = min.min(value);
            max = max.max(value);
            sum += value;
        }
        Some((min, max, sum / self.values.len() as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::new();
        assert_eq!(stats.mean(), None);
        for value in [10.0, 12.0, 8.0] {
            stats.push(value);
        }
        assert_eq!(stats.count(), 3);
        assert_eq!(stats.min(), Some(8.0));
        assert_eq!(stats.max(), Some(12.0));
        assert_eq!(stats.mean(), Some(10.0));
    }

    #[test]
    fn test_change_detector_threshold() {
        let mut detector = ChangeDetector::new(1.0);
        assert!(!detector.observe(10.0)); // first value is the baseline
        assert!(!detector.observe(10.5));
        assert!(detector.observe(11.5)); // exactly the threshold counts
        assert!(detector.observe(20.0));
        assert_eq!(detector.changes(), 2);
    }

    #[test]
    fn test_history_drops_oldest() {
        let mut history = History::new(3);
        for value in [1.0, 2.0, 3.0, 4.0] {
            history.push(value);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.latest(), Some(4.0));
        assert_eq!(history.window_stats(), Some((2.0, 4.0, 3.0)));
    }
}
