use std::collections::VecDeque;

use super::line::LogLine;

/// Bounded FIFO of [`LogLine`]s.
///
/// Appending at capacity evicts the oldest line. The ring itself is not
/// synchronized; [`LogHub`](crate::LogHub) guards each one with its topic lock.
#[derive(Debug, Clone)]
pub struct LogRing {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl LogRing {
    /// Creates an empty ring holding at most `capacity` lines (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends a line, evicting the oldest one at capacity.
    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Up to the `n` most recent lines, oldest first.
    pub fn snapshot(&self, n: usize) -> Vec<LogLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(crate::Config::default().log_capacity)
    }
}
