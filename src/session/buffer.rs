use std::collections::VecDeque;

use crate::types::LogLine;

pub const DEFAULT_CAPACITY: usize = 500;

/// Bounded, ordered log retention. Oldest lines are evicted first.
#[derive(Clone, Debug)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    cap: usize,
}

impl LogBuffer {
    /// A zero capacity is bumped to one line.
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            lines: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Replace everything with `lines`, keeping the most recent `cap`.
    pub fn replace(&mut self, lines: Vec<LogLine>) {
        self.lines.clear();
        let skip = lines.len().saturating_sub(self.cap);
        self.lines.extend(lines.into_iter().skip(skip));
    }

    pub fn append(&mut self, line: LogLine) {
        while self.lines.len() >= self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn to_vec(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
