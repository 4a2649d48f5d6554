use std::collections::VecDeque;

use crate::broadcast::log_broadcaster::LogEvent;

/// Most recent log events, oldest first. Pushing past capacity silently
/// drops the oldest event.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    capacity: usize,
    events: VecDeque<LogEvent>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: LogEvent) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Up to `n` most recent events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<LogEvent> {
        self.events.iter().cloned().collect()
    }
}
