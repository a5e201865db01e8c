//! Bounded per-job output buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<5} {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.level,
            self.message
        )
    }
}

/// Ring buffer of timestamped lines. When full, the oldest line is evicted.
///
/// Writers and readers only hold the lock long enough to push one line or
/// copy the requested tail.
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<LogLine>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, line: impl Into<String>) {
        self.append_with_level(LogLevel::Info, line);
    }

    pub fn append_with_level(&self, level: LogLevel, line: impl Into<String>) {
        let entry = LogLine {
            timestamp: Utc::now(),
            level,
            message: line.into(),
        };
        let mut lines = self.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(entry);
    }

    /// Last `min(n, len)` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let lines = self.lock();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogLine>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn messages(lines: &[LogLine]) -> Vec<&str> {
        lines.iter().map(|l| l.message.as_str()).collect()
    }

    #[test]
    fn test_evicts_oldest_first() {
        let buffer = LogBuffer::new(3);
        for line in ["A", "B", "C", "D"] {
            buffer.append(line);
        }
        assert_eq!(messages(&buffer.tail(10)), vec!["B", "C", "D"]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_tail_returns_last_n_in_order() {
        let buffer = LogBuffer::new(10);
        for i in 1..=5 {
            buffer.append(format!("line {}", i));
        }
        assert_eq!(messages(&buffer.tail(2)), vec!["line 4", "line 5"]);
        assert!(buffer.tail(0).is_empty());
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = LogBuffer::default();
        assert!(buffer.is_empty());
        assert!(buffer.tail(100).is_empty());
        assert_eq!(buffer.capacity(), DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn test_levels_are_kept() {
        let buffer = LogBuffer::new(4);
        buffer.append_with_level(LogLevel::Error, "boom");
        let tail = buffer.tail(1);
        assert_eq!(tail[0].level, LogLevel::Error);
        assert!(tail[0].to_string().ends_with("ERROR boom"));
    }

    #[test]
    fn test_concurrent_writer_and_reader() {
        let buffer = Arc::new(LogBuffer::new(50));
        let writer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    buffer.append(format!("{}", i));
                }
            })
        };
        for _ in 0..100 {
            let tail = buffer.tail(50);
            let numbers: Vec<u32> = tail.iter().map(|l| l.message.parse().unwrap()).collect();
            assert!(numbers.windows(2).all(|w| w[0] + 1 == w[1]));
        }
        writer.join().unwrap();
        assert_eq!(buffer.tail(1)[0].message, "999");
        assert_eq!(buffer.len(), 50);
    }
}
