use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

/// Hard cap on retained lines per tab
pub const MAX_LOG_LINES: usize = 10_000;

/// Thread-safe ring buffer for log lines.
///
/// One writer (the stream listener) appends while the search/render path
/// reads concurrently. Cloning shares the underlying storage.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<RwLock<Inner>>,

    /// Maximum capacity
    capacity: usize,
}

struct Inner {
    lines: VecDeque<String>,

    /// Lines ever appended over the buffer's lifetime; unaffected by
    /// eviction or clear. Consumers tracking their read position use this
    /// instead of the bounded length.
    appended: usize,
}

impl LogBuffer {
    /// Create a buffer with the default capacity of [`MAX_LOG_LINES`]
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOG_LINES)
    }

    /// Create a buffer with an explicit capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                lines: VecDeque::with_capacity(capacity),
                appended: 0,
            })),
            capacity,
        }
    }

    /// Append a line, evicting the oldest if at capacity.
    ///
    /// Never blocks on capacity and has no error path.
    pub fn append(&self, line: impl Into<String>) {
        let mut inner = self.inner.write();
        if inner.lines.len() >= self.capacity {
            inner.lines.pop_front();
        }
        inner.lines.push_back(line.into());
        inner.appended += 1;
    }

    /// Current line sequence as a value independent of future mutation
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.read().lines.iter().cloned().collect()
    }

    /// Current lines plus the lifetime appended count, read atomically
    pub fn snapshot_with_appended(&self) -> (Vec<String>, usize) {
        let inner = self.inner.read();
        (inner.lines.iter().cloned().collect(), inner.appended)
    }

    /// Empty the buffer, keeping its capacity and appended count
    pub fn clear(&self) {
        self.inner.write().lines.clear();
    }

    /// Total line count
    pub fn len(&self) -> usize {
        self.inner.read().lines.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().lines.is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
