//! Bounded in-memory log storage.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Level;

/// A captured log event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Event fields plus fields inherited from enclosing spans
    pub fields: BTreeMap<String, String>,
}

impl LogEntry {
    pub fn new(level: Level, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level_to_string(level),
            target: target.into(),
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Approximate heap size, used for the ring's byte cap
    pub fn size(&self) -> usize {
        self.level.len()
            + self.target.len()
            + self.message.len()
            + self
                .fields
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }

    /// Single-line rendering: `timestamp LEVEL target: message k=v ...`
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{} {:>5} {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level.to_uppercase(),
            self.target,
            self.message
        );
        for (key, value) in &self.fields {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        }
        line
    }
}

pub(crate) fn level_to_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace".to_string(),
        Level::DEBUG => "debug".to_string(),
        Level::INFO => "info".to_string(),
        Level::WARN => "warn".to_string(),
        Level::ERROR => "error".to_string(),
    }
}

#[derive(Debug, Default)]
struct RingState {
    entries: VecDeque<LogEntry>,
    bytes: usize,
}

/// Ring buffer capped by entry count and total size.
///
/// The oldest entries are evicted first. The newest entry is always kept,
/// even if it alone exceeds the byte cap.
#[derive(Debug)]
pub struct LogRing {
    max_entries: usize,
    max_bytes: usize,
    state: Mutex<RingState>,
}

impl LogRing {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_bytes,
            state: Mutex::new(RingState::default()),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.bytes += entry.size();
        state.entries.push_back(entry);

        while state.entries.len() > 1
            && (state.entries.len() > self.max_entries || state.bytes > self.max_bytes)
        {
            if let Some(evicted) = state.entries.pop_front() {
                state.bytes -= evicted.size();
            }
        }
    }

    /// Up to `n` most recent entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = state.entries.len().saturating_sub(n);
        state.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).bytes
    }
}
