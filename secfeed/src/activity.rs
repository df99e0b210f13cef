//! Bounded in-memory log of notable pipeline events for operators.
//!
//! Newest entries sit at the front; once full, the oldest entry is dropped.
//! Nothing here survives a restart.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityCategory {
    Fetch,
    Summarise,
    Retry,
    System,
}

impl fmt::Display for ActivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityCategory::Fetch => "fetch",
            ActivityCategory::Summarise => "summarise",
            ActivityCategory::Retry => "retry",
            ActivityCategory::System => "system",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ActivityLevel,
    pub category: ActivityCategory,
    pub message: String,
}

impl ActivityEntry {
    /// `HH:MM:SS` in UTC, as shown in the console feed.
    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

#[derive(Debug)]
pub struct ActivityLog {
    capacity: usize,
    entries: Mutex<VecDeque<ActivityEntry>>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, level: ActivityLevel, category: ActivityCategory, message: impl Into<String>) {
        let entry = ActivityEntry {
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
        };

        // A poisoned lock only means another recorder panicked mid-push; the deque is still valid.
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_back();
        }
        entries.push_front(entry);
    }

    pub fn info(&self, category: ActivityCategory, message: impl Into<String>) {
        self.record(ActivityLevel::Info, category, message);
    }

    pub fn success(&self, category: ActivityCategory, message: impl Into<String>) {
        self.record(ActivityLevel::Success, category, message);
    }

    pub fn warn(&self, category: ActivityCategory, message: impl Into<String>) {
        self.record(ActivityLevel::Warn, category, message);
    }

    pub fn error(&self, category: ActivityCategory, message: impl Into<String>) {
        self.record(ActivityLevel::Error, category, message);
    }

    /// Up to `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<ActivityEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_entry_comes_first() {
        let log = ActivityLog::default();
        log.info(ActivityCategory::Fetch, "first");
        log.error(ActivityCategory::Summarise, "second");

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[0].level, ActivityLevel::Error);
        assert_eq!(recent[1].message, "first");
    }

    #[test]
    fn oldest_entries_are_dropped_at_capacity() {
        let log = ActivityLog::new(3);
        for i in 0..5 {
            log.info(ActivityCategory::System, format!("event {i}"));
        }

        assert_eq!(log.len(), 3);
        let messages: Vec<_> = log.recent(10).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["event 4", "event 3", "event 2"]);
    }

    #[test]
    fn default_capacity_is_200() {
        let log = ActivityLog::default();
        for i in 0..250 {
            log.warn(ActivityCategory::Retry, i.to_string());
        }
        assert_eq!(log.len(), DEFAULT_CAPACITY);
        assert_eq!(log.recent(1)[0].message, "249");
    }

    #[test]
    fn recent_limits_count() {
        let log = ActivityLog::default();
        assert!(log.is_empty());
        for _ in 0..10 {
            log.success(ActivityCategory::Fetch, "ok");
        }
        assert_eq!(log.recent(4).len(), 4);
    }

    #[test]
    fn time_label_is_hh_mm_ss() {
        let log = ActivityLog::default();
        log.info(ActivityCategory::System, "tick");
        let label = log.recent(1)[0].time_label();
        assert_eq!(label.len(), 8);
        assert_eq!(label.matches(':').count(), 2);
    }
}
