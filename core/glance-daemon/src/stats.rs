//! Daily tool-call and session counters with calendar-day rollover.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodayStats {
    pub tool_calls: u64,
    pub sessions_count: u64,
    pub last_reset: DateTime<Local>,
}

impl TodayStats {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            tool_calls: 0,
            sessions_count: 0,
            last_reset: now,
        }
    }

    pub fn increment_tool_calls(&mut self, now: DateTime<Local>) {
        self.reset_if_new_day(now);
        self.tool_calls += 1;
    }

    pub fn increment_sessions(&mut self, now: DateTime<Local>) {
        self.reset_if_new_day(now);
        self.sessions_count += 1;
    }

    /// Zeroes both counters when `now` falls on a different calendar day than
    /// the last reset. Returns whether a reset happened.
    pub fn reset_if_new_day(&mut self, now: DateTime<Local>) -> bool {
        if now.date_naive() == self.last_reset.date_naive() {
            return false;
        }
        self.tool_calls = 0;
        self.sessions_count = 0;
        self.last_reset = now;
        true
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tool_calls: self.tool_calls,
            sessions_count: self.sessions_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tool_calls: u64,
    pub sessions_count: u64,
}

/// Counters plus the process-lifetime set of keys already counted.
#[derive(Debug, Clone)]
pub struct StatsTracker {
    today: TodayStats,
    // Not cleared at midnight; only the counter rolls over.
    seen_sessions: HashSet<String>,
}

impl StatsTracker {
    pub fn new(today: TodayStats) -> Self {
        Self {
            today,
            seen_sessions: HashSet::new(),
        }
    }

    pub fn today(&self) -> &TodayStats {
        &self.today
    }

    pub fn record_tool_call(&mut self, now: DateTime<Local>) {
        self.today.increment_tool_calls(now);
    }

    /// Counts `key` once per process lifetime. Returns true when it was new.
    pub fn record_session(&mut self, key: &str, now: DateTime<Local>) -> bool {
        if self.seen_sessions.contains(key) {
            return false;
        }
        self.seen_sessions.insert(key.to_string());
        self.today.increment_sessions(now);
        true
    }
}
