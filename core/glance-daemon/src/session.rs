//! Session records and their time-derived display properties.

use chrono::{DateTime, Duration, Local};
use serde::Serialize;
use std::collections::VecDeque;

pub const HISTORY_CAPACITY: usize = 10;

// Activity windows per status (seconds since last update).
const COMPLETED_WINDOW_SECS: i64 = 5; // completed / error
const WAITING_WINDOW_SECS: i64 = 90;
const WORKING_WINDOW_SECS: i64 = 60; // reading / writing / thinking
const IDLE_WINDOW_SECS: i64 = 30;
const LONG_OPERATION_SECS: i64 = 30;
const FADE_START_MS: i64 = 3_000;
const REVEAL_DELAY_MS: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Reading,
    Thinking,
    Writing,
    Waiting,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            SessionStatus::Reading | SessionStatus::Writing | SessionStatus::Thinking
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "Idle",
            SessionStatus::Reading => "Reading",
            SessionStatus::Thinking => "Thinking",
            SessionStatus::Writing => "Writing",
            SessionStatus::Waiting => "Waiting",
            SessionStatus::Completed => "Done",
            SessionStatus::Error => "Error",
        }
    }

    fn activity_window(&self) -> Duration {
        match self {
            SessionStatus::Completed | SessionStatus::Error => {
                Duration::seconds(COMPLETED_WINDOW_SECS)
            }
            SessionStatus::Waiting => Duration::seconds(WAITING_WINDOW_SECS),
            SessionStatus::Reading | SessionStatus::Writing | SessionStatus::Thinking => {
                Duration::seconds(WORKING_WINDOW_SECS)
            }
            SessionStatus::Idle => Duration::seconds(IDLE_WINDOW_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolEvent {
    pub tool: String,
    pub target: String,
    pub outcome: ToolOutcome,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub key: String,
    pub terminal: String,
    pub project: String,
    pub cwd: String,
    pub status: SessionStatus,
    pub current_action: String,
    pub metadata: String,
    pub last_update: DateTime<Local>,
    pub tool_history: VecDeque<ToolEvent>,
    pub is_expanded: bool,
    pub opacity: f64,
    pub display_after: DateTime<Local>,
}

impl SessionRecord {
    /// A fresh record for an unseen key, hidden for a short reveal delay.
    pub fn new(key: &str, terminal: &str, project: &str, cwd: &str, now: DateTime<Local>) -> Self {
        Self {
            key: key.to_string(),
            terminal: terminal.to_string(),
            project: project.to_string(),
            cwd: cwd.to_string(),
            status: SessionStatus::Idle,
            current_action: String::new(),
            metadata: String::new(),
            last_update: now,
            tool_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            is_expanded: false,
            opacity: 1.0,
            display_after: now + Duration::milliseconds(REVEAL_DELAY_MS),
        }
    }

    pub fn push_history(&mut self, event: ToolEvent) {
        while self.tool_history.len() >= HISTORY_CAPACITY {
            self.tool_history.pop_front();
        }
        self.tool_history.push_back(event);
    }

    /// Advances `last_update`, never moving it backwards.
    pub fn touch(&mut self, now: DateTime<Local>) {
        if now > self.last_update {
            self.last_update = now;
        }
    }

    pub fn elapsed(&self, now: DateTime<Local>) -> Duration {
        now.signed_duration_since(self.last_update)
    }

    pub fn is_ready_to_display(&self, now: DateTime<Local>) -> bool {
        now >= self.display_after
    }

    pub fn is_active(&self, now: DateTime<Local>) -> bool {
        self.elapsed(now) < self.status.activity_window()
    }

    fn has_timed_out(&self, now: DateTime<Local>) -> bool {
        self.elapsed(now) > Duration::seconds(LONG_OPERATION_SECS) && !self.status.is_finished()
    }

    pub fn is_still_thinking(&self, now: DateTime<Local>) -> bool {
        self.has_timed_out(now) && self.status.is_working()
    }

    pub fn is_still_waiting(&self, now: DateTime<Local>) -> bool {
        self.has_timed_out(now) && self.status == SessionStatus::Waiting
    }

    pub fn waiting_seconds_remaining(&self, now: DateTime<Local>) -> Option<i64> {
        if self.status != SessionStatus::Waiting {
            return None;
        }
        let remaining = Duration::seconds(WAITING_WINDOW_SECS) - self.elapsed(now);
        Some(remaining.num_seconds().max(0))
    }

    /// Completed records hold full opacity, then fade out linearly so they
    /// reach zero exactly when their activity window closes.
    pub fn calculated_opacity(&self, now: DateTime<Local>) -> f64 {
        if self.status != SessionStatus::Completed {
            return 1.0;
        }
        let elapsed_ms = self.elapsed(now).num_milliseconds();
        let window_ms = COMPLETED_WINDOW_SECS * 1000;
        if elapsed_ms <= FADE_START_MS {
            return 1.0;
        }
        let remaining = (window_ms - elapsed_ms) as f64 / (window_ms - FADE_START_MS) as f64;
        remaining.clamp(0.0, 1.0)
    }

    /// Whether this record needs the once-per-second fade ticker: pending
    /// reveal, or still listed with a countdown, fade or elapsed-time hint.
    pub fn needs_animation(&self, now: DateTime<Local>) -> bool {
        if !self.is_ready_to_display(now) {
            return true;
        }
        self.is_active(now)
            && (self.status.is_finished()
                || self.is_still_thinking(now)
                || self.is_still_waiting(now))
    }

    pub fn short_id(&self) -> String {
        let prefix: String = self.key.chars().take(4).collect();
        format!("#{}", prefix)
    }

    pub fn snapshot(&self, now: DateTime<Local>) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key.clone(),
            short_id: self.short_id(),
            terminal: self.terminal.clone(),
            project: self.project.clone(),
            cwd: self.cwd.clone(),
            status: self.status,
            status_label: self.status.display_name(),
            current_action: self.current_action.clone(),
            metadata: self.metadata.clone(),
            last_update: self.last_update,
            tool_history: self.tool_history.iter().cloned().collect(),
            is_expanded: self.is_expanded,
            opacity: self.opacity,
            is_still_thinking: self.is_still_thinking(now),
            is_still_waiting: self.is_still_waiting(now),
            waiting_seconds_remaining: self.waiting_seconds_remaining(now),
        }
    }
}

/// Read-only view of a record handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub key: String,
    pub short_id: String,
    pub terminal: String,
    pub project: String,
    pub cwd: String,
    pub status: SessionStatus,
    pub status_label: &'static str,
    pub current_action: String,
    pub metadata: String,
    pub last_update: DateTime<Local>,
    pub tool_history: Vec<ToolEvent>,
    pub is_expanded: bool,
    pub opacity: f64,
    pub is_still_thinking: bool,
    pub is_still_waiting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_seconds_remaining: Option<i64>,
}
