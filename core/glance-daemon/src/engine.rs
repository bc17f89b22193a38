//! Session lifecycle engine.
//!
//! Owns the session map and today's stats. Every public operation takes the
//! current time explicitly and recomputes the active list before returning,
//! so callers (the runtime thread, tests) never observe a stale view.

use chrono::{DateTime, Duration, Local};
use glance_protocol::{EventKind, HookMessage};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::observer::{AlertKind, EngineSnapshot};
use crate::session::{SessionRecord, SessionSnapshot, SessionStatus, ToolEvent, ToolOutcome};
use crate::stats::{StatsTracker, TodayStats};
use crate::tools::{action_label, metadata_label, status_for_tool};

const SILENT_PERIOD_SECS: i64 = 10;
const SPECULATIVE_WAITING_MS: i64 = 1_000;

// Sweep thresholds (seconds of inactivity).
const FINISHED_EXPIRY_SECS: i64 = 5; // completed / error → removed
const WORKING_EXPIRY_SECS: i64 = 60; // reading / writing / thinking → completed
const WAITING_EXPIRY_SECS: i64 = 90; // waiting → removed
const IDLE_EXPIRY_SECS: i64 = 30; // idle → removed

const NOTIFICATION_ERROR_KEYWORDS: &[&str] = &["error", "failed", "api error"];
const STOP_ERROR_KEYWORDS: &[&str] = &["error", "failed", "aborted"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Tool use inside the silent period after a Stop.
    SilentPeriod,
    /// Tool use within a second of entering `waiting`.
    SpeculativeWhileWaiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Updated(SessionStatus),
    Removed,
    Skipped(SkipReason),
}

pub struct SessionEngine {
    sessions: HashMap<String, SessionRecord>,
    // Kept apart from the records so the silent period outlives expiry.
    silent_periods: HashMap<String, DateTime<Local>>,
    stats: StatsTracker,
    sound_enabled: bool,
    active: Vec<SessionSnapshot>,
    pending_alerts: Vec<AlertKind>,
    stats_dirty: bool,
    needs_animation: bool,
}

impl SessionEngine {
    pub fn new(today: TodayStats, sound_enabled: bool) -> Self {
        Self {
            sessions: HashMap::new(),
            silent_periods: HashMap::new(),
            stats: StatsTracker::new(today),
            sound_enabled,
            active: Vec::new(),
            pending_alerts: Vec::new(),
            stats_dirty: false,
            needs_animation: false,
        }
    }

    pub fn handle_message(&mut self, message: &HookMessage, now: DateTime<Local>) -> EventOutcome {
        let key = message.session_id.as_str();

        if self.stats.record_session(key, now) {
            self.stats_dirty = true;
        }

        let mut record = self.sessions.get(key).cloned().unwrap_or_else(|| {
            SessionRecord::new(key, &message.terminal, &message.project, &message.cwd, now)
        });
        let previous = record.status;

        record.terminal = message.terminal.clone();
        record.project = message.project.clone();
        record.cwd = message.cwd.clone();

        let data = &message.data;
        match &message.event {
            EventKind::PreToolUse => {
                let tool = data.tool_name.as_deref().unwrap_or("Unknown");

                if let Some(stopped_at) = self.silent_periods.get(key).copied() {
                    let since_stop = now.signed_duration_since(stopped_at);
                    if since_stop < Duration::seconds(SILENT_PERIOD_SECS) {
                        debug!(
                            session_id = %key,
                            tool,
                            since_stop_ms = since_stop.num_milliseconds(),
                            "Ignoring PreToolUse during silent period"
                        );
                        return EventOutcome::Skipped(SkipReason::SilentPeriod);
                    }

                    self.silent_periods.remove(key);

                    if previous == SessionStatus::Completed {
                        info!(session_id = %key, "Silent period ended; removing completed session");
                        self.sessions.remove(key);
                        self.recompute(now);
                        return EventOutcome::Removed;
                    }

                    debug!(session_id = %key, "Silent period ended; starting new interaction");
                    record.tool_history.clear();
                }

                if previous == SessionStatus::Waiting {
                    if record.elapsed(now) < Duration::milliseconds(SPECULATIVE_WAITING_MS) {
                        debug!(session_id = %key, tool, "Ignoring speculative PreToolUse while waiting");
                        return EventOutcome::Skipped(SkipReason::SpeculativeWhileWaiting);
                    }
                    debug!(session_id = %key, "New interaction after waiting; clearing history");
                    record.tool_history.clear();
                }

                record.status = status_for_tool(tool);
                record.current_action = action_label(tool, data);
                record.metadata = metadata_label(tool, data);

                self.stats.record_tool_call(now);
                self.stats_dirty = true;
            }
            EventKind::PostToolUse => {
                let tool = data.tool_name.as_deref().unwrap_or("Unknown");
                record.status = SessionStatus::Thinking;
                record.current_action = "Processing...".to_string();
                record.push_history(ToolEvent {
                    tool: tool.to_string(),
                    target: metadata_label(tool, data),
                    outcome: ToolOutcome::Completed,
                    timestamp: now,
                });
            }
            EventKind::Notification => {
                let text = data
                    .message
                    .clone()
                    .unwrap_or_else(|| "Waiting for input".to_string());
                let notification_type = data.notification_type.clone().unwrap_or_default();
                let is_error = notification_type.to_lowercase().contains("error")
                    || contains_any(&text, NOTIFICATION_ERROR_KEYWORDS);

                if is_error {
                    record.status = SessionStatus::Error;
                    record.current_action = text;
                    record.metadata = "Error".to_string();
                    if previous != SessionStatus::Error {
                        self.alert(AlertKind::Attention);
                    }
                } else {
                    record.status = SessionStatus::Waiting;
                    record.current_action = text;
                    record.metadata = notification_type;
                    if previous != SessionStatus::Waiting {
                        self.alert(AlertKind::Attention);
                    }
                }
            }
            EventKind::Stop => {
                let text = data.message.clone().unwrap_or_default();
                if contains_any(&text, STOP_ERROR_KEYWORDS) {
                    record.status = SessionStatus::Error;
                    record.current_action = if text.is_empty() {
                        "Task failed".to_string()
                    } else {
                        text
                    };
                    record.metadata = "Error".to_string();
                    if previous != SessionStatus::Error {
                        self.alert(AlertKind::Attention);
                    }
                } else {
                    record.status = SessionStatus::Completed;
                    record.current_action = "Task completed".to_string();
                    record.metadata = String::new();
                    self.silent_periods.insert(key.to_string(), now);
                    if previous != SessionStatus::Completed {
                        self.alert(AlertKind::Completion);
                    }
                }
            }
            EventKind::Other(name) => {
                debug!(session_id = %key, event = %name, "No transition rule for event");
            }
        }

        record.touch(now);
        let status = record.status;
        debug!(
            session_id = %key,
            from = ?previous,
            to = ?status,
            action = %record.current_action,
            "Session updated"
        );
        self.sessions.insert(key.to_string(), record);
        self.recompute(now);
        EventOutcome::Updated(status)
    }

    /// Expires or force-completes records that went quiet.
    pub fn sweep(&mut self, now: DateTime<Local>) {
        let mut expired = Vec::new();
        let mut forced_completions = 0usize;

        for (key, record) in self.sessions.iter_mut() {
            let elapsed = record.elapsed(now);
            match record.status {
                SessionStatus::Completed | SessionStatus::Error => {
                    if elapsed > Duration::seconds(FINISHED_EXPIRY_SECS) {
                        expired.push(key.clone());
                    }
                }
                SessionStatus::Reading | SessionStatus::Writing | SessionStatus::Thinking => {
                    if elapsed > Duration::seconds(WORKING_EXPIRY_SECS) {
                        record.status = SessionStatus::Completed;
                        record.current_action = "Task completed".to_string();
                        record.metadata = String::new();
                        record.last_update = now;
                        forced_completions += 1;
                        info!(session_id = %key, "Auto-completed stale session");
                    }
                }
                SessionStatus::Waiting => {
                    if elapsed > Duration::seconds(WAITING_EXPIRY_SECS) {
                        expired.push(key.clone());
                    }
                }
                SessionStatus::Idle => {
                    if elapsed > Duration::seconds(IDLE_EXPIRY_SECS) {
                        expired.push(key.clone());
                    }
                }
            }
        }

        for key in &expired {
            self.sessions.remove(key);
            debug!(session_id = %key, "Expired session removed");
        }
        for _ in 0..forced_completions {
            self.alert(AlertKind::Completion);
        }

        // A live record keeps its stamp until its next PreToolUse consumes it.
        let sessions = &self.sessions;
        self.silent_periods.retain(|key, stopped_at| {
            sessions.contains_key(key)
                || now.signed_duration_since(*stopped_at) < Duration::seconds(SILENT_PERIOD_SECS)
        });

        self.recompute(now);
    }

    /// Refreshes opacity and time-derived hints; driven by the fade ticker.
    pub fn fade_tick(&mut self, now: DateTime<Local>) {
        self.recompute(now);
    }

    pub fn toggle_expand(&mut self, key: &str, now: DateTime<Local>) -> bool {
        let Some(record) = self.sessions.get_mut(key) else {
            return false;
        };
        record.is_expanded = !record.is_expanded;
        self.recompute(now);
        true
    }

    pub fn dismiss_session(&mut self, key: &str, now: DateTime<Local>) -> bool {
        let removed = self.sessions.remove(key).is_some();
        if removed {
            info!(session_id = %key, "Dismissed session");
        }
        self.recompute(now);
        removed
    }

    pub fn toggle_sound(&mut self) -> bool {
        self.sound_enabled = !self.sound_enabled;
        self.sound_enabled
    }

    pub fn sound_enabled(&self) -> bool {
        self.sound_enabled
    }

    pub fn active_sessions(&self) -> &[SessionSnapshot] {
        &self.active
    }

    pub fn session(&self, key: &str) -> Option<&SessionRecord> {
        self.sessions.get(key)
    }

    pub fn today_stats(&self) -> &TodayStats {
        self.stats.today()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            sessions: self.active.clone(),
            stats: self.stats.today().snapshot(),
            sound_enabled: self.sound_enabled,
        }
    }

    /// Whether any record currently needs the fade ticker.
    pub fn needs_animation(&self) -> bool {
        self.needs_animation
    }

    pub fn take_alerts(&mut self) -> Vec<AlertKind> {
        std::mem::take(&mut self.pending_alerts)
    }

    /// Returns true once after every stats change, for the persistence layer.
    pub fn take_stats_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.stats_dirty, false)
    }

    fn alert(&mut self, kind: AlertKind) {
        if self.sound_enabled {
            self.pending_alerts.push(kind);
        }
    }

    fn recompute(&mut self, now: DateTime<Local>) {
        for record in self.sessions.values_mut() {
            record.opacity = record.calculated_opacity(now);
        }

        let mut visible: Vec<&SessionRecord> = self
            .sessions
            .values()
            .filter(|record| {
                record.is_active(now) && record.is_ready_to_display(now) && record.opacity > 0.0
            })
            .collect();
        visible.sort_by(|a, b| {
            b.last_update
                .cmp(&a.last_update)
                .then_with(|| a.key.cmp(&b.key))
        });

        self.active = visible.into_iter().map(|record| record.snapshot(now)).collect();
        self.needs_animation = self
            .sessions
            .values()
            .any(|record| record.needs_animation(now));
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    keywords.iter().any(|keyword| lowered.contains(keyword))
}
