//! Persisted user preferences and today's counters.
//!
//! Stored as pretty JSON next to the config file and replaced atomically, so
//! a crash mid-write leaves the previous copy intact.

use chrono::{DateTime, Local};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::stats::TodayStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_sound_enabled")]
    pub sound_enabled: bool,
    #[serde(default)]
    pub today_stats: Option<TodayStats>,
}

fn default_sound_enabled() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            today_stats: None,
        }
    }
}

impl Preferences {
    /// Today's counters, reset if they were saved on an earlier day.
    pub fn current_stats(&self, now: DateTime<Local>) -> TodayStats {
        let mut stats = self
            .today_stats
            .clone()
            .unwrap_or_else(|| TodayStats::new(now));
        stats.reset_if_new_day(now);
        stats
    }
}

#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
}

impl PreferencesStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Preferences, String> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Preferences::default())
            }
            Err(err) => return Err(format!("Failed to read preferences: {}", err)),
        };

        serde_json::from_slice(&data).map_err(|err| format!("Failed to parse preferences: {}", err))
    }

    pub fn save(&self, preferences: &Preferences) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create preferences dir: {}", err))?;
        }

        let payload = serde_json::to_vec_pretty(preferences)
            .map_err(|err| format!("Failed to serialize preferences: {}", err))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload)
            .map_err(|err| format!("Failed to write preferences: {}", err))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|err| format!("Failed to commit preferences: {}", err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 4, day, hour, 0, 0)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn missing_file_loads_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = PreferencesStore::new(temp_dir.path().join("preferences.json"));
        let prefs = store.load().expect("load");
        assert!(prefs.sound_enabled);
        assert!(prefs.today_stats.is_none());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = PreferencesStore::new(temp_dir.path().join("nested").join("preferences.json"));
        let mut stats = TodayStats::new(at(2, 9));
        stats.increment_tool_calls(at(2, 10));
        let prefs = Preferences {
            sound_enabled: false,
            today_stats: Some(stats.clone()),
        };

        store.save(&prefs).expect("save");
        let loaded = store.load().expect("load");
        assert_eq!(loaded, prefs);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn stale_stats_reset_on_load() {
        let mut stats = TodayStats::new(at(2, 9));
        stats.increment_tool_calls(at(2, 10));
        let prefs = Preferences {
            sound_enabled: true,
            today_stats: Some(stats),
        };

        assert_eq!(prefs.current_stats(at(2, 18)).tool_calls, 1);
        assert_eq!(prefs.current_stats(at(3, 8)).tool_calls, 0);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("preferences.json");
        fs::write(&path, "{not json").expect("write");
        assert!(PreferencesStore::new(path).load().is_err());
    }
}
