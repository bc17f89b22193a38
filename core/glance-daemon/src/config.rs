//! Daemon configuration.
//!
//! Values come from `~/.claude-glance/config.toml` when present, then CLI
//! overrides are layered on top by the binary. Every field has a default so
//! an empty or missing file is a valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const STATE_DIR_NAME: &str = ".claude-glance";
const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/claude-glance.sock";
pub const DEFAULT_HTTP_PORT: u16 = 19847;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlanceConfig {
    pub socket_path: PathBuf,
    pub http_host: String,
    pub http_port: u16,
    /// Extra ports tried after `http_port`, in sequence.
    pub port_fallback_count: u16,
    pub bind_timeout_ms: u64,
    pub health_check_interval_secs: u64,
    pub reconnect_delay_ms: u64,
    pub reconnect_attempts: u32,
    pub sweep_interval_secs: u64,
    pub fade_interval_ms: u64,
    pub max_message_bytes: usize,
    pub read_timeout_ms: u64,
    pub state_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl Default for GlanceConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            http_host: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            port_fallback_count: 4,
            bind_timeout_ms: 2000,
            health_check_interval_secs: 10,
            reconnect_delay_ms: 1000,
            reconnect_attempts: 3,
            sweep_interval_secs: 10,
            fade_interval_ms: 1000,
            max_message_bytes: glance_protocol::MAX_MESSAGE_BYTES,
            read_timeout_ms: 2000,
            state_dir: default_state_dir().unwrap_or_else(|| PathBuf::from(STATE_DIR_NAME)),
            log_dir: None,
        }
    }
}

impl GlanceConfig {
    /// Candidate HTTP ports: the primary port followed by the fallback range.
    pub fn candidate_ports(&self) -> Vec<u16> {
        (0..=self.port_fallback_count)
            .filter_map(|offset| self.http_port.checked_add(offset))
            .collect()
    }

    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn fade_interval(&self) -> Duration {
        Duration::from_millis(self.fade_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.state_dir.join("preferences.json")
    }
}

pub fn default_state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STATE_DIR_NAME))
}

pub fn default_config_path() -> Result<PathBuf, String> {
    default_state_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or_else(|| "Home directory not found".to_string())
}

/// Loads the config file, returning defaults when it does not exist.
pub fn load_config(path: Option<&Path>) -> Result<GlanceConfig, String> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(GlanceConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read config {}: {}",
            config_path.display(),
            err
        )
    })?;
    toml::from_str::<GlanceConfig>(&content).map_err(|err| {
        format!(
            "Failed to parse config {}: {}",
            config_path.display(),
            err
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config, GlanceConfig::default());
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
    }

    #[test]
    fn load_config_overrides_selected_fields() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
socket_path = "/tmp/other.sock"
http_port = 20000
port_fallback_count = 2
sweep_interval_secs = 5
"#,
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config.socket_path, PathBuf::from("/tmp/other.sock"));
        assert_eq!(config.candidate_ports(), vec![20000, 20001, 20002]);
        assert_eq!(config.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.health_check_interval_secs, 10);
    }

    #[test]
    fn load_config_rejects_unknown_keys() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "htp_port = 1\n").expect("write config");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn candidate_ports_stop_at_u16_max() {
        let config = GlanceConfig {
            http_port: u16::MAX - 1,
            port_fallback_count: 4,
            ..GlanceConfig::default()
        };
        assert_eq!(config.candidate_ports(), vec![u16::MAX - 1, u16::MAX]);
    }
}
