//! Global defaults loaded from `config/lv-cli.toml`.
//!
//! 플래그보다 약하고 하드코딩 기본값보다 강한 레이어입니다. CI 머신처럼
//! 타임아웃을 전역으로 조정하고 싶은 곳에서 씁니다. 파일이 없거나 읽을 수
//! 없으면 조용히 기본값으로 동작합니다.

use serde::Deserialize;
use std::path::Path;

const CONFIG_PATH: &str = "config/lv-cli.toml";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GlobalConfig {
    /// Time in ms to wait for the connection from the launched program.
    pub connect_timeout_ms: u64,
    /// Delay in ms before a kill is enforced after the exit code arrives.
    pub kill_timeout_ms: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 60_000,
            kill_timeout_ms: 10_000,
        }
    }
}

impl GlobalConfig {
    pub fn load() -> Self {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    fn load_from(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };

        match toml::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                // 깨진 설정 파일로 세션을 막지 않고 기본값으로 진행
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let cfg = GlobalConfig::default();
        assert_eq!(cfg.connect_timeout_ms, 60_000);
        assert_eq!(cfg.kill_timeout_ms, 10_000);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = GlobalConfig::load_from(Path::new("/nonexistent/lv-cli.toml"));
        assert_eq!(cfg, GlobalConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lv-cli.toml");
        fs::write(&path, "connect_timeout_ms = 5000\n").unwrap();

        let cfg = GlobalConfig::load_from(&path);
        assert_eq!(cfg.connect_timeout_ms, 5000);
        assert_eq!(cfg.kill_timeout_ms, 10_000);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lv-cli.toml");
        fs::write(&path, "connect_timeout_ms = \"soon\"\n").unwrap();

        let cfg = GlobalConfig::load_from(&path);
        assert_eq!(cfg, GlobalConfig::default());
    }
}
