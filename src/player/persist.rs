use crate::core::{log_ctx, DecoderState, Result, StartupState};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 释放 / 恢复时保存的播放现场
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub last_url: String,
    pub decoder_state: DecoderState,
    pub startup_state: StartupState,
    /// 播放位置（毫秒）
    pub start_ms: i64,
    pub quality: usize,
    pub audio_track: usize,
    pub subtitle_track: usize,
}

impl PersistedState {
    /// 是否值得恢复：有播放进度或已经开始过启动流程，且是网络地址
    pub fn is_restorable(&self) -> bool {
        let started = self.start_ms > 0 || self.startup_state != StartupState::WaitingToStart;
        let remote = self.last_url.starts_with("http://") || self.last_url.starts_with("https://");
        started && remote
    }
}

/// 播放现场存储（由宿主实现）
pub trait StateStore {
    fn save(&self, state: &PersistedState) -> Result<()>;

    fn load(&self) -> Result<Option<PersistedState>>;
}

/// JSON 文件存储
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, text)?;
        info!("{} 💾 播放现场已保存: {}", log_ctx(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&text) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(
                    "{} ⚠️ 播放现场文件损坏，忽略: {} - {}",
                    log_ctx(),
                    self.path.display(),
                    e
                );
                Ok(None)
            }
        }
    }
}

/// 内存存储（测试 / 演示用）
#[derive(Default)]
pub struct MemoryStateStore {
    slot: Mutex<Option<PersistedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn save(&self, state: &PersistedState) -> Result<()> {
        *self.slot.lock() = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>> {
        Ok(self.slot.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedState {
        PersistedState {
            last_url: "https://x/master.m3u8".to_string(),
            decoder_state: DecoderState::Paused,
            startup_state: StartupState::Started,
            start_ms: 42_000,
            quality: 2,
            audio_track: 1,
            subtitle_track: 0,
        }
    }

    #[test]
    fn test_json_file_store_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state").join("player.json"));
        assert_eq!(store.load().unwrap(), None);

        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(JsonFileStore::new(&path).load().unwrap(), None);
    }

    #[test]
    fn test_restorable_rules() {
        assert!(sample().is_restorable());

        let mut local = sample();
        local.last_url = "/sdcard/movie.m3u8".to_string();
        assert!(!local.is_restorable());

        let mut fresh = sample();
        fresh.start_ms = 0;
        fresh.startup_state = StartupState::WaitingToStart;
        assert!(!fresh.is_restorable());
    }
}
