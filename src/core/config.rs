use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放器配置
///
/// 所有字段都有默认值，JSON 配置文件里只需写要覆盖的项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 目标缓冲时长（秒），换算为解码器要缓冲的分片数
    pub buffer_seconds: u32,
    /// 渲染线程在解码器空闲时的休眠间隔（毫秒）
    pub idle_backoff_ms: u64,
    /// 发出 Stop 之后、发布 End / 释放资源之前的等待（毫秒）
    pub stop_grace_ms: u64,
    /// 清晰度切换等待解码器 format change 完成的超时（毫秒）
    pub format_change_timeout_ms: u64,
    /// 清单没有目标分片时长时使用的缓冲分片数
    pub fallback_segments_to_buffer: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: 30,
            idle_backoff_ms: 30,
            stop_grace_ms: 100,
            format_change_timeout_ms: 5000,
            fallback_segments_to_buffer: 2,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件加载配置
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn format_change_timeout(&self) -> Duration {
        Duration::from_millis(self.format_change_timeout_ms)
    }

    /// 缓冲时长 ÷ 目标分片时长，向上取整，至少 1 个分片
    pub fn segments_to_buffer(&self, target_duration_secs: Option<f64>) -> u32 {
        match target_duration_secs {
            Some(target) if target > 0.0 => {
                let segments = (self.buffer_seconds as f64 / target).ceil() as u32;
                segments.max(1)
            }
            _ => self.fallback_segments_to_buffer.max(1),
        }
    }
}
