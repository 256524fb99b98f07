use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("清单加载失败: {0}")]
    ManifestError(String),

    #[error("无效媒体: {0}")]
    NotValidMedia(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

/// 错误通知码（随错误事件发布给观察者）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// 清单下载失败
    Io,
    /// 清单为空或无可用分片
    NotValid,
    /// 不支持的操作
    Unsupported,
    /// 预读分片下载失败
    SegmentFetch,
    /// 解码器上报的错误
    Decode,
    /// 媒体尚未就绪
    NotReady,
}

impl ErrorCode {
    pub fn as_i32(&self) -> i32 {
        match self {
            ErrorCode::Io => -1004,
            ErrorCode::NotValid => 200,
            ErrorCode::Unsupported => -1010,
            ErrorCode::SegmentFetch => -1005,
            ErrorCode::Decode => -1007,
            ErrorCode::NotReady => -38,
        }
    }

    /// 解码器上报的原始错误码映射；未知码一律视为解码错误
    pub fn from_native(code: i32) -> Self {
        match code {
            -1004 => ErrorCode::Io,
            200 => ErrorCode::NotValid,
            -1010 => ErrorCode::Unsupported,
            -1005 => ErrorCode::SegmentFetch,
            -38 => ErrorCode::NotReady,
            _ => ErrorCode::Decode,
        }
    }
}

impl From<&PlayerError> for ErrorCode {
    fn from(err: &PlayerError) -> Self {
        match err {
            PlayerError::IoError(_) | PlayerError::ManifestError(_) => ErrorCode::Io,
            PlayerError::NotValidMedia(_) | PlayerError::JsonError(_) => ErrorCode::NotValid,
            PlayerError::DecodeError(_) => ErrorCode::Decode,
            _ => ErrorCode::Unsupported,
        }
    }
}
