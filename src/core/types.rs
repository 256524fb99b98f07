use serde::{Deserialize, Serialize};

/// 直播边缘哨兵值（传给解码器与 Track Catalog 的原始值）
pub const LIVE_EDGE_SENTINEL: f64 = -999.0;

/// 解码器单步返回码：流结束 / 暂无新帧
pub const FRAME_END_OF_STREAM: i32 = -1;

/// 解码器单步返回码：遇到不连续点（INFO_DISCONTINUITY）
pub const FRAME_DISCONTINUITY: i32 = -1013;

/// 媒体分片（不可变，可在命令线程与渲染线程之间只读共享）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub uri: String,
    pub quality: usize,
    /// 连续性纪元：跨越不连续点时递增，解码器据此重置时间基
    pub continuity_era: u32,
    /// 分片起始时间（秒）
    pub start_time: f64,
    pub alt_audio: Option<AltAudioSegment>,
    pub decryption_key_id: Option<i32>,
}

/// 分片附带的备用音轨
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltAudioSegment {
    pub uri: String,
    pub variant: usize,
    pub decryption_key_id: Option<i32>,
}

impl Segment {
    pub fn new(uri: impl Into<String>, quality: usize, start_time: f64) -> Self {
        Self {
            uri: uri.into(),
            quality,
            continuity_era: 0,
            start_time,
            alt_audio: None,
            decryption_key_id: None,
        }
    }

    pub fn with_era(mut self, era: u32) -> Self {
        self.continuity_era = era;
        self
    }

    pub fn with_alt_audio(mut self, uri: impl Into<String>, variant: usize) -> Self {
        self.alt_audio = Some(AltAudioSegment {
            uri: uri.into(),
            variant,
            decryption_key_id: None,
        });
        self
    }

    /// 备用音轨序号（没有则为 None）
    pub fn alt_audio_variant(&self) -> Option<usize> {
        self.alt_audio.as_ref().map(|a| a.variant)
    }
}

/// 启动状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StartupState {
    Started = 0,
    Loading = 1,
    Loaded = 2,
    PlayQueued = 3,
    WaitingToStart = 4,
}

impl StartupState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => StartupState::Started,
            1 => StartupState::Loading,
            2 => StartupState::Loaded,
            3 => StartupState::PlayQueued,
            _ => StartupState::WaitingToStart,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StartupState::Started => "STARTED",
            StartupState::Loading => "LOADING",
            StartupState::Loaded => "LOADED",
            StartupState::PlayQueued => "PLAY_QUEUED",
            StartupState::WaitingToStart => "WAITING_TO_START",
        }
    }
}

/// 解码器状态（完全由解码器代理拥有，编排层只读）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderState {
    Stopped,
    Paused,
    Playing,
    Seeking,
    FormatChanging,
    FoundDiscontinuity,
    WaitingForData,
    CueStop,
}

impl DecoderState {
    /// 渲染线程需要推进解码的状态
    pub fn is_stepping(&self) -> bool {
        matches!(
            self,
            DecoderState::Playing | DecoderState::FoundDiscontinuity | DecoderState::WaitingForData
        )
    }
}

/// Seek 目标：直播边缘或具体毫秒位置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SeekTarget {
    LiveEdge,
    Millis(i64),
}

impl SeekTarget {
    /// 转换为解码器的 seek 参数：具体位置换算为秒，直播边缘直接使用哨兵值
    pub fn decoder_offset(&self) -> f64 {
        match self {
            SeekTarget::LiveEdge => LIVE_EDGE_SENTINEL,
            SeekTarget::Millis(ms) => *ms as f64 / 1000.0,
        }
    }

    pub fn is_live_edge(&self) -> bool {
        matches!(self, SeekTarget::LiveEdge)
    }
}

/// 待执行的 seek 请求（每个会话最多一个，后写覆盖先写）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingSeek {
    pub target: SeekTarget,
    pub notify: bool,
}

/// 当前轨道选择快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackSelection {
    pub quality: usize,
    pub audio: usize,
    pub subtitle: usize,
}

/// 清晰度轨道描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityTrack {
    pub track_id: String,
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
}

/// 字幕 cue
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    /// 开始时间（秒）
    pub start_time: f64,
    /// 持续时间（秒）
    pub duration: f64,
    pub alignment: String,
    pub text: String,
}

/// 平台渲染表面句柄（对编排层不透明）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle(pub u64);
