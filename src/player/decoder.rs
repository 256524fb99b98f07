use crate::core::{
    DecoderState, Result, Segment, SurfaceHandle, FRAME_DISCONTINUITY, FRAME_END_OF_STREAM,
};

/// 解码器代理：外部有状态播放引擎的不透明句柄
///
/// 调用约束（由编排层保证）：
/// - `play` / `pause` / `stop` / `reset` / `seek` / `feed` 只在命令线程调用
/// - `step` 只在渲染线程调用
/// - `apply_format_change` / `bind_surface` 只在展示线程调用
/// - `current_state` 任意线程可读
///
/// `step` 和 `seek` 允许阻塞，但应在帧时间量级内返回
pub trait DecoderProxy: Send + Sync {
    /// 当前解码器状态
    fn current_state(&self) -> DecoderState;

    /// 向解码器送入一个分片（在对应的 precache 之前调用）
    fn feed(&self, segment: &Segment);

    /// 从指定偏移（秒）开始播放
    fn play(&self, start_offset_secs: f64);

    fn pause(&self, pause: bool);

    fn stop(&self);

    fn reset(&self);

    /// seek 参数：具体位置为秒，直播边缘为哨兵原始值
    fn seek(&self, offset: f64);

    /// 推进一帧，返回帧结果码（>= 0 为时间戳毫秒）
    fn step(&self) -> Result<i32>;

    /// 应用格式切换（不连续点 / 清晰度切换后由展示线程调用）
    fn apply_format_change(&self);

    fn bind_surface(&self, surface: SurfaceHandle);

    /// 设置需要缓冲的分片数
    fn set_segment_count_to_buffer(&self, count: u32);

    /// 每秒丢帧数（统计用）
    fn dropped_frames_per_second(&self) -> f32 {
        0.0
    }

    /// 关闭并释放原生资源
    fn close(&self) {}
}

/// 解码器单步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameResult {
    /// 新的播放时间戳（毫秒）
    Timestamp(i64),
    /// 流结束 / 暂无新帧
    EndOfStream,
    /// 遇到不连续点，需要应用格式切换
    Discontinuity,
    /// 其他负返回码（信息性）
    NoFrame(i32),
}

impl FrameResult {
    pub fn from_code(code: i32) -> Self {
        match code {
            c if c >= 0 => FrameResult::Timestamp(c as i64),
            FRAME_END_OF_STREAM => FrameResult::EndOfStream,
            FRAME_DISCONTINUITY => FrameResult::Discontinuity,
            c => FrameResult::NoFrame(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_result_from_code() {
        assert_eq!(FrameResult::from_code(0), FrameResult::Timestamp(0));
        assert_eq!(FrameResult::from_code(4040), FrameResult::Timestamp(4040));
        assert_eq!(FrameResult::from_code(-1), FrameResult::EndOfStream);
        assert_eq!(FrameResult::from_code(-1013), FrameResult::Discontinuity);
        assert_eq!(FrameResult::from_code(-11), FrameResult::NoFrame(-11));
    }
}
