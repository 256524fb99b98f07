use crate::core::{QualityTrack, SeekTarget, Segment, SubtitleCue};

/// Track Catalog：由清单派生的分片列表、备用音轨、字幕语言和不连续边界
///
/// 清单文本解析、字幕 cue 计时和重载监控都在实现方内部完成，
/// 编排层只通过这个接口读取和驱动。实现需要内部可变性（Send + Sync），
/// 因为命令线程和渲染线程会同时持有同一个 catalog。
pub trait TrackCatalog: Send + Sync {
    /// 是否至少有一个分片
    fn has_segments(&self) -> bool;

    /// 指定清晰度下的下一个分片
    fn segment_after(&self, quality: usize) -> Option<Segment>;

    /// 指定时间（或直播边缘）对应的分片
    fn segment_at_time(&self, target: SeekTarget, quality: usize) -> Option<Segment>;

    /// 点播流返回 true（有 ENDLIST），直播流返回 false
    fn stream_ends(&self) -> bool;

    fn quality_level_count(&self) -> usize;

    fn quality_tracks(&self) -> Vec<QualityTrack>;

    /// 指定清晰度的目标分片时长（秒）
    fn target_duration_secs(&self, quality: usize) -> Option<f64>;

    /// 总时长（毫秒），直播流返回 None
    fn duration_ms(&self) -> Option<i64>;

    fn audio_variant_list(&self) -> Vec<String>;

    fn audio_default_index(&self) -> Option<usize>;

    fn set_audio_variant(&self, index: usize);

    fn subtitle_language_list(&self) -> Vec<String>;

    fn subtitle_default_index(&self) -> Option<usize>;

    /// 预取指定时间附近的字幕分片
    fn precache_subtitles_at(&self, _time_secs: f64, _language: usize) {}

    /// 当前时间应发布的字幕 cue（每个 cue 只返回一次）
    fn cues_at(&self, time_secs: f64, language: usize) -> Vec<SubtitleCue>;

    /// 预计算初始分片、语言列表、音轨列表（可能阻塞，在独立线程执行）
    fn warm_up(&self) {}

    /// 从当前位置开始改为投递新清晰度的分片
    fn initiate_quality_change(&self, quality: usize);

    /// 启动清单重载 / 直播流监控
    fn begin_reload(&self);

    fn stop_reload(&self);

    /// 会话结束时释放
    fn close(&self) {
        self.stop_reload();
    }
}
