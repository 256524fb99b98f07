//! 内存模拟协作者：解码器、Track Catalog、分片缓存、清单加载器
//!
//! 用于单元测试和演示程序。所有调用都按顺序记录到共享的 `CallLog`，
//! 测试据此检查调用顺序（例如 feed 必须在 precache 之前）。

use crate::core::{
    DecoderState, PlayerError, QualityTrack, Result, SeekTarget, Segment, SubtitleCue,
    SurfaceHandle,
};
use crate::player::catalog::TrackCatalog;
use crate::player::decoder::DecoderProxy;
use crate::player::manifest_loader::{ManifestLoader, ManifestReply};
use crate::player::segment_cache::{CacheCompletion, SegmentCacheGateway};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 有序调用记录
#[derive(Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.lock().iter().any(|e| e == entry)
    }

    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.count_prefix(prefix) > 0
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// 第一次出现的位置
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// ========== 解码器 ==========

/// 脚本化的单步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStep {
    Code(i32),
    Fail,
}

/// 模拟解码器
///
/// `step` 优先消费脚本队列；队列为空时每步推进 40ms 并返回新时间戳
pub struct SimDecoder {
    log: CallLog,
    state: Mutex<DecoderState>,
    script: Mutex<VecDeque<SimStep>>,
    clock_ms: AtomicI64,
    format_changes: AtomicUsize,
    steps: AtomicUsize,
    buffer_segments: AtomicU32,
    frame_time: Duration,
}

impl SimDecoder {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Mutex::new(DecoderState::Stopped),
            script: Mutex::new(VecDeque::new()),
            clock_ms: AtomicI64::new(0),
            format_changes: AtomicUsize::new(0),
            steps: AtomicUsize::new(0),
            buffer_segments: AtomicU32::new(0),
            frame_time: Duration::from_millis(5),
        }
    }

    /// 直接设置状态（测试用）
    pub fn force_state(&self, state: DecoderState) {
        *self.state.lock() = state;
    }

    /// 追加脚本化的单步结果
    pub fn push_steps(&self, steps: impl IntoIterator<Item = SimStep>) {
        self.script.lock().extend(steps);
    }

    pub fn format_change_count(&self) -> usize {
        self.format_changes.load(Ordering::SeqCst)
    }

    pub fn step_count(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }

    pub fn buffer_segments(&self) -> u32 {
        self.buffer_segments.load(Ordering::SeqCst)
    }
}

impl DecoderProxy for SimDecoder {
    fn current_state(&self) -> DecoderState {
        *self.state.lock()
    }

    fn feed(&self, segment: &Segment) {
        self.log.record(format!("decoder.feed:{}", segment.uri));
    }

    fn play(&self, start_offset_secs: f64) {
        self.log
            .record(format!("decoder.play:{:.3}", start_offset_secs));
        if start_offset_secs >= 0.0 {
            self.clock_ms
                .store((start_offset_secs * 1000.0) as i64, Ordering::SeqCst);
        }
        self.force_state(DecoderState::Playing);
    }

    fn pause(&self, pause: bool) {
        self.log.record(format!("decoder.pause:{}", pause));
        self.force_state(if pause {
            DecoderState::Paused
        } else {
            DecoderState::Playing
        });
    }

    fn stop(&self) {
        self.log.record("decoder.stop");
        self.force_state(DecoderState::Stopped);
    }

    fn reset(&self) {
        self.log.record("decoder.reset");
        self.clock_ms.store(0, Ordering::SeqCst);
        self.script.lock().clear();
    }

    fn seek(&self, offset: f64) {
        self.log.record(format!("decoder.seek:{:.3}", offset));
        if offset >= 0.0 {
            self.clock_ms
                .store((offset * 1000.0) as i64, Ordering::SeqCst);
        }
    }

    fn step(&self) -> Result<i32> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.frame_time);
        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(SimStep::Code(code)) => Ok(code),
            Some(SimStep::Fail) => Err(PlayerError::DecodeError("scripted failure".to_string())),
            None => {
                let ms = self.clock_ms.fetch_add(40, Ordering::SeqCst) + 40;
                Ok(ms.min(i32::MAX as i64) as i32)
            }
        }
    }

    fn apply_format_change(&self) {
        self.log.record("decoder.apply_format_change");
        self.format_changes.fetch_add(1, Ordering::SeqCst);
    }

    fn bind_surface(&self, surface: SurfaceHandle) {
        self.log.record(format!("decoder.bind_surface:{}", surface.0));
    }

    fn set_segment_count_to_buffer(&self, count: u32) {
        self.log.record(format!("decoder.buffer:{}", count));
        self.buffer_segments.store(count, Ordering::SeqCst);
    }

    fn close(&self) {
        self.log.record("decoder.close");
    }
}

// ========== Track Catalog ==========

/// 模拟 Track Catalog：每个清晰度同样数量、同样时长的分片
pub struct SimCatalog {
    log: CallLog,
    segment_count: usize,
    target_duration: f64,
    quality_count: usize,
    stream_ends: bool,
    audio: Vec<String>,
    audio_variant: AtomicUsize,
    subtitles: Vec<String>,
    subtitle_default: Option<usize>,
    cues: Mutex<Vec<(usize, SubtitleCue)>>,
    cursor: AtomicUsize,
    reloading: AtomicBool,
}

impl SimCatalog {
    /// 点播流（有 ENDLIST）
    pub fn vod(log: CallLog, segment_count: usize, target_duration: f64) -> Self {
        Self {
            log,
            segment_count,
            target_duration,
            quality_count: 1,
            stream_ends: true,
            audio: Vec::new(),
            audio_variant: AtomicUsize::new(0),
            subtitles: Vec::new(),
            subtitle_default: None,
            cues: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            reloading: AtomicBool::new(false),
        }
    }

    /// 直播流
    pub fn live(log: CallLog, segment_count: usize, target_duration: f64) -> Self {
        Self {
            stream_ends: false,
            ..Self::vod(log, segment_count, target_duration)
        }
    }

    pub fn with_qualities(mut self, count: usize) -> Self {
        self.quality_count = count.max(1);
        self
    }

    pub fn with_audio(mut self, tracks: Vec<String>) -> Self {
        self.audio = tracks;
        self
    }

    pub fn with_subtitles(mut self, languages: Vec<String>, default_index: Option<usize>) -> Self {
        self.subtitles = languages;
        self.subtitle_default = default_index;
        self
    }

    pub fn with_cue(self, language: usize, cue: SubtitleCue) -> Self {
        self.cues.lock().push((language, cue));
        self
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::SeqCst)
    }

    fn segment(&self, index: usize, quality: usize) -> Segment {
        let segment = Segment::new(
            format!("q{}/seg{}.ts", quality, index),
            quality,
            index as f64 * self.target_duration,
        );
        if self.audio.is_empty() {
            segment
        } else {
            let variant = self.audio_variant.load(Ordering::SeqCst);
            segment.with_alt_audio(format!("a{}/seg{}.aac", variant, index), variant)
        }
    }
}

impl TrackCatalog for SimCatalog {
    fn has_segments(&self) -> bool {
        self.segment_count > 0
    }

    fn segment_after(&self, quality: usize) -> Option<Segment> {
        let index = self.cursor.load(Ordering::SeqCst);
        if index >= self.segment_count {
            self.log.record("catalog.segment_after:none");
            return None;
        }
        self.cursor.store(index + 1, Ordering::SeqCst);
        self.log.record(format!("catalog.segment_after:{}", index));
        Some(self.segment(index, quality))
    }

    fn segment_at_time(&self, target: SeekTarget, quality: usize) -> Option<Segment> {
        if self.segment_count == 0 {
            return None;
        }
        let index = match target {
            SeekTarget::LiveEdge if self.stream_ends => 0,
            SeekTarget::LiveEdge => self.segment_count - 1,
            SeekTarget::Millis(ms) => {
                let index = (ms.max(0) as f64 / 1000.0 / self.target_duration).floor() as usize;
                if index >= self.segment_count {
                    self.log.record("catalog.segment_at_time:none");
                    return None;
                }
                index
            }
        };
        self.cursor.store(index + 1, Ordering::SeqCst);
        self.log.record(format!("catalog.segment_at_time:{}", index));
        Some(self.segment(index, quality))
    }

    fn stream_ends(&self) -> bool {
        self.stream_ends
    }

    fn quality_level_count(&self) -> usize {
        self.quality_count
    }

    fn quality_tracks(&self) -> Vec<QualityTrack> {
        (0..self.quality_count)
            .map(|i| QualityTrack {
                track_id: format!("q{}", i),
                bitrate: 800_000 * (i as u64 + 1),
                width: 640 * (i as u32 + 1),
                height: 360 * (i as u32 + 1),
            })
            .collect()
    }

    fn target_duration_secs(&self, _quality: usize) -> Option<f64> {
        Some(self.target_duration)
    }

    fn duration_ms(&self) -> Option<i64> {
        if self.stream_ends {
            Some((self.segment_count as f64 * self.target_duration * 1000.0) as i64)
        } else {
            None
        }
    }

    fn audio_variant_list(&self) -> Vec<String> {
        self.audio.clone()
    }

    fn audio_default_index(&self) -> Option<usize> {
        if self.audio.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    fn set_audio_variant(&self, index: usize) {
        self.log.record(format!("catalog.set_audio_variant:{}", index));
        self.audio_variant.store(index, Ordering::SeqCst);
    }

    fn subtitle_language_list(&self) -> Vec<String> {
        self.subtitles.clone()
    }

    fn subtitle_default_index(&self) -> Option<usize> {
        self.subtitle_default
    }

    fn cues_at(&self, time_secs: f64, language: usize) -> Vec<SubtitleCue> {
        let mut cues = self.cues.lock();
        let mut due = Vec::new();
        cues.retain(|(lang, cue)| {
            if *lang == language && cue.start_time <= time_secs {
                due.push(cue.clone());
                false
            } else {
                true
            }
        });
        due
    }

    fn warm_up(&self) {
        self.log.record("catalog.warm_up");
    }

    fn initiate_quality_change(&self, quality: usize) {
        self.log
            .record(format!("catalog.initiate_quality_change:{}", quality));
    }

    fn begin_reload(&self) {
        self.log.record("catalog.begin_reload");
        self.reloading.store(true, Ordering::SeqCst);
    }

    fn stop_reload(&self) {
        self.log.record("catalog.stop_reload");
        self.reloading.store(false, Ordering::SeqCst);
    }
}

// ========== 分片缓存 ==========

/// 模拟缓存的完成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// 在 precache 内同步完成（已缓存）
    CompleteImmediately,
    /// 在 precache 内同步失败
    Fail(i32),
    /// 挂起，等测试手动完成
    Hold,
}

pub struct SimCache {
    log: CallLog,
    mode: Mutex<CacheMode>,
    held: Mutex<Vec<(String, CacheCompletion)>>,
}

impl SimCache {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            mode: Mutex::new(CacheMode::CompleteImmediately),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: CacheMode) {
        *self.mode.lock() = mode;
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// 完成所有挂起的缓存请求
    pub fn complete_held(&self) -> usize {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        for (uri, completion) in &held {
            completion.completed(vec![uri.clone()]);
        }
        held.len()
    }

    /// 让所有挂起的缓存请求失败
    pub fn fail_held(&self, response_code: i32) -> usize {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        for (uri, completion) in &held {
            completion.failed(uri, response_code);
        }
        held.len()
    }
}

impl SegmentCacheGateway for SimCache {
    fn precache(&self, segment: &Segment, is_initial: bool, completion: CacheCompletion) {
        self.log.record(format!("cache.precache:{}", segment.uri));
        let mode = *self.mode.lock();
        match mode {
            CacheMode::CompleteImmediately => completion.completed(vec![segment.uri.clone()]),
            CacheMode::Fail(code) => completion.failed(&segment.uri, code),
            CacheMode::Hold => {
                if is_initial {
                    self.log.record(format!("cache.hold:{}", segment.uri));
                }
                self.held.lock().push((segment.uri.clone(), completion));
            }
        }
    }

    fn cancel(&self, uri: &str) {
        self.log.record(format!("cache.cancel:{}", uri));
    }

    fn cancel_all(&self) {
        self.log.record("cache.cancel_all");
    }

    fn cancel_in_flight_fetches(&self) {
        self.log.record("cache.cancel_in_flight");
    }
}

// ========== 清单加载器 ==========

/// 模拟清单加载器：同步回送配置的 catalog，或挂起等待测试释放
pub struct SimLoader {
    log: CallLog,
    catalog: Mutex<Option<Arc<dyn TrackCatalog>>>,
    failure: Mutex<Option<String>>,
    hold: AtomicBool,
    held: Mutex<Vec<ManifestReply>>,
}

impl SimLoader {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            catalog: Mutex::new(None),
            failure: Mutex::new(None),
            hold: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn serving(log: CallLog, catalog: Arc<dyn TrackCatalog>) -> Self {
        let loader = Self::new(log);
        loader.set_catalog(catalog);
        loader
    }

    pub fn set_catalog(&self, catalog: Arc<dyn TrackCatalog>) {
        *self.catalog.lock() = Some(catalog);
        *self.failure.lock() = None;
    }

    pub fn set_failure(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
    }

    pub fn set_hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// 按请求顺序释放挂起的加载请求
    pub fn release_held(&self) -> usize {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        let count = held.len();
        for reply in held {
            self.answer(reply);
        }
        count
    }

    fn answer(&self, reply: ManifestReply) {
        if let Some(reason) = self.failure.lock().clone() {
            reply.failed(reason);
            return;
        }
        let catalog = self.catalog.lock().clone();
        match catalog {
            Some(catalog) => reply.loaded(catalog),
            None => reply.failed("no catalog configured"),
        }
    }
}

impl ManifestLoader for SimLoader {
    fn load(&self, url: &str, reply: ManifestReply) {
        self.log.record(format!("loader.load:{}", url));
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().push(reply);
        } else {
            self.answer(reply);
        }
    }
}
