use crate::core::{log_ctx, PendingSeek, SeekTarget, StartupState, TrackSelection};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// 跨线程共享的会话状态
///
/// 单写者约定：
/// - 启动状态、轨道选择、"没有更多分片"标记只在命令线程写
/// - 播放头时间戳只在渲染线程写
/// - 会话 id 只在 `set_url` 提交时递增
/// - PendingSeek 是后写覆盖的邮箱：调用方写入，命令线程取走
///
/// 其他线程一律只读（原子读取）
pub(crate) struct SharedState {
    session_id: AtomicU64,
    startup_state: AtomicU8,
    quality: AtomicUsize,
    audio: AtomicUsize,
    subtitle: AtomicUsize,
    has_subtitles: AtomicBool,
    last_timestamp_ms: AtomicI64,
    no_more_segments: AtomicBool,
    render_running: AtomicBool,
    /// 总时长（毫秒），-1 表示未知（直播）
    duration_ms: AtomicI64,
    pending_seek: Mutex<Option<PendingSeek>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            session_id: AtomicU64::new(0),
            startup_state: AtomicU8::new(StartupState::WaitingToStart as u8),
            quality: AtomicUsize::new(0),
            audio: AtomicUsize::new(0),
            subtitle: AtomicUsize::new(0),
            has_subtitles: AtomicBool::new(false),
            last_timestamp_ms: AtomicI64::new(0),
            no_more_segments: AtomicBool::new(false),
            render_running: AtomicBool::new(false),
            duration_ms: AtomicI64::new(-1),
            pending_seek: Mutex::new(None),
        }
    }

    // ========== 会话 id ==========

    pub fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::SeqCst)
    }

    /// 开始新会话，返回新的会话 id
    pub fn next_session(&self) -> u64 {
        self.session_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, session_id: u64) -> bool {
        self.session_id() == session_id
    }

    // ========== 启动状态 ==========

    pub fn startup_state(&self) -> StartupState {
        StartupState::from_u8(self.startup_state.load(Ordering::SeqCst))
    }

    pub fn set_startup_state(&self, state: StartupState) {
        let old = self.startup_state();
        info!(
            "{} 🚦 启动状态: {} -> {}",
            log_ctx(),
            old.as_str(),
            state.as_str()
        );
        self.startup_state.store(state as u8, Ordering::SeqCst);
    }

    // ========== 轨道选择 ==========

    pub fn selection(&self) -> TrackSelection {
        TrackSelection {
            quality: self.quality(),
            audio: self.audio(),
            subtitle: self.subtitle(),
        }
    }

    pub fn quality(&self) -> usize {
        self.quality.load(Ordering::SeqCst)
    }

    pub fn set_quality(&self, quality: usize) {
        self.quality.store(quality, Ordering::SeqCst);
    }

    pub fn audio(&self) -> usize {
        self.audio.load(Ordering::SeqCst)
    }

    pub fn set_audio(&self, audio: usize) {
        self.audio.store(audio, Ordering::SeqCst);
    }

    pub fn subtitle(&self) -> usize {
        self.subtitle.load(Ordering::SeqCst)
    }

    pub fn set_subtitle(&self, subtitle: usize) {
        self.subtitle.store(subtitle, Ordering::SeqCst);
    }

    pub fn has_subtitles(&self) -> bool {
        self.has_subtitles.load(Ordering::SeqCst)
    }

    pub fn set_has_subtitles(&self, value: bool) {
        self.has_subtitles.store(value, Ordering::SeqCst);
    }

    // ========== 播放头 / 流结束 ==========

    pub fn last_timestamp_ms(&self) -> i64 {
        self.last_timestamp_ms.load(Ordering::SeqCst)
    }

    pub fn set_last_timestamp_ms(&self, ms: i64) {
        self.last_timestamp_ms.store(ms, Ordering::SeqCst);
    }

    pub fn no_more_segments(&self) -> bool {
        self.no_more_segments.load(Ordering::SeqCst)
    }

    pub fn set_no_more_segments(&self, value: bool) {
        self.no_more_segments.store(value, Ordering::SeqCst);
    }

    pub fn render_running(&self) -> bool {
        self.render_running.load(Ordering::SeqCst)
    }

    pub fn set_render_running(&self, value: bool) {
        self.render_running.store(value, Ordering::SeqCst);
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match self.duration_ms.load(Ordering::SeqCst) {
            ms if ms >= 0 => Some(ms),
            _ => None,
        }
    }

    pub fn set_duration_ms(&self, duration: Option<i64>) {
        self.duration_ms
            .store(duration.unwrap_or(-1), Ordering::SeqCst);
    }

    // ========== PendingSeek 邮箱 ==========

    /// 写入 seek 请求，覆盖尚未执行的旧请求
    pub fn request_seek(&self, target: SeekTarget, notify: bool) {
        let mut pending = self.pending_seek.lock();
        if let Some(old) = pending.replace(PendingSeek { target, notify }) {
            debug!("{} 跳过旧的 seek 请求: {:?}", log_ctx(), old.target);
        }
    }

    /// 取走待执行的 seek 请求
    pub fn take_pending_seek(&self) -> Option<PendingSeek> {
        self.pending_seek.lock().take()
    }

    pub fn clear_pending_seek(&self) {
        self.pending_seek.lock().take();
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_seek_last_write_wins() {
        let shared = SharedState::new();
        shared.request_seek(SeekTarget::Millis(5000), true);
        shared.request_seek(SeekTarget::Millis(9000), false);
        let pending = shared.take_pending_seek().unwrap();
        assert_eq!(pending.target, SeekTarget::Millis(9000));
        assert!(!pending.notify);
        assert!(shared.take_pending_seek().is_none());
    }

    #[test]
    fn test_session_ids_are_monotonic() {
        let shared = SharedState::new();
        let first = shared.next_session();
        let second = shared.next_session();
        assert!(second > first);
        assert!(shared.is_current(second));
        assert!(!shared.is_current(first));
    }

    #[test]
    fn test_initial_startup_state() {
        let shared = SharedState::new();
        assert_eq!(shared.startup_state(), StartupState::WaitingToStart);
        shared.set_startup_state(StartupState::Loading);
        assert_eq!(shared.startup_state(), StartupState::Loading);
    }
}
