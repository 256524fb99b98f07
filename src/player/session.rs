use crate::core::{
    log_ctx, DecoderState, ErrorCode, PlayerConfig, Result, SeekTarget, StartupState,
    SurfaceHandle, TrackSelection,
};
use crate::player::command::{Command, CommandSerializer};
use crate::player::decoder::DecoderProxy;
use crate::player::engine::{EngineDeps, PlaybackEngine};
use crate::player::events::{
    EventDispatcher, EventKind, PlayerEvent, PresentationThread, SubscriptionId,
};
use crate::player::io_worker::IoWorker;
use crate::player::manifest_loader::ManifestLoader;
use crate::player::persist::{PersistedState, StateStore};
use crate::player::segment_cache::SegmentCacheGateway;
use crate::player::state::SharedState;
use crossbeam_channel::{unbounded, Sender};
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// 外部协作者
pub struct Collaborators {
    pub decoder: Arc<dyn DecoderProxy>,
    pub cache: Arc<dyn SegmentCacheGateway>,
    pub loader: Arc<dyn ManifestLoader>,
}

/// 播放会话（宿主持有的唯一控制器）
///
/// 职责：
/// - 对外提供命令接口，命令全部提交给命令线程按顺序执行
/// - 对外提供查询接口（原子读取共享状态）
/// - 持有命令线程、IO 线程，管理整个会话的生命周期
///
/// 线程模型：
/// - 展示线程：宿主调用 `dispatch_pending` 的线程（或 `spawn_presentation_thread`）
/// - 命令线程：PlaybackEngine
/// - IO 线程：校验回调会话 id
/// - 渲染线程：起播准备完成后由引擎启动
pub struct PlaybackSession {
    shared: Arc<SharedState>,
    dispatcher: EventDispatcher,
    decoder: Arc<dyn DecoderProxy>,
    cache: Arc<dyn SegmentCacheGateway>,
    command_tx: Sender<Command>,
    command_thread: Option<CommandSerializer>,
    io_worker: Option<IoWorker>,
    last_url: Mutex<Option<String>>,
}

impl PlaybackSession {
    pub fn new(collaborators: Collaborators, config: PlayerConfig) -> Result<Self> {
        info!("{} 🎬 创建播放会话: {:?}", log_ctx(), config);

        let Collaborators {
            decoder,
            cache,
            loader,
        } = collaborators;

        let shared = Arc::new(SharedState::new());
        let dispatcher = EventDispatcher::new(decoder.clone());
        let (command_tx, command_rx) = unbounded();

        let io_worker = IoWorker::start(shared.clone(), command_tx.clone())?;
        let engine = PlaybackEngine::new(EngineDeps {
            decoder: decoder.clone(),
            cache: cache.clone(),
            loader,
            dispatcher: dispatcher.clone(),
            shared: shared.clone(),
            config,
            commands: command_tx.clone(),
            io_tx: io_worker.sender(),
        });
        let command_thread = CommandSerializer::start(engine, command_tx.clone(), command_rx)?;

        Ok(Self {
            shared,
            dispatcher,
            decoder,
            cache,
            command_tx,
            command_thread: Some(command_thread),
            io_worker: Some(io_worker),
            last_url: Mutex::new(None),
        })
    }

    fn send(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            warn!("{} ⚠️ 命令线程已退出，命令被丢弃", log_ctx());
        }
    }

    // ========== 命令 ==========

    /// 设置播放地址，开始新会话（旧会话的所有回调从此刻起作废）
    pub fn set_url(&self, url: impl Into<String>) -> u64 {
        self.start_session(url.into(), None)
    }

    fn start_session(&self, url: String, restore: Option<PersistedState>) -> u64 {
        let session_id = self.shared.next_session();
        info!("{} 🔗 新会话 {}: {}", log_ctx(), session_id, url);
        *self.last_url.lock() = Some(url.clone());
        self.send(Command::SetUrl {
            url,
            session_id,
            restore,
        });
        session_id
    }

    pub fn play(&self) {
        self.send(Command::Play);
    }

    pub fn pause(&self) {
        self.send(Command::Pause(true));
    }

    pub fn set_paused(&self, paused: bool) {
        self.send(Command::Pause(paused));
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// seek 到指定毫秒位置（发布 Seeking / Seeked）
    pub fn seek(&self, ms: i64) {
        self.seek_to(SeekTarget::Millis(ms), true);
    }

    /// seek：取消所有缓存请求，写入 PendingSeek 邮箱，排入执行步骤
    ///
    /// 执行前再次 seek 会覆盖这一次，只有最后一次会真正执行
    pub fn seek_to(&self, target: SeekTarget, notify: bool) {
        self.cache.cancel_all();
        self.shared.request_seek(target, notify);
        self.send(Command::ApplySeek);
    }

    /// 跳到直播边缘
    pub fn go_to_live(&self) {
        self.seek_to(SeekTarget::LiveEdge, false);
    }

    /// 在当前播放头位置重新 seek（刷新解码管线）
    pub fn seek_to_current_position(&self) {
        self.seek_to(SeekTarget::Millis(self.shared.last_timestamp_ms()), false);
    }

    pub fn switch_quality(&self, index: i32) {
        self.send(Command::SwitchQuality(index));
    }

    pub fn increment_quality(&self) {
        self.send(Command::StepQuality(1));
    }

    pub fn decrement_quality(&self) {
        self.send(Command::StepQuality(-1));
    }

    pub fn switch_audio(&self, index: i32, hard: bool) {
        self.send(Command::SwitchAudio { index, hard });
    }

    pub fn hard_switch_audio(&self, index: i32) {
        self.switch_audio(index, true);
    }

    pub fn soft_switch_audio(&self, index: i32) {
        self.switch_audio(index, false);
    }

    pub fn switch_subtitle(&self, index: i32) {
        self.send(Command::SwitchSubtitle(index));
    }

    pub fn set_buffer_seconds(&self, seconds: u32) {
        self.send(Command::SetBufferSeconds(seconds));
    }

    /// 设置下一次起播的位置（毫秒）
    pub fn set_starting_point(&self, ms: i64) {
        self.send(Command::SetStartingPoint(ms));
    }

    // ========== 展示层 ==========

    /// 绑定渲染表面（在展示线程上调用解码器）
    pub fn bind_surface(&self, surface: SurfaceHandle) {
        self.dispatcher.post_bind_surface(surface);
    }

    /// 视频分辨率变化（由宿主 / 解码器回调上报）
    pub fn set_video_resolution(&self, width: u32, height: u32) {
        info!("{} 📐 视频分辨率: {}x{}", log_ctx(), width, height);
        self.dispatcher
            .post(PlayerEvent::VideoResolution { width, height });
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(listener)
    }

    pub fn subscribe_kind<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_kind(kind, listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// 在展示线程上分发所有待处理事件
    pub fn dispatch_pending(&self) -> usize {
        self.dispatcher.dispatch_pending()
    }

    pub fn dispatch_for(&self, timeout: Duration) -> usize {
        self.dispatcher.dispatch_for(timeout)
    }

    pub fn spawn_presentation_thread(&self) -> std::io::Result<PresentationThread> {
        self.dispatcher.spawn_presentation_thread()
    }

    /// 解码器上行回调句柄
    pub fn native_callbacks(&self) -> NativeCallbacks {
        NativeCallbacks {
            commands: self.command_tx.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }

    // ========== 查询 ==========

    pub fn session_id(&self) -> u64 {
        self.shared.session_id()
    }

    pub fn startup_state(&self) -> StartupState {
        self.shared.startup_state()
    }

    pub fn decoder_state(&self) -> DecoderState {
        self.decoder.current_state()
    }

    pub fn is_playing(&self) -> bool {
        self.decoder.current_state() == DecoderState::Playing
    }

    pub fn current_position_ms(&self) -> i64 {
        self.shared.last_timestamp_ms()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.shared.duration_ms()
    }

    pub fn track_selection(&self) -> TrackSelection {
        self.shared.selection()
    }

    pub fn current_quality_index(&self) -> usize {
        self.shared.quality()
    }

    pub fn current_audio_index(&self) -> usize {
        self.shared.audio()
    }

    pub fn current_subtitle_index(&self) -> usize {
        self.shared.subtitle()
    }

    pub fn dropped_frames_per_second(&self) -> f32 {
        self.decoder.dropped_frames_per_second()
    }

    pub fn last_transfer_rate(&self) -> f32 {
        self.cache.last_transfer_rate()
    }

    pub fn buffer_percentage(&self) -> f32 {
        self.cache.buffer_percentage()
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_url.lock().clone()
    }

    // ========== 生命周期 ==========

    /// 当前播放现场
    pub fn snapshot(&self) -> Option<PersistedState> {
        let last_url = self.last_url()?;
        Some(PersistedState {
            last_url,
            decoder_state: self.decoder.current_state(),
            startup_state: self.shared.startup_state(),
            start_ms: self.shared.last_timestamp_ms(),
            quality: self.shared.quality(),
            audio_track: self.shared.audio(),
            subtitle_track: self.shared.subtitle(),
        })
    }

    /// 保存播放现场并关闭会话
    pub fn release(&mut self, store: &dyn StateStore) -> Result<()> {
        let saved = match self.snapshot() {
            Some(state) => store.save(&state),
            None => {
                info!("{} 没有设置过播放地址，跳过保存", log_ctx());
                Ok(())
            }
        };
        self.close();
        saved
    }

    /// 读取播放现场，满足条件时以恢复模式重新起播
    pub fn recover(&self, store: &dyn StateStore) -> Result<bool> {
        let Some(state) = store.load()? else {
            return Ok(false);
        };
        if !state.is_restorable() {
            info!("{} 播放现场不需要恢复: {:?}", log_ctx(), state);
            return Ok(false);
        }

        info!(
            "{} ♻️ 恢复播放: {} @ {}ms",
            log_ctx(),
            state.last_url,
            state.start_ms
        );
        let url = state.last_url.clone();
        self.start_session(url, Some(state));
        self.play();
        Ok(true)
    }

    /// 关闭会话：停止渲染线程、关闭解码器、停止 catalog 重载，退出命令线程和 IO 线程
    pub fn close(&mut self) {
        if self.command_thread.is_none() && self.io_worker.is_none() {
            return;
        }
        info!("{} 🧹 关闭播放会话", log_ctx());
        // 让所有旧回调作废
        self.shared.next_session();
        if let Some(mut command_thread) = self.command_thread.take() {
            command_thread.stop();
        }
        if let Some(mut io_worker) = self.io_worker.take() {
            io_worker.stop();
        }
        // 分发剩余事件（例如 End）
        self.dispatcher.dispatch_pending();
    }

    pub fn is_closed(&self) -> bool {
        self.command_thread.is_none()
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!("{} ⚠ PlaybackSession 被 drop，但未调用 close()，正在关闭", log_ctx());
            self.close();
        }
    }
}

/// 解码器上行回调句柄（可克隆，任意线程调用）
#[derive(Clone)]
pub struct NativeCallbacks {
    commands: Sender<Command>,
    dispatcher: EventDispatcher,
}

impl NativeCallbacks {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("{} ⚠️ 命令线程已退出，丢弃解码器回调", log_ctx());
        }
    }

    /// 解码器请求下一个分片
    pub fn request_next_segment(&self) {
        self.send(Command::FeedNext);
    }

    /// 解码器请求指定时间（秒）的分片
    pub fn request_segment_for_time(&self, secs: f64) {
        self.send(Command::FeedForTime(secs));
    }

    pub fn notify_format_change_complete(&self, quality: usize) {
        self.send(Command::FormatChangeComplete(quality));
    }

    pub fn notify_audio_track_change_complete(&self, index: usize) {
        self.send(Command::AudioChangeComplete(index));
    }

    /// 解码器上报错误
    pub fn post_native_error(&self, code: i32, fatal: bool, message: impl Into<String>) {
        let code = ErrorCode::from_native(code);
        if fatal {
            self.dispatcher.post_fatal_error(code, message);
        } else {
            self.dispatcher.post_error(code, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SubtitleCue, FRAME_DISCONTINUITY};
    use crate::player::events::PlayerStates;
    use crate::player::persist::MemoryStateStore;
    use crate::player::sim::{
        CacheMode, CallLog, SimCache, SimCatalog, SimDecoder, SimLoader, SimStep,
    };
    use std::time::Instant;

    struct Fixture {
        session: PlaybackSession,
        log: CallLog,
        decoder: Arc<SimDecoder>,
        cache: Arc<SimCache>,
        loader: Arc<SimLoader>,
        events: Arc<Mutex<Vec<PlayerEvent>>>,
    }

    impl Fixture {
        fn new(catalog: impl FnOnce(CallLog) -> SimCatalog) -> Self {
            let log = CallLog::default();
            let decoder = Arc::new(SimDecoder::new(log.clone()));
            let cache = Arc::new(SimCache::new(log.clone()));
            let loader = Arc::new(SimLoader::serving(
                log.clone(),
                Arc::new(catalog(log.clone())),
            ));
            let config = PlayerConfig {
                stop_grace_ms: 0,
                idle_backoff_ms: 5,
                ..PlayerConfig::default()
            };
            let session = PlaybackSession::new(
                Collaborators {
                    decoder: decoder.clone(),
                    cache: cache.clone(),
                    loader: loader.clone(),
                },
                config,
            )
            .unwrap();
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            session.subscribe(move |e| sink.lock().push(e.clone()));
            Self {
                session,
                log,
                decoder,
                cache,
                loader,
                events,
            }
        }

        /// 在当前线程上分发事件，直到条件满足或超时
        fn pump_until(&self, what: &str, cond: impl Fn(&[PlayerEvent], &SimDecoder) -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                self.session.dispatch_for(Duration::from_millis(10));
                if cond(&self.events.lock(), &self.decoder) {
                    return;
                }
                assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            }
        }

        fn states(&self) -> Vec<PlayerStates> {
            self.events
                .lock()
                .iter()
                .filter_map(|e| match e {
                    PlayerEvent::StateChanged(s) => Some(*s),
                    _ => None,
                })
                .collect()
        }
    }

    fn has_state(events: &[PlayerEvent], state: PlayerStates) -> bool {
        events.contains(&PlayerEvent::StateChanged(state))
    }

    #[test]
    fn test_scenario_load_then_play() {
        let mut f = Fixture::new(|log| SimCatalog::vod(log, 3, 10.0));
        f.session.set_url("https://x/master.m3u8");
        f.pump_until("Start", |e, _| has_state(e, PlayerStates::Start));
        let deadline = Instant::now() + Duration::from_secs(5);
        while f.session.startup_state() != StartupState::Loaded {
            assert!(Instant::now() < deadline, "startup never reached Loaded");
            std::thread::sleep(Duration::from_millis(5));
        }

        {
            let events = f.events.lock();
            let load = events
                .iter()
                .position(|e| *e == PlayerEvent::StateChanged(PlayerStates::Load))
                .unwrap();
            let lists = events
                .iter()
                .position(|e| matches!(e, PlayerEvent::QualityTracksList { .. }))
                .unwrap();
            let start = events
                .iter()
                .position(|e| *e == PlayerEvent::StateChanged(PlayerStates::Start))
                .unwrap();
            assert!(load < lists && lists < start);
        }
        assert_eq!(f.decoder.current_state(), DecoderState::Stopped);

        f.session.play();
        f.pump_until("Play", |e, _| has_state(e, PlayerStates::Play));
        assert_eq!(f.decoder.current_state(), DecoderState::Playing);
        assert_eq!(f.session.startup_state(), StartupState::Started);
        assert!(f.session.is_playing());
        f.session.close();
    }

    #[test]
    fn test_scenario_play_while_loading_auto_starts() {
        let mut f = Fixture::new(|log| SimCatalog::vod(log, 3, 10.0));
        f.cache.set_mode(CacheMode::Hold);
        f.session.set_url("https://x/master.m3u8");
        f.session.play();

        let deadline = Instant::now() + Duration::from_secs(5);
        while f.cache.held_count() == 0 || f.session.startup_state() != StartupState::PlayQueued
        {
            assert!(Instant::now() < deadline, "play was never queued");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!f.log.contains_prefix("decoder.play"));

        f.cache.complete_held();
        f.pump_until("Play", |e, _| has_state(e, PlayerStates::Play));
        assert!(f.log.contains("decoder.play:0.000"));
        assert_eq!(f.session.startup_state(), StartupState::Started);
        f.session.close();
    }

    #[test]
    fn test_scenario_discontinuity_schedules_one_format_change() {
        let mut f = Fixture::new(|log| SimCatalog::vod(log, 3, 10.0));
        f.session.set_url("https://x/master.m3u8");
        f.pump_until("Start", |e, _| has_state(e, PlayerStates::Start));
        // set_url 会重置解码器脚本，所以在启动完成后再写入
        f.decoder.push_steps([
            SimStep::Code(40),
            SimStep::Fail,
            SimStep::Code(FRAME_DISCONTINUITY),
        ]);
        f.session.play();

        f.pump_until("format change", |_, d| d.format_change_count() >= 1);
        let steps = f.decoder.step_count();
        f.pump_until("more steps", |_, d| d.step_count() > steps + 2);
        assert_eq!(f.decoder.format_change_count(), 1);
        f.session.close();
    }

    #[test]
    fn test_stale_manifest_is_ignored() {
        let mut f = Fixture::new(|log| SimCatalog::vod(log, 3, 10.0));
        f.loader.set_hold(true);
        f.session.set_url("https://x/first.m3u8");
        let deadline = Instant::now() + Duration::from_secs(5);
        while f.loader.held_count() < 1 {
            assert!(Instant::now() < deadline, "first load never issued");
            std::thread::sleep(Duration::from_millis(5));
        }
        let second = f.session.set_url("https://x/second.m3u8");
        while f.loader.held_count() < 2 {
            assert!(Instant::now() < deadline, "loads never issued");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(f.loader.release_held(), 2);
        f.pump_until("Start", |e, _| has_state(e, PlayerStates::Start));

        assert_eq!(f.session.session_id(), second);
        assert_eq!(f.log.count_prefix("catalog.warm_up"), 1);
        assert_eq!(f.log.count_prefix("decoder.feed"), 1);
        f.session.close();
    }

    #[test]
    fn test_manifest_failure_is_fatal() {
        let mut f = Fixture::new(|log| SimCatalog::vod(log, 3, 10.0));
        f.loader.set_failure("HTTP 404");
        f.session.set_url("https://x/missing.m3u8");
        f.pump_until("error", |e, _| {
            e.iter().any(|e| {
                matches!(
                    e,
                    PlayerEvent::Error {
                        code: ErrorCode::Io,
                        fatal: true,
                        ..
                    }
                )
            })
        });
        assert!(!f.log.contains_prefix("decoder.feed"));
        f.session.close();
    }

    #[test]
    fn test_stop_twice_posts_one_end() {
        let mut f = Fixture::new(|log| SimCatalog::vod(log, 3, 10.0));
        f.session.set_url("https://x/master.m3u8");
        f.session.play();
        f.pump_until("Play", |e, _| has_state(e, PlayerStates::Play));

        f.session.stop();
        f.session.stop();
        f.pump_until("End", |e, _| has_state(e, PlayerStates::End));
        // 第二个 stop 已执行完
        f.session.close();
        let ends = f
            .states()
            .into_iter()
            .filter(|s| *s == PlayerStates::End)
            .count();
        assert_eq!(ends, 1);
        assert_eq!(f.decoder.current_state(), DecoderState::Stopped);
    }

    #[test]
    fn test_subtitle_cues_are_published() {
        let mut f = Fixture::new(|log| {
            SimCatalog::vod(log, 3, 10.0)
                .with_subtitles(vec!["en".to_string()], Some(0))
                .with_cue(
                    0,
                    SubtitleCue {
                        start_time: 0.0,
                        duration: 2.0,
                        alignment: "center".to_string(),
                        text: "hello".to_string(),
                    },
                )
        });
        f.session.set_url("https://x/master.m3u8");
        f.session.play();
        f.pump_until("cue", |e, _| {
            e.iter()
                .any(|e| matches!(e, PlayerEvent::SubtitleText(cue) if cue.text == "hello"))
        });
        f.session.close();
    }

    #[test]
    fn test_native_callbacks_feed_and_error() {
        let mut f = Fixture::new(|log| SimCatalog::vod(log, 3, 10.0));
        f.session.set_url("https://x/master.m3u8");
        f.pump_until("Start", |e, _| has_state(e, PlayerStates::Start));

        let native = f.session.native_callbacks();
        native.request_next_segment();
        native.post_native_error(-1007, false, "decoder hiccup");
        f.pump_until("error", |e, _| {
            e.iter().any(|e| {
                matches!(
                    e,
                    PlayerEvent::Error {
                        code: ErrorCode::Decode,
                        fatal: false,
                        ..
                    }
                )
            })
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f.log.contains("decoder.feed:q0/seg1.ts") {
            assert!(Instant::now() < deadline, "next segment never fed");
            std::thread::sleep(Duration::from_millis(5));
        }
        f.session.close();
    }

    #[test]
    fn test_release_and_recover() {
        let store = MemoryStateStore::new();
        {
            let mut f = Fixture::new(|log| SimCatalog::vod(log, 5, 10.0));
            f.session.set_url("https://x/master.m3u8");
            f.session.play();
            f.pump_until("playhead", |e, _| {
                e.iter()
                    .any(|e| matches!(e, PlayerEvent::PlayheadUpdate(ms) if *ms > 0))
            });
            f.session.release(&store).unwrap();
            assert!(f.session.is_closed());
        }

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.last_url, "https://x/master.m3u8");
        assert_eq!(saved.startup_state, StartupState::Started);

        let mut f = Fixture::new(|log| SimCatalog::vod(log, 5, 10.0));
        assert!(f.session.recover(&store).unwrap());
        f.pump_until("Play", |e, _| has_state(e, PlayerStates::Play));
        assert!(f.log.contains("loader.load:https://x/master.m3u8"));
        f.session.close();
    }

    #[test]
    fn test_bind_surface_runs_on_presentation_pump() {
        let mut f = Fixture::new(|log| SimCatalog::vod(log, 3, 10.0));
        f.session.bind_surface(SurfaceHandle(7));
        assert!(!f.log.contains("decoder.bind_surface:7"));
        f.session.dispatch_pending();
        assert!(f.log.contains("decoder.bind_surface:7"));

        f.session.set_video_resolution(1280, 720);
        f.session.dispatch_pending();
        assert!(f.events.lock().contains(&PlayerEvent::VideoResolution {
            width: 1280,
            height: 720
        }));
        f.session.close();
    }
}
