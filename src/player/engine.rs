use crate::core::{
    log_ctx, DecoderState, PlayerConfig, SeekTarget, Segment, StartupState, LIVE_EDGE_SENTINEL,
};
use crate::player::catalog::TrackCatalog;
use crate::player::command::Command;
use crate::player::decoder::DecoderProxy;
use crate::player::events::{EventDispatcher, PlayerStates};
use crate::player::io_worker::IoEvent;
use crate::player::manifest_loader::ManifestLoader;
use crate::player::persist::PersistedState;
use crate::player::render_loop::RenderLoop;
use crate::player::segment_cache::{CacheCompletion, CachePurpose, SegmentCacheGateway};
use crate::player::state::SharedState;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// 引擎依赖
pub(crate) struct EngineDeps {
    pub decoder: Arc<dyn DecoderProxy>,
    pub cache: Arc<dyn SegmentCacheGateway>,
    pub loader: Arc<dyn ManifestLoader>,
    pub dispatcher: EventDispatcher,
    pub shared: Arc<SharedState>,
    pub config: PlayerConfig,
    pub commands: Sender<Command>,
    pub io_tx: Sender<IoEvent>,
}

/// 等待解码器确认的清晰度切换
#[derive(Debug, Clone, Copy)]
pub(super) struct PendingFormatChange {
    pub quality: usize,
    pub deadline: Instant,
}

/// 播放引擎：只在命令线程上存活
///
/// 所有解码器状态变更（play / pause / stop / seek / feed）、
/// catalog 变更（音轨、重载）和轨道选择写入都在这里完成
pub(crate) struct PlaybackEngine {
    pub(super) decoder: Arc<dyn DecoderProxy>,
    pub(super) cache: Arc<dyn SegmentCacheGateway>,
    pub(super) loader: Arc<dyn ManifestLoader>,
    pub(super) dispatcher: EventDispatcher,
    pub(super) shared: Arc<SharedState>,
    pub(super) config: PlayerConfig,
    pub(super) commands: Sender<Command>,
    pub(super) io_tx: Sender<IoEvent>,

    pub(super) catalog: Option<Arc<dyn TrackCatalog>>,
    pub(super) render_loop: Option<RenderLoop>,
    /// 当前清单加载器 id（每次 set_url 递增）
    pub(super) loader_id: u64,
    pub(super) last_url: String,
    /// 起播位置（毫秒）
    pub(super) start_ms: i64,
    /// 恢复模式下保存的现场
    pub(super) restore: Option<PersistedState>,
    pub(super) pending_quality: Option<PendingFormatChange>,
    /// 等待下一个自然分片边界的软切换音轨
    pub(super) pending_soft_audio: Option<usize>,
    /// 本轮播放是否已发布 End
    pub(super) end_posted: bool,
    /// 尚未缓存成功的首个分片（失败后 play 重试用）
    pub(super) startup_segment: Option<Segment>,
}

impl PlaybackEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            decoder: deps.decoder,
            cache: deps.cache,
            loader: deps.loader,
            dispatcher: deps.dispatcher,
            shared: deps.shared,
            config: deps.config,
            commands: deps.commands,
            io_tx: deps.io_tx,
            catalog: None,
            render_loop: None,
            loader_id: 0,
            last_url: String::new(),
            start_ms: 0,
            restore: None,
            pending_quality: None,
            pending_soft_audio: None,
            end_posted: false,
            startup_segment: None,
        }
    }

    /// 执行一条命令
    pub fn handle(&mut self, command: Command) {
        debug!("{} ▶ 执行命令: {:?}", log_ctx(), command);
        match command {
            Command::SetUrl {
                url,
                session_id,
                restore,
            } => self.on_set_url(url, session_id, restore),
            Command::ManifestReady {
                session_id,
                loader_id,
                catalog,
            } => self.on_manifest_ready(session_id, loader_id, catalog),
            Command::ManifestFailed {
                session_id,
                loader_id,
                url,
                code,
                reason,
            } => self.on_manifest_failed(session_id, loader_id, &url, code, &reason),
            Command::WarmUpComplete { session_id } => self.on_warm_up_complete(session_id),
            Command::SegmentCompleted {
                session_id,
                purpose,
                uris,
            } => self.on_segment_completed(session_id, purpose, &uris),
            Command::SegmentFailed {
                session_id,
                purpose,
                uri,
                response_code,
            } => self.on_segment_failed(session_id, purpose, &uri, response_code),
            Command::Play => self.play(),
            Command::Pause(pause) => self.pause(pause),
            Command::Stop => self.stop(),
            Command::ApplySeek => self.apply_seek(),
            Command::SwitchQuality(index) => self.switch_quality(index),
            Command::StepQuality(delta) => {
                let target = (self.shared.quality() as i32).saturating_add(delta);
                self.switch_quality(target);
            }
            Command::InitiateQualityChange {
                session_id,
                quality,
            } => self.initiate_quality_change(session_id, quality),
            Command::FormatChangeComplete(quality) => self.on_format_change_complete(quality),
            Command::SwitchAudio { index, hard } => self.switch_audio(index, hard),
            Command::AudioChangeComplete(index) => self.on_audio_change_complete(index),
            Command::SwitchSubtitle(index) => self.switch_subtitle(index),
            Command::FeedNext => self.feed_next(),
            Command::FeedForTime(secs) => self.feed_for_time(secs),
            Command::SetBufferSeconds(secs) => {
                info!("{} 📦 缓冲时长设置为 {} 秒", log_ctx(), secs);
                self.config.buffer_seconds = secs;
                self.apply_buffer_target();
            }
            Command::SetStartingPoint(ms) => {
                info!("{} 📍 起播位置设置为 {}ms", log_ctx(), ms);
                self.start_ms = ms;
            }
            Command::Shutdown => self.shutdown(),
        }
    }

    /// 最近的超时截止时间（命令线程据此决定 recv 超时）
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_quality.map(|p| p.deadline)
    }

    /// 空闲醒来：检查清晰度切换是否超时
    pub fn on_tick(&mut self) {
        self.check_format_change_timeout(Instant::now());
    }

    pub(super) fn enqueue(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("{} ⚠️ 命令通道已关闭，无法入队", log_ctx());
        }
    }

    // ========== 播放控制 ==========

    pub(super) fn play(&mut self) {
        let state = self.decoder.current_state();
        if state == DecoderState::Paused {
            info!("{} ▶️ 解码器处于暂停状态，恢复播放", log_ctx());
            self.decoder.pause(false);
            self.post_pause_state();
            return;
        }

        match self.shared.startup_state() {
            StartupState::Loaded => self.initiate_play(),
            StartupState::Started => {
                debug!("{} 已经在播放，忽略重复的 play", log_ctx());
            }
            StartupState::WaitingToStart if self.catalog.is_some() => {
                if let Some(segment) = self.startup_segment.clone() {
                    info!("{} 🔁 重新请求首个分片: {}", log_ctx(), segment.uri);
                    // 丢掉上次送入的同一分片
                    self.decoder.reset();
                    self.deliver_segment(&segment, CachePurpose::Startup);
                }
                self.shared.set_startup_state(StartupState::PlayQueued);
            }
            other => {
                info!(
                    "{} ⏳ 启动尚未完成（{}），排队等待播放",
                    log_ctx(),
                    other.as_str()
                );
                self.shared.set_startup_state(StartupState::PlayQueued);
            }
        }
    }

    pub(super) fn pause(&mut self, pause: bool) {
        let state = self.decoder.current_state();
        if pause && state == DecoderState::Paused {
            debug!("{} 已经暂停，忽略", log_ctx());
            return;
        }
        if !pause && state != DecoderState::Paused {
            debug!("{} 未处于暂停状态，忽略恢复", log_ctx());
            return;
        }
        info!("{} {} 解码器", log_ctx(), if pause { "⏸️ 暂停" } else { "▶️ 恢复" });
        self.decoder.pause(pause);
        self.post_pause_state();
    }

    /// 按解码器实际状态发布 Pause / Play
    fn post_pause_state(&self) {
        match self.decoder.current_state() {
            DecoderState::Paused => self.dispatcher.post_state(PlayerStates::Pause),
            DecoderState::Playing => self.dispatcher.post_state(PlayerStates::Play),
            other => debug!("{} 暂停切换后解码器状态: {:?}", log_ctx(), other),
        }
    }

    pub(super) fn stop(&mut self) {
        if self.decoder.current_state() == DecoderState::Stopped && self.end_posted {
            debug!("{} 已经停止，忽略重复的 stop", log_ctx());
            return;
        }

        info!("{} ⏹️ 停止播放", log_ctx());
        self.cache.cancel_in_flight_fetches();
        if let Some(catalog) = &self.catalog {
            catalog.stop_reload();
        }
        self.decoder.stop();
        thread::sleep(self.config.stop_grace());
        self.dispatcher.post_state(PlayerStates::End);
        self.end_posted = true;
    }

    // ========== seek ==========

    /// 执行邮箱中最新的 seek（中间被覆盖的 seek 不会执行）
    pub(super) fn apply_seek(&mut self) {
        self.cache.cancel_all();

        let Some(pending) = self.shared.take_pending_seek() else {
            debug!("{} 没有待执行的 seek", log_ctx());
            return;
        };

        let state = self.decoder.current_state();
        if state != DecoderState::Stopped {
            self.seek_decoder(pending.target, pending.notify);
        } else if self.shared.render_running() {
            info!("{} 🔁 解码器已停止但渲染线程仍在运行，重启重载后 seek", log_ctx());
            if let Some(catalog) = &self.catalog {
                catalog.begin_reload();
            }
            self.end_posted = false;
            self.seek_decoder(pending.target, pending.notify);
        } else {
            info!(
                "{} 🚫 解码器已停止且渲染线程未运行，丢弃 seek: {:?}",
                log_ctx(),
                pending.target
            );
        }
    }

    fn seek_decoder(&self, target: SeekTarget, notify: bool) {
        info!("{} ⏩ seek 到 {:?}", log_ctx(), target);
        if notify {
            self.dispatcher.post_state(PlayerStates::Seeking);
        }
        self.decoder.seek(target.decoder_offset());
        if notify {
            self.dispatcher.post_state(PlayerStates::Seeked);
        }
    }

    // ========== 分片投递 ==========

    /// 投递分片：先 feed 再 precache
    ///
    /// 已缓存的分片可能在 precache 内同步完成，解码器必须先准备好
    pub(super) fn deliver_segment(&mut self, segment: &Segment, purpose: CachePurpose) {
        self.decoder.feed(segment);
        let completion = CacheCompletion::new(
            self.shared.session_id(),
            purpose,
            self.io_tx.clone(),
        );
        self.cache
            .precache(segment, purpose == CachePurpose::Startup, completion);
    }

    /// 解码器请求下一个分片
    pub(super) fn feed_next(&mut self) {
        let Some(catalog) = self.catalog.clone() else {
            debug!("{} catalog 未就绪，忽略分片请求", log_ctx());
            return;
        };

        match catalog.segment_after(self.shared.quality()) {
            Some(segment) => {
                self.deliver_segment(&segment, CachePurpose::ReadAhead);
                self.complete_soft_audio_switch();
            }
            None => {
                if catalog.stream_ends() {
                    info!("{} 🏁 没有更多分片", log_ctx());
                    self.shared.set_no_more_segments(true);
                } else {
                    debug!("{} 直播流暂无新分片", log_ctx());
                }
            }
        }
    }

    /// 解码器请求指定时间（秒）的分片
    pub(super) fn feed_for_time(&mut self, secs: f64) {
        let Some(catalog) = self.catalog.clone() else {
            debug!("{} catalog 未就绪，忽略分片请求", log_ctx());
            return;
        };

        let target = if secs == LIVE_EDGE_SENTINEL {
            SeekTarget::LiveEdge
        } else {
            SeekTarget::Millis((secs * 1000.0).round() as i64)
        };
        match catalog.segment_at_time(target, self.shared.quality()) {
            Some(segment) => {
                self.shared.set_no_more_segments(false);
                self.deliver_segment(&segment, CachePurpose::ReadAhead);
                self.complete_soft_audio_switch();
            }
            None => warn!("{} ⚠️ 找不到 {:?} 对应的分片", log_ctx(), target),
        }
    }

    /// 按当前清晰度的目标分片时长设置解码器缓冲分片数
    pub(super) fn apply_buffer_target(&self) {
        let Some(catalog) = &self.catalog else {
            return;
        };
        let target = catalog.target_duration_secs(self.shared.quality());
        let count = self.config.segments_to_buffer(target);
        info!(
            "{} 📦 缓冲 {} 秒，目标分片时长 {:?}，缓冲分片数 {}",
            log_ctx(),
            self.config.buffer_seconds,
            target,
            count
        );
        self.decoder.set_segment_count_to_buffer(count);
    }

    // ========== 会话拆除 ==========

    /// 停止渲染线程、停止并重置解码器、释放 catalog
    pub(super) fn stop_and_reset(&mut self) {
        if let Some(mut render_loop) = self.render_loop.take() {
            render_loop.stop();
        }
        self.decoder.stop();
        self.decoder.reset();
        if let Some(catalog) = self.catalog.take() {
            catalog.close();
        }
        self.shared.set_last_timestamp_ms(0);
        self.shared.set_no_more_segments(false);
        self.shared.set_has_subtitles(false);
        self.shared.set_duration_ms(None);
        self.pending_quality = None;
        self.pending_soft_audio = None;
        self.end_posted = false;
        self.startup_segment = None;
    }

    /// 关闭引擎（命令线程退出前调用）
    pub fn shutdown(&mut self) {
        info!("{} 🧹 关闭播放引擎", log_ctx());
        self.cache.cancel_all();
        self.cache.cancel_in_flight_fetches();
        self.decoder.stop();
        // 等渲染线程看到停止标记后再拆除资源
        thread::sleep(self.config.stop_grace());
        if let Some(mut render_loop) = self.render_loop.take() {
            render_loop.stop();
        }
        if let Some(catalog) = self.catalog.take() {
            catalog.close();
        }
        self.decoder.close();
    }
}
