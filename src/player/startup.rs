use crate::core::{log_ctx, DecoderState, ErrorCode, SeekTarget, StartupState};
use crate::player::catalog::TrackCatalog;
use crate::player::command::Command;
use crate::player::engine::PlaybackEngine;
use crate::player::events::{PlayerEvent, PlayerStates};
use crate::player::io_worker::IoEvent;
use crate::player::manifest_loader::ManifestReply;
use crate::player::persist::PersistedState;
use crate::player::render_loop::{RenderContext, RenderLoop};
use crate::player::segment_cache::CachePurpose;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread;

/// 启动流程：set_url -> 清单就绪 -> 预热 -> 首个分片缓存完成 -> 起播
impl PlaybackEngine {
    pub(super) fn on_set_url(
        &mut self,
        url: String,
        session_id: u64,
        restore: Option<PersistedState>,
    ) {
        if !self.shared.is_current(session_id) {
            debug!(
                "{} 跳过被新地址覆盖的 set_url: {} (session={})",
                log_ctx(),
                url,
                session_id
            );
            return;
        }

        info!("{} 🎬 设置播放地址: {} (session={})", log_ctx(), url, session_id);

        // 旧加载器的结果全部作废
        self.loader_id += 1;
        self.cache.cancel_all();
        self.cache.cancel_in_flight_fetches();
        self.shared.clear_pending_seek();
        self.stop_and_reset();

        self.restore = restore;
        if let Some(saved) = &self.restore {
            info!(
                "{} ♻️ 恢复模式: 位置 {}ms，清晰度 {}，音轨 {}，字幕 {}",
                log_ctx(),
                saved.start_ms,
                saved.quality,
                saved.audio_track,
                saved.subtitle_track
            );
            self.start_ms = saved.start_ms;
        }

        self.dispatcher.post_state(PlayerStates::Load);
        self.shared.set_startup_state(StartupState::WaitingToStart);
        self.shared.set_startup_state(StartupState::Loading);

        self.last_url = url.clone();
        let reply = ManifestReply::new(session_id, self.loader_id, url.clone(), self.io_tx.clone());
        self.loader.load(&url, reply);
    }

    fn is_stale(&self, session_id: u64, loader_id: Option<u64>) -> bool {
        let stale_loader = loader_id.map_or(false, |id| id != self.loader_id);
        if !self.shared.is_current(session_id) || stale_loader {
            debug!(
                "{} 丢弃过期回调 (session={}, 当前={}, loader={:?}, 当前 loader={})",
                log_ctx(),
                session_id,
                self.shared.session_id(),
                loader_id,
                self.loader_id
            );
            return true;
        }
        false
    }

    pub(super) fn on_manifest_ready(
        &mut self,
        session_id: u64,
        loader_id: u64,
        catalog: Arc<dyn TrackCatalog>,
    ) {
        if self.is_stale(session_id, Some(loader_id)) {
            return;
        }

        if !catalog.has_segments() {
            error!("{} ❌ 清单中没有可播放的分片: {}", log_ctx(), self.last_url);
            self.dispatcher
                .post_fatal_error(ErrorCode::NotValid, "No Valid Manifest");
            return;
        }

        info!(
            "{} 📜 清单就绪：{} 个清晰度，{}",
            log_ctx(),
            catalog.quality_level_count(),
            if catalog.stream_ends() { "点播" } else { "直播" }
        );
        self.shared.set_no_more_segments(false);
        self.catalog = Some(catalog.clone());
        self.apply_buffer_target();

        // 预热可能阻塞，放到独立线程，完成后经 IO 线程回到命令线程
        let shared = self.shared.clone();
        let io_tx = self.io_tx.clone();
        let spawned = thread::Builder::new()
            .name("catalog-warmup".to_string())
            .spawn(move || {
                if !shared.is_current(session_id) {
                    debug!("{} 会话已切换，跳过预热", log_ctx());
                    return;
                }
                catalog.warm_up();
                if io_tx.send(IoEvent::WarmUpComplete { session_id }).is_err() {
                    debug!("{} IO 线程已退出，丢弃预热结果", log_ctx());
                }
            });
        if let Err(e) = spawned {
            error!("{} ❌ 创建预热线程失败: {}", log_ctx(), e);
            self.dispatcher
                .post_fatal_error(ErrorCode::Io, format!("warm-up thread: {}", e));
        }
    }

    pub(super) fn on_manifest_failed(
        &mut self,
        session_id: u64,
        loader_id: u64,
        url: &str,
        code: ErrorCode,
        reason: &str,
    ) {
        if self.is_stale(session_id, Some(loader_id)) {
            return;
        }
        error!("{} ❌ 清单加载失败: {} - {} ({:?})", log_ctx(), url, reason, code);
        self.dispatcher
            .post_fatal_error(code, format!("{}: {}", url, reason));
    }

    /// 预热完成：确定初始轨道，送入首个分片，启动渲染线程
    pub(super) fn on_warm_up_complete(&mut self, session_id: u64) {
        if self.is_stale(session_id, None) {
            return;
        }
        let Some(catalog) = self.catalog.clone() else {
            warn!("{} ⚠️ 预热完成但 catalog 已释放", log_ctx());
            return;
        };

        let quality_count = catalog.quality_level_count();
        let subtitles = catalog.subtitle_language_list();
        let audio_tracks = catalog.audio_variant_list();

        let mut quality = 0;
        let mut subtitle = catalog.subtitle_default_index().unwrap_or(0);
        let mut audio = catalog.audio_default_index().unwrap_or(0);
        let mut start = SeekTarget::LiveEdge;

        if let Some(saved) = self.restore.clone() {
            if saved.audio_track < audio_tracks.len() {
                audio = saved.audio_track;
                catalog.set_audio_variant(audio);
            }
            if saved.quality < quality_count {
                quality = saved.quality;
            }
            if saved.subtitle_track < subtitles.len() {
                subtitle = saved.subtitle_track;
            }
            if catalog.stream_ends() {
                start = SeekTarget::Millis(saved.start_ms);
            } else {
                // 直播从直播边缘恢复
                self.start_ms = 0;
            }
        }

        self.shared.set_quality(quality);
        self.shared.set_audio(audio);
        self.shared.set_subtitle(subtitle);
        self.shared.set_has_subtitles(!subtitles.is_empty());

        let Some(segment) = catalog.segment_at_time(start, quality) else {
            error!("{} ❌ 找不到起播分片: {:?}", log_ctx(), start);
            self.dispatcher
                .post_fatal_error(ErrorCode::NotValid, "Segment not found for start time");
            return;
        };

        // 轨道列表：没有字幕 / 音轨时也发空列表，覆盖上一个流留下的列表
        let has_subtitles = !subtitles.is_empty();
        self.dispatcher.post(PlayerEvent::SubtitleTracksList {
            languages: subtitles,
            default_index: catalog.subtitle_default_index().filter(|_| has_subtitles),
        });
        if has_subtitles {
            self.dispatcher.post(PlayerEvent::SubtitleTrackChanged(subtitle));
            catalog.precache_subtitles_at(segment.start_time, subtitle);
        }
        let has_audio = !audio_tracks.is_empty();
        self.dispatcher.post(PlayerEvent::AudioTracksList {
            tracks: audio_tracks,
            default_index: catalog.audio_default_index().filter(|_| has_audio),
        });
        self.dispatcher.post(PlayerEvent::QualityTracksList {
            tracks: catalog.quality_tracks(),
            default_index: Some(quality),
        });

        info!(
            "{} 🚀 初始分片: {} (清晰度 {}, era {})",
            log_ctx(),
            segment.uri,
            segment.quality,
            segment.continuity_era
        );
        self.startup_segment = Some(segment.clone());
        self.deliver_segment(&segment, CachePurpose::Startup);

        if let Some(variant) = segment.alt_audio_variant() {
            self.dispatcher.post(PlayerEvent::AudioSwitchStart {
                old: None,
                new: variant,
            });
            self.dispatcher.post(PlayerEvent::AudioSwitchEnd(variant));
        }

        self.start_render_loop(catalog.clone());

        let duration = catalog.duration_ms();
        self.shared.set_duration_ms(duration);
        self.dispatcher.post(PlayerEvent::DurationChanged(duration));
    }

    fn start_render_loop(&mut self, catalog: Arc<dyn TrackCatalog>) {
        if self.render_loop.is_some() {
            return;
        }
        let ctx = RenderContext {
            shared: self.shared.clone(),
            decoder: self.decoder.clone(),
            catalog,
            dispatcher: self.dispatcher.clone(),
            commands: self.commands.clone(),
            idle_backoff: self.config.idle_backoff(),
        };
        match RenderLoop::start(ctx) {
            Ok(render_loop) => self.render_loop = Some(render_loop),
            Err(e) => {
                error!("{} ❌ 启动渲染线程失败: {}", log_ctx(), e);
                self.dispatcher
                    .post_fatal_error(ErrorCode::Decode, format!("render loop: {}", e));
            }
        }
    }

    pub(super) fn on_segment_completed(
        &mut self,
        session_id: u64,
        purpose: CachePurpose,
        uris: &[String],
    ) {
        if self.is_stale(session_id, None) {
            return;
        }
        if purpose == CachePurpose::ReadAhead {
            debug!("{} 预读分片缓存完成: {:?}", log_ctx(), uris);
            return;
        }

        let Some(uri) = uris.first() else {
            warn!("{} ⚠️ 首个分片完成回调没有 uri", log_ctx());
            return;
        };
        info!("{} ✅ 首个分片缓存完成: {}", log_ctx(), uri);
        self.startup_segment = None;
        self.cache.cancel(uri);
        self.dispatcher.post_state(PlayerStates::Start);

        if self.shared.startup_state() == StartupState::PlayQueued {
            self.initiate_play();
        } else {
            self.shared.set_startup_state(StartupState::Loaded);
        }
    }

    pub(super) fn on_segment_failed(
        &mut self,
        session_id: u64,
        purpose: CachePurpose,
        uri: &str,
        response_code: i32,
    ) {
        if self.is_stale(session_id, None) {
            return;
        }
        match purpose {
            CachePurpose::Startup => {
                warn!(
                    "{} ⚠️ 首个分片缓存失败: {} (code={})",
                    log_ctx(),
                    uri,
                    response_code
                );
                self.cache.cancel(uri);
                self.shared.set_startup_state(StartupState::WaitingToStart);
            }
            CachePurpose::ReadAhead => {
                warn!(
                    "{} ⚠️ 预读分片缓存失败: {} (code={})",
                    log_ctx(),
                    uri,
                    response_code
                );
                self.dispatcher.post_error(
                    ErrorCode::SegmentFetch,
                    format!("{} ({})", uri, response_code),
                );
            }
        }
    }

    /// 起播：解码器开始播放，必要时 seek 到起播位置，恢复模式下还原暂停状态
    pub(super) fn initiate_play(&mut self) {
        let Some(catalog) = self.catalog.clone() else {
            info!("{} catalog 为空，放弃起播", log_ctx());
            return;
        };

        info!("{} ▶️ 起播 (起始位置 {}ms)", log_ctx(), self.start_ms);
        self.shared.set_startup_state(StartupState::Started);
        self.end_posted = false;
        catalog.begin_reload();
        self.decoder.play(self.start_ms as f64 / 1000.0);

        if self.start_ms != 0 {
            self.shared
                .request_seek(SeekTarget::Millis(self.start_ms), false);
            self.enqueue(Command::ApplySeek);
        }
        self.dispatcher.post_state(PlayerStates::Play);

        if let Some(saved) = self.restore.take() {
            if saved.decoder_state == DecoderState::Paused {
                self.enqueue(Command::Pause(true));
            }
            self.start_ms = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{DecoderState, ErrorCode, StartupState};
    use crate::player::command::Command;
    use crate::player::decoder::DecoderProxy;
    use crate::player::engine::tests::Harness;
    use crate::player::events::{PlayerEvent, PlayerStates};
    use crate::player::persist::PersistedState;
    use crate::player::segment_cache::CachePurpose;
    use crate::player::sim::{CacheMode, SimCatalog};
    use std::sync::Arc;

    #[test]
    fn test_feed_precedes_precache_for_initial_segment() {
        let mut h = Harness::new();
        h.load(SimCatalog::vod(h.log.clone(), 3, 10.0));

        let feed = h.log.position("decoder.feed:q0/seg0.ts").unwrap();
        let precache = h.log.position("cache.precache:q0/seg0.ts").unwrap();
        assert!(feed < precache);
        h.engine.shutdown();
    }

    #[test]
    fn test_empty_catalog_is_fatal() {
        let mut h = Harness::new();
        let session_id = h.shared.next_session();
        h.engine.handle(Command::ManifestReady {
            session_id,
            loader_id: 0,
            catalog: Arc::new(SimCatalog::vod(h.log.clone(), 0, 10.0)),
        });

        let events = h.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            PlayerEvent::Error {
                code: ErrorCode::NotValid,
                fatal: true,
                ..
            }
        ));
        assert!(!h.log.contains_prefix("decoder.feed"));
    }

    #[test]
    fn test_stale_completion_does_not_touch_state() {
        let mut h = Harness::new();
        h.load(SimCatalog::vod(h.log.clone(), 3, 10.0));
        let stale = h.shared.session_id();
        h.shared.next_session();
        h.shared.set_startup_state(StartupState::Loading);

        h.engine.handle(Command::SegmentCompleted {
            session_id: stale,
            purpose: CachePurpose::Startup,
            uris: vec!["q0/seg0.ts".to_string()],
        });
        assert_eq!(h.shared.startup_state(), StartupState::Loading);
        h.engine.shutdown();
    }

    #[test]
    fn test_startup_completion_then_play() {
        let mut h = Harness::new();
        h.load(SimCatalog::vod(h.log.clone(), 3, 10.0));
        let session_id = h.shared.session_id();

        h.engine.handle(Command::SegmentCompleted {
            session_id,
            purpose: CachePurpose::Startup,
            uris: vec!["q0/seg0.ts".to_string()],
        });
        assert_eq!(h.shared.startup_state(), StartupState::Loaded);
        assert!(h.log.contains("cache.cancel:q0/seg0.ts"));

        h.engine.handle(Command::Play);
        assert_eq!(h.shared.startup_state(), StartupState::Started);
        assert_eq!(h.decoder.current_state(), DecoderState::Playing);

        let states: Vec<PlayerEvent> = h
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, PlayerEvent::StateChanged(_)))
            .collect();
        assert_eq!(
            states,
            vec![
                PlayerEvent::StateChanged(PlayerStates::Start),
                PlayerEvent::StateChanged(PlayerStates::Play),
            ]
        );
        h.engine.shutdown();
    }

    #[test]
    fn test_startup_failure_reverts_state() {
        let mut h = Harness::new();
        h.load(SimCatalog::vod(h.log.clone(), 3, 10.0));
        h.shared.set_startup_state(StartupState::PlayQueued);
        let session_id = h.shared.session_id();

        h.engine.handle(Command::SegmentFailed {
            session_id,
            purpose: CachePurpose::Startup,
            uri: "q0/seg0.ts".to_string(),
            response_code: 503,
        });
        assert_eq!(h.shared.startup_state(), StartupState::WaitingToStart);
        assert!(!h.log.contains_prefix("decoder.play"));
        h.engine.shutdown();
    }

    #[test]
    fn test_restore_starts_at_saved_position_and_repauses() {
        let mut h = Harness::new();
        h.engine.restore = Some(PersistedState {
            last_url: "https://x/master.m3u8".to_string(),
            decoder_state: DecoderState::Paused,
            startup_state: StartupState::Started,
            start_ms: 12_000,
            quality: 1,
            audio_track: 0,
            subtitle_track: 0,
        });
        h.engine.start_ms = 12_000;
        h.load(SimCatalog::vod(h.log.clone(), 5, 10.0).with_qualities(2));
        assert_eq!(h.shared.quality(), 1);
        assert!(h.log.contains("decoder.feed:q1/seg1.ts"));

        let session_id = h.shared.session_id();
        h.shared.set_startup_state(StartupState::PlayQueued);
        h.engine.handle(Command::SegmentCompleted {
            session_id,
            purpose: CachePurpose::Startup,
            uris: vec!["q1/seg1.ts".to_string()],
        });
        assert!(h.log.contains("decoder.play:12.000"));
        h.run_queued();
        assert!(h.log.contains("decoder.seek:12.000"));
        assert_eq!(h.decoder.current_state(), DecoderState::Paused);
        assert!(h.engine.restore.is_none());
        assert_eq!(h.engine.start_ms, 0);
        h.engine.shutdown();
    }

    #[test]
    fn test_play_retries_failed_startup_segment() {
        let mut h = Harness::new();
        h.cache.set_mode(CacheMode::Fail(503));
        h.load(SimCatalog::vod(h.log.clone(), 3, 10.0));
        h.run_io();
        assert_eq!(h.shared.startup_state(), StartupState::WaitingToStart);
        assert_eq!(h.log.count_prefix("cache.precache:q0/seg0.ts"), 1);

        h.cache.set_mode(CacheMode::CompleteImmediately);
        h.engine.handle(Command::Play);
        assert_eq!(h.shared.startup_state(), StartupState::PlayQueued);
        assert_eq!(h.log.count_prefix("cache.precache:q0/seg0.ts"), 2);
        let entries = h.log.entries();
        let reset = entries.iter().rposition(|e| e == "decoder.reset").unwrap();
        let refeed = entries
            .iter()
            .rposition(|e| e == "decoder.feed:q0/seg0.ts")
            .unwrap();
        assert!(reset < refeed);

        h.run_io();
        assert_eq!(h.shared.startup_state(), StartupState::Started);
        assert!(h.log.contains_prefix("decoder.play"));
        assert_eq!(h.decoder.current_state(), DecoderState::Playing);
        assert!(h.engine.startup_segment.is_none());
        h.engine.shutdown();
    }

    #[test]
    fn test_play_before_any_catalog_only_queues() {
        let mut h = Harness::new();
        h.engine.handle(Command::Play);
        assert_eq!(h.shared.startup_state(), StartupState::PlayQueued);
        assert!(!h.log.contains_prefix("cache.precache"));
    }

    #[test]
    fn test_startup_posts_empty_track_lists() {
        let mut h = Harness::new();
        h.load(SimCatalog::vod(h.log.clone(), 3, 10.0));
        let events = h.drain_events();

        let subtitle_lists: Vec<&PlayerEvent> = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::SubtitleTracksList { .. }))
            .collect();
        assert_eq!(
            subtitle_lists,
            vec![&PlayerEvent::SubtitleTracksList {
                languages: vec![],
                default_index: None,
            }]
        );
        let audio_lists: Vec<&PlayerEvent> = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::AudioTracksList { .. }))
            .collect();
        assert_eq!(
            audio_lists,
            vec![&PlayerEvent::AudioTracksList {
                tracks: vec![],
                default_index: None,
            }]
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, PlayerEvent::SubtitleTrackChanged(_))));
        h.engine.shutdown();
    }

    #[test]
    fn test_startup_announces_selected_subtitle_after_list() {
        let mut h = Harness::new();
        let catalog = SimCatalog::vod(h.log.clone(), 3, 10.0)
            .with_subtitles(vec!["en".to_string(), "zh".to_string()], Some(1));
        h.load(catalog);
        let events = h.drain_events();

        let list = events
            .iter()
            .position(|e| {
                *e == PlayerEvent::SubtitleTracksList {
                    languages: vec!["en".to_string(), "zh".to_string()],
                    default_index: Some(1),
                }
            })
            .unwrap();
        let changed = events
            .iter()
            .position(|e| *e == PlayerEvent::SubtitleTrackChanged(1))
            .unwrap();
        assert!(list < changed);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, PlayerEvent::SubtitleTrackChanged(_)))
                .count(),
            1
        );
        h.engine.shutdown();
    }

    #[test]
    fn test_manifest_failure_posts_carried_code() {
        let mut h = Harness::new();
        let session_id = h.shared.next_session();
        h.engine.handle(Command::ManifestFailed {
            session_id,
            loader_id: 0,
            url: "https://x/master.m3u8".to_string(),
            code: ErrorCode::NotValid,
            reason: "no variants".to_string(),
        });
        assert!(matches!(
            h.drain_events().as_slice(),
            [PlayerEvent::Error {
                code: ErrorCode::NotValid,
                fatal: true,
                ..
            }]
        ));
    }
}
