use crate::core::{log_ctx, ErrorCode, SeekTarget};
use crate::player::command::Command;
use crate::player::engine::{PendingFormatChange, PlaybackEngine};
use crate::player::events::PlayerEvent;
use crate::player::segment_cache::CachePurpose;
use log::{debug, info, warn};
use std::time::Instant;

/// 越界检查，返回合法的轨道索引
fn checked_index(index: i32, count: usize) -> Option<usize> {
    usize::try_from(index).ok().filter(|i| *i < count)
}

/// 轨道切换：清晰度 / 音轨 / 字幕
impl PlaybackEngine {
    // ========== 清晰度 ==========

    pub(super) fn switch_quality(&mut self, index: i32) {
        let count = self
            .catalog
            .as_ref()
            .map_or(0, |c| c.quality_level_count());
        let current = self.shared.quality();

        let Some(new) = checked_index(index, count) else {
            warn!(
                "{} ⚠️ 清晰度索引越界: {} (共 {} 个)，保持 {}",
                log_ctx(),
                index,
                count,
                current
            );
            self.dispatcher.post(PlayerEvent::QualitySwitchEnd(current));
            return;
        };

        info!("{} 🎚️ 切换清晰度: {} -> {}", log_ctx(), current, new);
        self.dispatcher
            .post(PlayerEvent::QualitySwitchStart { old: current, new });
        // 立即更新选择，之后的分片选择直接用新清晰度
        self.shared.set_quality(new);
        self.enqueue(Command::InitiateQualityChange {
            session_id: self.shared.session_id(),
            quality: new,
        });
    }

    pub(super) fn initiate_quality_change(&mut self, session_id: u64, quality: usize) {
        if !self.shared.is_current(session_id) {
            debug!("{} 会话已切换，放弃清晰度切换", log_ctx());
            return;
        }
        if quality != self.shared.quality() {
            debug!(
                "{} 清晰度 {} 已被更新的切换覆盖（当前 {}）",
                log_ctx(),
                quality,
                self.shared.quality()
            );
            return;
        }
        let Some(catalog) = self.catalog.clone() else {
            return;
        };

        catalog.initiate_quality_change(quality);
        self.apply_buffer_target();
        self.pending_quality = Some(PendingFormatChange {
            quality,
            deadline: Instant::now() + self.config.format_change_timeout(),
        });
    }

    /// 解码器完成格式切换
    pub(super) fn on_format_change_complete(&mut self, quality: usize) {
        info!("{} ✅ 格式切换完成，清晰度 {}", log_ctx(), quality);
        if self
            .pending_quality
            .map_or(false, |p| p.quality == quality)
        {
            self.pending_quality = None;
        }
        self.dispatcher.post(PlayerEvent::QualitySwitchEnd(quality));
    }

    /// 超时未收到格式切换完成：自行发布 switchEnd，保留已选清晰度
    pub(super) fn check_format_change_timeout(&mut self, now: Instant) {
        let Some(pending) = self.pending_quality else {
            return;
        };
        if now < pending.deadline {
            return;
        }
        warn!(
            "{} ⚠️ 清晰度 {} 的格式切换在 {}ms 内未完成，直接结束切换",
            log_ctx(),
            pending.quality,
            self.config.format_change_timeout_ms
        );
        self.pending_quality = None;
        self.dispatcher
            .post(PlayerEvent::QualitySwitchEnd(self.shared.quality()));
    }

    // ========== 音轨 ==========

    /// 硬切换立即按当前位置重新送入分片；软切换等下一个自然分片边界
    pub(super) fn switch_audio(&mut self, index: i32, hard: bool) {
        let Some(catalog) = self.catalog.clone() else {
            warn!("{} ⚠️ 媒体尚未就绪，无法切换音轨", log_ctx());
            self.dispatcher
                .post_error(ErrorCode::NotReady, "The media is not yet ready.");
            return;
        };

        let count = catalog.audio_variant_list().len();
        let current = self.shared.audio();
        let Some(new) = checked_index(index, count) else {
            warn!(
                "{} ⚠️ 音轨索引越界: {} (共 {} 个)，保持 {}",
                log_ctx(),
                index,
                count,
                current
            );
            self.dispatcher.post(PlayerEvent::AudioSwitchEnd(current));
            return;
        };

        info!(
            "{} 🔊 {}切换音轨: {} -> {}",
            log_ctx(),
            if hard { "硬" } else { "软" },
            current,
            new
        );
        self.dispatcher.post(PlayerEvent::AudioSwitchStart {
            old: Some(current),
            new,
        });
        self.shared.set_audio(new);
        catalog.set_audio_variant(new);

        if !hard {
            self.pending_soft_audio = Some(new);
            return;
        }

        self.pending_soft_audio = None;
        let position = SeekTarget::Millis(self.shared.last_timestamp_ms());
        match catalog.segment_at_time(position, self.shared.quality()) {
            Some(segment) => self.deliver_segment(&segment, CachePurpose::ReadAhead),
            None => warn!("{} ⚠️ 找不到 {:?} 对应的分片，无法立即切换", log_ctx(), position),
        }
        self.dispatcher.post(PlayerEvent::AudioSwitchEnd(new));
    }

    /// 软切换在下一个自然送入的分片上生效
    pub(super) fn complete_soft_audio_switch(&mut self) {
        if let Some(index) = self.pending_soft_audio.take() {
            info!("{} ✅ 软切换音轨生效: {}", log_ctx(), index);
            self.dispatcher.post(PlayerEvent::AudioSwitchEnd(index));
        }
    }

    /// 解码器确认音轨切换完成
    pub(super) fn on_audio_change_complete(&mut self, index: usize) {
        if self.pending_soft_audio == Some(index) {
            self.pending_soft_audio = None;
            self.dispatcher.post(PlayerEvent::AudioSwitchEnd(index));
        } else {
            debug!("{} 音轨 {} 切换确认（无待完成的软切换）", log_ctx(), index);
        }
    }

    // ========== 字幕 ==========

    pub(super) fn switch_subtitle(&mut self, index: i32) {
        let languages = self
            .catalog
            .as_ref()
            .map(|c| c.subtitle_language_list())
            .unwrap_or_default();
        let current = self.shared.subtitle();

        let Some(new) = checked_index(index, languages.len()) else {
            warn!(
                "{} ⚠️ 字幕索引越界: {} (共 {} 个)，保持 {}",
                log_ctx(),
                index,
                languages.len(),
                current
            );
            self.dispatcher.post(PlayerEvent::SubtitleTrackChanged(current));
            return;
        };

        info!("{} 💬 切换字幕: {} -> {} ({})", log_ctx(), current, new, languages[new]);
        self.shared.set_subtitle(new);
        if let Some(catalog) = &self.catalog {
            catalog.precache_subtitles_at(self.shared.last_timestamp_ms() as f64 / 1000.0, new);
        }
        self.dispatcher.post(PlayerEvent::SubtitleTrackChanged(new));
    }
}
