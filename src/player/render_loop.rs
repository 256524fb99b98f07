use crate::core::{log_ctx, DecoderState, Result};
use crate::player::catalog::TrackCatalog;
use crate::player::command::Command;
use crate::player::decoder::{DecoderProxy, FrameResult};
use crate::player::events::{EventDispatcher, PlayerEvent};
use crate::player::state::SharedState;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 渲染线程需要的只读上下文
pub(crate) struct RenderContext {
    pub shared: Arc<SharedState>,
    pub decoder: Arc<dyn DecoderProxy>,
    pub catalog: Arc<dyn TrackCatalog>,
    pub dispatcher: EventDispatcher,
    pub commands: Sender<Command>,
    pub idle_backoff: Duration,
}

/// 渲染线程
/// - 轮询解码器状态，推进解码步进
/// - 发布播放头、字幕 cue
/// - 检测流结束 / 不连续点
///
/// 只读轨道选择，从不自己调用 Play / Seek；Stop 也是提交给命令线程
pub(crate) struct RenderLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    shared: Arc<SharedState>,
}

impl RenderLoop {
    pub fn start(ctx: RenderContext) -> Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let shared = ctx.shared.clone();
        // 先置位，保证线程刚创建时的 seek 也能看到"渲染线程在运行"
        shared.set_render_running(true);

        let thread_stop = stop_flag.clone();
        let spawned = thread::Builder::new()
            .name("render-loop".to_string())
            .spawn(move || {
                Self::render_loop(&ctx, &thread_stop);
                ctx.shared.set_render_running(false);
            });

        match spawned {
            Ok(handle) => Ok(Self {
                thread_handle: Some(handle),
                stop_flag,
                shared,
            }),
            Err(e) => {
                shared.set_render_running(false);
                Err(e.into())
            }
        }
    }

    fn render_loop(ctx: &RenderContext, stop_flag: &AtomicBool) {
        info!("{} 🎞️ 渲染线程启动", log_ctx());
        let mut last_published: Option<i64> = None;
        // 同一次停止只提交一个 Stop，直到解码器重新产出帧或离开 CueStop
        let mut stop_sent = false;
        let mut steps: u64 = 0;

        while !stop_flag.load(Ordering::SeqCst) {
            let state = ctx.decoder.current_state();

            if state.is_stepping() {
                steps += 1;
                Self::step_once(ctx, &mut last_published, &mut stop_sent);
                Self::publish_cues(ctx);
                thread::yield_now();
            } else if state == DecoderState::CueStop {
                if !stop_sent {
                    info!("{} ⏹ 解码器进入 CueStop，提交 Stop", log_ctx());
                    Self::request_stop(ctx);
                    stop_sent = true;
                }
                thread::sleep(ctx.idle_backoff);
            } else {
                stop_sent = false;
                thread::sleep(ctx.idle_backoff);
            }
        }

        info!("{} 🛑 渲染线程退出（共步进 {} 次）", log_ctx(), steps);
    }

    /// 推进一次解码器
    fn step_once(ctx: &RenderContext, last_published: &mut Option<i64>, stop_sent: &mut bool) {
        let code = match ctx.decoder.step() {
            Ok(code) => code,
            Err(e) => {
                // 解码异常按"没有新时间戳"处理
                debug!("{} 解码步进异常，沿用上次时间戳: {}", log_ctx(), e);
                return;
            }
        };

        match FrameResult::from_code(code) {
            FrameResult::Timestamp(ms) => {
                *stop_sent = false;
                ctx.shared.set_last_timestamp_ms(ms);
                if *last_published != Some(ms) {
                    *last_published = Some(ms);
                    ctx.dispatcher.post(PlayerEvent::PlayheadUpdate(ms));
                }
            }
            FrameResult::EndOfStream => {
                if ctx.shared.no_more_segments() && !*stop_sent {
                    info!("{} 🏁 流已播完，提交 Stop", log_ctx());
                    Self::request_stop(ctx);
                    *stop_sent = true;
                }
            }
            FrameResult::Discontinuity => {
                info!("{} 🔀 遇到不连续点，投递格式切换到展示线程", log_ctx());
                ctx.dispatcher.post_format_change();
            }
            FrameResult::NoFrame(code) => {
                debug!("{} 解码器返回码: {}", log_ctx(), code);
            }
        }
    }

    fn request_stop(ctx: &RenderContext) {
        if ctx.commands.send(Command::Stop).is_err() {
            warn!("{} ⚠️ 命令线程已退出", log_ctx());
        }
    }

    /// 发布当前时间到期的字幕 cue（每个 cue 一个事件）
    fn publish_cues(ctx: &RenderContext) {
        if !ctx.shared.has_subtitles() {
            return;
        }
        let time_secs = ctx.shared.last_timestamp_ms() as f64 / 1000.0;
        for cue in ctx.catalog.cues_at(time_secs, ctx.shared.subtitle()) {
            ctx.dispatcher.post(PlayerEvent::SubtitleText(cue));
        }
    }

    /// 停止渲染线程（设置停止标记并 join）
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("{} ⚠️ 渲染线程异常退出", log_ctx());
            }
            self.shared.set_render_running(false);
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ RenderLoop 被 drop，但可能未调用 stop()，正在尝试优雅停止", log_ctx());
            self.stop();
        }
    }
}
