use crate::core::{log_ctx, ErrorCode, Result};
use crate::player::catalog::TrackCatalog;
use crate::player::engine::PlaybackEngine;
use crate::player::persist::PersistedState;
use crate::player::segment_cache::CachePurpose;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 命令线程命令
///
/// UI 命令、经 IO 线程校验过的回调、解码器上行回调全部走这一个队列，
/// 按提交顺序逐个执行
pub(crate) enum Command {
    SetUrl {
        url: String,
        session_id: u64,
        restore: Option<PersistedState>,
    },
    ManifestReady {
        session_id: u64,
        loader_id: u64,
        catalog: Arc<dyn TrackCatalog>,
    },
    ManifestFailed {
        session_id: u64,
        loader_id: u64,
        url: String,
        code: ErrorCode,
        reason: String,
    },
    WarmUpComplete {
        session_id: u64,
    },
    SegmentCompleted {
        session_id: u64,
        purpose: CachePurpose,
        uris: Vec<String>,
    },
    SegmentFailed {
        session_id: u64,
        purpose: CachePurpose,
        uri: String,
        response_code: i32,
    },
    Play,
    Pause(bool),
    Stop,
    /// 执行 PendingSeek 邮箱中的 seek
    ApplySeek,
    SwitchQuality(i32),
    /// 相对当前清晰度切换（+1 / -1）
    StepQuality(i32),
    InitiateQualityChange {
        session_id: u64,
        quality: usize,
    },
    FormatChangeComplete(usize),
    SwitchAudio {
        index: i32,
        hard: bool,
    },
    AudioChangeComplete(usize),
    SwitchSubtitle(i32),
    FeedNext,
    /// 指定时间（秒）对应的分片
    FeedForTime(f64),
    SetBufferSeconds(u32),
    SetStartingPoint(i64),
    Shutdown,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetUrl {
                url, session_id, ..
            } => write!(f, "SetUrl({}, session={})", url, session_id),
            Command::ManifestReady { session_id, .. } => {
                write!(f, "ManifestReady(session={})", session_id)
            }
            Command::ManifestFailed {
                session_id, reason, ..
            } => write!(f, "ManifestFailed(session={}, {})", session_id, reason),
            Command::WarmUpComplete { session_id } => {
                write!(f, "WarmUpComplete(session={})", session_id)
            }
            Command::SegmentCompleted {
                session_id, uris, ..
            } => write!(f, "SegmentCompleted(session={}, {:?})", session_id, uris),
            Command::SegmentFailed {
                session_id, uri, ..
            } => write!(f, "SegmentFailed(session={}, {})", session_id, uri),
            Command::Play => write!(f, "Play"),
            Command::Pause(pause) => write!(f, "Pause({})", pause),
            Command::Stop => write!(f, "Stop"),
            Command::ApplySeek => write!(f, "ApplySeek"),
            Command::SwitchQuality(index) => write!(f, "SwitchQuality({})", index),
            Command::StepQuality(delta) => write!(f, "StepQuality({})", delta),
            Command::InitiateQualityChange { quality, .. } => {
                write!(f, "InitiateQualityChange({})", quality)
            }
            Command::FormatChangeComplete(quality) => write!(f, "FormatChangeComplete({})", quality),
            Command::SwitchAudio { index, hard } => {
                write!(f, "SwitchAudio({}, hard={})", index, hard)
            }
            Command::AudioChangeComplete(index) => write!(f, "AudioChangeComplete({})", index),
            Command::SwitchSubtitle(index) => write!(f, "SwitchSubtitle({})", index),
            Command::FeedNext => write!(f, "FeedNext"),
            Command::FeedForTime(secs) => write!(f, "FeedForTime({:.3})", secs),
            Command::SetBufferSeconds(secs) => write!(f, "SetBufferSeconds({})", secs),
            Command::SetStartingPoint(ms) => write!(f, "SetStartingPoint({})", ms),
            Command::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// 命令线程管理器
/// - 单消费者 FIFO：命令严格按提交顺序执行，解码器的状态变更操作不会重叠
/// - 引擎（PlaybackEngine）只在这个线程上存活
pub(crate) struct CommandSerializer {
    thread_handle: Option<JoinHandle<()>>,
    command_tx: Sender<Command>,
}

impl CommandSerializer {
    /// 启动命令线程
    pub fn start(
        engine: PlaybackEngine,
        command_tx: Sender<Command>,
        command_rx: Receiver<Command>,
    ) -> Result<Self> {
        let thread_handle = thread::Builder::new()
            .name("command-serializer".to_string())
            .spawn(move || Self::command_loop(engine, command_rx))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            command_tx,
        })
    }

    /// 命令循环（在独立线程中运行）
    ///
    /// 没有命令时按引擎给出的最近截止时间醒来（清晰度切换超时检测）
    fn command_loop(mut engine: PlaybackEngine, command_rx: Receiver<Command>) {
        info!("{} 🎬 命令线程启动", log_ctx());
        let mut handled: usize = 0;

        loop {
            let timeout = engine
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_millis(500));

            match command_rx.recv_timeout(timeout) {
                Ok(Command::Shutdown) => {
                    info!("{} ⏹ 命令线程收到关闭命令", log_ctx());
                    engine.shutdown();
                    break;
                }
                Ok(command) => {
                    handled += 1;
                    engine.handle(command);
                    // 命令持续到来时 recv 不会超时，截止时间到了也要检查
                    if engine
                        .next_deadline()
                        .map_or(false, |deadline| deadline <= Instant::now())
                    {
                        engine.on_tick();
                    }
                }
                Err(RecvTimeoutError::Timeout) => engine.on_tick(),
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("{} ⚠️ 命令通道已断开，命令线程退出", log_ctx());
                    engine.shutdown();
                    break;
                }
            }
        }

        info!("{} 🛑 命令线程退出（共执行 {} 条命令）", log_ctx(), handled);
    }

    /// 停止线程
    /// - 发送 Shutdown 命令（排在所有已提交命令之后）
    /// - join 线程
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.command_tx.send(Command::Shutdown);
            if handle.join().is_err() {
                warn!("{} ⚠️ 命令线程异常退出", log_ctx());
            }
        }
    }
}

impl Drop for CommandSerializer {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ CommandSerializer 被 drop，但可能未调用 stop()，正在尝试优雅停止", log_ctx());
            self.stop();
        }
    }
}
