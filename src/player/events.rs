use crate::core::{log_ctx, ErrorCode, QualityTrack, SubtitleCue, SurfaceHandle};
use crate::player::decoder::DecoderProxy;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 对外发布的播放器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStates {
    Load,
    Play,
    Pause,
    Seeking,
    Seeked,
    Start,
    End,
}

/// 播放器事件（引擎 -> 展示层）
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayerStates),
    Error {
        code: ErrorCode,
        message: String,
        fatal: bool,
    },
    /// 总时长（毫秒），直播流为 None
    DurationChanged(Option<i64>),
    /// 播放头位置（毫秒）
    PlayheadUpdate(i64),
    QualityTracksList {
        tracks: Vec<QualityTrack>,
        default_index: Option<usize>,
    },
    QualitySwitchStart {
        old: usize,
        new: usize,
    },
    QualitySwitchEnd(usize),
    AudioTracksList {
        tracks: Vec<String>,
        default_index: Option<usize>,
    },
    AudioSwitchStart {
        old: Option<usize>,
        new: usize,
    },
    AudioSwitchEnd(usize),
    SubtitleTracksList {
        languages: Vec<String>,
        default_index: Option<usize>,
    },
    SubtitleTrackChanged(usize),
    SubtitleText(SubtitleCue),
    VideoResolution {
        width: u32,
        height: u32,
    },
}

/// 事件类别（用于按类别订阅）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlayerState,
    Error,
    Duration,
    Playhead,
    QualityTracks,
    QualitySwitch,
    AudioTracks,
    AudioSwitch,
    SubtitleTracks,
    SubtitleChange,
    SubtitleText,
    Resolution,
}

impl PlayerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlayerEvent::StateChanged(_) => EventKind::PlayerState,
            PlayerEvent::Error { .. } => EventKind::Error,
            PlayerEvent::DurationChanged(_) => EventKind::Duration,
            PlayerEvent::PlayheadUpdate(_) => EventKind::Playhead,
            PlayerEvent::QualityTracksList { .. } => EventKind::QualityTracks,
            PlayerEvent::QualitySwitchStart { .. } | PlayerEvent::QualitySwitchEnd(_) => {
                EventKind::QualitySwitch
            }
            PlayerEvent::AudioTracksList { .. } => EventKind::AudioTracks,
            PlayerEvent::AudioSwitchStart { .. } | PlayerEvent::AudioSwitchEnd(_) => {
                EventKind::AudioSwitch
            }
            PlayerEvent::SubtitleTracksList { .. } => EventKind::SubtitleTracks,
            PlayerEvent::SubtitleTrackChanged(_) => EventKind::SubtitleChange,
            PlayerEvent::SubtitleText(_) => EventKind::SubtitleText,
            PlayerEvent::VideoResolution { .. } => EventKind::Resolution,
        }
    }
}

/// 投递到展示线程的任务
pub(crate) enum PresentationTask {
    Deliver(PlayerEvent),
    ApplyFormatChange,
    BindSurface(SurfaceHandle),
}

/// 订阅 id（用于取消订阅）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    kind: Option<EventKind>,
    listener: Listener,
}

/// 事件分发器
///
/// - 任意线程都可以 post，事件进入展示队列
/// - 只有展示线程调用 `dispatch_pending`，按注册顺序回调所有观察者
/// - 格式切换 / 表面绑定同样经由展示队列，在展示线程上调用解码器
#[derive(Clone)]
pub struct EventDispatcher {
    tx: Sender<PresentationTask>,
    rx: Receiver<PresentationTask>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
    decoder: Arc<dyn DecoderProxy>,
}

impl EventDispatcher {
    pub fn new(decoder: Arc<dyn DecoderProxy>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            decoder,
        }
    }

    /// 订阅全部事件
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        self.add_subscriber(None, Arc::new(listener))
    }

    /// 只订阅某一类事件
    pub fn subscribe_kind<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        self.add_subscriber(Some(kind), Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    fn add_subscriber(&self, kind: Option<EventKind>, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.lock().push(Subscriber { id, kind, listener });
        id
    }

    pub fn post(&self, event: PlayerEvent) {
        self.send(PresentationTask::Deliver(event));
    }

    pub fn post_state(&self, state: PlayerStates) {
        debug!("{} 📣 播放器状态: {:?}", log_ctx(), state);
        self.post(PlayerEvent::StateChanged(state));
    }

    pub fn post_error(&self, code: ErrorCode, message: impl Into<String>) {
        self.post(PlayerEvent::Error {
            code,
            message: message.into(),
            fatal: false,
        });
    }

    pub fn post_fatal_error(&self, code: ErrorCode, message: impl Into<String>) {
        self.post(PlayerEvent::Error {
            code,
            message: message.into(),
            fatal: true,
        });
    }

    /// 安排一次格式切换（解码器的 format change 入口必须在展示线程运行）
    pub(crate) fn post_format_change(&self) {
        self.send(PresentationTask::ApplyFormatChange);
    }

    pub(crate) fn post_bind_surface(&self, surface: SurfaceHandle) {
        self.send(PresentationTask::BindSurface(surface));
    }

    fn send(&self, task: PresentationTask) {
        // 接收端由分发器自身持有，发送不会失败
        let _ = self.tx.send(task);
    }

    /// 在展示线程上处理所有待处理任务，返回处理数量
    pub fn dispatch_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.rx.try_recv() {
            self.run_task(task);
            count += 1;
        }
        count
    }

    /// 最多等待 `timeout` 拿到第一个任务，然后处理所有待处理任务
    pub fn dispatch_for(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                self.run_task(task);
                1 + self.dispatch_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn run_task(&self, task: PresentationTask) {
        match task {
            PresentationTask::Deliver(event) => self.deliver(&event),
            PresentationTask::ApplyFormatChange => {
                info!("{} 🔄 展示线程应用格式切换", log_ctx());
                self.decoder.apply_format_change();
            }
            PresentationTask::BindSurface(surface) => {
                info!("{} 🖼️ 展示线程绑定渲染表面: {:?}", log_ctx(), surface);
                self.decoder.bind_surface(surface);
            }
        }
    }

    fn deliver(&self, event: &PlayerEvent) {
        // 先拷贝监听器列表再回调，回调里可以安全地订阅 / 取消订阅
        let listeners: Vec<Listener> = {
            let subscribers = self.subscribers.lock();
            subscribers
                .iter()
                .filter(|s| s.kind.map_or(true, |k| k == event.kind()))
                .map(|s| s.listener.clone())
                .collect()
        };
        for listener in listeners {
            listener(event);
        }
    }

    /// 无 UI 事件循环的宿主使用：启动一个专用展示线程
    pub fn spawn_presentation_thread(&self) -> std::io::Result<PresentationThread> {
        let running = Arc::new(AtomicBool::new(true));
        let dispatcher = self.clone();
        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name("presentation".to_string())
            .spawn(move || {
                info!("{} 🖥️ 展示线程启动", log_ctx());
                while thread_running.load(Ordering::SeqCst) {
                    dispatcher.dispatch_for(Duration::from_millis(20));
                }
                dispatcher.dispatch_pending();
                info!("{} 🛑 展示线程退出", log_ctx());
            })?;
        Ok(PresentationThread {
            running,
            handle: Some(handle),
        })
    }
}

/// 专用展示线程句柄
pub struct PresentationThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PresentationThread {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{} ⚠️ 展示线程异常退出", log_ctx());
            }
        }
    }
}

impl Drop for PresentationThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::sim::{CallLog, SimDecoder};

    fn dispatcher() -> (EventDispatcher, Arc<SimDecoder>) {
        let decoder = Arc::new(SimDecoder::new(CallLog::default()));
        (EventDispatcher::new(decoder.clone()), decoder)
    }

    #[test]
    fn test_events_delivered_only_when_pumped() {
        let (dispatcher, _) = dispatcher();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.subscribe(move |e| sink.lock().push(e.clone()));

        dispatcher.post_state(PlayerStates::Load);
        assert!(seen.lock().is_empty());

        assert_eq!(dispatcher.dispatch_pending(), 1);
        assert_eq!(
            *seen.lock(),
            vec![PlayerEvent::StateChanged(PlayerStates::Load)]
        );
    }

    #[test]
    fn test_multiple_observers_in_registration_order() {
        let (dispatcher, _) = dispatcher();
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();
        dispatcher.subscribe(move |_| first.lock().push("first"));
        dispatcher.subscribe(move |_| second.lock().push("second"));

        dispatcher.post(PlayerEvent::PlayheadUpdate(40));
        dispatcher.dispatch_pending();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_kind_filter_and_unsubscribe() {
        let (dispatcher, _) = dispatcher();
        let errors = Arc::new(Mutex::new(0));
        let counter = errors.clone();
        let id = dispatcher.subscribe_kind(EventKind::Error, move |_| *counter.lock() += 1);

        dispatcher.post_state(PlayerStates::Play);
        dispatcher.post_error(ErrorCode::SegmentFetch, "seg3.ts (404)");
        dispatcher.dispatch_pending();
        assert_eq!(*errors.lock(), 1);

        assert!(dispatcher.unsubscribe(id));
        dispatcher.post_fatal_error(ErrorCode::Io, "boom");
        dispatcher.dispatch_pending();
        assert_eq!(*errors.lock(), 1);
    }

    #[test]
    fn test_format_change_runs_on_pump() {
        let (dispatcher, decoder) = dispatcher();
        dispatcher.post_format_change();
        assert_eq!(decoder.format_change_count(), 0);
        dispatcher.dispatch_pending();
        assert_eq!(decoder.format_change_count(), 1);
    }
}
