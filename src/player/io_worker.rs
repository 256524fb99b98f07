use crate::core::{log_ctx, ErrorCode, Result};
use crate::player::catalog::TrackCatalog;
use crate::player::command::Command;
use crate::player::segment_cache::CachePurpose;
use crate::player::state::SharedState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// IO 回调事件（清单、预热、分片缓存）
///
/// 所有事件都带会话 id，由 IO 线程校验后再转给命令线程
pub(crate) enum IoEvent {
    ManifestLoaded {
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
    Shutdown,
}

impl IoEvent {
    fn session_id(&self) -> Option<u64> {
        match self {
            IoEvent::ManifestLoaded { session_id, .. }
            | IoEvent::ManifestFailed { session_id, .. }
            | IoEvent::WarmUpComplete { session_id }
            | IoEvent::SegmentCompleted { session_id, .. }
            | IoEvent::SegmentFailed { session_id, .. } => Some(*session_id),
            IoEvent::Shutdown => None,
        }
    }

    /// 转换为命令线程命令
    fn into_command(self) -> Option<Command> {
        match self {
            IoEvent::ManifestLoaded {
                session_id,
                loader_id,
                catalog,
            } => Some(Command::ManifestReady {
                session_id,
                loader_id,
                catalog,
            }),
            IoEvent::ManifestFailed {
                session_id,
                loader_id,
                url,
                code,
                reason,
            } => Some(Command::ManifestFailed {
                session_id,
                loader_id,
                url,
                code,
                reason,
            }),
            IoEvent::WarmUpComplete { session_id } => Some(Command::WarmUpComplete { session_id }),
            IoEvent::SegmentCompleted {
                session_id,
                purpose,
                uris,
            } => Some(Command::SegmentCompleted {
                session_id,
                purpose,
                uris,
            }),
            IoEvent::SegmentFailed {
                session_id,
                purpose,
                uri,
                response_code,
            } => Some(Command::SegmentFailed {
                session_id,
                purpose,
                uri,
                response_code,
            }),
            IoEvent::Shutdown => None,
        }
    }
}

impl fmt::Debug for IoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoEvent::ManifestLoaded {
                session_id,
                loader_id,
                ..
            } => write!(f, "ManifestLoaded(session={}, loader={})", session_id, loader_id),
            IoEvent::ManifestFailed {
                session_id,
                url,
                reason,
                ..
            } => write!(f, "ManifestFailed(session={}, {}: {})", session_id, url, reason),
            IoEvent::WarmUpComplete { session_id } => {
                write!(f, "WarmUpComplete(session={})", session_id)
            }
            IoEvent::SegmentCompleted {
                session_id,
                purpose,
                uris,
            } => write!(
                f,
                "SegmentCompleted(session={}, {:?}, {:?})",
                session_id, purpose, uris
            ),
            IoEvent::SegmentFailed {
                session_id,
                purpose,
                uri,
                response_code,
            } => write!(
                f,
                "SegmentFailed(session={}, {:?}, {}, code={})",
                session_id, purpose, uri, response_code
            ),
            IoEvent::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// IO 线程
/// - 接收网络/缓存层的回调（任意线程）
/// - 丢弃会话 id 已过期的回调
/// - 把有效回调按到达顺序转交命令线程
pub(crate) struct IoWorker {
    thread_handle: Option<JoinHandle<()>>,
    event_tx: Sender<IoEvent>,
}

impl IoWorker {
    pub fn start(shared: Arc<SharedState>, command_tx: Sender<Command>) -> Result<Self> {
        let (event_tx, event_rx) = unbounded();
        let thread_handle = thread::Builder::new()
            .name("io-worker".to_string())
            .spawn(move || Self::io_loop(shared, event_rx, command_tx))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            event_tx,
        })
    }

    /// 回调事件发送端（分发给 CacheCompletion / ManifestReply）
    pub fn sender(&self) -> Sender<IoEvent> {
        self.event_tx.clone()
    }

    fn io_loop(shared: Arc<SharedState>, event_rx: Receiver<IoEvent>, command_tx: Sender<Command>) {
        info!("{} 📡 IO 线程启动", log_ctx());
        let mut dropped: usize = 0;

        while let Ok(event) = event_rx.recv() {
            let Some(session_id) = event.session_id() else {
                info!("{} ⏹ IO 线程收到关闭命令", log_ctx());
                break;
            };

            if !shared.is_current(session_id) {
                dropped += 1;
                debug!(
                    "{} 丢弃过期回调 {:?}（当前会话: {}）",
                    log_ctx(),
                    event,
                    shared.session_id()
                );
                continue;
            }

            if let Some(command) = event.into_command() {
                if command_tx.send(command).is_err() {
                    warn!("{} ⚠️ 命令线程已退出，IO 线程退出", log_ctx());
                    break;
                }
            }
        }

        info!("{} 🛑 IO 线程退出（丢弃过期回调 {} 个）", log_ctx(), dropped);
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.event_tx.send(IoEvent::Shutdown);
            if handle.join().is_err() {
                warn!("{} ⚠️ IO 线程异常退出", log_ctx());
            }
        }
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stale_completion_is_dropped() {
        let shared = Arc::new(SharedState::new());
        let stale = shared.next_session();
        let current = shared.next_session();
        let (command_tx, command_rx) = unbounded();
        let mut worker = IoWorker::start(shared, command_tx).unwrap();

        let tx = worker.sender();
        tx.send(IoEvent::SegmentCompleted {
            session_id: stale,
            purpose: CachePurpose::Startup,
            uris: vec!["old.ts".to_string()],
        })
        .unwrap();
        tx.send(IoEvent::SegmentCompleted {
            session_id: current,
            purpose: CachePurpose::Startup,
            uris: vec!["new.ts".to_string()],
        })
        .unwrap();

        match command_rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            Command::SegmentCompleted {
                session_id, uris, ..
            } => {
                assert_eq!(session_id, current);
                assert_eq!(uris, vec!["new.ts".to_string()]);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        worker.stop();
        assert!(command_rx.try_recv().is_err());
    }
}
