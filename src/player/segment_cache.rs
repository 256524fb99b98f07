use crate::core::{log_ctx, Segment};
use crate::player::io_worker::IoEvent;
use crossbeam_channel::Sender;
use log::debug;

/// 分片缓存网关：负责下载和存储分片字节，完成或失败时通过 `CacheCompletion` 回调
///
/// 已缓存的分片可能在 `precache` 内部同步回调完成，
/// 所以编排层保证先 `feed` 再 `precache`。
pub trait SegmentCacheGateway: Send + Sync {
    fn precache(&self, segment: &Segment, is_initial: bool, completion: CacheCompletion);

    /// 取消指定 uri 的缓存事件标记
    fn cancel(&self, uri: &str);

    /// 取消全部缓存事件
    fn cancel_all(&self);

    /// 取消正在进行的下载
    fn cancel_in_flight_fetches(&self);

    /// 最近一次下载速率（字节/秒）
    fn last_transfer_rate(&self) -> f32 {
        0.0
    }

    /// 缓冲百分比（0.0 - 100.0）
    fn buffer_percentage(&self) -> f32 {
        0.0
    }
}

/// 缓存完成后由谁处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePurpose {
    /// 启动阶段等待的首个分片
    Startup,
    /// 播放过程中的预读分片
    ReadAhead,
}

/// 缓存完成回调目标（带会话 id 标记）
///
/// 回调可以在任意线程触发，事件统一送往 IO 线程校验会话 id
#[derive(Debug, Clone)]
pub struct CacheCompletion {
    session_id: u64,
    purpose: CachePurpose,
    tx: Sender<IoEvent>,
}

impl CacheCompletion {
    pub(crate) fn new(session_id: u64, purpose: CachePurpose, tx: Sender<IoEvent>) -> Self {
        Self {
            session_id,
            purpose,
            tx,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn purpose(&self) -> CachePurpose {
        self.purpose
    }

    /// 分片缓存完成
    pub fn completed(&self, uris: Vec<String>) {
        let event = IoEvent::SegmentCompleted {
            session_id: self.session_id,
            purpose: self.purpose,
            uris,
        };
        if self.tx.send(event).is_err() {
            debug!("{} IO 线程已退出，丢弃分片完成回调", log_ctx());
        }
    }

    /// 分片缓存失败
    pub fn failed(&self, uri: &str, response_code: i32) {
        let event = IoEvent::SegmentFailed {
            session_id: self.session_id,
            purpose: self.purpose,
            uri: uri.to_string(),
            response_code,
        };
        if self.tx.send(event).is_err() {
            debug!("{} IO 线程已退出，丢弃分片失败回调", log_ctx());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_completion_carries_session_tag() {
        let (tx, rx) = unbounded();
        let completion = CacheCompletion::new(7, CachePurpose::Startup, tx);
        completion.completed(vec!["seg0.ts".to_string()]);
        match rx.try_recv().unwrap() {
            IoEvent::SegmentCompleted {
                session_id,
                purpose,
                uris,
            } => {
                assert_eq!(session_id, 7);
                assert_eq!(purpose, CachePurpose::Startup);
                assert_eq!(uris, vec!["seg0.ts".to_string()]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_completion_after_worker_exit_is_ignored() {
        let (tx, rx) = unbounded();
        drop(rx);
        let completion = CacheCompletion::new(1, CachePurpose::ReadAhead, tx);
        completion.failed("seg1.ts", 404);
    }
}
