use crate::core::{log_ctx, ErrorCode, PlayerError, Result};
use crate::player::catalog::TrackCatalog;
use crate::player::io_worker::IoEvent;
use crossbeam_channel::Sender;
use log::{debug, error, info};
use std::sync::Arc;
use std::thread;

/// 清单加载器：下载并解析主清单，产出 Track Catalog
///
/// 结果必须通过 `ManifestReply` 回送（可在任意线程）
pub trait ManifestLoader: Send + Sync {
    fn load(&self, url: &str, reply: ManifestReply);
}

/// 清单加载结果回送端（带会话 id 和加载器 id 标记）
#[derive(Debug)]
pub struct ManifestReply {
    session_id: u64,
    loader_id: u64,
    url: String,
    tx: Sender<IoEvent>,
}

impl ManifestReply {
    pub(crate) fn new(session_id: u64, loader_id: u64, url: String, tx: Sender<IoEvent>) -> Self {
        Self {
            session_id,
            loader_id,
            url,
            tx,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 清单就绪
    pub fn loaded(self, catalog: Arc<dyn TrackCatalog>) {
        let event = IoEvent::ManifestLoaded {
            session_id: self.session_id,
            loader_id: self.loader_id,
            catalog,
        };
        if self.tx.send(event).is_err() {
            debug!("{} IO 线程已退出，丢弃清单结果: {}", log_ctx(), self.url);
        }
    }

    /// 清单下载失败
    pub fn failed(self, reason: impl Into<String>) {
        self.send_failure(ErrorCode::Io, reason.into());
    }

    /// 按错误类型映射错误码后回送失败
    pub fn failed_with(self, err: &PlayerError) {
        self.send_failure(ErrorCode::from(err), err.to_string());
    }

    fn send_failure(self, code: ErrorCode, reason: String) {
        let event = IoEvent::ManifestFailed {
            session_id: self.session_id,
            loader_id: self.loader_id,
            url: self.url.clone(),
            code,
            reason,
        };
        if self.tx.send(event).is_err() {
            debug!("{} IO 线程已退出，丢弃清单失败: {}", log_ctx(), self.url);
        }
    }
}

/// 在子线程中执行阻塞式清单获取的加载器
///
/// 使用方法：
/// ```ignore
/// let loader = ThreadedManifestLoader::new(|url| fetch_and_parse(url));
/// ```
pub struct ThreadedManifestLoader<F>
where
    F: Fn(&str) -> Result<Arc<dyn TrackCatalog>> + Send + Sync + 'static,
{
    fetch: Arc<F>,
}

impl<F> ThreadedManifestLoader<F>
where
    F: Fn(&str) -> Result<Arc<dyn TrackCatalog>> + Send + Sync + 'static,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch: Arc::new(fetch),
        }
    }
}

impl<F> ManifestLoader for ThreadedManifestLoader<F>
where
    F: Fn(&str) -> Result<Arc<dyn TrackCatalog>> + Send + Sync + 'static,
{
    fn load(&self, url: &str, reply: ManifestReply) {
        let fetch = self.fetch.clone();
        let url = url.to_string();
        let spawned = thread::Builder::new()
            .name("manifest-loader".to_string())
            .spawn(move || {
                info!("{} 🌐 开始在子线程中加载清单: {}", log_ctx(), url);
                match fetch(&url) {
                    Ok(catalog) => {
                        info!("{} ✅ 清单加载完成: {}", log_ctx(), url);
                        reply.loaded(catalog);
                    }
                    Err(e) => {
                        error!("{} ❌ 清单加载失败: {} - {}", log_ctx(), url, e);
                        reply.failed_with(&e);
                    }
                }
            });
        if let Err(e) = spawned {
            error!("{} ❌ 创建清单加载线程失败: {}", log_ctx(), e);
        }
    }
}
