// 播放编排核心模块

pub mod decoder;        // 解码器代理接口
pub mod catalog;        // Track Catalog 接口
pub mod segment_cache;  // 分片缓存网关接口
pub mod manifest_loader; // 清单加载器接口
pub mod events;         // 事件分发（展示线程）
pub mod persist;        // 播放现场保存 / 恢复
pub mod session;        // 对外 API
pub mod sim;            // 内存模拟协作者（测试 / 演示）

mod state;
mod command;
mod io_worker;
mod engine;
mod startup;
mod tracks;
mod render_loop;

pub use decoder::{DecoderProxy, FrameResult};
pub use catalog::TrackCatalog;
pub use segment_cache::{CacheCompletion, CachePurpose, SegmentCacheGateway};
pub use manifest_loader::{ManifestLoader, ManifestReply, ThreadedManifestLoader};
pub use events::{EventDispatcher, EventKind, PlayerEvent, PlayerStates, PresentationThread, SubscriptionId};
pub use persist::{JsonFileStore, MemoryStateStore, PersistedState, StateStore};
pub use session::{Collaborators, NativeCallbacks, PlaybackSession};
