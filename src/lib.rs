// HLS 自适应播放控制核心
//
// - core：数据类型、错误、配置
// - player：命令线程 / IO 线程 / 渲染线程 / 展示线程的编排

pub mod core;
pub mod player;

pub use crate::core::{PlayerConfig, PlayerError, Result};
pub use crate::player::{Collaborators, PlaybackSession, PlayerEvent, PlayerStates};
