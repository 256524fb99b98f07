// 核心数据结构和类型定义

pub mod types;
pub mod error;
pub mod config;

pub use types::*;
pub use error::*;
pub use config::PlayerConfig;

use std::process;
use std::thread;

/// 日志上下文前缀：区分命令线程、渲染线程、IO 线程和展示线程
pub fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
