//! myy_sync - 容器解封装与音视频字幕同步播放引擎
//!
//! - `core`：数据类型、播放时钟、配置、错误
//! - `player`：输入源、解封装器、流处理器、音频输出、字幕队列、同步循环与播放器控制面

pub mod core;
pub mod player;

pub use crate::core::{PlayerConfig, PlayerError, Result, SyncConfig, SyncState};
pub use crate::player::{Player, SyncLoop};
