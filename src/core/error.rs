use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    /// 读取容器失败（致命，播放循环停止）
    #[error("输入错误: {0}")]
    Input(#[from] std::io::Error),

    /// 单个数据包损坏（局部错误，丢弃该包继续播放）
    #[error("解码错误 (流 {stream_id}): {reason}")]
    Decode { stream_id: u32, reason: String },

    /// 头部解析失败，只禁用对应的逻辑流
    #[error("头部解析失败 (流 {stream_id}): {reason}")]
    Header { stream_id: u32, reason: String },

    #[error("音频设备不可用: {0}")]
    HardwareUnavailable(String),

    #[error("输入长度未知，无法 Seek")]
    NotSeekable,

    #[error("参数无效: {0}")]
    InvalidArgument(String),

    #[error("配置错误: {0}")]
    Config(#[from] serde_json::Error),

    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

impl PlayerError {
    pub fn decode(stream_id: u32, reason: impl Into<String>) -> Self {
        PlayerError::Decode {
            stream_id,
            reason: reason.into(),
        }
    }

    pub fn header(stream_id: u32, reason: impl Into<String>) -> Self {
        PlayerError::Header {
            stream_id,
            reason: reason.into(),
        }
    }

    /// 是否需要中止播放循环
    ///
    /// 只有输入错误是致命的；解码、头部和音频设备错误都在局部处理。
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlayerError::Input(_) | PlayerError::Other(_))
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
