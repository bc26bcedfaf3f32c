use serde::{Deserialize, Serialize};

/// 逻辑流类型（每种类型对应一个编解码器家族）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitle => "subtitle",
        }
    }

    /// 稀疏流：缓冲区经常为空，不能作为泵送数据的条件
    pub fn is_sparse(&self) -> bool {
        matches!(self, StreamKind::Subtitle)
    }

    pub fn to_byte(self) -> u8 {
        match self {
            StreamKind::Video => 0,
            StreamKind::Audio => 1,
            StreamKind::Subtitle => 2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(StreamKind::Video),
            1 => Some(StreamKind::Audio),
            2 => Some(StreamKind::Subtitle),
            _ => None,
        }
    }
}

/// 容器中一条独立计时的基本流
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalStream {
    pub id: u32,
    pub kind: StreamKind,
    pub start_time: f64,        // 起始时间（秒）
    pub end_time: Option<f64>,  // 结束时间（秒），未知为 None
}

/// 解封装得到的数据包，产生后不再修改
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_id: u32,
    pub time: Option<f64>,  // 时间戳提示（秒）
    pub position: u64,      // 在输入中的字节位置
    pub data: Vec<u8>,
}

/// 视频格式（原始视频流的头部）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl VideoFormat {
    pub fn frame_duration(&self) -> f64 {
        if self.fps > 0.0 {
            1.0 / self.fps
        } else {
            0.0
        }
    }

    /// 每帧 RGBA 数据字节数
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// PCM 音频格式（有符号小端整数采样）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 一个采样帧（所有声道）的字节数
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// 每秒字节数
    pub fn byte_rate(&self) -> f64 {
        self.frame_bytes() as f64 * self.sample_rate as f64
    }

    pub fn duration_of(&self, bytes: usize) -> f64 {
        let rate = self.byte_rate();
        if rate > 0.0 {
            bytes as f64 / rate
        } else {
            0.0
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
        }
    }
}

/// 具有展示时间的解码单元
pub trait Timed {
    fn time(&self) -> f64;
    fn end_time(&self) -> f64;
}

/// 视频帧展示目标（窗口/纹理由外部实现）
pub trait VideoSurface {
    fn write_pixels(&mut self, width: u32, height: u32, pixels: &[u8]);
}

/// 视频帧数据
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub time: f64,       // 显示时间戳（秒）
    pub duration: f64,   // 帧持续时间（秒）
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>, // RGBA
}

impl VideoFrame {
    pub fn read_pixels(&self, surface: &mut dyn VideoSurface) {
        surface.write_pixels(self.width, self.height, &self.pixels);
    }
}

impl Timed for VideoFrame {
    fn time(&self) -> f64 {
        self.time
    }

    fn end_time(&self) -> f64 {
        self.time + self.duration
    }
}

/// 音频块数据
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub time: f64,
    pub duration: f64,
    pub pcm: Vec<u8>,
}

impl Timed for AudioChunk {
    fn time(&self) -> f64 {
        self.time
    }

    fn end_time(&self) -> f64 {
        self.time + self.duration
    }
}

/// 字幕事件
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEvent {
    pub start: f64,  // 开始显示时间（秒）
    pub end: f64,    // 结束显示时间（秒）
    pub text: String,
}

impl Timed for SubtitleEvent {
    fn time(&self) -> f64 {
        self.start
    }

    fn end_time(&self) -> f64 {
        self.end
    }
}

/// 按流类型区分的解码单元
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedUnit {
    Video(VideoFrame),
    Audio(AudioChunk),
    Subtitle(SubtitleEvent),
}

impl DecodedUnit {
    pub fn kind(&self) -> StreamKind {
        match self {
            DecodedUnit::Video(_) => StreamKind::Video,
            DecodedUnit::Audio(_) => StreamKind::Audio,
            DecodedUnit::Subtitle(_) => StreamKind::Subtitle,
        }
    }
}

impl Timed for DecodedUnit {
    fn time(&self) -> f64 {
        match self {
            DecodedUnit::Video(f) => f.time(),
            DecodedUnit::Audio(c) => c.time(),
            DecodedUnit::Subtitle(e) => e.time(),
        }
    }

    fn end_time(&self) -> f64 {
        match self {
            DecodedUnit::Video(f) => f.end_time(),
            DecodedUnit::Audio(c) => c.end_time(),
            DecodedUnit::Subtitle(e) => e.end_time(),
        }
    }
}

/// 同步循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// 目标时间未知，等待第一个解封装时间
    Prime,
    Tracking,
    Seeking,
    Ended,
}
