use crate::core::{
    AudioChunk, AudioFormat, LogicalStream, Packet, PlayerError, Result, StreamKind, SubtitleEvent, VideoFormat,
    VideoFrame,
};
use crate::player::handler::{AudioHandler, StreamHandler, SubtitleHandler, UnitQueue, VideoHandler};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// 流头部：每个流的第一个包是 JSON 编码的格式描述
fn parse_header<T: for<'de> Deserialize<'de>>(packet: &Packet) -> Result<T> {
    serde_json::from_slice(&packet.data).map_err(|e| PlayerError::header(packet.stream_id, e.to_string()))
}

/// 包没有时间戳时接着上一个单元的结束时间
fn unit_time(packet: &Packet, continuation: Option<f64>, start: f64) -> f64 {
    packet.time.or(continuation).unwrap_or(start)
}

/// 原始视频解码器（负载为 RGBA 像素）
pub struct RawVideoDecoder {
    stream: Option<LogicalStream>,
    format: Option<VideoFormat>,
    frames: UnitQueue<VideoFrame>,
}

impl RawVideoDecoder {
    pub fn new() -> Self {
        Self {
            stream: None,
            format: None,
            frames: UnitQueue::new(),
        }
    }

    pub fn video_format(&self) -> Option<VideoFormat> {
        self.format
    }

    fn stream_start(&self) -> f64 {
        self.stream.as_ref().map_or(0.0, |s| s.start_time)
    }
}

impl Default for RawVideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHandler for RawVideoDecoder {
    fn kind(&self) -> StreamKind {
        StreamKind::Video
    }

    fn init(&mut self, stream: &LogicalStream) {
        self.stream = Some(stream.clone());
        self.format = None;
        self.frames.clear();
    }

    fn process(&mut self, packet: &Packet) -> Result<()> {
        let Some(format) = self.format else {
            let format: VideoFormat = parse_header(packet)?;
            if format.width == 0 || format.height == 0 || !(format.fps > 0.0) {
                return Err(PlayerError::header(packet.stream_id, format!("无效的视频格式: {:?}", format)));
            }
            info!("视频流头部: {}x{} @ {:.2} fps", format.width, format.height, format.fps);
            self.format = Some(format);
            return Ok(());
        };

        if packet.data.len() != format.frame_bytes() {
            return Err(PlayerError::decode(
                packet.stream_id,
                format!("帧大小 {} 与格式不符（应为 {}）", packet.data.len(), format.frame_bytes()),
            ));
        }

        let frame = VideoFrame {
            time: unit_time(packet, self.frames.end_time(), self.stream_start()),
            duration: format.frame_duration(),
            width: format.width,
            height: format.height,
            pixels: packet.data.clone(),
        };
        if !self.frames.push(frame) {
            return Err(PlayerError::decode(packet.stream_id, "视频帧时间倒退"));
        }
        Ok(())
    }

    fn flush(&mut self) {
        if !self.frames.is_empty() {
            debug!("视频解码器 flush: 丢弃 {} 帧", self.frames.len());
        }
        self.frames.clear();
    }

    fn is_buffer_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn has_read_headers(&self) -> bool {
        self.format.is_some()
    }

    fn time(&self) -> Option<f64> {
        self.frames.time()
    }

    fn end_time(&self) -> Option<f64> {
        self.frames.end_time()
    }
}

impl VideoHandler for RawVideoDecoder {
    fn peek(&self) -> Option<&VideoFrame> {
        self.frames.peek()
    }

    fn skip(&mut self) {
        self.frames.pop();
    }

    fn read(&mut self) -> Option<VideoFrame> {
        self.frames.pop()
    }
}

/// PCM 音频解码器（负载为交错的小端整数采样）
pub struct PcmAudioDecoder {
    stream: Option<LogicalStream>,
    format: Option<AudioFormat>,
    chunks: UnitQueue<AudioChunk>,
}

impl PcmAudioDecoder {
    pub fn new() -> Self {
        Self {
            stream: None,
            format: None,
            chunks: UnitQueue::new(),
        }
    }
}

impl Default for PcmAudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHandler for PcmAudioDecoder {
    fn kind(&self) -> StreamKind {
        StreamKind::Audio
    }

    fn init(&mut self, stream: &LogicalStream) {
        self.stream = Some(stream.clone());
        self.format = None;
        self.chunks.clear();
    }

    fn process(&mut self, packet: &Packet) -> Result<()> {
        let Some(format) = self.format else {
            let format: AudioFormat = parse_header(packet)?;
            if format.sample_rate == 0 || format.frame_bytes() == 0 || format.bits_per_sample % 8 != 0 {
                return Err(PlayerError::header(packet.stream_id, format!("无效的音频格式: {:?}", format)));
            }
            info!("音频流头部: {} Hz, {} 声道, {} 位", format.sample_rate, format.channels, format.bits_per_sample);
            self.format = Some(format);
            return Ok(());
        };

        if packet.data.len() % format.frame_bytes() != 0 {
            return Err(PlayerError::decode(
                packet.stream_id,
                format!("PCM 长度 {} 不是帧大小 {} 的整数倍", packet.data.len(), format.frame_bytes()),
            ));
        }

        let start = self.stream.as_ref().map_or(0.0, |s| s.start_time);
        let chunk = AudioChunk {
            time: unit_time(packet, self.chunks.end_time(), start),
            duration: format.duration_of(packet.data.len()),
            pcm: packet.data.clone(),
        };
        if !self.chunks.push(chunk) {
            return Err(PlayerError::decode(packet.stream_id, "音频时间倒退"));
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.chunks.clear();
    }

    fn is_buffer_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn has_read_headers(&self) -> bool {
        self.format.is_some()
    }

    fn time(&self) -> Option<f64> {
        self.chunks.time()
    }

    fn end_time(&self) -> Option<f64> {
        self.chunks.end_time()
    }
}

impl AudioHandler for PcmAudioDecoder {
    fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    fn read(&mut self) -> Option<AudioChunk> {
        self.chunks.pop()
    }
}

/// 字幕流头部
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleHeader {
    #[serde(default)]
    pub language: Option<String>,
}

/// 字幕数据包负载（开始时间取包的时间戳）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitlePayload {
    pub duration: f64,
    pub text: String,
}

/// 文本字幕解码器
pub struct TextSubtitleDecoder {
    header: Option<SubtitleHeader>,
    events: UnitQueue<SubtitleEvent>,
}

impl TextSubtitleDecoder {
    pub fn new() -> Self {
        Self {
            header: None,
            events: UnitQueue::new(),
        }
    }

    pub fn language(&self) -> Option<&str> {
        self.header.as_ref().and_then(|h| h.language.as_deref())
    }
}

impl Default for TextSubtitleDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHandler for TextSubtitleDecoder {
    fn kind(&self) -> StreamKind {
        StreamKind::Subtitle
    }

    fn init(&mut self, _stream: &LogicalStream) {
        self.header = None;
        self.events.clear();
    }

    fn process(&mut self, packet: &Packet) -> Result<()> {
        if self.header.is_none() {
            let header: SubtitleHeader = parse_header(packet)?;
            info!("字幕流头部: 语言 {:?}", header.language);
            self.header = Some(header);
            return Ok(());
        }

        let start = packet
            .time
            .ok_or_else(|| PlayerError::decode(packet.stream_id, "字幕包缺少时间戳"))?;
        let payload: SubtitlePayload = serde_json::from_slice(&packet.data)
            .map_err(|e| PlayerError::decode(packet.stream_id, format!("字幕负载无效: {}", e)))?;
        if !(payload.duration >= 0.0) {
            return Err(PlayerError::decode(packet.stream_id, format!("字幕时长无效: {}", payload.duration)));
        }

        let event = SubtitleEvent {
            start,
            end: start + payload.duration,
            text: payload.text,
        };
        if !self.events.push(event) {
            return Err(PlayerError::decode(packet.stream_id, "字幕时间倒退"));
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.events.clear();
    }

    fn is_buffer_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn has_read_headers(&self) -> bool {
        self.header.is_some()
    }

    fn time(&self) -> Option<f64> {
        self.events.time()
    }

    fn end_time(&self) -> Option<f64> {
        self.events.end_time()
    }
}

impl SubtitleHandler for TextSubtitleDecoder {
    fn peek(&self) -> Option<&SubtitleEvent> {
        self.events.peek()
    }

    fn read(&mut self) -> Option<SubtitleEvent> {
        self.events.pop()
    }
}
