//! 测试用的假协作者：硬件线路、记录处理器、视频表面

use crate::core::{
    AudioChunk, AudioFormat, DecodedUnit, LogicalStream, Packet, PlayerError, Result, StreamKind, SubtitleEvent,
    VideoFrame, VideoSurface,
};
use crate::player::audio_sink::AudioLine;
use crate::player::handler::{StreamHandler, UnitQueue};
use parking_lot::Mutex;
use std::sync::Arc;

pub fn stream(id: u32, kind: StreamKind) -> LogicalStream {
    LogicalStream {
        id,
        kind,
        start_time: 0.0,
        end_time: None,
    }
}

#[derive(Default)]
struct FakeLineState {
    capacity: usize,
    frame_bytes: usize,
    queued: usize,
    received: usize,
    played_frames: u64,
    flushed: bool,
    closed: bool,
    gain: Option<f32>,
}

/// 内存中的硬件线路；测试通过句柄模拟硬件播放
pub struct FakeLine {
    state: Arc<Mutex<FakeLineState>>,
}

#[derive(Clone)]
pub struct FakeLineHandle {
    state: Arc<Mutex<FakeLineState>>,
}

impl FakeLine {
    pub const MIN_DB: f32 = -80.0;
    pub const MAX_DB: f32 = 6.0;

    pub fn new(capacity: usize, frame_bytes: usize) -> (Self, FakeLineHandle) {
        let state = Arc::new(Mutex::new(FakeLineState {
            capacity,
            frame_bytes,
            ..FakeLineState::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            FakeLineHandle { state },
        )
    }
}

impl AudioLine for FakeLine {
    fn open(&mut self, _format: &AudioFormat, _buffer_bytes: usize) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let mut state = self.state.lock();
        let accepted = bytes.len().min(state.capacity - state.queued);
        state.queued += accepted;
        state.received += accepted;
        accepted
    }

    fn available(&self) -> usize {
        let state = self.state.lock();
        state.capacity - state.queued
    }

    fn played_frames(&self) -> u64 {
        self.state.lock().played_frames
    }

    fn flush(&mut self) {
        let mut state = self.state.lock();
        state.queued = 0;
        state.flushed = true;
    }

    fn stop(&mut self) {}

    fn close(&mut self) {
        self.state.lock().closed = true;
    }

    fn gain_range(&self) -> Option<(f32, f32)> {
        Some((Self::MIN_DB, Self::MAX_DB))
    }

    fn set_gain(&mut self, db: f32) {
        self.state.lock().gain = Some(db);
    }
}

impl FakeLineHandle {
    /// 硬件播放掉 `bytes` 字节
    pub fn play(&self, bytes: usize) {
        let mut state = self.state.lock();
        let bytes = bytes.min(state.queued);
        state.queued -= bytes;
        state.played_frames += (bytes / state.frame_bytes.max(1)) as u64;
    }

    pub fn received(&self) -> usize {
        self.state.lock().received
    }

    pub fn was_flushed(&self) -> bool {
        self.state.lock().flushed
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn gain(&self) -> Option<f32> {
        self.state.lock().gain
    }
}

pub type UnitLog = Arc<Mutex<Vec<DecodedUnit>>>;

/// 把每个数据包变成一个解码单元并记录下来的处理器
///
/// 第一个成功处理的包同时完成头部阶段。
pub struct RecordingHandler {
    kind: StreamKind,
    units: UnitQueue<DecodedUnit>,
    log: UnitLog,
    headers: bool,
}

impl RecordingHandler {
    pub const CORRUPT: &'static [u8] = b"corrupt";
    pub const BAD_HEADER: &'static [u8] = b"bad-header";
    pub const UNIT_DURATION: f64 = 0.5;

    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            units: UnitQueue::new(),
            log: Arc::new(Mutex::new(Vec::new())),
            headers: false,
        }
    }

    pub fn log(&self) -> UnitLog {
        Arc::clone(&self.log)
    }

    fn unit_for(&self, packet: &Packet) -> DecodedUnit {
        let time = packet.time.unwrap_or(0.0);
        match self.kind {
            StreamKind::Video => DecodedUnit::Video(VideoFrame {
                time,
                duration: Self::UNIT_DURATION,
                width: 1,
                height: 1,
                pixels: packet.data.clone(),
            }),
            StreamKind::Audio => DecodedUnit::Audio(AudioChunk {
                time,
                duration: Self::UNIT_DURATION,
                pcm: packet.data.clone(),
            }),
            StreamKind::Subtitle => DecodedUnit::Subtitle(SubtitleEvent {
                start: time,
                end: time + Self::UNIT_DURATION,
                text: String::from_utf8_lossy(&packet.data).into_owned(),
            }),
        }
    }
}

impl StreamHandler for RecordingHandler {
    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn init(&mut self, _stream: &LogicalStream) {
        self.units.clear();
        self.headers = false;
    }

    fn process(&mut self, packet: &Packet) -> Result<()> {
        if packet.data == Self::BAD_HEADER {
            return Err(PlayerError::header(packet.stream_id, "bad header"));
        }
        if packet.data == Self::CORRUPT {
            return Err(PlayerError::decode(packet.stream_id, "corrupt"));
        }
        let unit = self.unit_for(packet);
        self.log.lock().push(unit.clone());
        self.units.push(unit);
        self.headers = true;
        Ok(())
    }

    fn flush(&mut self) {
        self.units.clear();
    }

    fn is_buffer_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn has_read_headers(&self) -> bool {
        self.headers
    }

    fn time(&self) -> Option<f64> {
        self.units.time()
    }

    fn end_time(&self) -> Option<f64> {
        self.units.end_time()
    }
}

// 记录处理器只用于路由测试，不被同步循环读取
impl crate::player::handler::VideoHandler for RecordingHandler {
    fn peek(&self) -> Option<&VideoFrame> {
        None
    }

    fn skip(&mut self) {
        self.units.pop();
    }

    fn read(&mut self) -> Option<VideoFrame> {
        None
    }
}

impl crate::player::handler::AudioHandler for RecordingHandler {
    fn format(&self) -> Option<AudioFormat> {
        None
    }

    fn read(&mut self) -> Option<AudioChunk> {
        None
    }
}

impl crate::player::handler::SubtitleHandler for RecordingHandler {
    fn peek(&self) -> Option<&SubtitleEvent> {
        None
    }

    fn read(&mut self) -> Option<SubtitleEvent> {
        None
    }
}

/// 记录展示过的视频帧像素
#[derive(Clone, Default)]
pub struct RecordingSurface {
    pub presented: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingSurface {
    /// 每帧第一个字节（测试里用作帧序号）
    pub fn frame_ids(&self) -> Vec<u8> {
        self.presented.lock().iter().filter_map(|p| p.first().copied()).collect()
    }
}

impl VideoSurface for RecordingSurface {
    fn write_pixels(&mut self, _width: u32, _height: u32, pixels: &[u8]) {
        self.presented.lock().push(pixels.to_vec());
    }
}
