use crate::core::{AudioChunk, AudioFormat, LogicalStream, Packet, Result, StreamKind, SubtitleEvent, Timed, VideoFrame};
use std::collections::VecDeque;

/// 流处理器能力（每个编解码器家族实现一次）
///
/// 核心只调用这七个操作，不解析负载内容。
pub trait StreamHandler: Send {
    fn kind(&self) -> StreamKind;

    /// 绑定到一个逻辑流
    fn init(&mut self, stream: &LogicalStream);

    /// 解码一个数据包；负载损坏时返回 `PlayerError::Decode`，调用方继续
    fn process(&mut self, packet: &Packet) -> Result<()>;

    /// 丢弃缓冲的解码结果和未完成的解码状态
    fn flush(&mut self);

    fn is_buffer_empty(&self) -> bool;

    fn has_read_headers(&self) -> bool;

    /// 最早缓冲单元的时间；缓冲为空时为已解码到的时间
    fn time(&self) -> Option<f64>;

    /// 已解码到的结束时间
    fn end_time(&self) -> Option<f64>;
}

pub trait VideoHandler: StreamHandler {
    fn peek(&self) -> Option<&VideoFrame>;

    /// 丢弃最早的一帧（迟到帧）
    fn skip(&mut self);

    fn read(&mut self) -> Option<VideoFrame>;
}

pub trait AudioHandler: StreamHandler {
    fn format(&self) -> Option<AudioFormat>;

    fn read(&mut self) -> Option<AudioChunk>;
}

pub trait SubtitleHandler: StreamHandler {
    fn peek(&self) -> Option<&SubtitleEvent>;

    fn read(&mut self) -> Option<SubtitleEvent>;
}

/// 注册到解封装器的处理器集合（每种类型最多一个）
#[derive(Default)]
pub struct HandlerSet {
    pub video: Option<Box<dyn VideoHandler>>,
    pub audio: Option<Box<dyn AudioHandler>>,
    pub subtitle: Option<Box<dyn SubtitleHandler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(mut self, handler: impl VideoHandler + 'static) -> Self {
        self.video = Some(Box::new(handler));
        self
    }

    pub fn with_audio(mut self, handler: impl AudioHandler + 'static) -> Self {
        self.audio = Some(Box::new(handler));
        self
    }

    pub fn with_subtitle(mut self, handler: impl SubtitleHandler + 'static) -> Self {
        self.subtitle = Some(Box::new(handler));
        self
    }

    pub fn get(&self, kind: StreamKind) -> Option<&dyn StreamHandler> {
        match kind {
            StreamKind::Video => self.video.as_deref().map(|h| h as &dyn StreamHandler),
            StreamKind::Audio => self.audio.as_deref().map(|h| h as &dyn StreamHandler),
            StreamKind::Subtitle => self.subtitle.as_deref().map(|h| h as &dyn StreamHandler),
        }
    }

    pub fn get_mut(&mut self, kind: StreamKind) -> Option<&mut dyn StreamHandler> {
        match kind {
            StreamKind::Video => self.video.as_deref_mut().map(|h| h as &mut dyn StreamHandler),
            StreamKind::Audio => self.audio.as_deref_mut().map(|h| h as &mut dyn StreamHandler),
            StreamKind::Subtitle => self.subtitle.as_deref_mut().map(|h| h as &mut dyn StreamHandler),
        }
    }

    /// 已注册的类型
    pub fn kinds(&self) -> Vec<StreamKind> {
        [StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle]
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }
}

/// 解码单元队列，记录已解码到的时间
///
/// 同一流内单元时间不递减；时间倒退的单元被拒绝。
#[derive(Debug)]
pub struct UnitQueue<T: Timed> {
    units: VecDeque<T>,
    decoded_end: Option<f64>,
}

impl<T: Timed> UnitQueue<T> {
    pub fn new() -> Self {
        Self {
            units: VecDeque::new(),
            decoded_end: None,
        }
    }

    /// 追加一个单元；时间早于上一个单元时返回 false
    pub fn push(&mut self, unit: T) -> bool {
        if let Some(last) = self.units.back() {
            if unit.time() < last.time() {
                return false;
            }
        }
        let end = unit.end_time();
        self.decoded_end = Some(self.decoded_end.map_or(end, |e| e.max(end)));
        self.units.push_back(unit);
        true
    }

    pub fn peek(&self) -> Option<&T> {
        self.units.front()
    }

    pub fn pop(&mut self) -> Option<T> {
        self.units.pop_front()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn time(&self) -> Option<f64> {
        self.units.front().map(|u| u.time()).or(self.decoded_end)
    }

    pub fn end_time(&self) -> Option<f64> {
        self.decoded_end
    }

    /// 清空（Seek 后解码时间重新开始）
    pub fn clear(&mut self) {
        self.units.clear();
        self.decoded_end = None;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.units.iter()
    }
}

impl<T: Timed> Default for UnitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
