use crate::core::{LogicalStream, Packet, PlayerError, Result, StreamKind};
use crate::player::demuxer_source::ContainerReader;
use crate::player::handler::{HandlerSet, StreamHandler};
use log::{debug, info, warn};

/// 逻辑流与处理器的绑定（一经绑定不再改变）
#[derive(Debug, Clone, Copy, PartialEq)]
struct Binding {
    stream_id: u32,
    kind: StreamKind,
    disabled: bool,
}

/// 数据包路由统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub routed: u64,
    pub unclaimed: u64,
    pub decode_errors: u64,
}

/// 解封装器 - 读取数据包并路由到认领了该逻辑流的处理器
pub struct Demuxer {
    reader: Option<Box<dyn ContainerReader>>,
    handlers: HandlerSet,
    bindings: Vec<Binding>,
    eof: bool,
    time: Option<f64>,
    stats: RouteStats,
}

impl Demuxer {
    pub fn new() -> Self {
        Self {
            reader: None,
            handlers: HandlerSet::new(),
            bindings: Vec::new(),
            eof: true,
            time: None,
            stats: RouteStats::default(),
        }
    }

    /// 设置容器读取器（替换之前的输入）
    pub fn set_reader(&mut self, reader: Box<dyn ContainerReader>) -> Result<()> {
        self.close()?;
        info!("🎬 解封装器输入: {}", reader.description());
        self.reader = Some(reader);
        self.eof = false;
        self.time = None;
        self.stats = RouteStats::default();
        self.bindings.clear();
        self.bind_streams();
        Ok(())
    }

    /// 注册处理器集合
    pub fn register_handlers(&mut self, handlers: HandlerSet) {
        self.handlers = handlers;
        self.bindings.clear();
        self.bind_streams();
    }

    /// 贪心绑定：按出现顺序，每个逻辑流绑定到第一个类型匹配且尚未绑定的处理器
    fn bind_streams(&mut self) {
        let Some(reader) = self.reader.as_ref() else {
            return;
        };
        let streams: Vec<LogicalStream> = reader.streams().to_vec();

        for stream in &streams {
            let wanted = self.handlers.get(stream.kind).is_some()
                && !self.bindings.iter().any(|b| b.kind == stream.kind);
            if !wanted {
                debug!("忽略流 {} ({})", stream.id, stream.kind.as_str());
                continue;
            }
            if let Some(handler) = self.handlers.get_mut(stream.kind) {
                handler.init(stream);
            }
            self.bindings.push(Binding {
                stream_id: stream.id,
                kind: stream.kind,
                disabled: false,
            });
            info!("🔗 流 {} 绑定到{}处理器", stream.id, stream.kind.as_str());
        }

        for kind in self.handlers.kinds() {
            if !self.bindings.iter().any(|b| b.kind == kind) {
                warn!("⚠️  没有找到{}流", kind.as_str());
            }
        }
    }

    /// 读取下一个数据包并路由；到达末尾返回 false
    pub fn pump(&mut self) -> Result<bool> {
        let Some(reader) = self.reader.as_mut() else {
            self.eof = true;
            return Ok(false);
        };
        if self.eof {
            return Ok(false);
        }

        match reader.read_packet()? {
            Some(packet) => {
                if packet.time.is_some() {
                    self.time = packet.time;
                }
                self.route(&packet);
                Ok(true)
            }
            None => {
                info!("📄 解封装器到达输入末尾（路由 {} 个包，丢弃 {} 个）", self.stats.routed, self.stats.unclaimed);
                self.eof = true;
                Ok(false)
            }
        }
    }

    fn route(&mut self, packet: &Packet) {
        let Some(index) = self
            .bindings
            .iter()
            .position(|b| b.stream_id == packet.stream_id && !b.disabled)
        else {
            self.stats.unclaimed += 1;
            return;
        };

        let kind = self.bindings[index].kind;
        let Some(handler) = self.handlers.get_mut(kind) else {
            self.stats.unclaimed += 1;
            return;
        };

        self.stats.routed += 1;
        match handler.process(packet) {
            Ok(()) => {}
            Err(PlayerError::Header { stream_id, reason }) => {
                warn!("⚠️  流 {} 头部解析失败，禁用该流: {}", stream_id, reason);
                handler.flush();
                self.bindings[index].disabled = true;
            }
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!("解码错误（已丢弃数据包 @{}）: {}", packet.position, e);
            }
        }
    }

    /// 持续泵送直到条件满足或输入结束
    pub fn pump_until(&mut self, mut done: impl FnMut(&Demuxer) -> bool) -> Result<()> {
        while !done(self) {
            if !self.pump()? {
                break;
            }
        }
        Ok(())
    }

    /// 头部阶段：泵送直到所有活动处理器都读完头部
    pub fn read_headers(&mut self) -> Result<()> {
        self.pump_until(|demuxer| {
            demuxer
                .active_kinds()
                .into_iter()
                .all(|kind| demuxer.handler(kind).map_or(true, |h| h.has_read_headers()))
        })?;
        debug!("头部阶段完成，活动流: {:?}", self.active_kinds());
        Ok(())
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn is_seekable(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| r.is_seekable())
    }

    /// 最近读取的数据包的时间（秒）
    pub fn time(&self) -> Option<f64> {
        self.time
    }

    pub fn end_time(&self) -> Option<f64> {
        self.reader.as_ref().and_then(|r| r.end_time())
    }

    /// 按比例 Seek（只移动读取位置，处理器由调用方 flush）
    pub fn seek_fraction(&mut self, fraction: f64) -> Result<()> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(PlayerError::InvalidArgument(format!("Seek 比例必须在 [0, 1] 内: {}", fraction)));
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| PlayerError::InvalidArgument("没有输入".to_string()))?;
        if !reader.is_seekable() {
            return Err(PlayerError::NotSeekable);
        }
        reader.seek_fraction(fraction)?;
        self.eof = false;
        self.time = None;
        Ok(())
    }

    /// 流已绑定且未被禁用
    pub fn is_active(&self, kind: StreamKind) -> bool {
        self.bindings.iter().any(|b| b.kind == kind && !b.disabled)
    }

    pub fn active_kinds(&self) -> Vec<StreamKind> {
        self.bindings.iter().filter(|b| !b.disabled).map(|b| b.kind).collect()
    }

    pub fn bound_stream(&self, kind: StreamKind) -> Option<u32> {
        self.bindings.iter().find(|b| b.kind == kind).map(|b| b.stream_id)
    }

    pub fn handler(&self, kind: StreamKind) -> Option<&dyn StreamHandler> {
        self.handlers.get(kind)
    }

    pub fn handlers(&self) -> &HandlerSet {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerSet {
        &mut self.handlers
    }

    /// 活动处理器的缓冲区是否都为空
    pub fn buffers_empty(&self) -> bool {
        self.active_kinds()
            .into_iter()
            .all(|kind| self.handler(kind).map_or(true, |h| h.is_buffer_empty()))
    }

    pub fn flush_handlers(&mut self) {
        for kind in [StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle] {
            if let Some(handler) = self.handlers.get_mut(kind) {
                handler.flush();
            }
        }
    }

    pub fn stats(&self) -> RouteStats {
        self.stats
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(mut reader) = self.reader.take() {
            debug!("关闭输入: {}", reader.description());
            reader.close()?;
        }
        self.eof = true;
        Ok(())
    }
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Timed;
    use crate::player::demuxer_source::PacketList;
    use crate::player::testing::{stream, RecordingHandler, UnitLog};

    struct Logs {
        video: UnitLog,
        audio: UnitLog,
        subtitle: UnitLog,
    }

    fn recording_set() -> (HandlerSet, Logs) {
        let video = RecordingHandler::new(StreamKind::Video);
        let audio = RecordingHandler::new(StreamKind::Audio);
        let subtitle = RecordingHandler::new(StreamKind::Subtitle);
        let logs = Logs {
            video: video.log(),
            audio: audio.log(),
            subtitle: subtitle.log(),
        };
        let set = HandlerSet::new().with_video(video).with_audio(audio).with_subtitle(subtitle);
        (set, logs)
    }

    fn times(log: &UnitLog) -> Vec<f64> {
        log.lock().iter().map(|u| u.time()).collect()
    }

    fn packet(stream_id: u32, time: f64) -> Packet {
        Packet { stream_id, time: Some(time), position: time as u64, data: vec![stream_id as u8] }
    }

    fn demuxer_with(streams: Vec<LogicalStream>, packets: Vec<Packet>) -> (Demuxer, Logs) {
        let (set, logs) = recording_set();
        let mut demuxer = Demuxer::new();
        demuxer.register_handlers(set);
        demuxer.set_reader(Box::new(PacketList::new(streams, packets))).unwrap();
        (demuxer, logs)
    }

    #[test]
    fn test_alternating_packets_reach_their_own_handlers_in_order() {
        let streams = vec![stream(10, StreamKind::Audio), stream(11, StreamKind::Video), stream(12, StreamKind::Subtitle)];
        let ids = [10, 11, 12];
        let packets = (0..9).map(|i| packet(ids[i % 3], i as f64)).collect();

        let (mut demuxer, logs) = demuxer_with(streams, packets);
        demuxer.pump_until(|d| d.is_eof()).unwrap();

        for (kind, log, expected) in [
            (StreamKind::Audio, &logs.audio, vec![0.0, 3.0, 6.0]),
            (StreamKind::Video, &logs.video, vec![1.0, 4.0, 7.0]),
            (StreamKind::Subtitle, &logs.subtitle, vec![2.0, 5.0, 8.0]),
        ] {
            assert!(log.lock().iter().all(|u| u.kind() == kind));
            assert_eq!(times(log), expected);
            assert!(!demuxer.handler(kind).unwrap().is_buffer_empty());
        }
        assert_eq!(demuxer.stats().routed, 9);
        assert_eq!(demuxer.time(), Some(8.0));
    }

    #[test]
    fn test_greedy_binding_is_first_match_and_permanent() {
        let streams = vec![
            stream(1, StreamKind::Video),
            stream(2, StreamKind::Video),
            stream(3, StreamKind::Audio),
        ];
        let packets = vec![packet(2, 0.0), packet(1, 0.5), packet(3, 1.0), packet(2, 1.5), packet(99, 2.0)];

        let (mut demuxer, logs) = demuxer_with(streams, packets);
        assert_eq!(demuxer.bound_stream(StreamKind::Video), Some(1));
        assert!(!demuxer.is_active(StreamKind::Subtitle));

        demuxer.pump_until(|d| d.is_eof()).unwrap();
        assert_eq!(times(&logs.video), vec![0.5]);
        assert_eq!(times(&logs.audio), vec![1.0]);

        let stats = demuxer.stats();
        assert_eq!(stats.routed, 2);
        assert_eq!(stats.unclaimed, 3);
    }

    #[test]
    fn test_decode_error_drops_packet_and_continues() {
        let mut bad = packet(1, 1.0);
        bad.data = RecordingHandler::CORRUPT.to_vec();
        let packets = vec![packet(1, 0.0), bad, packet(1, 2.0)];

        let (mut demuxer, logs) = demuxer_with(vec![stream(1, StreamKind::Audio)], packets);
        demuxer.pump_until(|d| d.is_eof()).unwrap();

        assert_eq!(times(&logs.audio), vec![0.0, 2.0]);
        assert_eq!(demuxer.stats().decode_errors, 1);
        assert!(demuxer.is_active(StreamKind::Audio));
    }

    #[test]
    fn test_header_failure_disables_only_its_stream() {
        let streams = vec![stream(1, StreamKind::Audio), stream(2, StreamKind::Video)];
        let mut bad_header = packet(1, 0.0);
        bad_header.data = RecordingHandler::BAD_HEADER.to_vec();
        let packets = vec![bad_header, packet(2, 0.0), packet(1, 0.5), packet(2, 0.5)];

        let (mut demuxer, logs) = demuxer_with(streams, packets);
        demuxer.pump_until(|d| d.is_eof()).unwrap();

        assert!(!demuxer.is_active(StreamKind::Audio));
        assert!(demuxer.is_active(StreamKind::Video));
        assert!(logs.audio.lock().is_empty());
        assert_eq!(times(&logs.video), vec![0.0, 0.5]);
    }

    #[test]
    fn test_read_headers_stops_once_every_handler_is_ready() {
        let streams = vec![stream(1, StreamKind::Audio), stream(2, StreamKind::Video)];
        let packets = vec![packet(1, 0.0), packet(2, 0.0), packet(1, 0.5), packet(2, 0.5)];

        let (mut demuxer, _logs) = demuxer_with(streams, packets);
        demuxer.read_headers().unwrap();
        assert_eq!(demuxer.stats().routed, 2);
        assert!(!demuxer.is_eof());
    }

    #[test]
    fn test_seek_rejects_out_of_range_fraction() {
        let (mut demuxer, _logs) = demuxer_with(vec![stream(1, StreamKind::Audio)], vec![packet(1, 0.0)]);
        assert!(matches!(demuxer.seek_fraction(1.5), Err(PlayerError::InvalidArgument(_))));
        assert!(matches!(demuxer.seek_fraction(f64::NAN), Err(PlayerError::InvalidArgument(_))));
        demuxer.pump_until(|d| d.is_eof()).unwrap();
        demuxer.seek_fraction(0.0).unwrap();
        assert!(!demuxer.is_eof());
        assert_eq!(demuxer.time(), None);
    }
}
