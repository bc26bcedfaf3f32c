use crate::core::{PlayerConfig, PlayerError, Result, SyncState, VideoSurface};
use crate::player::audio_output;
use crate::player::audio_sink::AudioLine;
use crate::player::decoder::{PcmAudioDecoder, RawVideoDecoder, TextSubtitleDecoder};
use crate::player::demuxer::Demuxer;
use crate::player::demuxer_source::ContainerReader;
use crate::player::handler::HandlerSet;
use crate::player::input::InputSource;
use crate::player::packet_log::PacketLogReader;
use crate::player::sync_loop::SyncLoop;
use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

/// 播放线程命令
#[derive(Debug)]
pub enum PlayerCommand {
    /// 比例 [0, 1]；结果通过应答通道返回
    Seek(f64, Sender<Result<()>>),
    SetVolume(f64),
    Stop,
}

/// 播放状态快照（任意线程可读）
struct PlayerStatus {
    time: AtomicCell<Option<f64>>,
    end_time: AtomicCell<Option<f64>>,
    state: AtomicCell<SyncState>,
    eof: AtomicBool,
    volume: AtomicCell<f64>,
    subtitles: Mutex<Vec<String>>,
    error: Mutex<Option<PlayerError>>,
}

impl PlayerStatus {
    fn new() -> Self {
        Self {
            time: AtomicCell::new(None),
            end_time: AtomicCell::new(None),
            state: AtomicCell::new(SyncState::Prime),
            eof: AtomicBool::new(false),
            volume: AtomicCell::new(1.0),
            subtitles: Mutex::new(Vec::new()),
            error: Mutex::new(None),
        }
    }

    fn publish(&self, sync: &SyncLoop, subtitle_lines: usize) {
        self.time.store(sync.target());
        self.end_time.store(sync.demuxer().end_time());
        self.state.store(sync.state());
        self.eof.store(sync.state() == SyncState::Ended, Ordering::SeqCst);
        *self.subtitles.lock() = sync.subtitle_text(subtitle_lines);
    }
}

type HandlerFactory = Box<dyn Fn() -> HandlerSet + Send>;
type LineFactory = Box<dyn FnMut() -> Option<Box<dyn AudioLine>> + Send>;

/// 默认处理器：原始视频 / PCM 音频 / 文本字幕
pub fn default_handlers() -> HandlerSet {
    HandlerSet::new()
        .with_video(RawVideoDecoder::new())
        .with_audio(PcmAudioDecoder::new())
        .with_subtitle(TextSubtitleDecoder::new())
}

/// 播放器 - 外部 CLI/UI 使用的控制面
///
/// `set_input` 准备同步循环，`start` 把它移到独立的播放线程里运行，
/// `stop` 结束线程并把同步循环取回（可以再次 `start` 从当前位置继续）。
pub struct Player {
    config: PlayerConfig,
    handlers: HandlerFactory,
    line_factory: LineFactory,
    surface: Option<Box<dyn VideoSurface + Send>>,
    sync: Option<SyncLoop>,
    status: Arc<PlayerStatus>,
    command_tx: Option<Sender<PlayerCommand>>,
    playback_thread: Option<JoinHandle<SyncLoop>>,
}

impl Player {
    pub fn new(config: PlayerConfig) -> Self {
        info!("{} 🎮 创建播放器", log_ctx());
        Self {
            config,
            handlers: Box::new(default_handlers),
            line_factory: Box::new(audio_output::default_line),
            surface: None,
            sync: None,
            status: Arc::new(PlayerStatus::new()),
            command_tx: None,
            playback_thread: None,
        }
    }

    /// 替换处理器集合的构造方式（每次 `set_input` 调用一次）
    pub fn with_handlers(mut self, factory: impl Fn() -> HandlerSet + Send + 'static) -> Self {
        self.handlers = Box::new(factory);
        self
    }

    /// 替换音频线路的构造方式（每次 `start` 调用一次）
    pub fn with_line_factory(mut self, factory: impl FnMut() -> Option<Box<dyn AudioLine>> + Send + 'static) -> Self {
        self.line_factory = Box::new(factory);
        self
    }

    /// 设置视频展示目标（下一次 `set_input` 或 `start` 时生效）
    pub fn set_surface(&mut self, surface: Box<dyn VideoSurface + Send>) {
        match self.sync.as_mut() {
            Some(sync) => sync.set_surface(surface),
            None => self.surface = Some(surface),
        }
    }

    /// 设置输入（停止当前播放）
    pub fn set_input(&mut self, reader: Box<dyn ContainerReader>) -> Result<()> {
        self.stop();
        if let Some(mut old) = self.sync.take() {
            old.close()?;
        }

        let mut demuxer = Demuxer::new();
        demuxer.register_handlers((self.handlers)());
        demuxer.set_reader(reader)?;

        let mut sync = SyncLoop::new(demuxer, self.config.sync.clone());
        if let Some(surface) = self.surface.take() {
            sync.set_surface(surface);
        }

        *self.status.error.lock() = None;
        self.status.eof.store(false, Ordering::SeqCst);
        self.status.publish(&sync, self.config.subtitle_lines);
        self.sync = Some(sync);
        Ok(())
    }

    /// 以数据包日志格式打开输入源
    pub fn set_input_source(&mut self, input: Box<dyn InputSource>) -> Result<()> {
        let reader = PacketLogReader::open(input)?;
        self.set_input(Box::new(reader))
    }

    /// 启动播放线程
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        // 线程因错误退出时先取回同步循环
        self.stop();
        let mut sync = self
            .sync
            .take()
            .ok_or_else(|| PlayerError::InvalidArgument("没有设置输入".to_string()))?;

        if let Err(e) = sync.open_audio((self.line_factory)(), self.config.audio.clone()) {
            // 头部阶段就读不下去，输入本身有问题
            error!("{} ❌ 打开音频失败: {}", log_ctx(), e);
            self.sync = Some(sync);
            return Err(e);
        }
        if let Some(sink) = sync.audio_sink() {
            sink.set_volume(self.status.volume.load());
        }

        let (command_tx, command_rx) = unbounded::<PlayerCommand>();
        let status = Arc::clone(&self.status);
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || Self::playback_loop(sync, command_rx, status, config))?;

        self.command_tx = Some(command_tx);
        self.playback_thread = Some(handle);
        info!("{} ▶️ 播放线程已启动", log_ctx());
        Ok(())
    }

    /// 播放循环（在独立线程中运行）
    ///
    /// - 每次 tick 前先处理所有命令（非阻塞）
    /// - 领先时在命令通道上等待建议的休眠时长，收到命令立即处理
    /// - 播放结束后保持线程存活，等待 Seek/Stop
    /// - 输入错误是致命的：记录错误并退出
    fn playback_loop(
        mut sync: SyncLoop,
        command_rx: Receiver<PlayerCommand>,
        status: Arc<PlayerStatus>,
        config: PlayerConfig,
    ) -> SyncLoop {
        info!("{} 🎬 播放线程启动", log_ctx());
        sync.resume();
        let mut pending: Option<PlayerCommand> = None;

        'run: loop {
            while let Some(command) = pending.take().or_else(|| command_rx.try_recv().ok()) {
                if !Self::handle_command(&mut sync, command, &status) {
                    break 'run;
                }
            }

            let outcome = match sync.tick_at(Instant::now()) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{} ❌ 播放循环中止: {}", log_ctx(), e);
                    status.eof.store(true, Ordering::SeqCst);
                    *status.error.lock() = Some(e);
                    break;
                }
            };
            status.publish(&sync, config.subtitle_lines);

            let wait = match (outcome.state, outcome.sleep) {
                (SyncState::Ended, _) => Some(config.idle_poll()),
                (_, sleep) => sleep,
            };
            if let Some(wait) = wait {
                match command_rx.recv_timeout(wait) {
                    Ok(command) => pending = Some(command),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        sync.close_audio();
        info!("{} 🛑 播放线程退出（{:?}）", log_ctx(), sync.stats());
        sync
    }

    /// 处理一条命令；返回 false 表示退出播放循环
    fn handle_command(sync: &mut SyncLoop, command: PlayerCommand, status: &PlayerStatus) -> bool {
        match command {
            PlayerCommand::Seek(fraction, reply) => {
                let result = sync.seek_fraction(fraction);
                match &result {
                    Ok(()) => {
                        status.eof.store(false, Ordering::SeqCst);
                        status.time.store(None);
                        status.state.store(sync.state());
                    }
                    Err(e) => warn!("{} ⚠️  Seek 失败: {}", log_ctx(), e),
                }
                // 调用方可能已经不再等待
                let _ = reply.send(result);
                true
            }
            PlayerCommand::SetVolume(volume) => {
                if let Some(sink) = sync.audio_sink() {
                    sink.set_volume(volume);
                }
                true
            }
            PlayerCommand::Stop => {
                info!("{} ⏹ 播放线程收到停止命令", log_ctx());
                false
            }
        }
    }

    /// 停止播放线程，阻塞到线程退出并释放音频线路
    pub fn stop(&mut self) {
        let Some(handle) = self.playback_thread.take() else {
            return;
        };
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(PlayerCommand::Stop);
        }
        match handle.join() {
            Ok(sync) => {
                // 致命错误之后保持 eof
                if self.status.error.lock().is_none() {
                    self.status.publish(&sync, self.config.subtitle_lines);
                }
                self.sync = Some(sync);
            }
            Err(_) => error!("{} ❌ 播放线程异常退出", log_ctx()),
        }
        debug!("{} 播放已停止", log_ctx());
    }

    pub fn is_running(&self) -> bool {
        self.playback_thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn is_eof(&self) -> bool {
        self.status.eof.load(Ordering::SeqCst)
    }

    /// 当前播放时间（秒）；对齐之前为 None
    pub fn time(&self) -> Option<f64> {
        self.status.time.load()
    }

    pub fn end_time(&self) -> Option<f64> {
        self.status.end_time.load()
    }

    pub fn state(&self) -> SyncState {
        self.status.state.load()
    }

    /// 当前应显示的字幕行
    pub fn subtitles(&self) -> Vec<String> {
        self.status.subtitles.lock().clone()
    }

    /// 按比例 Seek
    ///
    /// 播放中时由播放线程执行，阻塞到它返回结果（例如 `NotSeekable`）。
    pub fn seek_fraction(&mut self, fraction: f64) -> Result<()> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(PlayerError::InvalidArgument(format!("Seek 比例必须在 [0, 1] 内: {}", fraction)));
        }
        // 线程已经因错误退出时先取回同步循环
        if self.playback_thread.is_some() && !self.is_running() {
            self.stop();
        }
        if let Some(tx) = self.command_tx.as_ref().filter(|_| self.playback_thread.is_some()) {
            let (reply_tx, reply_rx) = bounded(1);
            tx.send(PlayerCommand::Seek(fraction, reply_tx))
                .map_err(|e| PlayerError::Other(anyhow::anyhow!("发送 Seek 命令失败: {}", e)))?;
            return reply_rx
                .recv()
                .map_err(|_| PlayerError::Other(anyhow::anyhow!("播放线程已退出，Seek 未执行")))?;
        }

        let sync = self
            .sync
            .as_mut()
            .ok_or_else(|| PlayerError::InvalidArgument("没有设置输入".to_string()))?;
        sync.seek_fraction(fraction)?;
        self.status.eof.store(false, Ordering::SeqCst);
        self.status.publish(sync, self.config.subtitle_lines);
        Ok(())
    }

    /// 设置音量 [0, 1]
    pub fn set_volume(&mut self, volume: f64) {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 1.0 };
        self.status.volume.store(volume);
        if let Some(tx) = self.command_tx.as_ref() {
            let _ = tx.send(PlayerCommand::SetVolume(volume));
        }
    }

    pub fn volume(&self) -> f64 {
        self.status.volume.load()
    }

    /// 取出播放线程记录的致命错误
    pub fn take_error(&self) -> Option<PlayerError> {
        self.status.error.lock().take()
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if self.playback_thread.is_some() {
            warn!("{} ⚠ Player 被 drop，但可能未调用 stop()，正在尝试优雅停止", log_ctx());
        }
        self.stop();
        if let Some(mut sync) = self.sync.take() {
            if let Err(e) = sync.close() {
                warn!("关闭输入失败: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AudioFormat, LogicalStream, Packet, StreamKind, SyncConfig, VideoFormat};
    use crate::player::decoder::{SubtitleHeader, SubtitlePayload};
    use crate::player::demuxer_source::PacketList;
    use crate::player::input::{MemoryInput, ReaderInput};
    use crate::player::packet_log::PacketLogWriter;
    use crate::player::testing::{stream, FakeLine, FakeLineHandle, RecordingSurface};
    use std::time::Duration;

    fn json<T: serde::Serialize>(value: &T) -> Vec<u8> {
        serde_json::to_vec(value).unwrap()
    }

    fn audio_format() -> AudioFormat {
        AudioFormat { sample_rate: 1000, channels: 1, bits_per_sample: 16 }
    }

    fn streams() -> Vec<LogicalStream> {
        vec![
            stream(1, StreamKind::Video),
            stream(2, StreamKind::Audio),
            stream(3, StreamKind::Subtitle),
        ]
    }

    /// 0.1 秒一帧，`frames` 帧，字幕覆盖整个时长
    fn packets(frames: u8) -> Vec<(u32, Option<f64>, Vec<u8>)> {
        let mut packets = vec![
            (1, None, json(&VideoFormat { width: 1, height: 1, fps: 10.0 })),
            (2, None, json(&audio_format())),
            (3, None, json(&SubtitleHeader { language: Some("en".into()) })),
            (3, Some(0.0), json(&SubtitlePayload { duration: 60.0, text: "caption".into() })),
        ];
        for i in 0..frames {
            let time = f64::from(i) * 0.1;
            packets.push((1, Some(time), vec![i, 0, 0, 255]));
            packets.push((2, Some(time), vec![0; 200]));
        }
        packets
    }

    fn packet_log(frames: u8) -> Vec<u8> {
        let mut writer = PacketLogWriter::new(Vec::new(), &streams()).unwrap();
        for (stream_id, time, data) in packets(frames) {
            writer.write_packet(stream_id, time, &data).unwrap();
        }
        writer.finish().unwrap()
    }

    fn packet_list(frames: u8) -> PacketList {
        let packets = packets(frames)
            .into_iter()
            .map(|(stream_id, time, data)| Packet { stream_id, time, position: 0, data })
            .collect();
        PacketList::new(streams(), packets)
    }

    fn fast_config() -> PlayerConfig {
        PlayerConfig {
            sync: SyncConfig { limit_speed: false, ..SyncConfig::default() },
            idle_poll_ms: 5,
            ..PlayerConfig::default()
        }
    }

    fn player_with_fake_line() -> (Player, FakeLineHandle) {
        let (line, handle) = FakeLine::new(1 << 16, audio_format().frame_bytes());
        let mut line = Some(line);
        let player = Player::new(fast_config())
            .with_line_factory(move || line.take().map(|l| Box::new(l) as Box<dyn AudioLine>));
        (player, handle)
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_plays_to_end_and_releases_line() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (mut player, handle) = player_with_fake_line();
        let surface = RecordingSurface::default();
        player.set_surface(Box::new(surface.clone()));
        player.set_input(Box::new(packet_list(5))).unwrap();
        assert_eq!(player.time(), None);

        player.start().unwrap();
        assert!(player.is_running());
        // 模拟硬件播放：每次轮询播放 0.1 秒
        assert!(
            wait_until(|| {
                handle.play(200);
                player.is_eof()
            }),
            "播放没有结束"
        );
        assert_eq!(player.state(), SyncState::Ended);
        assert!(!surface.frame_ids().is_empty());
        // 排空线程把 PCM 写进了线路
        assert!(handle.received() > 0);

        player.stop();
        assert!(!player.is_running());
        assert!(handle.is_closed());
        assert!(player.take_error().is_none());
    }

    #[test]
    fn test_plays_packet_log_from_memory() {
        let bytes = packet_log(4);
        let mut player = Player::new(fast_config()).with_line_factory(|| None);
        player.set_input_source(Box::new(MemoryInput::new(bytes))).unwrap();
        player.start().unwrap();
        assert!(wait_until(|| player.is_eof()));
        player.stop();
        assert!(player.time().is_some());
    }

    #[test]
    fn test_subtitles_visible_in_status() {
        let mut player = Player::new(fast_config()).with_line_factory(|| None);
        player.set_input(Box::new(packet_list(30))).unwrap();
        player.start().unwrap();
        assert!(wait_until(|| player.subtitles() == vec!["caption".to_string()]));
        player.stop();
    }

    #[test]
    fn test_seek_after_end_restarts_playback() {
        let mut player = Player::new(fast_config()).with_line_factory(|| None);
        player.set_input(Box::new(packet_list(3))).unwrap();
        player.start().unwrap();
        assert!(wait_until(|| player.is_eof()));

        player.seek_fraction(0.0).unwrap();
        assert!(wait_until(|| !player.is_eof()));
        assert!(wait_until(|| player.is_eof()));
        player.stop();
    }

    #[test]
    fn test_seek_rejects_out_of_range() {
        let mut player = Player::new(fast_config()).with_line_factory(|| None);
        assert!(matches!(player.seek_fraction(2.0), Err(PlayerError::InvalidArgument(_))));
        assert!(matches!(player.seek_fraction(0.5), Err(PlayerError::InvalidArgument(_))));

        player.set_input(Box::new(packet_list(3))).unwrap();
        player.seek_fraction(0.5).unwrap();
        assert_eq!(player.state(), SyncState::Prime);
    }

    #[test]
    fn test_seek_on_unknown_length_input_fails_while_playing() {
        let mut player = Player::new(fast_config()).with_line_factory(|| None);
        let input = ReaderInput::new(std::io::Cursor::new(packet_log(30)));
        player.set_input_source(Box::new(input)).unwrap();
        assert!(matches!(player.seek_fraction(0.5), Err(PlayerError::NotSeekable)));

        player.start().unwrap();
        assert!(player.is_running());
        assert!(matches!(player.seek_fraction(0.5), Err(PlayerError::NotSeekable)));
        assert!(player.is_running());
        player.stop();
    }

    #[test]
    fn test_seek_while_playing_reports_success() {
        let mut player = Player::new(fast_config()).with_line_factory(|| None);
        player.set_input(Box::new(packet_list(30))).unwrap();
        player.start().unwrap();
        player.seek_fraction(0.5).unwrap();
        assert!(wait_until(|| player.is_eof()));
        player.stop();
    }

    #[test]
    fn test_restart_continues_from_paused_position() {
        let config = PlayerConfig { idle_poll_ms: 5, ..PlayerConfig::default() };
        let mut player = Player::new(config).with_line_factory(|| None);
        player.set_input(Box::new(packet_list(200))).unwrap();

        player.start().unwrap();
        assert!(wait_until(|| player.time().is_some_and(|t| t >= 0.2)));
        player.stop();
        let paused_at = player.time().unwrap();

        thread::sleep(Duration::from_millis(800));
        player.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        player.stop();
        let resumed_at = player.time().unwrap();

        assert!(resumed_at >= paused_at);
        // 停顿的 0.8 秒不计入播放进度
        assert!(resumed_at - paused_at < 0.5, "{:.3} -> {:.3}", paused_at, resumed_at);
    }

    #[test]
    fn test_start_without_input_fails() {
        let mut player = Player::new(fast_config());
        assert!(player.start().is_err());
        assert!(!player.is_running());
    }

    #[test]
    fn test_volume_applied_to_line_on_start() {
        let (mut player, handle) = player_with_fake_line();
        player.set_volume(0.0);
        player.set_input(Box::new(packet_list(2))).unwrap();
        player.start().unwrap();
        assert_eq!(handle.gain(), Some(FakeLine::MIN_DB));

        player.set_volume(1.0);
        assert!(wait_until(|| handle.gain().is_some_and(|g| (g - FakeLine::MAX_DB).abs() < 1e-3)));
        player.stop();
    }

    struct FailingReader {
        streams: Vec<LogicalStream>,
        reads: usize,
    }

    impl ContainerReader for FailingReader {
        fn streams(&self) -> &[LogicalStream] {
            &self.streams
        }

        fn read_packet(&mut self) -> Result<Option<Packet>> {
            self.reads += 1;
            if self.reads > 2 {
                return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "截断").into());
            }
            Ok(Some(Packet { stream_id: 2, time: None, position: 0, data: json(&audio_format()) }))
        }

        fn seek_fraction(&mut self, _fraction: f64) -> Result<()> {
            Ok(())
        }

        fn is_seekable(&self) -> bool {
            false
        }

        fn description(&self) -> String {
            "failing".to_string()
        }
    }

    #[test]
    fn test_input_error_halts_loop_and_is_reported() {
        let mut player = Player::new(fast_config()).with_line_factory(|| None);
        let reader = FailingReader { streams: vec![stream(2, StreamKind::Audio)], reads: 0 };
        player.set_input(Box::new(reader)).unwrap();
        player.start().unwrap();

        assert!(wait_until(|| player.is_eof()));
        assert!(wait_until(|| !player.is_running()));
        let err = player.take_error().unwrap();
        assert!(err.is_fatal());
        player.stop();
    }
}
