use crate::core::{AudioSinkConfig, PlaybackClock, Result, StreamKind, SyncConfig, SyncState, Timed, VideoSurface};
use crate::player::audio_sink::{AudioLine, AudioSink};
use crate::player::demuxer::Demuxer;
use crate::player::subtitle_queue::SubtitleQueue;
use log::{debug, info, warn};
use std::thread;
use std::time::{Duration, Instant};

/// 一次 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub state: SyncState,
    /// 领先于目标时间时建议的休眠时长；落后时为 None
    pub sleep: Option<Duration>,
}

/// 同步统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub presented: u64,
    pub skipped: u64,
    pub ticks: u64,
}

/// 播放同步循环
///
/// 单线程驱动：泵送解封装器、展示视频、向音频缓冲喂数据、移动字幕，
/// 再按音频硬件位置校正目标时间。音频排空在 `AudioSink` 的后台线程里独立进行。
///
/// 状态机：
/// - `Prime`：目标时间未知，视频自由运行直到拿到第一个解封装时间
/// - `Tracking`：目标时间随墙钟前进并向音频时间校正
/// - `Seeking`：Seek 过程中的瞬时状态
/// - `Ended`：输入结束且所有处理器缓冲为空
pub struct SyncLoop {
    demuxer: Demuxer,
    clock: PlaybackClock,
    sink: Option<AudioSink>,
    subtitles: SubtitleQueue,
    surface: Option<Box<dyn VideoSurface + Send>>,
    config: SyncConfig,
    state: SyncState,
    stats: SyncStats,
}

impl SyncLoop {
    pub fn new(demuxer: Demuxer, config: SyncConfig) -> Self {
        Self {
            demuxer,
            clock: PlaybackClock::new(config.drift_fudge, config.drift_gain),
            sink: None,
            subtitles: SubtitleQueue::new(),
            surface: None,
            config,
            state: SyncState::Prime,
            stats: SyncStats::default(),
        }
    }

    /// 设置视频展示目标
    pub fn set_surface(&mut self, surface: Box<dyn VideoSurface + Send>) {
        self.surface = Some(surface);
    }

    /// 使用已经打开的音频输出
    pub fn set_audio_sink(&mut self, sink: AudioSink) {
        self.sink = Some(sink);
    }

    /// 根据音频流头部创建音频输出并启动后台排空
    ///
    /// 先读完头部；没有音频流时不创建输出。线路不可用时输出进入静音模式。
    pub fn open_audio(&mut self, line: Option<Box<dyn AudioLine>>, config: AudioSinkConfig) -> Result<()> {
        self.demuxer.read_headers()?;
        if !self.demuxer.is_active(StreamKind::Audio) {
            debug!("没有活动的音频流，不创建音频输出");
            return Ok(());
        }
        let Some(format) = self.demuxer.handlers().audio.as_deref().and_then(|a| a.format()) else {
            warn!("⚠️  音频流没有格式信息，不创建音频输出");
            return Ok(());
        };

        let mut sink = AudioSink::new(format, config);
        sink.start(line)?;
        self.sink = Some(sink);
        Ok(())
    }

    /// 从暂停处继续（`stop` 之后再次运行前调用），停顿的墙钟时间不推进目标时间
    pub fn resume(&mut self) {
        self.clock.resume();
    }

    /// 执行一次 tick，并按建议时长休眠
    pub fn tick(&mut self) -> Result<TickOutcome> {
        let outcome = self.tick_at(Instant::now())?;
        if let Some(sleep) = outcome.sleep {
            thread::sleep(sleep);
        }
        Ok(outcome)
    }

    /// 以给定的单调时钟时刻执行一次 tick（不休眠）
    pub fn tick_at(&mut self, now: Instant) -> Result<TickOutcome> {
        if self.state == SyncState::Ended {
            return Ok(TickOutcome {
                state: self.state,
                sleep: None,
            });
        }
        self.stats.ticks += 1;

        self.fill_buffers()?;
        // 预读之前的解封装时间，PRIME 时以它为对齐点
        let first_time = self.demuxer.time();
        self.present_video()?;
        self.feed_audio()?;
        self.feed_subtitles();

        let dt = self.clock.sample(now);
        let audio_time = self.sink.as_ref().and_then(|s| s.get_time());
        self.clock.step(audio_time, dt);

        if !self.clock.is_primed() {
            if let Some(time) = first_time.or(self.demuxer.time()) {
                info!("⏱️  目标时间对齐到 {:.3}s", time);
                self.clock.lock_onto(time);
            }
        }
        if let Some(target) = self.clock.target() {
            self.subtitles.update(target);
        }

        let sleep = self.pacing();

        self.state = if self.demuxer.is_eof() && self.demuxer.buffers_empty() {
            info!("🏁 播放结束（展示 {} 帧，跳过 {} 帧）", self.stats.presented, self.stats.skipped);
            SyncState::Ended
        } else if self.clock.is_primed() {
            SyncState::Tracking
        } else {
            SyncState::Prime
        };

        Ok(TickOutcome {
            state: self.state,
            sleep: if self.state == SyncState::Ended { None } else { sleep },
        })
    }

    /// 泵送直到每个非稀疏的活动处理器都有缓冲，或输入结束
    fn fill_buffers(&mut self) -> Result<()> {
        self.demuxer.pump_until(|demuxer| {
            demuxer
                .active_kinds()
                .into_iter()
                .filter(|kind| !kind.is_sparse())
                .all(|kind| demuxer.handler(kind).map_or(true, |h| !h.is_buffer_empty()))
        })
    }

    /// 泵送直到指定处理器有缓冲，或输入结束
    fn fill(&mut self, kind: StreamKind) -> Result<()> {
        self.demuxer
            .pump_until(|demuxer| demuxer.handler(kind).map_or(true, |h| !h.is_buffer_empty()))
    }

    /// 迟到帧（整帧都在目标时间之前）直接跳过；否则展示一帧
    fn present_video(&mut self) -> Result<()> {
        if !self.demuxer.is_active(StreamKind::Video) {
            return Ok(());
        }

        loop {
            let target = self.clock.target();
            self.fill(StreamKind::Video)?;

            let Some(video) = self.demuxer.handlers_mut().video.as_deref_mut() else {
                return Ok(());
            };
            let Some((time, end)) = video.peek().map(|f| (f.time(), f.end_time())) else {
                return Ok(());
            };

            if let Some(target) = target {
                if time > target {
                    return Ok(());
                }
                if end < target {
                    debug!("跳过迟到帧 @{:.3}（目标 {:.3}）", time, target);
                    video.skip();
                    self.stats.skipped += 1;
                    continue;
                }
            }

            if let Some(frame) = video.read() {
                if let Some(surface) = self.surface.as_deref_mut() {
                    frame.read_pixels(surface);
                }
                self.stats.presented += 1;
            }
            return Ok(());
        }
    }

    /// 预解码音频，覆盖到 max(目标时间, 视频时间) + 预读时长
    fn feed_audio(&mut self) -> Result<()> {
        if !self.demuxer.is_active(StreamKind::Audio) {
            return Ok(());
        }

        let video_time = if self.demuxer.is_active(StreamKind::Video) {
            self.demuxer.handler(StreamKind::Video).and_then(|h| h.time())
        } else {
            None
        };
        let horizon = match (self.clock.target(), video_time) {
            (Some(target), Some(video)) => Some(target.max(video)),
            (target, video) => target.or(video),
        }
        .map(|t| t + self.config.audio_lookahead);

        loop {
            // PRIME 且没有视频时只消费已经解码的部分
            if horizon.is_some() {
                self.fill(StreamKind::Audio)?;
            }

            let Some(audio) = self.demuxer.handlers_mut().audio.as_deref_mut() else {
                return Ok(());
            };
            if let (Some(horizon), Some(time)) = (horizon, audio.time()) {
                if time >= horizon {
                    return Ok(());
                }
            }
            let Some(chunk) = audio.read() else {
                return Ok(());
            };
            if let Some(sink) = self.sink.as_ref() {
                sink.buffer(&chunk.pcm, chunk.end_time());
            }
        }
    }

    /// 开始时间已到（<= 解封装时间）的字幕进入渲染队列
    ///
    /// 输入结束后剩余的字幕全部进入队列。队列本身按目标时间更新。
    fn feed_subtitles(&mut self) {
        let now = self.demuxer.time();
        let eof = self.demuxer.is_eof();

        if let Some(subtitle) = self.demuxer.handlers_mut().subtitle.as_deref_mut() {
            loop {
                let due = subtitle
                    .peek()
                    .is_some_and(|event| eof || now.is_some_and(|t| event.start <= t));
                if !due {
                    break;
                }
                if let Some(event) = subtitle.read() {
                    self.subtitles.push(event);
                }
            }
        }
    }

    /// 解封装时间领先目标时间时按比例休眠；落后时不休眠
    fn pacing(&self) -> Option<Duration> {
        if !self.config.limit_speed {
            return None;
        }
        let (Some(target), Some(time)) = (self.clock.target(), self.demuxer.time()) else {
            return None;
        };
        let wait = time - target;
        if wait.is_nan() || wait <= 0.0 {
            return None;
        }
        // 先在 f64 上截断，远在未来的时间戳也不会溢出 Duration
        let secs = (wait * self.config.pace_factor).min(self.config.max_sleep().as_secs_f64());
        Duration::try_from_secs_f64(secs).ok()
    }

    /// 按比例 Seek：清空处理器缓冲、音频缓冲与字幕队列，目标时间回到 PRIME
    pub fn seek_fraction(&mut self, fraction: f64) -> Result<()> {
        let previous = self.state;
        self.state = SyncState::Seeking;
        info!("⏩ Seek 到 {:.1}%", fraction * 100.0);

        if let Err(e) = self.demuxer.seek_fraction(fraction) {
            warn!("⚠️  Seek 失败: {}", e);
            self.state = previous;
            return Err(e);
        }

        self.demuxer.flush_handlers();
        if let Some(sink) = self.sink.as_ref() {
            sink.reset();
        }
        self.subtitles.clear();
        self.clock.reset();
        self.state = SyncState::Prime;
        Ok(())
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// 目标时间；PRIME 时为 None
    pub fn target(&self) -> Option<f64> {
        self.clock.target()
    }

    pub fn subtitle_text(&self, max_lines: usize) -> Vec<String> {
        self.subtitles.get_text(max_lines)
    }

    pub fn subtitles(&self) -> &SubtitleQueue {
        &self.subtitles
    }

    pub fn audio_sink(&self) -> Option<&AudioSink> {
        self.sink.as_ref()
    }

    pub fn audio_sink_mut(&mut self) -> Option<&mut AudioSink> {
        self.sink.as_mut()
    }

    pub fn demuxer(&self) -> &Demuxer {
        &self.demuxer
    }

    pub fn demuxer_mut(&mut self) -> &mut Demuxer {
        &mut self.demuxer
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// 停止音频排空并释放线路（输入保持打开，可以再次 `open_audio`）
    pub fn close_audio(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.stop();
        }
    }

    /// 停止音频排空并关闭输入
    pub fn close(&mut self) -> Result<()> {
        self.close_audio();
        self.demuxer.close()
    }
}
