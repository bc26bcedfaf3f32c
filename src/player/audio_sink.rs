use crate::core::{AudioFormat, AudioSinkConfig, PlayerError, Result};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

/// 硬件音频线路（由平台实现，例如 cpal）
///
/// `write` 只接受线路当前能容纳的字节数，返回实际接受的数量。
pub trait AudioLine: Send {
    /// 打开并开始播放
    fn open(&mut self, format: &AudioFormat, buffer_bytes: usize) -> Result<()>;

    fn write(&mut self, bytes: &[u8]) -> usize;

    /// 当前可写入的字节数
    fn available(&self) -> usize;

    /// 硬件已经播放的采样帧数
    fn played_frames(&self) -> u64;

    /// 丢弃线路中尚未播放的数据
    fn flush(&mut self);

    fn stop(&mut self);

    fn close(&mut self);

    /// 增益范围（dB），不支持增益控制时为 None
    fn gain_range(&self) -> Option<(f32, f32)> {
        None
    }

    fn set_gain(&mut self, _db: f32) {}
}

/// 把 0.0 - 1.0 的音量映射到线路增益（dB）
///
/// 跳过增益范围最低的 20%，按平方曲线插值。
pub fn volume_to_gain_db(volume: f64, min_db: f32, max_db: f32) -> f32 {
    let volume = volume.clamp(0.0, 1.0);
    if volume == 0.0 {
        return min_db;
    }
    let (min, max) = (min_db as f64, max_db as f64);
    let x_min = 10f64.powf((min + (max - min) / 5.0) / 10.0);
    let x_max = 10f64.powf(max / 10.0);
    (10.0 * (x_min + volume * volume * (x_max - x_min)).log10()) as f32
}

/// 受同一把锁保护的环形缓冲状态
struct SinkState {
    store: Vec<u8>,
    len: usize,
    line: Option<Box<dyn AudioLine>>,
    written: u64,
    end_time: f64,
    timed: bool,
    silent: bool,
    volume: f64,
    byte_rate: f64,
    frame_bytes: usize,
    growth_warn_bytes: usize,
    growth_warned: bool,
}

impl SinkState {
    fn buffer(&mut self, bytes: &[u8], end_time: f64) {
        if self.silent {
            return;
        }

        let needed = self.len + bytes.len();
        if needed > self.store.len() {
            let mut capacity = self.store.len().max(1);
            while capacity < needed {
                capacity *= 2;
            }
            self.store.resize(capacity, 0);
            debug!("音频缓冲扩容到 {} 字节", capacity);

            // 不设上限：解码器或硬件停滞时内存会持续增长，这里只告警
            if capacity >= self.growth_warn_bytes && !self.growth_warned {
                warn!("⚠️  音频缓冲已增长到 {} 字节，硬件线路可能停滞", capacity);
                self.growth_warned = true;
            }
        }

        self.store[self.len..needed].copy_from_slice(bytes);
        self.len = needed;
        self.end_time = end_time;
        self.timed = true;
    }

    fn advance(&mut self, bytes: usize) -> usize {
        let bytes = bytes.min(self.len);
        self.store.copy_within(bytes..self.len, 0);
        self.len -= bytes;
        bytes
    }

    fn flush(&mut self) -> usize {
        let Some(line) = self.line.as_mut() else {
            return 0;
        };

        let len = line.available().min(self.len);
        if len == 0 {
            return 0;
        }

        let accepted = line.write(&self.store[..len]).min(len);
        if accepted > 0 {
            self.advance(accepted);
            self.written += accepted as u64;
        }
        accepted
    }

    fn hardware_played_bytes(&self) -> u64 {
        self.line
            .as_ref()
            .map_or(0, |line| line.played_frames() * self.frame_bytes as u64)
    }

    fn reset(&mut self) {
        self.len = 0;
        self.timed = false;
        if let Some(line) = self.line.as_mut() {
            line.flush();
        }
        self.written = self.hardware_played_bytes();
    }

    fn time(&self) -> Option<f64> {
        if self.silent || !self.timed || self.byte_rate <= 0.0 {
            return None;
        }
        let buffered = self.len as f64 / self.byte_rate;
        let in_line = (self.written as f64 - self.hardware_played_bytes() as f64) / self.byte_rate;
        Some(self.end_time - buffered - in_line)
    }

    fn apply_volume(&mut self) {
        let volume = self.volume;
        if let Some(line) = self.line.as_mut() {
            if let Some((min_db, max_db)) = line.gain_range() {
                line.set_gain(volume_to_gain_db(volume, min_db, max_db));
            }
        }
    }
}

/// 音频环形缓冲输出
///
/// 解码得到的 PCM 先进入可增长的缓冲区，由独立的后台线程周期性写入硬件线路。
/// 所有读写都在同一把锁下进行，因为排空线程和入队会竞争。
pub struct AudioSink {
    format: AudioFormat,
    config: AudioSinkConfig,
    shared: Arc<Mutex<SinkState>>,
    stop: Arc<AtomicBool>,
    drain_thread: Option<JoinHandle<()>>,
}

impl AudioSink {
    pub fn new(format: AudioFormat, config: AudioSinkConfig) -> Self {
        let state = SinkState {
            store: vec![0; config.initial_capacity.max(1)],
            len: 0,
            line: None,
            written: 0,
            end_time: 0.0,
            timed: false,
            silent: false,
            volume: 1.0,
            byte_rate: format.byte_rate(),
            frame_bytes: format.frame_bytes(),
            growth_warn_bytes: config.growth_warn_bytes,
            growth_warned: false,
        };
        Self {
            format,
            config,
            shared: Arc::new(Mutex::new(state)),
            stop: Arc::new(AtomicBool::new(false)),
            drain_thread: None,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// 打开线路，不启动后台排空（由调用方周期性调用 `flush`）
    ///
    /// 没有可用设备时进入静音模式，不返回错误。
    pub fn open_line(&mut self, line: Option<Box<dyn AudioLine>>) {
        self.stop();

        let line_bytes = (self.format.byte_rate() * self.config.line_buffer_duration).round() as usize;
        let opened = match line {
            Some(mut line) => match line.open(&self.format, line_bytes) {
                Ok(()) => Some(line),
                Err(e) => {
                    warn!("⚠️  打开音频线路失败，静音播放: {}", e);
                    None
                }
            },
            None => {
                warn!("⚠️  {}，静音播放", PlayerError::HardwareUnavailable("没有兼容的音频输出设备".to_string()));
                None
            }
        };

        let mut state = self.shared.lock();
        state.len = 0;
        state.written = 0;
        state.end_time = 0.0;
        state.timed = false;
        state.silent = opened.is_none();
        state.line = opened;
        state.apply_volume();
        if !state.silent {
            info!(
                "🔊 音频线路已打开: {} Hz, {} 声道, 线路缓冲 {} 字节",
                self.format.sample_rate, self.format.channels, line_bytes
            );
        }
    }

    /// 打开线路并启动后台排空线程
    pub fn start(&mut self, line: Option<Box<dyn AudioLine>>) -> Result<()> {
        self.open_line(line);
        if self.is_silent() {
            return Ok(());
        }

        self.stop.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let stop = Arc::clone(&self.stop);
        let period = self.config.drain_period();

        let handle = thread::Builder::new()
            .name("audio-drain".to_string())
            .spawn(move || {
                info!("{} 🔊 音频排空线程启动（周期 {:?}）", log_ctx(), period);
                while !stop.load(Ordering::SeqCst) {
                    shared.lock().flush();
                    thread::sleep(period);
                }

                let mut state = shared.lock();
                if let Some(mut line) = state.line.take() {
                    line.stop();
                    line.flush();
                    line.close();
                }
                // 没有线路之后不再报告硬件时间，直到重新 open_line
                state.silent = true;
                state.timed = false;
                state.len = 0;
                state.written = 0;
                info!("{} 🛑 音频排空线程退出，线路已释放", log_ctx());
            })?;
        self.drain_thread = Some(handle);
        Ok(())
    }

    /// 停止后台排空，阻塞到线程释放线路
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.drain_thread.take() {
            if handle.join().is_err() {
                error!("{} ❌ 音频排空线程异常退出", log_ctx());
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.drain_thread.is_some()
    }

    /// 静音模式（没有可用的音频设备）
    pub fn is_silent(&self) -> bool {
        self.shared.lock().silent
    }

    /// 追加 PCM 数据，`end_time` 为最后一个字节的展示时间
    pub fn buffer(&self, bytes: &[u8], end_time: f64) {
        self.shared.lock().buffer(bytes, end_time);
    }

    pub fn skip_bytes(&self, bytes: usize) -> usize {
        self.shared.lock().advance(bytes)
    }

    /// 按时长丢弃缓冲头部（按采样帧对齐）
    pub fn skip_time(&self, seconds: f64) -> usize {
        let frame_bytes = self.format.frame_bytes().max(1);
        let bytes = (seconds.max(0.0) * self.format.byte_rate()).round();
        let bytes = if bytes >= usize::MAX as f64 { usize::MAX } else { bytes as usize };
        self.skip_bytes(bytes - bytes % frame_bytes)
    }

    /// 把缓冲写入硬件线路（最多写入线路当前的可用容量）
    pub fn flush(&self) -> usize {
        self.shared.lock().flush()
    }

    /// 清空缓冲并与硬件计数重新同步（Seek 时调用）
    pub fn reset(&self) {
        self.shared.lock().reset();
    }

    /// 经硬件延迟补偿的当前播放时间
    ///
    /// 等于 已入队末尾时间 - 仍在缓冲中的时长 - 已交给硬件但尚未播放的时长。
    /// 静音模式或重置后尚未入队时为 None。
    pub fn get_time(&self) -> Option<f64> {
        self.shared.lock().time()
    }

    pub fn buffer_length(&self) -> usize {
        self.shared.lock().len
    }

    pub fn buffer_duration(&self) -> f64 {
        self.format.duration_of(self.buffer_length())
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().store.len()
    }

    pub fn set_volume(&self, volume: f64) {
        let mut state = self.shared.lock();
        state.volume = volume.clamp(0.0, 1.0);
        state.apply_volume();
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        self.stop();
    }
}
