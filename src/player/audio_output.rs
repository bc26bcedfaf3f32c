use crate::player::audio_sink::AudioLine;

#[cfg(feature = "cpal-output")]
pub use cpal_line::CpalLine;

/// 默认音频线路：启用 `cpal-output` 时为系统默认输出设备，否则没有线路（静音播放）
pub fn default_line() -> Option<Box<dyn AudioLine>> {
    #[cfg(feature = "cpal-output")]
    {
        Some(Box::new(CpalLine::new()))
    }
    #[cfg(not(feature = "cpal-output"))]
    {
        log::debug!("未启用 cpal-output，音频输出不可用");
        None
    }
}

/// 把交错的小端整数 PCM 转成 f32 采样
pub fn decode_samples(bytes: &[u8], bits_per_sample: u16, out: &mut Vec<f32>) {
    match bits_per_sample {
        8 => out.extend(bytes.iter().map(|b| (f32::from(*b) - 128.0) / 128.0)),
        16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0),
        ),
        24 => out.extend(bytes.chunks_exact(3).map(|b| {
            let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
            v as f32 / 8_388_608.0
        })),
        32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0),
        ),
        _ => {}
    }
}

#[cfg(feature = "cpal-output")]
mod cpal_line {
    use super::decode_samples;
    use crate::core::{AudioFormat, PlayerError, Result};
    use crate::player::audio_sink::AudioLine;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
    use crossbeam::atomic::AtomicCell;
    use crossbeam::queue::SegQueue;
    use log::{debug, error, info, warn};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 回调与线路之间共享的状态
    struct Shared {
        samples: SegQueue<f32>,
        queued_samples: AtomicUsize,
        played_frames: AtomicU64,
        gain: AtomicCell<f32>,
    }

    impl Shared {
        /// flush 与回调可能同时取走采样，计数饱和到 0
        fn release(&self, samples: usize) {
            let _ = self
                .queued_samples
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| Some(q.saturating_sub(samples)));
        }
    }

    /// 基于 cpal 默认输出设备的音频线路
    ///
    /// 线路容量固定为 `open` 时给出的字节数；设备回调每消费一个采样帧就累加已播放帧数。
    pub struct CpalLine {
        stream: Option<Stream>,
        shared: Arc<Shared>,
        format: AudioFormat,
        capacity_samples: usize,
        scratch: Vec<f32>,
    }

    // cpal::Stream 本身不是 Send；线路只在排空线程里使用，由 AudioSink 的锁串行化
    unsafe impl Send for CpalLine {}

    impl CpalLine {
        pub fn new() -> Self {
            Self {
                stream: None,
                shared: Arc::new(Shared {
                    samples: SegQueue::new(),
                    queued_samples: AtomicUsize::new(0),
                    played_frames: AtomicU64::new(0),
                    gain: AtomicCell::new(1.0),
                }),
                format: AudioFormat::default(),
                capacity_samples: 0,
                scratch: Vec::new(),
            }
        }

        /// 检查配置是否兼容
        fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
            let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
                && config.sample_rate.0 <= supported.max_sample_rate().0;
            rate_in_range && config.channels == supported.channels()
        }

        /// 选择设备配置：采样率必须一致，声道数可以回退（单声道复制/立体声混合）
        fn choose_config(device: &Device, format: &AudioFormat) -> Result<StreamConfig> {
            let mut candidates = vec![format.channels, 2, 1];
            candidates.dedup();

            for channels in candidates {
                let config = StreamConfig {
                    channels,
                    sample_rate: cpal::SampleRate(format.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                let supported = device
                    .supported_output_configs()
                    .map_err(|e| PlayerError::HardwareUnavailable(format!("无法获取支持的音频配置: {}", e)))?;
                if supported.into_iter().any(|s| Self::is_config_compatible(&config, &s)) {
                    if channels != format.channels {
                        warn!("⚠️  设备不支持 {} 声道，回退到 {} 声道", format.channels, channels);
                    }
                    return Ok(config);
                }
            }

            Err(PlayerError::HardwareUnavailable(format!(
                "音频设备不支持 {} Hz, {} 声道",
                format.sample_rate, format.channels
            )))
        }
    }

    impl Default for CpalLine {
        fn default() -> Self {
            Self::new()
        }
    }

    impl AudioLine for CpalLine {
        fn open(&mut self, format: &AudioFormat, buffer_bytes: usize) -> Result<()> {
            info!("初始化音频输出: {} Hz, {} 声道", format.sample_rate, format.channels);

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| PlayerError::HardwareUnavailable("无法找到音频输出设备".to_string()))?;
            debug!("使用音频设备: {}", device.name().unwrap_or_default());

            let config = Self::choose_config(&device, format)?;
            let source_channels = usize::from(format.channels.max(1));
            let device_channels = usize::from(config.channels.max(1));
            let shared = Arc::clone(&self.shared);

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let gain = shared.gain.load();
                        let mut frame = [0.0f32; 8];
                        for out in data.chunks_mut(device_channels) {
                            // 凑不齐一整帧时输出静音，不计入已播放帧数
                            if shared.queued_samples.load(Ordering::Acquire) < source_channels {
                                out.fill(0.0);
                                continue;
                            }
                            for slot in frame.iter_mut().take(source_channels.min(8)) {
                                *slot = shared.samples.pop().unwrap_or(0.0);
                            }
                            for _ in 8..source_channels {
                                shared.samples.pop();
                            }
                            shared.release(source_channels);
                            shared.played_frames.fetch_add(1, Ordering::AcqRel);

                            for (i, sample) in out.iter_mut().enumerate() {
                                let value = match (source_channels, device_channels) {
                                    (1, _) => frame[0],
                                    (2, 1) => (frame[0] + frame[1]) * 0.5,
                                    _ => frame[i.min(source_channels.min(8) - 1)],
                                };
                                *sample = value * gain;
                            }
                        }
                    },
                    move |err| {
                        error!("音频流错误: {}", err);
                    },
                    None,
                )
                .map_err(|e| PlayerError::HardwareUnavailable(format!("创建音频流失败: {}", e)))?;

            stream
                .play()
                .map_err(|e| PlayerError::HardwareUnavailable(format!("启动音频流失败: {}", e)))?;

            let sample_bytes = usize::from(format.bits_per_sample / 8).max(1);
            self.capacity_samples = (buffer_bytes / sample_bytes).max(source_channels);
            self.format = *format;
            self.stream = Some(stream);
            info!("音频输出已启动（线路 {} 个采样）", self.capacity_samples);
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> usize {
            let frame_bytes = self.format.frame_bytes();
            if self.stream.is_none() || frame_bytes == 0 {
                return 0;
            }
            let frames = (self.available() / frame_bytes).min(bytes.len() / frame_bytes);
            let accepted = frames * frame_bytes;

            self.scratch.clear();
            decode_samples(&bytes[..accepted], self.format.bits_per_sample, &mut self.scratch);
            for sample in &self.scratch {
                self.shared.samples.push(*sample);
            }
            self.shared
                .queued_samples
                .fetch_add(self.scratch.len(), Ordering::AcqRel);
            accepted
        }

        fn available(&self) -> usize {
            let queued = self.shared.queued_samples.load(Ordering::Acquire);
            let free = self.capacity_samples.saturating_sub(queued);
            free * usize::from(self.format.bits_per_sample / 8)
        }

        fn played_frames(&self) -> u64 {
            self.shared.played_frames.load(Ordering::Acquire)
        }

        fn flush(&mut self) {
            let mut dropped = 0;
            while self.shared.samples.pop().is_some() {
                dropped += 1;
            }
            self.shared.release(dropped);
        }

        fn stop(&mut self) {
            if let Some(stream) = self.stream.as_ref() {
                if let Err(e) = stream.pause() {
                    warn!("暂停音频流失败: {}", e);
                }
            }
        }

        fn close(&mut self) {
            if let Some(stream) = self.stream.take() {
                drop(stream);
                info!("音频输出已停止");
            }
        }

        fn gain_range(&self) -> Option<(f32, f32)> {
            Some((-80.0, 0.0))
        }

        fn set_gain(&mut self, db: f32) {
            self.shared.gain.store(10f32.powf(db / 20.0));
        }
    }
}
