use crate::core::{PlayerError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 同步循环参数
///
/// 默认值沿用观察到的行为（0.5 秒预读、0.1 秒容差、10/秒 增益），
/// 暴露为配置项而不是写死。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 音频预读时长（秒）
    pub audio_lookahead: f64,
    /// 漂移容差（秒），偏差小于该值时不校正
    pub drift_fudge: f64,
    /// 漂移校正增益（每秒）
    pub drift_gain: f64,
    /// 领先时的睡眠系数
    pub pace_factor: f64,
    /// 单次睡眠上限（毫秒）
    pub max_sleep_ms: u64,
    /// 关闭后不睡眠，尽快处理（测试/转码用）
    pub limit_speed: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            audio_lookahead: 0.5,
            drift_fudge: 0.1,
            drift_gain: 10.0,
            pace_factor: 0.5,
            max_sleep_ms: 100,
            limit_speed: true,
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("audio_lookahead", self.audio_lookahead),
            ("drift_fudge", self.drift_fudge),
            ("drift_gain", self.drift_gain),
            ("pace_factor", self.pace_factor),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(PlayerError::InvalidArgument(format!("{} 必须是非负数: {}", name, value)));
            }
        }
        Ok(())
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms)
    }
}

/// 音频环形缓冲参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSinkConfig {
    /// 后台排空周期（毫秒）
    pub drain_period_ms: u64,
    /// 硬件线路缓冲时长（秒）
    pub line_buffer_duration: f64,
    /// 初始缓冲区大小（字节）
    pub initial_capacity: usize,
    /// 缓冲区超过该大小时告警（不做限制）
    pub growth_warn_bytes: usize,
}

impl Default for AudioSinkConfig {
    fn default() -> Self {
        Self {
            drain_period_ms: 10,
            line_buffer_duration: 0.25,
            initial_capacity: 8192,
            growth_warn_bytes: 64 * 1024 * 1024,
        }
    }
}

impl AudioSinkConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.drain_period_ms == 0 {
            return Err(PlayerError::InvalidArgument("drain_period_ms 不能为 0".to_string()));
        }
        if !self.line_buffer_duration.is_finite() || self.line_buffer_duration <= 0.0 {
            return Err(PlayerError::InvalidArgument(format!(
                "line_buffer_duration 必须为正数: {}",
                self.line_buffer_duration
            )));
        }
        if self.initial_capacity == 0 {
            return Err(PlayerError::InvalidArgument("initial_capacity 不能为 0".to_string()));
        }
        Ok(())
    }

    pub fn drain_period(&self) -> Duration {
        Duration::from_millis(self.drain_period_ms)
    }
}

/// 播放器配置（同步循环 + 音频输出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub sync: SyncConfig,
    pub audio: AudioSinkConfig,
    /// 状态快照中保留的字幕行数
    pub subtitle_lines: usize,
    /// 播放结束后等待 Seek/Stop 命令的轮询间隔（毫秒）
    pub idle_poll_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            audio: AudioSinkConfig::default(),
            subtitle_lines: 2,
            idle_poll_ms: 100,
        }
    }
}

impl PlayerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        self.audio.validate()
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}
