use std::time::Instant;

/// 播放时钟 - 同步循环的目标时间
///
/// `target` 为 `None` 表示还没有可对齐的时间（PRIME 阶段）。
/// 目标时间随墙钟自由前进，并按音频硬件的实际播放位置做指数校正。
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    target: Option<f64>,
    last_tick: Option<Instant>,
    fudge: f64,
    gain: f64,
}

impl PlaybackClock {
    pub fn new(fudge: f64, gain: f64) -> Self {
        Self {
            target: None,
            last_tick: None,
            fudge,
            gain,
        }
    }

    /// 当前目标时间（秒）
    pub fn target(&self) -> Option<f64> {
        self.target
    }

    pub fn is_primed(&self) -> bool {
        self.target.is_some()
    }

    /// 对齐到第一个已知的时间
    pub fn lock_onto(&mut self, time: f64) {
        if self.target.is_none() {
            self.target = Some(time);
        }
    }

    /// 回到 PRIME（只在 Seek 时调用）
    pub fn reset(&mut self) {
        self.target = None;
    }

    /// 暂停后继续：丢弃上次采样时刻，下一次 `sample` 的间隔为 0
    ///
    /// 目标时间保持不变，暂停期间的墙钟时间不计入播放进度。
    pub fn resume(&mut self) {
        self.last_tick = None;
    }

    /// 距上次采样经过的墙钟时间（秒），并记录本次采样
    pub fn sample(&mut self, now: Instant) -> f64 {
        let dt = match self.last_tick {
            Some(last) => now.saturating_duration_since(last).as_secs_f64(),
            None => 0.0,
        };
        self.last_tick = Some(now);
        dt
    }

    /// 按音频时间拉动目标时间，返回校正量
    ///
    /// 偏差在容差以内不校正；系数 `min(1, gain * dt)` 保证不会越过音频时间。
    pub fn correct(&mut self, audio_time: f64, dt: f64) -> f64 {
        let Some(target) = self.target else {
            return 0.0;
        };
        let diff = audio_time - target;
        if diff.abs() <= self.fudge {
            return 0.0;
        }
        let delta = diff * (self.gain * dt).min(1.0);
        self.target = Some(target + delta);
        delta
    }

    /// 目标时间随墙钟前进
    pub fn advance(&mut self, dt: f64) {
        if let Some(target) = self.target.as_mut() {
            *target += dt;
        }
    }

    /// 一次完整的时钟步进：校正 + 前进
    ///
    /// 目标时间只在 Seek 时后退，音频落后时目标时间保持不动等待音频追上。
    pub fn step(&mut self, audio_time: Option<f64>, dt: f64) {
        let Some(before) = self.target else {
            return;
        };
        if let Some(audio_time) = audio_time.filter(|t| *t >= 0.0) {
            self.correct(audio_time, dt);
        }
        self.advance(dt);
        if let Some(after) = self.target {
            if after < before {
                self.target = Some(before);
            }
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new(0.1, 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tracking_clock(target: f64) -> PlaybackClock {
        let mut clock = PlaybackClock::default();
        clock.lock_onto(target);
        clock
    }

    #[test]
    fn test_correction_converges_without_overshoot() {
        let mut clock = tracking_clock(0.0);
        for _ in 0..20 {
            clock.correct(1.0, 0.1);
            assert!(clock.target().unwrap() <= 1.0);
        }
        assert!((clock.target().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_dt_converges_into_fudge_band() {
        let mut clock = tracking_clock(0.0);
        let mut previous = 0.0;
        for _ in 0..200 {
            clock.correct(1.0, 0.01);
            let target = clock.target().unwrap();
            assert!(target >= previous);
            assert!(target <= 1.0);
            previous = target;
        }
        assert!(1.0 - previous <= 0.1 + 1e-9);
    }

    #[test]
    fn test_within_fudge_is_left_alone() {
        let mut clock = tracking_clock(1.0);
        assert_eq!(clock.correct(1.05, 0.1), 0.0);
        assert_eq!(clock.target(), Some(1.0));
    }

    #[test]
    fn test_step_never_moves_backwards() {
        let mut clock = tracking_clock(5.0);
        clock.step(Some(1.0), 0.1);
        assert_eq!(clock.target(), Some(5.0));
        clock.step(None, 0.1);
        assert!((clock.target().unwrap() - 5.1).abs() < 1e-9);
    }

    #[test]
    fn test_prime_ignores_steps_until_locked() {
        let mut clock = PlaybackClock::default();
        clock.step(Some(3.0), 0.5);
        assert_eq!(clock.target(), None);
        clock.lock_onto(2.0);
        clock.lock_onto(7.0);
        assert_eq!(clock.target(), Some(2.0));
        clock.reset();
        assert!(!clock.is_primed());
    }

    #[test]
    fn test_sample_measures_monotonic_elapsed() {
        let mut clock = PlaybackClock::default();
        let t0 = Instant::now();
        assert_eq!(clock.sample(t0), 0.0);
        let dt = clock.sample(t0 + Duration::from_millis(250));
        assert!((dt - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_resume_discards_paused_interval() {
        let mut clock = tracking_clock(1.0);
        let t0 = Instant::now();
        clock.sample(t0);

        clock.resume();
        let dt = clock.sample(t0 + Duration::from_secs(30));
        assert_eq!(dt, 0.0);
        assert_eq!(clock.target(), Some(1.0));

        let dt = clock.sample(t0 + Duration::from_millis(30_100));
        assert!((dt - 0.1).abs() < 1e-9);
    }
}
