use crate::core::SubtitleEvent;
use log::debug;

/// 字幕渲染队列
///
/// 事件按开始时间排序；`update` 丢弃已结束的字幕，`get_text` 取最近开始的几条。
/// Seek 时清空，不做持久化。
#[derive(Debug, Default)]
pub struct SubtitleQueue {
    events: Vec<SubtitleEvent>,
    current: Option<f64>,
}

impl SubtitleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按开始时间插入（开始时间相同的保持到达顺序）
    pub fn push(&mut self, event: SubtitleEvent) {
        let index = self.events.partition_point(|e| e.start <= event.start);
        debug!("📝 字幕 [{:.2}, {:.2}] {}", event.start, event.end, event.text);
        self.events.insert(index, event);
    }

    /// 移除结束时间 <= `current_time` 的字幕
    pub fn update(&mut self, current_time: f64) {
        self.events.retain(|e| e.end > current_time);
        self.current = Some(current_time);
    }

    /// 已开始的字幕中最近开始的至多 `max_lines` 条文本，旧的在前
    ///
    /// 还没有调用过 `update` 时所有字幕都算已开始。
    pub fn get_text(&self, max_lines: usize) -> Vec<String> {
        let started = match self.current {
            Some(t) => self.events.partition_point(|e| e.start <= t),
            None => self.events.len(),
        };
        let skip = started.saturating_sub(max_lines);
        self.events[skip..started].iter().map(|e| e.text.clone()).collect()
    }

    pub fn events(&self) -> &[SubtitleEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.current = None;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
