use crate::core::{LogicalStream, Packet, Result};

/// 容器读取器抽象接口
///
/// 容器的二进制格式由实现者解析，核心只关心逻辑流列表、数据包序列和按比例 Seek。
pub trait ContainerReader: Send {
    /// 容器中的逻辑流（按出现顺序）
    fn streams(&self) -> &[LogicalStream];

    /// 读取下一个数据包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达输入末尾
    /// - Err(e): 输入错误（致命）
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// 按比例 Seek（0.0 - 1.0）
    fn seek_fraction(&mut self, fraction: f64) -> Result<()>;

    /// 是否支持 seek（输入长度未知时不支持）
    fn is_seekable(&self) -> bool;

    /// 容器结束时间（秒）
    fn end_time(&self) -> Option<f64> {
        self.streams()
            .iter()
            .filter_map(|s| s.end_time)
            .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.max(t))))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 内存中的数据包列表，按顺序读出
///
/// 用于合成输入和测试；Seek 按包序号比例定位。
pub struct PacketList {
    streams: Vec<LogicalStream>,
    packets: Vec<Packet>,
    cursor: usize,
}

impl PacketList {
    pub fn new(streams: Vec<LogicalStream>, packets: Vec<Packet>) -> Self {
        Self {
            streams,
            packets,
            cursor: 0,
        }
    }
}

impl ContainerReader for PacketList {
    fn streams(&self) -> &[LogicalStream] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let packet = self.packets.get(self.cursor).cloned();
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }

    fn seek_fraction(&mut self, fraction: f64) -> Result<()> {
        let index = (fraction.clamp(0.0, 1.0) * self.packets.len() as f64).floor() as usize;
        self.cursor = index.min(self.packets.len());
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        format!("数据包列表: {} 个流, {} 个包", self.streams.len(), self.packets.len())
    }
}
