//! 简单的分帧容器格式（packet log）
//!
//! 文件头：`PLOG` + 版本(u8) + 流数量(u16) + 每个流 {id u32, 类型 u8, 开始 f64, 结束 f64}。
//! 记录：`PLgS` + 流 id(u32) + 时间(f64) + 长度(u32) + 头校验(u8) + 负载。
//! 所有整数为小端；时间为 NaN 表示未知，读取时非有限值一律当作未知。Seek 后按捕获模式和头校验重新同步。

use crate::core::{LogicalStream, Packet, PlayerError, Result, StreamKind};
use crate::player::demuxer_source::ContainerReader;
use crate::player::input::InputSource;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io::{self, Read, Write};

const FILE_MAGIC: &[u8; 4] = b"PLOG";
const CAPTURE: &[u8; 4] = b"PLgS";
const VERSION: u8 = 1;
const STREAM_ENTRY_LEN: usize = 21;
const RECORD_HEADER_LEN: usize = 21;
const MAX_PACKET_LEN: u32 = 16 * 1024 * 1024;

fn header_checksum(fields: &[u8]) -> u8 {
    fields.iter().fold(0xA5, |acc, b| acc ^ b)
}

fn encode_time(time: Option<f64>) -> [u8; 8] {
    time.unwrap_or(f64::NAN).to_le_bytes()
}

fn decode_time(bytes: &[u8]) -> Option<f64> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    let time = f64::from_le_bytes(raw);
    // NaN 表示未知；无穷大视为损坏的时间戳
    time.is_finite().then_some(time)
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn truncated(what: &str) -> PlayerError {
    PlayerError::Input(io::Error::new(io::ErrorKind::UnexpectedEof, format!("输入被截断: {}", what)))
}

/// 带回退缓冲的字节游标，用于重新同步时逐字节滑动
struct ByteCursor {
    inner: Box<dyn Read + Send>,
    pending: VecDeque<u8>,
    consumed: u64,
}

impl ByteCursor {
    fn new(inner: Box<dyn Read + Send>) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
            consumed: 0,
        }
    }

    fn position(&self) -> u64 {
        self.consumed - self.pending.len() as u64
    }

    /// 读取最多 n 个字节，只有到达末尾时才会少于 n
    fn take(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.pending.pop_front() {
                Some(b) => out.push(b),
                None => break,
            }
        }
        let mut filled = out.len();
        out.resize(n, 0);
        while filled < n {
            match self.inner.read(&mut out[filled..]) {
                Ok(0) => break,
                Ok(read) => {
                    filled += read;
                    self.consumed += read as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        out.truncate(filled);
        Ok(out)
    }

    fn unread(&mut self, bytes: &[u8]) {
        for b in bytes.iter().rev() {
            self.pending.push_front(*b);
        }
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let skipped = io::copy(&mut (&mut self.inner).take(n), &mut io::sink())?;
        self.consumed += skipped;
        Ok(skipped)
    }
}

/// packet log 容器读取器
pub struct PacketLogReader {
    input: Box<dyn InputSource>,
    cursor: ByteCursor,
    streams: Vec<LogicalStream>,
    header_len: u64,
    synced: bool,
}

impl PacketLogReader {
    pub fn open(mut input: Box<dyn InputSource>) -> Result<Self> {
        info!("📦 打开 packet log: {}", input.description());
        let mut cursor = ByteCursor::new(input.open_stream()?);

        let head = cursor.take(7)?;
        if head.len() < 7 {
            return Err(truncated("文件头"));
        }
        if &head[..4] != FILE_MAGIC {
            return Err(PlayerError::Input(io::Error::new(io::ErrorKind::InvalidData, "不是 packet log 文件")));
        }
        if head[4] != VERSION {
            return Err(PlayerError::Input(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("不支持的版本: {}", head[4]),
            )));
        }
        let count = u16::from_le_bytes([head[5], head[6]]) as usize;

        let mut streams = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = cursor.take(STREAM_ENTRY_LEN)?;
            if entry.len() < STREAM_ENTRY_LEN {
                return Err(truncated("流表"));
            }
            let kind = StreamKind::from_byte(entry[4]).ok_or_else(|| {
                PlayerError::Input(io::Error::new(io::ErrorKind::InvalidData, format!("未知流类型: {}", entry[4])))
            })?;
            streams.push(LogicalStream {
                id: u32_at(&entry, 0),
                kind,
                start_time: decode_time(&entry[5..13]).unwrap_or(0.0),
                end_time: decode_time(&entry[13..21]),
            });
        }
        debug!("packet log 流表: {:?}", streams);

        let header_len = cursor.position();
        Ok(Self {
            input,
            cursor,
            streams,
            header_len,
            synced: true,
        })
    }

    fn is_known_stream(&self, id: u32) -> bool {
        self.streams.iter().any(|s| s.id == id)
    }

    fn valid_record_header(&self, head: &[u8], start: u64) -> Option<(u32, Option<f64>, u32)> {
        if &head[..4] != CAPTURE || header_checksum(&head[4..20]) != head[20] {
            return None;
        }
        let stream_id = u32_at(head, 4);
        let len = u32_at(head, 16);
        if !self.is_known_stream(stream_id) || len > MAX_PACKET_LEN {
            return None;
        }
        if let Some(total) = self.input.length() {
            if start + RECORD_HEADER_LEN as u64 + len as u64 > total {
                return None;
            }
        }
        Some((stream_id, decode_time(&head[8..16]), len))
    }
}

impl ContainerReader for PacketLogReader {
    fn streams(&self) -> &[LogicalStream] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let start = self.cursor.position();
            let head = self.cursor.take(RECORD_HEADER_LEN)?;
            if head.is_empty() {
                return Ok(None);
            }
            if head.len() < RECORD_HEADER_LEN {
                if self.synced {
                    return Err(truncated("记录头"));
                }
                return Ok(None);
            }

            if let Some((stream_id, time, len)) = self.valid_record_header(&head, start) {
                let data = self.cursor.take(len as usize)?;
                if data.len() < len as usize {
                    return Err(truncated("负载"));
                }
                if !self.synced {
                    debug!("packet log 在位置 {} 重新同步", start);
                    self.synced = true;
                }
                return Ok(Some(Packet {
                    stream_id,
                    time,
                    position: start,
                    data,
                }));
            }

            if self.synced {
                warn!("⚠️  packet log 在位置 {} 数据损坏，重新同步", start);
                self.synced = false;
            }
            self.cursor.unread(&head[1..]);
        }
    }

    fn seek_fraction(&mut self, fraction: f64) -> Result<()> {
        let total = self.input.length().ok_or(PlayerError::NotSeekable)?;
        let body = total.saturating_sub(self.header_len);
        let offset = self.header_len + (body as f64 * fraction.clamp(0.0, 1.0)).round() as u64;

        let mut cursor = ByteCursor::new(self.input.open_stream()?);
        cursor.skip(offset)?;
        self.cursor = cursor;
        self.synced = offset == self.header_len;
        debug!("packet log Seek 到字节 {}/{}", offset, total);
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        self.input.length().is_some()
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn description(&self) -> String {
        format!("packet log: {}", self.input.description())
    }
}

/// packet log 写入器
pub struct PacketLogWriter<W: Write> {
    inner: W,
}

impl<W: Write> PacketLogWriter<W> {
    pub fn new(mut inner: W, streams: &[LogicalStream]) -> Result<Self> {
        let count = u16::try_from(streams.len())
            .map_err(|_| PlayerError::InvalidArgument(format!("流数量过多: {}", streams.len())))?;
        inner.write_all(FILE_MAGIC)?;
        inner.write_all(&[VERSION])?;
        inner.write_all(&count.to_le_bytes())?;
        for stream in streams {
            inner.write_all(&stream.id.to_le_bytes())?;
            inner.write_all(&[stream.kind.to_byte()])?;
            inner.write_all(&encode_time(Some(stream.start_time)))?;
            inner.write_all(&encode_time(stream.end_time))?;
        }
        Ok(Self { inner })
    }

    pub fn write_packet(&mut self, stream_id: u32, time: Option<f64>, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len())
            .ok()
            .filter(|len| *len <= MAX_PACKET_LEN)
            .ok_or_else(|| PlayerError::InvalidArgument(format!("数据包过大: {} 字节", data.len())))?;

        let mut fields = [0u8; 16];
        fields[..4].copy_from_slice(&stream_id.to_le_bytes());
        fields[4..12].copy_from_slice(&encode_time(time));
        fields[12..].copy_from_slice(&len.to_le_bytes());

        self.inner.write_all(CAPTURE)?;
        self.inner.write_all(&fields)?;
        self.inner.write_all(&[header_checksum(&fields)])?;
        self.inner.write_all(data)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
