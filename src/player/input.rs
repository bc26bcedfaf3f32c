use crate::core::{PlayerError, Result};
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 输入源抽象
///
/// 容器解析器通过它读取原始字节。长度未知（`None`）时不支持 Seek。
pub trait InputSource: Send {
    /// 输入总长度（字节）
    fn length(&self) -> Option<u64>;

    /// 从头打开一个字节流
    fn open_stream(&mut self) -> Result<Box<dyn Read + Send>>;

    fn close(&mut self) -> Result<()>;

    /// 获取描述信息（用于日志）
    fn description(&self) -> String;
}

/// 本地文件输入
pub struct FileInput {
    path: PathBuf,
    length: Option<u64>,
}

impl FileInput {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("正在打开文件: {}", path.display());
        let length = std::fs::metadata(&path)?.len();
        Ok(Self {
            path,
            length: Some(length),
        })
    }
}

impl InputSource for FileInput {
    fn length(&self) -> Option<u64> {
        self.length
    }

    fn open_stream(&mut self) -> Result<Box<dyn Read + Send>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn close(&mut self) -> Result<()> {
        debug!("关闭文件输入: {}", self.path.display());
        Ok(())
    }

    fn description(&self) -> String {
        format!("文件: {}", self.path.display())
    }
}

/// 内存输入（共享字节，可重复打开）
#[derive(Clone)]
pub struct MemoryInput {
    bytes: Arc<[u8]>,
}

impl MemoryInput {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { bytes: bytes.into() }
    }
}

impl InputSource for MemoryInput {
    fn length(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }

    fn open_stream(&mut self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(ArcBytes(self.bytes.clone()))))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn description(&self) -> String {
        format!("内存: {} 字节", self.bytes.len())
    }
}

struct ArcBytes(Arc<[u8]>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 一次性读取流（管道、网络等），长度未知
pub struct ReaderInput {
    reader: Option<Box<dyn Read + Send>>,
}

impl ReaderInput {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Some(Box::new(reader)),
        }
    }
}

impl InputSource for ReaderInput {
    fn length(&self) -> Option<u64> {
        None
    }

    fn open_stream(&mut self) -> Result<Box<dyn Read + Send>> {
        self.reader
            .take()
            .ok_or_else(|| PlayerError::Input(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "流式输入只能打开一次",
            )))
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }

    fn description(&self) -> String {
        "流式输入".to_string()
    }
}
