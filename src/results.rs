//! 结果持久化与控制台进度

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::config::{ADDRESS_LEN, ResultEntry};

/// 输出文件中的一行: `<score>,0x<salt>,0x<address>`
pub fn format_record(score: u8, entry: &ResultEntry) -> String {
    format!("{},0x{},0x{}", score, entry.salt_hex(), entry.address_hex())
}

/// 追加写入的结果文件，带本次运行内的去重集合
pub struct ResultLog {
    writer: BufWriter<Box<dyn Write + Send>>,
    saved: HashSet<[u8; ADDRESS_LEN]>,
}

impl ResultLog {
    /// 以追加模式打开输出文件 (不存在时创建)
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("Output file opened: {}", path.display());
        Ok(Self::new(Box::new(file)))
    }

    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: BufWriter::new(writer),
            saved: HashSet::new(),
        }
    }

    /// 记录一个结果，地址已经写过时返回 false
    pub fn record(&mut self, score: u8, entry: &ResultEntry) -> io::Result<bool> {
        if !self.saved.insert(entry.hash) {
            return Ok(false);
        }

        writeln!(self.writer, "{}", format_record(score, entry))?;
        self.writer.flush()?;
        Ok(true)
    }

    pub fn contains(&self, address: &[u8; ADDRESS_LEN]) -> bool {
        self.saved.contains(address)
    }

    /// 本次运行已写入的地址数
    pub fn len(&self) -> usize {
        self.saved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for ResultLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// 控制台进度输出
pub trait ProgressSink: Send + Sync {
    /// 新的全局最高分
    fn best(&self, elapsed: Duration, score: u8, entry: &ResultEntry);

    /// 速度统计行 (原地覆盖)
    fn speed(&self, line: &str);
}

/// 清除当前终端行
const VT100_CLEAR_LINE: &str = "\x1b[2K\r";

/// 输出到标准输出
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn best(&self, elapsed: Duration, score: u8, entry: &ResultEntry) {
        println!(
            "{}  Time: {:>5}s Score: {:>2} Salt: 0x{} Address: 0x{}",
            VT100_CLEAR_LINE,
            elapsed.as_secs(),
            score,
            entry.salt_hex(),
            entry.address_hex()
        );
    }

    fn speed(&self, line: &str) {
        print!("{}{}", VT100_CLEAR_LINE, line);
        let _ = io::stdout().flush();
    }
}
