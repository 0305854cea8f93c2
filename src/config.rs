//! 搜索模式编码与运行配置
//!
//! `Mode` 与 OpenCL 端的 `mode` 结构体逐字节对应，`ResultEntry` 与 `result` 结构体对应。

use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// 最高分数 (地址 40 个半字节，每个半字节最多 1 分)
pub const MAX_SCORE: usize = 40;

/// `Mode` 中每个数据数组的长度 - 对应 OpenCL uchar[20]
pub const MODE_DATA_LEN: usize = 20;

/// 地址长度 (字节)
pub const ADDRESS_LEN: usize = 20;

/// salt 长度 (字节)
pub const SALT_LEN: usize = 32;

/// 模式构造错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("invalid character '{ch}' at position {position}, expected a hex digit (0-9, a-f)")]
    InvalidHexChar { ch: char, position: usize },
    #[error("pattern has {len} characters, at most {max} are allowed")]
    PatternTooLong { len: usize, max: usize },
    #[error("pattern must not be empty")]
    EmptyPattern,
    #[error("nibble value {0} out of range (0-15)")]
    NibbleOutOfRange(u8),
}

/// 内核谓词类型 - 对应 OpenCL enum ModeFunction
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeFunction {
    #[default]
    Benchmark = 0,
    ZeroBytes = 1,
    All = 2,
    AllLeading = 3,
    AllLeadingTrailing = 4,
    MatchLeading = 5,
    Matching = 6,
    Trailing = 7,
    Leading = 8,
    Range = 9,
    LeadingRange = 10,
    Mirror = 11,
    Doubles = 12,
}

impl ModeFunction {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            ModeFunction::Benchmark => "Benchmark",
            ModeFunction::ZeroBytes => "ZeroBytes",
            ModeFunction::All => "All",
            ModeFunction::AllLeading => "AllLeading",
            ModeFunction::AllLeadingTrailing => "AllLeadingTrailing",
            ModeFunction::MatchLeading => "MatchLeading",
            ModeFunction::Matching => "Matching",
            ModeFunction::Trailing => "Trailing",
            ModeFunction::Leading => "Leading",
            ModeFunction::Range => "Range",
            ModeFunction::LeadingRange => "LeadingRange",
            ModeFunction::Mirror => "Mirror",
            ModeFunction::Doubles => "Doubles",
        }
    }
}

/// 搜索模式 (上传到每个设备)
///
/// 注意：必须与 OpenCL 的 mode 结构体完全匹配
/// OpenCL 布局: function @0, data1[20] @4, data2[20] @24
/// 总大小: 44 bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode {
    /// 谓词类型 - 对应 OpenCL uint
    pub function: ModeFunction,
    /// 谓词数据 1 (掩码、半字节或下界)
    pub data1: [u8; MODE_DATA_LEN],
    /// 谓词数据 2 (期望值、长度或上界)
    pub data2: [u8; MODE_DATA_LEN],
}

/// 解析单个十六进制字符
fn hex_value(ch: char, position: usize) -> Result<u8, ModeError> {
    ch.to_digit(16)
        .map(|v| v as u8)
        .ok_or(ModeError::InvalidHexChar { ch, position })
}

fn is_wildcard(ch: char) -> bool {
    matches!(ch, 'X' | 'x' | '*' | '?')
}

/// 去掉可选的 0x 前缀
fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn check_nibble(value: u8) -> Result<u8, ModeError> {
    if value > 0x0F {
        return Err(ModeError::NibbleOutOfRange(value));
    }
    Ok(value)
}

impl Mode {
    fn with_function(function: ModeFunction) -> Self {
        Self {
            function,
            ..Self::default()
        }
    }

    /// 将半字节序列写入 data1，并在 data2[0] 记录字面长度
    fn with_nibbles(function: ModeFunction, hex: &str, max: usize) -> Result<Self, ModeError> {
        let hex = strip_hex_prefix(hex);
        let len = hex.chars().count();
        if len > max {
            return Err(ModeError::PatternTooLong { len, max });
        }

        let mut r = Self::with_function(function);
        for (i, ch) in hex.chars().enumerate() {
            r.data1[i] = hex_value(ch, i)?;
        }
        r.data2[0] = len as u8;
        Ok(r)
    }

    /// 基准测试模式 (内核不做匹配)
    pub fn benchmark() -> Self {
        Self::with_function(ModeFunction::Benchmark)
    }

    /// 零字节计数
    pub fn zero_bytes() -> Self {
        Self::with_function(ModeFunction::ZeroBytes)
    }

    /// 零半字节计数
    pub fn zeros() -> Self {
        Self::range_unchecked(ModeFunction::Range, 0, 0)
    }

    /// 字母半字节计数 (a-f)
    pub fn letters() -> Self {
        Self::range_unchecked(ModeFunction::Range, 10, 15)
    }

    /// 数字半字节计数 (0-9)
    pub fn numbers() -> Self {
        Self::range_unchecked(ModeFunction::Range, 0, 9)
    }

    /// 所有评分函数合并，`score` 写入 data1[0]
    pub fn all(score: u8) -> Self {
        let mut r = Self::with_function(ModeFunction::All);
        r.data1[0] = score;
        r
    }

    /// 任意重复前导半字节
    pub fn all_leading() -> Self {
        Self::with_function(ModeFunction::AllLeading)
    }

    /// 前导与尾部同时匹配，最多 2 个半字节 (可以为空)
    pub fn all_leading_trailing(hex: &str) -> Result<Self, ModeError> {
        Self::with_nibbles(ModeFunction::AllLeadingTrailing, hex, 2)
    }

    /// 前导序列匹配
    pub fn match_leading(hex: &str) -> Result<Self, ModeError> {
        if strip_hex_prefix(hex).is_empty() {
            return Err(ModeError::EmptyPattern);
        }
        Self::with_nibbles(ModeFunction::MatchLeading, hex, MODE_DATA_LEN)
    }

    /// 尾部序列匹配
    pub fn trailing(hex: &str) -> Result<Self, ModeError> {
        if strip_hex_prefix(hex).is_empty() {
            return Err(ModeError::EmptyPattern);
        }
        Self::with_nibbles(ModeFunction::Trailing, hex, MODE_DATA_LEN)
    }

    /// 前导字符计数
    pub fn leading(ch: char) -> Result<Self, ModeError> {
        let mut r = Self::with_function(ModeFunction::Leading);
        r.data1[0] = hex_value(ch, 0)?;
        Ok(r)
    }

    /// 模式匹配
    ///
    /// 支持 `0xXXXXdeadXXXX...` 形式，X/x/*/? 为通配符。
    /// 每个字节对应两个字符: 0xF0=高半字节, 0x0F=低半字节。
    /// 长度可以小于 40，未给出的半字节等同于通配符。
    ///
    /// # Example
    /// ```
    /// use rust_eradicate::Mode;
    /// let mode = Mode::matching("0xXXXXXXXXXXXXdeadXXXXXXXXXXXXXXXXXXXXXXXX").unwrap();
    /// assert_eq!(mode.data1[6], 0xFF);
    /// assert_eq!(mode.data2[7], 0xad);
    /// ```
    pub fn matching(pattern: &str) -> Result<Self, ModeError> {
        let hex = strip_hex_prefix(pattern);
        let len = hex.chars().count();
        let max = MODE_DATA_LEN * 2;
        if len > max {
            return Err(ModeError::PatternTooLong { len, max });
        }

        let mut r = Self::with_function(ModeFunction::Matching);
        for (i, ch) in hex.chars().enumerate() {
            if is_wildcard(ch) {
                continue;
            }

            let nibble = hex_value(ch, i)?;
            let byte_idx = i / 2;
            if i % 2 == 0 {
                r.data1[byte_idx] |= 0xF0;
                r.data2[byte_idx] |= nibble << 4;
            } else {
                r.data1[byte_idx] |= 0x0F;
                r.data2[byte_idx] |= nibble;
            }
        }

        Ok(r)
    }

    /// 半字节范围计数 [min, max]
    pub fn range(min: u8, max: u8) -> Result<Self, ModeError> {
        Ok(Self::range_unchecked(
            ModeFunction::Range,
            check_nibble(min)?,
            check_nibble(max)?,
        ))
    }

    /// 前导半字节范围计数 [min, max]
    pub fn leading_range(min: u8, max: u8) -> Result<Self, ModeError> {
        Ok(Self::range_unchecked(
            ModeFunction::LeadingRange,
            check_nibble(min)?,
            check_nibble(max)?,
        ))
    }

    fn range_unchecked(function: ModeFunction, min: u8, max: u8) -> Self {
        let mut r = Self::with_function(function);
        r.data1[0] = min;
        r.data2[0] = max;
        r
    }

    /// 镜像模式
    pub fn mirror() -> Self {
        Self::with_function(ModeFunction::Mirror)
    }

    /// 前导重复字节
    pub fn doubles() -> Self {
        Self::with_function(ModeFunction::Doubles)
    }

    /// 还原半字节序列 (Leading / Trailing / MatchLeading / AllLeadingTrailing)
    pub fn nibbles(&self) -> Option<String> {
        let digits: &[u8] = match self.function {
            ModeFunction::Leading => &self.data1[..1],
            ModeFunction::Trailing
            | ModeFunction::MatchLeading
            | ModeFunction::AllLeadingTrailing => {
                let len = (self.data2[0] as usize).min(MODE_DATA_LEN);
                &self.data1[..len]
            }
            _ => return None,
        };

        digits
            .iter()
            .map(|&d| char::from_digit(d as u32, 16))
            .collect()
    }

    /// 还原 40 字符模式串，通配符用 X 表示
    pub fn matching_pattern(&self) -> Option<String> {
        if self.function != ModeFunction::Matching {
            return None;
        }

        let mut out = String::with_capacity(MODE_DATA_LEN * 2);
        for (&mask, &value) in self.data1.iter().zip(self.data2.iter()) {
            for (nibble_mask, shift) in [(0xF0u8, 4u8), (0x0F, 0)] {
                if mask & nibble_mask == 0 {
                    out.push('X');
                } else {
                    let digit = (value & nibble_mask) >> shift;
                    out.push(char::from_digit(digit as u32, 16)?);
                }
            }
        }
        Some(out)
    }

    /// 范围上下界 (Range / LeadingRange)
    pub fn range_bounds(&self) -> Option<(u8, u8)> {
        match self.function {
            ModeFunction::Range | ModeFunction::LeadingRange => Some((self.data1[0], self.data2[0])),
            _ => None,
        }
    }

    /// 按 OpenCL 布局返回字节视图
    pub fn as_bytes(&self) -> &[u8] {
        // Mode 为 repr(C)，u32 后跟两个 u8 数组，没有填充字节
        unsafe {
            std::slice::from_raw_parts(self as *const _ as *const u8, std::mem::size_of::<Mode>())
        }
    }
}

/// 单个分数桶 (从 GPU 传回)
/// 注意：必须与 OpenCL 的 result 结构体完全匹配
/// OpenCL 布局: salt[32] @0, hash[20] @32, found @52, 总大小 56 bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultEntry {
    /// 产生该地址的 salt - 对应 OpenCL uchar[32]
    pub salt: [u8; SALT_LEN],
    /// 派生出的地址 - 对应 OpenCL uchar[20]
    pub hash: [u8; ADDRESS_LEN],
    /// 是否找到 (0/非0) - 对应 OpenCL uint
    pub found: u32,
}

// ocl::Buffer<ResultEntry> 需要
unsafe impl ocl::OclPrm for ResultEntry {}

impl ResultEntry {
    pub fn new(salt: [u8; SALT_LEN], hash: [u8; ADDRESS_LEN]) -> Self {
        Self {
            salt,
            hash,
            found: 1,
        }
    }

    pub fn is_found(&self) -> bool {
        self.found != 0
    }

    pub fn salt_hex(&self) -> String {
        hex::encode(self.salt)
    }

    pub fn address_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// 分数下限参数的更新策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloorPolicy {
    /// 新的最高分写入内核下限，设备不再搜索更低的分数
    #[default]
    Watermark,
    /// 始终使用 score_min，所有合格结果都会继续写入输出文件
    ScoreMin,
}

/// 运行配置 (构造 Dispatcher 时提供，运行期间不可变)
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// 输出文件
    pub file_name: PathBuf,
    /// 最低分数，不超过该分数的结果不会报告
    pub score_min: u8,
    /// 运行开始时间
    pub time_start: Instant,
    /// 分数下限策略
    pub floor_policy: FloorPolicy,
}

impl RunConfig {
    pub fn new(file_name: impl Into<PathBuf>, score_min: u8) -> Self {
        Self {
            file_name: file_name.into(),
            score_min,
            time_start: Instant::now(),
            floor_policy: FloorPolicy::default(),
        }
    }

    pub fn with_floor_policy(mut self, floor_policy: FloorPolicy) -> Self {
        self.floor_policy = floor_policy;
        self
    }

    /// 新最高分出现时写入内核的分数下限
    pub fn score_floor(&self, watermark: u8) -> u8 {
        match self.floor_policy {
            FloorPolicy::Watermark => watermark,
            FloorPolicy::ScoreMin => self.score_min,
        }
    }
}

/// 默认输出文件名: `<模式名>-<时间戳>.txt`
pub fn default_file_name(function: ModeFunction) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}.txt", function.name(), nanos)
}
