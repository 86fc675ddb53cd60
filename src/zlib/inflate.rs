//! 解压会话
//!
//! [`Inflater`] 在 [`Blocks`] 外面包一层可选的 zlib 头尾（RFC 1950），
//! 并负责在两次调用之间保存位缓冲区和统计信息。
//!
//! 调用方每次提供一段输入和一块输出空间，根据 [`InflateStatus`] 决定下一步：
//! 补充输入、腾出输出空间、提供预设字典，或者结束。

use thiserror::Error;
use tracing::{debug, trace};

use super::bitstream::{BitReader, BitState};
use super::blocks::{BlockStatus, Blocks};
use super::window::{OutputBuffer, Window};
use super::{adler32, Checksum, ADLER32_INIT};

/// 解压错误
///
/// 消息文本与 zlib 保持一致。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflateError {
    #[error("invalid block type")]
    InvalidBlockType,

    #[error("invalid stored block lengths")]
    InvalidStoredLengths,

    #[error("too many length or distance symbols")]
    TooManySymbols,

    #[error("oversubscribed dynamic bit lengths tree")]
    OversubscribedBitLengths,

    #[error("incomplete dynamic bit lengths tree")]
    IncompleteBitLengths,

    #[error("invalid bit length code")]
    InvalidBitLengthCode,

    #[error("invalid bit length repeat")]
    InvalidBitLengthRepeat,

    #[error("oversubscribed literal/length tree")]
    OversubscribedLiteralLength,

    #[error("incomplete literal/length tree")]
    IncompleteLiteralLength,

    #[error("oversubscribed distance tree")]
    OversubscribedDistance,

    #[error("incomplete distance tree")]
    IncompleteDistance,

    #[error("empty distance tree with lengths")]
    EmptyDistanceWithLengths,

    #[error("invalid literal/length code")]
    InvalidLiteralLengthCode,

    #[error("invalid distance code")]
    InvalidDistanceCode,

    #[error("invalid distance too far back")]
    DistanceTooFarBack,

    #[error("unknown compression method")]
    UnknownCompressionMethod,

    #[error("invalid window size")]
    InvalidWindowSize,

    #[error("incorrect header check")]
    IncorrectHeaderCheck,

    #[error("need dictionary")]
    NeedDictionary,

    #[error("dictionary does not match the stream")]
    DictionaryMismatch,

    #[error("stream does not expect a dictionary")]
    DictionaryNotExpected,

    #[error("incorrect data check")]
    IncorrectDataCheck,

    #[error("incorrect length check")]
    IncorrectLengthCheck,

    #[error("not in gzip format")]
    BadGzipHeader,

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("output buffer too small")]
    BufferTooSmall,

    #[error("insufficient memory")]
    OutOfMemory,

    #[error("window bits must be 8..=15, got {0}")]
    InvalidWindowBits(u8),
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 比特流或容器结构损坏
    Structural,
    /// 结构完整但校验和不符，产出的数据可能仍可用
    Integrity,
    /// 内存分配失败
    Resource,
    /// 调用方用法错误
    Usage,
}

impl InflateError {
    pub fn class(&self) -> ErrorClass {
        match self {
            InflateError::IncorrectDataCheck | InflateError::IncorrectLengthCheck => {
                ErrorClass::Integrity
            }
            InflateError::OutOfMemory => ErrorClass::Resource,
            InflateError::NeedDictionary
            | InflateError::DictionaryMismatch
            | InflateError::DictionaryNotExpected
            | InflateError::BufferTooSmall
            | InflateError::InvalidWindowBits(_) => ErrorClass::Usage,
            _ => ErrorClass::Structural,
        }
    }
}

/// 流外层格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wrapper {
    /// 裸 DEFLATE（ZIP 条目、gzip 成员体）
    Raw,
    /// zlib 头 + DEFLATE + Adler32 尾
    #[default]
    Zlib,
}

/// 会话配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InflateOptions {
    pub window_bits: u8,
    pub wrapper: Wrapper,
    /// 输出校验；zlib 包装固定使用 Adler32，裸流默认不计算
    pub checksum: Option<Checksum>,
}

impl Default for InflateOptions {
    fn default() -> Self {
        Self {
            window_bits: 15,
            wrapper: Wrapper::Zlib,
            checksum: None,
        }
    }
}

impl InflateOptions {
    /// 裸 DEFLATE，32 KiB 窗口
    pub fn raw() -> Self {
        Self::default().wrapper(Wrapper::Raw)
    }

    pub fn window_bits(mut self, window_bits: u8) -> Self {
        self.window_bits = window_bits;
        self
    }

    pub fn wrapper(mut self, wrapper: Wrapper) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    fn effective_checksum(&self) -> Checksum {
        match self.wrapper {
            Wrapper::Zlib => Checksum::Adler32,
            Wrapper::Raw => self.checksum.unwrap_or_default(),
        }
    }
}

/// 一次 [`Inflater::inflate`] 调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InflateResult {
    pub status: InflateStatus,
    /// 本次从输入中消耗的字节数
    pub bytes_read: usize,
    /// 本次写入输出的字节数
    pub bytes_written: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflateStatus {
    /// 输入已全部消耗，需要更多输入
    NeedsMoreInput,
    /// 输出缓冲区已满，还有待输出的数据
    HasMoreOutput,
    /// 流声明了预设字典，需要调用 [`Inflater::set_dictionary`]
    NeedsDictionary,
    /// 流已结束（包括尾部校验）
    Done,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    /// zlib CMF
    Method,
    /// zlib FLG
    Flag { cmf: u8 },
    /// 读取 4 字节字典 Adler32
    Dict { id: u32, have: u8 },
    /// 等待调用方提供字典
    NeedDict(u32),
    Blocks,
    /// 读取 4 字节 Adler32 尾
    Check { expected: u32, have: u8 },
    Done,
    Bad(InflateError),
}

enum Step {
    Suspended,
    NeedDictionary,
    Done,
}

/// 可挂起的解压会话
#[derive(Debug, Clone)]
pub struct Inflater {
    options: InflateOptions,
    mode: Mode,
    blocks: Blocks,
    bits: BitState,
    total_in: u64,
    total_out: u64,
}

impl Inflater {
    pub fn new(options: InflateOptions) -> Result<Self, InflateError> {
        if !(8..=15).contains(&options.window_bits) {
            return Err(InflateError::InvalidWindowBits(options.window_bits));
        }
        let window = Window::new(options.window_bits, options.effective_checksum())
            .map_err(|_| InflateError::OutOfMemory)?;
        Ok(Self {
            options,
            mode: Self::initial_mode(options.wrapper),
            blocks: Blocks::new(window),
            bits: BitState::default(),
            total_in: 0,
            total_out: 0,
        })
    }

    fn initial_mode(wrapper: Wrapper) -> Mode {
        match wrapper {
            Wrapper::Raw => Mode::Blocks,
            Wrapper::Zlib => Mode::Method,
        }
    }

    pub fn options(&self) -> &InflateOptions {
        &self.options
    }

    /// 解压 `input` 到 `output`
    ///
    /// 返回 `Err` 后会话进入终态，之后每次调用都返回同一个错误，直到 [`Inflater::reset`]。
    pub fn inflate(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<InflateResult, InflateError> {
        let mut reader = BitReader::resume(input, self.bits);
        let mut out = OutputBuffer::new(output);

        let step = self.advance(&mut reader, &mut out);

        self.bits = reader.suspend();
        let bytes_read = reader.position();
        let bytes_written = out.written();
        self.total_in += bytes_read as u64;
        self.total_out += bytes_written as u64;

        let status = match step {
            Ok(Step::Done) => InflateStatus::Done,
            Ok(Step::NeedDictionary) => InflateStatus::NeedsDictionary,
            Ok(Step::Suspended) if out.is_full() => InflateStatus::HasMoreOutput,
            Ok(Step::Suspended) => InflateStatus::NeedsMoreInput,
            Err(err) => {
                self.mode = Mode::Bad(err);
                return Err(err);
            }
        };

        Ok(InflateResult {
            status,
            bytes_read,
            bytes_written,
        })
    }

    fn advance(
        &mut self,
        input: &mut BitReader<'_>,
        out: &mut OutputBuffer<'_>,
    ) -> Result<Step, InflateError> {
        loop {
            match self.mode {
                Mode::Method => {
                    let Some(cmf) = input.read_byte() else {
                        return Ok(Step::Suspended);
                    };
                    if cmf & 0x0F != 8 {
                        return Err(InflateError::UnknownCompressionMethod);
                    }
                    if (cmf >> 4) + 8 > self.options.window_bits {
                        return Err(InflateError::InvalidWindowSize);
                    }
                    self.mode = Mode::Flag { cmf };
                }
                Mode::Flag { cmf } => {
                    let Some(flg) = input.read_byte() else {
                        return Ok(Step::Suspended);
                    };
                    if (((cmf as u32) << 8) | flg as u32) % 31 != 0 {
                        return Err(InflateError::IncorrectHeaderCheck);
                    }
                    trace!(cmf, flg, "zlib header");
                    self.mode = if flg & 0x20 != 0 {
                        Mode::Dict { id: 0, have: 0 }
                    } else {
                        Mode::Blocks
                    };
                }
                Mode::Dict { mut id, mut have } => {
                    while have < 4 {
                        let Some(byte) = input.read_byte() else {
                            self.mode = Mode::Dict { id, have };
                            return Ok(Step::Suspended);
                        };
                        id = (id << 8) | byte as u32;
                        have += 1;
                    }
                    debug!(dictid = id, "stream requests a preset dictionary");
                    self.mode = Mode::NeedDict(id);
                    return Ok(Step::NeedDictionary);
                }
                Mode::NeedDict(_) => return Ok(Step::NeedDictionary),
                Mode::Blocks => match self.blocks.run(input, out)? {
                    BlockStatus::Suspended => return Ok(Step::Suspended),
                    BlockStatus::StreamEnd => {
                        input.align_to_byte();
                        self.mode = match self.options.wrapper {
                            Wrapper::Raw => {
                                input.return_unused_bytes();
                                Mode::Done
                            }
                            Wrapper::Zlib => Mode::Check {
                                expected: 0,
                                have: 0,
                            },
                        };
                    }
                },
                Mode::Check {
                    mut expected,
                    mut have,
                } => {
                    while have < 4 {
                        let Some(byte) = input.read_byte() else {
                            self.mode = Mode::Check { expected, have };
                            return Ok(Step::Suspended);
                        };
                        expected = (expected << 8) | byte as u32;
                        have += 1;
                    }
                    if expected != self.blocks.window().check() {
                        return Err(InflateError::IncorrectDataCheck);
                    }
                    self.mode = Mode::Done;
                }
                Mode::Done => return Ok(Step::Done),
                Mode::Bad(err) => return Err(err),
            }
        }
    }

    /// 提供流头声明的预设字典
    ///
    /// 只能在 [`InflateStatus::NeedsDictionary`] 之后调用；字典的 Adler32 必须与流头一致。
    pub fn set_dictionary(&mut self, dictionary: &[u8]) -> Result<(), InflateError> {
        let Mode::NeedDict(id) = self.mode else {
            return Err(InflateError::DictionaryNotExpected);
        };
        if adler32(ADLER32_INIT, dictionary) != id {
            return Err(InflateError::DictionaryMismatch);
        }
        self.blocks.window_mut().prime(dictionary);
        self.mode = Mode::Blocks;
        Ok(())
    }

    /// 回到流起点，保留窗口和表存储
    pub fn reset(&mut self) {
        self.mode = Self::initial_mode(self.options.wrapper);
        self.blocks.reset();
        self.bits = BitState::default();
        self.total_in = 0;
        self.total_out = 0;
    }

    pub fn is_done(&self) -> bool {
        matches!(self.mode, Mode::Done)
    }

    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// 已输出数据的校验值（按配置的校验函数）
    pub fn check(&self) -> u32 {
        self.blocks.window().check()
    }

    /// 等待字典时返回字典的 Adler32，否则返回已输出数据的 Adler32
    pub fn adler(&self) -> u32 {
        match self.mode {
            Mode::NeedDict(id) => id,
            _ => self.check(),
        }
    }

    /// 取出流结束后仍留在位缓冲区中的整字节
    ///
    /// 裸流结束时多读的字节会尽量退回调用方的输入；早于本次调用读入的字节只能从这里取回。
    pub fn take_unused_input(&mut self) -> Vec<u8> {
        self.bits.drain_bytes()
    }
}

const INITIAL_CHUNK: usize = 1024;

fn inflate_all(input: &[u8], options: InflateOptions) -> Result<Vec<u8>, InflateError> {
    let mut inflater = Inflater::new(options)?;
    let mut output = Vec::new();
    let mut consumed = 0;
    let mut produced = 0;

    loop {
        if produced == output.len() {
            let grow = output.len().max(input.len() * 2).max(INITIAL_CHUNK);
            output
                .try_reserve_exact(grow)
                .map_err(|_| InflateError::OutOfMemory)?;
            output.resize(produced + grow, 0);
        }

        let result = inflater.inflate(&input[consumed..], &mut output[produced..])?;
        consumed += result.bytes_read;
        produced += result.bytes_written;

        match result.status {
            InflateStatus::Done => {
                output.truncate(produced);
                return Ok(output);
            }
            InflateStatus::HasMoreOutput => {}
            InflateStatus::NeedsMoreInput => return Err(InflateError::UnexpectedEof),
            InflateStatus::NeedsDictionary => return Err(InflateError::NeedDictionary),
        }
    }
}

/// 一次性解压 zlib 流
pub fn uncompress(input: &[u8]) -> Result<Vec<u8>, InflateError> {
    inflate_all(input, InflateOptions::default())
}

/// 一次性解压裸 DEFLATE 流
pub fn decompress_raw(input: &[u8]) -> Result<Vec<u8>, InflateError> {
    inflate_all(input, InflateOptions::raw())
}

/// 把 zlib 流解压到调用方的固定缓冲区，返回写入的字节数
pub fn decompress_to_buffer(input: &[u8], output: &mut [u8]) -> Result<usize, InflateError> {
    let mut inflater = Inflater::new(InflateOptions::default())?;
    let result = inflater.inflate(input, output)?;
    match result.status {
        InflateStatus::Done => Ok(result.bytes_written),
        InflateStatus::HasMoreOutput => Err(InflateError::BufferTooSmall),
        InflateStatus::NeedsMoreInput => Err(InflateError::UnexpectedEof),
        InflateStatus::NeedsDictionary => Err(InflateError::NeedDictionary),
    }
}
