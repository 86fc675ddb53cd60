//! 块状态机
//!
//! 读取 3 位块头，按块类型分派：
//!
//! - 存储块：`Lens` 校验 LEN/NLEN 后进入 `Stored` 原样复制
//! - 固定 Huffman 块：直接使用 [`fixed_tables`]
//! - 动态 Huffman 块：`Table` 读 HLIT/HDIST/HCLEN，`BTree` 读码长码的码长并建表，
//!   `DTree` 解出 literal/length 与 distance 的码长并建两棵树
//!
//! 之后由 [`Codes`] 解码到块结束。最后一块结束后经 `Dry` 排空窗口进入 `Done`。
//! 任何结构错误都进入 `Bad` 终态，之后的调用重复报告同一个错误。

use tracing::trace;

use super::bitstream::BitReader;
use super::codes::{Codes, CodesStatus};
use super::huffman::{
    self, fixed_tables, Build, HuffmanArena, Op, Tree, DIST_BASE, DIST_EXTRA, LENGTH_BASE,
    LENGTH_EXTRA,
};
use super::inflate::InflateError;
use super::window::{OutputBuffer, Window};

/// 码长码的传输顺序
const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// 码长码树的一级表宽度
const BIT_LENGTH_TABLE_BITS: u8 = 7;
/// literal/length 树的一级表宽度
const LITERAL_TABLE_BITS: u8 = 9;
/// distance 树的一级表宽度
const DISTANCE_TABLE_BITS: u8 = 6;

#[derive(Debug, Clone)]
enum Mode {
    /// 读块头
    Type,
    /// 读存储块的 LEN/NLEN
    Lens,
    /// 复制存储块，剩余 `left` 字节
    Stored { left: usize },
    /// 读动态块的 14 位表头
    Table,
    /// 读码长码的码长
    BTree { header: u32, index: usize },
    /// 解码 literal/length + distance 码长
    DTree { header: u32, index: usize, tree: Tree },
    /// 解码符号
    Codes(Codes),
    /// 最后一块已结束，排空窗口
    Dry,
    Done,
    Bad(InflateError),
}

/// [`Blocks::run`] 的返回
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// 需要更多输入或更多输出空间
    Suspended,
    /// 最后一块已解码且窗口已排空
    StreamEnd,
}

/// DEFLATE 块解码器
#[derive(Debug, Clone)]
pub struct Blocks {
    mode: Mode,
    last: bool,
    /// 动态块的码长暂存区
    lens: Vec<u8>,
    arena: HuffmanArena,
    window: Window,
}

impl Blocks {
    pub fn new(window: Window) -> Self {
        Self {
            mode: Mode::Type,
            last: false,
            lens: Vec::new(),
            arena: HuffmanArena::new(),
            window,
        }
    }

    /// 回到流起点，复用窗口与表存储
    pub fn reset(&mut self) {
        self.mode = Mode::Type;
        self.last = false;
        self.lens.clear();
        self.arena.clear();
        self.window.reset();
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    pub fn is_done(&self) -> bool {
        matches!(self.mode, Mode::Done)
    }

    /// 推进状态机直到流结束、挂起或出错；每次返回前都把窗口排空到 `out`
    pub fn run(
        &mut self,
        input: &mut BitReader<'_>,
        out: &mut OutputBuffer<'_>,
    ) -> Result<BlockStatus, InflateError> {
        let result = self.advance(input, out);
        if let Err(err) = result {
            self.mode = Mode::Bad(err);
        }
        self.window.flush(out);
        result
    }

    fn advance(
        &mut self,
        input: &mut BitReader<'_>,
        out: &mut OutputBuffer<'_>,
    ) -> Result<BlockStatus, InflateError> {
        loop {
            match &mut self.mode {
                Mode::Type => {
                    if !input.need_bits(3) {
                        return Ok(BlockStatus::Suspended);
                    }
                    let header = input.peek_bits(3);
                    input.consume(3);
                    self.last = header & 1 != 0;
                    trace!(last = self.last, kind = header >> 1, "deflate block");
                    self.mode = match header >> 1 {
                        0 => {
                            input.align_to_byte();
                            Mode::Lens
                        }
                        1 => {
                            let fixed = fixed_tables();
                            Mode::Codes(Codes::new(fixed.literal, Some(fixed.distance), true))
                        }
                        2 => Mode::Table,
                        _ => return Err(InflateError::InvalidBlockType),
                    };
                }
                Mode::Lens => {
                    if !input.need_bits(32) {
                        return Ok(BlockStatus::Suspended);
                    }
                    let lens = input.peek_bits(32);
                    if (!lens >> 16) & 0xFFFF != lens & 0xFFFF {
                        return Err(InflateError::InvalidStoredLengths);
                    }
                    input.consume(32);
                    let left = (lens & 0xFFFF) as usize;
                    self.mode = if left != 0 {
                        Mode::Stored { left }
                    } else if self.last {
                        Mode::Dry
                    } else {
                        Mode::Type
                    };
                }
                Mode::Stored { left } => {
                    while *left > 0 {
                        if input.bytes_available() == 0 {
                            return Ok(BlockStatus::Suspended);
                        }
                        if !self.window.need_out(out) {
                            return Ok(BlockStatus::Suspended);
                        }
                        let n = (*left)
                            .min(input.bytes_available())
                            .min(self.window.avail());
                        let copied = input.read_bytes_into(self.window.spare_mut(n));
                        self.window.commit(copied);
                        *left -= copied;
                    }
                    self.mode = if self.last { Mode::Dry } else { Mode::Type };
                }
                Mode::Table => {
                    if !input.need_bits(14) {
                        return Ok(BlockStatus::Suspended);
                    }
                    let header = input.peek_bits(14);
                    if (header & 0x1F) > 29 || ((header >> 5) & 0x1F) > 29 {
                        return Err(InflateError::TooManySymbols);
                    }
                    let total = 258 + (header & 0x1F) as usize + ((header >> 5) & 0x1F) as usize;
                    self.lens.clear();
                    self.lens
                        .try_reserve_exact(total)
                        .map_err(|_| InflateError::OutOfMemory)?;
                    self.lens.resize(total, 0);
                    input.consume(14);
                    self.mode = Mode::BTree { header, index: 0 };
                }
                Mode::BTree { header, index } => {
                    let count = 4 + (*header >> 10) as usize;
                    while *index < count {
                        if !input.need_bits(3) {
                            return Ok(BlockStatus::Suspended);
                        }
                        self.lens[CODE_LENGTH_ORDER[*index]] = input.peek_bits(3) as u8;
                        input.consume(3);
                        *index += 1;
                    }
                    for &symbol in &CODE_LENGTH_ORDER[count..] {
                        self.lens[symbol] = 0;
                    }

                    self.arena.clear();
                    let tree = match huffman::build(
                        &self.lens[..19],
                        19,
                        &[],
                        &[],
                        BIT_LENGTH_TABLE_BITS,
                        &mut self.arena,
                    ) {
                        Ok(Build::Complete(tree)) => tree,
                        Ok(_) => return Err(InflateError::IncompleteBitLengths),
                        Err(_) => return Err(InflateError::OversubscribedBitLengths),
                    };
                    let header = *header;
                    self.mode = Mode::DTree {
                        header,
                        index: 0,
                        tree,
                    };
                }
                Mode::DTree {
                    header,
                    index,
                    tree,
                } => {
                    let nlit = 257 + (*header & 0x1F) as usize;
                    let ndist = 1 + ((*header >> 5) & 0x1F) as usize;
                    let total = nlit + ndist;
                    let entries = self.arena.entries();

                    while *index < total {
                        let need = tree.bits as u32;
                        let Some(e) = huffman::decode_entry(entries, input, tree.root, need) else {
                            return Ok(BlockStatus::Suspended);
                        };
                        if e.op != Op::Literal {
                            return Err(InflateError::InvalidBitLengthCode);
                        }
                        let bits = e.bits as u32;
                        let symbol = e.value;

                        if symbol < 16 {
                            input.consume(bits);
                            self.lens[*index] = symbol as u8;
                            *index += 1;
                            continue;
                        }

                        // 16: 重复前一个码长 3..=6 次；17: 3..=10 个 0；18: 11..=138 个 0
                        let (extra, base) = match symbol {
                            16 => (2, 3),
                            17 => (3, 3),
                            _ => (7, 11),
                        };
                        if !input.need_bits(bits + extra) {
                            return Ok(BlockStatus::Suspended);
                        }
                        input.consume(bits);
                        let repeat = base + input.peek_bits(extra) as usize;
                        input.consume(extra);

                        if *index + repeat > total || (symbol == 16 && *index == 0) {
                            return Err(InflateError::InvalidBitLengthRepeat);
                        }
                        let fill = if symbol == 16 { self.lens[*index - 1] } else { 0 };
                        self.lens[*index..*index + repeat].fill(fill);
                        *index += repeat;
                    }

                    self.arena.clear();
                    let literal = match huffman::build(
                        &self.lens[..nlit],
                        257,
                        &LENGTH_BASE,
                        &LENGTH_EXTRA,
                        LITERAL_TABLE_BITS,
                        &mut self.arena,
                    ) {
                        Ok(Build::Complete(tree)) => tree,
                        Ok(_) => return Err(InflateError::IncompleteLiteralLength),
                        Err(_) => return Err(InflateError::OversubscribedLiteralLength),
                    };
                    let distance = match huffman::build(
                        &self.lens[nlit..total],
                        0,
                        &DIST_BASE,
                        &DIST_EXTRA,
                        DISTANCE_TABLE_BITS,
                        &mut self.arena,
                    ) {
                        Ok(Build::Complete(tree)) => Some(tree),
                        Ok(Build::Empty) if nlit <= 257 => None,
                        Ok(Build::Empty) => return Err(InflateError::EmptyDistanceWithLengths),
                        Ok(Build::Incomplete(_)) => return Err(InflateError::IncompleteDistance),
                        Err(_) => return Err(InflateError::OversubscribedDistance),
                    };
                    trace!(nlit, ndist, tables = self.arena.len(), "dynamic trees built");
                    self.mode = Mode::Codes(Codes::new(literal, distance, false));
                }
                Mode::Codes(codes) => {
                    let tables = if codes.is_fixed() {
                        fixed_tables().arena.entries()
                    } else {
                        self.arena.entries()
                    };
                    match codes.run(tables, input, &mut self.window, out)? {
                        CodesStatus::Suspended => return Ok(BlockStatus::Suspended),
                        CodesStatus::BlockEnd => {
                            self.mode = if self.last { Mode::Dry } else { Mode::Type };
                        }
                    }
                }
                Mode::Dry => {
                    self.window.flush(out);
                    if !self.window.is_drained() {
                        return Ok(BlockStatus::Suspended);
                    }
                    self.mode = Mode::Done;
                }
                Mode::Done => return Ok(BlockStatus::StreamEnd),
                Mode::Bad(err) => return Err(*err),
            }
        }
    }
}
