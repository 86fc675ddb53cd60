//! 符号解码
//!
//! 在一个压缩块内部，按当前的 literal/length 树与 distance 树解出字面字节
//! 或 (长度, 距离) 对，并在输出窗口中完成回溯复制。
//!
//! 每个子状态只在拿到所需的全部比特和输出空间后才前进，否则原样返回
//! [`CodesStatus::Suspended`]，下一次调用从同一个子状态继续。
//! 输出窗口至少有 258 字节空闲且输入至少剩 10 字节时，改走不做挂起检查的快速路径。

use super::bitstream::BitReader;
use super::huffman::{decode_entry, Entry, Op, Tree};
use super::inflate::InflateError;
use super::window::{OutputBuffer, Window};

/// 单个长度/距离对最多产生的字节数
const MAX_MATCH: usize = 258;

/// 快速路径每个符号最多消耗的输入字节数（留有余量）
const FAST_MIN_INPUT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// 选择快速路径或逐比特路径
    Start,
    /// 解 literal/length 码，`table` 为当前（子）表起点
    Len { need: u8, table: usize },
    /// 读长度额外位
    LenExt { extra: u8 },
    /// 解 distance 码
    Dist { need: u8, table: usize },
    /// 读距离额外位
    DistExt { extra: u8, dist: usize },
    /// 回溯复制，剩余长度在 `Codes::len`
    Copy { dist: usize },
    /// 输出一个字面字节
    Lit(u8),
    /// 块结束：退回多读的字节并排空窗口
    Wash,
    End,
    Bad(InflateError),
}

/// [`Codes::run`] 的返回
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodesStatus {
    /// 需要更多输入或更多输出空间
    Suspended,
    /// 遇到块结束符且窗口已排空
    BlockEnd,
}

enum FastExit {
    /// 输入或窗口余量不足，回到逐比特路径
    Exhausted,
    BlockEnd,
}

/// 一个压缩块的符号解码器
#[derive(Debug, Clone)]
pub struct Codes {
    mode: Mode,
    len: usize,
    literal: Tree,
    distance: Option<Tree>,
    fixed: bool,
}

impl Codes {
    /// `distance` 为 `None` 表示本块没有距离码（只可能出现在无长度码的块中）
    pub fn new(literal: Tree, distance: Option<Tree>, fixed: bool) -> Self {
        Self {
            mode: Mode::Start,
            len: 0,
            literal,
            distance,
            fixed,
        }
    }

    /// 是否使用固定 Huffman 表
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    fn fail(&mut self, err: InflateError) -> Result<CodesStatus, InflateError> {
        self.mode = Mode::Bad(err);
        Err(err)
    }

    /// 解码直到块结束或挂起
    ///
    /// `tables` 必须是构造 `literal`/`distance` 两棵树时使用的表项存储区。
    pub fn run(
        &mut self,
        tables: &[Entry],
        input: &mut BitReader<'_>,
        window: &mut Window,
        out: &mut OutputBuffer<'_>,
    ) -> Result<CodesStatus, InflateError> {
        loop {
            match self.mode {
                Mode::Start => {
                    if window.avail() >= MAX_MATCH && input.remaining() >= FAST_MIN_INPUT {
                        match self.decode_fast(tables, input, window) {
                            Ok(FastExit::BlockEnd) => {
                                self.mode = Mode::Wash;
                                continue;
                            }
                            Ok(FastExit::Exhausted) => {}
                            Err(err) => return self.fail(err),
                        }
                    }
                    self.mode = Mode::Len {
                        need: self.literal.bits,
                        table: self.literal.root,
                    };
                }
                Mode::Len { need, table } => {
                    let Some(e) = decode_entry(tables, input, table, need as u32) else {
                        return Ok(CodesStatus::Suspended);
                    };
                    input.consume(e.bits as u32);
                    self.mode = match e.op {
                        Op::Literal => Mode::Lit(e.value as u8),
                        Op::Base { extra } => {
                            self.len = e.value as usize;
                            Mode::LenExt { extra }
                        }
                        Op::SubTable { bits } => Mode::Len {
                            need: bits,
                            table: e.value as usize,
                        },
                        Op::EndOfBlock => Mode::Wash,
                        Op::Invalid => return self.fail(InflateError::InvalidLiteralLengthCode),
                    };
                }
                Mode::LenExt { extra } => {
                    if !input.need_bits(extra as u32) {
                        return Ok(CodesStatus::Suspended);
                    }
                    self.len += input.peek_bits(extra as u32) as usize;
                    input.consume(extra as u32);
                    match self.distance {
                        Some(tree) => {
                            self.mode = Mode::Dist {
                                need: tree.bits,
                                table: tree.root,
                            }
                        }
                        None => return self.fail(InflateError::InvalidDistanceCode),
                    }
                }
                Mode::Dist { need, table } => {
                    let Some(e) = decode_entry(tables, input, table, need as u32) else {
                        return Ok(CodesStatus::Suspended);
                    };
                    input.consume(e.bits as u32);
                    self.mode = match e.op {
                        Op::Base { extra } => Mode::DistExt {
                            extra,
                            dist: e.value as usize,
                        },
                        Op::SubTable { bits } => Mode::Dist {
                            need: bits,
                            table: e.value as usize,
                        },
                        _ => return self.fail(InflateError::InvalidDistanceCode),
                    };
                }
                Mode::DistExt { extra, dist } => {
                    if !input.need_bits(extra as u32) {
                        return Ok(CodesStatus::Suspended);
                    }
                    let dist = dist + input.peek_bits(extra as u32) as usize;
                    input.consume(extra as u32);
                    if !window.distance_ok(dist) {
                        return self.fail(InflateError::DistanceTooFarBack);
                    }
                    self.mode = Mode::Copy { dist };
                }
                Mode::Copy { dist } => {
                    while self.len > 0 {
                        if !window.need_out(out) {
                            return Ok(CodesStatus::Suspended);
                        }
                        let n = self.len.min(window.avail());
                        window.copy_match(dist, n);
                        self.len -= n;
                    }
                    self.mode = Mode::Start;
                }
                Mode::Lit(byte) => {
                    if !window.need_out(out) {
                        return Ok(CodesStatus::Suspended);
                    }
                    window.push(byte);
                    self.mode = Mode::Start;
                }
                Mode::Wash => {
                    input.return_unused_bytes();
                    window.flush(out);
                    if !window.is_drained() {
                        return Ok(CodesStatus::Suspended);
                    }
                    self.mode = Mode::End;
                }
                Mode::End => return Ok(CodesStatus::BlockEnd),
                Mode::Bad(err) => return Err(err),
            }
        }
    }

    /// 快速路径
    ///
    /// 进入时保证窗口连续空闲 >= 258 字节、输入 >= 10 字节，
    /// 一个符号（码字 + 额外位 + 距离码 + 额外位）最多 48 位，因此循环体内不必检查输入。
    /// 退出时把多读的整字节退回输入。
    fn decode_fast(
        &self,
        tables: &[Entry],
        input: &mut BitReader<'_>,
        window: &mut Window,
    ) -> Result<FastExit, InflateError> {
        let result = self.decode_fast_inner(tables, input, window);
        input.return_unused_bytes();
        result
    }

    fn decode_fast_inner(
        &self,
        tables: &[Entry],
        input: &mut BitReader<'_>,
        window: &mut Window,
    ) -> Result<FastExit, InflateError> {
        let literal = self.literal;
        loop {
            input.need_bits(20);
            let mut e = tables[literal.root + input.peek_bits(literal.bits as u32) as usize];
            loop {
                input.consume(e.bits as u32);
                match e.op {
                    Op::Literal => {
                        window.push(e.value as u8);
                        break;
                    }
                    Op::Base { extra } => {
                        let len = e.value as usize + input.peek_bits(extra as u32) as usize;
                        input.consume(extra as u32);

                        let tree = self.distance.ok_or(InflateError::InvalidDistanceCode)?;
                        input.need_bits(15);
                        let mut d = tables[tree.root + input.peek_bits(tree.bits as u32) as usize];
                        loop {
                            input.consume(d.bits as u32);
                            match d.op {
                                Op::Base { extra } => {
                                    input.need_bits(extra as u32);
                                    let dist =
                                        d.value as usize + input.peek_bits(extra as u32) as usize;
                                    input.consume(extra as u32);
                                    if !window.distance_ok(dist) {
                                        return Err(InflateError::DistanceTooFarBack);
                                    }
                                    window.copy_match(dist, len);
                                    break;
                                }
                                Op::SubTable { bits } => {
                                    d = tables
                                        [d.value as usize + input.peek_bits(bits as u32) as usize];
                                }
                                _ => return Err(InflateError::InvalidDistanceCode),
                            }
                        }
                        break;
                    }
                    Op::SubTable { bits } => {
                        e = tables[e.value as usize + input.peek_bits(bits as u32) as usize];
                    }
                    Op::EndOfBlock => return Ok(FastExit::BlockEnd),
                    Op::Invalid => return Err(InflateError::InvalidLiteralLengthCode),
                }
            }

            if window.avail() < MAX_MATCH || input.remaining() < FAST_MIN_INPUT {
                return Ok(FastExit::Exhausted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zlib::bitstream::BitWriter;
    use crate::zlib::huffman::fixed_tables;
    use crate::zlib::Checksum;

    fn fixed_codes() -> Codes {
        let fixed = fixed_tables();
        Codes::new(fixed.literal, Some(fixed.distance), true)
    }

    /// "abc" + (len 6, dist 3) + EOB
    fn sample_block() -> Vec<u8> {
        let mut bits = BitWriter::new();
        for &b in b"abc" {
            bits.fixed_literal(b);
        }
        bits.code(4, 7); // 长度码 260 -> 6
        bits.code(2, 5); // 距离码 2 -> 3
        bits.code(0, 7); // 块结束
        bits.into_bytes()
    }

    fn run_all(codes: &mut Codes, data: &[u8], chunk: usize, out_chunk: usize) -> Vec<u8> {
        let tables = fixed_tables().arena.entries();
        let mut window = Window::new(15, Checksum::None).unwrap();
        let mut state = crate::zlib::bitstream::BitState::default();
        let mut produced = Vec::new();
        let mut offset = 0;
        loop {
            let end = (offset + chunk).min(data.len());
            let mut reader = BitReader::resume(&data[offset..end], state);
            let mut buf = vec![0u8; out_chunk];
            let mut sink = OutputBuffer::new(&mut buf);
            let status = codes.run(tables, &mut reader, &mut window, &mut sink).unwrap();
            window.flush(&mut sink);
            let n = sink.written();
            produced.extend_from_slice(&buf[..n]);
            offset += reader.position();
            state = reader.suspend();
            if status == CodesStatus::BlockEnd {
                return produced;
            }
        }
    }

    #[test]
    fn test_slow_path_byte_by_byte() {
        let data = sample_block();
        let mut codes = fixed_codes();
        assert_eq!(run_all(&mut codes, &data, 1, 1), b"abcabcabc");
    }

    #[test]
    fn test_fast_path_with_padding() {
        let mut data = sample_block();
        data.extend_from_slice(&[0u8; 16]);
        let mut codes = fixed_codes();
        assert_eq!(run_all(&mut codes, &data, data.len(), 4096), b"abcabcabc");
    }

    #[test]
    fn test_end_of_block_in_last_bits() {
        // 16 + 7 位，只剩 1 位填充，不足一级表的 9 位
        let mut bits = BitWriter::new();
        bits.fixed_literal(b'a');
        bits.fixed_literal(b'b');
        bits.code(0, 7);
        let data = bits.into_bytes();
        assert_eq!(data.len(), 3);

        let mut codes = fixed_codes();
        assert_eq!(run_all(&mut codes, &data, data.len(), 64), b"ab");
        let mut codes = fixed_codes();
        assert_eq!(run_all(&mut codes, &data, 1, 1), b"ab");
    }

    #[test]
    fn test_truncated_code_suspends() {
        let mut bits = BitWriter::new();
        bits.fixed_literal(0xF0); // 9 位码字
        let data = bits.into_bytes();

        let tables = fixed_tables().arena.entries();
        let mut window = Window::new(15, Checksum::None).unwrap();
        let mut reader = BitReader::from_slice(&data[..1]);
        let mut buf = [0u8; 16];
        let mut sink = OutputBuffer::new(&mut buf);
        let mut codes = fixed_codes();
        assert_eq!(
            codes.run(tables, &mut reader, &mut window, &mut sink),
            Ok(CodesStatus::Suspended)
        );
        assert_eq!(reader.buffered_bits(), 8);
        assert_eq!(sink.written(), 0);
    }

    #[test]
    fn test_distance_before_history_is_rejected() {
        let mut bits = BitWriter::new();
        bits.fixed_literal(b'x');
        bits.code(1, 7); // 长度码 257 -> 3
        bits.code(1, 5); // 距离码 1 -> 2，但历史只有 1 字节
        bits.code(0, 7);
        let data = bits.into_bytes();

        let tables = fixed_tables().arena.entries();
        let mut window = Window::new(15, Checksum::None).unwrap();
        let mut reader = BitReader::from_slice(&data);
        let mut buf = [0u8; 64];
        let mut sink = OutputBuffer::new(&mut buf);
        let mut codes = fixed_codes();
        assert_eq!(
            codes.run(tables, &mut reader, &mut window, &mut sink),
            Err(InflateError::DistanceTooFarBack)
        );
        // 错误状态是终态
        assert_eq!(
            codes.run(tables, &mut reader, &mut window, &mut sink),
            Err(InflateError::DistanceTooFarBack)
        );
    }

    #[test]
    fn test_invalid_fixed_distance_code() {
        let mut bits = BitWriter::new();
        bits.fixed_literal(b'x');
        bits.code(1, 7);
        bits.code(30, 5); // 距离码 30 不存在
        let data = bits.into_bytes();

        let tables = fixed_tables().arena.entries();
        let mut window = Window::new(15, Checksum::None).unwrap();
        let mut reader = BitReader::from_slice(&data);
        let mut buf = [0u8; 64];
        let mut sink = OutputBuffer::new(&mut buf);
        let mut codes = fixed_codes();
        assert_eq!(
            codes.run(tables, &mut reader, &mut window, &mut sink),
            Err(InflateError::InvalidDistanceCode)
        );
    }
}
