//! Huffman 查找表构造
//!
//! RFC 1951 规范 Huffman 码的多级查找表。一棵树由一张一级表和若干子表组成，
//! 所有表项都放在同一个 [`HuffmanArena`] 里，子表通过下标引用。
//! 一级表宽度为 `min(请求宽度, 最长码长)`，更长的码字在一级表中留下
//! 一个 [`Op::SubTable`] 转义项，指向存放剩余比特的子表。

use std::sync::OnceLock;
use thiserror::Error;

use super::bitstream::BitReader;

/// 最长码长
pub const MAX_CODE_BITS: usize = 15;

/// 一次解压会话中三棵树共享的表项上限（bit-length + literal/length + distance）
pub const MAX_TABLE_ENTRIES: usize = 1440;

/// 长度码 257..=285 的基础值
pub const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];

/// 长度码额外位数
pub const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// 距离码 0..=29 的基础值
pub const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

/// 距离码额外位数
pub const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12,
    13, 13,
];

/// 表构造错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HuffmanError {
    /// 码长分配超出比特预算
    #[error("oversubscribed code lengths")]
    Oversubscribed,
    /// 表项总数超过 [`MAX_TABLE_ENTRIES`]
    #[error("huffman table space exhausted")]
    TableOverflow,
    /// 码长大于 15
    #[error("invalid code length")]
    InvalidCodeLength,
}

/// 表项类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// 直接符号，值在 `value`
    Literal,
    /// 长度/距离基础值 `value`，后随 `extra` 个额外位
    Base { extra: u8 },
    /// 转义：再取 `bits` 位索引从 `value` 开始的子表
    SubTable { bits: u8 },
    /// 块结束
    EndOfBlock,
    /// 无效码字
    Invalid,
}

/// 查找表项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub op: Op,
    /// 本表项消耗的比特数
    pub bits: u8,
    pub value: u16,
}

impl Entry {
    const INVALID: Entry = Entry {
        op: Op::Invalid,
        bits: 0,
        value: 0,
    };
}

/// 一棵树的入口：一级表下标与宽度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tree {
    pub root: usize,
    pub bits: u8,
}

impl Tree {
    /// 一级表的下标掩码
    pub fn mask(&self) -> u32 {
        (1u32 << self.bits) - 1
    }
}

/// 查找 `table` 起始的（子）表中 `need` 位对应的表项，不消耗比特
///
/// 输入不足 `need` 位时用已缓冲的比特查表（高位视为 0）。流末尾的短码字
/// 后面可能不足一整个表宽，只要表项自身的码长不超过已缓冲的位数就算解出；
/// 否则返回 `None`，等待更多输入。
pub fn decode_entry(
    entries: &[Entry],
    input: &mut BitReader<'_>,
    table: usize,
    need: u32,
) -> Option<Entry> {
    let complete = input.need_bits(need);
    let e = entries[table + input.peek_bits(need) as usize];
    if complete || (e.op != Op::Invalid && e.bits as u32 <= input.buffered_bits()) {
        Some(e)
    } else {
        None
    }
}

/// 构造结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Build {
    /// 所有码长为 0
    Empty,
    /// 码字恰好填满码空间
    Complete(Tree),
    /// 码空间未填满；未用到的比特模式映射为 [`Op::Invalid`]
    Incomplete(Tree),
}

/// 表项存储区
#[derive(Debug, Clone)]
pub struct HuffmanArena {
    entries: Vec<Entry>,
}

impl Default for HuffmanArena {
    fn default() -> Self {
        Self::new()
    }
}

impl HuffmanArena {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(MAX_TABLE_ENTRIES),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    fn alloc(&mut self, n: usize) -> Result<usize, HuffmanError> {
        let start = self.entries.len();
        if start + n > MAX_TABLE_ENTRIES {
            return Err(HuffmanError::TableOverflow);
        }
        self.entries.resize(start + n, Entry::INVALID);
        Ok(start)
    }
}

/// 由码长数组构造多级查找表
///
/// - `lengths`: 每个符号的码长，0 表示未使用
/// - `simple`: 小于该值的符号直接作为值（256 为块结束）
/// - `base` / `extra`: 符号 `simple + i` 的基础值与额外位数
/// - `max_bits`: 请求的一级表宽度
///
/// 码字超出比特预算时返回 [`HuffmanError::Oversubscribed`]；
/// 码空间未填满时仍然建表，以 [`Build::Incomplete`] 告知调用方，
/// 但最长码长为 1 的单码字树视为完整。
pub fn build(
    lengths: &[u8],
    simple: usize,
    base: &[u16],
    extra: &[u8],
    max_bits: u8,
    arena: &mut HuffmanArena,
) -> Result<Build, HuffmanError> {
    // 每个码长的码字数
    let mut count = [0i32; MAX_CODE_BITS + 1];
    for &len in lengths {
        if len as usize > MAX_CODE_BITS {
            return Err(HuffmanError::InvalidCodeLength);
        }
        count[len as usize] += 1;
    }
    if count[0] as usize == lengths.len() {
        return Ok(Build::Empty);
    }

    let min_len = (1..=MAX_CODE_BITS).find(|&k| count[k] != 0).unwrap_or(1);
    let max_len = (1..=MAX_CODE_BITS).rev().find(|&k| count[k] != 0).unwrap_or(1);
    let width = (max_bits as usize).clamp(min_len, max_len);

    // 逐级检查码空间；剩余空间作为哑码字补到最长一级
    let mut dummies: i32 = 1 << min_len;
    for k in min_len..max_len {
        dummies -= count[k];
        if dummies < 0 {
            return Err(HuffmanError::Oversubscribed);
        }
        dummies <<= 1;
    }
    dummies -= count[max_len];
    if dummies < 0 {
        return Err(HuffmanError::Oversubscribed);
    }
    count[max_len] += dummies;

    // 按码长排序的符号表
    let mut offsets = [0usize; MAX_CODE_BITS + 2];
    for k in 1..max_len {
        offsets[k + 1] = offsets[k] + count[k] as usize;
    }
    let mut symbols = vec![0u16; lengths.len()];
    let mut real_codes = 0;
    for (sym, &len) in lengths.iter().enumerate() {
        if len != 0 {
            symbols[offsets[len as usize]] = sym as u16;
            offsets[len as usize] += 1;
            real_codes += 1;
        }
    }

    let l = width as i32;
    let mut code: u32 = 0;
    let mut level: i32 = -1;
    let mut w: i32 = -l;
    let mut tables = [0usize; MAX_CODE_BITS];
    let mut saved = [0u32; MAX_CODE_BITS + 1];
    let mut table_size: u32 = 0;
    let mut current = 0usize;
    let mut root = 0usize;
    let mut next_symbol = 0usize;

    for k in min_len..=max_len {
        let mut remaining = count[k] as u32;
        while remaining > 0 {
            remaining -= 1;

            // 码字比当前表更长时下探一级并分配子表
            while k as i32 > w + l {
                level += 1;
                w += l;

                let limit = ((max_len as i32 - w) as u32).min(width as u32);
                let mut j = (k as i32 - w) as u32;
                let mut f = 1u32 << j;
                if f > remaining + 1 {
                    // 当前码长的码字填不满 2^j 个槽位，改用更宽的子表
                    f -= remaining + 1;
                    let mut xp = k;
                    if j < limit {
                        loop {
                            j += 1;
                            if j >= limit {
                                break;
                            }
                            xp += 1;
                            f <<= 1;
                            if f <= count[xp] as u32 {
                                break;
                            }
                            f -= count[xp] as u32;
                        }
                    }
                }
                table_size = 1 << j;

                current = arena.alloc(table_size as usize)?;
                tables[level as usize] = current;
                if level > 0 {
                    saved[level as usize] = code;
                    let parent = tables[level as usize - 1];
                    let slot = (code >> (w - l)) as usize;
                    arena.entries[parent + slot] = Entry {
                        op: Op::SubTable { bits: j as u8 },
                        bits: l as u8,
                        value: current as u16,
                    };
                } else {
                    root = current;
                }
            }

            let mut entry = Entry {
                op: Op::Invalid,
                bits: (k as i32 - w) as u8,
                value: 0,
            };
            if next_symbol < real_codes {
                let sym = symbols[next_symbol] as usize;
                next_symbol += 1;
                if sym < simple {
                    entry.op = if sym < 256 { Op::Literal } else { Op::EndOfBlock };
                    entry.value = sym as u16;
                } else if let (Some(&b), Some(&e)) = (base.get(sym - simple), extra.get(sym - simple)) {
                    entry.op = Op::Base { extra: e };
                    entry.value = b;
                }
            }

            // 复制到所有低位与 code 相同的槽位
            let step = 1u32 << (k as i32 - w);
            let mut slot = code >> w;
            while slot < table_size {
                arena.entries[current + slot as usize] = entry;
                slot += step;
            }

            // 反向递增 k 位码字
            let mut bit = 1u32 << (k - 1);
            while code & bit != 0 {
                code ^= bit;
                bit >>= 1;
            }
            code ^= bit;

            // 当前子表填满时回退
            while level > 0 && (code & ((1u32 << w) - 1)) != saved[level as usize] {
                level -= 1;
                w -= l;
            }
        }
    }

    let tree = Tree {
        root,
        bits: width as u8,
    };
    if dummies != 0 && max_len != 1 {
        Ok(Build::Incomplete(tree))
    } else {
        Ok(Build::Complete(tree))
    }
}

/// 固定 Huffman 表（块类型 1）
#[derive(Debug)]
pub struct FixedTables {
    pub arena: HuffmanArena,
    pub literal: Tree,
    pub distance: Tree,
}

/// 固定表，首次使用时构造一次
pub fn fixed_tables() -> &'static FixedTables {
    static FIXED: OnceLock<FixedTables> = OnceLock::new();
    FIXED.get_or_init(build_fixed_tables)
}

fn build_fixed_tables() -> FixedTables {
    let mut lengths = [0u8; 288];
    lengths[..144].fill(8);
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths[280..].fill(8);

    let mut arena = HuffmanArena::new();
    let literal = match build(&lengths, 257, &LENGTH_BASE, &LENGTH_EXTRA, 9, &mut arena) {
        Ok(Build::Complete(tree)) => tree,
        other => unreachable!("fixed literal/length table: {other:?}"),
    };
    // 距离码 30、31 不存在，表按 30 个 5 位码构造，剩余两个槽位为无效项
    let distance = match build(&[5u8; 30], 0, &DIST_BASE, &DIST_EXTRA, 5, &mut arena) {
        Ok(Build::Incomplete(tree)) => tree,
        other => unreachable!("fixed distance table: {other:?}"),
    };
    FixedTables {
        arena,
        literal,
        distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 用查找表解码一个按 LSB 优先给出的比特串，返回 (表项, 总位数)
    fn lookup(entries: &[Entry], tree: Tree, mut bits: u32) -> (Entry, u32) {
        let mut e = entries[tree.root + (bits & tree.mask()) as usize];
        let mut used = 0;
        while let Op::SubTable { bits: sub } = e.op {
            bits >>= e.bits;
            used += e.bits as u32;
            e = entries[e.value as usize + (bits & ((1 << sub) - 1)) as usize];
        }
        (e, used + e.bits as u32)
    }

    fn reverse(code: u32, len: u32) -> u32 {
        let mut out = 0;
        for i in 0..len {
            if code & (1 << i) != 0 {
                out |= 1 << (len - 1 - i);
            }
        }
        out
    }

    #[test]
    fn test_oversubscribed_three_length_one_codes() {
        let mut arena = HuffmanArena::new();
        let result = build(&[1, 1, 1], 19, &[], &[], 7, &mut arena);
        assert_eq!(result, Err(HuffmanError::Oversubscribed));
    }

    #[test]
    fn test_empty_table() {
        let mut arena = HuffmanArena::new();
        assert_eq!(build(&[0; 30], 0, &DIST_BASE, &DIST_EXTRA, 6, &mut arena), Ok(Build::Empty));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_single_length_one_code_is_accepted() {
        let mut arena = HuffmanArena::new();
        let mut lengths = [0u8; 30];
        lengths[0] = 1;
        let tree = match build(&lengths, 0, &DIST_BASE, &DIST_EXTRA, 6, &mut arena) {
            Ok(Build::Complete(tree)) => tree,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(tree.bits, 1);
        let entries = arena.entries();
        assert_eq!(entries[tree.root].op, Op::Base { extra: 0 });
        assert_eq!(entries[tree.root].value, 1);
        assert_eq!(entries[tree.root + 1].op, Op::Invalid);
    }

    #[test]
    fn test_incomplete_reported() {
        let mut arena = HuffmanArena::new();
        let result = build(&[2, 2, 2], 19, &[], &[], 7, &mut arena);
        assert!(matches!(result, Ok(Build::Incomplete(_))));
    }

    #[test]
    fn test_canonical_codes_rfc_example() {
        // RFC 1951 3.2.2: ABCDEFGH 的码长 (3, 3, 3, 3, 3, 2, 4, 4)
        let lengths = [3u8, 3, 3, 3, 3, 2, 4, 4];
        let expected = [0b010u32, 0b011, 0b100, 0b101, 0b110, 0b00, 0b1110, 0b1111];
        let mut arena = HuffmanArena::new();
        let tree = match build(&lengths, 19, &[], &[], 7, &mut arena) {
            Ok(Build::Complete(tree)) => tree,
            other => panic!("unexpected {other:?}"),
        };
        for (sym, (&len, &code)) in lengths.iter().zip(expected.iter()).enumerate() {
            let (entry, used) = lookup(arena.entries(), tree, reverse(code, len as u32));
            assert_eq!(entry.op, Op::Literal);
            assert_eq!(entry.value as usize, sym);
            assert_eq!(used, len as u32);
        }
    }

    #[test]
    fn test_subtables_for_long_codes() {
        // 码长 1..=15 各一个，再补一个 15 位码使码空间完整
        let mut lengths: Vec<u8> = (1..=15).collect();
        lengths.push(15);
        let mut arena = HuffmanArena::new();
        let tree = match build(&lengths, 257, &LENGTH_BASE, &LENGTH_EXTRA, 9, &mut arena) {
            Ok(Build::Complete(tree)) => tree,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(tree.bits, 9);
        assert!(arena.len() > 1 << 9);

        // 所有槽位都被填充
        assert!(arena.entries().iter().all(|e| e.op != Op::Invalid));

        // 15 位的两个码字是全 1 前缀后的 0 和 1
        let code_a = reverse(0b111_1111_1111_1110, 15);
        let code_b = reverse(0b111_1111_1111_1111, 15);
        let (a, used_a) = lookup(arena.entries(), tree, code_a);
        let (b, used_b) = lookup(arena.entries(), tree, code_b);
        assert_eq!((a.value, used_a), (14, 15));
        assert_eq!((b.value, used_b), (15, 15));
    }

    #[test]
    fn test_fixed_tables() {
        let fixed = fixed_tables();
        let entries = fixed.arena.entries();
        assert_eq!(fixed.literal.bits, 9);
        assert_eq!(fixed.distance.bits, 5);

        // 块结束符 256 的固定码为 0000000
        let (eob, used) = lookup(entries, fixed.literal, 0);
        assert_eq!((eob.op, used), (Op::EndOfBlock, 7));

        // 'A' = 0x41 -> 0x30 + 0x41 (8 位)
        let (lit, used) = lookup(entries, fixed.literal, reverse(0x30 + 0x41, 8));
        assert_eq!((lit.op, lit.value, used), (Op::Literal, 0x41, 8));

        // 长度码 285 -> 11000101，基础值 258
        let (len, _) = lookup(entries, fixed.literal, reverse(0b1100_0101, 8));
        assert_eq!((len.op, len.value), (Op::Base { extra: 0 }, 258));

        // 长度码 286/287 无效
        let (bad, _) = lookup(entries, fixed.literal, reverse(0b1100_0110, 8));
        assert_eq!(bad.op, Op::Invalid);

        // 距离码 30、31 无效
        let (d30, _) = lookup(entries, fixed.distance, reverse(30, 5));
        assert_eq!(d30.op, Op::Invalid);
        let (d29, _) = lookup(entries, fixed.distance, reverse(29, 5));
        assert_eq!((d29.op, d29.value), (Op::Base { extra: 13 }, 24577));
    }

    #[test]
    fn test_table_overflow_maps_to_error() {
        let mut arena = HuffmanArena::new();
        arena.alloc(MAX_TABLE_ENTRIES - 4).unwrap();
        let lengths = [3u8; 8];
        assert_eq!(
            build(&lengths, 19, &[], &[], 7, &mut arena),
            Err(HuffmanError::TableOverflow)
        );
    }
}
