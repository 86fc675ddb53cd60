//! 位流读取
//!
//! DEFLATE 按 LSB 优先打包比特。[`BitReader`] 借用调用方本次提供的输入切片，
//! 未消耗完的比特通过 [`BitState`] 保存在会话里，下一次调用再恢复，
//! 这样一个码字可以跨越两次调用的输入边界。

/// 两次调用之间保留的位缓冲区
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitState {
    bit_buf: u64,
    num_bits: u32,
}

impl BitState {
    /// 缓冲区中的有效位数
    pub fn buffered_bits(&self) -> u32 {
        self.num_bits
    }

    /// 取出缓冲区中剩余的整字节，调用前应已对齐
    pub fn drain_bytes(&mut self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity((self.num_bits / 8) as usize);
        while self.num_bits >= 8 {
            bytes.push(self.bit_buf as u8);
            self.bit_buf >>= 8;
            self.num_bits -= 8;
        }
        bytes
    }
}

/// 位流读取器
#[derive(Debug)]
pub struct BitReader<'a> {
    /// 本次调用的输入
    data: &'a [u8],
    /// 下一个未读入位缓冲区的字节
    pos: usize,
    /// 位缓冲区（低位先出）
    bit_buf: u64,
    /// 缓冲区中的有效位数
    num_bits: u32,
}

impl<'a> BitReader<'a> {
    /// 从空的位缓冲区开始读取
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::resume(data, BitState::default())
    }

    /// 在保存的位缓冲区基础上继续读取新的输入
    pub fn resume(data: &'a [u8], state: BitState) -> Self {
        Self {
            data,
            pos: 0,
            bit_buf: state.bit_buf,
            num_bits: state.num_bits,
        }
    }

    /// 导出位缓冲区，供下一次调用恢复
    pub fn suspend(&self) -> BitState {
        BitState {
            bit_buf: self.bit_buf,
            num_bits: self.num_bits,
        }
    }

    /// 确保缓冲区至少有 `n` 位（n <= 32）
    ///
    /// 输入耗尽时返回 `false`，已读入的字节保留在缓冲区里。
    #[inline]
    pub fn need_bits(&mut self, n: u32) -> bool {
        while self.num_bits < n {
            match self.data.get(self.pos) {
                Some(&byte) => {
                    self.bit_buf |= (byte as u64) << self.num_bits;
                    self.num_bits += 8;
                    self.pos += 1;
                }
                None => return false,
            }
        }
        true
    }

    /// 查看低 `n` 位，调用前必须已经 `need_bits(n)`
    #[inline]
    pub fn peek_bits(&self, n: u32) -> u32 {
        (self.bit_buf & ((1u64 << n) - 1)) as u32
    }

    /// 丢弃低 `n` 位
    #[inline]
    pub fn consume(&mut self, n: u32) {
        debug_assert!(n <= self.num_bits);
        self.bit_buf >>= n;
        self.num_bits -= n;
    }

    /// 读取 n 位 (小端序)，输入不足时返回 `None` 且不消耗任何比特
    pub fn read_bits(&mut self, n: u32) -> Option<u32> {
        if !self.need_bits(n) {
            return None;
        }
        let value = self.peek_bits(n);
        self.consume(n);
        Some(value)
    }

    /// 读取一个字节，要求当前已对齐
    pub fn read_byte(&mut self) -> Option<u8> {
        self.read_bits(8).map(|b| b as u8)
    }

    /// 对齐到字节边界
    pub fn align_to_byte(&mut self) {
        let drop = self.num_bits & 7;
        self.consume(drop);
    }

    /// 对齐状态下可立即取得的整字节数（位缓冲区 + 剩余输入）
    pub fn bytes_available(&self) -> usize {
        (self.num_bits / 8) as usize + self.remaining()
    }

    /// 对齐状态下复制字节到 `dst`，先取位缓冲区再直接取输入
    ///
    /// 返回实际复制的字节数。
    pub fn read_bytes_into(&mut self, dst: &mut [u8]) -> usize {
        debug_assert_eq!(self.num_bits & 7, 0);
        let mut written = 0;
        while written < dst.len() && self.num_bits >= 8 {
            dst[written] = self.peek_bits(8) as u8;
            self.consume(8);
            written += 1;
        }
        let direct = (dst.len() - written).min(self.remaining());
        dst[written..written + direct].copy_from_slice(&self.data[self.pos..self.pos + direct]);
        self.pos += direct;
        written + direct
    }

    /// 把位缓冲区中多读的整字节退回输入
    ///
    /// 只能退回本次调用读入的字节；更早的字节继续留在缓冲区里。
    pub fn return_unused_bytes(&mut self) {
        let give_back = ((self.num_bits / 8) as usize).min(self.pos);
        self.pos -= give_back;
        self.num_bits -= (give_back * 8) as u32;
        self.bit_buf &= (1u64 << self.num_bits) - 1;
    }

    /// 已从本次输入中取走的字节数
    pub fn position(&self) -> usize {
        self.pos
    }

    /// 本次输入中尚未读入的字节数
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// 缓冲区中的有效位数
    pub fn buffered_bits(&self) -> u32 {
        self.num_bits
    }

    /// 当前字节内已消耗的比特偏移（0..=7）
    pub fn bit_offset(&self) -> u32 {
        (8 - self.num_bits % 8) % 8
    }
}

/// 位写入器，仅用于在单元测试里手工构造比特流
#[cfg(test)]
pub(crate) struct BitWriter {
    data: Vec<u8>,
    bit_buf: u32,
    num_bits: u32,
}

#[cfg(test)]
impl BitWriter {
    pub(crate) fn new() -> Self {
        Self {
            data: Vec::new(),
            bit_buf: 0,
            num_bits: 0,
        }
    }

    /// 写入 n 位 (小端序)
    pub(crate) fn put(&mut self, value: u32, n: u32) {
        self.bit_buf |= value << self.num_bits;
        self.num_bits += n;
        while self.num_bits >= 8 {
            self.data.push(self.bit_buf as u8);
            self.bit_buf >>= 8;
            self.num_bits -= 8;
        }
    }

    /// Huffman 码字按高位在前写入
    pub(crate) fn code(&mut self, code: u32, len: u32) {
        for i in (0..len).rev() {
            self.put((code >> i) & 1, 1);
        }
    }

    /// 固定 Huffman 表中的字面字节
    pub(crate) fn fixed_literal(&mut self, byte: u8) {
        if byte < 144 {
            self.code(0x30 + byte as u32, 8);
        } else {
            self.code(0x190 + byte as u32 - 144, 9);
        }
    }

    pub(crate) fn into_bytes(mut self) -> Vec<u8> {
        if self.num_bits > 0 {
            self.data.push(self.bit_buf as u8);
        }
        self.data
    }
}
