//! zlib 解压核心 - INFLATE/CRC32/Adler32
//!
//! 这个模块实现 RFC 1951 DEFLATE 解码器以及 RFC 1950 zlib 包装层，
//! 整个解码过程可以在任意输入/输出边界处挂起并恢复。
//!
//! 层次结构（自底向上）：
//!
//! - [`crc32`] / [`adler32`]: 校验和
//! - [`bitstream`]: 位游标
//! - [`huffman`]: 多级 Huffman 查找表构造
//! - [`window`]: 环形输出窗口
//! - [`codes`]: 符号解码（含快速路径）
//! - [`blocks`]: 块状态机
//! - [`inflate`]: 会话、zlib 头尾、一次性解压辅助函数

pub mod bitstream;
pub mod blocks;
pub mod codes;
pub mod crc32;
pub mod huffman;
pub mod inflate;
pub mod window;

pub use bitstream::BitReader;
pub use crc32::{crc32, Crc32};
pub use huffman::{HuffmanError, LENGTH_BASE, LENGTH_EXTRA, DIST_BASE, DIST_EXTRA};
pub use inflate::{
    decompress_raw, decompress_to_buffer, uncompress, ErrorClass, InflateError, InflateOptions,
    InflateResult, InflateStatus, Inflater, Wrapper,
};

/// Adler32 模数（小于 2^16 的最大素数）
const ADLER_BASE: u32 = 65521;

/// 不取模可连续累加的最大字节数，满足 255*n*(n+1)/2 + (n+1)*(BASE-1) <= 2^32-1
const ADLER_NMAX: usize = 5552;

/// Adler32 初始值
pub const ADLER32_INIT: u32 = 1;

/// Adler32 校验和计算
///
/// `adler` 为上一次的累加值（首次调用传入 [`ADLER32_INIT`]）。
pub fn adler32(adler: u32, data: &[u8]) -> u32 {
    let mut s1 = adler & 0xFFFF;
    let mut s2 = (adler >> 16) & 0xFFFF;

    for block in data.chunks(ADLER_NMAX) {
        let mut sixteen = block.chunks_exact(16);
        for chunk in &mut sixteen {
            for &byte in chunk {
                s1 += byte as u32;
                s2 += s1;
            }
        }
        for &byte in sixteen.remainder() {
            s1 += byte as u32;
            s2 += s1;
        }
        s1 %= ADLER_BASE;
        s2 %= ADLER_BASE;
    }

    (s2 << 16) | s1
}

/// 输出窗口在排空时使用的校验函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Checksum {
    /// 不计算（ZIP 内嵌的裸 DEFLATE 由容器层自行计算 CRC）
    #[default]
    None,
    /// zlib 包装层
    Adler32,
    /// gzip 包装层
    Crc32,
}

impl Checksum {
    /// 该校验函数的初始累加值
    pub fn init(self) -> u32 {
        match self {
            Checksum::None => 0,
            Checksum::Adler32 => ADLER32_INIT,
            Checksum::Crc32 => 0,
        }
    }

    /// 把 `data` 计入累加值
    pub fn update(self, acc: u32, data: &[u8]) -> u32 {
        match self {
            Checksum::None => acc,
            Checksum::Adler32 => adler32(acc, data),
            Checksum::Crc32 => crc32(acc, data),
        }
    }
}
