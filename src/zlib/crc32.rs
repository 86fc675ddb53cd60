//! CRC-32 (IEEE 802.3, 反射多项式 0xEDB88320)
//!
//! ZIP 条目与 gzip 尾部使用同一个 CRC。

/// 反射多项式
const POLY: u32 = 0xEDB8_8320;

/// 编译期生成的 256 项查找表
static CRC_TABLE: [u32; 256] = make_table();

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { POLY ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// 计算 CRC-32
///
/// `crc` 为上一次的返回值（首次传 0），进入和离开时各取反一次，
/// 因此可以分段调用。空切片返回 `crc` 本身。
pub fn crc32(crc: u32, buf: &[u8]) -> u32 {
    if buf.is_empty() {
        return crc;
    }
    let mut c = crc ^ 0xFFFF_FFFF;
    let mut chunks = buf.chunks_exact(8);
    for chunk in &mut chunks {
        for &byte in chunk {
            c = CRC_TABLE[((c ^ byte as u32) & 0xFF) as usize] ^ (c >> 8);
        }
    }
    for &byte in chunks.remainder() {
        c = CRC_TABLE[((c ^ byte as u32) & 0xFF) as usize] ^ (c >> 8);
    }
    c ^ 0xFFFF_FFFF
}

/// 增量 CRC-32 计算器
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc32 {
    value: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.value = crc32(self.value, data);
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }
}
