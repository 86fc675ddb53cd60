// 公共测试辅助函数
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use tempfile::TempDir;

use rzlib::zlib::{adler32, crc32, DIST_BASE, DIST_EXTRA, LENGTH_BASE, LENGTH_EXTRA};

/// 2024-03-15 13:45:30
pub const FIXTURE_DOS_DATE: u32 = ((((2024 - 1980) << 9) | (3 << 5) | 15) << 16)
    | ((13 << 11) | (45 << 5) | 15);

/// 创建临时测试目录
pub fn test_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

/// 裸 DEFLATE 压缩（参考实现）
pub fn deflate_raw(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// zlib 压缩（参考实现，32 KiB 窗口）
pub fn zlib_compress(data: &[u8], level: u32) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// gzip 压缩（参考实现）
pub fn gzip_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// 可重复的测试文本，带大量远距离重复
pub fn sample_text(len: usize) -> Vec<u8> {
    const WORDS: [&str; 12] = [
        "retro", "arch ", "inflate ", "window ", "huffman ", "zip\n", "block ", "stored ",
        "dynamic ", "fixed ", "crc32 ", "adler ",
    ];
    let mut seed: u32 = 0x1234_5678;
    let mut out = Vec::with_capacity(len + 16);
    while out.len() < len {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let word = WORDS[(seed >> 16) as usize % WORDS.len()];
        out.extend_from_slice(word.as_bytes());
        if seed & 0x700 == 0 {
            out.push((seed >> 24) as u8);
        }
    }
    out.truncate(len);
    out
}

/// LSB 优先的位写入器
pub struct BitSink {
    out: Vec<u8>,
    acc: u64,
    nbits: u32,
}

impl BitSink {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            acc: 0,
            nbits: 0,
        }
    }

    pub fn put(&mut self, value: u32, bits: u32) {
        self.acc |= (value as u64) << self.nbits;
        self.nbits += bits;
        while self.nbits >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.nbits -= 8;
        }
    }

    /// Huffman 码字按 MSB 优先写入
    pub fn put_code(&mut self, code: u32, bits: u32) {
        let mut reversed = 0;
        for i in 0..bits {
            reversed |= ((code >> i) & 1) << (bits - 1 - i);
        }
        self.put(reversed, bits);
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.out.push(self.acc as u8);
        }
        self.out
    }
}

fn fixed_literal(sink: &mut BitSink, symbol: u32) {
    match symbol {
        0..=143 => sink.put_code(0x30 + symbol, 8),
        144..=255 => sink.put_code(0x190 + symbol - 144, 9),
        256..=279 => sink.put_code(symbol - 256, 7),
        _ => sink.put_code(0xC0 + symbol - 280, 8),
    }
}

fn fixed_match(sink: &mut BitSink, length: usize, distance: usize) {
    let code = LENGTH_BASE
        .iter()
        .rposition(|&base| base as usize <= length)
        .unwrap();
    fixed_literal(sink, 257 + code as u32);
    sink.put(
        (length - LENGTH_BASE[code] as usize) as u32,
        LENGTH_EXTRA[code] as u32,
    );

    let dcode = DIST_BASE
        .iter()
        .rposition(|&base| base as usize <= distance)
        .unwrap();
    sink.put_code(dcode as u32, 5);
    sink.put(
        (distance - DIST_BASE[dcode] as usize) as u32,
        DIST_EXTRA[dcode] as u32,
    );
}

/// 单个固定 Huffman 块的裸 DEFLATE 编码，回溯距离不超过 `max_distance`
///
/// flate2 不能指定小窗口，小窗口的测试流由它生成。
pub fn deflate_fixed(data: &[u8], max_distance: usize) -> Vec<u8> {
    const MIN_MATCH: usize = 3;
    const MAX_MATCH: usize = 258;
    const MAX_CHAIN: usize = 64;

    let mut sink = BitSink::new();
    sink.put(1, 1);
    sink.put(1, 2);

    let mut heads: HashMap<[u8; 3], Vec<usize>> = HashMap::new();
    let mut i = 0;
    while i < data.len() {
        let mut best = (0, 0);
        if i + MIN_MATCH <= data.len() {
            let key = [data[i], data[i + 1], data[i + 2]];
            if let Some(chain) = heads.get(&key) {
                for &j in chain.iter().rev().take(MAX_CHAIN) {
                    let distance = i - j;
                    if distance > max_distance {
                        break;
                    }
                    let limit = MAX_MATCH.min(data.len() - i);
                    let len = (0..limit).take_while(|&k| data[j + k] == data[i + k]).count();
                    if len > best.0 {
                        best = (len, distance);
                    }
                }
            }
        }

        let step = if best.0 >= MIN_MATCH {
            fixed_match(&mut sink, best.0, best.1);
            best.0
        } else {
            fixed_literal(&mut sink, data[i] as u32);
            1
        };
        for p in i..i + step {
            if p + MIN_MATCH <= data.len() {
                heads
                    .entry([data[p], data[p + 1], data[p + 2]])
                    .or_default()
                    .push(p);
            }
        }
        i += step;
    }

    fixed_literal(&mut sink, 256);
    sink.finish()
}

/// 用 `window_bits` 位窗口的 zlib 流封装
pub fn zlib_wrap(window_bits: u8, raw: &[u8], data: &[u8]) -> Vec<u8> {
    let cmf = ((window_bits - 8) << 4) | 8;
    let flg = (31 - (cmf as u16 * 256) % 31) % 31;
    let mut out = vec![cmf, flg as u8];
    out.extend_from_slice(raw);
    out.extend_from_slice(&adler32(1, data).to_be_bytes());
    out
}

/// 测试用 ZIP 条目
#[derive(Debug, Clone)]
pub struct TestEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub method: u16,
    pub flag: u16,
    pub dos_date: u32,
    /// 同时改写中央目录和本地头中的 CRC
    pub crc_xor: u32,
    pub local_extra: Vec<u8>,
    /// 覆盖压缩后的数据
    pub compressed: Option<Vec<u8>>,
    /// 只改写本地头的字段，中央目录保持正确
    pub local: LocalOverride,
    /// 置通用标志位 3，本地头的 CRC 与大小清零，数据后附数据描述符
    pub data_descriptor: bool,
}

/// 本地头字段覆盖
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOverride {
    pub method: Option<u16>,
    pub crc: Option<u32>,
    pub compressed_size: Option<u32>,
    pub uncompressed_size: Option<u32>,
}

impl TestEntry {
    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            method: 0,
            flag: 0,
            dos_date: FIXTURE_DOS_DATE,
            crc_xor: 0,
            local_extra: Vec::new(),
            compressed: None,
            local: LocalOverride::default(),
            data_descriptor: false,
        }
    }

    pub fn deflated(name: &str, data: &[u8]) -> Self {
        Self {
            method: 8,
            ..Self::stored(name, data)
        }
    }

    pub fn dir(name: &str) -> Self {
        Self::stored(name, b"")
    }

    pub fn crc_xor(mut self, mask: u32) -> Self {
        self.crc_xor = mask;
        self
    }

    pub fn flag(mut self, flag: u16) -> Self {
        self.flag = flag;
        self
    }

    pub fn method(mut self, method: u16) -> Self {
        self.method = method;
        self
    }

    pub fn local_extra(mut self, extra: &[u8]) -> Self {
        self.local_extra = extra.to_vec();
        self
    }

    pub fn compressed(mut self, compressed: Vec<u8>) -> Self {
        self.compressed = Some(compressed);
        self
    }

    pub fn local(mut self, local: LocalOverride) -> Self {
        self.local = local;
        self
    }

    pub fn data_descriptor(mut self) -> Self {
        self.data_descriptor = true;
        self
    }

    fn payload(&self) -> Vec<u8> {
        if let Some(data) = &self.compressed {
            return data.clone();
        }
        match self.method {
            8 => deflate_raw(&self.data),
            _ => self.data.clone(),
        }
    }
}

/// 内存中的 ZIP 构造器
#[derive(Debug, Default)]
pub struct ZipFixtureBuilder {
    prefix: Vec<u8>,
    entries: Vec<TestEntry>,
    comment: Vec<u8>,
    trailing: Vec<u8>,
    zip64: bool,
}

impl ZipFixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 归档前附加的数据（自解压程序）
    pub fn prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn entry(mut self, entry: TestEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// EOCD 之后的数据，不计入注释长度
    pub fn trailing(mut self, trailing: &[u8]) -> Self {
        self.trailing = trailing.to_vec();
        self
    }

    /// 写 ZIP64 EOCD 记录与定位器，EOCD 中的计数与偏移填饱和值
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.prefix.clone();
        let base = out.len();
        let mut central = Vec::new();

        for entry in &self.entries {
            let payload = entry.payload();
            let crc = crc32(0, &entry.data) ^ entry.crc_xor;
            let offset = (out.len() - base) as u32;
            let flag = if entry.data_descriptor {
                entry.flag | 0x0008
            } else {
                entry.flag
            };
            let (local_crc, local_csize, local_usize) = if entry.data_descriptor {
                (0, 0, 0)
            } else {
                (crc, payload.len() as u32, entry.data.len() as u32)
            };
            let local = entry.local;

            out.extend_from_slice(&0x0403_4B50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&flag.to_le_bytes());
            out.extend_from_slice(&local.method.unwrap_or(entry.method).to_le_bytes());
            out.extend_from_slice(&(entry.dos_date as u16).to_le_bytes());
            out.extend_from_slice(&((entry.dos_date >> 16) as u16).to_le_bytes());
            out.extend_from_slice(&local.crc.unwrap_or(local_crc).to_le_bytes());
            out.extend_from_slice(&local.compressed_size.unwrap_or(local_csize).to_le_bytes());
            out.extend_from_slice(&local.uncompressed_size.unwrap_or(local_usize).to_le_bytes());
            out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&(entry.local_extra.len() as u16).to_le_bytes());
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&entry.local_extra);
            out.extend_from_slice(&payload);
            if entry.data_descriptor {
                out.extend_from_slice(&0x0807_4B50u32.to_le_bytes());
                out.extend_from_slice(&crc.to_le_bytes());
                out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            }

            central.extend_from_slice(&0x0201_4B50u32.to_le_bytes());
            central.extend_from_slice(&0x031Eu16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&flag.to_le_bytes());
            central.extend_from_slice(&entry.method.to_le_bytes());
            central.extend_from_slice(&(entry.dos_date as u16).to_le_bytes());
            central.extend_from_slice(&((entry.dos_date >> 16) as u16).to_le_bytes());
            central.extend_from_slice(&crc.to_le_bytes());
            central.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            central.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u32.to_le_bytes());
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(entry.name.as_bytes());
        }

        let cd_offset = (out.len() - base) as u32;
        out.extend_from_slice(&central);

        let (count, cd_size, cd_start) = if self.zip64 {
            let record_offset = (out.len() - base) as u64;
            out.extend_from_slice(&0x0606_4B50u32.to_le_bytes());
            out.extend_from_slice(&44u64.to_le_bytes());
            out.extend_from_slice(&45u16.to_le_bytes());
            out.extend_from_slice(&45u16.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
            out.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
            out.extend_from_slice(&(central.len() as u64).to_le_bytes());
            out.extend_from_slice(&(cd_offset as u64).to_le_bytes());

            out.extend_from_slice(&0x0706_4B50u32.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&record_offset.to_le_bytes());
            out.extend_from_slice(&1u32.to_le_bytes());
            (0xFFFF, 0xFFFF_FFFF, 0xFFFF_FFFF)
        } else {
            (self.entries.len() as u16, central.len() as u32, cd_offset)
        };

        out.extend_from_slice(&0x0605_4B50u32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_start.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out.extend_from_slice(&self.trailing);
        out
    }

    /// 写到临时目录中的 `name`
    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

/// 单条目 "a.txt" = "RETROARCH"（DEFLATE）
pub fn retroarch_zip(crc_xor: u32) -> Vec<u8> {
    ZipFixtureBuilder::new()
        .entry(TestEntry::deflated("a.txt", b"RETROARCH").crc_xor(crc_xor))
        .build()
}

/// 标准化临时路径，用于快照测试
pub fn normalize_temp_paths(output: String) -> String {
    let output = output.replace('\\', "/");
    let re = regex::Regex::new(r"[^'\s]*\.tmp[a-zA-Z0-9]+").unwrap();
    re.replace_all(&output, "<tempdir>").to_string()
}
