//! 环形输出窗口
//!
//! 解码出的字节先写入窗口，再由 [`Window::flush`] 排空到调用方的输出缓冲区。
//! 窗口同时充当回溯引用的历史数据。写游标永远不会追上读游标：
//! 没有空间时解码器挂起，等调用方提供新的输出空间。

use std::collections::TryReserveError;

use super::Checksum;

/// 调用方本次提供的输出缓冲区
#[derive(Debug)]
pub struct OutputBuffer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> OutputBuffer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// 已写入的字节数
    pub fn written(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_full(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn put(&mut self, data: &[u8]) {
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }
}

/// 环形窗口
#[derive(Debug, Clone)]
pub struct Window {
    buf: Vec<u8>,
    /// 下一个待排空的字节
    read: usize,
    /// 下一个写入位置，可能等于 `buf.len()`，下次写入前回绕
    write: usize,
    checksum: Checksum,
    check: u32,
    /// 可被回溯引用的历史字节数，上限为窗口大小
    history: usize,
}

impl Window {
    /// 分配 `1 << window_bits` 字节的窗口
    pub fn new(window_bits: u8, checksum: Checksum) -> Result<Self, TryReserveError> {
        let size = 1usize << window_bits;
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)?;
        buf.resize(size, 0);
        Ok(Self {
            buf,
            read: 0,
            write: 0,
            checksum,
            check: checksum.init(),
            history: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// 清空游标与校验值，保留已分配的缓冲区
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
        self.history = 0;
        self.check = self.checksum.init();
    }

    /// 已排空字节的校验值
    pub fn check(&self) -> u32 {
        self.check
    }

    /// 写游标之后连续可写的字节数
    #[inline]
    pub fn avail(&self) -> usize {
        if self.write < self.read {
            self.read - self.write - 1
        } else {
            self.buf.len() - self.write
        }
    }

    /// 所有已写入的字节都已排空
    pub fn is_drained(&self) -> bool {
        self.read == self.write
    }

    fn wrap(&mut self) {
        if self.write == self.buf.len() && self.read != 0 {
            self.write = 0;
        }
    }

    /// 保证至少有一个字节可写：先尝试回绕，再排空到 `out`
    ///
    /// 仍然没有空间时返回 `false`，调用方应挂起。
    pub fn need_out(&mut self, out: &mut OutputBuffer<'_>) -> bool {
        if self.avail() == 0 {
            self.wrap();
            if self.avail() == 0 {
                self.flush(out);
                self.wrap();
                if self.avail() == 0 {
                    return false;
                }
            }
        }
        true
    }

    /// 写入一个字节，调用前必须 `avail() > 0`
    #[inline]
    pub fn push(&mut self, byte: u8) {
        self.buf[self.write] = byte;
        self.write += 1;
        if self.history < self.buf.len() {
            self.history += 1;
        }
    }

    /// 距离 `dist` 是否落在已有历史之内
    #[inline]
    pub fn distance_ok(&self, dist: usize) -> bool {
        dist != 0 && dist <= self.history
    }

    /// 从 `dist` 字节之前复制 `len` 字节到写游标
    ///
    /// 调用前必须 `len <= avail()` 且 `distance_ok(dist)`；源区间可以跨越窗口末尾回绕。
    pub fn copy_match(&mut self, dist: usize, len: usize) {
        let size = self.buf.len();
        let mut src = (self.write + size - dist) % size;
        if src < self.write && src + len <= self.write {
            self.buf.copy_within(src..src + len, self.write);
            self.write += len;
        } else {
            for _ in 0..len {
                self.buf[self.write] = self.buf[src];
                self.write += 1;
                src += 1;
                if src == size {
                    src = 0;
                }
            }
        }
        self.history = (self.history + len).min(size);
    }

    /// 写游标处的连续可写区域，写完后用 [`Window::commit`] 提交
    pub fn spare_mut(&mut self, n: usize) -> &mut [u8] {
        &mut self.buf[self.write..self.write + n]
    }

    pub fn commit(&mut self, n: usize) {
        self.write += n;
        self.history = (self.history + n).min(self.buf.len());
    }

    /// 用预设字典填充历史，超出窗口的部分只保留末尾
    pub fn prime(&mut self, dict: &[u8]) {
        let keep = dict.len().min(self.buf.len() - 1);
        self.buf[..keep].copy_from_slice(&dict[dict.len() - keep..]);
        self.read = keep;
        self.write = keep;
        self.history = keep;
    }

    /// 把窗口中的数据排空到 `out`，返回复制的字节数
    ///
    /// 先复制读游标到写游标（或窗口末尾），到达末尾则回绕再复制剩余部分。
    /// 校验函数只覆盖实际交给调用方的字节。
    pub fn flush(&mut self, out: &mut OutputBuffer<'_>) -> usize {
        let mut copied = 0;
        let mut q = self.read;

        let end = if q <= self.write { self.write } else { self.buf.len() };
        let n = (end - q).min(out.remaining());
        copied += self.drain(q, n, out);
        q += n;

        if q == self.buf.len() {
            q = 0;
            if self.write == self.buf.len() {
                self.write = 0;
            }
            let n = (self.write - q).min(out.remaining());
            copied += self.drain(q, n, out);
            q += n;
        }

        self.read = q;
        copied
    }

    fn drain(&mut self, from: usize, n: usize, out: &mut OutputBuffer<'_>) -> usize {
        let data = &self.buf[from..from + n];
        self.check = self.checksum.update(self.check, data);
        out.put(data);
        n
    }
}
