//! gzip (RFC 1952) decoding on top of the raw inflater.
//!
//! Framing follows classic `gzread`: input without the gzip magic is passed
//! through unchanged, concatenated members are decoded back to back, and
//! anything after the last member that is not another gzip header is passed
//! through as well.

use std::io::{self, Read};

use tracing::{debug, trace};

use crate::error::{Result, ZipError};
use crate::zlib::{Checksum, InflateError, InflateOptions, InflateStatus, Inflater};

const GZ_MAGIC: [u8; 2] = [0x1F, 0x8B];
const METHOD_DEFLATED: u8 = 8;

const FLAG_TEXT: u8 = 0x01;
const FLAG_HEAD_CRC: u8 = 0x02;
const FLAG_EXTRA: u8 = 0x04;
const FLAG_NAME: u8 = 0x08;
const FLAG_COMMENT: u8 = 0x10;
const FLAG_RESERVED: u8 = 0xE0;

const INPUT_BUFFER_SIZE: usize = 16384;

/// Header of the most recently started gzip member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GzHeader {
    /// FTEXT hint
    pub text: bool,
    /// Modification time, seconds since the Unix epoch (0 when unknown)
    pub mtime: u32,
    pub xfl: u8,
    pub os: u8,
    pub extra: Option<Vec<u8>>,
    pub name: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Header,
    Body,
    PassThrough,
    Finished,
    Failed(InflateError),
}

/// Streaming gzip decoder over any [`Read`].
#[derive(Debug)]
pub struct GzDecoder<R> {
    inner: R,
    /// Buffered input; `buf[pos..]` has not been consumed yet
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    inflater: Inflater,
    state: State,
    header: Option<GzHeader>,
    members: usize,
}

impl<R: Read> GzDecoder<R> {
    pub fn new(inner: R) -> Result<Self> {
        let inflater = Inflater::new(InflateOptions::raw().checksum(Checksum::Crc32))?;
        Ok(Self {
            inner,
            buf: Vec::new(),
            pos: 0,
            eof: false,
            inflater,
            state: State::Header,
            header: None,
            members: 0,
        })
    }

    /// Header of the current member, once it has been parsed
    pub fn header(&self) -> Option<&GzHeader> {
        self.header.as_ref()
    }

    /// Number of members fully decoded and verified so far
    pub fn members(&self) -> usize {
        self.members
    }

    /// Input is being copied through without decoding
    pub fn is_passthrough(&self) -> bool {
        matches!(self.state, State::PassThrough)
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn refill(&mut self) -> io::Result<usize> {
        let start = self.buf.len();
        self.buf.resize(start + INPUT_BUFFER_SIZE, 0);
        let n = loop {
            match self.inner.read(&mut self.buf[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e);
                }
            }
        };
        self.buf.truncate(start + n);
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// Buffer at least `n` unread bytes unless the source ends first
    fn fill_at_least(&mut self, n: usize) -> io::Result<usize> {
        if self.buf.len() - self.pos < n {
            self.buf.drain(..self.pos);
            self.pos = 0;
            while self.buf.len() < n && !self.eof {
                self.refill()?;
            }
        }
        Ok(self.buf.len() - self.pos)
    }

    fn header_byte(&mut self) -> io::Result<u8> {
        if self.fill_at_least(1)? == 0 {
            return Err(invalid_data(InflateError::BadGzipHeader));
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn header_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(n);
        for _ in 0..n {
            bytes.push(self.header_byte()?);
        }
        Ok(bytes)
    }

    fn header_string(&mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            match self.header_byte()? {
                0 => return Ok(bytes),
                byte => bytes.push(byte),
            }
        }
    }

    /// Decide what follows: another member, pass-through data, or the end
    fn check_magic(&mut self) -> io::Result<()> {
        let available = self.fill_at_least(2)?;
        self.state = if available == 0 {
            State::Finished
        } else if available >= 2 && self.buf[self.pos..self.pos + 2] == GZ_MAGIC {
            self.pos += 2;
            self.read_header()?;
            State::Body
        } else {
            debug!(members = self.members, "input is not gzip, passing through");
            State::PassThrough
        };
        Ok(())
    }

    fn read_header(&mut self) -> io::Result<()> {
        let method = self.header_byte()?;
        let flags = self.header_byte()?;
        if method != METHOD_DEFLATED || flags & FLAG_RESERVED != 0 {
            return Err(invalid_data(InflateError::BadGzipHeader));
        }

        let fixed = self.header_bytes(6)?;
        let mut header = GzHeader {
            text: flags & FLAG_TEXT != 0,
            mtime: u32::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]),
            xfl: fixed[4],
            os: fixed[5],
            ..GzHeader::default()
        };

        if flags & FLAG_EXTRA != 0 {
            let len = self.header_bytes(2)?;
            let len = u16::from_le_bytes([len[0], len[1]]) as usize;
            header.extra = Some(self.header_bytes(len)?);
        }
        if flags & FLAG_NAME != 0 {
            header.name = Some(self.header_string()?);
        }
        if flags & FLAG_COMMENT != 0 {
            header.comment = Some(self.header_string()?);
        }
        if flags & FLAG_HEAD_CRC != 0 {
            self.header_bytes(2)?;
        }

        trace!(flags, mtime = header.mtime, os = header.os, "gzip member header");
        self.header = Some(header);
        self.inflater.reset();
        Ok(())
    }

    /// Verify the CRC32/ISIZE trailer of the member that just ended
    fn finish_member(&mut self) -> io::Result<()> {
        let unused = self.inflater.take_unused_input();
        if !unused.is_empty() {
            self.buf.splice(self.pos..self.pos, unused);
        }

        if self.fill_at_least(8)? < 8 {
            return Err(invalid_data(InflateError::UnexpectedEof));
        }
        let trailer = &self.buf[self.pos..self.pos + 8];
        let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let isize = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
        self.pos += 8;

        if crc != self.inflater.check() {
            return Err(invalid_data(InflateError::IncorrectDataCheck));
        }
        if isize != self.inflater.total_out() as u32 {
            return Err(invalid_data(InflateError::IncorrectLengthCheck));
        }
        self.members += 1;
        debug!(members = self.members, size = isize, "gzip member verified");
        self.check_magic()
    }

    fn read_passthrough(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let n = out.len().min(self.buf.len() - self.pos);
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }
        self.inner.read(out)
    }

    fn step(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.state {
                State::Header => self.check_magic()?,
                State::Body => {
                    if self.pos == self.buf.len() {
                        self.fill_at_least(1)?;
                    }
                    let result = self
                        .inflater
                        .inflate(&self.buf[self.pos..], out)
                        .map_err(invalid_data)?;
                    self.pos += result.bytes_read;

                    match result.status {
                        InflateStatus::Done => self.finish_member()?,
                        InflateStatus::HasMoreOutput => {}
                        InflateStatus::NeedsMoreInput => {
                            if self.eof && self.pos == self.buf.len() {
                                return Err(invalid_data(InflateError::UnexpectedEof));
                            }
                        }
                        InflateStatus::NeedsDictionary => {
                            return Err(invalid_data(InflateError::NeedDictionary));
                        }
                    }
                    if result.bytes_written > 0 {
                        return Ok(result.bytes_written);
                    }
                }
                State::PassThrough => return self.read_passthrough(out),
                State::Finished => return Ok(0),
                State::Failed(err) => return Err(invalid_data(err)),
            }
        }
    }
}

impl<R: Read> Read for GzDecoder<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let result = self.step(out);
        if let Err(err) = &result {
            if let Some(inflate) = inflate_error(err) {
                self.state = State::Failed(inflate);
            }
        }
        result
    }
}

fn invalid_data(err: InflateError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

fn inflate_error(err: &io::Error) -> Option<InflateError> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<InflateError>())
        .copied()
}

/// Decompress a whole gzip buffer.
pub fn inflate(buffer: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(buffer)?;
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| match inflate_error(&e) {
            Some(inflate) => ZipError::Inflate(inflate),
            None => ZipError::Io(e),
        })?;
    Ok(output)
}
