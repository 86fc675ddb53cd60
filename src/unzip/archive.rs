//! ZIP 归档读取
//!
//! 游标式接口：打开归档后定位到第一个条目，通过 `go_to_first_file` /
//! `go_to_next_file` / `locate_file` / `go_to_file_pos` 移动，
//! 再用 `open_current_file` → `read_current_file` → `close_current_file` 读取当前条目。
//!
//! 读取流程：
//!
//! 1. 从文件末尾分块向前搜索 EOCD 签名（最多一个最大注释长度加 EOCD 本身）
//! 2. 校验磁盘号与条目数，必要时通过 ZIP64 定位器读取 64 位记录
//! 3. `中央目录实际位置 - (记录的偏移 + 大小)` 即为归档前附加的数据长度（自解压前缀），
//!    之后所有偏移都加上这个值
//! 4. 打开条目时重新解析本地文件头并与中央目录交叉校验

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use time::{Date, Month, OffsetDateTime, Time, UtcOffset};
use tracing::{debug, trace, warn};

use crate::error::{CompressionLevel, Result, ZipError};
use crate::zlib::{Crc32, InflateOptions, InflateStatus, Inflater};

/// ZIP 格式常量
mod zip_format {
    pub const LOCAL_HEADER_SIG: u32 = 0x0403_4B50;
    pub const CENTRAL_HEADER_SIG: u32 = 0x0201_4B50;
    pub const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4B50;
    pub const ZIP64_END_OF_CENTRAL_DIR_SIG: u32 = 0x0606_4B50;
    pub const ZIP64_LOCATOR_SIG: u32 = 0x0706_4B50;

    pub const LOCAL_HEADER_SIZE: u64 = 0x1E;
    pub const CENTRAL_HEADER_SIZE: u64 = 0x2E;
    pub const END_OF_CENTRAL_DIR_SIZE: u64 = 22;
    pub const ZIP64_LOCATOR_SIZE: u64 = 20;
    pub const ZIP64_END_OF_CENTRAL_DIR_SIZE: u64 = 56;

    /// EOCD 搜索块大小，每次多读 4 字节以覆盖跨块的签名
    pub const SEARCH_CHUNK: u64 = 0x400;
    /// 向前搜索的最大距离：最长注释 + EOCD
    pub const MAX_SEARCH_BACK: u64 = 0xFFFF + END_OF_CENTRAL_DIR_SIZE;

    /// 文件名长度上限（含结尾）
    pub const MAX_FILENAME_IN_ZIP: usize = 256;

    pub const METHOD_STORED: u16 = 0;
    pub const METHOD_DEFLATED: u16 = 8;

    pub const FLAG_ENCRYPTED: u16 = 0x0001;
    pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

    pub const ZIP64_EXTRA_ID: u16 = 0x0001;
}

use zip_format::*;

pub const DEFAULT_READ_BUFFER_SIZE: usize = 16384;

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// 文件名比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum CaseSensitivity {
    /// Unix 上区分大小写，其他平台不区分
    #[default]
    Default = 0,
    Sensitive = 1,
    /// 仅 ASCII 字母不区分大小写
    Insensitive = 2,
}

impl CaseSensitivity {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(CaseSensitivity::Default),
            1 => Some(CaseSensitivity::Sensitive),
            2 => Some(CaseSensitivity::Insensitive),
            _ => None,
        }
    }

    fn is_sensitive(self) -> bool {
        match self {
            CaseSensitivity::Default => cfg!(unix),
            CaseSensitivity::Sensitive => true,
            CaseSensitivity::Insensitive => false,
        }
    }

    /// 按当前规则比较两个文件名
    pub fn names_equal(self, a: &[u8], b: &[u8]) -> bool {
        if self.is_sensitive() {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }
}

/// 归档配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// `locate_file` 的默认比较方式
    pub case_sensitivity: CaseSensitivity,
    /// 每次从归档读取的压缩数据块大小
    pub read_buffer_size: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            case_sensitivity: CaseSensitivity::Default,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ArchiveOptions {
    pub fn case_sensitivity(mut self, case_sensitivity: CaseSensitivity) -> Self {
        self.case_sensitivity = case_sensitivity;
        self
    }

    pub fn read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size.max(1);
        self
    }
}

/// 归档全局信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalInfo {
    /// 中央目录中的条目数
    pub number_entry: u64,
    /// 归档注释长度
    pub size_comment: u16,
}

/// 拆开的 DOS 日期时间，月份从 0 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosDateTime {
    pub sec: u8,
    pub min: u8,
    pub hour: u8,
    pub mday: u8,
    pub mon: u8,
    pub year: u16,
}

impl DosDateTime {
    /// 解码 `日期 << 16 | 时间` 形式的打包值
    pub fn from_dos(dos_date: u32) -> Self {
        let date = (dos_date >> 16) as u16;
        let time = dos_date as u16;
        Self {
            mday: (date & 0x1F) as u8,
            mon: (((date & 0x1E0) / 0x20) as u8).saturating_sub(1),
            year: ((date & 0xFE00) / 0x200) + 1980,
            hour: ((time & 0xF800) / 0x800) as u8,
            min: ((time & 0x7E0) / 0x20) as u8,
            sec: (2 * (time & 0x1F)) as u8,
        }
    }

    /// 按本地时区解释；字段越界时返回 `None`
    pub fn to_offset_datetime(&self) -> Option<OffsetDateTime> {
        let month = Month::try_from(self.mon + 1).ok()?;
        let date = Date::from_calendar_date(self.year as i32, month, self.mday).ok()?;
        let time = Time::from_hms(self.hour, self.min, self.sec).ok()?;
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        Some(date.with_time(time).assume_offset(offset))
    }

    pub fn to_system_time(&self) -> Option<SystemTime> {
        self.to_offset_datetime().map(SystemTime::from)
    }
}

/// 中央目录记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryEntry {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flag: u16,
    pub compression_method: u16,
    /// 打包的 DOS 日期时间（日期在高 16 位）
    pub dos_date: u32,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_num_start: u32,
    pub internal_attr: u16,
    pub external_attr: u32,
    /// 本地文件头偏移（不含归档前附加数据）
    pub local_header_offset: u64,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryEntry {
    /// 文件名（非 UTF-8 字节按替换字符显示）
    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    pub fn is_directory(&self) -> bool {
        self.name.last() == Some(&b'/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.flag & FLAG_ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flag & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn modified(&self) -> DosDateTime {
        DosDateTime::from_dos(self.dos_date)
    }

    /// 记录在中央目录中占用的字节数
    fn record_size(&self) -> u64 {
        CENTRAL_HEADER_SIZE + self.name.len() as u64 + self.extra.len() as u64
            + self.comment.len() as u64
    }

    /// 用 ZIP64 扩展字段替换饱和的 32 位字段
    fn apply_zip64_extra(&mut self) {
        let mut rest = &self.extra[..];
        while rest.len() >= 4 {
            let id = le_u16(rest, 0);
            let len = le_u16(rest, 2) as usize;
            let body = &rest[4..];
            if len > body.len() {
                return;
            }
            if id == ZIP64_EXTRA_ID {
                let body = &body[..len];
                let mut at = 0;
                let mut next = |value: &mut u64| {
                    if at + 8 <= body.len() {
                        *value = le_u64(body, at);
                        at += 8;
                    }
                };
                if self.uncompressed_size == u32::MAX as u64 {
                    next(&mut self.uncompressed_size);
                }
                if self.compressed_size == u32::MAX as u64 {
                    next(&mut self.compressed_size);
                }
                if self.local_header_offset == u32::MAX as u64 {
                    next(&mut self.local_header_offset);
                }
                return;
            }
            rest = &body[len..];
        }
    }
}

/// 条目摘要，供列表使用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub filename: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub compression_method: u16,
    pub modified: DosDateTime,
    pub offset: u64,
    pub is_directory: bool,
    pub is_encrypted: bool,
}

impl From<&CentralDirectoryEntry> for ZipEntry {
    fn from(entry: &CentralDirectoryEntry) -> Self {
        Self {
            filename: entry.name().into_owned(),
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            crc32: entry.crc32,
            compression_method: entry.compression_method,
            modified: entry.modified(),
            offset: entry.local_header_offset,
            is_directory: entry.is_directory(),
            is_encrypted: entry.is_encrypted(),
        }
    }
}

/// 条目位置，可用 [`ZipArchive::go_to_file_pos`] 回到该条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePos {
    pub pos_in_central_dir: u64,
    pub num_file: u64,
}

/// 当前打开条目的读取状态
#[derive(Debug)]
struct OpenEntry {
    raw: bool,
    method: u16,
    crc_expected: u32,
    crc: Crc32,
    /// 下一块压缩数据在文件中的位置
    pos_in_zipfile: u64,
    rest_read_compressed: u64,
    rest_read_uncompressed: u64,
    total_out: u64,
    offset_local_extrafield: u64,
    size_local_extrafield: u16,
    read_buffer: Vec<u8>,
    /// `read_buffer[in_start..in_end]` 是尚未交给解码器的输入
    in_start: usize,
    in_end: usize,
    stream_end: bool,
}

impl OpenEntry {
    fn pending(&self) -> usize {
        self.in_end - self.in_start
    }
}

/// ZIP 归档
pub struct ZipArchive<R> {
    reader: R,
    /// 错误信息中的归档名
    path: PathBuf,
    options: ArchiveOptions,
    global: GlobalInfo,
    zip64: bool,
    /// 归档前附加数据的长度
    byte_before_the_zipfile: u64,
    /// EOCD 记录位置
    eocd_pos: u64,
    size_central_dir: u64,
    offset_central_dir: u64,

    num_file: u64,
    pos_in_central_dir: u64,
    current: Option<CentralDirectoryEntry>,
    reading: Option<OpenEntry>,
    /// 在条目之间复用的解码会话
    inflater: Option<Inflater>,
}

impl<R> std::fmt::Debug for ZipArchive<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipArchive")
            .field("path", &self.path)
            .field("global", &self.global)
            .field("byte_before_the_zipfile", &self.byte_before_the_zipfile)
            .field("num_file", &self.num_file)
            .field("pos_in_central_dir", &self.pos_in_central_dir)
            .finish_non_exhaustive()
    }
}

impl ZipArchive<BufReader<File>> {
    /// 打开 ZIP 文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, ArchiveOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: ArchiveOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ZipError::file_open(path, e))?;
        ZipArchive::from_parts(BufReader::new(file), path.to_path_buf(), options)
    }

    /// 列出 ZIP 文件内容
    pub fn list(path: impl AsRef<Path>) -> Result<Vec<ZipEntry>> {
        Self::open(path)?.entries()
    }
}

impl<R: Read + Seek> ZipArchive<R> {
    /// 从任意可定位的数据源打开
    pub fn new(reader: R) -> Result<Self> {
        Self::with_options(reader, ArchiveOptions::default())
    }

    pub fn with_options(reader: R, options: ArchiveOptions) -> Result<Self> {
        Self::from_parts(reader, PathBuf::from("<stream>"), options)
    }

    fn from_parts(mut reader: R, path: PathBuf, options: ArchiveOptions) -> Result<Self> {
        let eocd_pos = search_central_dir(&mut reader)?
            .ok_or_else(|| ZipError::NotAZipFile {
                archive: path.clone(),
            })?;

        let mut eocd = [0u8; END_OF_CENTRAL_DIR_SIZE as usize];
        reader.seek(SeekFrom::Start(eocd_pos))?;
        reader.read_exact(&mut eocd)?;

        let mut number_disk = le_u16(&eocd, 4) as u32;
        let mut number_disk_with_cd = le_u16(&eocd, 6) as u32;
        let mut number_entry = le_u16(&eocd, 8) as u64;
        let mut number_entry_cd = le_u16(&eocd, 10) as u64;
        let mut size_central_dir = le_u32(&eocd, 12) as u64;
        let mut offset_central_dir = le_u32(&eocd, 16) as u64;
        let size_comment = le_u16(&eocd, 20);

        let mut central_pos = eocd_pos;
        let zip64 = match read_zip64_end(&mut reader, eocd_pos)? {
            Some((pos, record)) => {
                number_disk = le_u32(&record, 16);
                number_disk_with_cd = le_u32(&record, 20);
                number_entry = le_u64(&record, 24);
                number_entry_cd = le_u64(&record, 32);
                size_central_dir = le_u64(&record, 40);
                offset_central_dir = le_u64(&record, 48);
                central_pos = pos;
                true
            }
            None => false,
        };

        if number_disk != 0 || number_disk_with_cd != 0 {
            return Err(ZipError::MultiDiskUnsupported { archive: path });
        }
        if number_entry_cd != number_entry {
            return Err(ZipError::corrupt_archive(
                path,
                "entry counts in end of central directory disagree",
            ));
        }
        let cd_end = offset_central_dir
            .checked_add(size_central_dir)
            .filter(|&end| end <= central_pos)
            .ok_or_else(|| {
                ZipError::corrupt_archive(
                    &path,
                    "central directory does not fit before its end record",
                )
            })?;

        let byte_before_the_zipfile = central_pos - cd_end;
        debug!(
            archive = %path.display(),
            eocd_pos,
            entries = number_entry,
            zip64,
            byte_before_the_zipfile,
            "opened zip archive"
        );

        let mut archive = Self {
            reader,
            path,
            options,
            global: GlobalInfo {
                number_entry,
                size_comment,
            },
            zip64,
            byte_before_the_zipfile,
            eocd_pos,
            size_central_dir,
            offset_central_dir,
            num_file: 0,
            pos_in_central_dir: offset_central_dir,
            current: None,
            reading: None,
            inflater: None,
        };

        match archive.go_to_first_file() {
            Ok(()) | Err(ZipError::EndOfList) => {}
            Err(err) => {
                warn!(archive = %archive.path.display(), error = %err, "cannot read first entry");
            }
        }
        Ok(archive)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    pub fn global_info(&self) -> GlobalInfo {
        self.global
    }

    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    /// 归档之前附加的数据长度（自解压前缀）
    pub fn bytes_before_archive(&self) -> u64 {
        self.byte_before_the_zipfile
    }

    /// 中央目录的大小与偏移（均不含归档前附加数据）
    pub fn central_directory(&self) -> (u64, u64) {
        (self.size_central_dir, self.offset_central_dir)
    }

    /// 归档注释
    pub fn global_comment(&mut self) -> Result<Vec<u8>> {
        let mut comment = vec![0u8; self.global.size_comment as usize];
        self.reader
            .seek(SeekFrom::Start(self.eocd_pos + END_OF_CENTRAL_DIR_SIZE))?;
        self.reader.read_exact(&mut comment)?;
        Ok(comment)
    }

    fn read_entry_at(&mut self, pos: u64) -> Result<CentralDirectoryEntry> {
        let mut header = [0u8; CENTRAL_HEADER_SIZE as usize];
        let file_pos = pos.checked_add(self.byte_before_the_zipfile).ok_or_else(|| {
            ZipError::corrupt_archive(
                &self.path,
                format!("central directory offset {pos} overflows"),
            )
        })?;
        self.reader.seek(SeekFrom::Start(file_pos))?;
        self.reader.read_exact(&mut header)?;

        if le_u32(&header, 0) != CENTRAL_HEADER_SIG {
            return Err(ZipError::corrupt_archive(
                &self.path,
                format!("bad central directory signature at offset {pos}"),
            ));
        }

        let size_filename = le_u16(&header, 28) as usize;
        let size_extra = le_u16(&header, 30) as usize;
        let size_comment = le_u16(&header, 32) as usize;

        let mut name = vec![0u8; size_filename];
        let mut extra = vec![0u8; size_extra];
        let mut comment = vec![0u8; size_comment];
        self.reader.read_exact(&mut name)?;
        self.reader.read_exact(&mut extra)?;
        self.reader.read_exact(&mut comment)?;

        let mut entry = CentralDirectoryEntry {
            version_made_by: le_u16(&header, 4),
            version_needed: le_u16(&header, 6),
            flag: le_u16(&header, 8),
            compression_method: le_u16(&header, 10),
            dos_date: le_u32(&header, 12),
            crc32: le_u32(&header, 16),
            compressed_size: le_u32(&header, 20) as u64,
            uncompressed_size: le_u32(&header, 24) as u64,
            disk_num_start: le_u16(&header, 34) as u32,
            internal_attr: le_u16(&header, 36),
            external_attr: le_u32(&header, 38),
            local_header_offset: le_u32(&header, 42) as u64,
            name,
            extra,
            comment,
        };
        entry.apply_zip64_extra();
        Ok(entry)
    }

    /// 读取 `pos_in_central_dir` 处的记录作为当前条目
    fn load_current(&mut self) -> Result<()> {
        self.current = None;
        let entry = self.read_entry_at(self.pos_in_central_dir)?;
        trace!(num_file = self.num_file, name = %entry.name(), "current entry");
        self.current = Some(entry);
        Ok(())
    }

    /// 定位到第一个条目
    pub fn go_to_first_file(&mut self) -> Result<()> {
        self.pos_in_central_dir = self.offset_central_dir;
        self.num_file = 0;
        if self.global.number_entry == 0 {
            self.current = None;
            return Err(ZipError::EndOfList);
        }
        self.load_current()
    }

    /// 定位到下一个条目；已经是最后一个时返回 [`ZipError::EndOfList`]
    pub fn go_to_next_file(&mut self) -> Result<()> {
        let Some(current) = &self.current else {
            return Err(ZipError::EndOfList);
        };
        if (self.zip64 || self.global.number_entry != 0xFFFF)
            && self.num_file + 1 == self.global.number_entry
        {
            return Err(ZipError::EndOfList);
        }
        self.pos_in_central_dir += current.record_size();
        self.num_file += 1;
        self.load_current()
    }

    /// 按名字查找条目，`case_sensitivity` 为 `None` 时使用归档配置
    ///
    /// 找不到时游标保持原位。
    pub fn locate_file(
        &mut self,
        name: &str,
        case_sensitivity: Option<CaseSensitivity>,
    ) -> Result<()> {
        if name.len() >= MAX_FILENAME_IN_ZIP {
            return Err(ZipError::Param(format!(
                "file name longer than {} bytes",
                MAX_FILENAME_IN_ZIP - 1
            )));
        }
        if self.current.is_none() {
            return Err(ZipError::EndOfList);
        }
        let case = case_sensitivity.unwrap_or(self.options.case_sensitivity);

        let saved_num_file = self.num_file;
        let saved_pos = self.pos_in_central_dir;
        let saved_current = self.current.take();

        let mut step = self.go_to_first_file();
        while step.is_ok() {
            if let Some(current) = &self.current {
                if case.names_equal(&current.name, name.as_bytes()) {
                    return Ok(());
                }
            }
            step = self.go_to_next_file();
        }

        self.num_file = saved_num_file;
        self.pos_in_central_dir = saved_pos;
        self.current = saved_current;
        match step {
            Err(ZipError::EndOfList) | Ok(()) => Err(ZipError::EntryNotFound {
                name: name.to_string(),
                archive: self.path.clone(),
            }),
            Err(err) => Err(err),
        }
    }

    pub fn file_pos(&self) -> Result<FilePos> {
        if self.current.is_none() {
            return Err(ZipError::EndOfList);
        }
        Ok(FilePos {
            pos_in_central_dir: self.pos_in_central_dir,
            num_file: self.num_file,
        })
    }

    pub fn go_to_file_pos(&mut self, pos: FilePos) -> Result<()> {
        self.pos_in_central_dir = pos.pos_in_central_dir;
        self.num_file = pos.num_file;
        self.load_current()
    }

    /// 当前条目在中央目录中的偏移；没有当前条目时为 0
    pub fn offset(&self) -> u64 {
        if self.current.is_none() {
            return 0;
        }
        let n = self.global.number_entry;
        if n != 0 && n != 0xFFFF && self.num_file == n {
            return 0;
        }
        self.pos_in_central_dir
    }

    /// 直接定位到中央目录偏移 `pos` 处的记录
    ///
    /// 条目序号未知，之后的 `go_to_next_file` 不再以条目数判断结尾，
    /// 只会在读到非中央目录记录时失败。
    pub fn set_offset(&mut self, pos: u64) -> Result<()> {
        self.pos_in_central_dir = pos;
        self.num_file = self.global.number_entry;
        self.load_current()
    }

    /// 当前条目信息
    pub fn current_file_info(&self) -> Result<&CentralDirectoryEntry> {
        self.current
            .as_ref()
            .ok_or_else(|| ZipError::Param("no current file".to_string()))
    }

    /// 遍历所有条目，完成后恢复游标
    pub fn entries(&mut self) -> Result<Vec<ZipEntry>> {
        let saved = self.file_pos().ok();
        let mut entries = Vec::new();

        let mut step = self.go_to_first_file();
        loop {
            match step {
                Ok(()) => {
                    if let Some(current) = &self.current {
                        entries.push(ZipEntry::from(current));
                    }
                }
                Err(ZipError::EndOfList) => break,
                Err(err) => return Err(err),
            }
            step = self.go_to_next_file();
        }

        if let Some(pos) = saved {
            self.go_to_file_pos(pos)?;
        }
        Ok(entries)
    }

    /// 校验本地文件头，返回（本地头在文件中的位置，数据相对本地头的偏移，本地扩展字段长度）
    fn check_local_header(&mut self, entry: &CentralDirectoryEntry) -> Result<(u64, u64, u16)> {
        let name = entry.name();
        let local_pos = entry
            .local_header_offset
            .checked_add(self.byte_before_the_zipfile)
            .ok_or_else(|| {
                ZipError::corrupt_entry(
                    name.to_string(),
                    &self.path,
                    "local header offset overflows",
                )
            })?;
        let mut header = [0u8; LOCAL_HEADER_SIZE as usize];
        self.reader.seek(SeekFrom::Start(local_pos))?;
        self.reader.read_exact(&mut header)?;

        let mismatch = |reason: &str| {
            warn!(entry = %name, reason, "local header does not match central directory");
            ZipError::corrupt_entry(name.to_string(), &self.path, reason)
        };

        if le_u32(&header, 0) != LOCAL_HEADER_SIG {
            return Err(mismatch("bad local header signature"));
        }
        let flags = le_u16(&header, 6);
        if le_u16(&header, 8) != entry.compression_method {
            return Err(mismatch("compression method differs"));
        }
        if entry.compression_method != METHOD_STORED
            && entry.compression_method != METHOD_DEFLATED
        {
            return Err(ZipError::UnsupportedCompression {
                name: entry.name().into_owned(),
                method: entry.compression_method,
            });
        }

        if flags & FLAG_DATA_DESCRIPTOR == 0 {
            if le_u32(&header, 14) != entry.crc32 {
                return Err(mismatch("crc differs"));
            }
            let sizes = [
                (le_u32(&header, 18), entry.compressed_size, "compressed size differs"),
                (le_u32(&header, 22), entry.uncompressed_size, "uncompressed size differs"),
            ];
            for (local, central, reason) in sizes {
                if local != u32::MAX && local as u64 != central {
                    return Err(mismatch(reason));
                }
            }
        }

        let size_filename = le_u16(&header, 26);
        if size_filename as usize != entry.name.len() {
            return Err(mismatch("file name length differs"));
        }
        let size_extra = le_u16(&header, 28);

        Ok((
            local_pos,
            LOCAL_HEADER_SIZE + size_filename as u64 + size_extra as u64,
            size_extra,
        ))
    }

    /// 打开当前条目，解压读取
    pub fn open_current_file(&mut self) -> Result<()> {
        self.open_current_file_internal(false).map(|_| ())
    }

    /// 打开当前条目，原样读取压缩数据，返回压缩方法与压缩级别
    pub fn open_current_file_raw(&mut self) -> Result<(u16, CompressionLevel)> {
        self.open_current_file_internal(true)
    }

    fn open_current_file_internal(&mut self, raw: bool) -> Result<(u16, CompressionLevel)> {
        let entry = self
            .current
            .clone()
            .ok_or_else(|| ZipError::Param("no current file".to_string()))?;

        if self.reading.is_some() {
            if let Err(err) = self.close_current_file() {
                warn!(
                    archive = %self.path.display(),
                    error = %err,
                    "discarding error from unclosed entry"
                );
            }
        }

        let (local_pos, data_offset, size_local_extrafield) = self.check_local_header(&entry)?;
        if entry.is_encrypted() {
            return Err(ZipError::Encrypted {
                name: entry.name().into_owned(),
            });
        }

        let mut read_buffer = Vec::new();
        read_buffer
            .try_reserve_exact(self.options.read_buffer_size)
            .map_err(|_| ZipError::OutOfMemory)?;
        read_buffer.resize(self.options.read_buffer_size, 0);

        if entry.compression_method == METHOD_DEFLATED && !raw {
            match &mut self.inflater {
                Some(inflater) => inflater.reset(),
                None => self.inflater = Some(Inflater::new(InflateOptions::raw())?),
            }
        }

        trace!(
            entry = %entry.name(),
            method = entry.compression_method,
            raw,
            "opening entry"
        );

        let level = CompressionLevel::from_flag(entry.flag);
        self.reading = Some(OpenEntry {
            raw,
            method: entry.compression_method,
            crc_expected: entry.crc32,
            crc: Crc32::new(),
            pos_in_zipfile: local_pos + data_offset,
            rest_read_compressed: entry.compressed_size,
            rest_read_uncompressed: entry.uncompressed_size,
            total_out: 0,
            offset_local_extrafield: local_pos + LOCAL_HEADER_SIZE + entry.name.len() as u64,
            size_local_extrafield,
            read_buffer,
            in_start: 0,
            in_end: 0,
            stream_end: false,
        });
        Ok((entry.compression_method, level))
    }

    /// 读取当前条目的数据到 `buf`，返回读取的字节数；0 表示数据已读完
    pub fn read_current_file(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Self {
            reader,
            reading,
            inflater,
            current,
            ..
        } = self;
        let entry = reading.as_mut().ok_or(ZipError::NoCurrentFile)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut want = buf.len() as u64;
        if entry.raw {
            want = want.min(entry.rest_read_compressed.saturating_add(entry.pending() as u64));
        } else {
            want = want.min(entry.rest_read_uncompressed);
        }
        let want = want as usize;
        let mut read = 0;

        while read < want {
            if entry.pending() == 0 && entry.rest_read_compressed > 0 {
                let n = (entry.read_buffer.len() as u64).min(entry.rest_read_compressed) as usize;
                reader.seek(SeekFrom::Start(entry.pos_in_zipfile))?;
                reader.read_exact(&mut entry.read_buffer[..n])?;
                entry.pos_in_zipfile += n as u64;
                entry.rest_read_compressed -= n as u64;
                entry.in_start = 0;
                entry.in_end = n;
            }

            if entry.method == METHOD_STORED || entry.raw {
                if entry.pending() == 0 {
                    break;
                }
                let n = (want - read).min(entry.pending());
                let out = &mut buf[read..read + n];
                out.copy_from_slice(&entry.read_buffer[entry.in_start..entry.in_start + n]);
                entry.crc.update(out);
                entry.in_start += n;
                entry.rest_read_uncompressed = entry.rest_read_uncompressed.saturating_sub(n as u64);
                entry.total_out += n as u64;
                read += n;
                continue;
            }

            if entry.stream_end {
                break;
            }
            let name = || {
                current
                    .as_ref()
                    .map(|c| c.name().into_owned())
                    .unwrap_or_default()
            };
            let inflater = inflater.as_mut().ok_or(ZipError::NoCurrentFile)?;
            let result = inflater
                .inflate(
                    &entry.read_buffer[entry.in_start..entry.in_end],
                    &mut buf[read..want],
                )
                .map_err(|source| ZipError::EntryData {
                    name: name(),
                    source,
                })?;

            let produced = &buf[read..read + result.bytes_written];
            entry.crc.update(produced);
            entry.in_start += result.bytes_read;
            entry.rest_read_uncompressed = entry
                .rest_read_uncompressed
                .saturating_sub(result.bytes_written as u64);
            entry.total_out += result.bytes_written as u64;
            read += result.bytes_written;

            match result.status {
                InflateStatus::Done => {
                    entry.stream_end = true;
                    break;
                }
                InflateStatus::HasMoreOutput => {}
                InflateStatus::NeedsMoreInput => {
                    if entry.rest_read_compressed == 0 {
                        return Err(ZipError::EntryData {
                            name: name(),
                            source: crate::zlib::InflateError::UnexpectedEof,
                        });
                    }
                }
                InflateStatus::NeedsDictionary => {
                    return Err(ZipError::EntryData {
                        name: name(),
                        source: crate::zlib::InflateError::NeedDictionary,
                    });
                }
            }
        }

        Ok(read)
    }

    /// 读取当前条目剩余的全部数据
    pub fn read_current_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut chunk = vec![0u8; self.options.read_buffer_size];
        let mut total = 0;
        loop {
            let n = self.read_current_file(&mut chunk)?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
    }

    /// 已输出的解压字节数
    pub fn tell(&self) -> Result<u64> {
        self.reading
            .as_ref()
            .map(|entry| entry.total_out)
            .ok_or(ZipError::NoCurrentFile)
    }

    /// 当前条目的数据是否已全部读出
    pub fn eof(&self) -> Result<bool> {
        self.reading
            .as_ref()
            .map(|entry| entry.rest_read_uncompressed == 0)
            .ok_or(ZipError::NoCurrentFile)
    }

    /// 当前条目本地头中的扩展字段
    pub fn local_extra_field(&mut self) -> Result<Vec<u8>> {
        let entry = self.reading.as_ref().ok_or(ZipError::NoCurrentFile)?;
        let mut extra = vec![0u8; entry.size_local_extrafield as usize];
        if !extra.is_empty() {
            self.reader
                .seek(SeekFrom::Start(entry.offset_local_extrafield))?;
            self.reader.read_exact(&mut extra)?;
        }
        Ok(extra)
    }

    /// 关闭当前条目
    ///
    /// 数据全部读出时比较 CRC32；不一致返回 [`ZipError::Crc32Mismatch`]，
    /// 即使之前的读取都成功了。原样读取的条目不做比较。
    pub fn close_current_file(&mut self) -> Result<()> {
        let entry = self.reading.take().ok_or(ZipError::NoCurrentFile)?;
        if entry.rest_read_uncompressed == 0 && !entry.raw {
            let actual = entry.crc.value();
            if actual != entry.crc_expected {
                let name = self
                    .current
                    .as_ref()
                    .map(|c| c.name().into_owned())
                    .unwrap_or_default();
                warn!(entry = %name, expected = entry.crc_expected, actual, "crc mismatch");
                return Err(ZipError::Crc32Mismatch {
                    name,
                    expected: entry.crc_expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// 从文件末尾向前搜索 EOCD 签名
fn search_central_dir<R: Read + Seek>(reader: &mut R) -> Result<Option<u64>> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    let max_back = MAX_SEARCH_BACK.min(file_size);
    let mut buf = vec![0u8; (SEARCH_CHUNK + 4) as usize];
    let signature = END_OF_CENTRAL_DIR_SIG.to_le_bytes();

    let mut back_read = 4u64;
    while back_read < max_back {
        back_read = (back_read + SEARCH_CHUNK).min(max_back);

        let read_pos = file_size - back_read;
        let read_size = (SEARCH_CHUNK + 4).min(file_size - read_pos) as usize;
        reader.seek(SeekFrom::Start(read_pos))?;
        reader.read_exact(&mut buf[..read_size])?;

        if read_size >= 4 {
            if let Some(i) = (0..=read_size - 4)
                .rev()
                .find(|&i| buf[i..i + 4] == signature)
            {
                return Ok(Some(read_pos + i as u64));
            }
        }
    }
    Ok(None)
}

/// 若 EOCD 前紧邻 ZIP64 定位器，读取 ZIP64 EOCD 记录，返回其位置与内容
fn read_zip64_end<R: Read + Seek>(
    reader: &mut R,
    eocd_pos: u64,
) -> Result<Option<(u64, [u8; ZIP64_END_OF_CENTRAL_DIR_SIZE as usize])>> {
    let Some(locator_pos) = eocd_pos.checked_sub(ZIP64_LOCATOR_SIZE) else {
        return Ok(None);
    };
    let mut locator = [0u8; ZIP64_LOCATOR_SIZE as usize];
    reader.seek(SeekFrom::Start(locator_pos))?;
    reader.read_exact(&mut locator)?;
    if le_u32(&locator, 0) != ZIP64_LOCATOR_SIG {
        return Ok(None);
    }

    // 记录的偏移不含自解压前缀，退而检查紧挨定位器之前的位置
    let recorded = le_u64(&locator, 8);
    let adjacent = locator_pos.checked_sub(ZIP64_END_OF_CENTRAL_DIR_SIZE);
    let mut record = [0u8; ZIP64_END_OF_CENTRAL_DIR_SIZE as usize];
    for pos in [Some(recorded), adjacent].into_iter().flatten() {
        match pos.checked_add(ZIP64_END_OF_CENTRAL_DIR_SIZE) {
            Some(end) if end <= locator_pos => {}
            _ => continue,
        }
        reader.seek(SeekFrom::Start(pos))?;
        reader.read_exact(&mut record)?;
        if le_u32(&record, 0) == ZIP64_END_OF_CENTRAL_DIR_SIG {
            return Ok(Some((pos, record)));
        }
    }
    Ok(None)
}
