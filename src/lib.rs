//! rzlib - DEFLATE 解压与 ZIP 读取库
//!
//! 纯 Rust 实现的 inflate 引擎（RFC 1951），带 zlib（RFC 1950）与 gzip（RFC 1952）封装，
//! 以及游标式的 ZIP 归档读取器。
//!
//! ## 功能
//!
//! - 可暂停/恢复的流式 inflate，窗口 8..=15 位
//! - zlib 头尾校验、预设字典
//! - gzip 解码（多成员、非 gzip 数据透传）
//! - ZIP 归档遍历、按名查找、条目读取与 CRC 校验
//! - ZIP64、自解压前缀
//! - 解压到目录
//!
//! ## 示例
//!
//! ```no_run
//! use rzlib::ZipArchive;
//!
//! let mut archive = ZipArchive::open("roms.zip").unwrap();
//! archive.locate_file("a.txt", None).unwrap();
//! archive.open_current_file().unwrap();
//! let mut data = Vec::new();
//! archive.read_current_to_end(&mut data).unwrap();
//! archive.close_current_file().unwrap();
//! ```

pub mod error;
pub mod gzip;
pub mod platform;
pub mod unzip;
pub mod zlib;

// 重导出常用类型
pub use error::{CompressionLevel, Result, ZipError, ZipErrorCode};
pub use gzip::{inflate as gzip_inflate, GzDecoder, GzHeader};
pub use unzip::{
    ArchiveOptions, CaseSensitivity, CentralDirectoryEntry, DosDateTime, Extractor,
    ExtractorOptions, ZipArchive, ZipEntry,
};
pub use zlib::{
    adler32, crc32, uncompress, ErrorClass, InflateError, InflateOptions, InflateResult,
    InflateStatus, Inflater, Wrapper,
};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 解压 ZIP 文件（便捷函数）
///
/// # 示例
///
/// ```no_run
/// rzlib::extract("archive.zip", "output").unwrap();
/// ```
pub fn extract(
    zipfile: impl AsRef<std::path::Path>,
    exdir: impl AsRef<std::path::Path>,
) -> crate::error::Result<()> {
    Extractor::new(zipfile)?.exdir(exdir).extract()
}

/// 列出 ZIP 内容（便捷函数）
///
/// ```no_run
/// for entry in rzlib::list("archive.zip").unwrap() {
///     println!("{}", entry.filename);
/// }
/// ```
pub fn list(zipfile: impl AsRef<std::path::Path>) -> crate::error::Result<Vec<ZipEntry>> {
    ZipArchive::list(zipfile)
}
