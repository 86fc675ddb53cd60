//! Error types for rzlib
//!
//! Bit-level failures live in [`crate::zlib::InflateError`]; this module wraps them
//! with archive and entry context and maps every error onto the classic `unz*`
//! status codes.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::zlib::{ErrorClass, InflateError};

/// Status codes of the classic unzip API
///
/// `UNZ_EOF` shares the value 0 with [`ZipErrorCode::Ok`]; reads report end of
/// data through a zero byte count rather than a separate code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ZipErrorCode {
    Ok = 0,
    Errno = -1,
    EndOfListOfFile = -100,
    ParamError = -102,
    BadZipFile = -103,
    InternalError = -104,
    CrcError = -105,
}

impl ZipErrorCode {
    pub fn from_c_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ZipErrorCode::Ok),
            -1 => Some(ZipErrorCode::Errno),
            -100 => Some(ZipErrorCode::EndOfListOfFile),
            -102 => Some(ZipErrorCode::ParamError),
            -103 => Some(ZipErrorCode::BadZipFile),
            -104 => Some(ZipErrorCode::InternalError),
            -105 => Some(ZipErrorCode::CrcError),
            _ => None,
        }
    }

    pub fn to_c_code(self) -> i32 {
        self as i32
    }
}

/// Main error type for rzlib
#[derive(Error, Debug)]
pub enum ZipError {
    /// File open failed
    #[error("cannot open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File write failed
    #[error("cannot write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Out of memory
    #[error("out of memory")]
    OutOfMemory,

    /// No end of central directory record within the scan window
    #[error("'{archive}' is not a ZIP file")]
    NotAZipFile { archive: PathBuf },

    /// Archive spans several disks
    #[error("multi-disk archive '{archive}' is not supported")]
    MultiDiskUnsupported { archive: PathBuf },

    /// Corrupt archive
    #[error("corrupt ZIP archive '{archive}': {reason}")]
    CorruptArchive { archive: PathBuf, reason: String },

    /// Corrupt entry in archive
    #[error("corrupt ZIP entry '{name}' in archive '{archive}': {reason}")]
    CorruptEntry {
        name: String,
        archive: PathBuf,
        reason: String,
    },

    /// Entry not found in archive
    #[error("entry '{name}' not found in archive '{archive}'")]
    EntryNotFound { name: String, archive: PathBuf },

    /// Iteration moved past the last entry
    #[error("end of list of file")]
    EndOfList,

    /// Operation needs an open entry
    #[error("no entry is open for reading")]
    NoCurrentFile,

    /// Unsupported compression method
    #[error("unsupported compression method {method} for entry '{name}'")]
    UnsupportedCompression { name: String, method: u16 },

    /// Encrypted entry
    #[error("entry '{name}' is encrypted")]
    Encrypted { name: String },

    /// CRC32 mismatch
    #[error("CRC32 mismatch for entry '{name}': expected {expected:#010x}, got {actual:#010x}")]
    Crc32Mismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    /// Entry data failed to inflate
    #[error("cannot inflate entry '{name}': {source}")]
    EntryData {
        name: String,
        #[source]
        source: InflateError,
    },

    /// Standalone stream failed to inflate
    #[error("inflate failed: {0}")]
    Inflate(#[from] InflateError),

    /// Overwrite conflict
    #[error("not overwriting '{path}' when extracting '{archive}'")]
    OverwriteConflict { path: PathBuf, archive: PathBuf },

    /// Directory creation failed
    #[error("cannot create directory '{path}': {source}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Modification time setting failed
    #[error("failed to set mtime on '{path}': {source}")]
    SetMtimeFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Path error
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Bad argument
    #[error("invalid parameter: {0}")]
    Param(String),

    /// Some entries could not be extracted
    #[error("failed to extract from '{archive}': {}", .failed.join(", "))]
    ExtractionFailed {
        archive: PathBuf,
        failed: Vec<String>,
    },

    /// IO error with context
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ZipError {
    /// The `unz*` status code a C caller would have seen
    pub fn code(&self) -> ZipErrorCode {
        match self {
            ZipError::FileOpen { .. } | ZipError::FileWrite { .. } | ZipError::Io(_) => {
                ZipErrorCode::Errno
            }
            ZipError::CreateDirFailed { .. } | ZipError::SetMtimeFailed { .. } => {
                ZipErrorCode::Errno
            }
            ZipError::OutOfMemory => ZipErrorCode::InternalError,
            ZipError::NotAZipFile { .. }
            | ZipError::MultiDiskUnsupported { .. }
            | ZipError::CorruptArchive { .. }
            | ZipError::CorruptEntry { .. }
            | ZipError::UnsupportedCompression { .. }
            | ZipError::Encrypted { .. }
            | ZipError::ExtractionFailed { .. } => ZipErrorCode::BadZipFile,
            ZipError::EntryNotFound { .. } | ZipError::EndOfList => {
                ZipErrorCode::EndOfListOfFile
            }
            ZipError::NoCurrentFile
            | ZipError::Param(_)
            | ZipError::InvalidPath { .. }
            | ZipError::OverwriteConflict { .. } => ZipErrorCode::ParamError,
            ZipError::Crc32Mismatch { .. } => ZipErrorCode::CrcError,
            ZipError::EntryData { source, .. } | ZipError::Inflate(source) => {
                match source.class() {
                    ErrorClass::Integrity => ZipErrorCode::CrcError,
                    ErrorClass::Resource => ZipErrorCode::InternalError,
                    ErrorClass::Usage => ZipErrorCode::ParamError,
                    ErrorClass::Structural => ZipErrorCode::BadZipFile,
                }
            }
        }
    }

    pub fn as_c_code(&self) -> i32 {
        self.code().to_c_code()
    }

    /// Structural / integrity / resource / usage classification
    pub fn class(&self) -> ErrorClass {
        match self {
            ZipError::Crc32Mismatch { .. } => ErrorClass::Integrity,
            ZipError::EntryData { source, .. } | ZipError::Inflate(source) => source.class(),
            ZipError::OutOfMemory => ErrorClass::Resource,
            ZipError::NoCurrentFile
            | ZipError::Param(_)
            | ZipError::InvalidPath { .. }
            | ZipError::OverwriteConflict { .. }
            | ZipError::EntryNotFound { .. }
            | ZipError::EndOfList => ErrorClass::Usage,
            _ => ErrorClass::Structural,
        }
    }

    /// Create a file open error
    pub fn file_open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ZipError::FileOpen {
            path: path.into(),
            source,
        }
    }

    /// Create a file write error
    pub fn file_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ZipError::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a corrupt archive error
    pub fn corrupt_archive(archive: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ZipError::CorruptArchive {
            archive: archive.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt entry error
    pub fn corrupt_entry(
        name: impl Into<String>,
        archive: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        ZipError::CorruptEntry {
            name: name.into(),
            archive: archive.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for rzlib operations
pub type Result<T> = std::result::Result<T, ZipError>;

/// Compression level recorded in the general purpose flag (bits 1-2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionLevel {
    NoCompression = 0,
    Fastest = 1,
    Fast = 2,
    #[default]
    Normal = 6,
    Maximum = 9,
}

impl CompressionLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Level implied by a deflated entry's flag bits
    pub fn from_flag(flag: u16) -> Self {
        match flag & 0x06 {
            6 => CompressionLevel::Fastest,
            4 => CompressionLevel::Fast,
            2 => CompressionLevel::Maximum,
            _ => CompressionLevel::Normal,
        }
    }
}
