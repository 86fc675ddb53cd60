//! ZIP archive reading and extraction.

mod archive;
mod extractor;

pub use archive::{
    ArchiveOptions, CaseSensitivity, CentralDirectoryEntry, DosDateTime, FilePos, GlobalInfo,
    ZipArchive, ZipEntry, DEFAULT_READ_BUFFER_SIZE,
};
pub use extractor::{
    extension_matches, first_supported_entry, sanitize_entry_name, Extractor, ExtractorOptions,
    DEFAULT_EXTENSIONS, WRITE_BUFFER_SIZE,
};
