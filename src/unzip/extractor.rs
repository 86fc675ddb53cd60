//! ZIP 解压到目录
//!
//! 按中央目录顺序逐个条目解压：以 `/` 结尾的条目建目录，其余写文件，
//! 关闭条目时校验 CRC32。默认遇到第一个失败的条目就停止，
//! 已经写出的文件保留在磁盘上。

use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, error, info};

use crate::error::{Result, ZipError};
use crate::platform;
use crate::unzip::archive::{ArchiveOptions, CentralDirectoryEntry, ZipArchive};

/// 写缓冲区大小
pub const WRITE_BUFFER_SIZE: usize = 512 * 1024;

/// 没有声明扩展名列表时默认识别的扩展名
pub const DEFAULT_EXTENSIONS: &str = "ZIP|zip";

/// 提取选项
#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    pub overwrite: bool,
    pub junk_paths: bool,
    /// 某个条目失败后继续处理后面的条目
    pub keep_going: bool,
    /// 用归档中记录的时间设置文件修改时间
    pub restore_mtime: bool,
    pub write_buffer_size: usize,
    pub exdir: PathBuf,
    pub files: Option<Vec<String>>,
    pub archive: ArchiveOptions,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            junk_paths: false,
            keep_going: false,
            restore_mtime: true,
            write_buffer_size: WRITE_BUFFER_SIZE,
            exdir: PathBuf::from("."),
            files: None,
            archive: ArchiveOptions::default(),
        }
    }
}

/// ZIP Extractor
pub struct Extractor {
    zipfile: PathBuf,
    options: ExtractorOptions,
}

impl Extractor {
    pub fn new(zipfile: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            zipfile: zipfile.as_ref().to_path_buf(),
            options: ExtractorOptions::default(),
        })
    }

    pub fn with_options(zipfile: impl AsRef<Path>, options: ExtractorOptions) -> Self {
        Self {
            zipfile: zipfile.as_ref().to_path_buf(),
            options,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.options.overwrite = overwrite;
        self
    }

    pub fn junk_paths(mut self, junk_paths: bool) -> Self {
        self.options.junk_paths = junk_paths;
        self
    }

    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.options.keep_going = keep_going;
        self
    }

    pub fn restore_mtime(mut self, restore_mtime: bool) -> Self {
        self.options.restore_mtime = restore_mtime;
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.options.write_buffer_size = size.max(1);
        self
    }

    pub fn exdir(mut self, exdir: impl AsRef<Path>) -> Self {
        self.options.exdir = exdir.as_ref().to_path_buf();
        self
    }

    /// 只解压名字完全匹配的条目
    pub fn files(mut self, files: &[impl AsRef<str>]) -> Self {
        self.options.files = Some(files.iter().map(|f| f.as_ref().to_string()).collect());
        self
    }

    pub fn archive_options(mut self, archive: ArchiveOptions) -> Self {
        self.options.archive = archive;
        self
    }

    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    /// 执行提取
    pub fn extract(self) -> Result<()> {
        let mut archive = ZipArchive::open_with_options(&self.zipfile, self.options.archive)?;
        self.extract_from(&mut archive)
    }

    /// 从已经打开的归档提取
    pub fn extract_from<R: Read + Seek>(&self, archive: &mut ZipArchive<R>) -> Result<()> {
        create_dir(&self.options.exdir)?;

        let mut failed = Vec::new();
        let mut step = archive.go_to_first_file();
        loop {
            match step {
                Ok(()) => {}
                Err(ZipError::EndOfList) => break,
                Err(err) => {
                    error!(archive = %self.zipfile.display(), error = %err, "cannot read next entry");
                    return Err(err);
                }
            }

            let entry = archive.current_file_info()?.clone();
            if self.is_selected(&entry) {
                if let Err(err) = self.extract_current(archive, &entry) {
                    error!(entry = %entry.name(), error = %err, "extraction failed");
                    failed.push(entry.name().into_owned());
                    if !self.options.keep_going {
                        break;
                    }
                }
            }
            step = archive.go_to_next_file();
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ZipError::ExtractionFailed {
                archive: self.zipfile.clone(),
                failed,
            })
        }
    }

    /// 解压第一个扩展名匹配 `extensions` 的条目，返回写出的路径
    ///
    /// 没有匹配条目时返回 `None`。
    pub fn extract_first_supported(self, extensions: &str) -> Result<Option<PathBuf>> {
        let mut archive = ZipArchive::open_with_options(&self.zipfile, self.options.archive)?;
        let Some(entry) = first_supported_entry(&mut archive, extensions)? else {
            debug!(archive = %self.zipfile.display(), extensions, "no supported entry");
            return Ok(None);
        };
        create_dir(&self.options.exdir)?;
        let path = self.extract_current(&mut archive, &entry)?;
        Ok(Some(path))
    }

    fn is_selected(&self, entry: &CentralDirectoryEntry) -> bool {
        match &self.options.files {
            Some(files) => files.iter().any(|f| f.as_bytes() == entry.name.as_slice()),
            None => true,
        }
    }

    /// 条目在解压目录中的目标路径
    fn output_path(&self, entry: &CentralDirectoryEntry) -> Result<PathBuf> {
        let name = entry.name();
        let relative = sanitize_entry_name(&name)?;
        if self.options.junk_paths {
            if let Some(file_name) = relative.file_name() {
                return Ok(self.options.exdir.join(file_name));
            }
        }
        Ok(self.options.exdir.join(relative))
    }

    /// 解压当前条目
    fn extract_current<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        entry: &CentralDirectoryEntry,
    ) -> Result<PathBuf> {
        let output_path = self.output_path(entry)?;

        if entry.is_directory() {
            if !self.options.junk_paths {
                create_dir(&output_path)?;
            }
            return Ok(output_path);
        }

        if output_path.exists() && !self.options.overwrite {
            return Err(ZipError::OverwriteConflict {
                path: output_path,
                archive: self.zipfile.clone(),
            });
        }
        if let Some(parent) = output_path.parent() {
            create_dir(parent)?;
        }

        archive.open_current_file()?;
        info!("Extracting: {}", output_path.display());

        let copied = self.copy_current(archive, &output_path);
        let closed = archive.close_current_file();
        copied?;
        closed?;

        if self.options.restore_mtime {
            platform::restore_mtime(&output_path, &entry.modified())?;
        }
        Ok(output_path)
    }

    fn copy_current<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        output_path: &Path,
    ) -> Result<()> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(self.options.write_buffer_size)
            .map_err(|_| ZipError::OutOfMemory)?;
        buf.resize(self.options.write_buffer_size, 0);

        let file = File::create(output_path).map_err(|e| ZipError::file_write(output_path, e))?;
        let mut writer = BufWriter::new(file);
        loop {
            let n = archive.read_current_file(&mut buf)?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .map_err(|e| ZipError::file_write(output_path, e))?;
        }
        writer
            .flush()
            .map_err(|e| ZipError::file_write(output_path, e))
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| ZipError::CreateDirFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// 把条目名转成相对路径，拒绝绝对路径和 `..`
pub fn sanitize_entry_name(name: &str) -> Result<PathBuf> {
    let invalid = |reason: &str| ZipError::InvalidPath {
        path: name.to_string(),
        reason: reason.to_string(),
    };

    if name.starts_with('/') || name.starts_with('\\') {
        return Err(invalid("absolute path"));
    }

    let mut relative = PathBuf::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(invalid("path escapes the extraction directory")),
            _ => {
                let component = Path::new(part);
                if component
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
                {
                    return Err(invalid("absolute path"));
                }
                relative.push(component);
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(invalid("empty name"));
    }
    Ok(relative)
}

/// 扩展名是否在 `|` 分隔的列表中（不区分 ASCII 大小写）
pub fn extension_matches(name: &str, extensions: &str) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    if ext.contains('/') {
        return false;
    }
    extensions
        .split('|')
        .filter(|candidate| !candidate.is_empty())
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

/// 按中央目录顺序找到第一个扩展名匹配的文件条目，并把游标留在该条目上
///
/// 多个条目匹配时取第一个，不同打包工具写出的目录顺序可能不同。
/// 找不到时游标回到原位置。
pub fn first_supported_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    extensions: &str,
) -> Result<Option<CentralDirectoryEntry>> {
    let saved = archive.file_pos().ok();

    let mut step = archive.go_to_first_file();
    loop {
        match step {
            Ok(()) => {}
            Err(ZipError::EndOfList) => break,
            Err(err) => return Err(err),
        }
        let entry = archive.current_file_info()?;
        if !entry.is_directory() && extension_matches(&entry.name(), extensions) {
            return Ok(Some(entry.clone()));
        }
        step = archive.go_to_next_file();
    }

    if let Some(pos) = saved {
        archive.go_to_file_pos(pos)?;
    }
    Ok(None)
}
