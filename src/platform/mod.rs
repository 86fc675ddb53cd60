//! Platform file-time support
//!
//! Extracted files get the modification time recorded in the archive. The
//! standard library cannot set mtimes on every supported toolchain, so each OS
//! goes through its native call.

use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, ZipError};
use crate::unzip::DosDateTime;

/// File time operations
pub trait Platform {
    /// Get file modification time
    fn get_mtime(&self, path: &Path) -> io::Result<SystemTime>;

    /// Set file modification (and access) time
    fn set_mtime(&self, path: &Path, mtime: SystemTime) -> io::Result<()>;
}

fn since_epoch(mtime: SystemTime) -> io::Result<std::time::Duration> {
    mtime
        .duration_since(UNIX_EPOCH)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "mtime before epoch"))
}

#[cfg(unix)]
pub struct UnixPlatform;

#[cfg(unix)]
impl Platform for UnixPlatform {
    fn get_mtime(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }

    fn set_mtime(&self, path: &Path, mtime: SystemTime) -> io::Result<()> {
        use std::os::unix::ffi::OsStrExt;

        let duration = since_epoch(mtime)?;
        let stamp = libc::timeval {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_usec: duration.subsec_micros() as libc::suseconds_t,
        };
        let times = [stamp, stamp];
        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        let ret = unsafe { libc::utimes(c_path.as_ptr(), times.as_ptr()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(windows)]
pub struct WindowsPlatform;

#[cfg(windows)]
impl Platform for WindowsPlatform {
    fn get_mtime(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }

    fn set_mtime(&self, path: &Path, mtime: SystemTime) -> io::Result<()> {
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Foundation::{CloseHandle, FILETIME, HANDLE, INVALID_HANDLE_VALUE};
        use windows_sys::Win32::Storage::FileSystem::{
            CreateFileW, SetFileTime, FILE_ATTRIBUTE_NORMAL, FILE_FLAG_BACKUP_SEMANTICS,
            FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
        };

        // 100ns ticks since 1601-01-01
        const EPOCH_DIFFERENCE: u64 = 11_644_473_600 * 10_000_000;
        const GENERIC_WRITE: u32 = 0x4000_0000;

        let duration = since_epoch(mtime)?;
        let ticks = duration
            .as_secs()
            .checked_mul(10_000_000)
            .and_then(|t| t.checked_add(u64::from(duration.subsec_nanos()) / 100))
            .and_then(|t| t.checked_add(EPOCH_DIFFERENCE))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "mtime overflow"))?;
        let filetime = FILETIME {
            dwLowDateTime: ticks as u32,
            dwHighDateTime: (ticks >> 32) as u32,
        };

        let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
        wide.push(0);

        let handle: HANDLE = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                std::ptr::null(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL | FILE_FLAG_BACKUP_SEMANTICS,
                0,
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }

        let ok = unsafe { SetFileTime(handle, std::ptr::null(), &filetime, &filetime) };
        unsafe { CloseHandle(handle) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
pub struct GenericPlatform;

#[cfg(not(any(unix, windows)))]
impl Platform for GenericPlatform {
    fn get_mtime(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }

    fn set_mtime(&self, _path: &Path, _mtime: SystemTime) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "setting mtime is not supported on this platform",
        ))
    }
}

/// Get the platform implementation for the current OS
pub fn current_platform() -> &'static impl Platform {
    #[cfg(unix)]
    {
        static PLATFORM: UnixPlatform = UnixPlatform;
        &PLATFORM
    }

    #[cfg(windows)]
    {
        static PLATFORM: WindowsPlatform = WindowsPlatform;
        &PLATFORM
    }

    #[cfg(not(any(unix, windows)))]
    {
        static PLATFORM: GenericPlatform = GenericPlatform;
        &PLATFORM
    }
}

/// Apply an entry's DOS timestamp to an extracted file
///
/// Dates the DOS fields cannot represent are skipped silently.
pub fn restore_mtime(path: &Path, modified: &DosDateTime) -> Result<()> {
    let Some(mtime) = modified.to_system_time() else {
        return Ok(());
    };
    current_platform()
        .set_mtime(path, mtime)
        .map_err(|source| ZipError::SetMtimeFailed {
            path: path.to_path_buf(),
            source,
        })
}
