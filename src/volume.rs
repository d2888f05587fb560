//! Volume handle management.
//!
//! Opens the device handle used for all change-journal control operations on
//! one volume, and snapshots the root directory's file reference number, the
//! terminator of every ancestor climb. The handle is a scoped resource:
//! released on drop, including every early-exit path.

use crate::errors::JournalError;
use crate::privilege;
use log::{debug, warn};
use windows::{
    Win32::{
        Foundation::{CloseHandle, ERROR_ACCESS_DENIED, HANDLE},
        Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, CreateFileW, FILE_FLAG_BACKUP_SEMANTICS, FILE_GENERIC_READ,
            FILE_SHARE_READ, FILE_SHARE_WRITE, GetFileInformationByHandle, OPEN_EXISTING,
        },
    },
    core::HSTRING,
};

/// An open NTFS volume: device handle plus root-directory FRN.
#[derive(Debug)]
pub struct Volume {
    handle: HANDLE,
    root: String,
    root_fid: u64,
}

impl Volume {
    /// Opens the volume containing `volume_root` (e.g. `C:\`).
    ///
    /// Requires elevation; fails with [`JournalError::PermissionDenied`]
    /// otherwise.
    pub fn open(volume_root: &str) -> Result<Self, JournalError> {
        if !privilege::is_elevated()? {
            return Err(JournalError::PermissionDenied);
        }

        // https://learn.microsoft.com/en-us/windows/win32/fileio/obtaining-a-volume-handle-for-change-journal-operations
        // The device path for change-journal operations is \\.\X: where X is
        // the drive letter, without a trailing backslash.
        let device = format!(r"\\.\{}", volume_root.trim_end_matches('\\'));

        let handle = match unsafe {
            CreateFileW(
                &HSTRING::from(&device),
                FILE_GENERIC_READ.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS,
                None,
            )
        } {
            Ok(handle) => handle,
            Err(err) if err == ERROR_ACCESS_DENIED.into() => {
                return Err(JournalError::PermissionDenied);
            }
            Err(err) => {
                warn!("opening device {device} failed: {err}");
                return Err(err.into());
            }
        };

        let root_fid = match query_root_fid(volume_root) {
            Ok(fid) => fid,
            Err(err) => {
                unsafe {
                    let _ = CloseHandle(handle);
                }
                return Err(err);
            }
        };
        debug!("volume {volume_root}: root FRN {root_fid:#x}");

        Ok(Volume {
            handle,
            root: volume_root.to_string(),
            root_fid,
        })
    }

    pub(crate) fn handle(&self) -> HANDLE {
        self.handle
    }

    /// The volume root this handle was opened for, e.g. `C:\`.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// File reference number of the volume root directory.
    pub fn root_fid(&self) -> u64 {
        self.root_fid
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        if !self.handle.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }
}

/// Reads the root directory's file reference number via
/// `GetFileInformationByHandle` (FileIndexHigh/FileIndexLow form the FRN).
fn query_root_fid(volume_root: &str) -> Result<u64, JournalError> {
    let handle = unsafe {
        CreateFileW(
            &HSTRING::from(volume_root),
            FILE_GENERIC_READ.0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            // required to open a directory handle
            FILE_FLAG_BACKUP_SEMANTICS,
            None,
        )?
    };

    let mut info = BY_HANDLE_FILE_INFORMATION::default();
    let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
    unsafe {
        let _ = CloseHandle(handle);
    }
    result?;

    Ok(((info.nFileIndexHigh as u64) << 32) | info.nFileIndexLow as u64)
}
