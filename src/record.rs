//! Decoding of raw version-2 USN journal records.
//!
//! The journal and MFT-enumeration control codes both return a byte buffer
//! containing a sequence of variable-length `USN_RECORD_V2` structures. This
//! module is the single place those bytes are interpreted: [`decode_record`]
//! takes a buffer and an offset and returns a structured [`UsnRecord`] plus
//! the record length, or a decode error. No raw-pointer work is involved; the
//! native call sites hand the buffer over as a plain slice.

use crate::errors::JournalError;
use crate::{Usn, time};
use std::time::SystemTime;

/// USN record reason flags, as defined in `winioctl.h`.
pub mod reason {
    pub const USN_REASON_DATA_OVERWRITE: u32 = 0x0000_0001;
    pub const USN_REASON_DATA_EXTEND: u32 = 0x0000_0002;
    pub const USN_REASON_DATA_TRUNCATION: u32 = 0x0000_0004;
    pub const USN_REASON_NAMED_DATA_OVERWRITE: u32 = 0x0000_0010;
    pub const USN_REASON_NAMED_DATA_EXTEND: u32 = 0x0000_0020;
    pub const USN_REASON_NAMED_DATA_TRUNCATION: u32 = 0x0000_0040;
    pub const USN_REASON_FILE_CREATE: u32 = 0x0000_0100;
    pub const USN_REASON_FILE_DELETE: u32 = 0x0000_0200;
    pub const USN_REASON_EA_CHANGE: u32 = 0x0000_0400;
    pub const USN_REASON_SECURITY_CHANGE: u32 = 0x0000_0800;
    pub const USN_REASON_RENAME_OLD_NAME: u32 = 0x0000_1000;
    pub const USN_REASON_RENAME_NEW_NAME: u32 = 0x0000_2000;
    pub const USN_REASON_INDEXABLE_CHANGE: u32 = 0x0000_4000;
    pub const USN_REASON_BASIC_INFO_CHANGE: u32 = 0x0000_8000;
    pub const USN_REASON_HARD_LINK_CHANGE: u32 = 0x0001_0000;
    pub const USN_REASON_COMPRESSION_CHANGE: u32 = 0x0002_0000;
    pub const USN_REASON_ENCRYPTION_CHANGE: u32 = 0x0004_0000;
    pub const USN_REASON_OBJECT_ID_CHANGE: u32 = 0x0008_0000;
    pub const USN_REASON_REPARSE_POINT_CHANGE: u32 = 0x0010_0000;
    pub const USN_REASON_STREAM_CHANGE: u32 = 0x0020_0000;
    pub const USN_REASON_TRANSACTED_CHANGE: u32 = 0x0040_0000;
    pub const USN_REASON_INTEGRITY_CHANGE: u32 = 0x0080_0000;
    pub const USN_REASON_DESIRED_STORAGE_CLASS_CHANGE: u32 = 0x0100_0000;
    pub const USN_REASON_CLOSE: u32 = 0x8000_0000;
}

/// File attribute flags carried by a record.
pub mod attr {
    pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x0000_0002;
    pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
}

/// The reasons a backup run cares about: content, metadata and namespace
/// changes, without the pure bookkeeping flags.
pub const DEFAULT_REASON_MASK: u32 = reason::USN_REASON_BASIC_INFO_CHANGE
    | reason::USN_REASON_DATA_EXTEND
    | reason::USN_REASON_DATA_OVERWRITE
    | reason::USN_REASON_DATA_TRUNCATION
    | reason::USN_REASON_EA_CHANGE
    | reason::USN_REASON_FILE_CREATE
    | reason::USN_REASON_FILE_DELETE
    | reason::USN_REASON_HARD_LINK_CHANGE
    | reason::USN_REASON_NAMED_DATA_EXTEND
    | reason::USN_REASON_NAMED_DATA_OVERWRITE
    | reason::USN_REASON_NAMED_DATA_TRUNCATION
    | reason::USN_REASON_RENAME_NEW_NAME
    | reason::USN_REASON_RENAME_OLD_NAME
    | reason::USN_REASON_REPARSE_POINT_CHANGE
    | reason::USN_REASON_SECURITY_CHANGE
    | reason::USN_REASON_STREAM_CHANGE;

/// Fixed part of a version-2 record: everything up to and including the
/// filename length/offset fields.
const FIXED_HEADER_LEN: usize = 60;

const SUPPORTED_MAJOR_VERSION: u16 = 2;

/// Net classification of a record's reason bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Deleted,
    RenamedFrom,
    RenamedTo,
    Modified,
}

/// One decoded journal record. Immutable after decode.
///
/// Two records may share the same `fid`: they describe the history of one
/// filesystem object over time, and `usn` is the only total order among them.
#[derive(Debug, Clone, PartialEq)]
pub struct UsnRecord {
    pub usn: Usn,
    pub timestamp: SystemTime,
    /// File reference number: volume-unique, stable across renames, not
    /// stable across delete + recreate.
    pub fid: u64,
    pub parent_fid: u64,
    pub reason: u32,
    pub source_info: u32,
    pub security_id: u32,
    pub attributes: u32,
    pub file_name: String,
}

impl UsnRecord {
    /// Returns true if this record describes a directory.
    pub fn is_dir(&self) -> bool {
        self.attributes & attr::FILE_ATTRIBUTE_DIRECTORY != 0
    }

    /// Returns true if this record describes a hidden file or directory.
    pub fn is_hidden(&self) -> bool {
        self.attributes & attr::FILE_ATTRIBUTE_HIDDEN != 0
    }

    /// Collapses the reason bitmask into the dominant change classification.
    pub fn change_kind(&self) -> ChangeKind {
        if self.reason & reason::USN_REASON_FILE_CREATE != 0 {
            ChangeKind::Created
        } else if self.reason & reason::USN_REASON_FILE_DELETE != 0 {
            ChangeKind::Deleted
        } else if self.reason & reason::USN_REASON_RENAME_OLD_NAME != 0 {
            ChangeKind::RenamedFrom
        } else if self.reason & reason::USN_REASON_RENAME_NEW_NAME != 0 {
            ChangeKind::RenamedTo
        } else {
            ChangeKind::Modified
        }
    }

    /// Converts the reason bitmask to a human-readable string.
    pub fn reason_to_string(&self) -> String {
        let names: Vec<&str> = REASON_NAMES
            .iter()
            .filter(|(flag, _)| self.reason & flag != 0)
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            "UNKNOWN".to_string()
        } else {
            names.join(" | ")
        }
    }
}

const REASON_NAMES: &[(u32, &str)] = &[
    (reason::USN_REASON_DATA_OVERWRITE, "DATA_OVERWRITE"),
    (reason::USN_REASON_DATA_EXTEND, "DATA_EXTEND"),
    (reason::USN_REASON_DATA_TRUNCATION, "DATA_TRUNCATION"),
    (reason::USN_REASON_NAMED_DATA_OVERWRITE, "NAMED_DATA_OVERWRITE"),
    (reason::USN_REASON_NAMED_DATA_EXTEND, "NAMED_DATA_EXTEND"),
    (reason::USN_REASON_NAMED_DATA_TRUNCATION, "NAMED_DATA_TRUNCATION"),
    (reason::USN_REASON_FILE_CREATE, "FILE_CREATE"),
    (reason::USN_REASON_FILE_DELETE, "FILE_DELETE"),
    (reason::USN_REASON_EA_CHANGE, "EA_CHANGE"),
    (reason::USN_REASON_SECURITY_CHANGE, "SECURITY_CHANGE"),
    (reason::USN_REASON_RENAME_OLD_NAME, "RENAME_OLD_NAME"),
    (reason::USN_REASON_RENAME_NEW_NAME, "RENAME_NEW_NAME"),
    (reason::USN_REASON_INDEXABLE_CHANGE, "INDEXABLE_CHANGE"),
    (reason::USN_REASON_BASIC_INFO_CHANGE, "BASIC_INFO_CHANGE"),
    (reason::USN_REASON_HARD_LINK_CHANGE, "HARD_LINK_CHANGE"),
    (reason::USN_REASON_COMPRESSION_CHANGE, "COMPRESSION_CHANGE"),
    (reason::USN_REASON_ENCRYPTION_CHANGE, "ENCRYPTION_CHANGE"),
    (reason::USN_REASON_OBJECT_ID_CHANGE, "OBJECT_ID_CHANGE"),
    (reason::USN_REASON_REPARSE_POINT_CHANGE, "REPARSE_POINT_CHANGE"),
    (reason::USN_REASON_STREAM_CHANGE, "STREAM_CHANGE"),
    (reason::USN_REASON_TRANSACTED_CHANGE, "TRANSACTED_CHANGE"),
    (reason::USN_REASON_INTEGRITY_CHANGE, "INTEGRITY_CHANGE"),
    (
        reason::USN_REASON_DESIRED_STORAGE_CLASS_CHANGE,
        "DESIRED_STORAGE_CLASS_CHANGE",
    ),
    (reason::USN_REASON_CLOSE, "CLOSE"),
];

/// Decode one record starting at `offset` within `buf`.
///
/// Returns the record and its total length, so callers can advance to the
/// next record in the buffer. Only major version 2 is accepted; any other
/// version is a hard error, since silently misreading the layout would
/// corrupt every path derived downstream.
///
/// The filename length/offset fields are relative to the record's own start,
/// never to the buffer start.
/// <https://learn.microsoft.com/en-us/windows/win32/api/winioctl/ns-winioctl-usn_record_v2>
pub fn decode_record(buf: &[u8], offset: usize) -> Result<(UsnRecord, u32), JournalError> {
    let rec = buf
        .get(offset..)
        .filter(|r| r.len() >= FIXED_HEADER_LEN)
        .ok_or_else(|| {
            JournalError::Decode(format!(
                "record at offset {offset} is truncated (buffer holds {} bytes)",
                buf.len()
            ))
        })?;

    let record_length = read_u32(rec, 0);
    if (record_length as usize) < FIXED_HEADER_LEN || record_length as usize > rec.len() {
        return Err(JournalError::Decode(format!(
            "record length {record_length} at offset {offset} does not fit the buffer"
        )));
    }
    let rec = &rec[..record_length as usize];

    let major = read_u16(rec, 4);
    let minor = read_u16(rec, 6);
    if major != SUPPORTED_MAJOR_VERSION {
        return Err(JournalError::UnsupportedRecordVersion { major, minor });
    }

    let name_length = read_u16(rec, 56) as usize;
    let name_offset = read_u16(rec, 58) as usize;
    if name_length % 2 != 0 {
        return Err(JournalError::Decode(format!(
            "odd UTF-16 filename length {name_length}"
        )));
    }
    let name_bytes = rec
        .get(name_offset..name_offset + name_length)
        .ok_or_else(|| {
            JournalError::Decode(format!(
                "filename range {name_offset}..{} escapes the record",
                name_offset + name_length
            ))
        })?;
    let name_units: Vec<u16> = name_bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let file_name = String::from_utf16_lossy(&name_units);

    let record = UsnRecord {
        usn: read_i64(rec, 24),
        timestamp: time::filetime_to_systemtime(read_i64(rec, 32)),
        fid: read_u64(rec, 8),
        parent_fid: read_u64(rec, 16),
        reason: read_u32(rec, 40),
        source_info: read_u32(rec, 44),
        security_id: read_u32(rec, 48),
        attributes: read_u32(rec, 52),
        file_name,
    };

    Ok((record, record_length))
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_i64(buf: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    i64::from_le_bytes(bytes)
}
