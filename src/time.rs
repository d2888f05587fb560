//! FILETIME conversion for record timestamps.

use chrono::DateTime;
use std::time::SystemTime;

/// 100-nanosecond intervals between the Windows epoch (1601-01-01) and the
/// Unix epoch (1970-01-01).
const EPOCH_DIFFERENCE_100NS: i64 = 116_444_736_000_000_000;

const INTERVALS_PER_SEC: i64 = 10_000_000;

/// Converts a Windows FILETIME (100-nanosecond intervals since 1601-01-01 UTC)
/// to a `std::time::SystemTime`. Out-of-range values clamp to the Unix epoch.
pub(crate) fn filetime_to_systemtime(filetime: i64) -> SystemTime {
    let since_unix = filetime - EPOCH_DIFFERENCE_100NS;
    let secs = since_unix.div_euclid(INTERVALS_PER_SEC);
    let nanos = (since_unix.rem_euclid(INTERVALS_PER_SEC) * 100) as u32;

    DateTime::from_timestamp(secs, nanos)
        .map(SystemTime::from)
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
