//! File timestamps.
//!
//! Archive formats record time in several incompatible encodings: 7z stores
//! Windows FILETIME values, zip and VDF store packed MS-DOS date/time words,
//! ISO9660 stores a seven-byte calendar record and HOG2 stores Unix seconds.
//! [`Timestamp`] normalizes all of them to a single FILETIME-based value.
//!
//! # Example
//!
//! ```rust
//! use packfs::Timestamp;
//!
//! // 2021-06-15 13:45:30 as MS-DOS date and time words
//! let date = ((2021 - 1980) << 9) | (6 << 5) | 15;
//! let time = (13 << 11) | (45 << 5) | (30 / 2);
//! let ts = Timestamp::from_dos_datetime(date, time).unwrap();
//! assert_eq!(ts.as_unix_secs(), 1623764730);
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Windows FILETIME epoch: January 1, 1601 (UTC)
/// Difference from Unix epoch (January 1, 1970) in 100-nanosecond intervals.
const FILETIME_UNIX_DIFF: u64 = 116444736000000000;

/// Number of 100-nanosecond intervals per second.
const INTERVALS_PER_SECOND: u64 = 10_000_000;

/// A file timestamp with 100-nanosecond precision.
///
/// Wraps a Windows FILETIME value (100-nanosecond intervals since January 1,
/// 1601 UTC), the finest resolution any supported format records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    filetime: u64,
}

impl Timestamp {
    /// Creates a timestamp from a raw Windows FILETIME value.
    #[inline]
    pub const fn from_filetime(filetime: u64) -> Self {
        Self { filetime }
    }

    /// Creates a timestamp from Unix seconds (since January 1, 1970).
    ///
    /// Returns `None` if the timestamp would overflow.
    pub fn from_unix_secs(secs: i64) -> Option<Self> {
        let intervals = secs.unsigned_abs().checked_mul(INTERVALS_PER_SECOND)?;
        if secs < 0 {
            FILETIME_UNIX_DIFF.checked_sub(intervals).map(Self::from_filetime)
        } else {
            FILETIME_UNIX_DIFF.checked_add(intervals).map(Self::from_filetime)
        }
    }

    /// Creates a timestamp from a `SystemTime`.
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        match time.duration_since(UNIX_EPOCH) {
            Ok(duration) => {
                let base = Self::from_unix_secs(i64::try_from(duration.as_secs()).ok()?)?;
                base.filetime
                    .checked_add(u64::from(duration.subsec_nanos()) / 100)
                    .map(Self::from_filetime)
            }
            Err(e) => {
                let duration = e.duration();
                let intervals = duration
                    .as_secs()
                    .checked_mul(INTERVALS_PER_SECOND)?
                    .checked_add(u64::from(duration.subsec_nanos()) / 100)?;
                FILETIME_UNIX_DIFF.checked_sub(intervals).map(Self::from_filetime)
            }
        }
    }

    /// Decodes a packed MS-DOS date and time.
    ///
    /// Date: bits 15-9 year since 1980, 8-5 month, 4-0 day.
    /// Time: bits 15-11 hour, 10-5 minute, 4-0 seconds divided by two.
    /// Returns `None` for out-of-range fields (month 0, day 0, hour 24, ...).
    pub fn from_dos_datetime(date: u16, time: u16) -> Option<Self> {
        let year = 1980 + i64::from(date >> 9);
        let month = u32::from((date >> 5) & 0x0F);
        let day = u32::from(date & 0x1F);
        let hour = u32::from(time >> 11);
        let minute = u32::from((time >> 5) & 0x3F);
        let second = u32::from(time & 0x1F) * 2;
        Self::from_civil(year, month, day, hour, minute, second, 0)
    }

    /// Decodes a packed 32-bit MS-DOS timestamp (date in the high word).
    pub fn from_dos_u32(value: u32) -> Option<Self> {
        Self::from_dos_datetime((value >> 16) as u16, value as u16)
    }

    /// Decodes an ISO9660 seven-byte directory record date.
    ///
    /// Bytes: years since 1900, month, day, hour, minute, second, and the
    /// offset from GMT in 15-minute intervals (signed).
    pub fn from_iso9660(record: &[u8; 7]) -> Option<Self> {
        let offset_minutes = i64::from(record[6] as i8) * 15;
        Self::from_civil(
            1900 + i64::from(record[0]),
            u32::from(record[1]),
            u32::from(record[2]),
            u32::from(record[3]),
            u32::from(record[4]),
            u32::from(record[5]),
            offset_minutes,
        )
    }

    /// Builds a timestamp from calendar fields in the proleptic Gregorian
    /// calendar. `offset_minutes` is the local offset east of UTC.
    fn from_civil(
        year: i64,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        offset_minutes: i64,
    ) -> Option<Self> {
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }
        if hour > 23 || minute > 59 || second > 60 {
            return None;
        }
        let days = days_from_civil(year, month, day);
        let secs = days * 86_400
            + i64::from(hour) * 3600
            + i64::from(minute) * 60
            + i64::from(second)
            - offset_minutes * 60;
        Self::from_unix_secs(secs)
    }

    /// Returns the raw Windows FILETIME value.
    #[inline]
    pub const fn as_filetime(&self) -> u64 {
        self.filetime
    }

    /// Returns the timestamp as Unix seconds.
    ///
    /// Sub-second precision is truncated towards negative infinity.
    pub fn as_unix_secs(&self) -> i64 {
        if self.filetime >= FILETIME_UNIX_DIFF {
            ((self.filetime - FILETIME_UNIX_DIFF) / INTERVALS_PER_SECOND) as i64
        } else {
            let intervals = FILETIME_UNIX_DIFF - self.filetime;
            -(intervals.div_ceil(INTERVALS_PER_SECOND) as i64)
        }
    }

    /// Returns the sub-second portion as nanoseconds (always a multiple of 100).
    #[inline]
    pub fn sub_second_nanos(&self) -> u32 {
        ((self.filetime % INTERVALS_PER_SECOND) * 100) as u32
    }

    /// Converts to a `SystemTime`, keeping the full 100ns precision.
    pub fn as_system_time(&self) -> SystemTime {
        let (intervals, after) = if self.filetime >= FILETIME_UNIX_DIFF {
            (self.filetime - FILETIME_UNIX_DIFF, true)
        } else {
            (FILETIME_UNIX_DIFF - self.filetime, false)
        };
        let duration = Duration::new(
            intervals / INTERVALS_PER_SECOND,
            ((intervals % INTERVALS_PER_SECOND) * 100) as u32,
        );
        if after {
            UNIX_EPOCH + duration
        } else {
            UNIX_EPOCH - duration
        }
    }

    /// Converts to a [`filetime::FileTime`] for applying to host files.
    pub fn to_file_time(&self) -> filetime::FileTime {
        let nanos = if self.filetime >= FILETIME_UNIX_DIFF {
            self.sub_second_nanos()
        } else {
            // as_unix_secs rounds down, so the fraction counts up from it
            let rem = (FILETIME_UNIX_DIFF - self.filetime) % INTERVALS_PER_SECOND;
            if rem == 0 {
                0
            } else {
                ((INTERVALS_PER_SECOND - rem) * 100) as u32
            }
        };
        filetime::FileTime::from_unix_time(self.as_unix_secs(), nanos)
    }

    /// Converts from a [`filetime::FileTime`] read from host metadata.
    pub fn from_file_time(time: filetime::FileTime) -> Option<Self> {
        let base = Self::from_unix_secs(time.unix_seconds())?;
        base.filetime
            .checked_add(u64::from(time.nanoseconds()) / 100)
            .map(Self::from_filetime)
    }
}

/// Days since 1970-01-01 for a Gregorian calendar date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(month);
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

impl Default for Timestamp {
    /// Returns the Unix epoch (January 1, 1970).
    fn default() -> Self {
        Self::from_filetime(FILETIME_UNIX_DIFF)
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> SystemTime {
        ts.as_system_time()
    }
}
