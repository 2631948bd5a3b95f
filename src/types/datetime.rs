use crate::error::Error;
use derive_more::Display;
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// Precision carried by a [`DateTime`], encoded in the low 5 bits of the
/// wire options byte. Unrecognized (reserved) values decode as
/// [`Accuracy::Nanosecond`].
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    IntoPrimitive,
    FromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum Accuracy {
    #[num_enum(default)]
    #[display("nanosecond")]
    Nanosecond = 0,
    #[display("microsecond")]
    Microsecond = 1,
    #[display("millisecond")]
    Millisecond = 2,
    #[display("second")]
    Second = 3,
    #[display("minute")]
    Minute = 4,
    #[display("hour")]
    Hour = 5,
    #[display("day")]
    Day = 6,
    #[display("month")]
    Month = 7,
    #[display("year")]
    Year = 8,
    #[display("century")]
    Century = 9,
}

const OFFSET_PRESENT: u8 = 0x20;
const ACCURACY_MASK: u8 = 0x1F;
const MAX_OFFSET_QUARTER_HOURS: i32 = 96;

/// A point in time with explicit accuracy and an optional time zone offset
/// in 15-minute units.
///
/// The wire payload is 14 bytes: `u8 options, i8 offset, i64 seconds,
/// u32 nanos`, integers big-endian. `seconds` counts from the Unix epoch;
/// offset presence is carried only by the options flag, never inferred
/// from the offset value.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct DateTime {
    accuracy: Accuracy,
    offset_quarter_hours: Option<i8>,
    seconds: i64,
    nanos: u32,
}

impl DateTime {
    /// Seconds and nanoseconds since the epoch, nanosecond accuracy, no
    /// offset.
    pub fn from_epoch(seconds: i64, nanos: u32) -> Result<Self, Error> {
        if nanos >= NANOS_PER_SECOND {
            return Err(Error::InvalidNanos(nanos));
        }
        Ok(Self {
            accuracy: Accuracy::Nanosecond,
            offset_quarter_hours: None,
            seconds,
            nanos,
        })
    }

    /// A UTC civil date and time-of-day; carries an explicit zero offset.
    pub fn from_civil_utc(
        year: i64,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        nanos: u32,
    ) -> Result<Self, Error> {
        let dt = Self::from_civil(year, month, day, hour, minute, second, nanos)?;
        dt.with_offset_minutes(0)
    }

    /// A civil date and time-of-day with no offset.
    pub fn from_civil(
        year: i64,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        nanos: u32,
    ) -> Result<Self, Error> {
        let days = days_from_civil(year, month, day);
        let seconds = days * 86_400 + i64::from(hour) * 3_600 + i64::from(minute) * 60
            + i64::from(second);
        Self::from_epoch(seconds, nanos)
    }

    /// A civil date with day accuracy and no offset.
    pub fn from_ymd(year: i64, month: u32, day: u32) -> Self {
        Self {
            accuracy: Accuracy::Day,
            offset_quarter_hours: None,
            seconds: days_from_civil(year, month, day) * 86_400,
            nanos: 0,
        }
    }

    pub fn with_accuracy(mut self, accuracy: Accuracy) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Attach a time zone offset. The offset must be a whole number of
    /// 15-minute units within +/-24 hours; zero is a valid, explicit
    /// "UTC with offset".
    pub fn with_offset_minutes(mut self, minutes: i32) -> Result<Self, Error> {
        if minutes % 15 != 0 {
            return Err(Error::InvalidTimeZoneOffset(minutes));
        }
        let quarters = minutes / 15;
        if quarters.abs() > MAX_OFFSET_QUARTER_HOURS {
            return Err(Error::TimeZoneOffsetOutOfRange(minutes));
        }
        self.offset_quarter_hours = Some(quarters as i8);
        Ok(self)
    }

    pub(crate) fn from_wire_parts(options: u8, offset: i8, seconds: i64, nanos: u32) -> Self {
        Self {
            accuracy: Accuracy::from(options & ACCURACY_MASK),
            offset_quarter_hours: (options & OFFSET_PRESENT != 0).then_some(offset),
            seconds,
            nanos: nanos % NANOS_PER_SECOND,
        }
    }

    pub(crate) fn wire_parts(&self) -> (u8, i8, i64, u32) {
        (
            self.options(),
            self.offset_quarter_hours.unwrap_or(0),
            self.seconds,
            self.nanos,
        )
    }

    /// The wire options byte: accuracy in the low 5 bits, 0x20 when an
    /// offset is present.
    pub fn options(&self) -> u8 {
        let mut options = u8::from(self.accuracy);
        if self.offset_quarter_hours.is_some() {
            options |= OFFSET_PRESENT;
        }
        options
    }

    pub fn accuracy(&self) -> Accuracy {
        self.accuracy
    }

    pub fn has_offset(&self) -> bool {
        self.offset_quarter_hours.is_some()
    }

    pub fn offset_minutes(&self) -> Option<i32> {
        self.offset_quarter_hours.map(|q| i32::from(q) * 15)
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    /// Nanoseconds since the epoch, widened so dates far outside the
    /// 1970 era cannot overflow.
    pub fn epoch_nanos(&self) -> i128 {
        i128::from(self.seconds) * i128::from(NANOS_PER_SECOND) + i128::from(self.nanos)
    }

    /// RFC 3339 rendering at this value's accuracy. Values with an offset
    /// render `Z` (zero) or `+/-HH:MM`; values without one render as a
    /// local timestamp.
    pub fn to_rfc3339(&self) -> String {
        // Shift into local civil time before splitting into fields
        let offset_seconds = i64::from(self.offset_minutes().unwrap_or(0)) * 60;
        let local = self.seconds + offset_seconds;
        let days = local.div_euclid(86_400);
        let tod = local.rem_euclid(86_400);
        let (year, month, day) = civil_from_days(days);
        let (hour, minute, second) = (tod / 3_600, (tod / 60) % 60, tod % 60);

        let mut out = match self.accuracy {
            Accuracy::Century | Accuracy::Year => format!("{year:04}"),
            Accuracy::Month => format!("{year:04}-{month:02}"),
            Accuracy::Day => format!("{year:04}-{month:02}-{day:02}"),
            Accuracy::Hour => format!("{year:04}-{month:02}-{day:02}T{hour:02}:00:00"),
            Accuracy::Minute => {
                format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:00")
            }
            Accuracy::Second => {
                format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}")
            }
            Accuracy::Millisecond => format!(
                "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{:03}",
                self.nanos / 1_000_000
            ),
            Accuracy::Microsecond => format!(
                "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{:06}",
                self.nanos / 1_000
            ),
            Accuracy::Nanosecond => format!(
                "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{:09}",
                self.nanos
            ),
        };

        if self.accuracy <= Accuracy::Hour {
            match self.offset_minutes() {
                Some(0) => out.push('Z'),
                Some(minutes) => {
                    let sign = if minutes < 0 { '-' } else { '+' };
                    let abs = minutes.abs();
                    out.push_str(&format!("{sign}{:02}:{:02}", abs / 60, abs % 60));
                }
                None => {}
            }
        }
        out
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

/// Days since 1970-01-01 for a proleptic Gregorian civil date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = i64::from(if month > 2 { month - 3 } else { month + 9 });
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date for days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if month <= 2 { y + 1 } else { y }, month, day)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn civil_round_trip() {
        for &(y, m, d) in &[
            (1970, 1, 1),
            (2000, 2, 29),
            (1930, 1, 5),
            (1, 1, 1),
            (9999, 12, 31),
        ] {
            let days = days_from_civil(y, m, d);
            assert_eq!(civil_from_days(days), (y, m, d));
        }
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(1970, 1, 2), 1);
        assert_eq!(days_from_civil(1969, 12, 31), -1);
    }

    #[test]
    fn utc_civil_construction() {
        let dt = DateTime::from_civil_utc(1930, 1, 5, 12, 35, 17, 456_000_000).unwrap();
        assert_eq!(dt.options(), 0x20);
        assert_eq!(dt.seconds(), -1_261_913_083);
        assert_eq!(dt.nanos(), 456_000_000);
        assert_eq!(dt.offset_minutes(), Some(0));
    }

    #[test]
    fn offset_must_be_quarter_hours() {
        let dt = DateTime::from_epoch(0, 0).unwrap();
        assert!(matches!(
            dt.with_offset_minutes(20),
            Err(Error::InvalidTimeZoneOffset(20))
        ));
        assert!(matches!(
            dt.with_offset_minutes(-7),
            Err(Error::InvalidTimeZoneOffset(-7))
        ));
        assert!(matches!(
            dt.with_offset_minutes(24 * 60 + 15),
            Err(Error::TimeZoneOffsetOutOfRange(_))
        ));
        assert!(dt.with_offset_minutes(-90).is_ok());
    }

    #[test]
    fn zero_offset_is_explicit() {
        let flagged = DateTime::from_epoch(0, 0)
            .unwrap()
            .with_offset_minutes(0)
            .unwrap();
        let unflagged = DateTime::from_epoch(0, 0).unwrap();
        assert_eq!(flagged.options(), 0x20);
        assert_eq!(unflagged.options(), 0x00);
        assert_ne!(flagged, unflagged);
    }

    #[test]
    fn rfc3339_negative_offset() {
        let dt = DateTime::from_civil(1930, 1, 5, 12, 35, 17, 0)
            .unwrap()
            .with_offset_minutes(-90)
            .unwrap()
            .with_accuracy(Accuracy::Second);
        assert_eq!(dt.to_rfc3339(), "1930-01-05T11:05:17-01:30");
    }

    #[test]
    fn rfc3339_accuracy_truncation() {
        let dt = DateTime::from_civil_utc(2001, 3, 4, 5, 6, 7, 123_456_789).unwrap();
        assert_eq!(dt.to_rfc3339(), "2001-03-04T05:06:07.123456789Z");
        assert_eq!(
            dt.with_accuracy(Accuracy::Millisecond).to_rfc3339(),
            "2001-03-04T05:06:07.123Z"
        );
        assert_eq!(
            dt.with_accuracy(Accuracy::Day).to_rfc3339(),
            "2001-03-04"
        );
        assert_eq!(dt.with_accuracy(Accuracy::Month).to_rfc3339(), "2001-03");
    }

    #[test]
    fn epoch_nanos_widens() {
        let dt = DateTime::from_civil(9999, 12, 31, 23, 59, 59, 999_999_999).unwrap();
        let nanos = dt.epoch_nanos();
        assert!(nanos > i128::from(i64::MAX));
    }

    #[test]
    fn wire_parts_round_trip() {
        let dt = DateTime::from_civil(1999, 6, 1, 0, 0, 30, 250_000_000)
            .unwrap()
            .with_offset_minutes(-90)
            .unwrap()
            .with_accuracy(Accuracy::Millisecond);
        let (options, offset, seconds, nanos) = dt.wire_parts();
        assert_eq!(options, 0x20 | 2);
        assert_eq!(offset, -6);
        assert_eq!(DateTime::from_wire_parts(options, offset, seconds, nanos), dt);
    }
}
