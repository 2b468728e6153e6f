use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use time::{Date, Month, PrimitiveDateTime, Time};

use super::constants::MICROS_PER_SECOND;
use super::error::TimestampError;

static TIMESTAMP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{1,4}),\s*(\d{1,2}):(\d{1,2}):(\d{1,2})(?:\.(\d*))?$")
        .expect("timestamp pattern is valid")
});

/// A CFG start or trigger timestamp, decomposed into its calendar fields.
///
/// `total_microseconds` is the time of day in microseconds since midnight, which is what
/// the merger and the time axis reconstruction need. The calendar date is kept verbatim so
/// that an emitted CFG reproduces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComtradeTimestamp {
    pub day: u32,
    pub month: u32,
    pub year: i32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub microsecond: u32,
    pub total_microseconds: u64,
}

impl ComtradeTimestamp {
    pub fn new(
        day: u32,
        month: u32,
        year: i32,
        hour: u32,
        minute: u32,
        second: u32,
        microsecond: u32,
    ) -> Self {
        let total_microseconds = ((hour as u64 * 60 + minute as u64) * 60 + second as u64)
            * 1_000_000
            + microsecond as u64;
        Self {
            day,
            month,
            year,
            hour,
            minute,
            second,
            microsecond,
            total_microseconds,
        }
    }

    /// Years written with two digits are taken from the 1970-2069 window
    fn full_year(&self) -> i32 {
        match self.year {
            y if y >= 100 => y,
            y if y >= 70 => 1900 + y,
            y => 2000 + y,
        }
    }

    /// Convert to a calendar date and time. Fails if the fields do not describe a real date
    pub fn to_datetime(&self) -> Result<PrimitiveDateTime, TimestampError> {
        let out_of_range = || TimestampError::OutOfRange(self.format_cfg());
        let month = u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .ok_or_else(out_of_range)?;
        let day = u8::try_from(self.day).map_err(|_| out_of_range())?;
        let date =
            Date::from_calendar_date(self.full_year(), month, day).map_err(|_| out_of_range())?;
        let time = Time::from_hms_micro(
            self.hour as u8,
            self.minute as u8,
            self.second as u8,
            self.microsecond,
        )
        .map_err(|_| out_of_range())?;
        Ok(PrimitiveDateTime::new(date, time))
    }

    /// Seconds on a common axis for ordering recordings.
    ///
    /// Uses the Unix epoch when the date is valid. Recorders which leave the date zeroed
    /// fall back to the time of day so that they can still be ordered among themselves.
    pub fn epoch_seconds(&self) -> f64 {
        match self.to_datetime() {
            Ok(dt) => {
                let utc = dt.assume_utc();
                utc.unix_timestamp() as f64 + utc.microsecond() as f64 / MICROS_PER_SECOND
            }
            Err(_) => self.total_microseconds as f64 / MICROS_PER_SECOND,
        }
    }

    /// Shift by a (non-negative) number of microseconds, carrying into the calendar date
    pub fn offset_by_micros(&self, micros: u64) -> Result<PrimitiveDateTime, TimestampError> {
        let base = self.to_datetime()?;
        Ok(base + time::Duration::microseconds(micros as i64))
    }

    /// The `D/M/Y,H:M:S.micro` form written into CFG files
    pub fn format_cfg(&self) -> String {
        format!(
            "{:02}/{:02}/{:04},{:02}:{:02}:{:02}.{:06}",
            self.day, self.month, self.year, self.hour, self.minute, self.second, self.microsecond
        )
    }

    /// ISO 8601 form, falling back to the CFG form for invalid dates
    pub fn format_iso(&self) -> String {
        match self.to_datetime() {
            Ok(dt) => format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}",
                dt.year(),
                dt.month() as u8,
                dt.day(),
                dt.hour(),
                dt.minute(),
                dt.second(),
                dt.microsecond()
            ),
            Err(_) => self.format_cfg(),
        }
    }
}

impl FromStr for ComtradeTimestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad_format = || TimestampError::BadFormat(s.to_string());
        let caps = TIMESTAMP_PATTERN.captures(s.trim()).ok_or_else(bad_format)?;
        let field = |i: usize| -> Result<u32, TimestampError> {
            caps.get(i)
                .map_or("0", |m| m.as_str())
                .parse::<u32>()
                .map_err(|_| bad_format())
        };

        // Fractional seconds are right padded to microseconds; finer digits are dropped
        let micro_digits = caps.get(7).map_or("", |m| m.as_str());
        let mut padded: String = micro_digits.chars().take(6).collect();
        while padded.len() < 6 {
            padded.push('0');
        }
        let microsecond = padded.parse::<u32>().map_err(|_| bad_format())?;

        Ok(Self::new(
            field(1)?,
            field(2)?,
            field(3)? as i32,
            field(4)?,
            field(5)?,
            field(6)?,
            microsecond,
        ))
    }
}

impl fmt::Display for ComtradeTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_cfg())
    }
}
