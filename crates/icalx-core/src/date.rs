use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::DateError;

const DATE_TIME_FORMAT: &str = "YYYYMMDDTHHMMSSZ";
const DATE_FORMAT: &str = "YYYYMMDD";

/// Source of UTC offsets for named timezones.
///
/// The offset must be the one in effect on `date` in `timezone`, so that
/// dates on either side of a DST change resolve differently.
pub trait OffsetSource {
    fn offset_minutes(&self, timezone: &str, date: NaiveDate) -> Result<i32, DateError>;
}

impl<F> OffsetSource for F
where
    F: Fn(&str, NaiveDate) -> Result<i32, DateError>,
{
    fn offset_minutes(&self, timezone: &str, date: NaiveDate) -> Result<i32, DateError> {
        self(timezone, date)
    }
}

/// Offsets from the IANA database bundled with `chrono-tz`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TzDatabase;

impl OffsetSource for TzDatabase {
    fn offset_minutes(&self, timezone: &str, date: NaiveDate) -> Result<i32, DateError> {
        let tz = timezone
            .parse::<Tz>()
            .map_err(|_| DateError::UnknownTimezone(timezone.to_string()))?;

        let midnight = date.and_time(NaiveTime::MIN);
        let offset = match tz.offset_from_local_datetime(&midnight) {
            LocalResult::Single(offset) => offset,
            LocalResult::Ambiguous(earliest, _) => earliest,
            // midnight skipped by a DST gap: use the offset before the jump
            LocalResult::None => tz.offset_from_utc_datetime(&(midnight - TimeDelta::days(1))),
        };

        Ok(offset.fix().local_minus_utc() / 60)
    }
}

/// Parses `YYYYMMDDTHHMMSSZ` into a UTC instant.
pub fn parse_date_time(text: &str) -> Result<DateTime<Utc>, DateError> {
    let invalid = || DateError::InvalidFormat {
        input: text.to_string(),
        expected: DATE_TIME_FORMAT,
    };

    let bytes = text.as_bytes();
    if bytes.len() != 16 || bytes[8] != b'T' || bytes[15] != b'Z' {
        return Err(invalid());
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 8 && *i != 15)
        .all(|(_, b)| b.is_ascii_digit());
    if !digits_ok {
        return Err(invalid());
    }

    let date = naive_date(&text[..8]).ok_or_else(invalid)?;
    let time = NaiveTime::from_hms_opt(
        number(&text[9..11]),
        number(&text[11..13]),
        number(&text[13..15]),
    )
    .ok_or_else(invalid)?;

    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

/// Parses `YYYYMMDD` without resolving it to an instant.
pub fn parse_calendar_date(text: &str) -> Result<NaiveDate, DateError> {
    let invalid = || DateError::InvalidFormat {
        input: text.to_string(),
        expected: DATE_FORMAT,
    };

    if text.len() != 8 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    naive_date(text).ok_or_else(invalid)
}

/// Parses `YYYYMMDD` as midnight of that date in `timezone`.
pub fn parse_date_only(
    text: &str,
    timezone: &str,
    offsets: &dyn OffsetSource,
) -> Result<DateTime<Utc>, DateError> {
    let date = parse_calendar_date(text)?;
    local_midnight(date, timezone, offsets)
}

/// UTC instant of local midnight of `date` in `timezone`.
pub fn local_midnight(
    date: NaiveDate,
    timezone: &str,
    offsets: &dyn OffsetSource,
) -> Result<DateTime<Utc>, DateError> {
    let offset = offsets.offset_minutes(timezone, date)?;
    let midnight = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    midnight
        .checked_sub_signed(TimeDelta::minutes(i64::from(offset)))
        .ok_or_else(|| DateError::OutOfRange(date.to_string()))
}

/// An RFC 5545 duration, split into nominal days and exact seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IcalDuration {
    pub negative: bool,
    /// Weeks and days; follow the calendar across DST changes.
    pub days: u64,
    /// Hours, minutes and seconds.
    pub seconds: u64,
}

impl IcalDuration {
    pub fn is_whole_days(&self) -> bool {
        self.seconds == 0
    }

    /// The duration as exact elapsed time, a day counted as 24 hours.
    pub fn exact(&self) -> Option<TimeDelta> {
        let total = self.days.checked_mul(86_400)?.checked_add(self.seconds)?;
        let delta = TimeDelta::try_seconds(i64::try_from(total).ok()?)?;
        Some(if self.negative { -delta } else { delta })
    }

    pub fn add_to_instant(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        start.checked_add_signed(self.exact()?)
    }

    /// Applies the duration to local midnight of `date` in `timezone`:
    /// days move the calendar date, the remainder is added as elapsed time.
    pub fn add_to_local_date(
        &self,
        date: NaiveDate,
        timezone: &str,
        offsets: &dyn OffsetSource,
    ) -> Result<DateTime<Utc>, DateError> {
        let out_of_range = || DateError::OutOfRange(date.to_string());

        let days = Days::new(self.days);
        let shifted = if self.negative {
            date.checked_sub_days(days)
        } else {
            date.checked_add_days(days)
        }
        .ok_or_else(out_of_range)?;

        let midnight = local_midnight(shifted, timezone, offsets)?;
        let seconds = TimeDelta::try_seconds(i64::try_from(self.seconds).map_err(|_| out_of_range())?)
            .ok_or_else(out_of_range)?;
        let seconds = if self.negative { -seconds } else { seconds };
        midnight.checked_add_signed(seconds).ok_or_else(out_of_range)
    }
}

/// Parses an RFC 5545 `dur-value`, e.g. `PT1H30M`, `P1D`, `-P2W`.
pub fn parse_duration(text: &str) -> Result<IcalDuration, DateError> {
    let invalid = || DateError::InvalidDuration(text.to_string());

    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let rest = rest.strip_prefix('P').ok_or_else(invalid)?;

    let mut out = IcalDuration {
        negative,
        ..IcalDuration::default()
    };
    let mut cursor = DurationCursor { rest };

    if rest.is_empty() {
        return Err(invalid());
    }

    if !rest.starts_with('T') {
        let (amount, unit) = cursor.next_component().ok_or_else(invalid)?;
        match unit {
            'W' => {
                out.days = amount.checked_mul(7).ok_or_else(invalid)?;
                return if cursor.rest.is_empty() { Ok(out) } else { Err(invalid()) };
            }
            'D' => out.days = amount,
            _ => return Err(invalid()),
        }
    }

    if cursor.rest.is_empty() {
        return Ok(out);
    }

    cursor.rest = cursor.rest.strip_prefix('T').ok_or_else(invalid)?;
    if cursor.rest.is_empty() {
        return Err(invalid());
    }

    // H, M and S must appear in this order, each at most once
    let mut allowed = ['H', 'M', 'S'].as_slice();
    while !cursor.rest.is_empty() {
        let (amount, unit) = cursor.next_component().ok_or_else(invalid)?;
        let position = allowed.iter().position(|u| *u == unit).ok_or_else(invalid)?;
        allowed = &allowed[position + 1..];

        let factor = match unit {
            'H' => 3_600,
            'M' => 60,
            _ => 1,
        };
        let seconds = amount.checked_mul(factor).ok_or_else(invalid)?;
        out.seconds = out.seconds.checked_add(seconds).ok_or_else(invalid)?;
    }

    Ok(out)
}

struct DurationCursor<'a> {
    rest: &'a str,
}

impl DurationCursor<'_> {
    /// Reads `<digits><unit>`.
    fn next_component(&mut self) -> Option<(u64, char)> {
        let digits = self.rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let amount = self.rest[..digits].parse::<u64>().ok()?;
        let unit = self.rest[digits..].chars().next()?;
        self.rest = &self.rest[digits + unit.len_utf8()..];
        Some((amount, unit))
    }
}

fn naive_date(digits: &str) -> Option<NaiveDate> {
    let year = digits[..4].parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, number(&digits[4..6]), number(&digits[6..8]))
}

fn number(digits: &str) -> u32 {
    digits.bytes().fold(0, |acc, b| acc * 10 + u32::from(b - b'0'))
}
