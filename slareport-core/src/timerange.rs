//! Time ranges and calendar segmentation
//!
//! Global invariants enforced:
//! - Instants are civil timestamps with whole-second precision
//! - Periods produced for one range are contiguous, non-overlapping and ordered
//! - The last period always ends exactly at the range end

use crate::error::{ReportError, Result};
use chrono::{Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Civil timestamp format used for labels and backend queries
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Inclusive `[start, end]` range a report covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimerange")]
pub struct Timerange {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

#[derive(Deserialize)]
struct RawTimerange {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl TryFrom<RawTimerange> for Timerange {
    type Error = ReportError;

    fn try_from(raw: RawTimerange) -> Result<Self> {
        Timerange::new(raw.start, raw.end)
    }
}

impl Timerange {
    /// Build a range, dropping sub-second precision from both ends
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        let start = whole_seconds(start);
        let end = whole_seconds(end);
        if start > end {
            return Err(ReportError::InvalidTimerange { start, end });
        }
        Ok(Timerange { start, end })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// The whole range as a single period
    pub fn as_period(&self) -> Period {
        Period {
            start: self.start,
            end: self.end,
        }
    }
}

fn whole_seconds(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).unwrap_or(t)
}

/// Which instant of the day a bare date stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayBound {
    /// 00:00:00
    Start,
    /// 23:59:59
    End,
}

/// Parse `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DDTHH:MM:SS`
pub fn parse_timestamp(s: &str, bound: DayBound) -> Result<NaiveDateTime> {
    let s = s.trim();
    for format in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(t);
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| ReportError::InvalidTimestamp(s.to_string()))?;
    let time = match bound {
        DayBound::Start => NaiveTime::MIN,
        DayBound::End => NaiveTime::from_hms_opt(23, 59, 59)
            .ok_or_else(|| ReportError::InvalidTimestamp(s.to_string()))?,
    };
    Ok(date.and_time(time))
}

/// One sub-division of a [`Timerange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Period {
    /// Column label built from the period boundaries
    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            self.start.format(TIMESTAMP_FORMAT),
            self.end.format(TIMESTAMP_FORMAT)
        )
    }
}

/// Calendar step between period boundaries
///
/// Months are applied first (clamped to the last day of the target month),
/// then days, then seconds. Parsed from ISO-8601 durations such as `P1D`,
/// `P1M`, `P1W` or `PT6H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalendarInterval {
    months: u32,
    days: u32,
    seconds: u32,
}

impl CalendarInterval {
    pub fn new(months: u32, days: u32, seconds: u32) -> Result<Self> {
        if months == 0 && days == 0 && seconds == 0 {
            return Err(ReportError::InvalidInterval(
                "interval must not be zero".to_string(),
            ));
        }
        Ok(CalendarInterval {
            months,
            days,
            seconds,
        })
    }

    pub fn daily() -> Self {
        CalendarInterval {
            months: 0,
            days: 1,
            seconds: 0,
        }
    }

    pub fn weekly() -> Self {
        CalendarInterval {
            months: 0,
            days: 7,
            seconds: 0,
        }
    }

    pub fn monthly() -> Self {
        CalendarInterval {
            months: 1,
            days: 0,
            seconds: 0,
        }
    }

    /// Instant `k` steps after `origin`, or `None` past the calendar's range
    ///
    /// Computed from the origin rather than the previous boundary so that
    /// month-end clamping never accumulates (Jan 31 -> Feb 28 -> Mar 31).
    fn nth_boundary(&self, origin: NaiveDateTime, k: u32) -> Option<NaiveDateTime> {
        let months = self.months.checked_mul(k)?;
        let secs = (i64::from(self.days) * 86_400 + i64::from(self.seconds))
            .checked_mul(i64::from(k))?;
        origin
            .checked_add_months(Months::new(months))?
            .checked_add_signed(Duration::try_seconds(secs)?)
    }
}

impl FromStr for CalendarInterval {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| ReportError::InvalidInterval(format!("{}: {}", s, why));

        let upper = s.trim().to_ascii_uppercase();
        let body = upper
            .strip_prefix('P')
            .ok_or_else(|| invalid("expected an ISO-8601 duration starting with 'P'"))?;

        let (mut months, mut days, mut seconds) = (0u32, 0u32, 0u32);
        let mut in_time = false;
        let mut digits = String::new();
        let mut components = 0;
        let mut time_components = 0;

        for c in body.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            if c == 'T' {
                if in_time || !digits.is_empty() {
                    return Err(invalid("misplaced 'T'"));
                }
                in_time = true;
                continue;
            }
            if digits.is_empty() {
                return Err(invalid("designator without a number"));
            }
            let n: u32 = digits.parse().map_err(|_| invalid("number too large"))?;
            digits.clear();

            let overflow = || invalid("number too large");
            match (in_time, c) {
                (false, 'Y') => {
                    months = n
                        .checked_mul(12)
                        .and_then(|m| months.checked_add(m))
                        .ok_or_else(overflow)?
                }
                (false, 'M') => months = months.checked_add(n).ok_or_else(overflow)?,
                (false, 'W') => {
                    days = n
                        .checked_mul(7)
                        .and_then(|d| days.checked_add(d))
                        .ok_or_else(overflow)?
                }
                (false, 'D') => days = days.checked_add(n).ok_or_else(overflow)?,
                (true, 'H') => {
                    seconds = n
                        .checked_mul(3600)
                        .and_then(|h| seconds.checked_add(h))
                        .ok_or_else(overflow)?
                }
                (true, 'M') => {
                    seconds = n
                        .checked_mul(60)
                        .and_then(|m| seconds.checked_add(m))
                        .ok_or_else(overflow)?
                }
                (true, 'S') => seconds = seconds.checked_add(n).ok_or_else(overflow)?,
                _ => return Err(invalid(&format!("unexpected designator '{}'", c))),
            }
            components += 1;
            if in_time {
                time_components += 1;
            }
        }

        if !digits.is_empty() {
            return Err(invalid("trailing number without designator"));
        }
        if in_time && time_components == 0 {
            return Err(invalid("no time components after 'T'"));
        }
        if components == 0 {
            return Err(invalid("no duration components"));
        }

        CalendarInterval::new(months, days, seconds)
    }
}

impl TryFrom<String> for CalendarInterval {
    type Error = ReportError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CalendarInterval> for String {
    fn from(interval: CalendarInterval) -> Self {
        interval.to_string()
    }
}

impl fmt::Display for CalendarInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P")?;
        if self.months > 0 {
            write!(f, "{}M", self.months)?;
        }
        if self.days > 0 {
            write!(f, "{}D", self.days)?;
        }
        if self.seconds > 0 {
            write!(f, "T{}S", self.seconds)?;
        }
        Ok(())
    }
}

/// Split a range into consecutive periods at the given interval
///
/// Boundaries are `start + k * interval` for `k >= 1` that fall strictly
/// before `end`. Each period ends one second before the next boundary,
/// except the last one which ends exactly at `timerange.end()`.
pub fn segment(timerange: &Timerange, interval: &CalendarInterval) -> Vec<Period> {
    let one_second = Duration::seconds(1);
    let mut periods = Vec::new();
    let mut period_start = timerange.start;

    let mut k: u32 = 1;
    while let Some(boundary) = interval.nth_boundary(timerange.start, k) {
        if boundary >= timerange.end {
            break;
        }
        periods.push(Period {
            start: period_start,
            end: boundary - one_second,
        });
        period_start = boundary;
        k = match k.checked_add(1) {
            Some(next) => next,
            None => break,
        };
    }

    periods.push(Period {
        start: period_start,
        end: timerange.end,
    });
    periods
}
