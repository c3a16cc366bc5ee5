//! Five-field cron expression parsing and evaluation.
//!
//! Supports the standard `minute hour day-of-month month day-of-week`
//! layout with `*`, lists, ranges and steps, plus three-letter names for
//! months and weekdays. Day-of-month and day-of-week combine with OR when
//! both are restricted, matching classic cron behavior.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

/// A parsed cron schedule
#[derive(Clone, Debug)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a five-field cron expression
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(
                expression,
                format!("expected 5 fields, got {}", fields.len()),
            ));
        }

        let minutes = parse_field(fields[0], 0, 59, &[]).map_err(|e| invalid(expression, e))?;
        let hours =
            parse_field(fields[1], 0, 23, &[]).map_err(|e| invalid(expression, e))? as u32;
        let days_of_month =
            parse_field(fields[2], 1, 31, &[]).map_err(|e| invalid(expression, e))? as u32;
        let months = parse_field(fields[3], 1, 12, MONTH_NAMES)
            .map_err(|e| invalid(expression, e))? as u16;
        let days_of_week = parse_field(fields[4], 0, 7, DAY_NAMES)
            .map_err(|e| invalid(expression, e))? as u8;

        // 7 is an alias for Sunday.
        let days_of_week = if days_of_week & (1u8 << 7) != 0 {
            (days_of_week | 1) & 0x7f
        } else {
            days_of_week
        };

        Ok(Self {
            expression: expression.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    /// The original expression text
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The next instant strictly after `after` matching the schedule.
    ///
    /// Returns `None` if nothing matches within four years (an impossible
    /// date like `0 0 30 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = truncate_to_minute(after) + Duration::minutes(1);
        let limit = after + Duration::days(4 * 366);

        while t <= limit {
            if !self.month_matches(t.month()) {
                t = start_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(&t) {
                let next_day = t.date_naive().succ_opt()?;
                t = Utc.from_utc_datetime(&next_day.and_hms_opt(0, 0, 0)?);
                continue;
            }
            if !self.hour_matches(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute_matches(t.minute()) {
                t = t + Duration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    fn minute_matches(&self, minute: u32) -> bool {
        self.minutes & (1u64 << minute) != 0
    }

    fn hour_matches(&self, hour: u32) -> bool {
        self.hours & (1u32 << hour) != 0
    }

    fn month_matches(&self, month: u32) -> bool {
        self.months & (1u16 << month) != 0
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = self.days_of_month & (1u32 << t.day()) != 0;
        let dow = self.days_of_week & (1u8 << t.weekday().num_days_from_sunday()) != 0;

        // Classic cron: when both fields are restricted, either may match.
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), t.hour(), t.minute(), 0)
        .single()
        .unwrap_or(t)
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn invalid(expression: &str, message: impl Into<String>) -> Error {
    Error::InvalidCron {
        expression: expression.to_string(),
        message: message.into(),
    }
}

const MONTH_NAMES: &[(&str, u32)] = &[
    ("JAN", 1),
    ("FEB", 2),
    ("MAR", 3),
    ("APR", 4),
    ("MAY", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AUG", 8),
    ("SEP", 9),
    ("OCT", 10),
    ("NOV", 11),
    ("DEC", 12),
];

const DAY_NAMES: &[(&str, u32)] = &[
    ("SUN", 0),
    ("MON", 1),
    ("TUE", 2),
    ("WED", 3),
    ("THU", 4),
    ("FRI", 5),
    ("SAT", 6),
];

/// Parse one cron field into a bitmask over `min..=max`
fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    names: &[(&str, u32)],
) -> std::result::Result<u64, String> {
    let mut mask: u64 = 0;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| format!("bad step in {part:?}"))?;
                if step == 0 {
                    return Err(format!("step must be positive in {part:?}"));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_atom(a, names)?, parse_atom(b, names)?)
        } else {
            let value = parse_atom(range, names)?;
            // A bare value with a step means "value to max".
            if part.contains('/') {
                (value, max)
            } else {
                (value, value)
            }
        };

        if start < min || end > max {
            return Err(format!("value out of range {min}..={max} in {part:?}"));
        }
        if start > end {
            return Err(format!("inverted range in {part:?}"));
        }

        let mut value = start;
        while value <= end {
            mask |= 1u64 << value;
            value += step;
        }
    }

    if mask == 0 {
        return Err(format!("empty field {field:?}"));
    }
    Ok(mask)
}

fn parse_atom(atom: &str, names: &[(&str, u32)]) -> std::result::Result<u32, String> {
    if let Ok(value) = atom.parse() {
        return Ok(value);
    }
    let upper = atom.to_ascii_uppercase();
    names
        .iter()
        .find(|(name, _)| *name == upper)
        .map(|(_, value)| *value)
        .ok_or_else(|| format!("bad value {atom:?}"))
}
