//! Five-field cron expressions
//!
//! `minute hour day-of-month month day-of-week`, evaluated in UTC at minute
//! resolution. Fields accept `*`, numbers, names (`jan`, `mon`), ranges,
//! lists and steps (`*/n`, `a-b/n`, `a/n`). Day-of-week runs 0-7 with both 0
//! and 7 meaning Sunday. When day-of-month and day-of-week are both
//! restricted, a day matches if either does.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use thiserror::Error;

/// How far ahead `next_after` looks; covers leap-day schedules
const SEARCH_HORIZON_DAYS: i64 = 366 * 9;

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Longest month lengths, February counted with its leap day
const MAX_DAYS_IN_MONTH: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error(
        "Cron expression '{expression}' must have 5 fields (minute hour day month day-of-week), found {found}"
    )]
    FieldCount { expression: String, found: usize },

    #[error("Invalid {field} field '{value}' in cron expression: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Cron expression '{0}' never matches a calendar day")]
    NeverMatches(String),
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    /// Names for values, starting at `names_offset`
    names: &'static [&'static str],
    names_offset: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_offset: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_offset: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    names_offset: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: MONTH_NAMES,
    names_offset: 1,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: WEEKDAY_NAMES,
    names_offset: 0,
};

impl FieldSpec {
    fn invalid(&self, value: &str, reason: impl Into<String>) -> CronError {
        CronError::InvalidField {
            field: self.name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn value(&self, field: &str, raw: &str) -> Result<u32, CronError> {
        let lower = raw.to_ascii_lowercase();
        let value = match self.names.iter().position(|name| *name == lower) {
            Some(index) => index as u32 + self.names_offset,
            None => raw
                .parse::<u32>()
                .map_err(|_| self.invalid(field, format!("'{raw}' is not a number")))?,
        };

        if value < self.min || value > self.max {
            return Err(self.invalid(
                field,
                format!("{value} is outside {}-{}", self.min, self.max),
            ));
        }
        Ok(value)
    }

    /// Parses a field into a bit set of matching values
    fn parse(&self, field: &str) -> Result<u64, CronError> {
        let mut bits = 0u64;

        for part in field.split(',') {
            if part.is_empty() {
                return Err(self.invalid(field, "empty list element"));
            }

            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step = step
                        .parse::<u32>()
                        .ok()
                        .filter(|s| *s > 0)
                        .ok_or_else(|| self.invalid(field, format!("bad step '{step}'")))?;
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                (self.min, self.max)
            } else if let Some((from, to)) = range.split_once('-') {
                (self.value(field, from)?, self.value(field, to)?)
            } else {
                let value = self.value(field, range)?;
                match step {
                    Some(_) => (value, self.max),
                    None => (value, value),
                }
            };

            if start > end {
                return Err(self.invalid(field, format!("range {start}-{end} is reversed")));
            }

            for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
                bits |= 1u64 << value;
            }
        }

        Ok(bits)
    }
}

fn contains(bits: u64, value: u32) -> bool {
    bits & (1u64 << value) != 0
}

/// A parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = fields[..] else {
            return Err(CronError::FieldCount {
                expression: expression.to_string(),
                found: fields.len(),
            });
        };

        let mut days_of_week = DAY_OF_WEEK.parse(weekday)?;
        // 7 is an alias for Sunday
        if contains(days_of_week, 7) {
            days_of_week = (days_of_week & !(1u64 << 7)) | 1;
        }

        let schedule = Self {
            expression: fields.join(" "),
            minutes: MINUTE.parse(minute)?,
            hours: HOUR.parse(hour)?,
            days_of_month: DAY_OF_MONTH.parse(day)?,
            months: MONTH.parse(month)?,
            days_of_week,
            day_of_month_restricted: !day.starts_with('*'),
            day_of_week_restricted: !weekday.starts_with('*'),
        };

        if !schedule.has_calendar_day() {
            return Err(CronError::NeverMatches(schedule.expression));
        }
        Ok(schedule)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = start + Duration::days(SEARCH_HORIZON_DAYS);
        let mut candidate = start;

        while candidate <= horizon {
            let date = candidate.date_naive();

            if !contains(self.months, date.month()) {
                candidate = first_of_next_month(date)?;
                continue;
            }
            if !self.day_matches(date) {
                candidate = date.succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !contains(self.hours, candidate.hour()) {
                candidate += Duration::minutes(60 - i64::from(candidate.minute()));
                continue;
            }
            if !contains(self.minutes, candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate);
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let day_of_month = contains(self.days_of_month, date.day());
        let day_of_week = contains(self.days_of_week, date.weekday().num_days_from_sunday());

        if self.day_of_month_restricted && self.day_of_week_restricted {
            day_of_month || day_of_week
        } else {
            day_of_month && day_of_week
        }
    }

    /// Rejects combinations like `30 2` (February 30th) that never occur
    fn has_calendar_day(&self) -> bool {
        if !self.day_of_month_restricted || self.day_of_week_restricted {
            return true;
        }
        (1..=12u32).any(|month| {
            contains(self.months, month)
                && (1..=MAX_DAYS_IN_MONTH[month as usize - 1])
                    .any(|day| contains(self.days_of_month, day))
        })
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<DateTime<Utc>> {
    let (year, month) = match date.month() {
        12 => (date.year() + 1, 1),
        month => (date.year(), month + 1),
    };
    Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?.and_utc())
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
