//! Five-field cron expressions evaluated in a fixed UTC offset

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("Expected 5 fields (minute hour day-of-month month day-of-week), found {0}")]
    FieldCount(usize),
    #[error("Invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("Unknown descriptor '{0}'")]
    UnknownDescriptor(String),
}

/// Set of allowed values for one field, as a bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.0 & (1 << value) != 0
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
// 7 is accepted as Sunday and folded onto 0
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7 };

/// Searching further than this without a match means the expression can never fire.
const SEARCH_LIMIT_DAYS: i64 = 5 * 366;

impl FieldSpec {
    fn invalid(&self, value: &str, reason: impl Into<String>) -> CronError {
        CronError::InvalidField {
            field: self.name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn number(&self, field: &str, text: &str) -> Result<u32, CronError> {
        let value: u32 = text
            .parse()
            .map_err(|_| self.invalid(field, format!("'{text}' is not a number")))?;
        if value < self.min || value > self.max {
            return Err(self.invalid(
                field,
                format!("{value} is outside {}-{}", self.min, self.max),
            ));
        }
        Ok(value)
    }

    fn parse(&self, field: &str) -> Result<FieldSet, CronError> {
        let mut mask = 0u64;
        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| self.invalid(field, format!("bad step '{step}'")))?;
                    if step == 0 {
                        return Err(self.invalid(field, "step must be positive"));
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (self.min, self.max)
            } else if let Some((start, end)) = range.split_once('-') {
                (self.number(field, start)?, self.number(field, end)?)
            } else {
                let start = self.number(field, range)?;
                // `5/15` means every 15 starting at 5
                (start, if step > 1 { self.max } else { start })
            };
            if start > end {
                return Err(self.invalid(field, format!("range {start}-{end} is reversed")));
            }

            for value in (start..=end).step_by(step as usize) {
                mask |= 1 << value;
            }
        }
        Ok(FieldSet(mask))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        let expanded = match trimmed {
            d if d.starts_with('@') => match d.to_ascii_lowercase().as_str() {
                "@hourly" => "0 * * * *",
                "@daily" | "@midnight" => "0 0 * * *",
                "@weekly" => "0 0 * * 0",
                "@monthly" => "0 0 1 * *",
                "@yearly" | "@annually" => "0 0 1 1 *",
                _ => return Err(CronError::UnknownDescriptor(d.to_string())),
            },
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields[..] else {
            return Err(CronError::FieldCount(fields.len()));
        };

        let mut days_of_week = DAY_OF_WEEK.parse(dow)?;
        if days_of_week.contains(7) {
            days_of_week = FieldSet((days_of_week.0 & !(1 << 7)) | 1);
        }

        Ok(Self {
            expression: trimmed.to_string(),
            minutes: MINUTE.parse(minute)?,
            hours: HOUR.parse(hour)?,
            days_of_month: DAY_OF_MONTH.parse(dom)?,
            months: MONTH.parse(month)?,
            days_of_week,
            day_of_month_restricted: !dom.starts_with('*'),
            day_of_week_restricted: !dow.starts_with('*'),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        match (self.day_of_month_restricted, self.day_of_week_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// The first matching minute strictly after `after`, in the same offset.
    pub fn next_after(&self, after: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let offset = after.offset();
        let local = after.naive_local();
        let mut t = local.date().and_hms_opt(local.hour(), local.minute(), 0)? + Duration::minutes(1);
        let limit = t + Duration::days(SEARCH_LIMIT_DAYS);

        while t <= limit {
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return offset.from_local_datetime(&t).single();
        }
        None
    }
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}
