//! 5-field cron expressions
//!
//! Standard minute/hour/day-of-month/month/day-of-week semantics with `*`,
//! lists, ranges, and steps, evaluated in UTC.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::{Error, Result};

/// A parsed cron schedule
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
}

impl CronSchedule {
    /// Parse a 5-field cron expression
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::schedule(format!(
                "expected 5 cron fields, got {} in {expr:?}",
                fields.len()
            )));
        }

        Ok(Self {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)?,
            days_of_month: parse_field(fields[2], 1, 31)?,
            months: parse_field(fields[3], 1, 12)?,
            days_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    /// Whether a UTC instant matches the schedule (second precision ignored)
    fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes.contains(&at.minute())
            && self.hours.contains(&at.hour())
            && self.days_of_month.contains(&at.day())
            && self.months.contains(&at.month())
            && self
                .days_of_week
                .contains(&at.weekday().num_days_from_sunday())
    }

    /// The next fire time strictly after `from`.
    ///
    /// Bounded to a four-year search so an unsatisfiable combination (e.g.
    /// Feb 30) terminates with `None`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut current = from
            .with_second(0)?
            .with_nanosecond(0)?
            + Duration::minutes(1);

        let max_iterations = 4 * 366 * 24 * 60;
        for _ in 0..max_iterations {
            if self.matches(current) {
                return Some(current);
            }

            // Skip ahead coarsely where a whole unit cannot match
            if !self.months.contains(&current.month()) {
                let next_month = if current.month() == 12 {
                    current
                        .with_year(current.year() + 1)?
                        .with_month(1)?
                        .with_day(1)?
                } else {
                    current.with_month(current.month() + 1)?.with_day(1)?
                };
                current = next_month.with_hour(0)?.with_minute(0)?;
                continue;
            }

            if !self.days_of_month.contains(&current.day())
                || !self
                    .days_of_week
                    .contains(&current.weekday().num_days_from_sunday())
            {
                current = (current + Duration::days(1)).with_hour(0)?.with_minute(0)?;
                continue;
            }

            if !self.hours.contains(&current.hour()) {
                current = (current + Duration::hours(1)).with_minute(0)?;
                continue;
            }

            current += Duration::minutes(1);
        }

        None
    }
}

/// Parse one cron field: `*`, `N`, `N-M`, `*/S`, `N/S`, `N-M/S`, and
/// comma-separated combinations of these.
fn parse_field(field: &str, min: u32, max: u32) -> Result<Vec<u32>> {
    let mut values = Vec::new();

    for part in field.split(',') {
        let part = part.trim();
        if let Some((base, step)) = part.split_once('/') {
            let step: u32 = step
                .parse()
                .map_err(|_| Error::schedule(format!("invalid step {step:?}")))?;
            if step == 0 {
                return Err(Error::schedule("step cannot be zero"));
            }
            let (lo, hi) = if base == "*" {
                (min, max)
            } else if base.contains('-') {
                parse_range(base, min, max)?
            } else {
                let start: u32 = base
                    .parse()
                    .map_err(|_| Error::schedule(format!("invalid value {base:?}")))?;
                (start, max)
            };
            let mut value = lo;
            while value <= hi {
                values.push(value);
                value += step;
            }
        } else if part.contains('-') {
            let (lo, hi) = parse_range(part, min, max)?;
            values.extend(lo..=hi);
        } else if part == "*" {
            values.extend(min..=max);
        } else {
            let value: u32 = part
                .parse()
                .map_err(|_| Error::schedule(format!("invalid value {part:?}")))?;
            if value < min || value > max {
                return Err(Error::schedule(format!(
                    "value {value} out of range {min}-{max}"
                )));
            }
            values.push(value);
        }
    }

    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err(Error::schedule("empty cron field"));
    }
    Ok(values)
}

fn parse_range(s: &str, min: u32, max: u32) -> Result<(u32, u32)> {
    let (lo, hi) = s
        .split_once('-')
        .ok_or_else(|| Error::schedule(format!("invalid range {s:?}")))?;
    let lo: u32 = lo
        .parse()
        .map_err(|_| Error::schedule(format!("invalid range start {lo:?}")))?;
    let hi: u32 = hi
        .parse()
        .map_err(|_| Error::schedule(format!("invalid range end {hi:?}")))?;
    if lo < min || hi > max || lo > hi {
        return Err(Error::schedule(format!(
            "range {lo}-{hi} out of bounds {min}-{max}"
        )));
    }
    Ok((lo, hi))
}
