//! Five-field cron expressions.
//!
//! Supports `*`, single values, ranges (`a-b`), steps (`*/n`, `a-b/n`),
//! and comma lists — enough for every schedule this service accepts.
//! Evaluation walks minute by minute in the configured timezone, which is
//! plenty fast for schedules consulted once per fire.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Parse failure with the offending fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronParseError {
    pub expr: String,
    pub detail: String,
}

impl fmt::Display for CronParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cron expression '{}': {}", self.expr, self.detail)
    }
}

impl std::error::Error for CronParseError {}

/// One field: the set of permitted values, or "any".
#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Any,
    Values(Vec<u32>),
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Values(vs) => vs.contains(&value),
        }
    }

    fn is_restricted(&self) -> bool {
        matches!(self, Field::Values(_))
    }
}

/// A parsed `minute hour day-of-month month day-of-week` schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let err = |detail: String| CronParseError {
            expr: expr.to_string(),
            detail,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(err(format!("expected 5 fields, got {}", fields.len())));
        }

        Ok(CronSchedule {
            minute: parse_field(fields[0], 0, 59).map_err(&err)?,
            hour: parse_field(fields[1], 0, 23).map_err(&err)?,
            day_of_month: parse_field(fields[2], 1, 31).map_err(&err)?,
            month: parse_field(fields[3], 1, 12).map_err(&err)?,
            // 0 and 7 both mean Sunday.
            day_of_week: parse_field(fields[4], 0, 7).map(normalize_sunday).map_err(&err)?,
        })
    }

    /// Does the schedule fire at this local time?
    ///
    /// Standard cron day semantics: when both day-of-month and
    /// day-of-week are restricted, either matching suffices; otherwise
    /// the restricted one (if any) decides.
    fn matches_local<T: TimeZone>(&self, at: &DateTime<T>) -> bool {
        if !self.minute.matches(at.minute())
            || !self.hour.matches(at.hour())
            || !self.month.matches(at.month())
        {
            return false;
        }

        let dom = self.day_of_month.matches(at.day());
        let dow = self
            .day_of_week
            .matches(at.weekday().num_days_from_sunday());
        match (
            self.day_of_month.is_restricted(),
            self.day_of_week.is_restricted(),
        ) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// Next fire instant strictly after `after`, evaluated in `tz`.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        // Truncate to the minute, then step forward one minute at a time.
        // Bounded by a four-year horizon as a parse-bug backstop.
        let mut candidate = after.with_timezone(&tz);
        candidate = candidate
            - Duration::seconds(candidate.second() as i64)
            - Duration::nanoseconds(candidate.nanosecond() as i64);
        let horizon = candidate.clone() + Duration::days(4 * 366);

        loop {
            candidate += Duration::minutes(1);
            if self.matches_local(&candidate) {
                return candidate.with_timezone(&Utc);
            }
            if candidate > horizon {
                // Unreachable for any parseable schedule.
                return horizon.with_timezone(&Utc);
            }
        }
    }
}

fn normalize_sunday(field: Field) -> Field {
    match field {
        Field::Values(mut vs) => {
            for v in vs.iter_mut() {
                if *v == 7 {
                    *v = 0;
                }
            }
            vs.sort_unstable();
            vs.dedup();
            Field::Values(vs)
        }
        any => any,
    }
}

fn parse_field(raw: &str, min: u32, max: u32) -> Result<Field, String> {
    if raw == "*" {
        return Ok(Field::Any);
    }

    let mut values: Vec<u32> = Vec::new();
    for part in raw.split(',') {
        let (range_raw, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| format!("bad step '{s}' in '{part}'"))?;
                if step == 0 {
                    return Err(format!("zero step in '{part}'"));
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range_raw == "*" {
            (min, max)
        } else if let Some((a, b)) = range_raw.split_once('-') {
            let lo: u32 = a.parse().map_err(|_| format!("bad value '{a}'"))?;
            let hi: u32 = b.parse().map_err(|_| format!("bad value '{b}'"))?;
            (lo, hi)
        } else {
            let v: u32 = range_raw
                .parse()
                .map_err(|_| format!("bad value '{range_raw}'"))?;
            (v, v)
        };

        if lo < min || hi > max || lo > hi {
            return Err(format!("'{part}' out of range {min}-{max}"));
        }
        values.extend((lo..=hi).step_by(step as usize));
    }

    values.sort_unstable();
    values.dedup();
    Ok(Field::Values(values))
}
