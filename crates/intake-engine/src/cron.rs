//! Minimal five-field cron expressions, evaluated in UTC.
//!
//! Supported per field: `*`, `*/step`, `a`, `a-b`, `a-b/step` and
//! comma-separated lists of those. Fields are `minute hour day-of-month
//! month day-of-week` with day-of-week 0-6 starting at Sunday (7 accepted
//! as Sunday). Day-of-month and day-of-week combine the standard way: when
//! both are restricted a date matching either fires.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use intake_core::{IntakeError, Result};

/// How far ahead `next_after` searches before giving up (four years covers
/// any satisfiable expression, leap days included).
const SEARCH_LIMIT_DAYS: i64 = 365 * 4 + 1;

#[derive(Debug, Clone)]
struct Field {
    allowed:    Vec<bool>,
    restricted: bool,
}

impl Field {
    fn contains(&self, value: usize) -> bool {
        self.allowed.get(value).copied().unwrap_or(false)
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: Field,
    hour:   Field,
    dom:    Field,
    month:  Field,
    dow:    Field,
}

impl CronExpr {
    /// Parse a five-field expression.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on a malformed expression or out-of-range value.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(expression, "expected five fields"));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59).map_err(|e| invalid(expression, &e))?,
            hour:   parse_field(fields[1], 0, 23).map_err(|e| invalid(expression, &e))?,
            dom:    parse_field(fields[2], 1, 31).map_err(|e| invalid(expression, &e))?,
            month:  parse_field(fields[3], 1, 12).map_err(|e| invalid(expression, &e))?,
            dow:    parse_field(fields[4], 0, 7).map_err(|e| invalid(expression, &e))?,
        })
    }

    /// Whether the expression matches the given minute.
    #[must_use]
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        if !self.minute.contains(at.minute() as usize)
            || !self.hour.contains(at.hour() as usize)
            || !self.month.contains(at.month() as usize)
        {
            return false;
        }
        let dom_ok = self.dom.contains(at.day() as usize);
        // num_days_from_sunday: Sunday = 0, matching cron.
        let dow = at.weekday().num_days_from_sunday() as usize;
        let dow_ok = self.dow.contains(dow) || (dow == 0 && self.dow.contains(7));
        if self.dom.restricted && self.dow.restricted {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }

    /// The first matching minute strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = Utc
            .with_ymd_and_hms(after.year(), after.month(), after.day(), after.hour(), after.minute(), 0)
            .single()?
            + Duration::minutes(1);
        let limit = after + Duration::days(SEARCH_LIMIT_DAYS);
        while candidate <= limit {
            if self.matches(candidate) {
                return Some(candidate);
            }
            // Skip to the next hour/day when the coarse fields cannot match,
            // so sparse expressions stay cheap.
            candidate += if !self.month.contains(candidate.month() as usize) {
                Duration::days(1)
            } else if !self.hour.contains(candidate.hour() as usize) {
                Duration::minutes(i64::from(60 - candidate.minute()))
            } else {
                Duration::minutes(1)
            };
        }
        None
    }
}

fn invalid(expression: &str, detail: &str) -> IntakeError {
    IntakeError::InvalidConfig {
        message: format!("cron '{expression}': {detail}"),
    }
}

fn parse_field(field: &str, min: usize, max: usize) -> std::result::Result<Field, String> {
    let mut allowed = vec![false; max + 1];
    let mut restricted = true;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("bad step in '{part}'"))?;
                if step == 0 {
                    return Err(format!("zero step in '{part}'"));
                }
                (range, step)
            },
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            if part == "*" {
                restricted = false;
            }
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (
                lo.parse().map_err(|_| format!("bad number in '{part}'"))?,
                hi.parse().map_err(|_| format!("bad number in '{part}'"))?,
            )
        } else {
            let value: usize = range.parse().map_err(|_| format!("bad number in '{part}'"))?;
            (value, value)
        };
        if lo < min || hi > max || lo > hi {
            return Err(format!("'{part}' out of range {min}-{max}"));
        }
        let mut value = lo;
        while value <= hi {
            allowed[value] = true;
            value += step;
        }
    }
    Ok(Field { allowed, restricted })
}
