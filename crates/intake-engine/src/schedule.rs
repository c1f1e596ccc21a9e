//! Tick generation for scheduled sources.

use chrono::{DateTime, Duration, Utc};
use intake_core::config::Schedule;
use intake_core::Result;

use crate::cron::CronExpr;

/// When the next fetch is due, given the schedule and the last fetch time.
///
/// Interval schedules measure from the last fetch (immediately when the
/// source has never fetched); cron schedules fire at the next matching
/// minute after the later of `last` and `now`.
///
/// # Errors
///
/// `InvalidConfig` when a cron expression fails to parse (registration
/// validates the shape, but the stored config is re-parsed here).
pub fn next_fetch_at(
    schedule: &Schedule,
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match schedule {
        Schedule::Interval { seconds } => Ok(match last {
            Some(last) => last + Duration::seconds(*seconds as i64),
            None => now,
        }),
        Schedule::Cron { expression } => {
            let cron = CronExpr::parse(expression)?;
            let after = last.map_or(now, |l| l.max(now));
            Ok(cron.next_after(after).unwrap_or(after + Duration::days(3650)))
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, mi, 0).single().expect("valid timestamp")
    }

    #[test]
    fn interval_measures_from_the_last_fetch() {
        let schedule = Schedule::Interval { seconds: 60 };
        assert_eq!(
            next_fetch_at(&schedule, Some(at(12, 0)), at(12, 0)).expect("next"),
            at(12, 1)
        );
        // Never fetched: due immediately.
        assert_eq!(next_fetch_at(&schedule, None, at(12, 0)).expect("next"), at(12, 0));
    }

    #[test]
    fn cron_fires_at_the_next_matching_minute() {
        let schedule = Schedule::Cron {
            expression: "*/10 * * * *".to_string(),
        };
        assert_eq!(
            next_fetch_at(&schedule, Some(at(12, 0)), at(12, 3)).expect("next"),
            at(12, 10)
        );
    }

    #[test]
    fn bad_cron_surfaces_as_config_error() {
        let schedule = Schedule::Cron {
            expression: "not a cron".to_string(),
        };
        assert!(next_fetch_at(&schedule, None, at(12, 0)).is_err());
    }
}
