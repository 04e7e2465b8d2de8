//! Schedule evaluation — pure functions from a schedule definition and the
//! current time to the next trigger instant.

use std::str::FromStr;

use chrono::TimeZone;
use chrono_tz::Tz;

use crate::cron::error::CronError;
use crate::cron::types::Schedule;

/// Compute the next trigger instant strictly interpretable by the store:
///
/// - `cron`: the earliest wall-clock match in the schedule's timezone that is
///   strictly after `now_ms`, converted back to epoch milliseconds.
/// - `every`: the smallest `anchor_ms + k * every_ms` (k >= 0) strictly
///   greater than `now_ms`; without an anchor, `now_ms + every_ms`.
/// - `at`: `at_ms` unconditionally. The store treats a past instant as
///   immediately due exactly once.
pub fn compute_next_run_at_ms(schedule: &Schedule, now_ms: i64) -> Result<i64, CronError> {
    match schedule {
        Schedule::Cron { expr, tz } => next_cron_ms(expr, tz, now_ms),
        Schedule::Every { every_ms, anchor_ms } => {
            if *every_ms <= 0 {
                return Err(CronError::InvalidSchedule(format!(
                    "everyMs must be positive, got {every_ms}"
                )));
            }
            match anchor_ms {
                None => Ok(now_ms + every_ms),
                Some(anchor) => {
                    if *anchor > now_ms {
                        Ok(*anchor)
                    } else {
                        // Smallest k >= 0 with anchor + k*every > now. An
                        // anchor hit exactly still advances one full period.
                        let k = (now_ms - anchor).div_euclid(*every_ms) + 1;
                        Ok(anchor + k * every_ms)
                    }
                }
            }
        }
        Schedule::At { at_ms } => Ok(*at_ms),
    }
}

/// Validate a schedule without evaluating it: the cron expression must be a
/// parseable 5-field pattern in a known timezone, and intervals must be
/// positive.
pub fn validate(schedule: &Schedule) -> Result<(), CronError> {
    match schedule {
        Schedule::Cron { expr, tz } => {
            parse_cron_expr(expr)?;
            parse_tz(tz)?;
            Ok(())
        }
        Schedule::Every { every_ms, .. } => {
            if *every_ms <= 0 {
                return Err(CronError::InvalidSchedule(format!(
                    "everyMs must be positive, got {every_ms}"
                )));
            }
            Ok(())
        }
        Schedule::At { .. } => Ok(()),
    }
}

fn next_cron_ms(expr: &str, tz: &str, now_ms: i64) -> Result<i64, CronError> {
    let schedule = parse_cron_expr(expr)?;
    let tz = parse_tz(tz)?;
    let now = chrono::Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .ok_or_else(|| CronError::InvalidSchedule(format!("timestamp {now_ms} out of range")))?
        .with_timezone(&tz);
    schedule
        .after(&now)
        .next()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| CronError::InvalidSchedule(format!("\"{expr}\" has no upcoming occurrence")))
}

/// Parse a 5-field cron pattern (min hour dom month dow). The `cron` crate
/// wants seconds and an optional year, so the pattern is widened to 7 fields.
fn parse_cron_expr(expr: &str) -> Result<cron::Schedule, CronError> {
    let fields = expr.split_whitespace().count();
    if fields != 5 {
        return Err(CronError::InvalidSchedule(format!(
            "\"{expr}\" must have 5 fields, got {fields}"
        )));
    }
    cron::Schedule::from_str(&format!("0 {expr} *"))
        .map_err(|e| CronError::InvalidSchedule(format!("\"{expr}\": {e}")))
}

fn parse_tz(tz: &str) -> Result<Tz, CronError> {
    tz.parse::<Tz>()
        .map_err(|_| CronError::InvalidSchedule(format!("unknown timezone \"{tz}\"")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(iso: &str) -> i64 {
        chrono::DateTime::parse_from_rfc3339(iso)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn cron_evaluates_in_named_timezone() {
        // 09:00 every Wednesday in Los Angeles; December is PST (UTC-8).
        let schedule = Schedule::Cron {
            expr: "0 9 * * 3".into(),
            tz: "America/Los_Angeles".into(),
        };
        let next = compute_next_run_at_ms(&schedule, ms("2025-12-13T00:00:00Z")).unwrap();
        assert_eq!(next, ms("2025-12-17T17:00:00Z"));
    }

    #[test]
    fn cron_is_strictly_after_now() {
        let schedule = Schedule::Cron {
            expr: "0 9 * * 3".into(),
            tz: "America/Los_Angeles".into(),
        };
        // Exactly at a match: the next one is a week later.
        let next = compute_next_run_at_ms(&schedule, ms("2025-12-17T17:00:00Z")).unwrap();
        assert_eq!(next, ms("2025-12-24T17:00:00Z"));
    }

    #[test]
    fn cron_rejects_wrong_field_count() {
        let schedule = Schedule::Cron {
            expr: "0 9 * *".into(),
            tz: "UTC".into(),
        };
        assert!(matches!(
            compute_next_run_at_ms(&schedule, 0),
            Err(CronError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn cron_rejects_unknown_timezone() {
        let schedule = Schedule::Cron {
            expr: "0 9 * * 3".into(),
            tz: "Mars/Olympus_Mons".into(),
        };
        assert!(matches!(
            compute_next_run_at_ms(&schedule, 0),
            Err(CronError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn every_without_anchor_fires_one_period_from_now() {
        let schedule = Schedule::Every {
            every_ms: 30_000,
            anchor_ms: None,
        };
        assert_eq!(compute_next_run_at_ms(&schedule, 1_000).unwrap(), 31_000);
    }

    #[test]
    fn every_with_anchor_advances_on_the_grid() {
        let anchor = 1_700_000_000_000;
        let schedule = Schedule::Every {
            every_ms: 30_000,
            anchor_ms: Some(anchor),
        };
        assert_eq!(
            compute_next_run_at_ms(&schedule, anchor + 10_000).unwrap(),
            anchor + 30_000
        );
    }

    #[test]
    fn every_anchor_hit_exactly_still_advances() {
        let anchor = 1_700_000_000_000;
        let schedule = Schedule::Every {
            every_ms: 30_000,
            anchor_ms: Some(anchor),
        };
        assert_eq!(
            compute_next_run_at_ms(&schedule, anchor).unwrap(),
            anchor + 30_000
        );
    }

    #[test]
    fn every_future_anchor_fires_at_the_anchor() {
        let schedule = Schedule::Every {
            every_ms: 30_000,
            anchor_ms: Some(50_000),
        };
        assert_eq!(compute_next_run_at_ms(&schedule, 10_000).unwrap(), 50_000);
    }

    #[test]
    fn every_rejects_non_positive_interval() {
        let schedule = Schedule::Every {
            every_ms: 0,
            anchor_ms: None,
        };
        assert!(matches!(
            compute_next_run_at_ms(&schedule, 0),
            Err(CronError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn at_returns_the_instant_unconditionally() {
        let schedule = Schedule::At { at_ms: 42 };
        // Past or future, the instant comes back as-is; the store owns
        // one-shot semantics.
        assert_eq!(compute_next_run_at_ms(&schedule, 0).unwrap(), 42);
        assert_eq!(compute_next_run_at_ms(&schedule, 100_000).unwrap(), 42);
    }

    #[test]
    fn validate_accepts_good_and_rejects_bad() {
        assert!(validate(&Schedule::Cron {
            expr: "*/5 * * * *".into(),
            tz: "UTC".into(),
        })
        .is_ok());
        assert!(validate(&Schedule::Cron {
            expr: "not a cron".into(),
            tz: "UTC".into(),
        })
        .is_err());
        assert!(validate(&Schedule::Every {
            every_ms: -5,
            anchor_ms: None,
        })
        .is_err());
        assert!(validate(&Schedule::At { at_ms: 0 }).is_ok());
    }
}
