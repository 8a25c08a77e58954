//! Cron expression evaluation.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Field syntax: *, */N, N, N,M,...
//! Example: "0 8 * * 1" = every Monday at 8:00.
//!
//! Next-fire computation walks forward through real calendar time instead
//! of guessing from field positions, so multi-field expressions land on the
//! correct slot.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// Whether an expression parses as a valid 5-field cron schedule.
pub fn validate(expression: &str) -> bool {
    CronSpec::parse(expression).is_some()
}

/// Next matching time strictly after `after`, or None for an invalid
/// expression (or one that never matches, e.g. Feb 30).
pub fn next_fire_time(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let spec = CronSpec::parse(expression)?;

    let mut candidate = (after + Duration::minutes(1))
        .with_second(0)
        .unwrap_or(after)
        .with_nanosecond(0)
        .unwrap_or(after);

    // Scan at most ~366 days ahead; day-level mismatches jump to the next
    // midnight so yearly-ish schedules stay cheap.
    let horizon = after + Duration::days(366);
    while candidate <= horizon {
        if !spec.matches_day(&candidate) {
            candidate = (candidate + Duration::days(1))
                .with_hour(0)
                .and_then(|c| c.with_minute(0))
                .unwrap_or(candidate + Duration::days(1));
            continue;
        }
        if spec.matches_time(&candidate) {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}

struct CronSpec {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSpec {
    fn parse(expression: &str) -> Option<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return None;
        }
        let dow_raw = parse_field(parts[4], 0, 7)?;
        // 0 and 7 both mean Sunday.
        let days_of_week = dow_raw
            .into_iter()
            .map(|d| if d == 7 { 0 } else { d })
            .collect();
        Some(Self {
            minutes: parse_field(parts[0], 0, 59)?,
            hours: parse_field(parts[1], 0, 23)?,
            days_of_month: parse_field(parts[2], 1, 31)?,
            months: parse_field(parts[3], 1, 12)?,
            days_of_week,
            dom_restricted: parts[2] != "*",
            dow_restricted: parts[4] != "*",
        })
    }

    fn matches_time(&self, t: &DateTime<Utc>) -> bool {
        self.minutes.contains(&t.minute()) && self.hours.contains(&t.hour())
    }

    fn matches_day(&self, t: &DateTime<Utc>) -> bool {
        if !self.months.contains(&t.month()) {
            return false;
        }
        let dom_ok = self.days_of_month.contains(&t.day());
        let dow_ok = self
            .days_of_week
            .contains(&t.weekday().num_days_from_sunday());
        // Standard cron rule: when both day fields are restricted, either
        // matching is enough; otherwise both must hold (unrestricted fields
        // match everything anyway).
        if self.dom_restricted && self.dow_restricted {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }
}

/// Parse a cron field into the list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma-separated: "0,15,30,45"
    if field.contains(',') {
        let vals: Result<Vec<u32>, _> = field.split(',').map(|s| s.trim().parse()).collect();
        let vals = vals.ok()?;
        if vals.iter().any(|v| *v < min || *v > max) {
            return None;
        }
        return Some(vals);
    }

    // Single number
    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max {
        Some(vec![n])
    } else {
        None
    }
}
