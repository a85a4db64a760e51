//! Delivery routing
//!
//! Decides, per alert and organization, between immediate delivery and
//! deferral into a digest, honoring digest mode, quiet hours, and the
//! per-severity bypass flags.

use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::models::{
    parse_tz, AlertEvent, DigestFrequency, DigestSettings, NotificationPreferences, Severity,
};

/// The routing decision for one alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Dispatch across the rule's channels now
    Immediate,
    /// Defer into the digest queue until the scheduled time
    Queued {
        /// When the digest containing this alert is due
        scheduled_for: DateTime<Utc>,
    },
}

/// Route an alert event given the organization's preferences.
///
/// Absent preferences fail open to immediate delivery; a misconfigured
/// organization must not silently lose alerts. Branches are checked in
/// order: digest mode first, then quiet hours, then immediate.
pub fn route(
    event: &AlertEvent,
    preferences: Option<&NotificationPreferences>,
    now: DateTime<Utc>,
) -> RouteDecision {
    let Some(prefs) = preferences else {
        return RouteDecision::Immediate;
    };

    let bypass = (event.severity == Severity::Critical && prefs.critical_bypass)
        || (event.severity == Severity::High && prefs.high_bypass);

    if prefs.digest.enabled && prefs.digest.frequency != DigestFrequency::Immediate {
        if bypass {
            return RouteDecision::Immediate;
        }
        return RouteDecision::Queued {
            scheduled_for: next_digest_time(&prefs.digest, now),
        };
    }

    if prefs.quiet_hours.contains(now) {
        if bypass {
            return RouteDecision::Immediate;
        }
        return RouteDecision::Queued {
            scheduled_for: next_digest_time(&prefs.digest, now),
        };
    }

    RouteDecision::Immediate
}

/// Compute the next digest delivery instant, strictly after `now`.
///
/// Daily frequency (and immediate, for alerts deferred by quiet hours)
/// yields the next occurrence of the configured time of day; weekly yields
/// the next occurrence of the configured weekday. Times are interpreted in
/// the digest timezone.
pub fn next_digest_time(digest: &DigestSettings, now: DateTime<Utc>) -> DateTime<Utc> {
    let tz = parse_tz(&digest.timezone);
    let local_now = now.with_timezone(&tz);
    let delivery_time = NaiveTime::from_hms_opt(digest.hour.min(23), digest.minute.min(59), 0)
        .unwrap_or_default();

    let step_days = match digest.frequency {
        DigestFrequency::Weekly => 7,
        DigestFrequency::Daily | DigestFrequency::Immediate => 1,
    };

    let mut date = local_now.date_naive();
    if digest.frequency == DigestFrequency::Weekly {
        while date.weekday() != digest.weekday {
            date = date.checked_add_days(Days::new(1)).unwrap_or(date);
        }
    }

    let mut scheduled = resolve_local(&tz, date.and_time(delivery_time));
    while scheduled <= now {
        date = date.checked_add_days(Days::new(step_days)).unwrap_or(date);
        scheduled = resolve_local(&tz, date.and_time(delivery_time));
    }
    scheduled
}

/// Map a local wall-clock time into UTC, tolerating DST folds and gaps
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(first, _) => first.with_timezone(&Utc),
        LocalResult::None => {
            // Spring-forward gap; the wall clock skipped this time
            let shifted = naive + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map_or_else(|| Utc.from_utc_datetime(&naive), |dt| dt.with_timezone(&Utc))
        }
    }
}
