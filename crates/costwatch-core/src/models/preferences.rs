//! Per-organization notification preferences

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// How often digests are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestFrequency {
    /// No batching; alerts deliver as they fire
    Immediate,
    /// One digest per day at the configured time
    #[default]
    Daily,
    /// One digest per week on the configured weekday
    Weekly,
}

impl DigestFrequency {
    /// String form used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

/// A daily window during which non-bypassing alerts are deferred
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuietHours {
    /// Whether the window is applied at all
    pub enabled: bool,
    /// Window start, in the organization's local time
    pub start: NaiveTime,
    /// Window end; a start after the end means the window wraps midnight
    pub end: NaiveTime,
    /// IANA timezone name the window is expressed in
    pub timezone: String,
}

impl QuietHours {
    /// Whether `now` falls inside the window.
    ///
    /// Overnight spans wrap: with start > end the window covers
    /// `[start, midnight)` plus `[midnight, end)`.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let local = now.with_timezone(&parse_tz(&self.timezone)).time();
        if self.start <= self.end {
            local >= self.start && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }
}

/// When and where digests are delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestSettings {
    /// Whether digest mode is on
    pub enabled: bool,
    /// Delivery cadence
    pub frequency: DigestFrequency,
    /// Delivery hour (0-23), in the digest timezone
    pub hour: u32,
    /// Delivery minute (0-59)
    pub minute: u32,
    /// Delivery weekday, used by the weekly frequency
    pub weekday: Weekday,
    /// IANA timezone name delivery times are expressed in
    pub timezone: String,
}

/// Per-organization notification preferences
///
/// Exactly one record per organization; the router fails open (delivers
/// immediately) when none exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Owning organization
    pub org_id: Uuid,
    /// Quiet-hours window
    pub quiet_hours: QuietHours,
    /// Digest batching settings
    pub digest: DigestSettings,
    /// Critical alerts skip quiet hours and digesting
    pub critical_bypass: bool,
    /// High alerts skip quiet hours and digesting
    pub high_bypass: bool,
}

impl NotificationPreferences {
    /// Defaults applied when an organization first gets a record: quiet
    /// hours off, digests off (daily 08:00 UTC when enabled), critical
    /// alerts bypassing, high alerts not.
    pub fn defaults_for(org_id: Uuid) -> Self {
        Self {
            org_id,
            quiet_hours: QuietHours {
                enabled: false,
                start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
                end: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
                timezone: "UTC".to_string(),
            },
            digest: DigestSettings {
                enabled: false,
                frequency: DigestFrequency::Daily,
                hour: 8,
                minute: 0,
                weekday: Weekday::Mon,
                timezone: "UTC".to_string(),
            },
            critical_bypass: true,
            high_bypass: false,
        }
    }
}

/// Parse an IANA timezone name, falling back to UTC.
///
/// A bad zone name is a misconfiguration, not a reason to drop alerts.
pub(crate) fn parse_tz(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        warn!(timezone = name, "unknown timezone, falling back to UTC");
        Tz::UTC
    })
}
