//! Alert candidates and stored alert events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cost::ResourceCost;

/// Alert severity level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Barely over threshold
    #[default]
    Low,
    /// Noticeably over threshold
    Medium,
    /// Well over threshold
    High,
    /// At least double the threshold
    Critical,
}

impl Severity {
    /// Derive severity from the observed-to-threshold ratio.
    ///
    /// `< 1.2` low, `< 1.5` medium, `< 2.0` high, `>= 2.0` critical.
    /// The same table applies to every rule kind.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 2.0 {
            Self::Critical
        } else if ratio >= 1.5 {
            Self::High
        } else if ratio >= 1.2 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// String form used in storage and payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// The output of a rule firing, before deduplication
///
/// Produced by the evaluator as a pure function of rule + cost window;
/// carries everything needed to build an [`AlertEvent`] on acceptance.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    /// Rule that fired
    pub rule_id: Uuid,
    /// Owning organization
    pub org_id: Uuid,
    /// Monitored target
    pub target_id: Uuid,
    /// Display name of the target
    pub target_name: String,
    /// Derived severity
    pub severity: Severity,
    /// The value the rule observed
    pub observed_value: f64,
    /// The threshold/reference it was compared against
    pub reference_value: f64,
    /// Percent change over the comparison period, when applicable
    pub percent_change: Option<f64>,
    /// Contributing resources, cost-descending
    pub contributors: Vec<ResourceCost>,
    /// Evaluation instant
    pub triggered_at: DateTime<Utc>,
}

/// A stored alert event
///
/// Immutable once created except for the digest-queue flag and the
/// digest-batch assignment. Never deleted by this subsystem; the dashboard's
/// alert history reads from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Unique identifier
    pub id: Uuid,

    /// Rule that fired
    pub rule_id: Uuid,

    /// Owning organization
    pub org_id: Uuid,

    /// Monitored target
    pub target_id: Uuid,

    /// Display name of the target at evaluation time
    pub target_name: String,

    /// Severity level
    pub severity: Severity,

    /// The value the rule observed
    pub observed_value: f64,

    /// The threshold/reference it was compared against
    pub reference_value: f64,

    /// Percent change over the comparison period, when applicable
    pub percent_change: Option<f64>,

    /// Frozen snapshot of the highest-cost contributing resources
    pub top_contributors: Vec<ResourceCost>,

    /// When the alert fired
    pub triggered_at: DateTime<Utc>,

    /// Whether delivery was deferred into a digest
    pub queued_for_digest: bool,

    /// Digest batch this event was delivered in, once sent
    pub digest_batch_id: Option<Uuid>,
}

impl AlertEvent {
    /// Non-negative excess of observed cost over the reference value
    pub fn cost_impact(&self) -> f64 {
        (self.observed_value - self.reference_value).max(0.0)
    }
}
