//! Digest aggregation
//!
//! Collapses an organization's queued alerts into one summary, grouped by
//! target and ordered by cost impact.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{AlertEvent, Severity};

/// Alert counts per severity level
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    /// Low-severity alerts
    pub low: usize,
    /// Medium-severity alerts
    pub medium: usize,
    /// High-severity alerts
    pub high: usize,
    /// Critical alerts
    pub critical: usize,
}

impl SeverityCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
            Severity::Critical => self.critical += 1,
        }
    }

    /// Total alerts across all severities
    pub fn total(&self) -> usize {
        self.low + self.medium + self.high + self.critical
    }
}

/// One target's share of a digest
#[derive(Debug, Clone, Serialize)]
pub struct TargetDigest {
    /// Monitored target
    pub target_id: Uuid,
    /// Display name of the target
    pub target_name: String,
    /// Alert counts by severity
    pub counts: SeverityCounts,
    /// Summed cost impact across the target's alerts
    pub cost_impact: f64,
    /// The alerts themselves, oldest first
    pub alerts: Vec<AlertEvent>,
}

/// A batched notification aggregating an organization's queued alerts
#[derive(Debug, Clone, Serialize)]
pub struct DigestSummary {
    /// Organization the digest belongs to
    pub org_id: Uuid,
    /// When the digest was assembled
    pub generated_at: DateTime<Utc>,
    /// Summed cost impact across every included alert
    pub total_cost_impact: f64,
    /// Per-target groups, highest impact first
    pub targets: Vec<TargetDigest>,
}

impl DigestSummary {
    /// Total number of alerts included
    pub fn total_alerts(&self) -> usize {
        self.targets.iter().map(|t| t.counts.total()).sum()
    }
}

/// Aggregate queued alert events into a digest summary.
///
/// Cost impact per alert is `max(0, observed - reference)`, so alerts below
/// their reference (possible for percentage rules) contribute nothing
/// rather than subtracting. Targets sort by impact descending, name as the
/// tiebreaker.
pub fn build_digest(
    org_id: Uuid,
    events: Vec<AlertEvent>,
    generated_at: DateTime<Utc>,
) -> DigestSummary {
    let mut groups: HashMap<Uuid, TargetDigest> = HashMap::new();

    for event in events {
        let group = groups.entry(event.target_id).or_insert_with(|| TargetDigest {
            target_id: event.target_id,
            target_name: event.target_name.clone(),
            counts: SeverityCounts::default(),
            cost_impact: 0.0,
            alerts: Vec::new(),
        });
        group.counts.record(event.severity);
        group.cost_impact += event.cost_impact();
        group.alerts.push(event);
    }

    let mut targets: Vec<TargetDigest> = groups.into_values().collect();
    for target in &mut targets {
        target.alerts.sort_by_key(|a| a.triggered_at);
    }
    targets.sort_by(|a, b| {
        b.cost_impact
            .partial_cmp(&a.cost_impact)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.target_name.cmp(&b.target_name))
    });

    let total_cost_impact = targets.iter().map(|t| t.cost_impact).sum();

    DigestSummary {
        org_id,
        generated_at,
        total_cost_impact,
        targets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(target: Uuid, name: &str, severity: Severity, observed: f64, reference: f64) -> AlertEvent {
        AlertEvent {
            id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            target_id: target,
            target_name: name.to_string(),
            severity,
            observed_value: observed,
            reference_value: reference,
            percent_change: None,
            top_contributors: vec![],
            triggered_at: Utc::now(),
            queued_for_digest: true,
            digest_batch_id: None,
        }
    }

    #[test]
    fn impact_is_sum_of_clamped_excess() {
        let org = Uuid::new_v4();
        let target = Uuid::new_v4();
        let events = vec![
            event(target, "prod", Severity::High, 250.0, 100.0),
            event(target, "prod", Severity::Low, 110.0, 100.0),
            // Below reference: contributes zero, not a negative amount
            event(target, "prod", Severity::Low, 80.0, 100.0),
        ];

        let digest = build_digest(org, events, Utc::now());
        assert_eq!(digest.total_cost_impact, 160.0);
        assert_eq!(digest.targets.len(), 1);
        assert_eq!(digest.targets[0].cost_impact, 160.0);
        assert_eq!(digest.total_alerts(), 3);
    }

    #[test]
    fn targets_sorted_by_impact_descending() {
        let org = Uuid::new_v4();
        let (small, big) = (Uuid::new_v4(), Uuid::new_v4());
        let events = vec![
            event(small, "staging", Severity::Low, 120.0, 100.0),
            event(big, "prod", Severity::Critical, 500.0, 100.0),
        ];

        let digest = build_digest(org, events, Utc::now());
        assert_eq!(digest.targets[0].target_name, "prod");
        assert_eq!(digest.targets[1].target_name, "staging");
    }

    #[test]
    fn counts_grouped_by_severity() {
        let org = Uuid::new_v4();
        let target = Uuid::new_v4();
        let events = vec![
            event(target, "prod", Severity::Critical, 300.0, 100.0),
            event(target, "prod", Severity::Critical, 280.0, 100.0),
            event(target, "prod", Severity::Medium, 130.0, 100.0),
        ];

        let digest = build_digest(org, events, Utc::now());
        let counts = &digest.targets[0].counts;
        assert_eq!(counts.critical, 2);
        assert_eq!(counts.medium, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn empty_digest_is_well_formed() {
        let digest = build_digest(Uuid::new_v4(), vec![], Utc::now());
        assert_eq!(digest.total_alerts(), 0);
        assert_eq!(digest.total_cost_impact, 0.0);
        assert!(digest.targets.is_empty());
    }
}
