//! Alert rule evaluation
//!
//! Pure functions from (rule, cost window) to an optional alert candidate.
//! Missing input data is a "cannot evaluate yet" outcome, never an error.

use chrono::Datelike;
use tracing::debug;

use crate::error::Result;
use crate::models::{AlertCandidate, AlertRule, CostWindow, RuleKind, Severity};

/// Number of contributing resources snapshotted into a candidate
pub const TOP_CONTRIBUTORS: usize = 3;

/// Evaluate one rule against its cost window.
///
/// Returns `Ok(None)` when the condition does not hold or the window lacks
/// the data the rule kind needs. A rule violating the threshold invariant is
/// a configuration error and fails fast for that rule only.
///
/// Deterministic: identical inputs always produce the identical candidate,
/// including its `triggered_at` (taken from the window, not the wall clock).
pub fn evaluate(rule: &AlertRule, window: &CostWindow) -> Result<Option<AlertCandidate>> {
    rule.validate()?;

    let firing = match rule.kind {
        RuleKind::Threshold => evaluate_threshold(rule, window)?,
        RuleKind::PercentageSpike => evaluate_spike(rule, window)?,
        RuleKind::Budget => evaluate_budget(rule, window)?,
        RuleKind::Anomaly => evaluate_anomaly(rule, window)?,
    };

    Ok(firing.map(|f| candidate(rule, window, f)))
}

/// A rule condition that held, before severity derivation
struct Firing {
    observed: f64,
    reference: f64,
    percent_change: Option<f64>,
}

fn evaluate_threshold(rule: &AlertRule, window: &CostWindow) -> Result<Option<Firing>> {
    let threshold = rule.reference_value()?;
    if !window.has_current_data() {
        debug!(rule_id = %rule.id, "no current-period cost data");
        return Ok(None);
    }

    let total = window.current_total();
    if total > threshold {
        return Ok(Some(Firing {
            observed: total,
            reference: threshold,
            percent_change: None,
        }));
    }
    Ok(None)
}

fn evaluate_spike(rule: &AlertRule, window: &CostWindow) -> Result<Option<Firing>> {
    let threshold_percent = rule.reference_value()?;
    if !window.has_current_data() {
        debug!(rule_id = %rule.id, "no current-period cost data");
        return Ok(None);
    }

    let previous = window.previous_total();
    if previous <= 0.0 {
        // No comparison baseline; a zero previous period must not read as an
        // infinite spike.
        debug!(rule_id = %rule.id, "no prior-period cost data for spike comparison");
        return Ok(None);
    }

    let current = window.current_total();
    let change = (current - previous) / previous * 100.0;
    if change > threshold_percent {
        return Ok(Some(Firing {
            observed: change,
            reference: threshold_percent,
            percent_change: Some(change),
        }));
    }
    Ok(None)
}

fn evaluate_budget(rule: &AlertRule, window: &CostWindow) -> Result<Option<Firing>> {
    let threshold_percent = rule.reference_value()?;

    let month_to_date = window.month_to_date_total();
    if window.month_to_date.is_empty() || month_to_date <= 0.0 {
        debug!(rule_id = %rule.id, "no month-to-date cost data");
        return Ok(None);
    }

    // Linear extrapolation from the days elapsed so far. Approximate on
    // purpose; uneven spend within a month skews the projection.
    let day_of_month = f64::from(window.as_of.day());
    let days_in_month = f64::from(days_in_month(window.as_of.year(), window.as_of.month()));
    let projected = month_to_date / day_of_month * days_in_month;
    if projected <= 0.0 {
        return Ok(None);
    }

    let consumed_percent = month_to_date / projected * 100.0;
    if consumed_percent > threshold_percent {
        return Ok(Some(Firing {
            observed: consumed_percent,
            reference: threshold_percent,
            percent_change: None,
        }));
    }
    Ok(None)
}

fn evaluate_anomaly(rule: &AlertRule, window: &CostWindow) -> Result<Option<Firing>> {
    let threshold = rule.reference_value()?;
    if !window.has_current_data() {
        debug!(rule_id = %rule.id, "no current-period cost data");
        return Ok(None);
    }

    // Narrow heuristic: spend on a weekend above the configured amount.
    let weekday = window.as_of.weekday();
    if weekday != chrono::Weekday::Sat && weekday != chrono::Weekday::Sun {
        return Ok(None);
    }

    let total = window.current_total();
    if total > threshold {
        return Ok(Some(Firing {
            observed: total,
            reference: threshold,
            percent_change: None,
        }));
    }
    Ok(None)
}

fn candidate(rule: &AlertRule, window: &CostWindow, firing: Firing) -> AlertCandidate {
    let severity = Severity::from_ratio(firing.observed / firing.reference);
    AlertCandidate {
        rule_id: rule.id,
        org_id: rule.org_id,
        target_id: rule.target_id,
        target_name: rule.target_name.clone(),
        severity,
        observed_value: firing.observed,
        reference_value: firing.reference,
        percent_change: firing.percent_change,
        contributors: window.top_contributors(TOP_CONTRIBUTORS),
        triggered_at: window.as_of,
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(30, |last| last.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertRuleInput, CostAggregate, ResourceCost};
    use chrono::{NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    fn rule(kind: RuleKind, amount: Option<f64>, percent: Option<f64>) -> AlertRule {
        AlertRuleInput {
            org_id: Uuid::new_v4(),
            name: "test".to_string(),
            target_id: Uuid::new_v4(),
            target_name: "prod-account".to_string(),
            kind,
            threshold_amount: amount,
            threshold_percent: percent,
            channels: None,
            status: None,
        }
        .into_rule()
        .unwrap()
    }

    fn day_total(date: NaiveDate, total: f64) -> CostAggregate {
        CostAggregate {
            target_id: Uuid::new_v4(),
            date,
            total_cost: total,
            resources: vec![],
        }
    }

    fn window_at(y: i32, m: u32, d: u32, current_total: f64) -> CostWindow {
        let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
        CostWindow {
            target_id: Uuid::new_v4(),
            as_of: Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
            current: vec![day_total(date, current_total)],
            previous: vec![],
            month_to_date: vec![],
        }
    }

    #[test]
    fn threshold_fires_above_amount() {
        let rule = rule(RuleKind::Threshold, Some(100.0), None);
        // Tuesday
        let window = window_at(2026, 3, 10, 250.0);

        let candidate = evaluate(&rule, &window).unwrap().unwrap();
        assert_eq!(candidate.observed_value, 250.0);
        assert_eq!(candidate.reference_value, 100.0);
        // 2.5x the threshold sits in the >= 2.0 band
        assert_eq!(candidate.severity, Severity::Critical);
        assert_eq!(candidate.percent_change, None);
    }

    #[test]
    fn threshold_does_not_fire_at_or_below_amount() {
        let rule = rule(RuleKind::Threshold, Some(100.0), None);
        assert!(evaluate(&rule, &window_at(2026, 3, 10, 100.0)).unwrap().is_none());
        assert!(evaluate(&rule, &window_at(2026, 3, 10, 40.0)).unwrap().is_none());
    }

    #[test]
    fn threshold_severity_bands() {
        let rule = rule(RuleKind::Threshold, Some(100.0), None);
        let severity = |total: f64| {
            evaluate(&rule, &window_at(2026, 3, 10, total))
                .unwrap()
                .unwrap()
                .severity
        };
        assert_eq!(severity(110.0), Severity::Low);
        assert_eq!(severity(130.0), Severity::Medium);
        assert_eq!(severity(160.0), Severity::High);
        assert_eq!(severity(200.0), Severity::Critical);
    }

    #[test]
    fn threshold_no_data_is_not_a_firing() {
        let rule = rule(RuleKind::Threshold, Some(100.0), None);
        let mut window = window_at(2026, 3, 10, 0.0);
        window.current.clear();
        assert!(evaluate(&rule, &window).unwrap().is_none());
    }

    #[test]
    fn spike_fires_on_relative_increase() {
        let rule = rule(RuleKind::PercentageSpike, None, Some(50.0));
        let mut window = window_at(2026, 3, 10, 200.0);
        window.previous = vec![day_total(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(), 100.0)];

        let candidate = evaluate(&rule, &window).unwrap().unwrap();
        assert_eq!(candidate.observed_value, 100.0);
        assert_eq!(candidate.percent_change, Some(100.0));
        // 100% change against a 50% threshold is a 2x ratio
        assert_eq!(candidate.severity, Severity::Critical);
    }

    #[test]
    fn spike_with_zero_previous_period_never_fires() {
        let rule = rule(RuleKind::PercentageSpike, None, Some(50.0));
        let mut window = window_at(2026, 3, 10, 500.0);
        window.previous = vec![day_total(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(), 0.0)];
        assert!(evaluate(&rule, &window).unwrap().is_none());

        window.previous.clear();
        assert!(evaluate(&rule, &window).unwrap().is_none());
    }

    #[test]
    fn spike_below_threshold_does_not_fire() {
        let rule = rule(RuleKind::PercentageSpike, None, Some(50.0));
        let mut window = window_at(2026, 3, 10, 120.0);
        window.previous = vec![day_total(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(), 100.0)];
        assert!(evaluate(&rule, &window).unwrap().is_none());
    }

    #[test]
    fn budget_projection_fires_late_in_month() {
        let rule = rule(RuleKind::Budget, None, Some(80.0));
        // Day 28 of a 31-day month: 28/31 of projection consumed (~90%)
        let mut window = window_at(2026, 3, 28, 0.0);
        window.month_to_date = vec![day_total(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), 900.0)];

        let candidate = evaluate(&rule, &window).unwrap().unwrap();
        assert!(candidate.observed_value > 80.0);
        assert_eq!(candidate.reference_value, 80.0);
    }

    #[test]
    fn budget_projection_quiet_early_in_month() {
        let rule = rule(RuleKind::Budget, None, Some(80.0));
        // Day 10 of 31: ~32% of projection consumed
        let mut window = window_at(2026, 3, 10, 0.0);
        window.month_to_date = vec![day_total(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), 900.0)];
        assert!(evaluate(&rule, &window).unwrap().is_none());
    }

    #[test]
    fn budget_without_spend_never_fires() {
        let rule = rule(RuleKind::Budget, None, Some(80.0));
        let window = window_at(2026, 3, 28, 0.0);
        assert!(evaluate(&rule, &window).unwrap().is_none());
    }

    #[test]
    fn anomaly_fires_only_on_weekends() {
        let rule = rule(RuleKind::Anomaly, Some(50.0), None);

        // 2026-03-14 is a Saturday
        let weekend = window_at(2026, 3, 14, 120.0);
        assert!(evaluate(&rule, &weekend).unwrap().is_some());

        // Same spend on the preceding Tuesday
        let weekday = window_at(2026, 3, 10, 120.0);
        assert!(evaluate(&rule, &weekday).unwrap().is_none());

        // Weekend spend under the threshold
        let quiet_weekend = window_at(2026, 3, 14, 30.0);
        assert!(evaluate(&rule, &quiet_weekend).unwrap().is_none());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let rule = rule(RuleKind::Threshold, Some(100.0), None);
        let date = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let window = CostWindow {
            target_id: rule.target_id,
            as_of: Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
            current: vec![CostAggregate {
                target_id: rule.target_id,
                date,
                total_cost: 250.0,
                resources: vec![ResourceCost {
                    resource_id: "vm-1".to_string(),
                    resource_name: "api server".to_string(),
                    cost: 180.0,
                }],
            }],
            previous: vec![],
            month_to_date: vec![],
        };

        let first = evaluate(&rule, &window).unwrap();
        let second = evaluate(&rule, &window).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn candidate_snapshots_top_contributors() {
        let rule = rule(RuleKind::Threshold, Some(10.0), None);
        let date = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let resources: Vec<ResourceCost> = (0..5)
            .map(|i| ResourceCost {
                resource_id: format!("r-{i}"),
                resource_name: format!("resource {i}"),
                cost: f64::from(i) * 10.0,
            })
            .collect();
        let mut window = window_at(2026, 3, 10, 100.0);
        window.current = vec![CostAggregate {
            target_id: rule.target_id,
            date,
            total_cost: 100.0,
            resources,
        }];

        let candidate = evaluate(&rule, &window).unwrap().unwrap();
        assert_eq!(candidate.contributors.len(), TOP_CONTRIBUTORS);
        assert_eq!(candidate.contributors[0].resource_id, "r-4");
    }

    #[test]
    fn misconfigured_rule_fails_fast() {
        let mut rule = rule(RuleKind::Threshold, Some(100.0), None);
        rule.threshold_amount = None;
        assert!(evaluate(&rule, &window_at(2026, 3, 10, 250.0)).is_err());
    }
}
