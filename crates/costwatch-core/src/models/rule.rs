//! Alert rule definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Kind of condition an alert rule checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Current-period total cost exceeds a fixed amount
    Threshold,
    /// Percent increase over the prior comparable period exceeds a percentage
    PercentageSpike,
    /// Projected month-end consumption exceeds a percentage of projection
    Budget,
    /// Weekend spend exceeds a fixed amount
    Anomaly,
}

impl RuleKind {
    /// String form used in storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Threshold => "threshold",
            Self::PercentageSpike => "percentage_spike",
            Self::Budget => "budget",
            Self::Anomaly => "anomaly",
        }
    }

    /// Whether this kind is parameterized by an absolute amount
    /// (as opposed to a percentage)
    pub fn uses_amount(&self) -> bool {
        matches!(self, Self::Threshold | Self::Anomaly)
    }
}

/// Lifecycle status of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// Rule is evaluated on every tick
    #[default]
    Active,
    /// Rule is skipped by the evaluator
    Paused,
}

/// Notification channel configuration attached to a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Email to one or more recipients
    Email { to: Vec<String> },
    /// Slack incoming webhook
    Slack { webhook_url: String },
    /// Microsoft Teams incoming webhook
    Teams { webhook_url: String },
}

impl ChannelConfig {
    /// Channel type name used in delivery results and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Email { .. } => "email",
            Self::Slack { .. } => "slack",
            Self::Teams { .. } => "teams",
        }
    }
}

/// A cost-alert rule definition
///
/// Created and edited by users through the dashboard; read-only to the
/// evaluation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier
    pub id: Uuid,

    /// Owning organization
    pub org_id: Uuid,

    /// Human-readable name
    pub name: String,

    /// Monitored target (connected cloud account/tenant)
    pub target_id: Uuid,

    /// Display name of the target, snapshotted into alerts
    pub target_name: String,

    /// Kind of condition
    pub kind: RuleKind,

    /// Absolute threshold in account currency (Threshold, Anomaly)
    pub threshold_amount: Option<f64>,

    /// Percentage threshold (PercentageSpike, Budget)
    pub threshold_percent: Option<f64>,

    /// Enabled notification channels
    pub channels: Vec<ChannelConfig>,

    /// Lifecycle status
    pub status: RuleStatus,

    /// When the rule was created
    pub created_at: DateTime<Utc>,

    /// When the rule was last updated
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    /// Whether the evaluator should consider this rule
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    /// Check the kind/threshold invariant: exactly one of the two threshold
    /// fields must be set, and it must be the one the kind uses.
    pub fn validate(&self) -> Result<()> {
        let (required, other, field) = if self.kind.uses_amount() {
            (self.threshold_amount, self.threshold_percent, "threshold_amount")
        } else {
            (self.threshold_percent, self.threshold_amount, "threshold_percent")
        };

        if required.is_none() {
            return Err(Error::validation(format!(
                "rule '{}' ({}) requires {}",
                self.name,
                self.kind.as_str(),
                field
            )));
        }
        if other.is_some() {
            return Err(Error::validation(format!(
                "rule '{}' ({}) must set only {}",
                self.name,
                self.kind.as_str(),
                field
            )));
        }
        Ok(())
    }

    /// The threshold value the rule's kind compares against
    pub fn reference_value(&self) -> Result<f64> {
        let value = if self.kind.uses_amount() {
            self.threshold_amount
        } else {
            self.threshold_percent
        };
        value.ok_or_else(|| {
            Error::validation(format!(
                "rule '{}' ({}) is missing its threshold",
                self.name,
                self.kind.as_str()
            ))
        })
    }
}

/// Input for creating a new alert rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleInput {
    pub org_id: Uuid,
    pub name: String,
    pub target_id: Uuid,
    pub target_name: String,
    pub kind: RuleKind,
    pub threshold_amount: Option<f64>,
    pub threshold_percent: Option<f64>,
    pub channels: Option<Vec<ChannelConfig>>,
    pub status: Option<RuleStatus>,
}

impl AlertRuleInput {
    /// Materialize a rule from this input, enforcing the threshold invariant
    pub fn into_rule(self) -> Result<AlertRule> {
        let now = Utc::now();
        let rule = AlertRule {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            name: self.name,
            target_id: self.target_id,
            target_name: self.target_name,
            kind: self.kind,
            threshold_amount: self.threshold_amount,
            threshold_percent: self.threshold_percent,
            channels: self.channels.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        rule.validate()?;
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(kind: RuleKind, amount: Option<f64>, percent: Option<f64>) -> AlertRuleInput {
        AlertRuleInput {
            org_id: Uuid::new_v4(),
            name: "test rule".to_string(),
            target_id: Uuid::new_v4(),
            target_name: "prod-account".to_string(),
            kind,
            threshold_amount: amount,
            threshold_percent: percent,
            channels: None,
            status: None,
        }
    }

    #[test]
    fn threshold_rule_requires_amount() {
        assert!(input(RuleKind::Threshold, Some(100.0), None).into_rule().is_ok());
        assert!(input(RuleKind::Threshold, None, Some(20.0)).into_rule().is_err());
        assert!(input(RuleKind::Threshold, None, None).into_rule().is_err());
    }

    #[test]
    fn spike_rule_requires_percent() {
        assert!(input(RuleKind::PercentageSpike, None, Some(50.0)).into_rule().is_ok());
        assert!(input(RuleKind::PercentageSpike, Some(100.0), None).into_rule().is_err());
    }

    #[test]
    fn both_thresholds_rejected() {
        assert!(input(RuleKind::Budget, Some(100.0), Some(80.0)).into_rule().is_err());
        assert!(input(RuleKind::Anomaly, Some(100.0), Some(80.0)).into_rule().is_err());
    }

    #[test]
    fn reference_value_follows_kind() {
        let rule = input(RuleKind::Anomaly, Some(250.0), None).into_rule().unwrap();
        assert_eq!(rule.reference_value().unwrap(), 250.0);

        let rule = input(RuleKind::Budget, None, Some(90.0)).into_rule().unwrap();
        assert_eq!(rule.reference_value().unwrap(), 90.0);
    }
}
