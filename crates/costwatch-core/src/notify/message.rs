//! Notification payloads
//!
//! Plain-text subject/body plus a structured payload for webhook channels.
//! Rich HTML templating belongs to the dashboard, not this core.

use std::fmt::Write as _;

use serde_json::json;

use crate::alerting::DigestSummary;
use crate::models::{AlertEvent, AlertRule};

/// A single alert rendered for delivery
#[derive(Debug, Clone)]
pub struct AlertMessage {
    /// Name of the rule that fired
    pub rule_name: String,
    /// The accepted alert event
    pub event: AlertEvent,
    /// Deep link back to the alert in the dashboard
    pub link: String,
}

impl AlertMessage {
    /// Render an accepted event for delivery
    pub fn new(rule: &AlertRule, event: AlertEvent, dashboard_base_url: &str) -> Self {
        let link = format!(
            "{}/orgs/{}/alerts/{}",
            dashboard_base_url.trim_end_matches('/'),
            event.org_id,
            event.id
        );
        Self {
            rule_name: rule.name.clone(),
            event,
            link,
        }
    }

    fn subject(&self) -> String {
        format!(
            "[{}] Cost alert: {} on {}",
            self.event.severity.as_str(),
            self.rule_name,
            self.event.target_name
        )
    }

    fn body_text(&self) -> String {
        let e = &self.event;
        let mut body = String::new();
        let _ = writeln!(body, "Target: {}", e.target_name);
        let _ = writeln!(body, "Severity: {}", e.severity.as_str());
        let _ = writeln!(body, "Observed: {:.2}", e.observed_value);
        let _ = writeln!(body, "Threshold: {:.2}", e.reference_value);
        if let Some(change) = e.percent_change {
            let _ = writeln!(body, "Change: {change:+.1}%");
        }
        if !e.top_contributors.is_empty() {
            let _ = writeln!(body, "Top contributors:");
            for resource in &e.top_contributors {
                let _ = writeln!(body, "  - {}: {:.2}", resource.resource_name, resource.cost);
            }
        }
        let _ = writeln!(body, "View alert: {}", self.link);
        body
    }

    fn webhook_payload(&self) -> serde_json::Value {
        let e = &self.event;
        json!({
            "kind": "alert",
            "alert_id": e.id,
            "rule_name": self.rule_name,
            "target_id": e.target_id,
            "target_name": e.target_name,
            "severity": e.severity.as_str(),
            "observed_value": e.observed_value,
            "reference_value": e.reference_value,
            "percent_change": e.percent_change,
            "top_contributors": e.top_contributors,
            "triggered_at": e.triggered_at,
            "link": self.link,
        })
    }
}

/// An aggregated digest rendered for delivery
#[derive(Debug, Clone)]
pub struct DigestMessage {
    /// The aggregated summary
    pub summary: DigestSummary,
    /// Deep link to the organization's alert history
    pub link: String,
}

impl DigestMessage {
    /// Render a digest summary for delivery
    pub fn new(summary: DigestSummary, dashboard_base_url: &str) -> Self {
        let link = format!(
            "{}/orgs/{}/alerts",
            dashboard_base_url.trim_end_matches('/'),
            summary.org_id
        );
        Self { summary, link }
    }

    fn subject(&self) -> String {
        format!(
            "Cost alert digest: {} alert(s) across {} target(s)",
            self.summary.total_alerts(),
            self.summary.targets.len()
        )
    }

    fn body_text(&self) -> String {
        let mut body = String::new();
        let _ = writeln!(
            body,
            "{} alert(s), total cost impact {:.2}",
            self.summary.total_alerts(),
            self.summary.total_cost_impact
        );
        for target in &self.summary.targets {
            let c = &target.counts;
            let _ = writeln!(
                body,
                "\n{} (impact {:.2}): {} critical, {} high, {} medium, {} low",
                target.target_name, target.cost_impact, c.critical, c.high, c.medium, c.low
            );
            for alert in &target.alerts {
                let _ = writeln!(
                    body,
                    "  - [{}] observed {:.2} vs {:.2}",
                    alert.severity.as_str(),
                    alert.observed_value,
                    alert.reference_value
                );
            }
        }
        let _ = writeln!(body, "\nView alerts: {}", self.link);
        body
    }

    fn webhook_payload(&self) -> serde_json::Value {
        json!({
            "kind": "digest",
            "org_id": self.summary.org_id,
            "generated_at": self.summary.generated_at,
            "total_alerts": self.summary.total_alerts(),
            "total_cost_impact": self.summary.total_cost_impact,
            "targets": self.summary.targets,
            "link": self.link,
        })
    }
}

/// Anything the dispatcher can deliver: a single alert or a digest
#[derive(Debug, Clone)]
pub enum Notification {
    /// One immediately-delivered alert
    Alert(AlertMessage),
    /// One aggregated digest
    Digest(DigestMessage),
}

impl Notification {
    /// Rendered subject line (email subject, chat message title)
    pub fn subject(&self) -> String {
        match self {
            Self::Alert(m) => m.subject(),
            Self::Digest(m) => m.subject(),
        }
    }

    /// Rendered plain-text body
    pub fn body_text(&self) -> String {
        match self {
            Self::Alert(m) => m.body_text(),
            Self::Digest(m) => m.body_text(),
        }
    }

    /// Structured payload for webhook channels
    pub fn webhook_payload(&self) -> serde_json::Value {
        match self {
            Self::Alert(m) => m.webhook_payload(),
            Self::Digest(m) => m.webhook_payload(),
        }
    }

    /// Severity driving channel styling; digests have none
    pub fn severity(&self) -> Option<crate::models::Severity> {
        match self {
            Self::Alert(m) => Some(m.event.severity),
            Self::Digest(_) => None,
        }
    }
}
