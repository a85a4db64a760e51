//! Cost aggregates supplied by the ingestion feed
//!
//! The evaluation pipeline only reads these; ingestion is a separate concern.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-resource share of a daily total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCost {
    /// Provider-side resource identifier
    pub resource_id: String,
    /// Display name
    pub resource_name: String,
    /// Cost attributed to the resource for the day
    pub cost: f64,
}

/// A daily total of spend for a target, with an optional resource breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAggregate {
    /// Monitored target the costs belong to
    pub target_id: Uuid,
    /// Day the costs were incurred
    pub date: NaiveDate,
    /// Total spend for the day
    pub total_cost: f64,
    /// Per-resource breakdown (may be empty)
    pub resources: Vec<ResourceCost>,
}

/// The slice of cost data a single rule evaluation works from
///
/// `current` always holds the current period's rows; `previous` and
/// `month_to_date` are populated only for the rule kinds that need them.
#[derive(Debug, Clone, PartialEq)]
pub struct CostWindow {
    /// Target the window was assembled for
    pub target_id: Uuid,
    /// Evaluation reference instant; all date arithmetic derives from this
    pub as_of: DateTime<Utc>,
    /// Current period rows
    pub current: Vec<CostAggregate>,
    /// Prior comparable period rows
    pub previous: Vec<CostAggregate>,
    /// Rows from the first of the month through the current day
    pub month_to_date: Vec<CostAggregate>,
}

impl CostWindow {
    /// Total spend over the current period
    pub fn current_total(&self) -> f64 {
        self.current.iter().map(|a| a.total_cost).sum()
    }

    /// Total spend over the prior comparable period
    pub fn previous_total(&self) -> f64 {
        self.previous.iter().map(|a| a.total_cost).sum()
    }

    /// Total spend month-to-date
    pub fn month_to_date_total(&self) -> f64 {
        self.month_to_date.iter().map(|a| a.total_cost).sum()
    }

    /// Whether the current period has any data at all
    pub fn has_current_data(&self) -> bool {
        !self.current.is_empty()
    }

    /// Highest-cost contributing resources across the current period,
    /// summed per resource and sorted by cost descending.
    ///
    /// Ties break on resource id so evaluation stays deterministic.
    pub fn top_contributors(&self, n: usize) -> Vec<ResourceCost> {
        let mut by_resource: HashMap<&str, ResourceCost> = HashMap::new();
        for aggregate in &self.current {
            for resource in &aggregate.resources {
                by_resource
                    .entry(resource.resource_id.as_str())
                    .and_modify(|r| r.cost += resource.cost)
                    .or_insert_with(|| resource.clone());
            }
        }

        let mut contributors: Vec<ResourceCost> = by_resource.into_values().collect();
        contributors.sort_by(|a, b| {
            b.cost
                .partial_cmp(&a.cost)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        contributors.truncate(n);
        contributors
    }
}
