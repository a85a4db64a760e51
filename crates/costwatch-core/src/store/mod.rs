//! Storage collaborators for the alerting pipeline
//!
//! The pipeline reads and writes through these traits; persistence
//! technology stays behind them. `memory` backs tests and local runs,
//! `postgres` backs deployments.

mod memory;
mod postgres;

pub use memory::{
    MemoryAlertStore, MemoryCostFeed, MemoryDigestQueue, MemoryPreferenceStore, MemoryRuleStore,
};
pub use postgres::{
    Database, PgAlertStore, PgCostFeed, PgDigestQueue, PgPreferenceStore, PgRuleStore,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AlertEvent, AlertRule, AlertRuleInput, CostAggregate, DigestQueueEntry,
    NotificationPreferences, RuleStatus,
};

/// Read/write operations on alert rules
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Create a rule from validated input
    async fn create(&self, input: AlertRuleInput) -> Result<AlertRule>;

    /// Fetch a rule by id
    async fn get(&self, id: Uuid) -> Result<Option<AlertRule>>;

    /// List rules, optionally scoped to an organization
    async fn list(&self, org_id: Option<Uuid>) -> Result<Vec<AlertRule>>;

    /// List the rules the evaluator should run
    async fn list_active(&self) -> Result<Vec<AlertRule>>;

    /// Change a rule's lifecycle status; false when the rule does not exist
    async fn set_status(&self, id: Uuid, status: RuleStatus) -> Result<bool>;

    /// Delete a rule; false when the rule does not exist
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// Read/write operations on notification preferences
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Fetch the preferences record for an organization, if any
    async fn for_org(&self, org_id: Uuid) -> Result<Option<NotificationPreferences>>;

    /// Create or replace an organization's preferences
    async fn upsert(&self, preferences: &NotificationPreferences) -> Result<()>;
}

/// Append-mostly store of accepted alert events
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert the event unless one with the same (rule, target) exists
    /// within `window` before the event's trigger time. The check and the
    /// write are atomic per key; returns false when suppressed.
    async fn insert_unless_duplicate(&self, event: &AlertEvent, window: Duration) -> Result<bool>;

    /// Fetch an event by id
    async fn get(&self, id: Uuid) -> Result<Option<AlertEvent>>;

    /// Fetch a set of events by id; silently skips missing ids
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<AlertEvent>>;

    /// Flag an event as deferred into the digest queue
    async fn mark_queued(&self, id: Uuid) -> Result<()>;

    /// Stamp a shared digest batch onto a set of events
    async fn assign_digest_batch(&self, ids: &[Uuid], batch_id: Uuid) -> Result<()>;

    /// Recent events for the alert-history screen, newest first
    async fn list_recent(
        &self,
        org_id: Option<Uuid>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AlertEvent>>;
}

/// Pending digest deliveries
#[async_trait]
pub trait DigestQueueStore: Send + Sync {
    /// Add a pending entry
    async fn enqueue(&self, entry: &DigestQueueEntry) -> Result<()>;

    /// All unsent entries whose scheduled time has passed
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<DigestQueueEntry>>;

    /// Mark a batch of entries as sent. Terminal and idempotent; safe to
    /// retry after a partial failure.
    async fn mark_sent(&self, ids: &[Uuid], batch_id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// Read-only cost data populated by the ingestion side of the product
#[async_trait]
pub trait CostFeed: Send + Sync {
    /// Daily aggregates for a target over an inclusive date range
    async fn aggregates(
        &self,
        target_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CostAggregate>>;
}
