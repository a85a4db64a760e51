//! In-memory store implementations
//!
//! Back tests and local development. Writes that must be atomic
//! (the dedup conditional insert) run under one write-lock section.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AlertEvent, AlertRule, AlertRuleInput, CostAggregate, DigestQueueEntry,
    NotificationPreferences, RuleStatus,
};

use super::{AlertStore, CostFeed, DigestQueueStore, PreferenceStore, RuleStore};

/// In-memory rule store
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<Uuid, AlertRule>>,
}

impl MemoryRuleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a rule's thresholds without validation, to simulate a
    /// record corrupted outside this process
    #[cfg(test)]
    pub(crate) fn corrupt_thresholds(
        &self,
        id: Uuid,
        amount: Option<f64>,
        percent: Option<f64>,
    ) {
        if let Some(rule) = self.rules.write().get_mut(&id) {
            rule.threshold_amount = amount;
            rule.threshold_percent = percent;
        }
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn create(&self, input: AlertRuleInput) -> Result<AlertRule> {
        let rule = input.into_rule()?;
        self.rules.write().insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AlertRule>> {
        Ok(self.rules.read().get(&id).cloned())
    }

    async fn list(&self, org_id: Option<Uuid>) -> Result<Vec<AlertRule>> {
        let mut rules: Vec<AlertRule> = self
            .rules
            .read()
            .values()
            .filter(|r| org_id.map_or(true, |org| r.org_id == org))
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn list_active(&self) -> Result<Vec<AlertRule>> {
        let mut rules: Vec<AlertRule> = self
            .rules
            .read()
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn set_status(&self, id: Uuid, status: RuleStatus) -> Result<bool> {
        let mut rules = self.rules.write();
        match rules.get_mut(&id) {
            Some(rule) => {
                rule.status = status;
                rule.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.rules.write().remove(&id).is_some())
    }
}

/// In-memory preference store
#[derive(Default)]
pub struct MemoryPreferenceStore {
    preferences: RwLock<HashMap<Uuid, NotificationPreferences>>,
}

impl MemoryPreferenceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn for_org(&self, org_id: Uuid) -> Result<Option<NotificationPreferences>> {
        Ok(self.preferences.read().get(&org_id).cloned())
    }

    async fn upsert(&self, preferences: &NotificationPreferences) -> Result<()> {
        self.preferences
            .write()
            .insert(preferences.org_id, preferences.clone());
        Ok(())
    }
}

/// In-memory alert event store
#[derive(Default)]
pub struct MemoryAlertStore {
    events: RwLock<Vec<AlertEvent>>,
}

impl MemoryAlertStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn insert_unless_duplicate(&self, event: &AlertEvent, window: Duration) -> Result<bool> {
        // The write lock makes the check-then-insert atomic per store
        let mut events = self.events.write();
        let cutoff = event.triggered_at - window;
        let duplicate = events.iter().any(|existing| {
            existing.rule_id == event.rule_id
                && existing.target_id == event.target_id
                && existing.triggered_at > cutoff
        });
        if duplicate {
            return Ok(false);
        }
        events.push(event.clone());
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AlertEvent>> {
        Ok(self.events.read().iter().find(|e| e.id == id).cloned())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<AlertEvent>> {
        let events = self.events.read();
        Ok(ids
            .iter()
            .filter_map(|id| events.iter().find(|e| e.id == *id).cloned())
            .collect())
    }

    async fn mark_queued(&self, id: Uuid) -> Result<()> {
        if let Some(event) = self.events.write().iter_mut().find(|e| e.id == id) {
            event.queued_for_digest = true;
        }
        Ok(())
    }

    async fn assign_digest_batch(&self, ids: &[Uuid], batch_id: Uuid) -> Result<()> {
        let mut events = self.events.write();
        for event in events.iter_mut().filter(|e| ids.contains(&e.id)) {
            event.digest_batch_id = Some(batch_id);
        }
        Ok(())
    }

    async fn list_recent(
        &self,
        org_id: Option<Uuid>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AlertEvent>> {
        let mut events: Vec<AlertEvent> = self
            .events
            .read()
            .iter()
            .filter(|e| e.triggered_at >= since)
            .filter(|e| org_id.map_or(true, |org| e.org_id == org))
            .cloned()
            .collect();
        events.sort_by_key(|e| std::cmp::Reverse(e.triggered_at));
        events.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(events)
    }
}

/// In-memory digest queue
#[derive(Default)]
pub struct MemoryDigestQueue {
    entries: RwLock<Vec<DigestQueueEntry>>,
}

impl MemoryDigestQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry
    pub fn all(&self) -> Vec<DigestQueueEntry> {
        self.entries.read().clone()
    }

    /// Pull every unsent entry's scheduled time back, to make it due
    #[cfg(test)]
    pub(crate) fn make_all_due(&self, at: DateTime<Utc>) {
        for entry in self.entries.write().iter_mut() {
            if entry.included_at.is_none() {
                entry.scheduled_for = at;
            }
        }
    }
}

#[async_trait]
impl DigestQueueStore for MemoryDigestQueue {
    async fn enqueue(&self, entry: &DigestQueueEntry) -> Result<()> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<DigestQueueEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.is_due(now))
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, ids: &[Uuid], batch_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut entries = self.entries.write();
        for entry in entries.iter_mut().filter(|e| ids.contains(&e.id)) {
            entry.included_at = Some(at);
            entry.batch_id = Some(batch_id);
        }
        Ok(())
    }
}

/// In-memory cost feed
#[derive(Default)]
pub struct MemoryCostFeed {
    rows: RwLock<Vec<CostAggregate>>,
}

impl MemoryCostFeed {
    /// Create an empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one daily aggregate
    pub fn push(&self, aggregate: CostAggregate) {
        self.rows.write().push(aggregate);
    }
}

#[async_trait]
impl CostFeed for MemoryCostFeed {
    async fn aggregates(
        &self,
        target_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CostAggregate>> {
        let mut rows: Vec<CostAggregate> = self
            .rows
            .read()
            .iter()
            .filter(|a| a.target_id == target_id && a.date >= from && a.date <= to)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.date);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelConfig, RuleKind, Severity};

    fn rule_input(org_id: Uuid) -> AlertRuleInput {
        AlertRuleInput {
            org_id,
            name: "cap".to_string(),
            target_id: Uuid::new_v4(),
            target_name: "prod".to_string(),
            kind: RuleKind::Threshold,
            threshold_amount: Some(100.0),
            threshold_percent: None,
            channels: Some(vec![ChannelConfig::Slack {
                webhook_url: "https://hooks.slack.com/services/T/B/X".to_string(),
            }]),
            status: None,
        }
    }

    fn event(org_id: Uuid, triggered_at: DateTime<Utc>) -> AlertEvent {
        AlertEvent {
            id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            org_id,
            target_id: Uuid::new_v4(),
            target_name: "prod".to_string(),
            severity: Severity::Medium,
            observed_value: 130.0,
            reference_value: 100.0,
            percent_change: None,
            top_contributors: vec![],
            triggered_at,
            queued_for_digest: false,
            digest_batch_id: None,
        }
    }

    #[tokio::test]
    async fn rule_roundtrip_and_status() {
        let store = MemoryRuleStore::new();
        let org = Uuid::new_v4();
        let rule = store.create(rule_input(org)).await.unwrap();

        assert_eq!(store.list_active().await.unwrap().len(), 1);
        assert!(store.set_status(rule.id, RuleStatus::Paused).await.unwrap());
        assert!(store.list_active().await.unwrap().is_empty());
        assert_eq!(store.list(Some(org)).await.unwrap().len(), 1);
        assert!(store.delete(rule.id).await.unwrap());
        assert!(!store.delete(rule.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_recent_orders_and_limits() {
        let store = MemoryAlertStore::new();
        let org = Uuid::new_v4();
        let base = Utc::now();
        for minutes in [30, 10, 20] {
            let e = event(org, base - Duration::minutes(minutes));
            store.insert_unless_duplicate(&e, Duration::hours(1)).await.unwrap();
        }

        let recent = store
            .list_recent(Some(org), base - Duration::hours(1), 2)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].triggered_at > recent[1].triggered_at);
    }

    #[tokio::test]
    async fn digest_queue_due_filtering() {
        let queue = MemoryDigestQueue::new();
        let now = Utc::now();

        let due = DigestQueueEntry::new(Uuid::new_v4(), Uuid::new_v4(), now - Duration::minutes(5));
        let future =
            DigestQueueEntry::new(Uuid::new_v4(), Uuid::new_v4(), now + Duration::hours(5));
        queue.enqueue(&due).await.unwrap();
        queue.enqueue(&future).await.unwrap();

        let found = queue.due(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);

        let batch = Uuid::new_v4();
        queue.mark_sent(&[due.id], batch, now).await.unwrap();
        assert!(queue.due(now).await.unwrap().is_empty());

        // Terminal write is idempotent
        queue.mark_sent(&[due.id], batch, now).await.unwrap();
        let all = queue.all();
        let sent = all.iter().find(|e| e.id == due.id).unwrap();
        assert_eq!(sent.batch_id, Some(batch));
    }

    #[tokio::test]
    async fn cost_feed_filters_by_target_and_range() {
        let feed = MemoryCostFeed::new();
        let target = Uuid::new_v4();
        let d1 = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();

        for (date, total) in [(d1, 10.0), (d2, 20.0)] {
            feed.push(CostAggregate {
                target_id: target,
                date,
                total_cost: total,
                resources: vec![],
            });
        }
        feed.push(CostAggregate {
            target_id: Uuid::new_v4(),
            date: d2,
            total_cost: 99.0,
            resources: vec![],
        });

        let rows = feed.aggregates(target, d2, d2).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_cost, 20.0);

        let rows = feed.aggregates(target, d1, d2).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
