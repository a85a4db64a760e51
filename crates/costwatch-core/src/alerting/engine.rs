//! Batch orchestration
//!
//! Wires the cost feed, evaluator, deduplicator, router, and dispatcher
//! into the two scheduler-triggered jobs: "evaluate all active rules now"
//! and "drain all due digests now".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, Utc};
use metrics::counter;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AlertEvent, AlertRule, ChannelConfig, CostWindow, DigestQueueEntry, RuleKind,
};
use crate::notify::{AlertMessage, DigestMessage, Dispatcher, Notification};
use crate::store::{AlertStore, CostFeed, DigestQueueStore, PreferenceStore, RuleStore};

use super::dedup::{AcceptOutcome, Deduplicator};
use super::digest::build_digest;
use super::evaluator;
use super::router::{route, RouteDecision};

/// Counts from one evaluation tick
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationReport {
    /// Rules considered
    pub evaluated: usize,
    /// Candidates accepted and dispatched or queued
    pub fired: usize,
    /// Candidates dropped inside the suppression window
    pub suppressed: usize,
    /// Rules that errored (isolated; the batch continues)
    pub failed: usize,
}

/// Counts from one digest drain
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestReport {
    /// Organizations with due entries
    pub organizations: usize,
    /// Digests delivered and batch-marked
    pub delivered: usize,
    /// Alerts included across delivered digests
    pub alerts: usize,
    /// Organizations whose digest could not be delivered this run
    pub failed: usize,
}

/// The alerting pipeline, wired over its storage collaborators
pub struct AlertEngine {
    rules: Arc<dyn RuleStore>,
    preferences: Arc<dyn PreferenceStore>,
    alerts: Arc<dyn AlertStore>,
    digest_queue: Arc<dyn DigestQueueStore>,
    feed: Arc<dyn CostFeed>,
    dedup: Deduplicator,
    dispatcher: Dispatcher,
    dashboard_base_url: String,
}

impl AlertEngine {
    /// Wire the pipeline over its collaborators
    pub fn new(
        rules: Arc<dyn RuleStore>,
        preferences: Arc<dyn PreferenceStore>,
        alerts: Arc<dyn AlertStore>,
        digest_queue: Arc<dyn DigestQueueStore>,
        feed: Arc<dyn CostFeed>,
        dispatcher: Dispatcher,
        dashboard_base_url: String,
    ) -> Self {
        let dedup = Deduplicator::new(alerts.clone());
        Self {
            rules,
            preferences,
            alerts,
            digest_queue,
            feed,
            dedup,
            dispatcher,
            dashboard_base_url,
        }
    }

    /// Evaluate every active rule against the latest cost data.
    ///
    /// Rules run concurrently; a failure in one is logged and counted
    /// without aborting the rest of the batch.
    pub async fn run_evaluation(&self) -> Result<EvaluationReport> {
        let rules = self.rules.list_active().await?;
        let now = Utc::now();

        debug!(count = rules.len(), "evaluating alert rules");

        let outcomes = futures::future::join_all(
            rules.iter().map(|rule| self.process_rule(rule, now)),
        )
        .await;

        let mut report = EvaluationReport {
            evaluated: rules.len(),
            ..Default::default()
        };
        for (rule, outcome) in rules.iter().zip(outcomes) {
            match outcome {
                Ok(RuleOutcome::Fired) => report.fired += 1,
                Ok(RuleOutcome::Suppressed) => report.suppressed += 1,
                Ok(RuleOutcome::Quiet) => {}
                Err(e) => {
                    error!(rule_id = %rule.id, error = %e, "rule evaluation failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            evaluated = report.evaluated,
            fired = report.fired,
            suppressed = report.suppressed,
            failed = report.failed,
            "evaluation tick complete"
        );
        Ok(report)
    }

    async fn process_rule(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<RuleOutcome> {
        let window = self.load_window(rule, now).await?;

        let Some(candidate) = evaluator::evaluate(rule, &window)? else {
            return Ok(RuleOutcome::Quiet);
        };

        let event = match self.dedup.accept(candidate).await? {
            AcceptOutcome::Accepted(event) => event,
            AcceptOutcome::Suppressed => return Ok(RuleOutcome::Suppressed),
        };

        let preferences = self.preferences.for_org(rule.org_id).await?;
        match route(&event, preferences.as_ref(), now) {
            RouteDecision::Immediate => self.deliver_alert(rule, &event).await,
            RouteDecision::Queued { scheduled_for } => {
                let entry = DigestQueueEntry::new(event.id, event.org_id, scheduled_for);
                self.digest_queue.enqueue(&entry).await?;
                self.alerts.mark_queued(event.id).await?;
                debug!(
                    event_id = %event.id,
                    scheduled_for = %scheduled_for,
                    "alert deferred into digest queue"
                );
            }
        }

        Ok(RuleOutcome::Fired)
    }

    async fn deliver_alert(&self, rule: &AlertRule, event: &AlertEvent) {
        if rule.channels.is_empty() {
            warn!(rule_id = %rule.id, "rule has no notification channels");
            return;
        }

        let message = AlertMessage::new(rule, event.clone(), &self.dashboard_base_url);
        let results = self
            .dispatcher
            .deliver(&Notification::Alert(message), &rule.channels)
            .await;

        for result in results {
            if !result.success {
                error!(
                    event_id = %event.id,
                    channel = result.channel,
                    retries = result.retries,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "alert delivery failed"
                );
            }
        }
    }

    /// Assemble the cost window a rule's kind needs.
    ///
    /// The current period is always fetched; the prior comparable period
    /// only for spike rules, month-to-date only for budget rules.
    async fn load_window(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<CostWindow> {
        let today = now.date_naive();

        let current = self.feed.aggregates(rule.target_id, today, today).await?;

        let previous = if rule.kind == RuleKind::PercentageSpike {
            match today.checked_sub_days(Days::new(1)) {
                Some(yesterday) => {
                    self.feed
                        .aggregates(rule.target_id, yesterday, yesterday)
                        .await?
                }
                None => vec![],
            }
        } else {
            vec![]
        };

        let month_to_date = if rule.kind == RuleKind::Budget {
            let first = today.with_day(1).unwrap_or(today);
            self.feed.aggregates(rule.target_id, first, today).await?
        } else {
            vec![]
        };

        Ok(CostWindow {
            target_id: rule.target_id,
            as_of: now,
            current,
            previous,
            month_to_date,
        })
    }

    /// Drain every due digest-queue entry, one aggregated message per
    /// organization. Entries stay queued when every channel fails, so the
    /// next drain retries them.
    pub async fn run_digest(&self) -> Result<DigestReport> {
        let now = Utc::now();
        let due = self.digest_queue.due(now).await?;
        if due.is_empty() {
            debug!("no due digest entries");
            return Ok(DigestReport::default());
        }

        let mut by_org: HashMap<Uuid, Vec<DigestQueueEntry>> = HashMap::new();
        for entry in due {
            by_org.entry(entry.org_id).or_default().push(entry);
        }

        let mut report = DigestReport {
            organizations: by_org.len(),
            ..Default::default()
        };

        let outcomes = futures::future::join_all(
            by_org
                .into_iter()
                .map(|(org_id, entries)| self.drain_org(org_id, entries, now)),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                Ok(Some(sent)) => {
                    report.delivered += 1;
                    report.alerts += sent;
                }
                Ok(None) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "digest drain failed for organization");
                    report.failed += 1;
                }
            }
        }

        info!(
            organizations = report.organizations,
            delivered = report.delivered,
            alerts = report.alerts,
            failed = report.failed,
            "digest drain complete"
        );
        Ok(report)
    }

    /// Deliver one organization's digest. `Ok(Some(n))` on success with the
    /// number of alerts included, `Ok(None)` when every channel failed.
    async fn drain_org(
        &self,
        org_id: Uuid,
        entries: Vec<DigestQueueEntry>,
        now: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        let event_ids: Vec<Uuid> = entries.iter().map(|e| e.event_id).collect();
        let events = self.alerts.get_many(&event_ids).await?;
        if events.is_empty() {
            warn!(org_id = %org_id, "due digest entries reference no events");
            let batch_id = Uuid::new_v4();
            let entry_ids: Vec<Uuid> = entries.iter().map(|e| e.id).collect();
            self.digest_queue.mark_sent(&entry_ids, batch_id, now).await?;
            return Ok(Some(0));
        }

        let channels = self.digest_channels(&events).await?;
        let alert_count = events.len();
        let summary = build_digest(org_id, events, now);
        let message = DigestMessage::new(summary, &self.dashboard_base_url);

        let results = self
            .dispatcher
            .deliver(&Notification::Digest(message), &channels)
            .await;

        // One confirmed channel is enough to consider the digest delivered;
        // re-sending the whole batch to everyone would duplicate more noise
        // than a missed channel costs.
        let delivered = channels.is_empty() || results.iter().any(|r| r.success);
        for result in &results {
            if !result.success {
                error!(
                    org_id = %org_id,
                    channel = result.channel,
                    retries = result.retries,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "digest delivery failed"
                );
            }
        }

        if !delivered {
            warn!(org_id = %org_id, "digest left queued; every channel failed");
            return Ok(None);
        }

        if channels.is_empty() {
            warn!(org_id = %org_id, "no channels contributed to digest; marking sent");
        }

        let batch_id = Uuid::new_v4();
        let entry_ids: Vec<Uuid> = entries.iter().map(|e| e.id).collect();
        self.digest_queue.mark_sent(&entry_ids, batch_id, now).await?;
        self.alerts.assign_digest_batch(&event_ids, batch_id).await?;
        counter!("costwatch_digests_sent_total").increment(1);

        Ok(Some(alert_count))
    }

    /// Union of the channel sets of every rule that contributed an alert
    async fn digest_channels(&self, events: &[AlertEvent]) -> Result<Vec<ChannelConfig>> {
        let mut rule_ids: Vec<Uuid> = events.iter().map(|e| e.rule_id).collect();
        rule_ids.sort();
        rule_ids.dedup();

        let mut channels: Vec<ChannelConfig> = Vec::new();
        for rule_id in rule_ids {
            let Some(rule) = self.rules.get(rule_id).await? else {
                // Rule deleted since the alert fired; its channels are gone
                continue;
            };
            for channel in rule.channels {
                if !channels.contains(&channel) {
                    channels.push(channel);
                }
            }
        }
        Ok(channels)
    }
}

enum RuleOutcome {
    Fired,
    Suppressed,
    Quiet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;
    use crate::models::{
        AlertRuleInput, CostAggregate, DigestFrequency, NotificationPreferences, RuleStatus,
    };
    use crate::store::{
        MemoryAlertStore, MemoryCostFeed, MemoryDigestQueue, MemoryPreferenceStore,
        MemoryRuleStore,
    };
    use chrono::NaiveDate;

    struct Fixture {
        rules: Arc<MemoryRuleStore>,
        preferences: Arc<MemoryPreferenceStore>,
        alerts: Arc<MemoryAlertStore>,
        digest_queue: Arc<MemoryDigestQueue>,
        feed: Arc<MemoryCostFeed>,
        engine: AlertEngine,
    }

    fn fixture() -> Fixture {
        let rules = Arc::new(MemoryRuleStore::new());
        let preferences = Arc::new(MemoryPreferenceStore::new());
        let alerts = Arc::new(MemoryAlertStore::new());
        let digest_queue = Arc::new(MemoryDigestQueue::new());
        let feed = Arc::new(MemoryCostFeed::new());
        let dispatcher = Dispatcher::new(&DeliveryConfig::default(), None).unwrap();

        let engine = AlertEngine::new(
            rules.clone(),
            preferences.clone(),
            alerts.clone(),
            digest_queue.clone(),
            feed.clone(),
            dispatcher,
            "https://app.costwatch.dev".to_string(),
        );

        Fixture {
            rules,
            preferences,
            alerts,
            digest_queue,
            feed,
            engine,
        }
    }

    async fn seed_threshold_rule(f: &Fixture, threshold: f64) -> AlertRule {
        f.rules
            .create(AlertRuleInput {
                org_id: Uuid::new_v4(),
                name: "daily cap".to_string(),
                target_id: Uuid::new_v4(),
                target_name: "prod-account".to_string(),
                kind: RuleKind::Threshold,
                threshold_amount: Some(threshold),
                threshold_percent: None,
                channels: None,
                status: None,
            })
            .await
            .unwrap()
    }

    fn seed_cost(f: &Fixture, target_id: Uuid, date: NaiveDate, total: f64) {
        f.feed.push(CostAggregate {
            target_id,
            date,
            total_cost: total,
            resources: vec![],
        });
    }

    #[tokio::test]
    async fn tick_stores_event_when_rule_fires() {
        let f = fixture();
        let rule = seed_threshold_rule(&f, 100.0).await;
        seed_cost(&f, rule.target_id, Utc::now().date_naive(), 250.0);

        let report = f.engine.run_evaluation().await.unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.fired, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(f.alerts.len(), 1);
    }

    #[tokio::test]
    async fn second_tick_is_suppressed() {
        let f = fixture();
        let rule = seed_threshold_rule(&f, 100.0).await;
        seed_cost(&f, rule.target_id, Utc::now().date_naive(), 250.0);

        f.engine.run_evaluation().await.unwrap();
        let second = f.engine.run_evaluation().await.unwrap();

        assert_eq!(second.suppressed, 1);
        assert_eq!(second.fired, 0);
        assert_eq!(f.alerts.len(), 1);
    }

    #[tokio::test]
    async fn paused_rules_are_not_evaluated() {
        let f = fixture();
        let rule = seed_threshold_rule(&f, 100.0).await;
        seed_cost(&f, rule.target_id, Utc::now().date_naive(), 250.0);
        f.rules.set_status(rule.id, RuleStatus::Paused).await.unwrap();

        let report = f.engine.run_evaluation().await.unwrap();
        assert_eq!(report.evaluated, 0);
        assert_eq!(f.alerts.len(), 0);
    }

    #[tokio::test]
    async fn digest_mode_queues_instead_of_delivering() {
        let f = fixture();
        let rule = seed_threshold_rule(&f, 200.0).await;
        // 210/200 is a low-severity firing; low never bypasses
        seed_cost(&f, rule.target_id, Utc::now().date_naive(), 210.0);

        let mut prefs = NotificationPreferences::defaults_for(rule.org_id);
        prefs.digest.enabled = true;
        prefs.digest.frequency = DigestFrequency::Daily;
        f.preferences.upsert(&prefs).await.unwrap();

        f.engine.run_evaluation().await.unwrap();

        let entries = f.digest_queue.all();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].scheduled_for > Utc::now());
        assert!(entries[0].included_at.is_none());

        let event = f.alerts.get(entries[0].event_id).await.unwrap().unwrap();
        assert!(event.queued_for_digest);
    }

    #[tokio::test]
    async fn digest_drain_marks_batch() {
        let f = fixture();
        let rule = seed_threshold_rule(&f, 200.0).await;
        seed_cost(&f, rule.target_id, Utc::now().date_naive(), 210.0);

        let mut prefs = NotificationPreferences::defaults_for(rule.org_id);
        prefs.digest.enabled = true;
        prefs.digest.frequency = DigestFrequency::Daily;
        f.preferences.upsert(&prefs).await.unwrap();

        f.engine.run_evaluation().await.unwrap();

        // Force the queued entry due
        f.digest_queue.make_all_due(Utc::now() - chrono::Duration::minutes(1));

        let report = f.engine.run_digest().await.unwrap();
        assert_eq!(report.organizations, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.alerts, 1);

        let entries = f.digest_queue.all();
        assert!(entries[0].included_at.is_some());
        assert!(entries[0].batch_id.is_some());

        let event = f.alerts.get(entries[0].event_id).await.unwrap().unwrap();
        assert_eq!(event.digest_batch_id, entries[0].batch_id);

        // A second drain finds nothing; entries are never re-included
        let again = f.engine.run_digest().await.unwrap();
        assert_eq!(again.organizations, 0);
    }

    #[tokio::test]
    async fn rule_without_data_stays_quiet() {
        let f = fixture();
        seed_threshold_rule(&f, 100.0).await;

        let report = f.engine.run_evaluation().await.unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.fired, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(f.alerts.len(), 0);
    }

    #[tokio::test]
    async fn misconfigured_rule_does_not_abort_batch() {
        let f = fixture();
        let good = seed_threshold_rule(&f, 100.0).await;
        seed_cost(&f, good.target_id, Utc::now().date_naive(), 250.0);

        // Corrupt a second rule's thresholds behind the store's back
        let bad = seed_threshold_rule(&f, 100.0).await;
        f.rules.corrupt_thresholds(bad.id, None, Some(50.0));
        seed_cost(&f, bad.target_id, Utc::now().date_naive(), 250.0);

        let report = f.engine.run_evaluation().await.unwrap();
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.fired, 1);
        assert_eq!(report.failed, 1);
    }
}
