//! Candidate deduplication and alert persistence

use std::sync::Arc;

use chrono::Duration;
use metrics::counter;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{AlertCandidate, AlertEvent};
use crate::store::AlertStore;

/// Outcome of submitting a candidate to the alert store
#[derive(Debug, Clone)]
pub enum AcceptOutcome {
    /// Candidate was stored and should continue through delivery
    Accepted(AlertEvent),
    /// An equivalent alert already exists within the suppression window
    Suppressed,
}

/// Accepts candidates into the alert store, suppressing duplicates
///
/// A candidate for a (rule, target) pair that already alerted within the
/// suppression window is dropped even if its magnitude changed; staying
/// quiet beats re-paging on every re-evaluation. The check-then-write is
/// atomic per key inside the store, so concurrent evaluations of the same
/// rule cannot both pass it.
pub struct Deduplicator {
    store: Arc<dyn AlertStore>,
    window: Duration,
}

impl Deduplicator {
    /// Create a deduplicator with the standard one-hour suppression window
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self {
            store,
            window: Duration::hours(1),
        }
    }

    /// Override the suppression window
    pub fn with_window(store: Arc<dyn AlertStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// Persist a candidate unless it duplicates a recent alert.
    ///
    /// On acceptance the stored event freezes the candidate's contributor
    /// snapshot; the delivery-queue flag starts cleared.
    pub async fn accept(&self, candidate: AlertCandidate) -> Result<AcceptOutcome> {
        let event = AlertEvent {
            id: Uuid::new_v4(),
            rule_id: candidate.rule_id,
            org_id: candidate.org_id,
            target_id: candidate.target_id,
            target_name: candidate.target_name,
            severity: candidate.severity,
            observed_value: candidate.observed_value,
            reference_value: candidate.reference_value,
            percent_change: candidate.percent_change,
            top_contributors: candidate.contributors,
            triggered_at: candidate.triggered_at,
            queued_for_digest: false,
            digest_batch_id: None,
        };

        if self.store.insert_unless_duplicate(&event, self.window).await? {
            info!(
                rule_id = %event.rule_id,
                event_id = %event.id,
                severity = event.severity.as_str(),
                "alert accepted"
            );
            counter!("costwatch_alerts_accepted_total").increment(1);
            Ok(AcceptOutcome::Accepted(event))
        } else {
            debug!(
                rule_id = %event.rule_id,
                target_id = %event.target_id,
                "alert suppressed within dedup window"
            );
            counter!("costwatch_alerts_suppressed_total").increment(1);
            Ok(AcceptOutcome::Suppressed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use crate::store::MemoryAlertStore;
    use chrono::Utc;

    fn candidate(rule_id: Uuid, target_id: Uuid) -> AlertCandidate {
        AlertCandidate {
            rule_id,
            org_id: Uuid::new_v4(),
            target_id,
            target_name: "prod-account".to_string(),
            severity: Severity::High,
            observed_value: 250.0,
            reference_value: 100.0,
            percent_change: None,
            contributors: vec![],
            triggered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_within_window_is_suppressed() {
        let store = Arc::new(MemoryAlertStore::new());
        let dedup = Deduplicator::new(store.clone());
        let (rule_id, target_id) = (Uuid::new_v4(), Uuid::new_v4());

        let first = dedup.accept(candidate(rule_id, target_id)).await.unwrap();
        assert!(matches!(first, AcceptOutcome::Accepted(_)));

        // Identical evaluation ten minutes later
        let mut second = candidate(rule_id, target_id);
        second.triggered_at += Duration::minutes(10);
        let second = dedup.accept(second).await.unwrap();
        assert!(matches!(second, AcceptOutcome::Suppressed));

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn different_key_is_not_suppressed() {
        let store = Arc::new(MemoryAlertStore::new());
        let dedup = Deduplicator::new(store.clone());
        let rule_id = Uuid::new_v4();

        dedup.accept(candidate(rule_id, Uuid::new_v4())).await.unwrap();
        let other_target = dedup.accept(candidate(rule_id, Uuid::new_v4())).await.unwrap();
        assert!(matches!(other_target, AcceptOutcome::Accepted(_)));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn accepted_again_after_window_elapses() {
        let store = Arc::new(MemoryAlertStore::new());
        let dedup = Deduplicator::new(store.clone());
        let (rule_id, target_id) = (Uuid::new_v4(), Uuid::new_v4());

        dedup.accept(candidate(rule_id, target_id)).await.unwrap();

        let mut later = candidate(rule_id, target_id);
        later.triggered_at += Duration::minutes(61);
        let later = dedup.accept(later).await.unwrap();
        assert!(matches!(later, AcceptOutcome::Accepted(_)));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_submissions_store_exactly_one() {
        let store = Arc::new(MemoryAlertStore::new());
        let dedup = Arc::new(Deduplicator::new(store.clone()));
        let (rule_id, target_id) = (Uuid::new_v4(), Uuid::new_v4());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let dedup = dedup.clone();
                let c = candidate(rule_id, target_id);
                tokio::spawn(async move { dedup.accept(c).await })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            if matches!(task.await.unwrap().unwrap(), AcceptOutcome::Accepted(_)) {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(store.len(), 1);
    }
}
