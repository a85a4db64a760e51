//! Digest queue entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Links a deferred alert event to its scheduled digest delivery
///
/// Created by the delivery router, consumed by the digest drain job, and
/// marked sent as a batch once a channel confirms delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestQueueEntry {
    /// Unique identifier
    pub id: Uuid,

    /// The deferred alert event
    pub event_id: Uuid,

    /// Owning organization (digests aggregate per organization)
    pub org_id: Uuid,

    /// When the digest containing this entry is due
    pub scheduled_for: DateTime<Utc>,

    /// When the entry was actually included in a sent digest; null until sent
    pub included_at: Option<DateTime<Utc>>,

    /// Batch the entry was sent in; shared by all entries of one digest
    pub batch_id: Option<Uuid>,

    /// When the entry was enqueued
    pub created_at: DateTime<Utc>,
}

impl DigestQueueEntry {
    /// Create a pending entry for an event
    pub fn new(event_id: Uuid, org_id: Uuid, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            org_id,
            scheduled_for,
            included_at: None,
            batch_id: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the entry is due and still unsent
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.included_at.is_none() && self.scheduled_for <= now
    }
}
