//! PostgreSQL store implementations

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{
    AlertEvent, AlertRule, AlertRuleInput, ChannelConfig, CostAggregate, DigestFrequency,
    DigestQueueEntry, DigestSettings, NotificationPreferences, QuietHours, ResourceCost,
    RuleKind, RuleStatus, Severity,
};

use super::{AlertStore, CostFeed, DigestQueueStore, PreferenceStore, RuleStore};

/// PostgreSQL connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::Error::Internal(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Rule store over PostgreSQL
#[derive(Clone)]
pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    /// Create a new rule store
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool.clone(),
        }
    }
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn create(&self, input: AlertRuleInput) -> Result<AlertRule> {
        let rule = input.into_rule()?;
        let channels_json = serde_json::to_value(&rule.channels)?;

        sqlx::query(
            r#"
            INSERT INTO alert_rules (
                id, org_id, name, target_id, target_name,
                kind, threshold_amount, threshold_percent,
                channels, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(rule.id)
        .bind(rule.org_id)
        .bind(&rule.name)
        .bind(rule.target_id)
        .bind(&rule.target_name)
        .bind(rule.kind.as_str())
        .bind(rule.threshold_amount)
        .bind(rule.threshold_percent)
        .bind(&channels_json)
        .bind(status_to_str(rule.status))
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(rule)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AlertRule>> {
        let row = sqlx::query_as::<_, AlertRuleRow>("SELECT * FROM alert_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn list(&self, org_id: Option<Uuid>) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query_as::<_, AlertRuleRow>(
            r#"
            SELECT * FROM alert_rules
            WHERE ($1::uuid IS NULL OR org_id = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_active(&self) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query_as::<_, AlertRuleRow>(
            "SELECT * FROM alert_rules WHERE status = 'active' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_status(&self, id: Uuid, status: RuleStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE alert_rules SET status = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status_to_str(status))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Preference store over PostgreSQL
#[derive(Clone)]
pub struct PgPreferenceStore {
    pool: PgPool,
}

impl PgPreferenceStore {
    /// Create a new preference store
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool.clone(),
        }
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn for_org(&self, org_id: Uuid) -> Result<Option<NotificationPreferences>> {
        let row = sqlx::query_as::<_, PreferencesRow>(
            "SELECT * FROM notification_preferences WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn upsert(&self, preferences: &NotificationPreferences) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_preferences (
                org_id,
                quiet_hours_enabled, quiet_hours_start, quiet_hours_end, quiet_hours_timezone,
                digest_enabled, digest_frequency, digest_hour, digest_minute,
                digest_weekday, digest_timezone,
                critical_bypass, high_bypass
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (org_id) DO UPDATE SET
                quiet_hours_enabled = EXCLUDED.quiet_hours_enabled,
                quiet_hours_start = EXCLUDED.quiet_hours_start,
                quiet_hours_end = EXCLUDED.quiet_hours_end,
                quiet_hours_timezone = EXCLUDED.quiet_hours_timezone,
                digest_enabled = EXCLUDED.digest_enabled,
                digest_frequency = EXCLUDED.digest_frequency,
                digest_hour = EXCLUDED.digest_hour,
                digest_minute = EXCLUDED.digest_minute,
                digest_weekday = EXCLUDED.digest_weekday,
                digest_timezone = EXCLUDED.digest_timezone,
                critical_bypass = EXCLUDED.critical_bypass,
                high_bypass = EXCLUDED.high_bypass
            "#,
        )
        .bind(preferences.org_id)
        .bind(preferences.quiet_hours.enabled)
        .bind(preferences.quiet_hours.start)
        .bind(preferences.quiet_hours.end)
        .bind(&preferences.quiet_hours.timezone)
        .bind(preferences.digest.enabled)
        .bind(preferences.digest.frequency.as_str())
        .bind(i32::try_from(preferences.digest.hour).unwrap_or(0))
        .bind(i32::try_from(preferences.digest.minute).unwrap_or(0))
        .bind(weekday_to_str(preferences.digest.weekday))
        .bind(&preferences.digest.timezone)
        .bind(preferences.critical_bypass)
        .bind(preferences.high_bypass)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Alert event store over PostgreSQL
#[derive(Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    /// Create a new alert store
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool.clone(),
        }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn insert_unless_duplicate(&self, event: &AlertEvent, window: Duration) -> Result<bool> {
        let contributors_json = serde_json::to_value(&event.top_contributors)?;
        let cutoff = event.triggered_at - window;

        // Serialize per (rule, target) so two concurrent evaluations cannot
        // both pass the suppression check
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1 || ':' || $2, 0))")
            .bind(event.rule_id.to_string())
            .bind(event.target_id.to_string())
            .execute(&mut *tx)
            .await?;

        let duplicate: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM alert_events
            WHERE rule_id = $1 AND target_id = $2 AND triggered_at > $3
            LIMIT 1
            "#,
        )
        .bind(event.rule_id)
        .bind(event.target_id)
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await?;

        if duplicate.is_some() {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO alert_events (
                id, rule_id, org_id, target_id, target_name,
                severity, observed_value, reference_value, percent_change,
                top_contributors, triggered_at, queued_for_digest, digest_batch_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(event.id)
        .bind(event.rule_id)
        .bind(event.org_id)
        .bind(event.target_id)
        .bind(&event.target_name)
        .bind(event.severity.as_str())
        .bind(event.observed_value)
        .bind(event.reference_value)
        .bind(event.percent_change)
        .bind(&contributors_json)
        .bind(event.triggered_at)
        .bind(event.queued_for_digest)
        .bind(event.digest_batch_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AlertEvent>> {
        let row = sqlx::query_as::<_, AlertEventRow>("SELECT * FROM alert_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<AlertEvent>> {
        let rows = sqlx::query_as::<_, AlertEventRow>(
            "SELECT * FROM alert_events WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_queued(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE alert_events SET queued_for_digest = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn assign_digest_batch(&self, ids: &[Uuid], batch_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE alert_events SET digest_batch_id = $2 WHERE id = ANY($1)")
            .bind(ids)
            .bind(batch_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_recent(
        &self,
        org_id: Option<Uuid>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AlertEvent>> {
        let rows = sqlx::query_as::<_, AlertEventRow>(
            r#"
            SELECT * FROM alert_events
            WHERE triggered_at >= $2
              AND ($1::uuid IS NULL OR org_id = $1)
            ORDER BY triggered_at DESC
            LIMIT $3
            "#,
        )
        .bind(org_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Digest queue over PostgreSQL
#[derive(Clone)]
pub struct PgDigestQueue {
    pool: PgPool,
}

impl PgDigestQueue {
    /// Create a new digest queue
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool.clone(),
        }
    }
}

#[async_trait]
impl DigestQueueStore for PgDigestQueue {
    async fn enqueue(&self, entry: &DigestQueueEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO digest_queue (
                id, event_id, org_id, scheduled_for, included_at, batch_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.event_id)
        .bind(entry.org_id)
        .bind(entry.scheduled_for)
        .bind(entry.included_at)
        .bind(entry.batch_id)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<DigestQueueEntry>> {
        let rows = sqlx::query_as::<_, DigestQueueRow>(
            r#"
            SELECT * FROM digest_queue
            WHERE included_at IS NULL AND scheduled_for <= $1
            ORDER BY scheduled_for
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_sent(&self, ids: &[Uuid], batch_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE digest_queue
            SET included_at = $2, batch_id = $3
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(at)
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Cost feed reading the aggregates the ingestion side writes
#[derive(Clone)]
pub struct PgCostFeed {
    pool: PgPool,
}

impl PgCostFeed {
    /// Create a new cost feed
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool.clone(),
        }
    }
}

#[async_trait]
impl CostFeed for PgCostFeed {
    async fn aggregates(
        &self,
        target_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CostAggregate>> {
        let rows = sqlx::query_as::<_, CostAggregateRow>(
            r#"
            SELECT * FROM cost_aggregates
            WHERE target_id = $1 AND date BETWEEN $2 AND $3
            ORDER BY date
            "#,
        )
        .bind(target_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// Database row types for mapping

#[derive(sqlx::FromRow)]
struct AlertRuleRow {
    id: Uuid,
    org_id: Uuid,
    name: String,
    target_id: Uuid,
    target_name: String,
    kind: String,
    threshold_amount: Option<f64>,
    threshold_percent: Option<f64>,
    channels: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AlertRuleRow> for AlertRule {
    fn from(row: AlertRuleRow) -> Self {
        let kind = match row.kind.as_str() {
            "threshold" => RuleKind::Threshold,
            "percentage_spike" => RuleKind::PercentageSpike,
            "budget" => RuleKind::Budget,
            "anomaly" => RuleKind::Anomaly,
            _ => RuleKind::Threshold,
        };

        let status = match row.status.as_str() {
            "paused" => RuleStatus::Paused,
            _ => RuleStatus::Active,
        };

        let channels: Vec<ChannelConfig> =
            serde_json::from_value(row.channels).unwrap_or_default();

        AlertRule {
            id: row.id,
            org_id: row.org_id,
            name: row.name,
            target_id: row.target_id,
            target_name: row.target_name,
            kind,
            threshold_amount: row.threshold_amount,
            threshold_percent: row.threshold_percent,
            channels,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AlertEventRow {
    id: Uuid,
    rule_id: Uuid,
    org_id: Uuid,
    target_id: Uuid,
    target_name: String,
    severity: String,
    observed_value: f64,
    reference_value: f64,
    percent_change: Option<f64>,
    top_contributors: serde_json::Value,
    triggered_at: DateTime<Utc>,
    queued_for_digest: bool,
    digest_batch_id: Option<Uuid>,
}

impl From<AlertEventRow> for AlertEvent {
    fn from(row: AlertEventRow) -> Self {
        let severity = severity_from_str(&row.severity);
        let top_contributors: Vec<ResourceCost> =
            serde_json::from_value(row.top_contributors).unwrap_or_default();

        AlertEvent {
            id: row.id,
            rule_id: row.rule_id,
            org_id: row.org_id,
            target_id: row.target_id,
            target_name: row.target_name,
            severity,
            observed_value: row.observed_value,
            reference_value: row.reference_value,
            percent_change: row.percent_change,
            top_contributors,
            triggered_at: row.triggered_at,
            queued_for_digest: row.queued_for_digest,
            digest_batch_id: row.digest_batch_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PreferencesRow {
    org_id: Uuid,
    quiet_hours_enabled: bool,
    quiet_hours_start: NaiveTime,
    quiet_hours_end: NaiveTime,
    quiet_hours_timezone: String,
    digest_enabled: bool,
    digest_frequency: String,
    digest_hour: i32,
    digest_minute: i32,
    digest_weekday: String,
    digest_timezone: String,
    critical_bypass: bool,
    high_bypass: bool,
}

impl From<PreferencesRow> for NotificationPreferences {
    fn from(row: PreferencesRow) -> Self {
        let frequency = match row.digest_frequency.as_str() {
            "immediate" => DigestFrequency::Immediate,
            "weekly" => DigestFrequency::Weekly,
            _ => DigestFrequency::Daily,
        };

        NotificationPreferences {
            org_id: row.org_id,
            quiet_hours: QuietHours {
                enabled: row.quiet_hours_enabled,
                start: row.quiet_hours_start,
                end: row.quiet_hours_end,
                timezone: row.quiet_hours_timezone,
            },
            digest: DigestSettings {
                enabled: row.digest_enabled,
                frequency,
                hour: u32::try_from(row.digest_hour).unwrap_or(0),
                minute: u32::try_from(row.digest_minute).unwrap_or(0),
                weekday: weekday_from_str(&row.digest_weekday),
                timezone: row.digest_timezone,
            },
            critical_bypass: row.critical_bypass,
            high_bypass: row.high_bypass,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DigestQueueRow {
    id: Uuid,
    event_id: Uuid,
    org_id: Uuid,
    scheduled_for: DateTime<Utc>,
    included_at: Option<DateTime<Utc>>,
    batch_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<DigestQueueRow> for DigestQueueEntry {
    fn from(row: DigestQueueRow) -> Self {
        DigestQueueEntry {
            id: row.id,
            event_id: row.event_id,
            org_id: row.org_id,
            scheduled_for: row.scheduled_for,
            included_at: row.included_at,
            batch_id: row.batch_id,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CostAggregateRow {
    target_id: Uuid,
    date: NaiveDate,
    total_cost: f64,
    resources: serde_json::Value,
}

impl From<CostAggregateRow> for CostAggregate {
    fn from(row: CostAggregateRow) -> Self {
        let resources: Vec<ResourceCost> =
            serde_json::from_value(row.resources).unwrap_or_default();

        CostAggregate {
            target_id: row.target_id,
            date: row.date,
            total_cost: row.total_cost,
            resources,
        }
    }
}

fn status_to_str(status: RuleStatus) -> &'static str {
    match status {
        RuleStatus::Active => "active",
        RuleStatus::Paused => "paused",
    }
}

fn severity_from_str(s: &str) -> Severity {
    match s {
        "low" => Severity::Low,
        "medium" => Severity::Medium,
        "high" => Severity::High,
        "critical" => Severity::Critical,
        _ => Severity::Low,
    }
}

fn weekday_to_str(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn weekday_from_str(s: &str) -> Weekday {
    match s {
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => Weekday::Mon,
    }
}
