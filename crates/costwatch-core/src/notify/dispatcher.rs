//! Notification dispatch with per-channel retry
//!
//! Channels are dispatched independently and concurrently; one slow or
//! failing channel never blocks or masks another. Every adapter shares the
//! same fixed-delay retry loop.

use std::time::Duration;

use metrics::counter;
use reqwest::Client;
use tracing::{error, warn};

use crate::config::{DeliveryConfig, EmailConfig};
use crate::error::{Error, Result};
use crate::models::ChannelConfig;

use super::channel::{ChannelAdapter, ChannelError, EmailChannel, SlackChannel, TeamsChannel};
use super::message::Notification;

/// Outcome of delivery on one channel
///
/// Ephemeral; surfaced to operators through logs and the batch report, not
/// persisted.
#[derive(Debug, Clone)]
pub struct DeliveryAttemptResult {
    /// Channel type name
    pub channel: String,
    /// Whether any attempt succeeded
    pub success: bool,
    /// The last error, when all attempts failed
    pub error: Option<String>,
    /// Retries actually used, zero-indexed (0 = succeeded first try)
    pub retries: u32,
}

/// Fixed-delay retry policy shared by every channel adapter
///
/// One delay per attempt, slept before the attempt; the first entry is
/// normally zero.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    /// Three attempts: immediately, after 30 seconds, after 5 minutes
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::ZERO,
                Duration::from_secs(30),
                Duration::from_secs(300),
            ],
        }
    }
}

impl RetryPolicy {
    /// Build a policy from explicit per-attempt delays
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Number of attempts the policy allows
    pub fn attempts(&self) -> usize {
        self.delays.len()
    }
}

/// Sends alerts and digests across a rule's configured channels
pub struct Dispatcher {
    http: Client,
    email: Option<EmailConfig>,
    policy: RetryPolicy,
}

impl Dispatcher {
    /// Build a dispatcher with the default retry policy.
    ///
    /// The HTTP client carries an explicit timeout so a webhook that never
    /// responds cannot stall a batch run.
    pub fn new(delivery: &DeliveryConfig, email: Option<EmailConfig>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(delivery.http_timeout_seconds))
            .build()
            .map_err(|e| Error::config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            email,
            policy: RetryPolicy::default(),
        })
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Deliver one notification across a set of channels, one result per
    /// channel. Never fails as a whole; per-channel outcomes carry errors.
    pub async fn deliver(
        &self,
        notification: &Notification,
        channels: &[ChannelConfig],
    ) -> Vec<DeliveryAttemptResult> {
        let sends = channels
            .iter()
            .map(|config| self.deliver_channel(notification, config));
        futures::future::join_all(sends).await
    }

    async fn deliver_channel(
        &self,
        notification: &Notification,
        config: &ChannelConfig,
    ) -> DeliveryAttemptResult {
        let adapter: Box<dyn ChannelAdapter> = match self.adapter_for(config) {
            Ok(adapter) => adapter,
            Err(e) => {
                // Bad channel config fails fast without burning retries
                error!(channel = config.kind(), error = %e, "channel rejected");
                counter!("costwatch_deliveries_failed_total").increment(1);
                return DeliveryAttemptResult {
                    channel: config.kind().to_string(),
                    success: false,
                    error: Some(e.to_string()),
                    retries: 0,
                };
            }
        };

        let result = self.send_with_retry(adapter.as_ref(), notification).await;
        if result.success {
            counter!("costwatch_deliveries_sent_total").increment(1);
        } else {
            counter!("costwatch_deliveries_failed_total").increment(1);
        }
        result
    }

    fn adapter_for(&self, config: &ChannelConfig) -> std::result::Result<Box<dyn ChannelAdapter>, ChannelError> {
        match config {
            ChannelConfig::Email { to } => {
                let email = self.email.as_ref().ok_or_else(|| {
                    ChannelError::Config("email channel is not configured".to_string())
                })?;
                Ok(Box::new(EmailChannel::new(email, to.clone())?))
            }
            ChannelConfig::Slack { webhook_url } => Ok(Box::new(SlackChannel::new(
                webhook_url.clone(),
                self.http.clone(),
            )?)),
            ChannelConfig::Teams { webhook_url } => Ok(Box::new(TeamsChannel::new(
                webhook_url.clone(),
                self.http.clone(),
            )?)),
        }
    }

    /// The shared retry loop: sleep the attempt's delay, try, stop early on
    /// success or a non-retryable error.
    async fn send_with_retry(
        &self,
        adapter: &dyn ChannelAdapter,
        notification: &Notification,
    ) -> DeliveryAttemptResult {
        let mut last_error = None;

        for (attempt, delay) in self.policy.delays.iter().enumerate() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }

            match adapter.send(notification).await {
                Ok(()) => {
                    return DeliveryAttemptResult {
                        channel: adapter.name().to_string(),
                        success: true,
                        error: None,
                        retries: attempt as u32,
                    };
                }
                Err(e) => {
                    warn!(
                        channel = adapter.name(),
                        attempt,
                        error = %e,
                        "delivery attempt failed"
                    );
                    let retryable = e.is_retryable();
                    last_error = Some(e.to_string());
                    if !retryable {
                        return DeliveryAttemptResult {
                            channel: adapter.name().to_string(),
                            success: false,
                            error: last_error,
                            retries: attempt as u32,
                        };
                    }
                }
            }
        }

        DeliveryAttemptResult {
            channel: adapter.name().to_string(),
            success: false,
            error: last_error,
            retries: self.policy.attempts().saturating_sub(1) as u32,
        }
    }
}
