//! Notification delivery
//!
//! Channel adapters, payload rendering, and the retrying dispatcher.

mod channel;
mod dispatcher;
mod message;

pub use channel::{ChannelAdapter, ChannelError, EmailChannel, SlackChannel, TeamsChannel};
pub use dispatcher::{DeliveryAttemptResult, Dispatcher, RetryPolicy};
pub use message::{AlertMessage, DigestMessage, Notification};
