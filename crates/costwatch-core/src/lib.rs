//! # CostWatch
//!
//! Cost-alert evaluation and notification delivery for the CostWatch
//! billing dashboard.
//!
//! CostWatch periodically inspects accumulated cloud-cost data against
//! user-defined rules, deduplicates the alerts that fire, decides per
//! organization between immediate delivery and digest batching, and
//! delivers across the configured notification channels with retries.
//!
//! ## Architecture
//!
//! - **Evaluator**: pure rule evaluation over cost windows
//! - **Deduplicator**: suppression-window gated persistence of alerts
//! - **Router**: quiet hours, digest scheduling, severity bypasses
//! - **Dispatcher**: multi-channel delivery with fixed-delay retries
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the scheduler daemon
//! costwatch serve
//!
//! # Evaluate all active rules once
//! costwatch evaluate
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod schedule;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertEngine, RouteDecision};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::notify::Dispatcher;
    pub use crate::store::Database;
}
