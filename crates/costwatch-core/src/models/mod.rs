//! Data models for CostWatch

mod alert;
mod cost;
mod digest;
mod preferences;
mod rule;

pub use alert::*;
pub use cost::*;
pub use digest::*;
pub use preferences::*;
pub use rule::*;

pub(crate) use preferences::parse_tz;
