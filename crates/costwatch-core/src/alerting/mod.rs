//! Cost-alert evaluation pipeline
//!
//! Rule evaluation, deduplication, delivery routing, and digest aggregation.

mod dedup;
mod digest;
mod engine;
mod evaluator;
mod router;

pub use dedup::{AcceptOutcome, Deduplicator};
pub use digest::{build_digest, DigestSummary, SeverityCounts, TargetDigest};
pub use engine::{AlertEngine, DigestReport, EvaluationReport};
pub use evaluator::{evaluate, TOP_CONTRIBUTORS};
pub use router::{next_digest_time, route, RouteDecision};
