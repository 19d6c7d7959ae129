//! Legacy/enhanced migration harness: routing, outcome metrics and
//! automatic rollout control.

pub mod controller;
pub mod metrics;
pub mod router;

pub use controller::{improvement_score, Evaluation, MigrationAction, MigrationController};
pub use metrics::{ComparisonRecord, MigrationMetrics, ProcessorSummary};
pub use router::{user_bucket, MigrationRouter, RoutingDecision, RoutingReason};
