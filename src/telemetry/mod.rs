//! Telemetry discovery
//!
//! Fleet-wide merge of metric definitions, report definitions, reports and
//! triggers, guarded by the active metric request lock.

pub mod lock;
pub mod merger;
pub mod wildcard;

pub use lock::MetricRequestLock;
pub use merger::{union_members, TelemetryCollection, TelemetryMerger};
pub use wildcard::{apply_wildcards, Wildcard, CHASSIS_TEMPLATE, SYSTEM_TEMPLATE};
