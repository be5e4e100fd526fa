//! Replication of content items across the fleet.
//!
//! A content item names the root of a block DAG. Caching it creates a job that
//! places the root on a node, then follows the links each completion report
//! reveals until every reachable block is cached (job succeeded) or nothing is
//! left in flight (job failed).
//!
//! # Components
//!
//! - [`ContentItem`] / [`CacheJob`]: per-item and per-job progress
//! - [`ReplicationOrchestrator`]: node selection, dispatch and report ingestion

mod content;
mod orchestrator;

pub use content::{CacheJob, ContentItem, ReportOutcome};
pub use orchestrator::{
    JobSummary, ReplicationOrchestrator, ReplicationStats, ReplicationStatsSnapshot, WorkItem,
};
