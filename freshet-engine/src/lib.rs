//! FRESHET Engine - Freshness Decisions and Refresh Orchestration
//!
//! Sits between readers and the store. Every read passes through
//! [`RefreshEngine::ensure_fresh`], which computes a data-driven TTL from the
//! entity's recent activity, serves whatever the cache holds, and - when the
//! cache is stale - claims and runs at most one refresh per entity. Readers
//! are never blocked on an upstream fetch unless the engine is explicitly
//! configured for blocking refreshes.

pub mod budget;
pub mod config;
pub mod engine;
pub mod maintenance;
pub mod metrics;

pub use budget::FetchBudget;
pub use config::{EngineConfig, MaintenanceConfig, RefreshMode};
pub use engine::{Availability, RefreshDisposition, RefreshEngine, ServedData};
pub use maintenance::{maintenance_task, run_maintenance_cycle};
pub use metrics::{EngineMetrics, EngineSnapshot, MaintenanceMetrics, MaintenanceSnapshot};
