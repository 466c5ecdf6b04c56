//! # shiftagg-engine
//!
//! Incremental shift aggregation for factory line events.
//!
//! This crate provides:
//! - [`ShiftDatabase`] - SQLite event store and bucket store
//! - [`ShiftResolver`] - Maps event timestamps to (shift, production date)
//! - [`AggregationEngine`] - Folds new events into per-shift buckets
//! - [`Scheduler`] - Runs passes on a fixed interval
//! - [`BucketQuery`] - Read-only KPI queries
//! - [`ingest_batch`] - All-or-nothing JSON-lines ingest
//!
//! ## Example
//!
//! ```no_run
//! use shiftagg_engine::{AggregationEngine, BucketQuery, NewEvent, ShiftDatabase, ShiftResolver};
//! use shiftagg_core::EventType;
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let db = Arc::new(ShiftDatabase::open("shiftagg.db")?);
//!
//!     // Ingest appends validated events
//!     let event = NewEvent::new(1_770_078_600, "sim-01", "LINE-1", EventType::Produced)
//!         .with_cycle_time(12.0)
//!         .validate()?;
//!     db.append_event(&event)?;
//!
//!     // A pass folds everything not yet seen
//!     let resolver = ShiftResolver::default();
//!     let engine = AggregationEngine::new(Arc::clone(&db), resolver);
//!     let report = engine.run_pass()?;
//!     println!("Processed {} events", report.events_processed);
//!
//!     let today = BucketQuery::new(&db, resolver).today()?;
//!     println!("{today:?}");
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod engine;
pub mod error;
pub mod fold;
pub mod ingest;
pub mod models;
pub mod query;
pub mod resolver;
pub mod scheduler;

// Re-export main types
pub use db::{LineCursor, ShiftDatabase};
pub use engine::AggregationEngine;
pub use error::{EngineError, Result};
pub use ingest::{ingest_batch, parse_batch};
pub use models::{BucketKey, NewEvent, PassReport, RawEvent, ShiftBucket, ValidatedEvent};
pub use query::{BucketQuery, ShiftSummary};
pub use resolver::ShiftResolver;
pub use scheduler::{Scheduler, SchedulerConfig};
