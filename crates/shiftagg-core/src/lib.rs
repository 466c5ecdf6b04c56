//! # shiftagg-core
//!
//! Core types, errors, and utilities shared by the shiftagg crates.
//!
//! This crate provides:
//! - [`ShiftaggError`] - Errors for configuration and setup
//! - [`logging`] - Tracing setup, verbosity levels, and `~/.shiftagg` paths
//! - [`types`] - Event types, shifts, the shift calendar, and the plant zone
//!
//! ## Example
//!
//! ```no_run
//! use shiftagg_core::{PlantZone, ShiftCalendar, Verbosity, logging};
//!
//! fn main() -> shiftagg_core::Result<()> {
//!     let _guard = logging::init_logging(None, Verbosity::Normal)?;
//!
//!     let zone: PlantZone = "Asia/Seoul".parse()?;
//!     let calendar = ShiftCalendar::default();
//!     let hour = chrono::Timelike::hour(&zone.now());
//!     tracing::info!(shift = %calendar.shift_for_hour(hour), "current shift");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export main types for convenience
pub use error::{Result, ShiftaggError};
pub use logging::{LogGuard, Verbosity, init_logging};
pub use types::{EventType, LineId, MAX_EVENT_TS, PlantZone, Shift, ShiftCalendar};
