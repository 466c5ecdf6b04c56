//! Periodic aggregation scheduler.
//!
//! Runs one pass immediately, then one per interval tick, until shutdown is
//! requested or a pass fails fatally.
//!
//! ## Usage
//!
//! ```no_run
//! use shiftagg_engine::{AggregationEngine, Scheduler, ShiftDatabase, ShiftResolver};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Arc::new(ShiftDatabase::open("shiftagg.db")?);
//!     let engine = Arc::new(AggregationEngine::new(db, ShiftResolver::default()));
//!
//!     let scheduler = Scheduler::new(engine, Duration::from_secs(10));
//!     scheduler
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

use crate::engine::AggregationEngine;
use crate::error::{EngineError, Result};
use crate::models::PassReport;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Default interval between passes in seconds.
pub const DEFAULT_PASS_INTERVAL_SECS: u64 = 10;

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between passes.
    pub interval: Duration,

    /// Whether to run a pass immediately on startup.
    pub run_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_PASS_INTERVAL_SECS),
            run_on_startup: true,
        }
    }
}

impl SchedulerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pass interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set whether to run on startup.
    pub fn with_run_on_startup(mut self, run_on_startup: bool) -> Self {
        self.run_on_startup = run_on_startup;
        self
    }
}

/// Clears the in-flight flag when a pass ends, including by panic.
struct PassGuard {
    flag: Arc<AtomicBool>,
}

impl PassGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::PassInFlight)?;
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Drives [`AggregationEngine::run_pass`] on a fixed interval.
pub struct Scheduler {
    engine: Arc<AggregationEngine>,
    config: SchedulerConfig,
    in_flight: Arc<AtomicBool>,
}

impl Scheduler {
    /// Create a scheduler with a custom interval.
    pub fn new(engine: Arc<AggregationEngine>, interval: Duration) -> Self {
        Self::with_config(engine, SchedulerConfig::new().with_interval(interval))
    }

    /// Create a scheduler from a full configuration.
    pub fn with_config(engine: Arc<AggregationEngine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the pass interval.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Whether a pass is currently running.
    pub fn is_pass_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run a pass on the calling thread (for manual triggering).
    ///
    /// Fails with [`EngineError::PassInFlight`] if another pass is running.
    pub fn run_once(&self) -> Result<PassReport> {
        let _guard = PassGuard::acquire(&self.in_flight)?;
        self.engine.run_pass()
    }

    /// Run a pass on the blocking thread pool.
    pub async fn run_once_blocking(&self) -> Result<PassReport> {
        let engine = Arc::clone(&self.engine);
        let flag = Arc::clone(&self.in_flight);
        tokio::task::spawn_blocking(move || {
            let _guard = PassGuard::acquire(&flag)?;
            engine.run_pass()
        })
        .await?
    }

    /// Run passes until `shutdown` resolves.
    ///
    /// Transient failures are logged and retried on the next tick. A fatal
    /// failure stops the loop and is returned.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            interval_secs = self.config.interval.as_secs(),
            run_on_startup = self.config.run_on_startup,
            "Starting aggregation scheduler"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.run_on_startup {
            // The first tick completes immediately
            ticker.tick().await;
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping scheduler");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            debug!("Running aggregation pass");
            match self.run_once_blocking().await {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Aggregation pass failed, retrying on next tick");
                }
                Err(e) => {
                    error!(error = %e, "Aggregation pass failed fatally");
                    return Err(e);
                }
            }
        }
    }
}
