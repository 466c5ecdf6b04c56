//! Data models for the event store and the bucket store.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shiftagg_core::{EventType, LineId, MAX_EVENT_TS, Shift};

use crate::error::{EngineError, Result};

/// An event as submitted by a device, before it is stored.
///
/// Mirrors the ingest payload: `device_id`, `line_id` and `event_type` are
/// required, everything else is optional. A missing `ts` is stamped with the
/// current time when the event is validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Event time in seconds since the epoch
    #[serde(default)]
    pub ts: Option<i64>,

    /// Reporting device (e.g., "sim-01")
    pub device_id: String,

    /// Production line
    pub line_id: LineId,

    /// Station on the line
    #[serde(default)]
    pub station_id: Option<String>,

    /// What happened
    pub event_type: EventType,

    /// Serial of the unit concerned
    #[serde(default)]
    pub unit_id: Option<String>,

    /// Cycle time in seconds
    #[serde(default)]
    pub cycle_time: Option<f64>,

    /// Defect classification, for DEFECT events
    #[serde(default)]
    pub defect_code: Option<String>,

    /// Stop classification, for STOP_* events
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl NewEvent {
    /// Create an event with the required fields.
    pub fn new(
        ts: i64,
        device_id: impl Into<String>,
        line_id: impl Into<String>,
        event_type: EventType,
    ) -> Self {
        Self {
            ts: Some(ts),
            device_id: device_id.into(),
            line_id: line_id.into(),
            station_id: None,
            event_type,
            unit_id: None,
            cycle_time: None,
            defect_code: None,
            stop_reason: None,
        }
    }

    /// Set cycle time.
    pub fn with_cycle_time(mut self, cycle_time: f64) -> Self {
        self.cycle_time = Some(cycle_time);
        self
    }

    /// Set station ID.
    pub fn with_station(mut self, station_id: impl Into<String>) -> Self {
        self.station_id = Some(station_id.into());
        self
    }

    /// Set unit ID.
    pub fn with_unit(mut self, unit_id: impl Into<String>) -> Self {
        self.unit_id = Some(unit_id.into());
        self
    }

    /// Set defect code.
    pub fn with_defect_code(mut self, code: impl Into<String>) -> Self {
        self.defect_code = Some(code.into());
        self
    }

    /// Set stop reason.
    pub fn with_stop_reason(mut self, reason: impl Into<String>) -> Self {
        self.stop_reason = Some(reason.into());
        self
    }

    /// Parse one JSON ingest payload.
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| EngineError::malformed("payload", e.to_string()))
    }

    /// Check the event and stamp the timestamp, returning the stored form.
    pub fn validate(&self) -> Result<ValidatedEvent> {
        if self.device_id.trim().is_empty() {
            return Err(EngineError::malformed("device_id", "must not be empty"));
        }
        if self.line_id.trim().is_empty() {
            return Err(EngineError::malformed("line_id", "must not be empty"));
        }
        match self.cycle_time {
            Some(ct) if !ct.is_finite() || ct < 0.0 => {
                return Err(EngineError::malformed(
                    "cycle_time",
                    format!("must be a non-negative number, got {ct}"),
                ));
            }
            _ => {}
        }

        let ts = self.ts.unwrap_or_else(|| Utc::now().timestamp());
        if !(0..=MAX_EVENT_TS).contains(&ts) {
            return Err(EngineError::malformed(
                "ts",
                format!("must be between 0 and {MAX_EVENT_TS}, got {ts}"),
            ));
        }

        Ok(ValidatedEvent {
            sequence_ts: ts,
            event: self.clone(),
        })
    }
}

/// An event that passed ingest validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    /// Resolved event time
    pub sequence_ts: i64,
    /// Original payload
    pub event: NewEvent,
}

/// A stored, immutable production event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Auxiliary strictly increasing id; breaks ties within one second
    pub id: i64,

    /// Event time in seconds since the epoch; the ordering key
    pub sequence_ts: i64,

    /// Reporting device
    pub device_id: String,

    /// Production line
    pub line_id: LineId,

    /// Station on the line
    pub station_id: Option<String>,

    /// What happened
    pub event_type: EventType,

    /// Serial of the unit concerned
    pub unit_id: Option<String>,

    /// Cycle time in seconds
    pub cycle_time: Option<f64>,

    /// Defect classification
    pub defect_code: Option<String>,

    /// Stop classification
    pub stop_reason: Option<String>,
}

/// Identity of a shift bucket.
///
/// Orders by date, then shift, then line, which is also the iteration order
/// of the bucket index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    /// Production date the shift belongs to
    pub date: NaiveDate,
    /// Shift within that date
    pub shift: Shift,
    /// Production line
    pub line_id: LineId,
}

impl BucketKey {
    /// Create a new key.
    pub fn new(date: NaiveDate, shift: Shift, line_id: impl Into<String>) -> Self {
        Self {
            date,
            shift,
            line_id: line_id.into(),
        }
    }

    /// Date in storage form (`YYYY-MM-DD`).
    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.date_str(), self.shift, self.line_id)
    }
}

/// Aggregate metrics for one (date, shift, line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftBucket {
    /// Bucket identity
    #[serde(flatten)]
    pub key: BucketKey,

    /// Units produced
    pub produced_count: i64,

    /// Defects detected
    pub defect_count: i64,

    /// Minutes stopped (one per STOP_MINUTE event)
    pub stop_minutes: i64,

    /// Running cycle-time average (recent samples weighted more)
    pub avg_cycle_time: Option<f64>,

    /// Latest event timestamp folded into this bucket
    pub last_event_ts: i64,
}

impl ShiftBucket {
    /// A bucket with zeroed counters and no watermark.
    pub fn empty(key: BucketKey) -> Self {
        Self {
            key,
            produced_count: 0,
            defect_count: 0,
            stop_minutes: 0,
            avg_cycle_time: None,
            last_event_ts: 0,
        }
    }

    /// Defects per produced unit, 0 when nothing was produced.
    pub fn defect_rate(&self) -> f64 {
        if self.produced_count > 0 {
            self.defect_count as f64 / self.produced_count as f64
        } else {
            0.0
        }
    }
}

/// Counts returned by one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Events folded into buckets
    pub events_processed: usize,

    /// Distinct buckets whose state changed
    pub buckets_changed: usize,

    /// Events offered but rejected by a watermark
    pub events_skipped: usize,

    /// Lines that had unread events
    pub lines_scanned: usize,
}
