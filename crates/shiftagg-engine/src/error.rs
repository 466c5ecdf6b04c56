//! Error types for the event store and aggregation engine.

use thiserror::Error;

/// Storage and aggregation errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error (reading ingest files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event rejected at ingest (never reaches the event store)
    #[error("malformed event: {field}: {message}")]
    MalformedEvent {
        /// Offending field
        field: &'static str,
        /// Human-readable reason
        message: String,
    },

    /// A stored row cannot be decoded
    #[error("corrupt row in {table}: {message}")]
    CorruptRow {
        /// Table the row was read from
        table: &'static str,
        /// Human-readable reason
        message: String,
    },

    /// A bucket watermark moved between load and commit
    #[error("watermark for bucket {key} changed during the pass")]
    WatermarkConflict {
        /// Bucket key, rendered as date/shift/line
        key: String,
    },

    /// Schema error (unknown or newer schema version)
    #[error("schema error: {0}")]
    Schema(String),

    /// Connection mutex was poisoned by a panicking holder
    #[error("database connection lock poisoned: {0}")]
    LockPoisoned(String),

    /// A pass was requested while another one is running
    #[error("an aggregation pass is already in flight")]
    PassInFlight,

    /// The blocking task running a pass panicked or was cancelled
    #[error("aggregation task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Whether the failure may clear up by itself before the next tick.
    ///
    /// Busy/locked databases, SQLite I/O failures, and watermark conflicts
    /// qualify. The pass is abandoned and simply retried on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::WatermarkConflict { .. } | EngineError::PassInFlight => true,
            EngineError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }

    /// Whether the process must stop instead of retrying.
    ///
    /// Anything a pass can raise that is not transient is fatal: continuing
    /// on a damaged store risks corrupting watermarks further.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient() && !self.is_malformed_event()
    }

    /// Whether this is an ingest validation failure.
    pub fn is_malformed_event(&self) -> bool {
        matches!(self, EngineError::MalformedEvent { .. })
    }

    /// Create a malformed event error.
    pub fn malformed(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::MalformedEvent {
            field,
            message: message.into(),
        }
    }

    /// Create a user-friendly message for this error.
    pub fn friendly_message(&self) -> String {
        match self {
            EngineError::Database(e) if self.is_transient() => {
                format!("Database is temporarily unavailable ({e}); the next pass will retry.")
            }
            EngineError::Database(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
                ) =>
            {
                "Database file is corrupt; restore it from a backup before restarting.".to_string()
            }
            EngineError::Schema(msg) => {
                format!("Database schema is not supported by this build: {msg}")
            }
            EngineError::MalformedEvent { field, message } => {
                format!("Event rejected ({field}): {message}")
            }
            _ => format!("Error: {self}"),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
