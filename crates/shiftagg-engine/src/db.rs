//! SQLite storage for raw events and shift buckets.
//!
//! Three tables:
//! - `raw_events`: append-only event log, indexed by `(line_id, sequence_ts, id)`
//! - `shift_buckets`: one row per `(date, shift, line_id)`, indexed by `date`
//! - `line_cursors`: highest event id of each line already offered to the engine
//!
//! Ingest only ever inserts into `raw_events`; the engine only reads
//! `raw_events` and writes the other two tables.

use crate::error::{EngineError, Result};
use crate::models::{BucketKey, RawEvent, ShiftBucket, ValidatedEvent};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{
    Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior, params,
};
use shiftagg_core::LineId;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Current schema version for migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Busy timeout applied to every connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_COLUMNS: &str = "id, sequence_ts, device_id, line_id, station_id, event_type,
     unit_id, cycle_time, defect_code, stop_reason";

const BUCKET_COLUMNS: &str = "date, shift, line_id, produced_count, defect_count,
     stop_minutes, avg_cycle_time, last_event_ts";

/// Read position of one line in the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineCursor {
    /// Production line
    pub line_id: LineId,
    /// Highest event id already offered to the engine (0 if none)
    pub last_event_id: i64,
    /// Highest event id currently stored for the line
    pub head_event_id: i64,
}

impl LineCursor {
    /// Whether the line has events the engine has not seen.
    pub fn has_pending(&self) -> bool {
        self.head_event_id > self.last_event_id
    }
}

/// SQLite database holding the event store and the bucket store.
pub struct ShiftDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl ShiftDatabase {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)?,
            _ => {}
        }

        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        Self::from_connection(conn)
    }

    /// Open an existing database for inspection.
    ///
    /// Never creates the file and never migrates, so an outdated database
    /// stays at its recorded schema version.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))
    }

    /// Run database migrations.
    fn migrate(&self) -> Result<()> {
        let mut conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current_version > SCHEMA_VERSION {
            return Err(EngineError::Schema(format!(
                "database schema version {current_version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }

        if current_version < SCHEMA_VERSION {
            info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );
            run_migrations(&mut conn, current_version)?;
        }

        Ok(())
    }

    /// Current schema version recorded in the database.
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        let version = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    // ============ Event Store ============

    /// Append one validated event, returning its id.
    pub fn append_event(&self, event: &ValidatedEvent) -> Result<i64> {
        let conn = self.lock()?;
        insert_event(&conn, event)?;
        let id = conn.last_insert_rowid();
        debug!(id, line_id = %event.event.line_id, event_type = %event.event.event_type, "Appended event");
        Ok(id)
    }

    /// Append a batch of validated events in one transaction.
    pub fn append_events(&self, events: &[ValidatedEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;

        debug!(count = events.len(), "Appended events");
        Ok(events.len())
    }

    /// Number of stored events.
    pub fn event_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM raw_events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Most recently appended events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<RawEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM raw_events ORDER BY id DESC LIMIT ?1"
        ))?;
        let events = stmt
            .query_map(params![limit as i64], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(corrupt_row("raw_events"))?;
        Ok(events)
    }

    /// Read positions of every line present in the event log.
    pub fn line_cursors(&self) -> Result<Vec<LineCursor>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT h.line_id,
                    COALESCE(c.last_event_id, 0),
                    h.head_event_id
             FROM (SELECT line_id, MAX(id) AS head_event_id
                   FROM raw_events GROUP BY line_id) h
             LEFT JOIN line_cursors c ON c.line_id = h.line_id
             ORDER BY h.line_id",
        )?;
        let cursors = stmt
            .query_map([], |row| {
                Ok(LineCursor {
                    line_id: row.get(0)?,
                    last_event_id: row.get(1)?,
                    head_event_id: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cursors)
    }

    /// Events of one line with an id above `after_id`, in fold order.
    pub fn events_after(&self, line_id: &str, after_id: i64) -> Result<Vec<RawEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM raw_events
             WHERE line_id = ?1 AND id > ?2
             ORDER BY sequence_ts ASC, id ASC"
        ))?;
        let events = stmt
            .query_map(params![line_id, after_id], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(corrupt_row("raw_events"))?;
        Ok(events)
    }

    /// Record that every event of a line up to `last_event_id` was offered.
    ///
    /// The cursor only moves forward.
    pub fn advance_cursor(&self, line_id: &str, last_event_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO line_cursors (line_id, last_event_id) VALUES (?1, ?2)
             ON CONFLICT(line_id) DO UPDATE SET
                last_event_id = MAX(last_event_id, excluded.last_event_id)",
            params![line_id, last_event_id],
        )?;
        Ok(())
    }

    // ============ Bucket Store ============

    /// Watermarks of every bucket.
    pub fn load_watermarks(&self) -> Result<HashMap<BucketKey, i64>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT date, shift, line_id, last_event_ts FROM shift_buckets")?;
        let watermarks = stmt
            .query_map([], |row| Ok((row_to_key(row)?, row.get::<_, i64>(3)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()
            .map_err(corrupt_row("shift_buckets"))?;
        Ok(watermarks)
    }

    /// Fetch one bucket.
    pub fn get_bucket(&self, key: &BucketKey) -> Result<Option<ShiftBucket>> {
        let conn = self.lock()?;
        let bucket = conn
            .query_row(
                &format!(
                    "SELECT {BUCKET_COLUMNS} FROM shift_buckets
                     WHERE date = ?1 AND shift = ?2 AND line_id = ?3"
                ),
                params![key.date_str(), key.shift.as_str(), key.line_id],
                row_to_bucket,
            )
            .optional()
            .map_err(corrupt_row("shift_buckets"))?;
        Ok(bucket)
    }

    /// Persist a folded bucket in its own transaction.
    ///
    /// `baseline_ts` is the watermark the fold started from (0 for a new
    /// bucket). If the stored watermark no longer matches, another writer got
    /// there first and nothing is written.
    pub fn commit_bucket(&self, baseline_ts: i64, bucket: &ShiftBucket) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let key = &bucket.key;
        let date = key.date_str();

        tx.execute(
            "INSERT OR IGNORE INTO shift_buckets
             (date, shift, line_id, produced_count, defect_count, stop_minutes,
              avg_cycle_time, last_event_ts)
             VALUES (?1, ?2, ?3, 0, 0, 0, NULL, 0)",
            params![date, key.shift.as_str(), key.line_id],
        )?;

        let stored_ts: i64 = tx.query_row(
            "SELECT last_event_ts FROM shift_buckets
             WHERE date = ?1 AND shift = ?2 AND line_id = ?3",
            params![date, key.shift.as_str(), key.line_id],
            |row| row.get(0),
        )?;

        if stored_ts != baseline_ts {
            return Err(EngineError::WatermarkConflict {
                key: key.to_string(),
            });
        }

        tx.execute(
            "UPDATE shift_buckets
             SET produced_count = ?4,
                 defect_count = ?5,
                 stop_minutes = ?6,
                 avg_cycle_time = ?7,
                 last_event_ts = ?8
             WHERE date = ?1 AND shift = ?2 AND line_id = ?3",
            params![
                date,
                key.shift.as_str(),
                key.line_id,
                bucket.produced_count,
                bucket.defect_count,
                bucket.stop_minutes,
                bucket.avg_cycle_time,
                bucket.last_event_ts,
            ],
        )?;

        tx.commit()?;
        debug!(bucket = %key, last_event_ts = bucket.last_event_ts, "Committed bucket");
        Ok(())
    }

    /// Buckets of one production date, ordered by line then shift.
    pub fn buckets_for_date(&self, date: NaiveDate) -> Result<Vec<ShiftBucket>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {BUCKET_COLUMNS} FROM shift_buckets
             WHERE date = ?1
             ORDER BY line_id ASC, shift ASC"
        ))?;
        let buckets = stmt
            .query_map(params![date.format("%Y-%m-%d").to_string()], row_to_bucket)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(corrupt_row("shift_buckets"))?;
        Ok(buckets)
    }

    /// Most recent buckets, newest production date first.
    pub fn recent_buckets(&self, limit: usize) -> Result<Vec<ShiftBucket>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {BUCKET_COLUMNS} FROM shift_buckets
             ORDER BY date DESC, line_id ASC, shift ASC
             LIMIT ?1"
        ))?;
        let buckets = stmt
            .query_map(params![limit as i64], row_to_bucket)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(corrupt_row("shift_buckets"))?;
        Ok(buckets)
    }

    /// Get raw database connection for advanced queries.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Run migrations from current version to target.
fn run_migrations(conn: &mut Connection, from_version: i32) -> Result<()> {
    if from_version < 1 {
        migration_v1(conn)?;
    }
    if from_version < 2 {
        migration_v2(conn)?;
    }
    Ok(())
}

/// Migration to version 1: event log and bucket table.
fn migration_v1(conn: &mut Connection) -> Result<()> {
    debug!("Running migration v1: raw_events and shift_buckets");

    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS raw_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sequence_ts INTEGER NOT NULL,
            device_id TEXT NOT NULL,
            line_id TEXT NOT NULL,
            station_id TEXT,
            event_type TEXT NOT NULL,
            unit_id TEXT,
            cycle_time REAL,
            defect_code TEXT,
            stop_reason TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_raw_events_line_ts
            ON raw_events(line_id, sequence_ts, id);

        CREATE TABLE IF NOT EXISTS shift_buckets (
            date TEXT NOT NULL,
            shift TEXT NOT NULL CHECK (shift IN ('DAY', 'NIGHT')),
            line_id TEXT NOT NULL,
            produced_count INTEGER NOT NULL DEFAULT 0 CHECK (produced_count >= 0),
            defect_count INTEGER NOT NULL DEFAULT 0 CHECK (defect_count >= 0),
            stop_minutes INTEGER NOT NULL DEFAULT 0 CHECK (stop_minutes >= 0),
            avg_cycle_time REAL,
            last_event_ts INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (date, shift, line_id)
        );

        CREATE INDEX IF NOT EXISTS idx_shift_buckets_date
            ON shift_buckets(date);

        INSERT INTO schema_version (version) VALUES (1);",
    )?;
    tx.commit()?;

    info!("Migration v1 completed: event log and buckets");
    Ok(())
}

/// Migration to version 2: per-line read cursors.
fn migration_v2(conn: &mut Connection) -> Result<()> {
    debug!("Running migration v2: line_cursors");

    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS line_cursors (
            line_id TEXT PRIMARY KEY,
            last_event_id INTEGER NOT NULL DEFAULT 0
        );

        INSERT INTO schema_version (version) VALUES (2);",
    )?;
    tx.commit()?;

    info!("Migration v2 completed: line cursors");
    Ok(())
}

fn insert_event(conn: &Connection, event: &ValidatedEvent) -> Result<()> {
    let e = &event.event;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO raw_events
         (sequence_ts, device_id, line_id, station_id, event_type, unit_id,
          cycle_time, defect_code, stop_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    stmt.execute(params![
        event.sequence_ts,
        e.device_id,
        e.line_id,
        e.station_id,
        e.event_type.as_str(),
        e.unit_id,
        e.cycle_time,
        e.defect_code,
        e.stop_reason,
    ])?;
    Ok(())
}

fn parse_text<T>(idx: usize, value: String) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into())
    })
}

fn row_to_event(row: &Row) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        id: row.get(0)?,
        sequence_ts: row.get(1)?,
        device_id: row.get(2)?,
        line_id: row.get(3)?,
        station_id: row.get(4)?,
        event_type: parse_text(5, row.get(5)?)?,
        unit_id: row.get(6)?,
        cycle_time: row.get(7)?,
        defect_code: row.get(8)?,
        stop_reason: row.get(9)?,
    })
}

fn row_to_key(row: &Row) -> rusqlite::Result<BucketKey> {
    Ok(BucketKey {
        date: parse_text::<NaiveDate>(0, row.get(0)?)?,
        shift: parse_text(1, row.get(1)?)?,
        line_id: row.get(2)?,
    })
}

fn row_to_bucket(row: &Row) -> rusqlite::Result<ShiftBucket> {
    Ok(ShiftBucket {
        key: row_to_key(row)?,
        produced_count: row.get(3)?,
        defect_count: row.get(4)?,
        stop_minutes: row.get(5)?,
        avg_cycle_time: row.get(6)?,
        last_event_ts: row.get(7)?,
    })
}

/// Map row decoding failures to [`EngineError::CorruptRow`].
fn corrupt_row(table: &'static str) -> impl Fn(rusqlite::Error) -> EngineError {
    move |e| match e {
        rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..) => {
            EngineError::CorruptRow {
                table,
                message: e.to_string(),
            }
        }
        other => EngineError::Database(other),
    }
}
