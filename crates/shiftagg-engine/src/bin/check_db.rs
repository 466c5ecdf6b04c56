//! Inspect a shiftagg database: recent raw events and bucket rows.
//!
//! Usage: `check_db [DB_PATH]` (defaults to `~/.shiftagg/shiftagg.db`)
//!
//! Opens the file read-only; an outdated database is reported, not migrated.

use shiftagg_engine::ShiftDatabase;
use shiftagg_engine::db::SCHEMA_VERSION;
use std::path::PathBuf;

const RECENT_LIMIT: usize = 10;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let db_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => shiftagg_core::logging::default_database_path()?,
    };

    if !db_path.exists() {
        println!("Database does not exist at {:?}", db_path);
        return Ok(());
    }

    let db = ShiftDatabase::open_read_only(&db_path)?;

    let version = db.schema_version()?;
    println!("=== Schema ===");
    println!("version: {} (current: {})", version, SCHEMA_VERSION);
    if version != SCHEMA_VERSION {
        println!("Run `shiftagg init-db` with a matching build to migrate");
        return Ok(());
    }
    println!("raw events: {}", db.event_count()?);

    println!("\n=== Recent raw events (newest first) ===");
    for e in db.recent_events(RECENT_LIMIT)? {
        println!(
            "  #{} ts={} line={} station={} type={} ct={}",
            e.id,
            e.sequence_ts,
            e.line_id,
            e.station_id.as_deref().unwrap_or("-"),
            e.event_type,
            e.cycle_time.map_or("-".to_string(), |ct| format!("{ct:.2}")),
        );
    }

    println!("\n=== Line cursors ===");
    for cursor in db.line_cursors()? {
        println!(
            "  {} : read up to #{} of #{}",
            cursor.line_id, cursor.last_event_id, cursor.head_event_id
        );
    }

    println!("\n=== Recent shift buckets ===");
    for b in db.recent_buckets(RECENT_LIMIT)? {
        println!(
            "  {} : produced={} defects={} stop_min={} avg_ct={} last_ts={}",
            b.key,
            b.produced_count,
            b.defect_count,
            b.stop_minutes,
            b.avg_cycle_time.map_or("-".to_string(), |ct| format!("{ct:.2}")),
            b.last_event_ts,
        );
    }

    Ok(())
}
