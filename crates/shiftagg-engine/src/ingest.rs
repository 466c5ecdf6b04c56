//! Batch ingest of JSON-lines event payloads.
//!
//! A batch is all-or-nothing: every line is parsed and validated before any
//! event is appended, and the first bad line rejects the whole batch.

use std::io::BufRead;

use tracing::info;

use crate::db::ShiftDatabase;
use crate::error::{EngineError, Result};
use crate::models::{NewEvent, ValidatedEvent};

/// Parse and validate one event per non-blank line.
///
/// Validation errors carry the 1-based line number in their message.
pub fn parse_batch<R: BufRead>(reader: R) -> Result<Vec<ValidatedEvent>> {
    let mut events = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let validated = NewEvent::from_json(&line)
            .and_then(|event| event.validate())
            .map_err(|e| at_line(idx + 1, e))?;
        events.push(validated);
    }

    Ok(events)
}

/// Parse a batch and append it in one transaction.
pub fn ingest_batch<R: BufRead>(db: &ShiftDatabase, reader: R) -> Result<usize> {
    let events = parse_batch(reader)?;
    let count = db.append_events(&events)?;
    info!(count, "Ingested events");
    Ok(count)
}

fn at_line(line: usize, err: EngineError) -> EngineError {
    match err {
        EngineError::MalformedEvent { field, message } => EngineError::MalformedEvent {
            field,
            message: format!("line {line}: {message}"),
        },
        other => other,
    }
}
