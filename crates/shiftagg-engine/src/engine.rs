//! The incremental aggregation pass.
//!
//! A pass reads each line's unread events in `(sequence_ts, id)` order, folds
//! every event newer than its bucket's watermark, then commits each changed
//! bucket in its own transaction. The line's read cursor only moves once all
//! of that line's buckets are committed, so an interrupted pass re-offers the
//! same events next time and the watermarks drop whatever was already folded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace};

use crate::db::{LineCursor, ShiftDatabase};
use crate::error::Result;
use crate::fold;
use crate::models::{BucketKey, PassReport, ShiftBucket};
use crate::resolver::ShiftResolver;

/// A bucket folded during the current pass, not yet committed.
struct StagedBucket {
    /// Watermark persisted when the pass started
    baseline_ts: i64,
    bucket: ShiftBucket,
}

/// Outcome of folding one line.
#[derive(Default)]
struct LineOutcome {
    processed: usize,
    skipped: usize,
    buckets_changed: usize,
}

/// Folds raw events into shift buckets.
pub struct AggregationEngine {
    db: Arc<ShiftDatabase>,
    resolver: ShiftResolver,
}

impl AggregationEngine {
    /// Create an engine over a database.
    pub fn new(db: Arc<ShiftDatabase>, resolver: ShiftResolver) -> Self {
        Self { db, resolver }
    }

    /// Underlying database.
    pub fn db(&self) -> &Arc<ShiftDatabase> {
        &self.db
    }

    /// Resolver used to bucket events.
    pub fn resolver(&self) -> &ShiftResolver {
        &self.resolver
    }

    /// Run one aggregation pass.
    ///
    /// Errors abort the pass. Buckets committed before the error stay
    /// committed; everything else is picked up again by the next pass.
    pub fn run_pass(&self) -> Result<PassReport> {
        let started = Instant::now();

        // Rebuilt every pass, dropped at the end of it
        let mut watermarks = self.db.load_watermarks()?;
        let cursors = self.db.line_cursors()?;

        let mut report = PassReport::default();
        for cursor in cursors.iter().filter(|c| c.has_pending()) {
            let outcome = self.fold_line(cursor, &mut watermarks)?;
            report.lines_scanned += 1;
            report.events_processed += outcome.processed;
            report.events_skipped += outcome.skipped;
            report.buckets_changed += outcome.buckets_changed;
        }

        info!(
            events_processed = report.events_processed,
            buckets_changed = report.buckets_changed,
            events_skipped = report.events_skipped,
            lines_scanned = report.lines_scanned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Aggregation pass completed"
        );

        Ok(report)
    }

    fn fold_line(
        &self,
        cursor: &LineCursor,
        watermarks: &mut HashMap<BucketKey, i64>,
    ) -> Result<LineOutcome> {
        let events = self
            .db
            .events_after(&cursor.line_id, cursor.last_event_id)?;
        debug!(
            line_id = %cursor.line_id,
            after_id = cursor.last_event_id,
            count = events.len(),
            "Folding line"
        );

        let mut staged: BTreeMap<BucketKey, StagedBucket> = BTreeMap::new();
        let mut outcome = LineOutcome::default();
        let mut last_id = cursor.last_event_id;

        for event in &events {
            last_id = last_id.max(event.id);

            let key = self.resolver.bucket_key(event.sequence_ts, &event.line_id);
            let watermark = watermarks.get(&key).copied().unwrap_or(0);

            // Exactly-once guard; same-second followers are dropped too
            if event.sequence_ts <= watermark {
                trace!(
                    event_id = event.id,
                    sequence_ts = event.sequence_ts,
                    watermark,
                    bucket = %key,
                    "Skipping event at or below bucket watermark"
                );
                outcome.skipped += 1;
                continue;
            }

            if !staged.contains_key(&key) {
                let bucket = self
                    .db
                    .get_bucket(&key)?
                    .unwrap_or_else(|| ShiftBucket::empty(key.clone()));
                staged.insert(
                    key.clone(),
                    StagedBucket {
                        baseline_ts: watermark,
                        bucket,
                    },
                );
            }

            if let Some(entry) = staged.get_mut(&key) {
                fold::apply(&mut entry.bucket, event);
                watermarks.insert(key, entry.bucket.last_event_ts);
                outcome.processed += 1;
            }
        }

        for entry in staged.values() {
            self.db.commit_bucket(entry.baseline_ts, &entry.bucket)?;
        }
        outcome.buckets_changed = staged.len();

        if last_id > cursor.last_event_id {
            self.db.advance_cursor(&cursor.line_id, last_id)?;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewEvent;
    use chrono::{NaiveDate, NaiveDateTime, TimeZone};
    use chrono_tz::Tz;
    use shiftagg_core::{EventType, PlantZone, Shift, ShiftCalendar};

    const SEOUL: Tz = chrono_tz::Asia::Seoul;

    fn engine() -> AggregationEngine {
        let db = Arc::new(ShiftDatabase::open_in_memory().unwrap());
        AggregationEngine::new(
            db,
            ShiftResolver::new(PlantZone::Named(SEOUL), ShiftCalendar::default()),
        )
    }

    fn ts(local: &str) -> i64 {
        let naive = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S").unwrap();
        SEOUL.from_local_datetime(&naive).single().unwrap().timestamp()
    }

    fn key(date: &str, shift: Shift, line: &str) -> BucketKey {
        BucketKey::new(NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(), shift, line)
    }

    fn ingest(engine: &AggregationEngine, events: Vec<NewEvent>) {
        let validated: Vec<_> = events.iter().map(|e| e.validate().unwrap()).collect();
        engine.db().append_events(&validated).unwrap();
    }

    fn event(local: &str, line: &str, event_type: EventType) -> NewEvent {
        NewEvent::new(ts(local), "sim-01", line, event_type)
    }

    fn bucket(engine: &AggregationEngine, k: &BucketKey) -> ShiftBucket {
        engine.db().get_bucket(k).unwrap().unwrap()
    }

    #[test]
    fn test_end_to_end_day_shift() {
        let engine = engine();
        ingest(
            &engine,
            vec![
                event("2026-02-03 08:30:00", "L1", EventType::Produced).with_cycle_time(12.0),
                event("2026-02-03 08:31:00", "L1", EventType::Defect),
                event("2026-02-03 08:40:00", "L1", EventType::StopMinute),
                event("2026-02-03 08:41:00", "L1", EventType::StopMinute),
                event("2026-02-03 08:42:00", "L1", EventType::StopMinute),
            ],
        );

        let report = engine.run_pass().unwrap();
        assert_eq!(report.events_processed, 5);
        assert_eq!(report.buckets_changed, 1);

        let b = bucket(&engine, &key("2026-02-03", Shift::Day, "L1"));
        assert_eq!(b.produced_count, 1);
        assert_eq!(b.defect_count, 1);
        assert_eq!(b.stop_minutes, 3);
        assert_eq!(b.avg_cycle_time, Some(12.0));
        assert_eq!(b.last_event_ts, ts("2026-02-03 08:42:00"));
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let engine = engine();
        ingest(
            &engine,
            vec![
                event("2026-02-03 09:00:00", "L1", EventType::Produced).with_cycle_time(10.0),
                event("2026-02-03 21:00:00", "L1", EventType::Produced),
            ],
        );
        engine.run_pass().unwrap();
        let day = bucket(&engine, &key("2026-02-03", Shift::Day, "L1"));
        let night = bucket(&engine, &key("2026-02-03", Shift::Night, "L1"));

        let report = engine.run_pass().unwrap();
        assert_eq!(report, PassReport::default());
        assert_eq!(bucket(&engine, &day.key), day);
        assert_eq!(bucket(&engine, &night.key), night);
    }

    #[test]
    fn test_refed_event_is_not_counted_twice() {
        let engine = engine();
        let produced = event("2026-02-03 09:00:00", "L1", EventType::Produced).with_cycle_time(10.0);
        ingest(&engine, vec![produced.clone()]);
        engine.run_pass().unwrap();

        ingest(&engine, vec![produced]);
        let report = engine.run_pass().unwrap();
        assert_eq!(report.events_processed, 0);
        assert_eq!(report.events_skipped, 1);

        let b = bucket(&engine, &key("2026-02-03", Shift::Day, "L1"));
        assert_eq!(b.produced_count, 1);
        assert_eq!(b.avg_cycle_time, Some(10.0));
    }

    #[test]
    fn test_same_second_events_keep_only_first() {
        let engine = engine();
        ingest(
            &engine,
            vec![
                event("2026-02-03 09:00:00", "L1", EventType::Produced).with_cycle_time(10.0),
                event("2026-02-03 09:00:00", "L1", EventType::Produced).with_cycle_time(40.0),
                event("2026-02-03 09:00:00", "L1", EventType::Defect),
            ],
        );

        let report = engine.run_pass().unwrap();
        assert_eq!(report.events_processed, 1);
        assert_eq!(report.events_skipped, 2);

        let b = bucket(&engine, &key("2026-02-03", Shift::Day, "L1"));
        assert_eq!(b.produced_count, 1);
        assert_eq!(b.defect_count, 0);
        assert_eq!(b.avg_cycle_time, Some(10.0));
    }

    #[test]
    fn test_same_second_result_independent_of_pass_split() {
        let one_pass = engine();
        ingest(
            &one_pass,
            vec![
                event("2026-02-03 09:00:00", "L1", EventType::Produced),
                event("2026-02-03 09:00:00", "L1", EventType::Produced),
            ],
        );
        one_pass.run_pass().unwrap();

        let two_passes = engine();
        ingest(
            &two_passes,
            vec![event("2026-02-03 09:00:00", "L1", EventType::Produced)],
        );
        two_passes.run_pass().unwrap();
        ingest(
            &two_passes,
            vec![event("2026-02-03 09:00:00", "L1", EventType::Produced)],
        );
        two_passes.run_pass().unwrap();

        let k = key("2026-02-03", Shift::Day, "L1");
        assert_eq!(bucket(&one_pass, &k), bucket(&two_passes, &k));
        assert_eq!(bucket(&one_pass, &k).produced_count, 1);
    }

    #[test]
    fn test_lines_are_independent() {
        let engine = engine();
        ingest(
            &engine,
            vec![event("2026-02-03 09:00:00", "L1", EventType::Produced)],
        );
        engine.run_pass().unwrap();
        let l1 = bucket(&engine, &key("2026-02-03", Shift::Day, "L1"));

        // Same second on another line is not a duplicate
        ingest(
            &engine,
            vec![
                event("2026-02-03 09:00:00", "L2", EventType::Produced),
                event("2026-02-03 09:05:00", "L2", EventType::Defect),
            ],
        );
        let report = engine.run_pass().unwrap();
        assert_eq!(report.events_processed, 2);
        assert_eq!(report.lines_scanned, 1);

        assert_eq!(bucket(&engine, &l1.key), l1);
        let l2 = bucket(&engine, &key("2026-02-03", Shift::Day, "L2"));
        assert_eq!(l2.produced_count, 1);
        assert_eq!(l2.defect_count, 1);
    }

    #[test]
    fn test_events_fold_in_timestamp_order() {
        let engine = engine();
        // Inserted out of order; folded as 10, 20, 30
        ingest(
            &engine,
            vec![
                event("2026-02-03 09:00:02", "L1", EventType::Produced).with_cycle_time(30.0),
                event("2026-02-03 09:00:00", "L1", EventType::Produced).with_cycle_time(10.0),
                event("2026-02-03 09:00:01", "L1", EventType::Produced).with_cycle_time(20.0),
            ],
        );
        engine.run_pass().unwrap();

        let b = bucket(&engine, &key("2026-02-03", Shift::Day, "L1"));
        assert_eq!(b.avg_cycle_time, Some(22.5));
        assert_eq!(b.last_event_ts, ts("2026-02-03 09:00:02"));
    }

    #[test]
    fn test_night_shift_spans_midnight() {
        let engine = engine();
        ingest(
            &engine,
            vec![
                event("2026-02-03 23:00:00", "L1", EventType::Produced),
                event("2026-02-04 01:00:00", "L1", EventType::Produced),
                event("2026-02-04 07:59:59", "L1", EventType::StopMinute),
                event("2026-02-04 08:00:00", "L1", EventType::Produced),
            ],
        );
        let report = engine.run_pass().unwrap();
        assert_eq!(report.buckets_changed, 2);

        let night = bucket(&engine, &key("2026-02-03", Shift::Night, "L1"));
        assert_eq!(night.produced_count, 2);
        assert_eq!(night.stop_minutes, 1);

        let day = bucket(&engine, &key("2026-02-04", Shift::Day, "L1"));
        assert_eq!(day.produced_count, 1);
    }

    #[test]
    fn test_late_event_is_dropped() {
        let engine = engine();
        ingest(
            &engine,
            vec![event("2026-02-03 10:00:00", "L1", EventType::Produced)],
        );
        engine.run_pass().unwrap();

        ingest(
            &engine,
            vec![event("2026-02-03 09:00:00", "L1", EventType::Produced)],
        );
        let report = engine.run_pass().unwrap();
        assert_eq!(report.events_skipped, 1);
        assert_eq!(
            bucket(&engine, &key("2026-02-03", Shift::Day, "L1")).produced_count,
            1
        );

        // Offered once; not offered again
        assert_eq!(engine.run_pass().unwrap(), PassReport::default());
    }

    #[test]
    fn test_resume_after_partial_commit() {
        let engine = engine();
        ingest(
            &engine,
            vec![
                event("2026-02-03 19:00:00", "L1", EventType::Produced),
                event("2026-02-03 19:30:00", "L1", EventType::Produced),
                event("2026-02-03 21:00:00", "L1", EventType::Produced),
            ],
        );

        // A pass that committed the day bucket and stopped before the night one
        let day_key = key("2026-02-03", Shift::Day, "L1");
        let mut day = ShiftBucket::empty(day_key.clone());
        for e in engine.db().events_after("L1", 0).unwrap().iter().take(2) {
            fold::apply(&mut day, e);
        }
        engine.db().commit_bucket(0, &day).unwrap();

        let report = engine.run_pass().unwrap();
        assert_eq!(report.events_skipped, 2);
        assert_eq!(report.events_processed, 1);

        assert_eq!(bucket(&engine, &day_key).produced_count, 2);
        assert_eq!(
            bucket(&engine, &key("2026-02-03", Shift::Night, "L1")).produced_count,
            1
        );
    }

    #[test]
    fn test_empty_store() {
        let engine = engine();
        assert_eq!(engine.run_pass().unwrap(), PassReport::default());
    }
}
