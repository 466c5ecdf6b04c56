//! The per-event bucket update.
//!
//! Folding is order-sensitive: the cycle-time average halves the weight of
//! every earlier sample each time a new one arrives, so events must be folded
//! in `sequence_ts` order.

use shiftagg_core::EventType;

use crate::models::{RawEvent, ShiftBucket};

/// Apply one event to a bucket.
///
/// Does not consult the watermark; callers decide whether the event is new.
/// The watermark is raised to the event's timestamp and never lowered.
pub fn apply(bucket: &mut ShiftBucket, event: &RawEvent) {
    match event.event_type {
        EventType::Produced => bucket.produced_count += 1,
        EventType::Defect => bucket.defect_count += 1,
        // One heartbeat is one minute of stoppage
        EventType::StopMinute => bucket.stop_minutes += 1,
        EventType::StopStart | EventType::StopEnd => {}
    }

    if let Some(cycle_time) = event.cycle_time {
        bucket.avg_cycle_time = Some(blend_cycle_time(bucket.avg_cycle_time, cycle_time));
    }

    bucket.last_event_ts = bucket.last_event_ts.max(event.sequence_ts);
}

/// Running cycle-time average: the first sample as-is, then the midpoint of
/// the previous average and the new sample.
///
/// Halves before adding so two large finite inputs cannot sum to infinity.
pub fn blend_cycle_time(previous: Option<f64>, sample: f64) -> f64 {
    match previous {
        None => sample,
        Some(avg) => avg / 2.0 + sample / 2.0,
    }
}
