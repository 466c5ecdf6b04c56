//! Shift resolution: event timestamp to (shift, production date).
//!
//! The night shift straddles midnight. Its post-midnight tail belongs to the
//! shift that started the previous evening, so an event at 03:00 on the 4th is
//! attributed to the night shift of the 3rd.

use chrono::{Days, NaiveDate, Timelike};
use shiftagg_core::{PlantZone, Shift, ShiftCalendar};

use crate::models::BucketKey;

/// Maps event timestamps to bucket identities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShiftResolver {
    zone: PlantZone,
    calendar: ShiftCalendar,
}

impl ShiftResolver {
    /// Create a resolver for a plant zone and shift calendar.
    pub fn new(zone: PlantZone, calendar: ShiftCalendar) -> Self {
        Self { zone, calendar }
    }

    /// Plant time zone.
    pub fn zone(&self) -> PlantZone {
        self.zone
    }

    /// Shift calendar.
    pub fn calendar(&self) -> ShiftCalendar {
        self.calendar
    }

    /// Resolve a timestamp to its shift and the production date it counts
    /// towards.
    pub fn resolve(&self, sequence_ts: i64) -> (Shift, NaiveDate) {
        let dt = self.zone.wall_clock(sequence_ts);
        let hour = dt.hour();
        let shift = self.calendar.shift_for_hour(hour);

        let date = if shift == Shift::Night && self.calendar.is_overnight_tail(hour) {
            // Clamped timestamps keep this above chrono's minimum date
            dt.date().checked_sub_days(Days::new(1)).unwrap_or(dt.date())
        } else {
            dt.date()
        };

        (shift, date)
    }

    /// Bucket key for an event on a line.
    pub fn bucket_key(&self, sequence_ts: i64, line_id: &str) -> BucketKey {
        let (shift, date) = self.resolve(sequence_ts);
        BucketKey::new(date, shift, line_id)
    }

    /// Production date of the shift currently running in the plant zone.
    pub fn current_production_date(&self) -> NaiveDate {
        self.resolve(chrono::Utc::now().timestamp()).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, TimeZone};
    use chrono_tz::Tz;
    use proptest::prelude::*;

    const SEOUL: Tz = chrono_tz::Asia::Seoul;

    fn seoul() -> ShiftResolver {
        ShiftResolver::new(PlantZone::Named(SEOUL), ShiftCalendar::default())
    }

    fn ts(zone: Tz, local: &str) -> i64 {
        let naive = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S").unwrap();
        zone.from_local_datetime(&naive).single().unwrap().timestamp()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_boundary_0759_is_previous_night() {
        let r = seoul();
        assert_eq!(
            r.resolve(ts(SEOUL, "2026-02-04 07:59:59")),
            (Shift::Night, date("2026-02-03"))
        );
    }

    #[test]
    fn test_boundary_0800_is_day() {
        let r = seoul();
        assert_eq!(
            r.resolve(ts(SEOUL, "2026-02-04 08:00:00")),
            (Shift::Day, date("2026-02-04"))
        );
    }

    #[test]
    fn test_boundary_1959_is_day() {
        let r = seoul();
        assert_eq!(
            r.resolve(ts(SEOUL, "2026-02-04 19:59:00")),
            (Shift::Day, date("2026-02-04"))
        );
    }

    #[test]
    fn test_boundary_2000_is_same_date_night() {
        let r = seoul();
        assert_eq!(
            r.resolve(ts(SEOUL, "2026-02-04 20:00:00")),
            (Shift::Night, date("2026-02-04"))
        );
    }

    #[test]
    fn test_midnight_belongs_to_previous_night() {
        let r = seoul();
        assert_eq!(
            r.resolve(ts(SEOUL, "2026-02-05 00:00:00")),
            (Shift::Night, date("2026-02-04"))
        );
    }

    #[test]
    fn test_month_and_year_rollover() {
        let r = seoul();
        assert_eq!(
            r.resolve(ts(SEOUL, "2027-01-01 03:00:00")),
            (Shift::Night, date("2026-12-31"))
        );
        assert_eq!(
            r.resolve(ts(SEOUL, "2026-03-01 01:00:00")),
            (Shift::Night, date("2026-02-28"))
        );
    }

    #[test]
    fn test_custom_calendar() {
        let r = ShiftResolver::new(
            PlantZone::Named(chrono_tz::UTC),
            ShiftCalendar {
                day_start_hour: 6,
                night_start_hour: 18,
            },
        );
        assert_eq!(
            r.resolve(ts(chrono_tz::UTC, "2026-02-04 05:59:00")),
            (Shift::Night, date("2026-02-03"))
        );
        assert_eq!(
            r.resolve(ts(chrono_tz::UTC, "2026-02-04 17:00:00")),
            (Shift::Day, date("2026-02-04"))
        );
    }

    #[test]
    fn test_dst_spring_forward_uses_converted_hour() {
        // 2026-03-08 02:00 EST jumps to 03:00 EDT; 07:30 UTC is 03:30 EDT
        let ny = chrono_tz::America::New_York;
        let r = ShiftResolver::new(PlantZone::Named(ny), ShiftCalendar::default());
        let instant = chrono::Utc
            .with_ymd_and_hms(2026, 3, 8, 7, 30, 0)
            .unwrap()
            .timestamp();
        assert_eq!(r.resolve(instant), (Shift::Night, date("2026-03-07")));

        // 12:00 UTC is 08:00 EDT: day shift starts by the wall clock
        let eight = chrono::Utc
            .with_ymd_and_hms(2026, 3, 8, 12, 0, 0)
            .unwrap()
            .timestamp();
        assert_eq!(r.resolve(eight), (Shift::Day, date("2026-03-08")));
    }

    #[test]
    fn test_dst_fall_back_repeated_hour_is_consistent() {
        // 2026-11-01 01:30 occurs twice in New York; both resolve the same way
        let ny = chrono_tz::America::New_York;
        let r = ShiftResolver::new(PlantZone::Named(ny), ShiftCalendar::default());
        let first = chrono::Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap().timestamp();
        let second = chrono::Utc.with_ymd_and_hms(2026, 11, 1, 6, 30, 0).unwrap().timestamp();
        assert_eq!(r.resolve(first), r.resolve(second));
        assert_eq!(r.resolve(first), (Shift::Night, date("2026-10-31")));
    }

    #[test]
    fn test_bucket_key() {
        let key = seoul().bucket_key(ts(SEOUL, "2026-02-04 08:30:00"), "LINE-1");
        assert_eq!(key, BucketKey::new(date("2026-02-04"), Shift::Day, "LINE-1"));
    }

    proptest! {
        #[test]
        fn prop_shift_window_contains_event(secs in 0i64..4_102_444_800) {
            let r = seoul();
            let (shift, bucket_date) = r.resolve(secs);
            let local = PlantZone::Named(SEOUL).wall_clock(secs);
            let window_start = match shift {
                Shift::Day => bucket_date.and_hms_opt(8, 0, 0).unwrap(),
                Shift::Night => bucket_date.and_hms_opt(20, 0, 0).unwrap(),
            };
            let window_end = window_start + chrono::Duration::hours(12);
            prop_assert!(window_start <= local && local < window_end);
        }

        #[test]
        fn prop_bucket_is_monotonic_in_time(a in 0i64..4_102_444_800, delta in 0i64..200_000) {
            let r = seoul();
            let (s1, d1) = r.resolve(a);
            let (s2, d2) = r.resolve(a + delta);
            prop_assert!((d1, s1) <= (d2, s2));
        }
    }
}
