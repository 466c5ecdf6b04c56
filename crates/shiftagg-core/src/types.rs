//! Shared type definitions used across shiftagg crates.
//!
//! This module provides the domain vocabulary that both the configuration
//! layer and the aggregation engine speak: event types, shifts, the shift
//! calendar, and the plant time zone used to turn event timestamps into
//! wall-clock time.

use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShiftaggError};

/// Identifier of a production line (e.g., "LINE-1").
pub type LineId = String;

/// Largest accepted event timestamp (9999-12-31T23:59:59Z).
pub const MAX_EVENT_TS: i64 = 253_402_300_799;

/// Kind of production event emitted by a device on the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// One unit left the line
    Produced,
    /// One defect was detected
    Defect,
    /// The line stopped (recorded, not counted)
    StopStart,
    /// The line resumed (recorded, not counted)
    StopEnd,
    /// Heartbeat emitted once per minute while the line is stopped
    StopMinute,
}

impl EventType {
    /// All event types, in declaration order.
    pub const ALL: [EventType; 5] = [
        Self::Produced,
        Self::Defect,
        Self::StopStart,
        Self::StopEnd,
        Self::StopMinute,
    ];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Produced => "PRODUCED",
            Self::Defect => "DEFECT",
            Self::StopStart => "STOP_START",
            Self::StopEnd => "STOP_END",
            Self::StopMinute => "STOP_MINUTE",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// One of the two fixed operational periods of a production day.
///
/// Ordered `Day < Night`, which matches the textual ordering used by the
/// bucket table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Shift {
    /// Daytime shift (08:00-20:00 by default)
    Day,
    /// Overnight shift (20:00-08:00 next day by default)
    Night,
}

impl Shift {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "DAY",
            Self::Night => "NIGHT",
        }
    }
}

impl std::fmt::Display for Shift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Shift {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DAY" => Ok(Self::Day),
            "NIGHT" => Ok(Self::Night),
            _ => Err(format!("unknown shift: {s}")),
        }
    }
}

/// Hours at which the day and night shifts begin.
///
/// The day shift covers `[day_start_hour, night_start_hour)`; every other hour
/// belongs to the night shift. Hours before `day_start_hour` are the tail of
/// the night shift that started the previous evening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftCalendar {
    /// First hour of the day shift (default 8)
    pub day_start_hour: u32,
    /// First hour of the night shift (default 20)
    pub night_start_hour: u32,
}

impl Default for ShiftCalendar {
    fn default() -> Self {
        Self {
            day_start_hour: 8,
            night_start_hour: 20,
        }
    }
}

impl ShiftCalendar {
    /// Check `0 < day_start_hour < night_start_hour < 24`.
    pub fn validate(&self) -> Result<()> {
        if self.day_start_hour == 0
            || self.day_start_hour >= self.night_start_hour
            || self.night_start_hour >= 24
        {
            return Err(ShiftaggError::ConfigValidation {
                message: format!(
                    "shift hours must satisfy 0 < day_start_hour < night_start_hour < 24 (got {} and {})",
                    self.day_start_hour, self.night_start_hour
                ),
            });
        }
        Ok(())
    }

    /// Shift that owns the given wall-clock hour.
    pub fn shift_for_hour(&self, hour: u32) -> Shift {
        if (self.day_start_hour..self.night_start_hour).contains(&hour) {
            Shift::Day
        } else {
            Shift::Night
        }
    }

    /// Whether the hour is the post-midnight tail of an overnight shift.
    pub fn is_overnight_tail(&self, hour: u32) -> bool {
        hour < self.day_start_hour
    }
}

/// Time zone in which shift boundaries are evaluated.
///
/// `Local` follows the host's zone, which is what a plant-floor server
/// normally runs in. A named IANA zone pins the plant's zone regardless of
/// where the aggregator is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlantZone {
    /// Host local time zone
    #[default]
    Local,
    /// Fixed IANA zone (e.g., "Asia/Seoul")
    Named(Tz),
}

impl PlantZone {
    /// Convert an event timestamp to plant wall-clock time.
    ///
    /// Timestamps outside `[0, MAX_EVENT_TS]` are clamped so the conversion is
    /// total. An instant always maps to exactly one wall-clock time, so DST
    /// transitions never make the result ambiguous.
    pub fn wall_clock(&self, ts: i64) -> NaiveDateTime {
        let instant = DateTime::<Utc>::from_timestamp(ts.clamp(0, MAX_EVENT_TS), 0)
            .unwrap_or_default();
        match self {
            Self::Local => instant.with_timezone(&Local).naive_local(),
            Self::Named(tz) => instant.with_timezone(tz).naive_local(),
        }
    }

    /// Current wall-clock time in the plant zone.
    pub fn now(&self) -> NaiveDateTime {
        self.wall_clock(Utc::now().timestamp())
    }
}

impl std::fmt::Display for PlantZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

impl FromStr for PlantZone {
    type Err = ShiftaggError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("local") {
            return Ok(Self::Local);
        }
        s.parse::<Tz>()
            .map(Self::Named)
            .map_err(|e| ShiftaggError::ConfigValidation {
                message: format!("invalid timezone '{s}': {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
        assert!("PASS".parse::<EventType>().is_err());
    }

    #[test]
    fn test_event_type_serde_matches_storage() {
        let json = serde_json::to_string(&EventType::StopMinute).unwrap();
        assert_eq!(json, "\"STOP_MINUTE\"");
    }

    #[test]
    fn test_shift_ordering() {
        assert!(Shift::Day < Shift::Night);
        assert_eq!("NIGHT".parse::<Shift>().unwrap(), Shift::Night);
    }

    #[test]
    fn test_calendar_hours() {
        let cal = ShiftCalendar::default();
        assert_eq!(cal.shift_for_hour(7), Shift::Night);
        assert_eq!(cal.shift_for_hour(8), Shift::Day);
        assert_eq!(cal.shift_for_hour(19), Shift::Day);
        assert_eq!(cal.shift_for_hour(20), Shift::Night);
        assert!(cal.is_overnight_tail(0));
        assert!(!cal.is_overnight_tail(23));
    }

    #[test]
    fn test_calendar_validation() {
        assert!(ShiftCalendar::default().validate().is_ok());
        let bad = ShiftCalendar {
            day_start_hour: 20,
            night_start_hour: 8,
        };
        assert!(bad.validate().is_err());
        let midnight = ShiftCalendar {
            day_start_hour: 0,
            night_start_hour: 12,
        };
        assert!(midnight.validate().is_err());
    }

    #[test]
    fn test_plant_zone_parse() {
        assert_eq!("local".parse::<PlantZone>().unwrap(), PlantZone::Local);
        assert_eq!(
            "Asia/Seoul".parse::<PlantZone>().unwrap(),
            PlantZone::Named(chrono_tz::Asia::Seoul)
        );
        assert!("Mars/Olympus".parse::<PlantZone>().is_err());
    }

    #[test]
    fn test_wall_clock_named_zone() {
        // 2026-02-03T00:00:00Z is 09:00 in Seoul
        let zone = PlantZone::Named(chrono_tz::Asia::Seoul);
        let dt = zone.wall_clock(1_770_076_800);
        assert_eq!(dt.to_string(), "2026-02-03 09:00:00");
    }

    #[test]
    fn test_wall_clock_clamps_out_of_range() {
        let zone = PlantZone::Named(chrono_tz::UTC);
        assert_eq!(zone.wall_clock(-5).to_string(), "1970-01-01 00:00:00");
        assert_eq!(zone.wall_clock(i64::MAX).to_string(), "9999-12-31 23:59:59");
    }
}
