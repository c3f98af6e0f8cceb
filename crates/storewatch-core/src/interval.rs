//! Check-interval model and due-set selection.
//!
//! A source is due when it has never been checked, or when the current time
//! has reached `last_checked + effective_interval`. The boundary is inclusive.
//! Selection is a pure function of the source records passed in, so callers
//! recompute it from persisted state on every tick.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WatchError;
use crate::models::Source;

/// Minimum effective interval for `seconds`/`minutes` units unless configured.
pub const DEFAULT_MIN_INTERVAL_SECS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Seconds => "seconds",
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Hours => "hours",
            IntervalUnit::Days => "days",
        }
    }

    fn seconds_per_unit(&self) -> i64 {
        match self {
            IntervalUnit::Seconds => 1,
            IntervalUnit::Minutes => 60,
            IntervalUnit::Hours => 3_600,
            IntervalUnit::Days => 86_400,
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalUnit {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "seconds" => Ok(IntervalUnit::Seconds),
            "minutes" => Ok(IntervalUnit::Minutes),
            "hours" => Ok(IntervalUnit::Hours),
            "days" => Ok(IntervalUnit::Days),
            other => Err(WatchError::validation(format!(
                "unit must be seconds, minutes, hours, or days (got '{}')",
                other
            ))),
        }
    }
}

/// How often a source should be checked: a positive magnitude plus a unit.
///
/// Deserialization goes through [`CheckInterval::new`], so a zero or
/// negative value is rejected there too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct CheckInterval {
    value: u32,
    unit: IntervalUnit,
}

#[derive(Deserialize)]
struct RawInterval {
    value: i64,
    unit: IntervalUnit,
}

impl TryFrom<RawInterval> for CheckInterval {
    type Error = WatchError;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        CheckInterval::new(raw.value, raw.unit)
    }
}

impl CheckInterval {
    /// Validate and build an interval. `value` must be > 0.
    pub fn new(value: i64, unit: IntervalUnit) -> Result<Self, WatchError> {
        if value <= 0 {
            return Err(WatchError::validation(
                "interval value must be a positive number",
            ));
        }
        let value = u32::try_from(value)
            .map_err(|_| WatchError::validation(format!("interval value {} is too large", value)))?;
        Ok(Self { value, unit })
    }

    /// Validate a `(value, unit)` pair where the unit is still a string.
    pub fn parse(value: i64, unit: &str) -> Result<Self, WatchError> {
        Self::new(value, unit.parse()?)
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn unit(&self) -> IntervalUnit {
        self.unit
    }

    /// Convert to a duration, raising `seconds`/`minutes` intervals to `floor`.
    pub fn effective(&self, floor: Duration) -> Duration {
        effective_interval(self.value, self.unit, floor)
    }
}

impl Default for CheckInterval {
    fn default() -> Self {
        Self {
            value: 24,
            unit: IntervalUnit::Hours,
        }
    }
}

impl fmt::Display for CheckInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Convert `(value, unit)` into the duration used for due checks.
pub fn effective_interval(value: u32, unit: IntervalUnit, floor: Duration) -> Duration {
    let raw = Duration::seconds(i64::from(value) * unit.seconds_per_unit());
    match unit {
        IntervalUnit::Seconds | IntervalUnit::Minutes => raw.max(floor),
        IntervalUnit::Hours | IntervalUnit::Days => raw,
    }
}

/// When the source next becomes due, or `None` if it has never been checked.
pub fn next_check_at(source: &Source, floor: Duration) -> Option<DateTime<Utc>> {
    source
        .last_checked
        .map(|last| last + source.interval.effective(floor))
}

pub fn is_due(source: &Source, now: DateTime<Utc>, floor: Duration) -> bool {
    match next_check_at(source, floor) {
        None => true,
        Some(next) => now >= next,
    }
}

/// Filter `sources` down to the ones due at `now`, preserving input order.
pub fn due_sources(sources: Vec<Source>, now: DateTime<Utc>, floor: Duration) -> Vec<Source> {
    sources
        .into_iter()
        .filter(|s| is_due(s, now, floor))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoreKind;

    #[test]
    fn test_deserialize_validates() {
        let ok: CheckInterval =
            serde_json::from_str(r#"{"value": 6, "unit": "hours"}"#).unwrap();
        assert_eq!(ok, CheckInterval::new(6, IntervalUnit::Hours).unwrap());

        for bad in [
            r#"{"value": 0, "unit": "minutes"}"#,
            r#"{"value": -3, "unit": "days"}"#,
            r#"{"value": 5, "unit": "weeks"}"#,
        ] {
            assert!(serde_json::from_str::<CheckInterval>(bad).is_err(), "{}", bad);
        }

        let json = serde_json::to_string(&ok).unwrap();
        assert_eq!(json, r#"{"value":6,"unit":"hours"}"#);
    }
    use chrono::TimeZone;

    fn floor() -> Duration {
        Duration::seconds(DEFAULT_MIN_INTERVAL_SECS)
    }

    fn source(id: i64, interval: CheckInterval, last: Option<DateTime<Utc>>) -> Source {
        Source {
            id,
            name: format!("source-{}", id),
            url: format!("https://play.google.com/store/apps/dev?id={}", id),
            kind: StoreKind::Playstore,
            interval,
            last_checked: last,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_conversion_table() {
        let thirty = CheckInterval::parse(30, "seconds").unwrap();
        assert_eq!(thirty.effective(floor()), Duration::seconds(30));

        let two_days = CheckInterval::parse(2, "days").unwrap();
        assert_eq!(two_days.effective(floor()), Duration::seconds(172_800));

        let hours = CheckInterval::parse(3, "hours").unwrap();
        assert_eq!(hours.effective(floor()), Duration::seconds(10_800));

        let minute = CheckInterval::parse(1, "minutes").unwrap();
        assert!(minute.effective(floor()) >= floor());
        assert_eq!(minute.effective(floor()), Duration::seconds(60));
    }

    #[test]
    fn test_floor_applies_to_small_units_only() {
        let big_floor = Duration::seconds(90);
        let secs = CheckInterval::parse(10, "seconds").unwrap();
        assert_eq!(secs.effective(big_floor), Duration::seconds(90));

        let mins = CheckInterval::parse(1, "minutes").unwrap();
        assert_eq!(mins.effective(big_floor), Duration::seconds(90));

        let hours = CheckInterval::parse(1, "hours").unwrap();
        assert_eq!(hours.effective(Duration::hours(5)), Duration::hours(1));
    }

    #[test]
    fn test_rejects_non_positive_and_unknown_unit() {
        assert!(matches!(
            CheckInterval::parse(0, "hours"),
            Err(WatchError::Validation(_))
        ));
        assert!(matches!(
            CheckInterval::parse(-5, "days"),
            Err(WatchError::Validation(_))
        ));
        assert!(matches!(
            CheckInterval::parse(5, "weeks"),
            Err(WatchError::Validation(_))
        ));
    }

    #[test]
    fn test_unit_parse_is_case_insensitive() {
        assert_eq!("Minutes".parse::<IntervalUnit>().unwrap(), IntervalUnit::Minutes);
        assert_eq!(" days ".parse::<IntervalUnit>().unwrap(), IntervalUnit::Days);
    }

    #[test]
    fn test_never_checked_is_always_due() {
        let s = source(1, CheckInterval::parse(7, "days").unwrap(), None);
        let far_past = Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap();
        assert!(is_due(&s, far_past, floor()));
        assert!(is_due(&s, Utc::now(), floor()));
    }

    #[test]
    fn test_due_boundary_is_inclusive() {
        let last = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let s = source(1, CheckInterval::parse(30, "seconds").unwrap(), Some(last));

        assert!(!is_due(&s, last + Duration::seconds(29), floor()));
        assert!(is_due(&s, last + Duration::seconds(30), floor()));
        assert!(is_due(&s, last + Duration::seconds(31), floor()));
    }

    #[test]
    fn test_due_sources_preserves_order() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let hourly = CheckInterval::parse(1, "hours").unwrap();
        let sources = vec![
            source(3, hourly, None),
            source(2, hourly, Some(now - Duration::minutes(10))),
            source(1, hourly, Some(now - Duration::hours(2))),
        ];
        let due: Vec<i64> = due_sources(sources, now, floor())
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(due, vec![3, 1]);
    }

    #[test]
    fn test_next_check_at() {
        let last = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let s = source(1, CheckInterval::parse(2, "hours").unwrap(), Some(last));
        assert_eq!(next_check_at(&s, floor()), Some(last + Duration::hours(2)));
        assert_eq!(next_check_at(&source(2, s.interval, None), floor()), None);
    }
}
