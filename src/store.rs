use crate::telemetry::Reading;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_derive::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Offset-less datetime forms, read as UTC. The second form is what an HTML
/// `datetime-local` input submits.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unrecognized instant '{0}'")]
pub struct InvalidInstant(pub String);

/// Which end of a custom window a bound sits on. A bare date covers the
/// whole day.
#[derive(Debug, Clone, Copy)]
enum Edge {
    Start,
    End,
}

/// Named query windows, all anchored at "now" except `Custom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    Hour,
    SixHours,
    Day,
    Week,
    Month,
    Year,
    Custom,
    /// Epoch to now. Used for missing or unrecognized range names.
    All,
}

impl TimeRange {
    pub fn parse(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some("hour") => TimeRange::Hour,
            Some("6hour") => TimeRange::SixHours,
            Some("24hour") => TimeRange::Day,
            Some("week") => TimeRange::Week,
            Some("month") => TimeRange::Month,
            Some("year") => TimeRange::Year,
            Some("custom") => TimeRange::Custom,
            other => {
                debug!("Unrecognized range {:?}, using full history", other);
                TimeRange::All
            }
        }
    }

    fn lookback(&self) -> Option<Duration> {
        match self {
            TimeRange::Hour => Some(Duration::hours(1)),
            TimeRange::SixHours => Some(Duration::hours(6)),
            TimeRange::Day => Some(Duration::hours(24)),
            TimeRange::Week => Some(Duration::days(7)),
            TimeRange::Month => Some(Duration::days(30)),
            TimeRange::Year => Some(Duration::days(365)),
            TimeRange::Custom | TimeRange::All => None,
        }
    }
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from <= instant && instant <= self.to
    }
}

/// Query string accepted by the history endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeQuery {
    pub range: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl RangeQuery {
    pub fn custom(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            range: Some("custom".to_string()),
            start: start.map(|t| t.to_rfc3339()),
            end: end.map(|t| t.to_rfc3339()),
        }
    }

    pub fn named(range: &str) -> Self {
        Self {
            range: Some(range.to_string()),
            ..Default::default()
        }
    }

    /// Resolves the query into a concrete window relative to `now`.
    ///
    /// Absent custom bounds default to the epoch and `now`. A bound that is
    /// present but unrecognized is an error rather than a wider window.
    pub fn window(&self, now: DateTime<Utc>) -> Result<Window, InvalidInstant> {
        let range = TimeRange::parse(self.range.as_deref());
        let window = match range {
            TimeRange::Custom => Window {
                from: parse_bound(self.start.as_deref(), Edge::Start)?
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                to: parse_bound(self.end.as_deref(), Edge::End)?.unwrap_or(now),
            },
            TimeRange::All => Window {
                from: DateTime::<Utc>::UNIX_EPOCH,
                to: now,
            },
            named => Window {
                from: now - named.lookback().unwrap_or_else(Duration::zero),
                to: now,
            },
        };
        Ok(window)
    }
}

fn parse_bound(raw: Option<&str>, edge: Edge) -> Result<Option<DateTime<Utc>>, InvalidInstant> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };
    parse_instant(raw, edge)
        .map(Some)
        .ok_or_else(|| InvalidInstant(raw.to_string()))
}

/// Accepts RFC3339, offset-less datetimes, bare dates and epoch milliseconds.
fn parse_instant(raw: &str, edge: Edge) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Some(t) = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    {
        return Some(t.and_utc());
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let t = match edge {
            Edge::Start => day.and_hms_opt(0, 0, 0),
            Edge::End => day.and_hms_milli_opt(23, 59, 59, 999),
        };
        return t.map(|t| t.and_utc());
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse().ok().and_then(DateTime::from_timestamp_millis);
    }
    None
}

/// Append-only log of captured readings.
#[derive(Debug, Clone, Default)]
pub struct ReadingStore {
    readings: Vec<Reading>,
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_readings(readings: Vec<Reading>) -> Self {
        Self { readings }
    }

    pub fn append(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Insertion-ordered view, as persisted.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Readings inside the query window, oldest first.
    pub fn query(&self, query: &RangeQuery, now: DateTime<Utc>) -> Vec<Reading> {
        let window = match query.window(now) {
            Ok(window) => window,
            Err(e) => {
                debug!("{}, selecting nothing", e);
                return Vec::new();
            }
        };
        let mut selected: Vec<Reading> = self
            .readings
            .iter()
            .filter(|r| window.contains(r.timestamp))
            .cloned()
            .collect();
        selected.sort_by_key(|r| r.timestamp);
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn reading(secs: i64, watt: f64) -> Reading {
        Reading {
            watt,
            current: 0.0,
            voltage: 0.0,
            power_on: true,
            connected: true,
            timestamp: at(secs),
        }
    }

    fn store_of(secs: &[i64]) -> ReadingStore {
        ReadingStore::from_readings(secs.iter().map(|s| reading(*s, *s as f64)).collect())
    }

    fn stamps(readings: &[Reading]) -> Vec<i64> {
        readings.iter().map(|r| r.timestamp.timestamp()).collect()
    }

    #[test]
    fn test_range_names() {
        assert_eq!(TimeRange::parse(Some("hour")), TimeRange::Hour);
        assert_eq!(TimeRange::parse(Some("6hour")), TimeRange::SixHours);
        assert_eq!(TimeRange::parse(Some("24hour")), TimeRange::Day);
        assert_eq!(TimeRange::parse(Some("week")), TimeRange::Week);
        assert_eq!(TimeRange::parse(Some("month")), TimeRange::Month);
        assert_eq!(TimeRange::parse(Some("year")), TimeRange::Year);
        assert_eq!(TimeRange::parse(Some("custom")), TimeRange::Custom);
        assert_eq!(TimeRange::parse(Some("fortnight")), TimeRange::All);
        assert_eq!(TimeRange::parse(None), TimeRange::All);
    }

    #[test]
    fn test_named_window_is_anchored_at_now() {
        let now = at(100_000);
        let window = RangeQuery::named("6hour").window(now).unwrap();
        assert_eq!(window.from, at(100_000 - 6 * 3600));
        assert_eq!(window.to, now);
    }

    #[test]
    fn test_custom_bounds_are_inclusive() {
        let store = store_of(&[10, 20, 30, 40, 50]);
        let query = RangeQuery::custom(Some(at(20)), Some(at(40)));
        assert_eq!(stamps(&store.query(&query, at(1000))), vec![20, 30, 40]);
    }

    #[test]
    fn test_custom_defaults_to_epoch_and_now() {
        let store = store_of(&[0, 500, 2000]);
        let query = RangeQuery {
            range: Some("custom".to_string()),
            start: None,
            end: None,
        };
        assert_eq!(stamps(&store.query(&query, at(1000))), vec![0, 500]);
    }

    #[test]
    fn test_custom_empty_window() {
        let store = store_of(&[10, 20]);
        let query = RangeQuery::custom(Some(at(11)), Some(at(19)));
        assert!(store.query(&query, at(1000)).is_empty());
    }

    fn custom(start: Option<&str>, end: Option<&str>) -> RangeQuery {
        RangeQuery {
            range: Some("custom".to_string()),
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        }
    }

    #[test]
    fn test_unrecognized_bound_selects_nothing() {
        let store = store_of(&[10, 20]);
        let query = custom(Some("yesterday"), Some("1970-01-01T00:00:15Z"));
        assert!(store.query(&query, at(1000)).is_empty());
        assert_eq!(
            query.window(at(1000)),
            Err(InvalidInstant("yesterday".to_string()))
        );

        let query = custom(None, Some("15/01/1970"));
        assert!(store.query(&query, at(1000)).is_empty());
    }

    #[test]
    fn test_blank_bound_counts_as_absent() {
        let store = store_of(&[10, 20]);
        let query = custom(Some(" "), Some(""));
        assert_eq!(stamps(&store.query(&query, at(1000))), vec![10, 20]);
    }

    #[test]
    fn test_datetime_without_offset_is_utc() {
        let day = 86_400;
        let store = store_of(&[0, 10 * day, 20 * day]);

        let query = custom(Some("1970-01-15T00:00"), None);
        assert_eq!(stamps(&store.query(&query, at(30 * day))), vec![20 * day]);

        let query = custom(Some("1970-01-11 00:01"), Some("1970-01-21T00:00:00.000"));
        assert_eq!(stamps(&store.query(&query, at(30 * day))), vec![20 * day]);
    }

    #[test]
    fn test_bare_dates_cover_whole_days() {
        let day = 86_400;
        let store = store_of(&[day - 1, day, 2 * day - 1, 2 * day]);
        let query = custom(Some("1970-01-02"), Some("1970-01-02"));
        assert_eq!(stamps(&store.query(&query, at(10 * day))), vec![day, 2 * day - 1]);
    }

    #[test]
    fn test_epoch_millisecond_bounds() {
        let store = store_of(&[10, 20, 30]);
        let query = custom(Some("15000"), Some("30000"));
        assert_eq!(stamps(&store.query(&query, at(1000))), vec![20, 30]);
    }

    #[test]
    fn test_query_sorts_regardless_of_storage_order() {
        let store = store_of(&[30, 10, 20]);
        let result = store.query(&RangeQuery::named("anything"), at(1000));
        assert_eq!(stamps(&result), vec![10, 20, 30]);
        // storage order is untouched
        assert_eq!(stamps(store.readings()), vec![30, 10, 20]);
    }

    #[test]
    fn test_hour_range_excludes_older_readings() {
        let now = at(10_000);
        let store = store_of(&[10_000 - 3601, 10_000 - 3600, 9_999]);
        let result = store.query(&RangeQuery::named("hour"), now);
        assert_eq!(stamps(&result), vec![10_000 - 3600, 9_999]);
    }

    #[test]
    fn test_future_readings_outside_named_window() {
        let store = store_of(&[5, 5000]);
        let result = store.query(&RangeQuery::named("week"), at(1000));
        assert_eq!(stamps(&result), vec![5]);
    }
}
