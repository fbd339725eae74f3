//! In-memory time-indexed table produced by the collector.
//!
//! A [`TimeSeries`] maps event times to values, ordered by time. Missing data
//! inside a filled span is represented by `NaN`, which serializes as `null`.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{ser::SerializeSeq, Serialize, Serializer};

use crate::{
    error::CollectError,
    models::{IsoDuration, Observation, QueryWindow},
};

// ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    points: BTreeMap<DateTime<Utc>, f64>,
}

impl TimeSeries {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (DateTime<Utc>, f64)>,
    {
        Self {
            points: points.into_iter().collect(),
        }
    }

    /// Build a table from raw observations.
    ///
    /// Observations sharing an event time (different horizons or sources) are
    /// averaged into one value.
    pub fn from_observations(observations: &[Observation]) -> Self {
        // ---
        let mut acc: BTreeMap<DateTime<Utc>, (f64, u32)> = BTreeMap::new();
        for obs in observations {
            let entry = acc.entry(obs.event_time).or_insert((0.0, 0));
            entry.0 += obs.value;
            entry.1 += 1;
        }

        Self::from_points(acc.into_iter().map(|(t, (sum, n))| (t, sum / n as f64)))
    }

    /// A span of `NaN` values covering `window` at `resolution`.
    ///
    /// Slots are aligned to the Unix epoch. An unbounded window yields an
    /// empty table. Fails when the span holds more than `max_slots` slots or
    /// a slot falls outside the representable time range.
    pub fn empty_span(window: &QueryWindow, resolution: Duration, max_slots: u32) -> Result<Self, CollectError> {
        // ---
        let (Some(start), Some(end)) = (window.start, window.end) else {
            return Ok(Self::new());
        };
        check_span(window, resolution, max_slots)?;

        let out_of_range = || {
            CollectError::InvalidResolution(format!(
                "{} steps outside the supported time range",
                IsoDuration(resolution)
            ))
        };

        let mut t = floor_to(start, resolution).ok_or_else(out_of_range)?;
        if t < start {
            t = t.checked_add_signed(resolution).ok_or_else(out_of_range)?;
        }

        let mut points = BTreeMap::new();
        while t < end {
            points.insert(t, f64::NAN);
            t = t.checked_add_signed(resolution).ok_or_else(out_of_range)?;
        }
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, t: &DateTime<Utc>) -> Option<f64> {
        self.points.get(t).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DateTime<Utc>, &f64)> {
        self.points.iter()
    }

    /// Smallest positive step between consecutive timestamps.
    pub fn native_resolution(&self) -> Option<Duration> {
        // ---
        self.points
            .keys()
            .zip(self.points.keys().skip(1))
            .map(|(a, b)| *b - *a)
            .min()
    }

    /// Mean-resample into epoch-aligned buckets of `resolution`.
    ///
    /// `NaN` values are skipped; a bucket holding only `NaN` stays `NaN`.
    pub fn resample(&self, resolution: Duration) -> Self {
        // ---
        if resolution <= Duration::zero() {
            return self.clone();
        }

        let mut buckets: BTreeMap<DateTime<Utc>, (f64, u32)> = BTreeMap::new();
        for (t, v) in &self.points {
            let Some(bucket) = floor_to(*t, resolution) else {
                continue;
            };
            let entry = buckets.entry(bucket).or_insert((0.0, 0));
            if !v.is_nan() {
                entry.0 += v;
                entry.1 += 1;
            }
        }

        Self::from_points(buckets.into_iter().map(|(t, (sum, n))| {
            let value = if n == 0 { f64::NAN } else { sum / n as f64 };
            (t, value)
        }))
    }

    /// Element-wise sum aligned by timestamp over the union of both indexes.
    ///
    /// A point missing (or `NaN`) on one side counts as zero; a point missing
    /// on both sides stays `NaN`.
    pub fn add_aligned(&self, other: &TimeSeries) -> Self {
        // ---
        let mut points = self.points.clone();
        for (t, v) in &other.points {
            points
                .entry(*t)
                .and_modify(|mine| *mine = add_present(*mine, *v))
                .or_insert(*v);
        }
        Self { points }
    }

    /// Replace every `NaN` with `0.0`.
    pub fn zero_nan(&mut self) {
        for v in self.points.values_mut() {
            if v.is_nan() {
                *v = 0.0;
            }
        }
    }
}

fn add_present(a: f64, b: f64) -> f64 {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => f64::NAN,
        (true, false) => b,
        (false, true) => a,
        (false, false) => a + b,
    }
}

/// Number of slots a filled span of `window` at `resolution` holds.
///
/// Unbounded windows hold none. Fails when `resolution` is not positive or
/// the count exceeds `max_slots`.
pub fn check_span(window: &QueryWindow, resolution: Duration, max_slots: u32) -> Result<i64, CollectError> {
    // ---
    let step = resolution.num_milliseconds();
    if step <= 0 {
        return Err(CollectError::InvalidResolution(format!(
            "{} is not positive",
            IsoDuration(resolution)
        )));
    }
    let (Some(start), Some(end)) = (window.start, window.end) else {
        return Ok(0);
    };

    let span = (end - start).num_milliseconds().max(0);
    let slots = span / step + i64::from(span % step != 0);
    if slots > i64::from(max_slots) {
        return Err(CollectError::SpanTooLarge {
            slots,
            resolution: IsoDuration(resolution).to_string(),
            max: max_slots,
        });
    }
    Ok(slots)
}

/// Round `t` down to a multiple of `resolution` since the Unix epoch.
fn floor_to(t: DateTime<Utc>, resolution: Duration) -> Option<DateTime<Utc>> {
    // ---
    let step = resolution.num_milliseconds();
    if step <= 0 {
        return None;
    }
    let ms = t.timestamp_millis();
    DateTime::from_timestamp_millis(ms.div_euclid(step).checked_mul(step)?)
}

// ---

#[derive(Serialize)]
struct Point<'a> {
    datetime: &'a DateTime<Utc>,
    value: Option<f64>,
}

impl Serialize for TimeSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // ---
        let mut seq = serializer.serialize_seq(Some(self.points.len()))?;
        for (datetime, value) in &self.points {
            let value = if value.is_nan() { None } else { Some(*value) };
            seq.serialize_element(&Point { datetime, value })?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 1, 1, h, m, 0).unwrap()
    }

    fn obs(t: DateTime<Utc>, horizon_min: i64, value: f64) -> Observation {
        Observation {
            event_time: t,
            horizon: Duration::minutes(horizon_min),
            value,
            source: Uuid::nil(),
        }
    }

    #[test]
    fn test_observations_sharing_a_time_are_averaged() {
        // ---
        let series = TimeSeries::from_observations(&[
            obs(at(0, 0), -15, 300.0),
            obs(at(0, 0), -60, 310.0),
            obs(at(0, 15), -15, 0.0),
        ]);

        assert_eq!(series.len(), 2);
        assert_eq!(series.get(&at(0, 0)), Some(305.0));
        assert_eq!(series.get(&at(0, 15)), Some(0.0));
    }

    #[test]
    fn test_resample_takes_bucket_mean() {
        // ---
        let series = TimeSeries::from_points([
            (at(0, 0), 1.0),
            (at(0, 15), 3.0),
            (at(0, 30), f64::NAN),
            (at(0, 45), 5.0),
            (at(1, 0), f64::NAN),
        ]);
        let hourly = series.resample(Duration::hours(1));

        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly.get(&at(0, 0)), Some(3.0));
        assert!(hourly.get(&at(1, 0)).unwrap().is_nan());
    }

    #[test]
    fn test_native_resolution() {
        // ---
        let series = TimeSeries::from_points([(at(0, 0), 1.0), (at(0, 15), 1.0), (at(1, 0), 1.0)]);
        assert_eq!(series.native_resolution(), Some(Duration::minutes(15)));

        let single = TimeSeries::from_points([(at(0, 0), 1.0)]);
        assert_eq!(single.native_resolution(), None);
    }

    #[test]
    fn test_add_aligned_treats_missing_as_zero() {
        // ---
        let a = TimeSeries::from_points([(at(0, 0), 1.0), (at(0, 15), 2.0), (at(0, 30), f64::NAN)]);
        let b = TimeSeries::from_points([(at(0, 15), 10.0), (at(0, 30), f64::NAN), (at(0, 45), 4.0)]);
        let sum = a.add_aligned(&b);

        assert_eq!(sum.get(&at(0, 0)), Some(1.0));
        assert_eq!(sum.get(&at(0, 15)), Some(12.0));
        assert!(sum.get(&at(0, 30)).unwrap().is_nan());
        assert_eq!(sum.get(&at(0, 45)), Some(4.0));
    }

    #[test]
    fn test_empty_span_covers_half_open_window() {
        // ---
        let window = QueryWindow::bounded(at(0, 0), at(1, 30));
        let span = TimeSeries::empty_span(&window, Duration::minutes(15), 100).unwrap();

        assert_eq!(span.len(), 6);
        assert!(span.get(&at(0, 0)).unwrap().is_nan());
        assert!(span.get(&at(1, 15)).is_some());
        assert!(span.get(&at(1, 30)).is_none());

        // Misaligned start snaps to the next slot
        let window = QueryWindow::bounded(at(0, 5), at(0, 45));
        let span = TimeSeries::empty_span(&window, Duration::minutes(15), 100).unwrap();
        assert_eq!(span.iter().next().map(|(t, _)| *t), Some(at(0, 15)));
        assert_eq!(span.len(), 2);

        let span = TimeSeries::empty_span(&QueryWindow::unbounded(), Duration::minutes(15), 100).unwrap();
        assert!(span.is_empty());
    }

    #[test]
    fn test_empty_span_rejects_resolution_past_time_range() {
        // ---
        let window = QueryWindow::bounded(at(0, 0), at(1, 30));
        let huge: IsoDuration = "P10000000000D".parse().unwrap();

        let result = TimeSeries::empty_span(&window, huge.as_duration(), 100);
        assert!(matches!(result, Err(CollectError::InvalidResolution(_))));
    }

    #[test]
    fn test_span_slots_are_capped() {
        // ---
        let window = QueryWindow::bounded(at(0, 0), at(1, 30));
        assert_eq!(check_span(&window, Duration::minutes(15), 6).unwrap(), 6);
        assert_eq!(check_span(&window, Duration::minutes(20), 6).unwrap(), 5);
        assert_eq!(check_span(&QueryWindow::unbounded(), Duration::minutes(15), 6).unwrap(), 0);

        let result = check_span(&window, Duration::minutes(15), 5);
        assert!(matches!(result, Err(CollectError::SpanTooLarge { slots: 6, max: 5, .. })));

        // Ten years at millisecond resolution is refused before anything is allocated
        let decade = QueryWindow::bounded(at(0, 0), at(0, 0) + Duration::days(3650));
        let result = TimeSeries::empty_span(&decade, Duration::milliseconds(1), 100_000);
        assert!(matches!(result, Err(CollectError::SpanTooLarge { .. })));

        let result = check_span(&window, Duration::zero(), 6);
        assert!(matches!(result, Err(CollectError::InvalidResolution(_))));
    }

    #[test]
    fn test_zero_nan() {
        // ---
        let mut series = TimeSeries::from_points([(at(0, 0), f64::NAN), (at(0, 15), 2.5)]);
        series.zero_nan();

        assert_eq!(series.get(&at(0, 0)), Some(0.0));
        assert_eq!(series.get(&at(0, 15)), Some(2.5));
    }

    #[test]
    fn test_serializes_nan_as_null() {
        // ---
        let series = TimeSeries::from_points([(at(0, 0), 306.66), (at(0, 15), f64::NAN)]);
        let json = serde_json::to_value(&series).unwrap();

        assert_eq!(json[0]["datetime"], "2015-01-01T00:00:00Z");
        assert_eq!(json[0]["value"], 306.66);
        assert!(json[1]["value"].is_null());
    }
}
