//! Data models for the meter time-series service.
//!
//! Holds the canonical [`Observation`] row shared by every observation table,
//! the query/horizon windows used to select observations, ISO 8601 durations
//! as they travel over the API, and the entity records (assets, generic
//! entities) that observations belong to.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::CollectError;

// ---

/// One stored time series value, either a measurement or a forecast.
///
/// `(event_time, horizon, source)` identifies the row within the observation
/// table of a single entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    // ---
    /// When the measured or forecast phenomenon occurs.
    pub event_time: DateTime<Utc>,

    /// Offset between the moment the value was known and `event_time`.
    /// Negative for measurements recorded after the fact, positive for forecasts.
    pub horizon: Duration,

    pub value: f64,

    /// Data source that produced the value.
    pub source: Uuid,
}

// ---

/// Range of event times to select: start inclusive, end exclusive.
///
/// Either side may be unset, meaning unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl QueryWindow {
    // ---
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn bounded(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(Some(start), Some(end))
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Reject windows whose start lies after their end.
    pub fn validate(&self) -> Result<(), CollectError> {
        // ---
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => Err(CollectError::InvalidWindow(format!(
                "query window starts at {start} which is after its end {end}"
            ))),
            _ => Ok(()),
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| t >= s) && self.end.map_or(true, |e| t < e)
    }
}

/// Range of horizons to select, inclusive on both ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HorizonWindow {
    pub min: Option<Duration>,
    pub max: Option<Duration>,
}

impl HorizonWindow {
    // ---
    pub fn new(min: Option<Duration>, max: Option<Duration>) -> Self {
        Self { min, max }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Measurements known at most 15 minutes after the fact; excludes forecasts.
    pub fn right_after_the_fact() -> Self {
        Self::new(None, Some(Duration::minutes(-15)))
    }

    /// Both bounds unset.
    pub fn is_unset(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn validate(&self) -> Result<(), CollectError> {
        // ---
        match (self.min, self.max) {
            (Some(min), Some(max)) if min > max => Err(CollectError::InvalidWindow(format!(
                "horizon window minimum {} exceeds maximum {}",
                IsoDuration(min),
                IsoDuration(max)
            ))),
            _ => Ok(()),
        }
    }

    pub fn contains(&self, horizon: Duration) -> bool {
        self.min.map_or(true, |m| horizon >= m) && self.max.map_or(true, |m| horizon <= m)
    }
}

// ---

/// Error returned when a string is not a supported ISO 8601 duration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ISO 8601 duration '{input}': {reason}")]
pub struct DurationParseError {
    input: String,
    reason: &'static str,
}

/// Signed ISO 8601 duration such as `PT15M`, `-PT15M` or `P1DT2H`.
///
/// Only components with a fixed length are accepted (weeks, days, hours,
/// minutes, seconds); years and months are rejected. Seconds may carry up to
/// millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoDuration(pub Duration);

impl IsoDuration {
    pub fn minutes(m: i64) -> Self {
        Self(Duration::minutes(m))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<IsoDuration> for Duration {
    fn from(d: IsoDuration) -> Self {
        d.0
    }
}

impl FromStr for IsoDuration {
    type Err = DurationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let fail = |reason| DurationParseError {
            input: s.to_string(),
            reason,
        };

        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let rest = rest.strip_prefix('P').ok_or_else(|| fail("must start with 'P'"))?;

        let mut millis: i64 = 0;
        let mut number = String::new();
        let mut in_time = false;
        let mut components = 0;
        let mut time_components = 0;
        let mut seen: Vec<(bool, char)> = Vec::new();

        for c in rest.chars() {
            match c {
                '0'..='9' | '.' | ',' => number.push(if c == ',' { '.' } else { c }),
                'T' if !in_time && number.is_empty() => in_time = true,
                _ => {
                    if number.is_empty() {
                        return Err(fail("designator without a number"));
                    }
                    if seen.contains(&(in_time, c)) {
                        return Err(fail("repeated designator"));
                    }
                    seen.push((in_time, c));
                    let unit_ms: i64 = match (in_time, c) {
                        (false, 'W') => 7 * 86_400_000,
                        (false, 'D') => 86_400_000,
                        (false, 'Y') | (false, 'M') => {
                            return Err(fail("years and months have no fixed length"))
                        }
                        (true, 'H') => 3_600_000,
                        (true, 'M') => 60_000,
                        (true, 'S') => 1_000,
                        _ => return Err(fail("unknown designator")),
                    };
                    let component = if c == 'S' && in_time {
                        let secs: f64 = number.parse().map_err(|_| fail("bad number"))?;
                        (secs * unit_ms as f64).round() as i64
                    } else {
                        let n: i64 = number.parse().map_err(|_| fail("bad number"))?;
                        n.checked_mul(unit_ms).ok_or_else(|| fail("out of range"))?
                    };
                    millis = millis
                        .checked_add(component)
                        .ok_or_else(|| fail("out of range"))?;
                    number.clear();
                    components += 1;
                    if in_time {
                        time_components += 1;
                    }
                }
            }
        }

        if !number.is_empty() {
            return Err(fail("number without a designator"));
        }
        if components == 0 {
            return Err(fail("no components"));
        }
        if in_time && time_components == 0 {
            return Err(fail("'T' without a time component"));
        }

        let millis = if negative { -millis } else { millis };
        Ok(IsoDuration(Duration::milliseconds(millis)))
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let total = self.0.num_milliseconds();
        if total == 0 {
            return f.write_str("PT0S");
        }
        if total < 0 {
            f.write_str("-")?;
        }
        let mut ms = total.unsigned_abs();

        let days = ms / 86_400_000;
        ms %= 86_400_000;
        let hours = ms / 3_600_000;
        ms %= 3_600_000;
        let minutes = ms / 60_000;
        ms %= 60_000;
        let seconds = ms / 1_000;
        let millis = ms % 1_000;

        f.write_str("P")?;
        if days > 0 {
            write!(f, "{days}D")?;
        }
        if hours + minutes + seconds + millis > 0 {
            f.write_str("T")?;
            if hours > 0 {
                write!(f, "{hours}H")?;
            }
            if minutes > 0 {
                write!(f, "{minutes}M")?;
            }
            match (seconds, millis) {
                (0, 0) => {}
                (s, 0) => write!(f, "{s}S")?,
                (s, m) => write!(f, "{s}.{m:03}S")?,
            }
        }
        Ok(())
    }
}

impl Serialize for IsoDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IsoDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---

/// A named entity of any registered kind (market, weather sensor, ...).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Entity {
    pub id: i32,
    pub name: String,
    pub display_name: String,
}

/// Request body registering a new entity.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEntity {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A power asset, addressed as a "connection" by the meter data API.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Asset {
    // ---
    pub id: i32,
    pub name: String,
    pub display_name: String,
    pub capacity_in_mw: f64,
    pub latitude: f64,
    pub longitude: f64,
}

/// Editable asset attributes. Every field is required.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetForm {
    // ---
    pub display_name: String,
    pub capacity_in_mw: f64,
    pub latitude: f64,
    pub longitude: f64,
}

impl AssetForm {
    /// Returns a message describing the first invalid field, if any.
    pub fn validate(&self) -> Result<(), String> {
        // ---
        if self.display_name.trim().is_empty() {
            return Err("display_name is required".to_string());
        }
        if !self.capacity_in_mw.is_finite() || self.capacity_in_mw < 0.0 {
            return Err("capacity_in_mw must be a non-negative number".to_string());
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err("latitude must lie within [-90, 90]".to_string());
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err("longitude must lie within [-180, 180]".to_string());
        }
        Ok(())
    }
}

/// Request body creating a new asset.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAsset {
    pub name: String,
    #[serde(flatten)]
    pub form: AssetForm,
}
