//! Measurement submissions.
//!
//! A meter data message names one connection, a list of connections, or
//! several groups of connections, each with a list of values spread evenly
//! over `[start, start + duration)`. Every value is stored for every
//! connection of its group, stamped with the submission's horizon and data
//! source. Re-submitting the same slot overwrites the stored value.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::IngestError,
    models::IsoDuration,
    timeseries::{entity_id, TableSpec},
};

/// The only unit accepted for power values.
pub const POWER_UNIT: &str = "MW";

/// Rows per INSERT statement; keeps bind parameters well below the Postgres limit.
const INSERT_CHUNK: usize = 1000;

// ---

/// One name or a list of names; both spellings occur in submitted groups.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(name) => vec![name],
            OneOrMany::Many(names) => names,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionGroup {
    #[serde(alias = "connection")]
    pub connections: OneOrMany,
    pub values: Vec<f64>,
}

/// Connections sharing one list of values, after normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub connections: Vec<String>,
    pub values: Vec<f64>,
}

/// Body of `POST /api/meter-data`.
#[derive(Debug, Clone, Deserialize)]
pub struct MeterDataMessage {
    // ---
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub connections: Option<Vec<String>>,
    #[serde(default)]
    pub values: Option<Vec<f64>>,
    #[serde(default)]
    pub groups: Option<Vec<ConnectionGroup>>,

    pub start: DateTime<Utc>,
    pub duration: IsoDuration,
    pub unit: String,

    /// Defaults to `-PT15M`, a measurement right after the fact.
    #[serde(default)]
    pub horizon: Option<IsoDuration>,

    /// Data source label; the configured default when absent.
    #[serde(default)]
    pub source: Option<String>,
}

impl MeterDataMessage {
    // ---
    /// Normalise the three message shapes into groups.
    pub fn groups(&self) -> Result<Vec<Group>, IngestError> {
        // ---
        let groups: Vec<Group> = match &self.groups {
            Some(groups) => groups
                .iter()
                .cloned()
                .map(|g| Group {
                    connections: g.connections.into_vec(),
                    values: g.values,
                })
                .collect(),
            None => {
                let mut connections: Vec<String> = self.connection.iter().cloned().collect();
                connections.extend(self.connections.iter().flatten().cloned());
                if connections.is_empty() {
                    return Err(IngestError::NoConnections);
                }
                let values = self
                    .values
                    .clone()
                    .ok_or_else(|| IngestError::NoValues(connections.join(", ")))?;
                vec![Group {
                    connections,
                    values,
                }]
            }
        };

        if groups.is_empty() || groups.iter().any(|g| g.connections.is_empty()) {
            return Err(IngestError::NoConnections);
        }
        if let Some(g) = groups.iter().find(|g| g.values.is_empty()) {
            return Err(IngestError::NoValues(g.connections.join(", ")));
        }
        Ok(groups)
    }

    /// Number of connections named in the message, summed over its groups.
    pub fn connection_count(&self) -> usize {
        self.groups()
            .map(|groups| groups.iter().map(|g| g.connections.len()).sum())
            .unwrap_or(0)
    }

    pub fn validate_unit(&self) -> Result<(), IngestError> {
        if self.unit == POWER_UNIT {
            Ok(())
        } else {
            Err(IngestError::InvalidUnit(self.unit.clone()))
        }
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
            .map(Duration::from)
            .unwrap_or_else(|| Duration::minutes(-15))
    }
}

/// Body of `POST /api/{kind}/data`: values for a single entity.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeSeriesSubmission {
    // ---
    pub name: String,
    pub start: DateTime<Utc>,
    pub duration: IsoDuration,
    pub values: Vec<f64>,
    #[serde(default)]
    pub horizon: Option<IsoDuration>,
    #[serde(default)]
    pub source: Option<String>,
}

impl TimeSeriesSubmission {
    pub fn group(&self) -> Group {
        Group {
            connections: vec![self.name.clone()],
            values: self.values.clone(),
        }
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
            .map(Duration::from)
            .unwrap_or_else(|| Duration::minutes(-15))
    }
}

/// Outcome of a stored submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub connections: usize,
    pub observations: u64,
    pub source: Uuid,
}

// ---

/// Event times for `values` spread evenly over `duration` from `start`.
pub fn spread_values(
    start: DateTime<Utc>,
    duration: Duration,
    values: &[f64],
) -> Result<Vec<(DateTime<Utc>, f64)>, IngestError> {
    // ---
    if values.is_empty() {
        return Err(IngestError::NoValues("submission".to_string()));
    }
    let total = duration.num_milliseconds();
    let n = values.len() as i64;
    if total <= 0 {
        return Err(IngestError::InvalidDuration(format!(
            "{} is not positive",
            IsoDuration(duration)
        )));
    }
    if total % n != 0 {
        return Err(IngestError::InvalidDuration(format!(
            "{} cannot be split evenly over {} values",
            IsoDuration(duration),
            n
        )));
    }

    let out_of_range = || {
        IngestError::InvalidDuration(format!(
            "{} from {} leaves the supported time range",
            IsoDuration(duration),
            start
        ))
    };

    let step = total / n;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let offset = i64::try_from(i)
                .ok()
                .and_then(|i| step.checked_mul(i))
                .and_then(Duration::try_milliseconds)
                .ok_or_else(out_of_range)?;
            let t = start.checked_add_signed(offset).ok_or_else(out_of_range)?;
            Ok((t, *v))
        })
        .collect()
}

/// Store `groups` in the observation table of `spec`, all or nothing.
///
/// Every connection must exist; unknown names fail with
/// [`IngestError::NotFound`] before anything is written.
pub async fn store_groups(
    pool: &PgPool,
    spec: &TableSpec,
    groups: &[Group],
    start: DateTime<Utc>,
    duration: Duration,
    horizon: Duration,
    source_label: &str,
) -> Result<IngestSummary, IngestError> {
    // ---
    let mut tx = pool.begin().await?;
    let source = resolve_source(&mut tx, source_label).await?;

    let mut targets = Vec::new();
    for group in groups {
        let points = spread_values(start, duration, &group.values)?;
        for name in &group.connections {
            let id = entity_id(&mut tx, spec, name)
                .await?
                .ok_or_else(|| IngestError::NotFound(name.clone()))?;
            targets.push((id, points.clone()));
        }
    }

    let mut observations = 0;
    for (id, points) in &targets {
        observations += upsert_observations(&mut tx, spec, *id, source, horizon, points).await?;
    }
    tx.commit().await?;

    info!(
        "Stored {} {} observations for {} entities from source '{}'",
        observations,
        spec.kind,
        targets.len(),
        source_label
    );
    Ok(IngestSummary {
        connections: targets.len(),
        observations,
        source,
    })
}

/// Id of the data source labelled `label`, created on first use.
pub async fn resolve_source(conn: &mut PgConnection, label: &str) -> Result<Uuid, sqlx::Error> {
    // ---
    sqlx::query_scalar(
        r#"
        INSERT INTO data_sources (id, label) VALUES ($1, $2)
        ON CONFLICT (label) DO UPDATE SET label = EXCLUDED.label
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(label)
    .fetch_one(&mut *conn)
    .await
}

async fn upsert_observations(
    conn: &mut PgConnection,
    spec: &TableSpec,
    entity: i32,
    source: Uuid,
    horizon: Duration,
    points: &[(DateTime<Utc>, f64)],
) -> Result<u64, sqlx::Error> {
    // ---
    let mut stored = 0;
    for chunk in points.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}, datetime, horizon, value, data_source_id) ",
            spec.observation_table, spec.entity_column
        ));
        qb.push_values(chunk, |mut row, (t, v)| {
            row.push_bind(entity)
                .push_bind(*t)
                .push_bind(horizon)
                .push_bind(*v)
                .push_bind(source);
        });
        qb.push(format!(
            " ON CONFLICT ({}, datetime, horizon, data_source_id) DO UPDATE SET value = EXCLUDED.value",
            spec.entity_column
        ));

        let result = qb.build().execute(&mut *conn).await?;
        debug!("Upserted {} rows into {}", result.rows_affected(), spec.observation_table);
        stored += result.rows_affected();
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn post_meter_data() -> serde_json::Value {
        json!({
            "type": "PostMeterDataRequest",
            "groups": [
                {
                    "connections": ["CS 1", "CS 2"],
                    "values": [306.66, 306.66, 0, 0, 306.66, 306.66]
                },
                {"connection": ["CS 3"], "values": [306.66, 0, 0, 0, 306.66, 306.66]}
            ],
            "start": "2015-01-01T00:00:00Z",
            "duration": "PT1H30M",
            "unit": "MW"
        })
    }

    fn parse(value: serde_json::Value) -> MeterDataMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_groups_message() {
        // ---
        let message = parse(post_meter_data());
        let groups = message.groups().unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].connections, vec!["CS 1", "CS 2"]);
        assert_eq!(groups[1].connections, vec!["CS 3"]);
        assert_eq!(message.connection_count(), 3);
        assert_eq!(message.duration, IsoDuration(Duration::minutes(90)));
        assert!(message.validate_unit().is_ok());
    }

    #[test]
    fn test_single_connection_message() {
        // ---
        let mut value = post_meter_data();
        value["connection"] = json!("CS 1");
        value["values"] = json!([306.66, 0, 0, 0, 306.66, 306.66]);
        value.as_object_mut().unwrap().remove("groups");
        let message = parse(value);

        let groups = message.groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].connections, vec!["CS 1"]);
        assert_eq!(message.connection_count(), 1);
    }

    #[test]
    fn test_single_connection_group_message() {
        // ---
        let mut value = post_meter_data();
        value["connections"] = json!(["CS 1", "CS 2"]);
        value["values"] = json!([306.66, 306.66, 0, 0, 306.66, 306.66]);
        value.as_object_mut().unwrap().remove("groups");

        assert_eq!(parse(value).connection_count(), 2);
    }

    #[test]
    fn test_message_without_connections() {
        // ---
        let mut value = post_meter_data();
        value.as_object_mut().unwrap().remove("groups");
        let message = parse(value);

        assert!(matches!(message.groups(), Err(IngestError::NoConnections)));
        assert_eq!(message.connection_count(), 0);
    }

    #[test]
    fn test_invalid_unit_and_default_horizon() {
        // ---
        let mut value = post_meter_data();
        value["unit"] = json!("MW/h");
        let message = parse(value);

        assert!(matches!(message.validate_unit(), Err(IngestError::InvalidUnit(u)) if u == "MW/h"));
        assert_eq!(message.horizon(), Duration::minutes(-15));

        let mut value = post_meter_data();
        value["horizon"] = json!("PT6H");
        assert_eq!(parse(value).horizon(), Duration::hours(6));
    }

    #[test]
    fn test_spread_values_over_duration() {
        // ---
        let start = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();
        let values = [306.66, 306.66, 0.0, 0.0, 306.66, 306.66];
        let points = spread_values(start, Duration::minutes(90), &values).unwrap();

        assert_eq!(points.len(), 6);
        assert_eq!(points[0], (start, 306.66));
        assert_eq!(points[1].0, start + Duration::minutes(15));
        assert_eq!(points[5].0, Utc.with_ymd_and_hms(2015, 1, 1, 1, 15, 0).unwrap());
    }

    #[test]
    fn test_spread_values_rejects_bad_input() {
        // ---
        let start = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();

        assert!(matches!(
            spread_values(start, Duration::minutes(90), &[]),
            Err(IngestError::NoValues(_))
        ));
        assert!(matches!(
            spread_values(start, Duration::milliseconds(10), &[1.0, 2.0, 3.0]),
            Err(IngestError::InvalidDuration(_))
        ));
        assert!(matches!(
            spread_values(start, Duration::minutes(-15), &[1.0]),
            Err(IngestError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_spread_values_past_time_range_is_invalid() {
        // ---
        let start = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();
        let duration: IsoDuration = "P200000000D".parse().unwrap();

        assert!(matches!(
            spread_values(start, duration.as_duration(), &[1.0, 2.0]),
            Err(IngestError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_submission_becomes_single_group() {
        // ---
        let submission: TimeSeriesSubmission = serde_json::from_value(json!({
            "name": "EPEX day-ahead",
            "start": "2015-01-01T00:00:00Z",
            "duration": "PT2H",
            "values": [52.1, 48.3],
            "horizon": "PT24H"
        }))
        .unwrap();

        assert_eq!(
            submission.group(),
            Group {
                connections: vec!["EPEX day-ahead".to_string()],
                values: vec![52.1, 48.3],
            }
        );
        assert_eq!(submission.horizon(), Duration::hours(24));
    }
}
