//! Query building for observation tables.
//!
//! Every entity kind stores its observations in its own table with the same
//! columns. [`TimedValue`] is the per-kind capability that turns a logical
//! request into an executable SQL query; [`TableQuery`] implements it for any
//! table described by a [`TableSpec`].

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    error::CollectError,
    models::{HorizonWindow, Observation, QueryWindow},
};

// ---

/// Physical layout of one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    // ---
    /// Kind name used in URLs, e.g. `power`.
    pub kind: &'static str,

    /// Table holding the named entities (`id`, `name`, `display_name`, ...).
    pub entity_table: &'static str,

    /// Table holding the observations of those entities.
    pub observation_table: &'static str,

    /// Column in `observation_table` referencing `entity_table.id`.
    pub entity_column: &'static str,
}

/// Capability to build a scoped observation query for one entity kind.
pub trait TimedValue: Send + Sync {
    // ---
    fn spec(&self) -> &TableSpec;

    /// Build a query selecting the observations of `entity_name` whose event
    /// time lies in `[start, end)` and whose horizon lies in `[min, max]`.
    /// Unset bounds are not constrained.
    ///
    /// Kinds that cannot be queried keep this default, which fails with
    /// [`CollectError::NotImplemented`].
    fn make_query<'q>(
        &self,
        entity_name: &'q str,
        query_window: &QueryWindow,
        horizon_window: &HorizonWindow,
    ) -> Result<QueryBuilder<'q, Postgres>, CollectError> {
        let _ = (entity_name, query_window, horizon_window);
        Err(CollectError::NotImplemented(self.spec().kind.to_string()))
    }
}

/// Query builder over a registered observation table.
#[derive(Debug, Clone)]
pub struct TableQuery {
    spec: TableSpec,
}

impl TableQuery {
    pub fn new(spec: TableSpec) -> Self {
        Self { spec }
    }
}

impl TimedValue for TableQuery {
    // ---
    fn spec(&self) -> &TableSpec {
        &self.spec
    }

    fn make_query<'q>(
        &self,
        entity_name: &'q str,
        query_window: &QueryWindow,
        horizon_window: &HorizonWindow,
    ) -> Result<QueryBuilder<'q, Postgres>, CollectError> {
        // ---
        let spec = &self.spec;
        let mut qb = QueryBuilder::new(format!(
            "SELECT o.datetime AS event_time, \
             (EXTRACT(EPOCH FROM o.horizon) * 1000)::BIGINT AS horizon_ms, \
             o.value, o.data_source_id \
             FROM {obs} o JOIN {ent} e ON e.id = o.{col} \
             WHERE e.name = ",
            obs = spec.observation_table,
            ent = spec.entity_table,
            col = spec.entity_column,
        ));
        qb.push_bind(entity_name);

        if let Some(start) = query_window.start {
            qb.push(" AND o.datetime >= ").push_bind(start);
        }
        if let Some(end) = query_window.end {
            qb.push(" AND o.datetime < ").push_bind(end);
        }
        if let Some(min) = horizon_window.min {
            qb.push(" AND o.horizon >= ").push_bind(min);
        }
        if let Some(max) = horizon_window.max {
            qb.push(" AND o.horizon <= ").push_bind(max);
        }
        qb.push(" ORDER BY o.datetime, o.horizon");

        Ok(qb)
    }
}

// ---

/// Row shape returned by [`TimedValue::make_query`] queries.
#[derive(Debug, sqlx::FromRow)]
struct ObservationRow {
    event_time: DateTime<Utc>,
    horizon_ms: i64,
    value: f64,
    data_source_id: Uuid,
}

impl From<ObservationRow> for Observation {
    fn from(row: ObservationRow) -> Self {
        Observation {
            event_time: row.event_time,
            horizon: Duration::milliseconds(row.horizon_ms),
            value: row.value,
            source: row.data_source_id,
        }
    }
}

/// Run the query built by `query` for `entity_name` on `conn`.
pub async fn fetch_observations(
    conn: &mut PgConnection,
    query: &dyn TimedValue,
    entity_name: &str,
    query_window: &QueryWindow,
    horizon_window: &HorizonWindow,
) -> Result<Vec<Observation>, CollectError> {
    // ---
    let mut qb = query.make_query(entity_name, query_window, horizon_window)?;
    let rows: Vec<ObservationRow> = qb.build_query_as().fetch_all(&mut *conn).await?;

    Ok(rows.into_iter().map(Observation::from).collect())
}

/// Whether an entity called `name` exists in the kind's entity table.
pub async fn entity_exists(
    conn: &mut PgConnection,
    spec: &TableSpec,
    name: &str,
) -> Result<bool, sqlx::Error> {
    // ---
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE name = $1)",
        spec.entity_table
    );
    sqlx::query_scalar(&sql).bind(name).fetch_one(&mut *conn).await
}

/// Id of the entity called `name`, if it exists.
pub async fn entity_id(
    conn: &mut PgConnection,
    spec: &TableSpec,
    name: &str,
) -> Result<Option<i32>, sqlx::Error> {
    // ---
    let sql = format!("SELECT id FROM {} WHERE name = $1", spec.entity_table);
    sqlx::query_scalar(&sql)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
}
