//! Time series collection across named entities.
//!
//! [`Collector::collect`] validates the request, applies the default horizon
//! window, fetches each entity's observations through an
//! [`ObservationSource`], and then either sums the per-entity tables or hands
//! them back individually.
//!
//! Fetching is sequential on the single connection held by the source. The
//! collector never writes.

use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;
use sqlx::PgConnection;
use tracing::debug;

use super::{
    query::{self, TimedValue},
    table::{self, TimeSeries},
};
use crate::{
    error::CollectError,
    models::{HorizonWindow, IsoDuration, Observation, QueryWindow},
};

// ---

/// Read access to the observations of one entity kind.
#[async_trait]
pub trait ObservationSource: Send {
    // ---
    async fn entity_exists(&mut self, name: &str) -> Result<bool, CollectError>;

    async fn fetch(
        &mut self,
        name: &str,
        query_window: &QueryWindow,
        horizon_window: &HorizonWindow,
    ) -> Result<Vec<Observation>, CollectError>;
}

/// [`ObservationSource`] reading from Postgres on an explicitly passed connection.
pub struct PgSource<'c> {
    conn: &'c mut PgConnection,
    query: &'c dyn TimedValue,
}

impl<'c> PgSource<'c> {
    pub fn new(conn: &'c mut PgConnection, query: &'c dyn TimedValue) -> Self {
        Self { conn, query }
    }
}

#[async_trait]
impl<'c> ObservationSource for PgSource<'c> {
    // ---
    async fn entity_exists(&mut self, name: &str) -> Result<bool, CollectError> {
        Ok(query::entity_exists(self.conn, self.query.spec(), name).await?)
    }

    async fn fetch(
        &mut self,
        name: &str,
        query_window: &QueryWindow,
        horizon_window: &HorizonWindow,
    ) -> Result<Vec<Observation>, CollectError> {
        query::fetch_observations(self.conn, self.query, name, query_window, horizon_window).await
    }
}

// ---

/// Options of a [`Collector::collect`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectParams {
    // ---
    pub query_window: QueryWindow,

    /// Both bounds unset means "use the default", `(None, -PT15M)`.
    pub horizon_window: HorizonWindow,

    /// Output sampling interval; values are bucket means.
    pub resolution: Option<Duration>,

    pub sum_multiple: bool,
    pub create_if_empty: bool,
    pub zero_if_nan: bool,
}

impl Default for CollectParams {
    fn default() -> Self {
        Self {
            query_window: QueryWindow::unbounded(),
            horizon_window: HorizonWindow::unbounded(),
            resolution: None,
            sum_multiple: true,
            create_if_empty: false,
            zero_if_nan: false,
        }
    }
}

/// One entity's table in a per-entity result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySeries {
    pub name: String,
    pub values: TimeSeries,
}

/// Result of a collection.
///
/// A single requested entity, or `sum_multiple`, yields `Combined`;
/// otherwise `PerEntity` lists the tables in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collected {
    Combined(TimeSeries),
    PerEntity(Vec<EntitySeries>),
}

impl Collected {
    pub fn combined(&self) -> Option<&TimeSeries> {
        match self {
            Collected::Combined(series) => Some(series),
            Collected::PerEntity(_) => None,
        }
    }

    pub fn per_entity(&self) -> Option<&[EntitySeries]> {
        match self {
            Collected::Combined(_) => None,
            Collected::PerEntity(tables) => Some(tables),
        }
    }
}

// ---

/// Stateless collection orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct Collector {
    /// Slot width used by `create_if_empty` when no resolution is requested.
    default_resolution: Duration,

    /// Upper bound on slots of a `create_if_empty` filler.
    max_span_slots: u32,
}

impl Collector {
    // ---
    pub fn new(default_resolution: Duration, max_span_slots: u32) -> Self {
        Self {
            default_resolution,
            max_span_slots,
        }
    }

    /// Collect the time series of `entity_names` from `source`.
    ///
    /// Windows and resolution are checked before `source` is touched. Every
    /// name must exist (else [`CollectError::NotFound`]); an existing entity
    /// without matching rows is either filled with `NaN` (`create_if_empty`)
    /// or left out. Duplicate names count once.
    pub async fn collect<S>(
        &self,
        source: &mut S,
        entity_names: &[String],
        params: CollectParams,
    ) -> Result<Collected, CollectError>
    where
        S: ObservationSource + ?Sized,
    {
        // ---
        let mut params = params;
        if params.horizon_window.is_unset() {
            params.horizon_window = HorizonWindow::right_after_the_fact();
        }
        self.collect_with_defaults(source, entity_names, params).await
    }

    async fn collect_with_defaults<S>(
        &self,
        source: &mut S,
        entity_names: &[String],
        params: CollectParams,
    ) -> Result<Collected, CollectError>
    where
        S: ObservationSource + ?Sized,
    {
        // ---
        params.query_window.validate()?;
        params.horizon_window.validate()?;
        if let Some(resolution) = params.resolution {
            if resolution <= Duration::zero() {
                return Err(CollectError::InvalidResolution(format!(
                    "{} is not positive",
                    IsoDuration(resolution)
                )));
            }
        }
        if params.create_if_empty {
            let resolution = params.resolution.unwrap_or(self.default_resolution);
            table::check_span(&params.query_window, resolution, self.max_span_slots)?;
        }

        let names = distinct(entity_names);
        if names.is_empty() {
            return Err(CollectError::NoEntities);
        }

        for name in &names {
            if !source.entity_exists(name).await? {
                return Err(CollectError::NotFound(name.to_string()));
            }
        }

        let mut tables: Vec<(&str, Option<TimeSeries>)> = Vec::with_capacity(names.len());
        for name in &names {
            let observations = source
                .fetch(name, &params.query_window, &params.horizon_window)
                .await?;
            debug!(
                "Fetched {} observations for '{}' ({:?}, {:?})",
                observations.len(),
                name,
                params.query_window,
                params.horizon_window
            );
            tables.push((*name, self.entity_table(&observations, &params)));
        }

        let mut collected = if names.len() == 1 || params.sum_multiple {
            let missing = tables.iter().any(|(_, t)| t.is_none());
            let present: Vec<TimeSeries> = tables.into_iter().filter_map(|(_, t)| t).collect();
            let (mut sum, grid) = sum_tables(present, params.resolution);
            if missing && params.create_if_empty {
                let filler = self.filler(&params.query_window, grid)?;
                sum = sum.add_aligned(&filler);
            }
            Collected::Combined(sum)
        } else {
            let mut per_entity = Vec::with_capacity(tables.len());
            for (name, table) in tables {
                let values = match table {
                    Some(values) => values,
                    None if params.create_if_empty => self.filler(&params.query_window, params.resolution)?,
                    None => continue,
                };
                per_entity.push(EntitySeries {
                    name: name.to_string(),
                    values,
                });
            }
            Collected::PerEntity(per_entity)
        };

        if params.zero_if_nan {
            match &mut collected {
                Collected::Combined(series) => series.zero_nan(),
                Collected::PerEntity(tables) => {
                    tables.iter_mut().for_each(|t| t.values.zero_nan())
                }
            }
        }

        Ok(collected)
    }

    /// Table for one entity, or `None` when it has no rows in the windows.
    fn entity_table(&self, observations: &[Observation], params: &CollectParams) -> Option<TimeSeries> {
        // ---
        let mut table = TimeSeries::from_observations(observations);
        if let Some(resolution) = params.resolution {
            table = table.resample(resolution);
        }
        (!table.is_empty()).then_some(table)
    }

    /// `NaN` span over the query window at `resolution`, else the default.
    ///
    /// Sub-millisecond grids inferred from the data fall back to the default.
    fn filler(&self, window: &QueryWindow, resolution: Option<Duration>) -> Result<TimeSeries, CollectError> {
        let resolution = resolution
            .filter(|r| r.num_milliseconds() > 0)
            .unwrap_or(self.default_resolution);
        TimeSeries::empty_span(window, resolution, self.max_span_slots)
    }
}

/// Sum tables aligned by timestamp, returning the sum and the resolution
/// its grid follows, if any.
///
/// Without an explicit resolution, tables whose native resolutions differ
/// are first resampled to the coarsest of them.
fn sum_tables(tables: Vec<TimeSeries>, resolution: Option<Duration>) -> (TimeSeries, Option<Duration>) {
    // ---
    let (tables, grid) = match resolution {
        Some(_) => (tables, resolution),
        None => {
            let natives: Vec<Duration> = tables.iter().filter_map(|t| t.native_resolution()).collect();
            let coarsest = natives.iter().max().copied();
            match coarsest {
                Some(common) if natives.iter().any(|r| *r != common) => {
                    debug!("Aligning {} tables to common resolution {}", tables.len(), IsoDuration(common));
                    (tables.iter().map(|t| t.resample(common)).collect(), coarsest)
                }
                _ => (tables, coarsest),
            }
        }
    };

    let mut tables = tables.into_iter();
    let first = tables.next().unwrap_or_default();
    (tables.fold(first, |acc, t| acc.add_aligned(&t)), grid)
}

/// Names in first-seen order without duplicates.
fn distinct(names: &[String]) -> Vec<&str> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        if !seen.contains(&name.as_str()) {
            seen.push(name.as_str());
        }
    }
    seen
}
