//! Generic time series endpoints for every registered entity kind.
//!
//! - `GET  /api/{kind}/data`     – collect observations of named entities
//! - `POST /api/{kind}/data`     – store values for one entity
//! - `GET  /api/{kind}/entities` – list entities of a kind
//! - `POST /api/{kind}/entities` – register an entity

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::{parse_names, AppState};
use crate::{
    error::ApiError,
    ingest::{self, IngestSummary, TimeSeriesSubmission},
    models::{Entity, HorizonWindow, IsoDuration, NewEntity, QueryWindow},
    timeseries::{CollectParams, Collected, PgSource, TimedValue},
};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/{kind}/data", get(get_data).post(post_data))
        .route("/api/{kind}/entities", get(list_entities).post(create_entity))
}

/// Query string of `GET /api/{kind}/data`.
#[derive(Debug, Deserialize)]
pub struct DataQuery {
    // ---
    /// Comma-separated entity names.
    names: String,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    horizon_min: Option<IsoDuration>,
    horizon_max: Option<IsoDuration>,
    resolution: Option<IsoDuration>,
    #[serde(default = "default_sum_multiple")]
    sum_multiple: bool,
    #[serde(default)]
    create_if_empty: bool,
    #[serde(default)]
    zero_if_nan: bool,
}

fn default_sum_multiple() -> bool {
    true
}

impl DataQuery {
    fn params(&self) -> CollectParams {
        CollectParams {
            query_window: QueryWindow::new(self.start, self.end),
            horizon_window: HorizonWindow::new(
                self.horizon_min.map(Duration::from),
                self.horizon_max.map(Duration::from),
            ),
            resolution: self.resolution.map(Duration::from),
            sum_multiple: self.sum_multiple,
            create_if_empty: self.create_if_empty,
            zero_if_nan: self.zero_if_nan,
        }
    }
}

/// Look up the registered kind named in the path.
pub(super) fn lookup_kind<'a>(state: &'a AppState, kind: &str) -> Result<&'a dyn TimedValue, ApiError> {
    state
        .registry
        .get(kind)
        .ok_or_else(|| ApiError::NotFound(format!("unknown entity kind '{kind}'")))
}

async fn get_data(
    Path(kind): Path<String>,
    Query(query): Query<DataQuery>,
    State(state): State<AppState>,
) -> Result<Json<Collected>, ApiError> {
    // ---
    info!("GET /api/{}/data - {:?}", kind, query);

    let timed_value = lookup_kind(&state, &kind)?;
    let names = parse_names(&query.names, state.config.max_query_entities)?;

    let mut conn = state.pool.acquire().await?;
    let mut source = PgSource::new(&mut *conn, timed_value);
    let collected = state
        .collector
        .collect(&mut source, &names, query.params())
        .await?;

    debug!("GET /api/{}/data - Returning OK", kind);
    Ok(Json(collected))
}

async fn post_data(
    Path(kind): Path<String>,
    State(state): State<AppState>,
    Json(submission): Json<TimeSeriesSubmission>,
) -> Result<(StatusCode, Json<IngestSummary>), ApiError> {
    // ---
    info!(
        "POST /api/{}/data - {} values for '{}'",
        kind,
        submission.values.len(),
        submission.name
    );

    let timed_value = lookup_kind(&state, &kind)?;
    let source = submission
        .source
        .as_deref()
        .unwrap_or(&state.config.default_source);

    let summary = ingest::store_groups(
        &state.pool,
        timed_value.spec(),
        &[submission.group()],
        submission.start,
        submission.duration.into(),
        submission.horizon(),
        source,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

async fn list_entities(
    Path(kind): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Entity>>, ApiError> {
    // ---
    let spec = lookup_kind(&state, &kind)?.spec();
    let sql = format!(
        "SELECT id, name, display_name FROM {} ORDER BY name",
        spec.entity_table
    );
    let entities = sqlx::query_as::<_, Entity>(&sql)
        .fetch_all(&state.pool)
        .await?;

    info!("GET /api/{}/entities - {} entities", kind, entities.len());
    Ok(Json(entities))
}

async fn create_entity(
    Path(kind): Path<String>,
    State(state): State<AppState>,
    Json(new): Json<NewEntity>,
) -> Result<(StatusCode, Json<Entity>), ApiError> {
    // ---
    info!("POST /api/{}/entities - '{}'", kind, new.name);

    let spec = lookup_kind(&state, &kind)?.spec();
    let name = new.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }
    let display_name = new.display_name.as_deref().unwrap_or(name);

    let sql = format!(
        "INSERT INTO {} (name, display_name) VALUES ($1, $2) RETURNING id, name, display_name",
        spec.entity_table
    );
    let entity = sqlx::query_as::<_, Entity>(&sql)
        .bind(name)
        .bind(display_name)
        .fetch_one(&state.pool)
        .await
        .map_err(|e| ApiError::from_insert(e, name))?;

    Ok((StatusCode::CREATED, Json(entity)))
}
