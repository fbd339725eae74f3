//! Meter data endpoints addressing power assets as "connections".
//!
//! - `POST /api/meter-data` stores a single-reading or multi-group message.
//! - `GET  /api/meter-data` returns one table per requested connection.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::info;

use super::{parse_names, timeseries::lookup_kind, AppState};
use crate::{
    error::{ApiError, IngestError},
    ingest::{self, IngestSummary, MeterDataMessage, POWER_UNIT},
    models::{IsoDuration, QueryWindow},
    timeseries::{CollectParams, Collected, PgSource, POWER},
};

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/meter-data", get(get_meter_data).post(post_meter_data))
}

async fn post_meter_data(
    State(state): State<AppState>,
    Json(message): Json<MeterDataMessage>,
) -> Result<(StatusCode, Json<IngestSummary>), ApiError> {
    // ---
    info!(
        "POST /api/meter-data - {} connections from {}",
        message.connection_count(),
        message.start
    );

    message.validate_unit()?;
    let groups = message.groups()?;
    let power = lookup_kind(&state, POWER.kind)?;
    let source = message
        .source
        .as_deref()
        .unwrap_or(&state.config.default_source);

    let summary = ingest::store_groups(
        &state.pool,
        power.spec(),
        &groups,
        message.start,
        message.duration.into(),
        message.horizon(),
        source,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

/// Query string of `GET /api/meter-data`.
#[derive(Debug, Deserialize)]
pub struct MeterDataQuery {
    // ---
    /// Comma-separated connection names.
    connections: String,
    start: DateTime<Utc>,
    duration: IsoDuration,
    unit: String,
    resolution: Option<IsoDuration>,
}

impl MeterDataQuery {
    fn params(&self) -> Result<CollectParams, ApiError> {
        // ---
        let duration: Duration = self.duration.into();
        if duration <= Duration::zero() {
            return Err(IngestError::InvalidDuration(format!("{} is not positive", self.duration)).into());
        }

        let end = self.start.checked_add_signed(duration).ok_or_else(|| {
            IngestError::InvalidDuration(format!(
                "{} from {} leaves the supported time range",
                self.duration, self.start
            ))
        })?;

        Ok(CollectParams {
            query_window: QueryWindow::bounded(self.start, end),
            resolution: self.resolution.map(Duration::from),
            sum_multiple: false,
            create_if_empty: true,
            ..Default::default()
        })
    }
}

async fn get_meter_data(
    Query(query): Query<MeterDataQuery>,
    State(state): State<AppState>,
) -> Result<Json<Collected>, ApiError> {
    // ---
    info!("GET /api/meter-data - {:?}", query);

    if query.unit != POWER_UNIT {
        return Err(IngestError::InvalidUnit(query.unit.clone()).into());
    }
    let params = query.params()?;
    let names = parse_names(&query.connections, state.config.max_query_entities)?;
    let power = lookup_kind(&state, POWER.kind)?;

    let mut conn = state.pool.acquire().await?;
    let mut source = PgSource::new(&mut *conn, power);
    let collected = state.collector.collect(&mut source, &names, params).await?;

    Ok(Json(collected))
}
