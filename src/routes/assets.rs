//! Asset management endpoints.
//!
//! Assets are the entities of the `power` kind. Besides their name they carry
//! a display name, a capacity and a location, all editable through `PUT`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::info;

use super::AppState;
use crate::{
    error::ApiError,
    models::{Asset, AssetForm, NewAsset},
};

// ---

const ASSET_COLUMNS: &str = "id, name, display_name, capacity_in_mw, latitude, longitude";

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/assets", get(list_assets).post(create_asset))
        .route("/api/assets/{id}", get(get_asset).put(update_asset))
}

async fn list_assets(State(state): State<AppState>) -> Result<Json<Vec<Asset>>, ApiError> {
    // ---
    let assets = sqlx::query_as::<_, Asset>(&format!(
        "SELECT {ASSET_COLUMNS} FROM assets ORDER BY name"
    ))
    .fetch_all(&state.pool)
    .await?;

    info!("GET /api/assets - {} assets", assets.len());
    Ok(Json(assets))
}

async fn get_asset(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<Json<Asset>, ApiError> {
    // ---
    let asset = sqlx::query_as::<_, Asset>(&format!(
        "SELECT {ASSET_COLUMNS} FROM assets WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("asset {id} not found")))?;

    Ok(Json(asset))
}

async fn create_asset(
    State(state): State<AppState>,
    Json(new): Json<NewAsset>,
) -> Result<(StatusCode, Json<Asset>), ApiError> {
    // ---
    info!("POST /api/assets - '{}'", new.name);

    let name = new.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }
    new.form.validate().map_err(ApiError::BadRequest)?;

    let asset = sqlx::query_as::<_, Asset>(&format!(
        r#"
        INSERT INTO assets (name, display_name, capacity_in_mw, latitude, longitude)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {ASSET_COLUMNS}
        "#
    ))
    .bind(name)
    .bind(&new.form.display_name)
    .bind(new.form.capacity_in_mw)
    .bind(new.form.latitude)
    .bind(new.form.longitude)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| ApiError::from_insert(e, name))?;

    Ok((StatusCode::CREATED, Json(asset)))
}

async fn update_asset(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(form): Json<AssetForm>,
) -> Result<Json<Asset>, ApiError> {
    // ---
    info!("PUT /api/assets/{}", id);

    form.validate().map_err(ApiError::BadRequest)?;

    let asset = sqlx::query_as::<_, Asset>(&format!(
        r#"
        UPDATE assets
           SET display_name = $2, capacity_in_mw = $3, latitude = $4, longitude = $5
         WHERE id = $1
        RETURNING {ASSET_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&form.display_name)
    .bind(form.capacity_in_mw)
    .bind(form.latitude)
    .bind(form.longitude)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("asset {id} not found")))?;

    info!("Asset {} updated", id);
    Ok(Json(asset))
}
