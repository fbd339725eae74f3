//! Database schema management for `codemetal-meterflow`.
//!
//! Ensures the data source table, one entity table and one observation table
//! per registered entity kind, and the asset attributes exist before serving
//! requests. Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

use crate::timeseries::{Registry, TableSpec, POWER};

// ---

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist. Errors are
/// propagated if any SQL execution fails, and nothing is committed then.
pub async fn create_schema(pool: &PgPool, registry: &Registry) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_sources (
            id    UUID PRIMARY KEY,
            label TEXT NOT NULL UNIQUE
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    for query in registry.iter() {
        let spec = query.spec();
        tracing::debug!("Ensuring tables for entity kind '{}'", spec.kind);

        sqlx::query(&entity_table_ddl(spec)).execute(&mut *tx).await?;
        sqlx::query(&observation_table_ddl(spec))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&observation_index_ddl(spec))
            .execute(&mut *tx)
            .await?;
    }

    // Assets carry attributes edited through the asset endpoints
    if registry.get(POWER.kind).is_some() {
        sqlx::query(
            r#"
            ALTER TABLE assets
                ADD COLUMN IF NOT EXISTS capacity_in_mw DOUBLE PRECISION NOT NULL DEFAULT 0,
                ADD COLUMN IF NOT EXISTS latitude       DOUBLE PRECISION NOT NULL DEFAULT 0,
                ADD COLUMN IF NOT EXISTS longitude      DOUBLE PRECISION NOT NULL DEFAULT 0;
            "#,
        )
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

fn entity_table_ddl(spec: &TableSpec) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id           SERIAL PRIMARY KEY,
            name         TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL DEFAULT ''
        );
        "#,
        table = spec.entity_table
    )
}

/// Observation table of one kind; `(entity, datetime, horizon, source)` is the key.
fn observation_table_ddl(spec: &TableSpec) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            {col}          INTEGER          NOT NULL REFERENCES {entities} (id) ON DELETE CASCADE,
            datetime       TIMESTAMPTZ      NOT NULL,
            horizon        INTERVAL         NOT NULL,
            value          DOUBLE PRECISION NOT NULL,
            data_source_id UUID             NOT NULL REFERENCES data_sources (id),
            PRIMARY KEY ({col}, datetime, horizon, data_source_id)
        );
        "#,
        table = spec.observation_table,
        col = spec.entity_column,
        entities = spec.entity_table,
    )
}

fn observation_index_ddl(spec: &TableSpec) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_datetime ON {table} (datetime);",
        table = spec.observation_table
    )
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_observation_table_is_keyed_by_time_horizon_and_source() {
        // ---
        let ddl = observation_table_ddl(&POWER);

        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS power"));
        assert!(ddl.contains("REFERENCES assets (id) ON DELETE CASCADE"));
        assert!(ddl.contains("PRIMARY KEY (asset_id, datetime, horizon, data_source_id)"));
    }

    #[test]
    fn test_every_registered_kind_gets_its_own_tables() {
        // ---
        let registry = Registry::standard().unwrap();
        let ddl: Vec<String> = registry
            .iter()
            .map(|q| entity_table_ddl(q.spec()) + &observation_table_ddl(q.spec()))
            .collect();

        assert!(ddl[1].contains("CREATE TABLE IF NOT EXISTS markets"));
        assert!(ddl[1].contains("CREATE TABLE IF NOT EXISTS price"));
        assert!(ddl[2].contains("CREATE TABLE IF NOT EXISTS weather_sensors"));
        assert!(ddl[2].contains("sensor_id"));
        assert_eq!(
            observation_index_ddl(registry.get("weather").unwrap().spec()),
            "CREATE INDEX IF NOT EXISTS idx_weather_datetime ON weather (datetime);"
        );
    }
}
