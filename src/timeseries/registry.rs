//! Explicit registry of entity kinds and their observation tables.
//!
//! Built once at startup; schema creation and the routes both read from it.

use anyhow::{bail, Result};

use super::query::{TableQuery, TableSpec, TimedValue};

// ---

/// Assets (connections, meters) and their power measurements/forecasts.
pub const POWER: TableSpec = TableSpec {
    kind: "power",
    entity_table: "assets",
    observation_table: "power",
    entity_column: "asset_id",
};

/// Markets and their prices.
pub const PRICE: TableSpec = TableSpec {
    kind: "price",
    entity_table: "markets",
    observation_table: "price",
    entity_column: "market_id",
};

/// Weather sensors and their readings.
pub const WEATHER: TableSpec = TableSpec {
    kind: "weather",
    entity_table: "weather_sensors",
    observation_table: "weather",
    entity_column: "sensor_id",
};

#[derive(Default)]
pub struct Registry {
    kinds: Vec<Box<dyn TimedValue>>,
}

impl Registry {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the power, price and weather kinds.
    pub fn standard() -> Result<Self> {
        // ---
        let mut registry = Self::new();
        for spec in [POWER, PRICE, WEATHER] {
            registry.register(Box::new(TableQuery::new(spec)))?;
        }
        Ok(registry)
    }

    /// Add a kind. Kind names and table names must be unique.
    pub fn register(&mut self, query: Box<dyn TimedValue>) -> Result<()> {
        // ---
        let new = *query.spec();
        for existing in self.iter().map(|q| q.spec()) {
            if existing.kind == new.kind {
                bail!("entity kind '{}' is already registered", new.kind);
            }
            if existing.observation_table == new.observation_table
                || existing.entity_table == new.entity_table
            {
                bail!(
                    "tables of entity kind '{}' collide with kind '{}'",
                    new.kind,
                    existing.kind
                );
            }
        }

        tracing::debug!(
            "Registered entity kind '{}' ({} -> {})",
            new.kind,
            new.entity_table,
            new.observation_table
        );
        self.kinds.push(query);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<&dyn TimedValue> {
        self.iter().find(|q| q.spec().kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn TimedValue> {
        self.kinds.iter().map(|q| q.as_ref())
    }

    pub fn kind_names(&self) -> Vec<&'static str> {
        self.iter().map(|q| q.spec().kind).collect()
    }
}
