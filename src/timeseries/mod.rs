//! Time series collection: query building per entity kind, the kind
//! registry, the aggregation table and the collector that ties them together.

mod collect;
mod query;
mod registry;
mod table;

pub use collect::{CollectParams, Collected, Collector, PgSource};
pub use query::{entity_id, TableSpec, TimedValue};
pub use registry::{Registry, POWER};
