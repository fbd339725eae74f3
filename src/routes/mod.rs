//! HTTP routes gateway.
//!
//! Each sibling module exposes a subrouter over [`AppState`]; this module
//! merges them so `main.rs` only needs [`router`].

use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;

use crate::{
    error::ApiError,
    timeseries::{Collector, Registry},
    Config,
};

mod assets;
mod health;
mod meter_data;
mod timeseries;

// ---

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub registry: Arc<Registry>,
    pub collector: Collector,
}

pub fn router(pool: PgPool, config: Config, registry: Arc<Registry>) -> Router {
    // ---
    let collector = Collector::new(config.default_resolution.as_duration(), config.max_span_slots);
    let state = AppState {
        pool,
        config,
        registry,
        collector,
    };

    Router::new()
        .merge(timeseries::router())
        .merge(meter_data::router())
        .merge(assets::router())
        .merge(health::router())
        .with_state(state)
}

/// Split a comma-separated list of names, dropping blanks.
fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Entity names of a request, at least one and at most `max`.
fn parse_names(raw: &str, max: u32) -> Result<Vec<String>, ApiError> {
    // ---
    let names = split_names(raw);
    if names.is_empty() {
        return Err(ApiError::BadRequest("at least one entity name is required".to_string()));
    }
    if names.len() > max as usize {
        return Err(ApiError::BadRequest(format!(
            "{} entity names requested, at most {} allowed",
            names.len(),
            max
        )));
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_split_names() {
        // ---
        assert_eq!(split_names("CS 1, CS 2,,CS 3 "), vec!["CS 1", "CS 2", "CS 3"]);
        assert!(split_names(" , ").is_empty());
    }

    #[test]
    fn test_parse_names_enforces_bounds() {
        // ---
        assert_eq!(parse_names("CS 1,CS 2", 2).unwrap().len(), 2);
        assert!(matches!(parse_names("", 2), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_names("CS 1,CS 2,CS 3", 2), Err(ApiError::BadRequest(_))));
    }
}
