//! Live-server tests. Start the service (and its database) first, then run
//! with `BASE_URL` pointing at it (default `http://localhost:8080`).

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct Asset {
    id: i32,
    name: String,
    display_name: String,
    capacity_in_mw: f64,
}

#[derive(Debug, Deserialize)]
struct IngestSummary {
    connections: usize,
    observations: u64,
}

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into())
}

/// Asset names are unique per run so tests can be repeated against one database.
fn unique_name(prefix: &str) -> String {
    format!("{} {}", prefix, uuid::Uuid::new_v4().simple())
}

async fn create_asset(client: &Client, name: &str) -> Result<Asset> {
    // ---
    let response = client
        .post(format!("{}/api/assets", base_url()))
        .json(&json!({
            "name": name,
            "display_name": name,
            "capacity_in_mw": 0.5,
            "latitude": 52.37,
            "longitude": 4.89
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    Ok(response.json().await?)
}

#[tokio::test]
async fn health_endpoints_respond() -> Result<()> {
    // ---
    let client = Client::new();

    let body: Value = client
        .get(format!("{}/health", base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["status"], "ok");

    let body: Value = client
        .get(format!("{}/health/db", base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["kinds"], json!(["power", "price", "weather"]));

    Ok(())
}

#[tokio::test]
async fn posted_meter_data_is_collected() -> Result<()> {
    // ---
    let client = Client::new();
    let cs1 = unique_name("CS 1");
    let cs2 = unique_name("CS 2");
    create_asset(&client, &cs1).await?;
    create_asset(&client, &cs2).await?;

    let response = client
        .post(format!("{}/api/meter-data", base_url()))
        .json(&json!({
            "type": "PostMeterDataRequest",
            "groups": [
                {"connection": [&cs1], "values": [306.66, 0, 0, 0, 306.66, 306.66]},
                {"connections": [&cs2], "values": [306.66, 306.66, 0, 0, 306.66, 306.66]}
            ],
            "start": "2015-01-01T00:00:00Z",
            "duration": "PT1H30M",
            "unit": "MW"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let summary: IngestSummary = response.json().await?;
    assert_eq!(summary.connections, 2);
    assert_eq!(summary.observations, 12);

    // One connection, one slot
    let body: Value = client
        .get(format!("{}/api/power/data", base_url()))
        .query(&[
            ("names", cs1.as_str()),
            ("start", "2015-01-01T00:00:00Z"),
            ("end", "2015-01-01T00:15:00Z"),
        ])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(
        body["combined"],
        json!([{"datetime": "2015-01-01T00:00:00Z", "value": 306.66}])
    );

    // Both connections summed per slot
    let names = format!("{cs1},{cs2}");
    let body: Value = client
        .get(format!("{}/api/power/data", base_url()))
        .query(&[
            ("names", names.as_str()),
            ("start", "2015-01-01T00:00:00Z"),
            ("end", "2015-01-01T01:30:00Z"),
        ])
        .send()
        .await?
        .json()
        .await?;
    let combined = body["combined"].as_array().expect("combined table");
    assert_eq!(combined.len(), 6);
    assert_eq!(combined[1]["value"], json!(306.66));

    // Per connection through the meter data API
    let body: Value = client
        .get(format!("{}/api/meter-data", base_url()))
        .query(&[
            ("connections", names.as_str()),
            ("start", "2015-01-01T00:00:00Z"),
            ("duration", "PT1H30M"),
            ("unit", "MW"),
        ])
        .send()
        .await?
        .json()
        .await?;
    let tables = body["per_entity"].as_array().expect("per entity tables");
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0]["name"], json!(&cs1));
    assert_eq!(tables[1]["name"], json!(&cs2));

    Ok(())
}

#[tokio::test]
async fn forecasts_are_excluded_by_default() -> Result<()> {
    // ---
    let client = Client::new();
    let name = unique_name("CS forecast");
    create_asset(&client, &name).await?;

    let response = client
        .post(format!("{}/api/power/data", base_url()))
        .json(&json!({
            "name": &name,
            "start": "2015-01-01T00:00:00Z",
            "duration": "PT30M",
            "values": [1.0, 2.0],
            "horizon": "PT6H",
            "source": "forecaster"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = client
        .get(format!("{}/api/power/data", base_url()))
        .query(&[("names", name.as_str())])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["combined"], json!([]));

    let body: Value = client
        .get(format!("{}/api/power/data", base_url()))
        .query(&[("names", name.as_str()), ("horizon_min", "PT0S")])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["combined"].as_array().map(Vec::len), Some(2));

    Ok(())
}

#[tokio::test]
async fn invalid_requests_are_rejected() -> Result<()> {
    // ---
    let client = Client::new();
    let name = unique_name("CS invalid");
    create_asset(&client, &name).await?;

    // Inverted query window
    let response = client
        .get(format!("{}/api/power/data", base_url()))
        .query(&[
            ("names", name.as_str()),
            ("start", "2015-01-01T01:30:00Z"),
            ("end", "2015-01-01T00:00:00Z"),
        ])
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "INVALID_WINDOW");

    // Unknown entity
    let response = client
        .get(format!("{}/api/power/data", base_url()))
        .query(&[("names", "does-not-exist")])
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Unknown kind
    let response = client
        .get(format!("{}/api/gas/data", base_url()))
        .query(&[("names", name.as_str())])
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Invalid unit
    let response = client
        .post(format!("{}/api/meter-data", base_url()))
        .json(&json!({
            "connection": &name,
            "values": [1.0],
            "start": "2015-01-01T00:00:00Z",
            "duration": "PT15M",
            "unit": "MW/h"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Non-existing connections
    let response = client
        .post(format!("{}/api/meter-data", base_url()))
        .json(&json!({
            "connections": ["Non-existing asset 1", "Non-existing asset 2"],
            "values": [1.0],
            "start": "2015-01-01T00:00:00Z",
            "duration": "PT15M",
            "unit": "MW"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn assets_can_be_edited() -> Result<()> {
    // ---
    let client = Client::new();
    let name = unique_name("CS edit");
    let asset = create_asset(&client, &name).await?;
    assert_eq!(asset.name, name);

    let response = client
        .put(format!("{}/api/assets/{}", base_url(), asset.id))
        .json(&json!({
            "display_name": "Charging station",
            "capacity_in_mw": 1.5,
            "latitude": 52.0,
            "longitude": 5.0
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Asset = response.json().await?;
    assert_eq!(updated.display_name, "Charging station");
    assert_eq!(updated.capacity_in_mw, 1.5);

    let response = client
        .get(format!("{}/api/assets/{}", base_url(), i32::MAX))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Duplicate names conflict
    let response = client
        .post(format!("{}/api/assets", base_url()))
        .json(&json!({
            "name": &name,
            "display_name": &name,
            "capacity_in_mw": 0.5,
            "latitude": 52.37,
            "longitude": 4.89
        }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    Ok(())
}
