//! HTTP client for the dashboard API.
//!
//! Fetches the two inputs the engine is seeded from:
//! - the batch snapshot (`/all-locations`, `/devices-in-range`, `/locations`)
//! - per-device summaries (`/device-summary`), fetched concurrently
//!
//! A summary that cannot be fetched for any reason counts as 0 meters for
//! that device; it is logged and never fails the load.

use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use log::{info, warn};
use reqwest::Client;
use serde_json::Value;

use crate::engine::{BatchReport, SharedEngine};
use crate::error::{FleetError, Result};
use crate::summary::SummaryRecord;
use crate::LocationRecord;

// Concurrency settings
const MAX_CONCURRENCY: usize = 8;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the dashboard API.
pub struct DashboardClient {
    client: Client,
    base_url: String,
}

impl DashboardClient {
    /// Create a client for an API root such as `http://localhost:8000`.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(MAX_CONCURRENCY)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FleetError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| FleetError::Http {
                message: e.to_string(),
                status_code: None,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FleetError::Http {
                message: format!("GET {} failed", path),
                status_code: Some(status.as_u16()),
            });
        }

        resp.json::<Value>().await.map_err(|e| FleetError::Decode {
            message: e.to_string(),
        })
    }

    /// All devices' points for a day within `[start, end]`.
    pub async fn fetch_all_locations(
        &self,
        date: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<LocationRecord>> {
        let body = self
            .get_json(
                "/all-locations",
                &[("date", date), ("start", start), ("end", end)],
            )
            .await?;
        parse_locations_body(body)
    }

    /// One device's points for a day within `[start, end]`.
    pub async fn fetch_device_locations(
        &self,
        device_id: &str,
        date: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<LocationRecord>> {
        let body = self
            .get_json(
                "/locations",
                &[
                    ("date", date),
                    ("device_id", device_id),
                    ("start", start),
                    ("end", end),
                ],
            )
            .await?;
        parse_locations_body(body)
    }

    /// Points of the known fleet within `[start, end]` on a day.
    ///
    /// Same record shape as [`fetch_all_locations`](Self::fetch_all_locations),
    /// ordered device by device. An alternative batch snapshot source.
    pub async fn fetch_devices_in_range(
        &self,
        date: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<LocationRecord>> {
        let body = self
            .get_json(
                "/devices-in-range",
                &[("date", date), ("start", start), ("end", end)],
            )
            .await?;
        parse_locations_body(body)
    }

    /// Distance summary for one device. Falls back to 0 on any failure.
    pub async fn fetch_device_summary(&self, device_id: &str, date: &str) -> SummaryRecord {
        match self
            .get_json("/device-summary", &[("device_id", device_id), ("date", date)])
            .await
        {
            Ok(body) => parse_summary_body(device_id, &body),
            Err(e) => {
                warn!(
                    "[DashboardClient] Summary for {} unavailable ({}), using 0",
                    device_id, e
                );
                SummaryRecord::zero(device_id)
            }
        }
    }

    /// Summaries for several devices, fetched concurrently, in input order.
    pub async fn fetch_summaries(&self, device_ids: &[String], date: &str) -> Vec<SummaryRecord> {
        stream::iter(device_ids)
            .map(|id| self.fetch_device_summary(id, date))
            .buffered(MAX_CONCURRENCY)
            .collect()
            .await
    }

    /// Fetch the snapshot and summaries and seed the engine with them.
    pub async fn load_into(
        &self,
        engine: &SharedEngine,
        date: &str,
        start: &str,
        end: &str,
    ) -> Result<BatchReport> {
        let started = Instant::now();
        let records = self.fetch_all_locations(date, start, end).await?;

        let report = {
            let mut guard = engine.write().unwrap_or_else(|p| p.into_inner());
            guard.load_batch(&records)
        };

        let mut device_ids: Vec<String> = records
            .iter()
            .filter_map(|r| r.device_id_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        device_ids.sort();
        device_ids.dedup();

        let summaries = self.fetch_summaries(&device_ids, date).await;
        {
            let mut guard = engine.write().unwrap_or_else(|p| p.into_inner());
            guard.load_summaries(&summaries);
        }

        info!(
            "[DashboardClient] Seeded {} points and {} summaries in {:.2}s",
            report.accepted,
            summaries.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(report)
    }
}

/// Interpret a locations response: an array of records, or an `{"error"}`
/// object the API returns instead of an HTTP error status.
pub fn parse_locations_body(body: Value) -> Result<Vec<LocationRecord>> {
    match body {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<LocationRecord>(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    // Non-object entries; individual bad fields are caught later
                    warn!("[DashboardClient] Skipping unreadable record: {}", e);
                    None
                }
            })
            .collect()),
        Value::Object(map) if map.contains_key("error") => Err(FleetError::Http {
            message: map["error"].as_str().unwrap_or("unknown error").to_string(),
            status_code: None,
        }),
        other => Err(FleetError::Decode {
            message: format!("expected an array of locations, got {}", other),
        }),
    }
}

/// Interpret a summary response, falling back to 0 meters when the body is
/// an error or has no usable `total_distance_m`.
pub fn parse_summary_body(device_id: &str, body: &Value) -> SummaryRecord {
    if let Some(error) = body.get("error") {
        warn!(
            "[DashboardClient] Summary for {} reported error {}, using 0",
            device_id, error
        );
        return SummaryRecord::zero(device_id);
    }
    let distance = body
        .get("total_distance_m")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    SummaryRecord::new(device_id, distance)
}
