//! Polling position transport.
//!
//! Pulls position reports from an HTTP feed that pages with a cursor:
//!
//! ```text
//! GET <feed>?cursor=<c>  ->  {"results": [PositionReport, ...], "next_cursor": "..." | null}
//! ```
//!
//! The cursor of the last page is remembered between polls so each poll
//! only sees new reports. Redelivered or out-of-order reports are the
//! feed's business; the monitor rejects them as stale and moves on.

use std::time::Duration as StdDuration;

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::MonitorError;
use crate::models::PositionReport;
use crate::monitor::Monitor;

// ---

/// One poll's worth of reports plus where to resume next time.
#[derive(Debug, Default)]
pub struct FeedBatch {
    pub reports: Vec<PositionReport>,
    pub cursor: Option<String>,
}

/// Tally of what happened to a batch when fed to the monitor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestTally {
    pub accepted: usize,
    pub stale: usize,
    pub rejected: usize,
}

/// Fetch pages starting at `cursor` until the feed runs dry or
/// `max_pages` is reached.
pub async fn fetch_positions(
    client: &reqwest::Client,
    base_url: &str,
    cursor: Option<String>,
    max_pages: u32,
) -> Result<FeedBatch> {
    // ---
    let mut batch = FeedBatch {
        reports: Vec::new(),
        cursor: cursor.clone(),
    };
    let mut cursor = cursor;
    let mut page_count = 0;

    loop {
        if page_count >= max_pages {
            debug!(
                "Hit page limit of {}, stopping pagination. Fetched {} reports so far.",
                max_pages,
                batch.reports.len()
            );
            break;
        }
        page_count += 1;

        // reqwest appends to any query already in base_url and encodes the cursor
        let mut request = client.get(base_url);
        if let Some(ref cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        debug!("Fetching page {} from: {} (cursor {:?})", page_count, base_url, cursor);

        let response: serde_json::Value = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let page = parse_page(&response, page_count);
        batch.reports.extend(page.reports);

        cursor = page.cursor;
        debug!("Page {} next_cursor: {:?}", page_count, cursor);

        match &cursor {
            Some(next) => batch.cursor = Some(next.clone()),
            None => {
                debug!(
                    "No more pages, stopping. Total reports fetched: {}",
                    batch.reports.len()
                );
                break;
            }
        }
    }

    debug!(
        "Finished fetching {} reports from {} page(s)",
        batch.reports.len(),
        page_count
    );
    Ok(batch)
}

/// Pull reports out of one feed page. Unparsable items are skipped.
fn parse_page(response: &serde_json::Value, page: u32) -> FeedBatch {
    // ---
    let mut reports = Vec::new();

    if let Some(data) = response.get("results").and_then(|d| d.as_array()) {
        for (i, item) in data.iter().enumerate() {
            match serde_json::from_value::<PositionReport>(item.clone()) {
                Ok(report) => reports.push(report),
                Err(e) => debug!(
                    "Failed to parse item {} on page {}: {} - Raw item: {}",
                    i, page, e, item
                ),
            }
        }
    } else {
        debug!("Page {} response missing 'results' field or not an array", page);
    }

    let cursor = response
        .get("next_cursor")
        .and_then(|c| c.as_str())
        .map(String::from);

    FeedBatch { reports, cursor }
}

/// Feed a batch to the monitor in order. Ingest is at most once: rejected
/// reports are counted and dropped.
pub async fn deliver(monitor: &Monitor, reports: Vec<PositionReport>) -> IngestTally {
    // ---
    let mut tally = IngestTally::default();
    for report in reports {
        match monitor.ingest(report).await {
            Ok(_) => tally.accepted += 1,
            Err(MonitorError::StaleReport { .. }) => tally.stale += 1,
            Err(e) => {
                debug!("Feed report rejected: {}", e);
                tally.rejected += 1;
            }
        }
    }
    tally
}

/// Poll `base_url` every `every` and deliver whatever arrives, forever.
pub async fn run_poller(monitor: Monitor, base_url: String, max_pages: u32, every: StdDuration) {
    // ---
    let client = reqwest::Client::new();
    let mut cursor: Option<String> = None;
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Polling position feed {} every {:?}", base_url, every);
    loop {
        ticker.tick().await;
        if monitor.is_shutting_down() {
            break;
        }

        let batch = match fetch_positions(&client, &base_url, cursor.clone(), max_pages).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Failed to fetch position feed: {}", e);
                continue;
            }
        };
        cursor = batch.cursor;

        if batch.reports.is_empty() {
            continue;
        }
        let tally = deliver(&monitor, batch.reports).await;
        info!(
            accepted = tally.accepted,
            stale = tally.stale,
            rejected = tally.rejected,
            "Delivered feed batch"
        );
    }
    debug!("Poller stopped");
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::clock::ManualClock;
    use crate::monitor::MonitorSettings;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn item(patient: &str, minute: u32) -> serde_json::Value {
        json!({
            "patient_id": patient,
            "latitude": 48.8566,
            "longitude": 2.3522,
            "timestamp": format!("2026-02-04T15:{:02}:00Z", minute),
            "speed": 0.0,
            "battery_level": 85,
            "signal_strength": "excellent"
        })
    }

    #[test]
    fn test_parse_page_skips_bad_items() {
        // ---
        let page = json!({
            "results": [item("P001", 0), {"patient_id": "P001"}, item("P003", 1)],
            "next_cursor": "abc"
        });

        let batch = parse_page(&page, 1);
        assert_eq!(batch.reports.len(), 2);
        assert_eq!(batch.reports[1].patient_id, "P003");
        assert_eq!(batch.cursor.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_page_without_results() {
        // ---
        let batch = parse_page(&json!({"next_cursor": null}), 3);
        assert!(batch.reports.is_empty());
        assert!(batch.cursor.is_none());
    }

    #[tokio::test]
    async fn test_fetch_follows_encoded_cursor() {
        // ---
        use axum::{extract::Query, routing::get, Json, Router};
        use std::collections::HashMap;

        // Second page is keyed by a cursor that needs escaping
        async fn feed(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
            assert_eq!(params.get("ward").map(String::as_str), Some("3"));
            Json(match params.get("cursor").map(String::as_str) {
                None => json!({"results": [item("P001", 0)], "next_cursor": "a&b=c d"}),
                Some("a&b=c d") => json!({"results": [item("P001", 1)], "next_cursor": null}),
                Some(other) => panic!("unexpected cursor {other}"),
            })
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/feed", get(feed)))
                .await
                .unwrap();
        });

        let client = reqwest::Client::new();
        let base_url = format!("http://{addr}/feed?ward=3");
        let batch = fetch_positions(&client, &base_url, None, 10).await.unwrap();

        assert_eq!(batch.reports.len(), 2);
        assert_eq!(batch.cursor.as_deref(), Some("a&b=c d"));
    }

    #[tokio::test]
    async fn test_deliver_counts_outcomes() {
        // ---
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 4, 15, 0, 0).unwrap());
        let monitor = Monitor::new(MonitorSettings::default(), Arc::new(clock));

        let mut reports: Vec<PositionReport> = [item("P001", 0), item("P001", 1), item("P001", 1)]
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect();
        let mut off_map = reports[0].clone();
        off_map.latitude = 100.0;
        reports.push(off_map);

        let tally = deliver(&monitor, reports).await;
        assert_eq!(
            tally,
            IngestTally {
                accepted: 2,
                stale: 1,
                rejected: 1
            }
        );
    }
}
