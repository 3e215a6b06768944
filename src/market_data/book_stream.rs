// =============================================================================
// Book Stream — market-channel WebSocket ingest with reconnect backoff
// =============================================================================
//
// The only writer to the book store. Connects, subscribes the current asset
// set, and applies `book` snapshots and `price_change` deltas until the
// stream drops, the asset set changes (resubscribe requires a fresh
// subscription frame), or shutdown is signalled.
//
// Reconnects forever with exponential backoff (base 2 s, cap 60 s). Frames
// that fail to parse are dropped at the message boundary. The first few raw
// frames of each connection are logged at debug level for diagnosis.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::market_data::{BookStore, OrderLevel};
use crate::types::Side;

/// Reconnect backoff bounds.
const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Raw-frame debug samples logged per connection.
const LOG_SAMPLES_PER_CONNECTION: usize = 5;

/// One normalized ingest event.
#[derive(Debug, Clone, PartialEq)]
pub enum BookEvent {
    Snapshot {
        asset_id: String,
        bids: Vec<OrderLevel>,
        asks: Vec<OrderLevel>,
    },
    PriceChange {
        asset_id: String,
        price: f64,
        size: f64,
        side: Side,
    },
}

/// Long-running ingest task. `assets_rx` carries the token set to subscribe;
/// an update triggers a reconnect with the fresh set. `stop_rx` flipping to
/// true ends the task.
pub async fn run_ingest(
    url: String,
    store: Arc<BookStore>,
    mut assets_rx: watch::Receiver<Vec<String>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut backoff = BACKOFF_BASE;

    loop {
        if *stop_rx.borrow() {
            info!("book ingest stopping");
            return;
        }

        let assets = assets_rx.borrow().clone();
        if assets.is_empty() {
            // Nothing to subscribe yet; wait for the first scan to publish a
            // token set.
            tokio::select! {
                _ = assets_rx.changed() => continue,
                _ = stop_rx.changed() => continue,
            }
        }

        match run_connection(&url, &assets, &store, &mut assets_rx, &mut stop_rx).await {
            Ok(ConnectionEnd::Resubscribe) => {
                backoff = BACKOFF_BASE;
                continue;
            }
            Ok(ConnectionEnd::Stopped) => {
                info!("book ingest stopping");
                return;
            }
            Ok(ConnectionEnd::StreamClosed) => {
                warn!("book stream closed by upstream, reconnecting");
                backoff = BACKOFF_BASE;
            }
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff.as_secs(), "book stream error, reconnecting");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = stop_rx.changed() => {}
        }
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

enum ConnectionEnd {
    StreamClosed,
    Resubscribe,
    Stopped,
}

async fn run_connection(
    url: &str,
    assets: &[String],
    store: &BookStore,
    assets_rx: &mut watch::Receiver<Vec<String>>,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<ConnectionEnd> {
    info!(url, assets = assets.len(), "connecting to market channel");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to market channel")?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::json!({
        "type": "market",
        "assets_ids": assets,
    });
    write
        .send(Message::Text(subscribe.to_string()))
        .await
        .context("failed to send subscription frame")?;

    info!(assets = assets.len(), "market channel subscribed");
    let mut samples_logged = 0usize;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    return Ok(ConnectionEnd::Stopped);
                }
            }
            _ = assets_rx.changed() => {
                debug!("asset set changed, resubscribing");
                return Ok(ConnectionEnd::Resubscribe);
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if samples_logged < LOG_SAMPLES_PER_CONNECTION {
                            samples_logged += 1;
                            let preview: String = text.chars().take(200).collect();
                            debug!(sample = samples_logged, frame = %preview, "market frame");
                        }
                        for event in parse_frame(&text) {
                            apply_event(store, event);
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => return Ok(ConnectionEnd::StreamClosed),
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

fn apply_event(store: &BookStore, event: BookEvent) {
    match event {
        BookEvent::Snapshot { asset_id, bids, asks } => {
            store.apply_snapshot(&asset_id, bids, asks);
        }
        BookEvent::PriceChange {
            asset_id,
            price,
            size,
            side,
        } => {
            store.apply_price_change(&asset_id, price, size, side);
        }
    }
}

// -----------------------------------------------------------------------------
// Frame parsing
// -----------------------------------------------------------------------------

/// Parse one text frame into zero or more events. Frames arrive either as a
/// single event object or as an array of them; anything unrecognizable
/// yields nothing.
pub fn parse_frame(text: &str) -> Vec<BookEvent> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };

    let mut events = Vec::new();
    match &value {
        Value::Array(arr) => {
            for entry in arr {
                parse_event(entry, &mut events);
            }
        }
        Value::Object(_) => parse_event(&value, &mut events),
        _ => {}
    }
    events
}

fn parse_event(entry: &Value, out: &mut Vec<BookEvent>) {
    let event_type = entry.get("event_type").and_then(|v| v.as_str()).unwrap_or("");
    let asset_id = entry
        .get("asset_id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if asset_id.is_empty() {
        return;
    }

    match event_type {
        "book" => {
            // Older feeds label the sides buys/sells.
            let bids = parse_levels(entry.get("bids").or_else(|| entry.get("buys")));
            let asks = parse_levels(entry.get("asks").or_else(|| entry.get("sells")));
            out.push(BookEvent::Snapshot { asset_id, bids, asks });
        }
        "price_change" => {
            let Some(changes) = entry.get("changes").and_then(|v| v.as_array()) else {
                return;
            };
            for change in changes {
                let Some(price) = change.get("price").and_then(parse_number) else {
                    continue;
                };
                let Some(size) = change.get("size").and_then(parse_number) else {
                    continue;
                };
                let Some(side) = change
                    .get("side")
                    .and_then(|v| v.as_str())
                    .and_then(Side::parse)
                else {
                    continue;
                };
                out.push(BookEvent::PriceChange {
                    asset_id: asset_id.clone(),
                    price,
                    size,
                    side,
                });
            }
        }
        _ => {}
    }
}

fn parse_levels(value: Option<&Value>) -> Vec<OrderLevel> {
    let mut out = Vec::new();
    let Some(arr) = value.and_then(|v| v.as_array()) else {
        return out;
    };
    for entry in arr {
        let price = entry.get("price").and_then(parse_number).unwrap_or(0.0);
        let size = entry.get("size").and_then(parse_number).unwrap_or(0.0);
        if price > 0.0 && size > 0.0 {
            out.push(OrderLevel { price, size });
        }
    }
    out
}

fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
