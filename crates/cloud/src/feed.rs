//! Shaping of raw realtime payloads into [`ChangeEvent`]s, plus the
//! websocket pump used by [`RestBackend::subscribe`].
//!
//! [`RestBackend::subscribe`]: crate::RestBackend

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use atrio_core::{parse_uid, ChangeEvent, FeedbackRecord, Uid, UNKNOWN_HOTEL};

use crate::{FeedEvent, FeedOp, FeedbackBackend};

/// Shape one raw payload into a change event.
///
/// Inserts resolve the denormalized hotel name here (realtime rows carry no
/// join); a failed or empty lookup degrades to "Unknown Hotel" and the
/// record is never dropped. Updates skip the lookup; the reducer keeps the
/// previously resolved name when the hotel is unchanged. Returns `None` for
/// payloads without a usable id.
pub async fn shape_event(backend: &dyn FeedbackBackend, ev: FeedEvent) -> Option<ChangeEvent> {
    match ev.op {
        FeedOp::Insert => {
            let mut record = FeedbackRecord::from_row(&ev.record)?;
            record.hotel_name = resolve_hotel_name(backend, record.hotel_id).await;
            Some(ChangeEvent::Inserted(record))
        }
        FeedOp::Update => FeedbackRecord::from_row(&ev.record).map(ChangeEvent::Updated),
        FeedOp::Delete => row_id(&ev.old_record)
            .or_else(|| row_id(&ev.record))
            .map(ChangeEvent::Deleted),
    }
}

fn row_id(row: &serde_json::Value) -> Option<Uid> {
    row.get("id").and_then(|v| v.as_str()).and_then(parse_uid)
}

async fn resolve_hotel_name(backend: &dyn FeedbackBackend, hotel_id: Option<Uid>) -> String {
    let Some(id) = hotel_id else {
        return UNKNOWN_HOTEL.to_string();
    };
    match backend.hotel_name(id).await {
        Ok(Some(name)) => name,
        Ok(None) => UNKNOWN_HOTEL.to_string(),
        Err(e) => {
            warn!(error = %e, "hotel lookup failed; using fallback name");
            UNKNOWN_HOTEL.to_string()
        }
    }
}

/// Drive the realtime websocket, forwarding decoded payloads until the
/// receiver goes away. Reconnects with doubling backoff capped by
/// `ATRIO_WATCH_BACKOFF_MAX_SECS`.
pub(crate) async fn run_socket(endpoint: String, tx: mpsc::Sender<FeedEvent>) {
    let max_backoff = std::env::var("ATRIO_WATCH_BACKOFF_MAX_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(30);
    let mut backoff = 1u64;
    loop {
        match tokio_tungstenite::connect_async(endpoint.as_str()).await {
            Ok((mut ws, _resp)) => {
                info!("realtime feed connected");
                backoff = 1;
                while let Some(msg) = ws.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            match serde_json::from_str::<FeedEvent>(&text) {
                                Ok(ev) => {
                                    metrics::counter!("cloud_feed_events_total", 1u64);
                                    if tx.send(ev).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => debug!(error = %e, "ignoring unrecognized feed frame"),
                            }
                        }
                        Ok(Message::Ping(p)) => {
                            let _ = ws.send(Message::Pong(p)).await;
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "realtime socket error");
                            break;
                        }
                    }
                }
                warn!("realtime feed disconnected");
            }
            Err(e) => warn!(error = %e, "realtime connect failed"),
        }
        if tx.is_closed() {
            return;
        }
        metrics::counter!("cloud_feed_reconnects_total", 1u64);
        tokio::time::sleep(Duration::from_secs(backoff)).await;
        backoff = (backoff * 2).min(max_backoff.max(1));
    }
}
