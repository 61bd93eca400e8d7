#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use atrio_cloud::{FeedEvent, FeedOp, MemoryBackend};
use atrio_core::{ChangeEvent, FeedbackRecord, FeedbackStatus, NoticeKind, Uid, UNKNOWN_HOTEL};
use atrio_store::{spawn_sync, IngestMsg, SyncConfig, SyncHandle};

fn uid(n: u8) -> Uid {
    let mut u = [0u8; 16];
    u[15] = n;
    u
}

fn record(n: u8, name: &str) -> FeedbackRecord {
    FeedbackRecord::from_row(&serde_json::json!({
        "id": format!("00000000-0000-0000-0000-0000000000{:02x}", n),
        "name": name,
        "email": format!("{}@example.com", name.to_lowercase()),
        "ratings": {"staff": 4, "comfort": 3},
        "comments": "Quiet room, friendly staff.",
        "created_at": format!("2025-03-{:02}T12:00:00Z", n),
        "status": "new",
    }))
    .expect("test row")
}

async fn wait_until(what: &str, mut ok: impl FnMut() -> bool) {
    for _ in 0..200 {
        if ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

fn cfg(poll_ms: u64, with_feed: bool) -> SyncConfig {
    SyncConfig { poll_interval: Duration::from_millis(poll_ms), queue_cap: 64, with_feed }
}

async fn expect_notice(handle: &mut SyncHandle, kind: NoticeKind, title: &str) {
    let mut rx = handle.take_notices().expect("notices taken once");
    for _ in 0..200 {
        match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Some(n)) if n.kind == kind && n.title == title => return,
            Ok(Some(_)) => continue,
            _ => continue,
        }
    }
    panic!("no {title:?} notice arrived");
}

#[tokio::test]
async fn live_insert_survives_failed_hotel_lookup() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_hotel_lookups(true);
    let mut handle = spawn_sync(backend.clone(), cfg(60_000, true));

    // Give the feed task a moment to subscribe before publishing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    backend.push_event(FeedEvent {
        op: FeedOp::Insert,
        record: serde_json::json!({
            "id": "00000000-0000-0000-0000-0000000000aa",
            "name": "Grace",
            "email": "grace@example.com",
            "hotel_id": "00000000-0000-0000-0000-0000000000f1",
            "ratings": {"staff": 5},
            "comments": "Front desk went above and beyond.",
            "created_at": "2025-04-02T08:30:00Z",
        }),
        old_record: serde_json::Value::Null,
    });

    wait_until("insert to land", || {
        handle.snapshot().items.iter().any(|r| r.name == "Grace")
    })
    .await;
    let record = handle
        .snapshot()
        .items
        .iter()
        .find(|r| r.name == "Grace")
        .cloned()
        .expect("record present");
    assert_eq!(record.hotel_name, UNKNOWN_HOTEL);

    expect_notice(&mut handle, NoticeKind::Info, "New Feedback").await;
    handle.shutdown();
}

#[tokio::test]
async fn fetch_failure_retains_previous_collection() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_records((1..=5).map(|n| record(n, "Guest")).collect());
    let mut handle = spawn_sync(backend.clone(), cfg(50, false));

    wait_until("initial refresh", || handle.snapshot().items.len() == 5).await;

    backend.fail_lists(true);
    wait_until("failed poll to settle", || {
        handle.last_error().is_some() && !handle.is_loading()
    })
    .await;

    let snap = handle.snapshot();
    assert_eq!(snap.items.len(), 5, "previous collection must survive a failed refresh");
    expect_notice(&mut handle, NoticeKind::Error, "Error").await;
    handle.shutdown();
}

#[tokio::test]
async fn stale_full_refresh_is_discarded() {
    let backend = Arc::new(MemoryBackend::new());
    let handle = spawn_sync(backend.clone(), cfg(60_000, false));
    let ingest = handle.ingest();

    ingest
        .send(IngestMsg::Event(ChangeEvent::Inserted(record(7, "Ada"))))
        .await
        .expect("ingest open");
    wait_until("insert to land", || handle.snapshot().items.len() == 1).await;

    // A poll issued before the insert resolves late: it must not win.
    ingest
        .send(IngestMsg::Replace { records: Vec::new(), baseline: 0 })
        .await
        .expect("ingest open");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handle.snapshot().items.len(), 1, "stale refresh must be discarded");

    // A refresh issued after the insert carries a current baseline and wins.
    ingest
        .send(IngestMsg::Replace { records: Vec::new(), baseline: handle.events_seen() })
        .await
        .expect("ingest open");
    wait_until("fresh refresh to apply", || handle.snapshot().items.is_empty()).await;
    handle.shutdown();
}

#[tokio::test]
async fn status_updates_apply_through_ingest() {
    let backend = Arc::new(MemoryBackend::new());
    let handle = spawn_sync(backend.clone(), cfg(60_000, false));
    let ingest = handle.ingest();

    ingest
        .send(IngestMsg::Event(ChangeEvent::Inserted(record(3, "Ada"))))
        .await
        .expect("ingest open");
    wait_until("insert to land", || handle.snapshot().items.len() == 1).await;

    let mut updated = record(3, "Ada");
    updated.status = FeedbackStatus::Resolved;
    ingest
        .send(IngestMsg::Event(ChangeEvent::Updated(updated)))
        .await
        .expect("ingest open");
    wait_until("update to land", || {
        handle.snapshot().get(&uid(3)).map(|r| r.status) == Some(FeedbackStatus::Resolved)
    })
    .await;
    handle.shutdown();
}

#[tokio::test]
async fn shutdown_stops_the_ingest_loop() {
    let backend = Arc::new(MemoryBackend::new());
    let handle = spawn_sync(backend, cfg(60_000, false));
    let ingest = handle.ingest();
    handle.shutdown();

    wait_until("ingest channel to close", || ingest.is_closed()).await;
}
