#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use atrio_api::{AtrioApi, AtrioError, FilterCriteria, InProcApi, MemoryBackend, SyncConfig};
use atrio_core::{FeedbackRecord, FeedbackStatus, Notice, NoticeKind, Uid};
use atrio_persist::MetaStore;

struct MapMeta(Mutex<HashMap<String, String>>);

impl MapMeta {
    fn new() -> Self {
        Self(Mutex::new(HashMap::new()))
    }
}

impl MetaStore for MapMeta {
    fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.0.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.0.lock().unwrap().get(key).cloned())
    }
}

fn uid(n: u8) -> Uid {
    let mut u = [0u8; 16];
    u[15] = n;
    u
}

fn record(n: u8, name: &str, score: u8) -> FeedbackRecord {
    FeedbackRecord::from_row(&serde_json::json!({
        "id": format!("00000000-0000-0000-0000-0000000000{:02x}", n),
        "name": name,
        "email": format!("{}@example.com", name.to_lowercase()),
        "ratings": {"staff": score},
        "comments": "Comfortable beds, slow elevator.",
        "created_at": format!("2025-03-{:02}T10:00:00Z", n),
        "status": "new",
    }))
    .expect("test row")
}

fn temp_dir(tag: &str) -> PathBuf {
    let nanos =
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("atrio-facade-{tag}-{nanos}"))
}

fn start(
    backend: Arc<MemoryBackend>,
    tag: &str,
) -> (InProcApi, mpsc::Receiver<Notice>, PathBuf) {
    let dir = temp_dir(tag);
    let cfg = SyncConfig {
        poll_interval: Duration::from_millis(50),
        queue_cap: 64,
        with_feed: false,
    };
    let (api, notices) =
        InProcApi::start_with(backend, cfg, Arc::new(MapMeta::new()), dir.clone())
            .expect("facade starts");
    (api, notices, dir)
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

async fn expect_notice(rx: &mut mpsc::Receiver<Notice>, kind: NoticeKind, title: &str) {
    for _ in 0..100 {
        match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Some(n)) if n.kind == kind && n.title == title => return,
            _ => continue,
        }
    }
    panic!("no {title:?} notice arrived");
}

#[tokio::test]
async fn status_mutation_is_confirmed_only() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_records(vec![record(1, "Ada", 4), record(2, "Grace", 2)]);
    let (api, mut notices, _dir) = start(backend.clone(), "status");
    wait_until("initial snapshot", || api.snapshot().items.len() == 2).await;

    backend.fail_updates(true);
    let err = api.update_status(uid(1), FeedbackStatus::Resolved).await.unwrap_err();
    assert!(matches!(err, AtrioError::Backend(_)));
    // The local mirror must not move before the store confirms.
    assert_eq!(api.snapshot().get(&uid(1)).unwrap().status, FeedbackStatus::New);
    expect_notice(&mut notices, NoticeKind::Error, "Error").await;

    backend.fail_updates(false);
    api.update_status(uid(1), FeedbackStatus::Resolved).await.unwrap();
    wait_until("confirmed update to land", || {
        api.snapshot().get(&uid(1)).map(|r| r.status) == Some(FeedbackStatus::Resolved)
    })
    .await;
    expect_notice(&mut notices, NoticeKind::Success, "Status Updated").await;
    api.shutdown();
}

#[tokio::test]
async fn unknown_row_is_rejected_before_any_io() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_records(vec![record(1, "Ada", 4)]);
    // A backend failure here would also surface; the NotFound must win
    // because the call is rejected before the store is contacted.
    backend.fail_updates(true);
    let (api, _notices, _dir) = start(backend, "unknown");
    wait_until("initial snapshot", || api.snapshot().items.len() == 1).await;

    let err = api.update_status(uid(9), FeedbackStatus::Resolved).await.unwrap_err();
    assert!(matches!(err, AtrioError::NotFound(_)));
    api.shutdown();
}

#[tokio::test]
async fn select_all_toggles_and_filters_prune() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_records((1..=4).map(|n| record(n, "Guest", n)).collect());
    let (api, _notices, _dir) = start(backend, "select");
    wait_until("initial snapshot", || api.snapshot().items.len() == 4).await;

    api.select_all();
    assert_eq!(api.selected().len(), 4);
    api.select_all();
    assert!(api.selected().is_empty());

    api.select_all();
    api.set_criteria(FilterCriteria { min_rating: 3.0, ..Default::default() });
    let survivors = api.selected();
    assert_eq!(survivors.len(), 2, "selection must shrink with the view");
    let visible: Vec<Uid> = api.filtered().iter().map(|r| r.id).collect();
    assert!(survivors.iter().all(|id| visible.contains(id)));

    api.reset_filters();
    assert_eq!(api.filtered().len(), 4);
    api.shutdown();
}

#[tokio::test]
async fn exporting_nothing_is_a_guarded_noop() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_records(vec![record(1, "Ada", 4)]);
    let (api, mut notices, dir) = start(backend, "noop-export");
    wait_until("initial snapshot", || api.snapshot().items.len() == 1).await;

    let err = api.export_selected().unwrap_err();
    assert!(matches!(err, AtrioError::Validation(_)));
    expect_notice(&mut notices, NoticeKind::Error, "No Rows Selected").await;
    assert!(!dir.exists(), "no download side effect without a selection");
    api.shutdown();
}

#[tokio::test]
async fn export_and_backup_produce_files_and_stamp() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_records((1..=3).map(|n| record(n, "Guest", 4)).collect());
    let (api, mut notices, dir) = start(backend, "export");
    wait_until("initial snapshot", || api.snapshot().items.len() == 3).await;

    api.select_all();
    let out = api.export_selected().unwrap();
    assert_eq!(out.records, 3);
    assert!(out.path.is_file());
    expect_notice(&mut notices, NoticeKind::Success, "Export Complete").await;

    assert!(api.last_backup().is_none());
    let receipt = api.backup().unwrap();
    assert!(receipt.path.is_file());
    assert_eq!(api.last_backup().as_deref(), Some(receipt.timestamp.as_str()));
    expect_notice(&mut notices, NoticeKind::Success, "Backup Complete").await;

    let body = std::fs::read_to_string(&receipt.path).unwrap();
    let restored: Vec<FeedbackRecord> = serde_json::from_str(&body).unwrap();
    assert_eq!(restored.len(), 3);

    let _ = std::fs::remove_dir_all(&dir);
    api.shutdown();
}

#[tokio::test]
async fn submit_validates_before_contacting_the_store() {
    let backend = Arc::new(MemoryBackend::new());
    let (api, mut notices, _dir) = start(backend.clone(), "submit");

    let bad = atrio_core::NewFeedback {
        name: String::new(),
        email: "ada@example.com".into(),
        hotel_id: None,
        room_number: String::new(),
        stay_date: String::new(),
        ratings: [("staff".to_string(), 4u8)].into_iter().collect(),
        comments: "The lobby smelled of fresh coffee.".into(),
        user_id: None,
    };
    let err = api.submit(bad.clone()).await.unwrap_err();
    assert!(matches!(err, AtrioError::Validation(_)));
    assert!(backend.records().is_empty(), "invalid submissions never reach the store");
    expect_notice(&mut notices, NoticeKind::Error, "Submission Failed").await;

    let good = atrio_core::NewFeedback { name: "Ada".into(), ..bad };
    api.submit(good).await.unwrap();
    assert_eq!(backend.records().len(), 1);
    api.shutdown();
}
