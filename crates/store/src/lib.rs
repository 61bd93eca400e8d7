//! Atrio store: the canonical in-memory mirror of the remote feedback
//! collection. One ingest loop owns the collection; a periodic full refresh
//! and the realtime feed both reduce through it, and readers get immutable
//! snapshots via [`arc_swap`].

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use atrio_cloud::FeedbackBackend;
use atrio_core::{ChangeEvent, FeedbackRecord, FeedbackSnapshot, Notice, UNKNOWN_HOTEL};

/// Reducer over the canonical collection. Kept free of channels and I/O so
/// event sequences can be replayed in tests.
pub struct FeedbackBook {
    epoch: u64,
    items: Vec<FeedbackRecord>,
}

impl Default for FeedbackBook {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackBook {
    pub fn new() -> Self {
        Self { epoch: 0, items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Apply one change event. Inserts prepend (the feed delivers newest
    /// first, matching the descending order of full refreshes); updates
    /// replace the matching record and leave everything else untouched;
    /// deletes are idempotent.
    pub fn apply(&mut self, ev: ChangeEvent) {
        let changed = match ev {
            ChangeEvent::Inserted(record) => {
                match self.items.iter().position(|r| r.id == record.id) {
                    Some(idx) => self.items[idx] = record,
                    None => self.items.insert(0, record),
                }
                true
            }
            ChangeEvent::Updated(mut incoming) => {
                match self.items.iter().position(|r| r.id == incoming.id) {
                    Some(idx) => {
                        let prior = &self.items[idx];
                        // Realtime rows carry no hotel join; keep the resolved
                        // name when the hotel itself is unchanged.
                        if incoming.hotel_name == UNKNOWN_HOTEL
                            && incoming.hotel_id == prior.hotel_id
                        {
                            incoming.hotel_name = prior.hotel_name.clone();
                        }
                        self.items[idx] = incoming;
                        true
                    }
                    None => false,
                }
            }
            ChangeEvent::Deleted(uid) => {
                let before = self.items.len();
                self.items.retain(|r| r.id != uid);
                self.items.len() != before
            }
        };
        if changed {
            self.epoch = self.epoch.saturating_add(1);
        }
    }

    /// Wholesale replacement from a full refresh.
    pub fn replace(&mut self, records: Vec<FeedbackRecord>) {
        self.items = records;
        self.epoch = self.epoch.saturating_add(1);
    }

    pub fn freeze(&self) -> Arc<FeedbackSnapshot> {
        Arc::new(FeedbackSnapshot { epoch: self.epoch, items: self.items.clone() })
    }
}

/// Messages accepted by the ingest loop.
#[derive(Debug)]
pub enum IngestMsg {
    /// A point change from the feed or a confirmed local mutation.
    Event(ChangeEvent),
    /// A full refresh, tagged with the point-event sequence observed when the
    /// fetch was issued. Stale replacements are discarded so a slow poll
    /// response cannot resurrect a record deleted while it was in flight.
    Replace { records: Vec<FeedbackRecord>, baseline: u64 },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Full-refresh cadence; the consistency backstop behind the feed.
    pub poll_interval: Duration,
    pub queue_cap: usize,
    /// Whether to run the realtime feed task (one-shot commands skip it).
    pub with_feed: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(10), queue_cap: 1024, with_feed: true }
    }
}

impl SyncConfig {
    /// Read `ATRIO_POLL_SECS` / `ATRIO_QUEUE_CAP`, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) =
            std::env::var("ATRIO_POLL_SECS").ok().and_then(|s| s.parse::<u64>().ok())
        {
            cfg.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(cap) =
            std::env::var("ATRIO_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok())
        {
            cfg.queue_cap = cap.max(1);
        }
        cfg
    }
}

struct SyncShared {
    loading: AtomicBool,
    last_error: Mutex<Option<String>>,
    events_seen: AtomicU64,
}

/// Handle for readers and mutators. Dropping it without calling
/// [`SyncHandle::shutdown`] leaves the background tasks running.
pub struct SyncHandle {
    snap: Arc<ArcSwap<FeedbackSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
    ingest_tx: mpsc::Sender<IngestMsg>,
    notice_tx: mpsc::Sender<Notice>,
    notice_rx: Option<mpsc::Receiver<Notice>>,
    shared: Arc<SyncShared>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn snapshot(&self) -> Arc<FeedbackSnapshot> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }

    /// Sender used by the status mutator to inject confirmed changes.
    pub fn ingest(&self) -> mpsc::Sender<IngestMsg> {
        self.ingest_tx.clone()
    }

    /// Sender for user-visible notices (the export/backup paths reuse it).
    pub fn notifier(&self) -> mpsc::Sender<Notice> {
        self.notice_tx.clone()
    }

    /// The notice stream; available exactly once.
    pub fn take_notices(&mut self) -> Option<mpsc::Receiver<Notice>> {
        self.notice_rx.take()
    }

    /// Point-event sequence; capture before a manual refresh so the
    /// replacement can be staleness-checked.
    pub fn events_seen(&self) -> u64 {
        self.shared.events_seen.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self) -> bool {
        self.shared.loading.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().unwrap().clone()
    }

    /// Stop the poll timer, the feed subscription and the ingest loop
    /// together.
    pub fn shutdown(self) {
        for t in &self.tasks {
            t.abort();
        }
        info!("sync controller stopped");
    }
}

/// Start the sync controller: ingest loop, polling task and (optionally) the
/// realtime feed task.
pub fn spawn_sync(backend: Arc<dyn FeedbackBackend>, cfg: SyncConfig) -> SyncHandle {
    let (ingest_tx, mut ingest_rx) = mpsc::channel::<IngestMsg>(cfg.queue_cap);
    let (notice_tx, notice_rx) = mpsc::channel::<Notice>(64);
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let snap = Arc::new(ArcSwap::from_pointee(FeedbackSnapshot::default()));
    let shared = Arc::new(SyncShared {
        loading: AtomicBool::new(true),
        last_error: Mutex::new(None),
        events_seen: AtomicU64::new(0),
    });
    let mut tasks = Vec::new();

    // Ingest loop: sole owner of the collection.
    {
        let snap = Arc::clone(&snap);
        let shared = Arc::clone(&shared);
        let notice_tx = notice_tx.clone();
        tasks.push(tokio::spawn(async move {
            let mut book = FeedbackBook::new();
            while let Some(msg) = ingest_rx.recv().await {
                match msg {
                    IngestMsg::Event(ev) => {
                        shared.events_seen.fetch_add(1, Ordering::SeqCst);
                        if let ChangeEvent::Inserted(r) = &ev {
                            metrics::counter!("store_feed_inserts_total", 1u64);
                            let _ = notice_tx.try_send(Notice::info(
                                "New Feedback",
                                format!("New feedback received from {}", r.name),
                            ));
                        }
                        book.apply(ev);
                    }
                    IngestMsg::Replace { records, baseline } => {
                        if shared.events_seen.load(Ordering::SeqCst) > baseline {
                            metrics::counter!("store_stale_polls_total", 1u64);
                            debug!(baseline, "discarding stale full refresh");
                            continue;
                        }
                        book.replace(records);
                    }
                }
                let next = book.freeze();
                metrics::gauge!("store_records", next.items.len() as f64);
                let epoch = next.epoch;
                snap.store(next);
                let _ = epoch_tx.send(epoch);
            }
            info!("ingest loop stopped");
        }));
    }

    // Poll task: unconditional full refresh as a consistency backstop.
    {
        let backend = Arc::clone(&backend);
        let shared = Arc::clone(&shared);
        let ingest_tx = ingest_tx.clone();
        let notice_tx = notice_tx.clone();
        let interval = cfg.poll_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                shared.loading.store(true, Ordering::SeqCst);
                let baseline = shared.events_seen.load(Ordering::SeqCst);
                match backend.list_feedback().await {
                    Ok(records) => {
                        *shared.last_error.lock().unwrap() = None;
                        metrics::counter!("store_polls_total", 1u64, "outcome" => "ok");
                        if ingest_tx.send(IngestMsg::Replace { records, baseline }).await.is_err()
                        {
                            shared.loading.store(false, Ordering::SeqCst);
                            return;
                        }
                    }
                    Err(e) => {
                        // Previous snapshot stays; next tick retries.
                        warn!(error = %e, "feedback refresh failed");
                        metrics::counter!("store_polls_total", 1u64, "outcome" => "err");
                        *shared.last_error.lock().unwrap() = Some(e.to_string());
                        let _ = notice_tx.try_send(Notice::error(
                            "Error",
                            "Could not fetch feedback data. Please try again.",
                        ));
                    }
                }
                shared.loading.store(false, Ordering::SeqCst);
            }
        }));
    }

    // Feed task: subscribe, shape, forward. Re-subscribes with a capped
    // backoff when the subscription ends.
    if cfg.with_feed {
        let backend = Arc::clone(&backend);
        let ingest_tx = ingest_tx.clone();
        tasks.push(tokio::spawn(async move {
            let max_backoff = std::env::var("ATRIO_WATCH_BACKOFF_MAX_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(30);
            let mut backoff = 1u64;
            loop {
                match backend.subscribe().await {
                    Ok(mut sub) => {
                        info!("realtime feed subscribed");
                        backoff = 1;
                        while let Some(raw) = sub.rx.recv().await {
                            if let Some(ev) = atrio_cloud::shape_event(&*backend, raw).await {
                                if ingest_tx.send(IngestMsg::Event(ev)).await.is_err() {
                                    sub.cancel.cancel();
                                    return;
                                }
                            }
                        }
                        warn!("realtime feed ended");
                        sub.cancel.cancel();
                    }
                    Err(e) => warn!(error = %e, "realtime subscribe failed"),
                }
                if ingest_tx.is_closed() {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                backoff = (backoff * 2).min(max_backoff.max(1));
            }
        }));
    }

    SyncHandle {
        snap,
        epoch_rx,
        ingest_tx,
        notice_tx,
        notice_rx: Some(notice_rx),
        shared,
        tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn uid(n: u8) -> atrio_core::Uid {
        let mut u = [0u8; 16];
        u[0] = n;
        u
    }

    fn record(n: u8, name: &str, hotel: &str) -> FeedbackRecord {
        FeedbackRecord {
            id: uid(n),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            hotel_id: Some(uid(200)),
            hotel_name: hotel.to_string(),
            room_number: String::new(),
            stay_date: String::new(),
            ratings: [("staff".to_string(), 4u8)].into_iter().collect(),
            comments: "Pleasant stay overall.".to_string(),
            created_at: chrono::Utc.with_ymd_and_hms(2025, 3, n as u32, 12, 0, 0).unwrap(),
            status: Default::default(),
            user_id: None,
        }
    }

    #[test]
    fn insert_prepends_and_delete_is_idempotent() {
        let mut book = FeedbackBook::new();
        book.apply(ChangeEvent::Inserted(record(1, "Ada", "Grand Plaza")));
        book.apply(ChangeEvent::Inserted(record(2, "Grace", "Grand Plaza")));
        let snap = book.freeze();
        assert_eq!(snap.items[0].name, "Grace");
        assert_eq!(snap.items[1].name, "Ada");

        book.apply(ChangeEvent::Deleted(uid(1)));
        book.apply(ChangeEvent::Deleted(uid(1)));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn update_merges_and_ignores_unknown_ids() {
        let mut book = FeedbackBook::new();
        book.apply(ChangeEvent::Inserted(record(1, "Ada", "Grand Plaza")));

        // Feed updates arrive without the hotel join; the resolved name must
        // survive the merge.
        let mut incoming = record(1, "Ada", UNKNOWN_HOTEL);
        incoming.status = atrio_core::FeedbackStatus::Resolved;
        book.apply(ChangeEvent::Updated(incoming));
        let snap = book.freeze();
        assert_eq!(snap.items[0].hotel_name, "Grand Plaza");
        assert_eq!(snap.items[0].status, atrio_core::FeedbackStatus::Resolved);

        let before = book.freeze();
        book.apply(ChangeEvent::Updated(record(9, "Ghost", "Nowhere")));
        let after = book.freeze();
        assert_eq!(before.items, after.items);
    }

    #[test]
    fn replace_swaps_the_collection() {
        let mut book = FeedbackBook::new();
        book.apply(ChangeEvent::Inserted(record(1, "Ada", "Grand Plaza")));
        book.replace(vec![record(3, "Linus", "Seaside")]);
        let snap = book.freeze();
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.items[0].name, "Linus");
        assert_eq!(snap.epoch, 2);
    }
}
