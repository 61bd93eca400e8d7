//! Atrio public API façade (in-process).
//!
//! Frontends depend on the [`AtrioApi`] trait and its types; the in-process
//! implementation wires the cloud backend, sync controller, filter engine,
//! selection tracker and export engine together. Every failure path ends in
//! a user-visible notice on the sync controller's notice channel.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::info;

use atrio_cloud::{BackendError, FeedbackBackend};
use atrio_core::{
    uid_string, validate_submission, FeedbackRecord, FeedbackSnapshot, FeedbackStatus,
    NewFeedback, Notice, Uid,
};
use atrio_export::ExportError;
use atrio_filter::{filter_records, summarize, SelectionSet};
use atrio_persist::{MetaStore, SqliteMeta};
use atrio_store::{spawn_sync, IngestMsg, SyncHandle};

pub use atrio_cloud::{Hotel, MemoryBackend, RestBackend, RestConfig};
pub use atrio_core::ChangeEvent;
pub use atrio_export::{BackupReceipt, ExportedReport};
pub use atrio_filter::{FilterCriteria, StatusFilter, Summary};
pub use atrio_store::SyncConfig;

/// API errors suitable for transport over RPC later.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum AtrioError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("backend: {0}")]
    Backend(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type AtrioResult<T> = Result<T, AtrioError>;

impl From<BackendError> for AtrioError {
    fn from(e: BackendError) -> Self {
        AtrioError::Backend(e.to_string())
    }
}

impl From<ExportError> for AtrioError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::NothingSelected => {
                AtrioError::Validation("no feedback rows selected".into())
            }
            other => AtrioError::Internal(other.to_string()),
        }
    }
}

/// Runtime configuration exposed to frontends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Stats {
    pub poll_secs: u64,
    pub queue_cap: usize,
    pub watch_backoff_max_secs: u64,
    pub db_path: Option<String>,
    pub export_dir: String,
    pub metrics_addr: Option<String>,
}

/// Declarative Atrio API surface. Reads are synchronous snapshot loads;
/// anything that talks to the store is async.
#[async_trait::async_trait]
pub trait AtrioApi: Send + Sync {
    fn snapshot(&self) -> Arc<FeedbackSnapshot>;

    fn subscribe_epoch(&self) -> watch::Receiver<u64>;

    /// Manual full refresh, staleness-checked like the periodic poll.
    async fn refresh(&self) -> AtrioResult<()>;

    fn criteria(&self) -> FilterCriteria;

    /// Install new criteria. Selection is pruned to the rows still visible.
    fn set_criteria(&self, criteria: FilterCriteria);

    fn reset_filters(&self);

    /// Derive the filtered view from the current snapshot.
    fn filtered(&self) -> Vec<FeedbackRecord>;

    fn toggle_row(&self, id: Uid);

    fn select_all(&self);

    fn selected(&self) -> Vec<Uid>;

    /// Persist a status change, then reflect it locally. The local mirror is
    /// only touched after the store confirmed the write.
    async fn update_status(&self, id: Uid, status: FeedbackStatus) -> AtrioResult<()>;

    fn export_record(&self, id: &Uid) -> AtrioResult<ExportedReport>;

    fn export_selected(&self) -> AtrioResult<ExportedReport>;

    fn backup(&self) -> AtrioResult<BackupReceipt>;

    fn last_backup(&self) -> Option<String>;

    fn summary(&self) -> Summary;

    fn stats(&self) -> Stats;

    async fn submit(&self, submission: NewFeedback) -> AtrioResult<Uid>;
}

struct ViewState {
    criteria: FilterCriteria,
    selection: SelectionSet,
}

impl ViewState {
    fn new() -> Self {
        Self { criteria: FilterCriteria::default(), selection: SelectionSet::new() }
    }
}

// ----------------- In-process implementation -----------------

pub struct InProcApi {
    backend: Arc<dyn FeedbackBackend>,
    sync: SyncHandle,
    cfg: SyncConfig,
    view: Mutex<ViewState>,
    meta: Arc<dyn MetaStore>,
    export_dir: PathBuf,
}

impl InProcApi {
    /// Start the sync controller and hand back the façade plus the notice
    /// stream the frontend should drain.
    pub fn start(
        backend: Arc<dyn FeedbackBackend>,
        cfg: SyncConfig,
    ) -> anyhow::Result<(Self, mpsc::Receiver<Notice>)> {
        let meta: Arc<dyn MetaStore> = Arc::new(SqliteMeta::open_default()?);
        let export_dir = std::env::var("ATRIO_EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self::start_with(backend, cfg, meta, export_dir)
    }

    pub fn start_with(
        backend: Arc<dyn FeedbackBackend>,
        cfg: SyncConfig,
        meta: Arc<dyn MetaStore>,
        export_dir: PathBuf,
    ) -> anyhow::Result<(Self, mpsc::Receiver<Notice>)> {
        let mut sync = spawn_sync(backend.clone(), cfg.clone());
        let notices =
            sync.take_notices().ok_or_else(|| anyhow::anyhow!("notice stream already taken"))?;
        info!(poll_secs = cfg.poll_interval.as_secs(), "api: sync controller started");
        let api = Self {
            backend,
            sync,
            cfg,
            view: Mutex::new(ViewState::new()),
            meta,
            export_dir,
        };
        Ok((api, notices))
    }

    pub fn shutdown(self) {
        self.sync.shutdown();
    }

    fn notify(&self, notice: Notice) {
        let _ = self.sync.notifier().try_send(notice);
    }
}

#[async_trait::async_trait]
impl AtrioApi for InProcApi {
    fn snapshot(&self) -> Arc<FeedbackSnapshot> {
        self.sync.snapshot()
    }

    fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.sync.subscribe_epoch()
    }

    async fn refresh(&self) -> AtrioResult<()> {
        let t0 = Instant::now();
        let baseline = self.sync.events_seen();
        match self.backend.list_feedback().await {
            Ok(records) => {
                info!(rows = records.len(), took_ms = %t0.elapsed().as_millis(), "api: refresh ok");
                self.sync
                    .ingest()
                    .send(IngestMsg::Replace { records, baseline })
                    .await
                    .map_err(|_| AtrioError::Internal("sync controller stopped".into()))
            }
            Err(e) => {
                self.notify(Notice::error(
                    "Error",
                    "Could not fetch feedback data. Please try again.",
                ));
                Err(e.into())
            }
        }
    }

    fn criteria(&self) -> FilterCriteria {
        self.view.lock().unwrap().criteria.clone()
    }

    fn set_criteria(&self, criteria: FilterCriteria) {
        let visible: Vec<Uid> = filter_records(&self.sync.snapshot().items, &criteria)
            .iter()
            .map(|r| r.id)
            .collect();
        let mut view = self.view.lock().unwrap();
        view.criteria = criteria;
        view.selection.retain_visible(&visible);
    }

    fn reset_filters(&self) {
        self.set_criteria(FilterCriteria::default());
    }

    fn filtered(&self) -> Vec<FeedbackRecord> {
        let criteria = self.criteria();
        filter_records(&self.sync.snapshot().items, &criteria)
    }

    fn toggle_row(&self, id: Uid) {
        self.view.lock().unwrap().selection.toggle(id);
    }

    fn select_all(&self) {
        let criteria = self.criteria();
        let visible: Vec<Uid> = filter_records(&self.sync.snapshot().items, &criteria)
            .iter()
            .map(|r| r.id)
            .collect();
        self.view.lock().unwrap().selection.select_all(&visible);
    }

    fn selected(&self) -> Vec<Uid> {
        self.view.lock().unwrap().selection.ids()
    }

    async fn update_status(&self, id: Uid, status: FeedbackStatus) -> AtrioResult<()> {
        // Unknown ids are a caller error; reject before any I/O.
        let snapshot = self.sync.snapshot();
        let Some(existing) = snapshot.get(&id) else {
            return Err(AtrioError::NotFound(format!("no feedback row {}", uid_string(&id))));
        };
        match self.backend.update_status(id, status).await {
            Ok(()) => {
                let mut updated = existing.clone();
                updated.status = status;
                self.sync
                    .ingest()
                    .send(IngestMsg::Event(ChangeEvent::Updated(updated)))
                    .await
                    .map_err(|_| AtrioError::Internal("sync controller stopped".into()))?;
                metrics::counter!("api_status_updates_total", 1u64, "outcome" => "ok");
                self.notify(Notice::success(
                    "Status Updated",
                    "The feedback status has been updated successfully.",
                ));
                Ok(())
            }
            Err(e) => {
                metrics::counter!("api_status_updates_total", 1u64, "outcome" => "err");
                self.notify(Notice::error(
                    "Error",
                    "Failed to update status. Please try again.",
                ));
                Err(e.into())
            }
        }
    }

    fn export_record(&self, id: &Uid) -> AtrioResult<ExportedReport> {
        let snapshot = self.sync.snapshot();
        let Some(record) = snapshot.get(id) else {
            return Err(AtrioError::NotFound(format!("no feedback row {}", uid_string(id))));
        };
        match atrio_export::export_one(record, &self.export_dir) {
            Ok(out) => {
                self.notify(Notice::success(
                    "Export Complete",
                    "The feedback report has been exported as a PDF.",
                ));
                Ok(out)
            }
            Err(e) => {
                self.notify(Notice::error(
                    "Export Failed",
                    "Could not generate the PDF. Please try again.",
                ));
                Err(e.into())
            }
        }
    }

    fn export_selected(&self) -> AtrioResult<ExportedReport> {
        let selected = self.view.lock().unwrap().selection.clone();
        let snapshot = self.sync.snapshot();
        // Snapshot order (newest first) carries into the report.
        let records: Vec<FeedbackRecord> = snapshot
            .items
            .iter()
            .filter(|r| selected.contains(&r.id))
            .cloned()
            .collect();
        match atrio_export::export_many(&records, &self.export_dir, Utc::now()) {
            Ok(out) => {
                let body = if out.records == 1 {
                    "The feedback report has been exported as a PDF.".to_string()
                } else {
                    format!("{} feedback entries have been exported as a PDF.", out.records)
                };
                self.notify(Notice::success("Export Complete", body));
                Ok(out)
            }
            Err(ExportError::NothingSelected) => {
                self.notify(Notice::error(
                    "No Rows Selected",
                    "Please select at least one feedback entry to export.",
                ));
                Err(ExportError::NothingSelected.into())
            }
            Err(e) => {
                self.notify(Notice::error(
                    "Export Failed",
                    "Could not generate the PDF. Please try again.",
                ));
                Err(e.into())
            }
        }
    }

    fn backup(&self) -> AtrioResult<BackupReceipt> {
        let snapshot = self.sync.snapshot();
        match atrio_export::backup_all(&snapshot.items, &self.export_dir, &*self.meta, Utc::now())
        {
            Ok(receipt) => {
                self.notify(Notice::success(
                    "Backup Complete",
                    "All feedback data has been backed up successfully.",
                ));
                Ok(receipt)
            }
            Err(e) => {
                self.notify(Notice::error(
                    "Backup Failed",
                    "Could not create the backup. Please try again.",
                ));
                Err(e.into())
            }
        }
    }

    fn last_backup(&self) -> Option<String> {
        atrio_export::last_backup(&*self.meta)
    }

    fn summary(&self) -> Summary {
        summarize(&self.sync.snapshot().items)
    }

    fn stats(&self) -> Stats {
        let watch_backoff_max_secs = std::env::var("ATRIO_WATCH_BACKOFF_MAX_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        Stats {
            poll_secs: self.cfg.poll_interval.as_secs(),
            queue_cap: self.cfg.queue_cap,
            watch_backoff_max_secs,
            db_path: std::env::var("ATRIO_DB_PATH").ok(),
            export_dir: self.export_dir.display().to_string(),
            metrics_addr: std::env::var("ATRIO_METRICS_ADDR").ok(),
        }
    }

    async fn submit(&self, submission: NewFeedback) -> AtrioResult<Uid> {
        if let Err(e) = validate_submission(&submission) {
            self.notify(Notice::error("Submission Failed", e.to_string()));
            return Err(AtrioError::Validation(e.to_string()));
        }
        match self.backend.submit(submission).await {
            Ok(id) => {
                self.notify(Notice::success(
                    "Feedback Submitted",
                    "Thank you for your valuable feedback!",
                ));
                Ok(id)
            }
            Err(e) => {
                self.notify(Notice::error(
                    "Submission Failed",
                    "There was an error submitting your feedback. Please try again.",
                ));
                Err(e.into())
            }
        }
    }
}

// ----------------- Mock implementation -----------------

/// Canned implementation for frontend tests: view state is real, everything
/// that would touch the store is scripted.
pub struct MockApi {
    pub snapshot: Arc<FeedbackSnapshot>,
    pub stats: Stats,
    pub last_backup: Option<String>,
    pub exported: Option<ExportedReport>,
    pub backup_receipt: Option<BackupReceipt>,
    pub updated: Mutex<Vec<(Uid, FeedbackStatus)>>,
    view: Mutex<ViewState>,
    epoch_tx: watch::Sender<u64>,
}

impl Default for MockApi {
    fn default() -> Self {
        let (epoch_tx, _) = watch::channel(0);
        Self {
            snapshot: Arc::new(FeedbackSnapshot::default()),
            stats: Stats::default(),
            last_backup: None,
            exported: None,
            backup_receipt: None,
            updated: Mutex::new(Vec::new()),
            view: Mutex::new(ViewState::new()),
            epoch_tx,
        }
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: FeedbackSnapshot) -> Self {
        Self { snapshot: Arc::new(snapshot), ..Self::default() }
    }
}

#[async_trait::async_trait]
impl AtrioApi for MockApi {
    fn snapshot(&self) -> Arc<FeedbackSnapshot> {
        Arc::clone(&self.snapshot)
    }

    fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_tx.subscribe()
    }

    async fn refresh(&self) -> AtrioResult<()> {
        Ok(())
    }

    fn criteria(&self) -> FilterCriteria {
        self.view.lock().unwrap().criteria.clone()
    }

    fn set_criteria(&self, criteria: FilterCriteria) {
        let visible: Vec<Uid> =
            filter_records(&self.snapshot.items, &criteria).iter().map(|r| r.id).collect();
        let mut view = self.view.lock().unwrap();
        view.criteria = criteria;
        view.selection.retain_visible(&visible);
    }

    fn reset_filters(&self) {
        self.set_criteria(FilterCriteria::default());
    }

    fn filtered(&self) -> Vec<FeedbackRecord> {
        filter_records(&self.snapshot.items, &self.criteria())
    }

    fn toggle_row(&self, id: Uid) {
        self.view.lock().unwrap().selection.toggle(id);
    }

    fn select_all(&self) {
        let visible: Vec<Uid> = self.filtered().iter().map(|r| r.id).collect();
        self.view.lock().unwrap().selection.select_all(&visible);
    }

    fn selected(&self) -> Vec<Uid> {
        self.view.lock().unwrap().selection.ids()
    }

    async fn update_status(&self, id: Uid, status: FeedbackStatus) -> AtrioResult<()> {
        self.updated.lock().unwrap().push((id, status));
        Ok(())
    }

    fn export_record(&self, _id: &Uid) -> AtrioResult<ExportedReport> {
        self.exported.clone().ok_or_else(|| AtrioError::Internal("no export configured".into()))
    }

    fn export_selected(&self) -> AtrioResult<ExportedReport> {
        if self.selected().is_empty() {
            return Err(AtrioError::Validation("no feedback rows selected".into()));
        }
        self.exported.clone().ok_or_else(|| AtrioError::Internal("no export configured".into()))
    }

    fn backup(&self) -> AtrioResult<BackupReceipt> {
        self.backup_receipt
            .clone()
            .ok_or_else(|| AtrioError::Internal("no backup configured".into()))
    }

    fn last_backup(&self) -> Option<String> {
        self.last_backup.clone()
    }

    fn summary(&self) -> Summary {
        summarize(&self.snapshot.items)
    }

    fn stats(&self) -> Stats {
        self.stats.clone()
    }

    async fn submit(&self, submission: NewFeedback) -> AtrioResult<Uid> {
        validate_submission(&submission).map_err(|e| AtrioError::Validation(e.to_string()))?;
        Ok([0u8; 16])
    }
}
