//! Atrio cloud integration: the hosted feedback store's REST surface and its
//! realtime change feed, behind one trait so the sync controller never sees
//! transport details.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use atrio_core::{FeedbackRecord, FeedbackStatus, NewFeedback, Uid};

mod feed;
mod memory;
mod rest;

pub use feed::shape_event;
pub use memory::MemoryBackend;
pub use rest::{RestBackend, RestConfig};

/// Errors from the hosted-store integration layer.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request itself failed (network, DNS, TLS).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The store returned a non-2xx status code.
    #[error("store API error ({status}): {body}")]
    Api {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    #[error("realtime socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("row is missing a usable id")]
    MissingId,
}

/// A hotel row, as joined into feedback listings and offered by the
/// submission form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    #[serde(with = "atrio_core::uid_as_str")]
    pub id: Uid,
    pub name: String,
}

/// Operation kind of a realtime change payload, as the store names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeedOp {
    Insert,
    Update,
    Delete,
}

/// One raw realtime payload, before shaping. `record` carries the new row
/// for inserts/updates; `old_record` carries at least the id for deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEvent {
    #[serde(rename = "type")]
    pub op: FeedOp,
    #[serde(default)]
    pub record: serde_json::Value,
    #[serde(default)]
    pub old_record: serde_json::Value,
}

/// Aborts the underlying task when cancelled or dropped via [`cancel`].
///
/// [`cancel`]: CancelHandle::cancel
pub struct CancelHandle {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl CancelHandle {
    pub fn noop() -> Self {
        Self { task: None }
    }

    pub fn for_task(task: tokio::task::JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn cancel(mut self) {
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

/// A live subscription to the store's change feed.
pub struct FeedSubscription {
    pub rx: mpsc::Receiver<FeedEvent>,
    pub cancel: CancelHandle,
}

/// The hosted feedback store, as the rest of the pipeline sees it.
#[async_trait::async_trait]
pub trait FeedbackBackend: Send + Sync {
    /// Every feedback row, hotel name joined, ordered by creation time
    /// descending.
    async fn list_feedback(&self) -> Result<Vec<FeedbackRecord>, BackendError>;

    /// Persist a status change for one record.
    async fn update_status(&self, id: Uid, status: FeedbackStatus)
        -> Result<(), BackendError>;

    /// Resolve a hotel's display name. `Ok(None)` when the row is gone.
    async fn hotel_name(&self, id: Uid) -> Result<Option<String>, BackendError>;

    async fn list_hotels(&self) -> Result<Vec<Hotel>, BackendError>;

    /// Create a new feedback row; the store assigns id and creation time.
    async fn submit(&self, submission: NewFeedback) -> Result<Uid, BackendError>;

    /// Subscribe to insert/update/delete payloads for the feedback table.
    async fn subscribe(&self) -> Result<FeedSubscription, BackendError>;
}
