//! In-memory backend: scripted stand-in for the hosted store, used by tests
//! and offline demos.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};

use atrio_core::{uid_string, FeedbackRecord, FeedbackStatus, NewFeedback, Uid, UNKNOWN_HOTEL};

use crate::{BackendError, CancelHandle, FeedEvent, FeedSubscription, FeedbackBackend, Hotel};

pub struct MemoryBackend {
    records: Mutex<Vec<FeedbackRecord>>,
    hotels: Mutex<Vec<Hotel>>,
    feed_tx: broadcast::Sender<FeedEvent>,
    fail_lists: AtomicBool,
    fail_updates: AtomicBool,
    fail_hotel_lookups: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        let (feed_tx, _) = broadcast::channel(256);
        Self {
            records: Mutex::new(Vec::new()),
            hotels: Mutex::new(Vec::new()),
            feed_tx,
            fail_lists: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fail_hotel_lookups: AtomicBool::new(false),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scripted collection, newest first.
    pub fn seed_records(&self, records: Vec<FeedbackRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn seed_hotels(&self, hotels: Vec<Hotel>) {
        *self.hotels.lock().unwrap() = hotels;
    }

    /// Deliver a raw payload to every live subscription.
    pub fn push_event(&self, ev: FeedEvent) {
        let _ = self.feed_tx.send(ev);
    }

    pub fn records(&self) -> Vec<FeedbackRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn fail_lists(&self, on: bool) {
        self.fail_lists.store(on, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, on: bool) {
        self.fail_updates.store(on, Ordering::SeqCst);
    }

    pub fn fail_hotel_lookups(&self, on: bool) {
        self.fail_hotel_lookups.store(on, Ordering::SeqCst);
    }

    fn scripted_failure(flag: &AtomicBool, what: &str) -> Result<(), BackendError> {
        if flag.load(Ordering::SeqCst) {
            return Err(BackendError::Api { status: 503, body: format!("scripted {what} failure") });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FeedbackBackend for MemoryBackend {
    async fn list_feedback(&self) -> Result<Vec<FeedbackRecord>, BackendError> {
        Self::scripted_failure(&self.fail_lists, "list")?;
        Ok(self.records())
    }

    async fn update_status(
        &self,
        id: Uid,
        status: FeedbackStatus,
    ) -> Result<(), BackendError> {
        Self::scripted_failure(&self.fail_updates, "update")?;
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.status = status;
                Ok(())
            }
            None => Err(BackendError::Api {
                status: 404,
                body: format!("no feedback row {}", uid_string(&id)),
            }),
        }
    }

    async fn hotel_name(&self, id: Uid) -> Result<Option<String>, BackendError> {
        Self::scripted_failure(&self.fail_hotel_lookups, "hotel lookup")?;
        Ok(self.hotels.lock().unwrap().iter().find(|h| h.id == id).map(|h| h.name.clone()))
    }

    async fn list_hotels(&self) -> Result<Vec<Hotel>, BackendError> {
        Ok(self.hotels.lock().unwrap().clone())
    }

    async fn submit(&self, submission: NewFeedback) -> Result<Uid, BackendError> {
        let id = *uuid::Uuid::new_v4().as_bytes();
        let hotel_name = match submission.hotel_id {
            Some(hid) => self.hotel_name(hid).await?.unwrap_or_else(|| UNKNOWN_HOTEL.into()),
            None => UNKNOWN_HOTEL.into(),
        };
        let record = FeedbackRecord {
            id,
            name: submission.name,
            email: submission.email,
            hotel_id: submission.hotel_id,
            hotel_name,
            room_number: submission.room_number,
            stay_date: submission.stay_date,
            ratings: submission.ratings,
            comments: submission.comments,
            created_at: Utc::now(),
            status: FeedbackStatus::New,
            user_id: submission.user_id,
        };
        self.records.lock().unwrap().insert(0, record);
        Ok(id)
    }

    async fn subscribe(&self) -> Result<FeedSubscription, BackendError> {
        let (tx, rx) = mpsc::channel(256);
        let mut feed_rx = self.feed_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match feed_rx.recv().await {
                    Ok(ev) => {
                        if tx.send(ev).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(FeedSubscription { rx, cancel: CancelHandle::for_task(task) })
    }
}
