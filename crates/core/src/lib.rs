//! Atrio core types: feedback records, change events, snapshots.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

mod record;
mod validate;

pub use record::{
    opt_uid_as_str, uid_as_str, FeedbackRecord, FeedbackStatus, Ratings, UnknownStatus,
    ANONYMOUS_GUEST, RATING_CATEGORIES, RATING_MAX, RATING_MIN, UNKNOWN_HOTEL,
};
pub use validate::{validate_submission, NewFeedback, ValidationError, MIN_COMMENT_CHARS};

/// Canonical record identifier: the remote store's uuid, as raw bytes.
pub type Uid = [u8; 16];

pub fn parse_uid(s: &str) -> Option<Uid> {
    uuid::Uuid::parse_str(s).ok().map(|u| *u.as_bytes())
}

pub fn uid_string(uid: &Uid) -> String {
    uuid::Uuid::from_bytes(*uid).to_string()
}

/// One change against the remote feedback collection, already shaped into a
/// fully-populated record. Both the realtime feed and confirmed local
/// mutations reduce through this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChangeEvent {
    Inserted(FeedbackRecord),
    Updated(FeedbackRecord),
    Deleted(Uid),
}

impl ChangeEvent {
    pub fn uid(&self) -> Uid {
        match self {
            ChangeEvent::Inserted(r) | ChangeEvent::Updated(r) => r.id,
            ChangeEvent::Deleted(uid) => *uid,
        }
    }
}

/// Immutable view of the canonical collection, ordered by `created_at`
/// descending. Swapped wholesale by the sync controller; readers never see a
/// half-applied change.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedbackSnapshot {
    pub epoch: u64,
    pub items: Vec<FeedbackRecord>,
}

impl FeedbackSnapshot {
    pub fn get(&self, uid: &Uid) -> Option<&FeedbackRecord> {
        self.items.iter().find(|r| &r.id == uid)
    }

    pub fn ids(&self) -> Vec<Uid> {
        self.items.iter().map(|r| r.id).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    Info,
    Success,
    Warn,
    Error,
}

/// User-visible, non-blocking notification. Every failure path in the
/// pipeline ends in one of these instead of an unhandled fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub body: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Info, title: title.into(), body: body.into() }
    }
    pub fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Success, title: title.into(), body: body.into() }
    }
    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Error, title: title.into(), body: body.into() }
    }
}

pub mod prelude {
    pub use super::{
        ChangeEvent, FeedbackRecord, FeedbackSnapshot, FeedbackStatus, Notice, NoticeKind,
        Ratings, Uid,
    };
}
