//! Collection-level stats for the dashboard's summary cards.

use serde::Serialize;

use atrio_core::{FeedbackRecord, FeedbackStatus};

use crate::average_rating;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub new: usize,
    pub in_progress: usize,
    pub resolved: usize,
    /// Mean of per-record means, one decimal place.
    pub average_rating: f64,
}

pub fn summarize(items: &[FeedbackRecord]) -> Summary {
    let mut by_status = [0usize; 3];
    for r in items {
        let slot = match r.status {
            FeedbackStatus::New => 0,
            FeedbackStatus::InProgress => 1,
            FeedbackStatus::Resolved => 2,
        };
        by_status[slot] += 1;
    }
    Summary {
        total: items.len(),
        new: by_status[0],
        in_progress: by_status[1],
        resolved: by_status[2],
        average_rating: average_rating(items),
    }
}
