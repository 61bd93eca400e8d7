//! Submission-boundary validation. Records already in the store are trusted;
//! these checks gate new guest submissions only.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::record::{opt_uid_as_str, Ratings, RATING_MAX, RATING_MIN};
use crate::Uid;

pub const MIN_COMMENT_CHARS: usize = 10;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

/// A guest submission before the store has assigned `id` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeedback {
    pub name: String,
    pub email: String,
    #[serde(with = "opt_uid_as_str", default)]
    pub hotel_id: Option<Uid>,
    pub room_number: String,
    pub stay_date: String,
    pub ratings: Ratings,
    pub comments: String,
    #[serde(with = "opt_uid_as_str", default)]
    pub user_id: Option<Uid>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("email address is not valid: {0:?}")]
    BadEmail(String),
    #[error("comments must be at least {} characters", MIN_COMMENT_CHARS)]
    ShortComments,
    #[error("at least one rating category is required")]
    NoRatings,
    #[error("rating for {0:?} out of range: {1} (expected 1-5)")]
    RatingOutOfRange(String, u8),
}

pub fn validate_submission(new: &NewFeedback) -> Result<(), ValidationError> {
    if new.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if !EMAIL_RE.is_match(new.email.trim()) {
        return Err(ValidationError::BadEmail(new.email.clone()));
    }
    if new.comments.trim().chars().count() < MIN_COMMENT_CHARS {
        return Err(ValidationError::ShortComments);
    }
    if new.ratings.is_empty() {
        return Err(ValidationError::NoRatings);
    }
    for (category, score) in &new.ratings {
        if !(RATING_MIN..=RATING_MAX).contains(score) {
            return Err(ValidationError::RatingOutOfRange(category.clone(), *score));
        }
    }
    Ok(())
}
