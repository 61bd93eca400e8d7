//! Atrio filter engine: pure derivation of the admin view from the canonical
//! collection. No I/O here; every call re-derives from the snapshot it is
//! handed.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use atrio_core::{FeedbackRecord, FeedbackStatus, UnknownStatus};

mod select;
mod summary;

pub use select::SelectionSet;
pub use summary::{summarize, Summary};

pub const RATING_FLOOR: f64 = 0.0;
pub const RATING_CEIL: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatusFilter {
    #[default]
    All,
    Only(FeedbackStatus),
}

impl StatusFilter {
    pub fn matches(&self, status: FeedbackStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(s) => *s == status,
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusFilter::All => f.write_str("all"),
            StatusFilter::Only(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(StatusFilter::All);
        }
        s.parse().map(StatusFilter::Only)
    }
}

/// Criteria for the derived view. `Default` is the reset state: match
/// everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Case-insensitive substring over name, email and comments.
    pub search: String,
    /// Inclusive lower bound on `created_at`.
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`, extended to end-of-day.
    pub date_to: Option<DateTime<Utc>>,
    pub status: StatusFilter,
    /// Inclusive bounds on the per-record average rating (unrounded).
    pub min_rating: f64,
    pub max_rating: f64,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            search: String::new(),
            date_from: None,
            date_to: None,
            status: StatusFilter::All,
            min_rating: RATING_FLOOR,
            max_rating: RATING_CEIL,
        }
    }
}

/// Unrounded mean of a record's category scores; 0.0 when none are present.
pub fn record_average(record: &FeedbackRecord) -> f64 {
    if record.ratings.is_empty() {
        return 0.0;
    }
    let total: u32 = record.ratings.values().map(|v| *v as u32).sum();
    total as f64 / record.ratings.len() as f64
}

/// Mean of the per-record means, rounded to one decimal place; 0.0 for an
/// empty list (documented edge case, not an error).
pub fn average_rating(records: &[FeedbackRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let total: f64 = records.iter().map(record_average).sum();
    round_one(total / records.len() as f64)
}

pub(crate) fn round_one(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn end_of_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_milli_opt(23, 59, 59, 999)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(dt)
}

/// Whether one record satisfies every predicate. Exposed so the conjunction
/// can be asserted predicate-by-predicate.
pub fn matches(record: &FeedbackRecord, criteria: &FilterCriteria) -> bool {
    if !criteria.search.is_empty() {
        let needle = criteria.search.to_lowercase();
        let hit = record.name.to_lowercase().contains(&needle)
            || record.email.to_lowercase().contains(&needle)
            || record.comments.to_lowercase().contains(&needle);
        if !hit {
            return false;
        }
    }
    if let Some(from) = criteria.date_from {
        if record.created_at < from {
            return false;
        }
    }
    if let Some(to) = criteria.date_to {
        if record.created_at > end_of_day(to) {
            return false;
        }
    }
    if !criteria.status.matches(record.status) {
        return false;
    }
    let avg = record_average(record);
    criteria.min_rating <= avg && avg <= criteria.max_rating
}

/// Derive the filtered view. Predicates are ANDed; input order is preserved.
pub fn filter_records(items: &[FeedbackRecord], criteria: &FilterCriteria) -> Vec<FeedbackRecord> {
    let started = std::time::Instant::now();
    let out: Vec<FeedbackRecord> =
        items.iter().filter(|r| matches(r, criteria)).cloned().collect();
    metrics::histogram!("filter_eval_ms", started.elapsed().as_secs_f64() * 1000.0);
    metrics::gauge!("filter_view_records", out.len() as f64);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(n: u8, name: &str, comments: &str, scores: &[u8], day: u32) -> FeedbackRecord {
        let mut id = [0u8; 16];
        id[15] = n;
        FeedbackRecord {
            id,
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            hotel_id: None,
            hotel_name: "Grand Plaza".into(),
            room_number: String::new(),
            stay_date: String::new(),
            ratings: scores
                .iter()
                .enumerate()
                .map(|(i, s)| (format!("cat{i}"), *s))
                .collect(),
            comments: comments.to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 3, day, 15, 30, 0).unwrap(),
            status: FeedbackStatus::New,
            user_id: None,
        }
    }

    #[test]
    fn search_is_case_insensitive_over_three_fields() {
        let items = vec![
            record(1, "Ada", "Great pool", &[4], 1),
            record(2, "Grace", "Noisy corridor", &[2], 2),
        ];
        let mut c = FilterCriteria { search: "ADA".into(), ..Default::default() };
        assert_eq!(filter_records(&items, &c).len(), 1);
        c.search = "noisy".into();
        assert_eq!(filter_records(&items, &c)[0].name, "Grace");
        c.search = "example.com".into();
        assert_eq!(filter_records(&items, &c).len(), 2);
        c.search = String::new();
        assert_eq!(filter_records(&items, &c).len(), 2);
    }

    #[test]
    fn date_to_extends_to_end_of_day() {
        let items = vec![record(1, "Ada", "Late checkout", &[4], 5)];
        let c = FilterCriteria {
            date_to: Some(Utc.with_ymd_and_hms(2025, 3, 5, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        // created_at is 15:30 on the bound day; the inclusive bound covers it.
        assert_eq!(filter_records(&items, &c).len(), 1);

        let c = FilterCriteria {
            date_to: Some(Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(filter_records(&items, &c).is_empty());
    }

    #[test]
    fn rating_bounds_use_unrounded_record_average() {
        // Averages 2.0, 3.5 and 5.0; [3,5] keeps the latter two in order.
        let items = vec![
            record(1, "A", "x", &[2, 2], 1),
            record(2, "B", "y", &[3, 4], 2),
            record(3, "C", "z", &[5], 3),
        ];
        let c = FilterCriteria { min_rating: 3.0, max_rating: 5.0, ..Default::default() };
        let out = filter_records(&items, &c);
        let names: Vec<&str> = out.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn filtering_is_idempotent() {
        let items = vec![
            record(1, "Ada", "Great pool", &[4, 5], 1),
            record(2, "Grace", "Noisy corridor", &[2], 2),
            record(3, "Linus", "Fine", &[3, 3, 3], 3),
        ];
        let c = FilterCriteria {
            search: "o".into(),
            min_rating: 2.0,
            max_rating: 4.5,
            ..Default::default()
        };
        let once = filter_records(&items, &c);
        let twice = filter_records(&once, &c);
        assert_eq!(once, twice);
    }

    #[test]
    fn membership_equals_the_predicate_conjunction() {
        let items = vec![
            record(1, "Ada", "Great pool", &[4, 5], 1),
            record(2, "Grace", "Noisy corridor", &[2], 2),
            record(3, "Linus", "Fine stay", &[3, 3, 3], 3),
        ];
        let c = FilterCriteria {
            search: "a".into(),
            date_from: Some(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()),
            date_to: Some(Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap()),
            min_rating: 1.0,
            max_rating: 5.0,
            ..Default::default()
        };
        let out = filter_records(&items, &c);
        for r in &items {
            let in_view = out.iter().any(|o| o.id == r.id);
            assert_eq!(in_view, matches(r, &c), "conjunction broke for {}", r.name);
        }
    }

    #[test]
    fn average_rating_bounds_and_empty_input() {
        let r = record(1, "Ada", "x", &[1, 5, 3], 1);
        let avg = average_rating(std::slice::from_ref(&r));
        assert!((1.0..=5.0).contains(&avg));
        assert_eq!(average_rating(&[]), 0.0);
        assert_eq!(record_average(&record(2, "B", "y", &[], 1)), 0.0);
    }

    #[test]
    fn average_rating_rounds_to_one_decimal() {
        let items = vec![record(1, "A", "x", &[4, 5], 1), record(2, "B", "y", &[2], 2)];
        // (4.5 + 2.0) / 2 = 3.25 -> 3.3 after rounding.
        assert_eq!(average_rating(&items), 3.3);
    }

    #[test]
    fn status_filter_round_trips_from_str() {
        assert_eq!("all".parse::<StatusFilter>().unwrap(), StatusFilter::All);
        assert_eq!(
            "resolved".parse::<StatusFilter>().unwrap(),
            StatusFilter::Only(FeedbackStatus::Resolved)
        );
        assert!("junk".parse::<StatusFilter>().is_err());
    }
}
