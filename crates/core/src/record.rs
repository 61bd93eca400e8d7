use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{parse_uid, Uid};

pub const UNKNOWN_HOTEL: &str = "Unknown Hotel";
pub const ANONYMOUS_GUEST: &str = "Anonymous";

pub const RATING_MIN: u8 = 1;
pub const RATING_MAX: u8 = 5;

/// Categories the submission form renders. The store may hand back extra
/// keys; they are kept as-is.
pub const RATING_CATEGORIES: [&str; 7] =
    ["cleanliness", "staff", "comfort", "amenities", "value", "food", "location"];

/// Category name -> score in [1,5]. BTreeMap keeps backup serialization
/// deterministic.
pub type Ratings = BTreeMap<String, u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedbackStatus {
    #[default]
    New,
    InProgress,
    Resolved,
}

impl FeedbackStatus {
    pub const ALL: [FeedbackStatus; 3] =
        [FeedbackStatus::New, FeedbackStatus::InProgress, FeedbackStatus::Resolved];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::New => "new",
            FeedbackStatus::InProgress => "in-progress",
            FeedbackStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for FeedbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown status: {0:?} (expected new, in-progress or resolved)")]
pub struct UnknownStatus(pub String);

impl FromStr for FeedbackStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(FeedbackStatus::New),
            "in-progress" => Ok(FeedbackStatus::InProgress),
            "resolved" => Ok(FeedbackStatus::Resolved),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl Serialize for FeedbackStatus {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FeedbackStatus {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub mod uid_as_str {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::{parse_uid, uid_string, Uid};

    pub fn serialize<S: Serializer>(uid: &Uid, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&uid_string(uid))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Uid, D::Error> {
        let raw = String::deserialize(d)?;
        parse_uid(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid uuid: {raw}")))
    }
}

pub mod opt_uid_as_str {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::{parse_uid, uid_string, Uid};

    pub fn serialize<S: Serializer>(uid: &Option<Uid>, s: S) -> Result<S::Ok, S::Error> {
        match uid {
            Some(u) => s.serialize_some(&uid_string(u)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Uid>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(r) => parse_uid(&r)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid uuid: {r}"))),
        }
    }
}

/// One guest submission, fully populated. Shaping from a raw store row goes
/// through [`FeedbackRecord::from_row`], which is the only place defaults are
/// applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    #[serde(with = "uid_as_str")]
    pub id: Uid,
    pub name: String,
    pub email: String,
    #[serde(with = "opt_uid_as_str", default)]
    pub hotel_id: Option<Uid>,
    pub hotel_name: String,
    pub room_number: String,
    pub stay_date: String,
    pub ratings: Ratings,
    pub comments: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: FeedbackStatus,
    #[serde(with = "opt_uid_as_str", default)]
    pub user_id: Option<Uid>,
}

impl FeedbackRecord {
    /// Shape a raw store row into a record. Returns `None` only when the row
    /// has no parseable id; every other missing or malformed field gets its
    /// documented default. The joined hotel name is read from `hotels.name`
    /// (list responses) or `hotel_name` (already-shaped payloads), falling
    /// back to "Unknown Hotel".
    pub fn from_row(row: &serde_json::Value) -> Option<Self> {
        let id = parse_uid(row.get("id")?.as_str()?)?;
        let hotel_name = row
            .pointer("/hotels/name")
            .and_then(|v| v.as_str())
            .or_else(|| row.get("hotel_name").and_then(|v| v.as_str()))
            .unwrap_or(UNKNOWN_HOTEL)
            .to_string();
        Some(FeedbackRecord {
            id,
            name: non_empty(row, "name", ANONYMOUS_GUEST),
            email: non_empty(row, "email", ""),
            hotel_id: row.get("hotel_id").and_then(|v| v.as_str()).and_then(parse_uid),
            hotel_name,
            room_number: non_empty(row, "room_number", ""),
            stay_date: non_empty(row, "stay_date", ""),
            ratings: parse_ratings(row.get("ratings")),
            comments: non_empty(row, "comments", ""),
            created_at: parse_created_at(row.get("created_at")),
            status: row
                .get("status")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            user_id: row.get("user_id").and_then(|v| v.as_str()).and_then(parse_uid),
        })
    }
}

fn non_empty(row: &serde_json::Value, key: &str, fallback: &str) -> String {
    row.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Keep only integer scores in [1,5]; anything else in the payload is noise.
fn parse_ratings(v: Option<&serde_json::Value>) -> Ratings {
    let mut out = Ratings::new();
    if let Some(map) = v.and_then(|v| v.as_object()) {
        for (k, v) in map {
            if let Some(n) = v.as_u64() {
                if (RATING_MIN as u64..=RATING_MAX as u64).contains(&n) {
                    out.insert(k.clone(), n as u8);
                }
            }
        }
    }
    out
}

fn parse_created_at(v: Option<&serde_json::Value>) -> DateTime<Utc> {
    v.and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
