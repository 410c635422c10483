//! Tracker entry models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Maximum number of entries accepted in one create call.
pub const MAX_ENTRIES_PER_REQUEST: usize = 500;

/// Caller-supplied entry, before the team id is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewEntry {
    pub project_id: Uuid,
    #[serde(default)]
    pub assigned_id: Option<Uuid>,
    pub date: NaiveDate,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stop: Option<DateTime<Utc>>,
    /// Tracked time in seconds.
    #[validate(range(min = 0))]
    pub duration: i64,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

/// Body of a create call: a bare JSON array of entries.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(transparent)]
pub struct CreateEntriesRequest {
    #[validate(length(min = 1, max = 500), nested)]
    pub entries: Vec<NewEntry>,
}

impl From<Vec<NewEntry>> for CreateEntriesRequest {
    fn from(entries: Vec<NewEntry>) -> Self {
        Self { entries }
    }
}

/// Entry with the owning team attached, ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedEntry {
    #[serde(flatten)]
    pub entry: NewEntry,
    pub team_id: String,
}

/// Stored row of `tracker_entries`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub id: Uuid,
    pub team_id: String,
    pub project_id: Uuid,
    pub assigned_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start: Option<DateTime<Utc>>,
    pub stop: Option<DateTime<Utc>>,
    pub duration: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Attach `team_id` to every entry, preserving order.
pub fn stamp_entries(entries: Vec<NewEntry>, team_id: &str) -> Vec<StampedEntry> {
    entries
        .into_iter()
        .map(|entry| StampedEntry {
            entry,
            team_id: team_id.to_string(),
        })
        .collect()
}
