use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised at the storage boundary.
///
/// "Row not found" is never an error here: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx response from the hosted store
    #[error("Data store rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed data store response: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(String),

    #[error("Invalid data store configuration: {0}")]
    Config(String),
}

// ============================================================================
// Relations
// ============================================================================

/// The three per-user video lists that share one row shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    WatchLater,
    Favourites,
    History,
}

impl Relation {
    pub const ALL: [Relation; 3] = [Relation::WatchLater, Relation::Favourites, Relation::History];

    /// Table name in the data store.
    pub fn table(self) -> &'static str {
        match self {
            Relation::WatchLater => "watch_later",
            Relation::Favourites => "favourites",
            Relation::History => "history",
        }
    }

    /// Human-readable name for notices.
    pub fn label(self) -> &'static str {
        match self {
            Relation::WatchLater => "watch later",
            Relation::Favourites => "favourites",
            Relation::History => "history",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Rows
// ============================================================================

/// A watch-later, favourite or history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub id: i64,
    pub user_id: String,
    #[serde(deserialize_with = "id_as_string")]
    pub video_id: String,
    pub created_at: DateTime<Utc>,
}

/// A user-owned playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Join row between a playlist and a catalog video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistVideo {
    pub id: i64,
    pub playlist_id: i64,
    #[serde(deserialize_with = "id_as_string")]
    pub video_id: String,
    pub created_at: DateTime<Utc>,
}

/// Display profile kept in the users relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub full_name: String,
    /// Index into the fixed avatar set; 0 means none chosen.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub profile_picture: u8,
}

/// Hosted tables have stored video ids both as text and as integers.
fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    Ok(Option::<u8>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_accepts_numeric_video_id() {
        let entry: CollectionEntry = serde_json::from_str(
            r#"{"id": 3, "user_id": "u-1", "video_id": 12345, "created_at": "2025-03-01T10:00:00.123456+00:00"}"#,
        )
        .unwrap();
        assert_eq!(entry.video_id, "12345");
    }

    #[test]
    fn test_entry_accepts_text_video_id() {
        let entry: CollectionEntry = serde_json::from_str(
            r#"{"id": 3, "user_id": "u-1", "video_id": "987", "created_at": "2025-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(entry.video_id, "987");
    }

    #[test]
    fn test_profile_nulls_become_defaults() {
        let profile: Profile =
            serde_json::from_str(r#"{"full_name": null, "profile_picture": null}"#).unwrap();
        assert_eq!(profile, Profile::default());
    }

    #[test]
    fn test_relation_tables() {
        let tables: Vec<_> = Relation::ALL.iter().map(|r| r.table()).collect();
        assert_eq!(tables, vec!["watch_later", "favourites", "history"]);
    }
}
