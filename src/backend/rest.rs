use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::types::{CollectionEntry, Playlist, PlaylistVideo, Profile, Relation, StoreError};
use super::UserDataStore;
use crate::auth::TokenSlot;
use crate::util::validate_base_url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const RETURN_REPRESENTATION: &str = "return=representation";
const UPSERT: &str = "resolution=merge-duplicates,return=representation";

/// User data kept in the hosted backend, reached through its REST interface.
///
/// Requests carry the project's anon key and, once signed in, the session's
/// access token (row-level security scopes every table to its owner).
///
/// Multi-step operations are sequential requests with no transaction. See
/// [`RestStore::delete_playlist`] for the one place this matters.
#[derive(Clone)]
pub struct RestStore {
    http: reqwest::Client,
    base_url: Url,
    anon_key: SecretString,
    tokens: TokenSlot,
    timeout: Duration,
}

impl std::fmt::Debug for RestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStore")
            .field("base_url", &self.base_url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl RestStore {
    /// `project_url` is the backend project root; tables live under `rest/v1/`.
    pub fn new(
        http: reqwest::Client,
        project_url: &str,
        anon_key: SecretString,
        tokens: TokenSlot,
    ) -> Result<Self, StoreError> {
        let base_url = validate_base_url(project_url)
            .and_then(|u| Ok(u.join("rest/v1/")?))
            .map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            anon_key,
            tokens,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        self.base_url
            .join(table)
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self
            .tokens
            .get()
            .unwrap_or_else(|| self.anon_key.clone());
        request
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(bearer.expose_secret())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, StoreError> {
        let response = tokio::time::timeout(self.timeout, self.authorize(request).send())
            .await
            .map_err(|_| StoreError::Timeout(self.timeout.as_secs()))??;

        let status = response.status();
        let body = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| StoreError::Timeout(self.timeout.as_secs()))??;

        if !status.is_success() {
            let message = error_message(&body);
            tracing::warn!(status = status.as_u16(), message = %message, "Data store request rejected");
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body.to_vec())
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        tracing::debug!(table = table, params = ?params, "Data store select");
        let request = self
            .http
            .get(self.table_url(table)?)
            .query(&[("select", "*")])
            .query(params);
        decode(&self.send(request).await?)
    }

    async fn insert<T: DeserializeOwned>(
        &self,
        table: &str,
        row: &Value,
        params: &[(&str, String)],
        prefer: &str,
    ) -> Result<T, StoreError> {
        tracing::debug!(table = table, "Data store insert");
        let request = self
            .http
            .post(self.table_url(table)?)
            .query(params)
            .header("Prefer", prefer)
            .json(row);
        let rows: Vec<T> = decode(&self.send(request).await?)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode(format!("insert into {table} returned no row")))
    }

    /// Delete matching rows and report how many went.
    async fn delete(&self, table: &str, params: &[(&str, String)]) -> Result<u64, StoreError> {
        tracing::debug!(table = table, params = ?params, "Data store delete");
        let request = self
            .http
            .delete(self.table_url(table)?)
            .query(params)
            .header("Prefer", RETURN_REPRESENTATION);
        let body = self.send(request).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(0);
        }
        let rows: Vec<Value> = decode(&body)?;
        Ok(rows.len() as u64)
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(body).map_err(|e| StoreError::Decode(e.to_string()))
}

fn error_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        details: Option<String>,
    }
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.details))
        .unwrap_or_else(|| String::from_utf8_lossy(body).chars().take(200).collect())
}

#[async_trait]
impl UserDataStore for RestStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn find_entry(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<Option<CollectionEntry>, StoreError> {
        let rows: Vec<CollectionEntry> = self
            .select(
                relation.table(),
                &[
                    ("user_id", eq(user_id)),
                    ("video_id", eq(video_id)),
                    ("order", "created_at.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_entry(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<CollectionEntry, StoreError> {
        self.insert(
            relation.table(),
            &json!({ "user_id": user_id, "video_id": video_id }),
            &[],
            RETURN_REPRESENTATION,
        )
        .await
    }

    async fn delete_entries(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<u64, StoreError> {
        self.delete(
            relation.table(),
            &[("user_id", eq(user_id)), ("video_id", eq(video_id))],
        )
        .await
    }

    async fn delete_entry_by_id(
        &self,
        relation: Relation,
        entry_id: i64,
    ) -> Result<u64, StoreError> {
        self.delete(relation.table(), &[("id", eq(entry_id))]).await
    }

    async fn list_entries(
        &self,
        relation: Relation,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<CollectionEntry>, StoreError> {
        let mut params = vec![
            ("user_id", eq(user_id)),
            ("order", "created_at.desc".to_string()),
        ];
        if let Some(limit) = limit {
            params.push(("limit", limit.to_string()));
        }
        self.select(relation.table(), &params).await
    }

    async fn insert_playlist(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Playlist, StoreError> {
        self.insert(
            "playlists",
            &json!({ "user_id": user_id, "name": name, "description": description }),
            &[],
            RETURN_REPRESENTATION,
        )
        .await
    }

    async fn list_playlists(&self, user_id: &str) -> Result<Vec<Playlist>, StoreError> {
        self.select(
            "playlists",
            &[
                ("user_id", eq(user_id)),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }

    async fn get_playlist(&self, playlist_id: i64) -> Result<Option<Playlist>, StoreError> {
        let rows: Vec<Playlist> = self
            .select("playlists", &[("id", eq(playlist_id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_playlist_video(
        &self,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<Option<PlaylistVideo>, StoreError> {
        let rows: Vec<PlaylistVideo> = self
            .select(
                "playlist_videos",
                &[
                    ("playlist_id", eq(playlist_id)),
                    ("video_id", eq(video_id)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_playlist_video(
        &self,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<PlaylistVideo, StoreError> {
        self.insert(
            "playlist_videos",
            &json!({ "playlist_id": playlist_id, "video_id": video_id }),
            &[],
            RETURN_REPRESENTATION,
        )
        .await
    }

    async fn list_playlist_videos(
        &self,
        playlist_id: i64,
    ) -> Result<Vec<PlaylistVideo>, StoreError> {
        self.select(
            "playlist_videos",
            &[
                ("playlist_id", eq(playlist_id)),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn delete_playlist_video(
        &self,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<u64, StoreError> {
        self.delete(
            "playlist_videos",
            &[("playlist_id", eq(playlist_id)), ("video_id", eq(video_id))],
        )
        .await
    }

    /// Join rows first, then the playlist row, as two requests.
    ///
    /// If the second request fails the playlist survives with no videos,
    /// which reads the same as an empty playlist. Retrying the delete
    /// finishes the job.
    async fn delete_playlist(&self, playlist_id: i64) -> Result<bool, StoreError> {
        let videos = self
            .delete("playlist_videos", &[("playlist_id", eq(playlist_id))])
            .await?;

        let removed = self
            .delete("playlists", &[("id", eq(playlist_id))])
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    playlist_id = playlist_id,
                    error = %e,
                    "Playlist videos deleted but playlist row remains"
                )
            })?;

        tracing::debug!(playlist_id = playlist_id, videos = videos, "Deleted playlist");
        Ok(removed > 0)
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        let rows: Vec<Profile> = self.select("users", &[("id", eq(user_id))]).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
        profile: &Profile,
    ) -> Result<Profile, StoreError> {
        let mut row = json!({
            "id": user_id,
            "full_name": profile.full_name,
            "profile_picture": profile.profile_picture,
        });
        if let (Some(email), Some(obj)) = (email, row.as_object_mut()) {
            obj.insert("email".to_string(), Value::from(email));
        }
        self.insert("users", &row, &[("on_conflict", "id".to_string())], UPSERT)
            .await
    }
}
