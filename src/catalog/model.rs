use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::category::category_from_tags;

/// Renditions tried, in order, when picking one to play.
const PLAYBACK_PREFERENCE: [&str; 4] = ["medium", "large", "small", "tiny"];

// ============================================================================
// Wire Types
// ============================================================================

/// Envelope returned by every catalog endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct RawResponse {
    #[serde(default, rename = "totalHits")]
    pub total_hits: u64,
    #[serde(default)]
    pub hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHit {
    pub id: u64,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, rename = "userImageURL")]
    pub user_image_url: String,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub videos: BTreeMap<String, RawRendition>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRendition {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

// ============================================================================
// Data Structures
// ============================================================================

/// One encoded variant of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rendition {
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Size in bytes
    pub size: u64,
    pub thumbnail: Option<String>,
}

/// Normalized catalog video.
///
/// Fetched fresh for every request and never cached; `category` is derived
/// from the tags at normalization time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Video {
    pub id: String,
    /// The catalog has no separate title, so tags double as one.
    pub title: String,
    pub tags: String,
    pub category: &'static str,
    pub user: String,
    pub user_image_url: String,
    pub views: u64,
    pub likes: u64,
    pub downloads: u64,
    pub comments: u64,
    /// Length in seconds
    pub duration: u64,
    /// Renditions by name ("large", "medium", "small", "tiny")
    pub renditions: BTreeMap<String, Rendition>,
}

impl Video {
    /// Rendition to play, preferring mid-sized variants.
    pub fn playback_rendition(&self) -> Option<(&str, &Rendition)> {
        PLAYBACK_PREFERENCE
            .iter()
            .find_map(|name| self.renditions.get_key_value(*name))
            .or_else(|| self.renditions.iter().next())
            .map(|(name, r)| (name.as_str(), r))
    }

    /// First thumbnail found across renditions, small variants first.
    pub fn thumbnail(&self) -> Option<&str> {
        ["tiny", "small", "medium", "large"]
            .iter()
            .filter_map(|name| self.renditions.get(*name))
            .chain(self.renditions.values())
            .find_map(|r| r.thumbnail.as_deref())
    }

    /// Duration formatted as m:ss.
    pub fn duration_label(&self) -> String {
        format!("{}:{:02}", self.duration / 60, self.duration % 60)
    }
}

impl From<RawHit> for Video {
    fn from(hit: RawHit) -> Self {
        let renditions = hit
            .videos
            .into_iter()
            .filter(|(_, r)| !r.url.is_empty())
            .map(|(name, r)| {
                (
                    name,
                    Rendition {
                        url: r.url,
                        width: r.width,
                        height: r.height,
                        size: r.size,
                        thumbnail: r.thumbnail.filter(|t| !t.is_empty()),
                    },
                )
            })
            .collect();

        Video {
            id: hit.id.to_string(),
            title: hit.tags.clone(),
            category: category_from_tags(&hit.tags),
            tags: hit.tags,
            user: hit.user,
            user_image_url: hit.user_image_url,
            views: hit.views,
            likes: hit.likes,
            downloads: hit.downloads,
            comments: hit.comments,
            duration: hit.duration,
            renditions,
        }
    }
}

/// One page of catalog results, in catalog rank/relevance order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage {
    /// 1-based page number that was requested
    pub page: u32,
    /// Total hits the catalog reports as reachable for this query
    pub total_hits: u64,
    pub videos: Vec<Video>,
}

impl CatalogPage {
    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_hit() -> RawHit {
        serde_json::from_value(serde_json::json!({
            "id": 125,
            "pageURL": "https://pixabay.com/videos/id-125/",
            "type": "film",
            "tags": "flowers, nature, spring",
            "duration": 75,
            "videos": {
                "large": { "url": "https://cdn.example.com/l.mp4", "width": 1920, "height": 1080, "size": 6615235, "thumbnail": "https://cdn.example.com/l.jpg" },
                "medium": { "url": "https://cdn.example.com/m.mp4", "width": 1280, "height": 720, "size": 3562083, "thumbnail": "" },
                "small": { "url": "", "width": 0, "height": 0, "size": 0 },
                "tiny": { "url": "https://cdn.example.com/t.mp4", "width": 640, "height": 360, "size": 1030736, "thumbnail": "https://cdn.example.com/t.jpg" }
            },
            "views": 4462,
            "downloads": 1464,
            "likes": 18,
            "comments": 2,
            "user_id": 1281706,
            "user": "Coverr-Free-Footage",
            "userImageURL": "https://cdn.example.com/user.png"
        }))
        .unwrap()
    }

    #[test]
    fn test_hit_normalization() {
        let video = Video::from(sample_hit());

        assert_eq!(video.id, "125");
        assert_eq!(video.title, "flowers, nature, spring");
        assert_eq!(video.category, "Nature");
        assert_eq!(video.user, "Coverr-Free-Footage");
        assert_eq!(video.views, 4462);
        assert_eq!(video.likes, 18);
        assert_eq!(video.duration_label(), "1:15");
        // empty-url rendition is dropped, empty thumbnail becomes None
        assert_eq!(video.renditions.len(), 3);
        assert_eq!(video.renditions["medium"].thumbnail, None);
    }

    #[test]
    fn test_playback_rendition_prefers_medium() {
        let video = Video::from(sample_hit());
        let (name, rendition) = video.playback_rendition().unwrap();
        assert_eq!(name, "medium");
        assert_eq!(rendition.url, "https://cdn.example.com/m.mp4");
    }

    #[test]
    fn test_thumbnail_prefers_small_variants() {
        let video = Video::from(sample_hit());
        assert_eq!(video.thumbnail(), Some("https://cdn.example.com/t.jpg"));
    }

    #[test]
    fn test_sparse_hit_defaults() {
        let hit: RawHit = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        let video = Video::from(hit);
        assert_eq!(video.id, "7");
        assert_eq!(video.category, "Misc");
        assert!(video.renditions.is_empty());
        assert!(video.playback_rendition().is_none());
        assert!(video.thumbnail().is_none());
    }
}
