//! Statically declared shapes for the remote api payloads.
//!
//! Every record kind the harvester touches has its own `Deserialize` struct;
//! unknown or malformed values fail the decode instead of being coerced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviationStats {
    pub comments: i64,
    pub favourites: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Preview {
    pub src: String,
    pub height: i64,
    pub width: i64,
    #[serde(default)]
    pub transparency: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Content {
    pub src: String,
    pub height: i64,
    pub width: i64,
    #[serde(default)]
    pub transparency: bool,
    #[serde(default)]
    pub filesize: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Thumbnail {
    pub src: String,
    pub height: i64,
    pub width: i64,
    #[serde(default)]
    pub transparency: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Video {
    pub src: String,
    pub quality: String,
    #[serde(default)]
    pub filesize: i64,
    #[serde(default)]
    pub duration: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Tag {
    pub tag_name: String,
    #[serde(default)]
    pub sponsored: bool,
    #[serde(default)]
    pub sponsor: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Submission {
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub file_size: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
}

/// Precise engagement numbers, only available from the metadata endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Stats {
    pub views: i64,
    #[serde(default)]
    pub views_today: Option<i64>,
    pub favourites: i64,
    pub comments: i64,
    pub downloads: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    pub userid: String,
    pub username: String,
    #[serde(default)]
    pub usericon: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Opaque blobs; stored verbatim, never interpreted.
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
    #[serde(default)]
    pub stats: Option<serde_json::Value>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Deviation {
    pub deviationid: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub stats: Option<DeviationStats>,
    /// Stringified epoch on the wire.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub published_time: Option<i64>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_published: Option<bool>,
    #[serde(default)]
    pub is_pinned: Option<bool>,
    #[serde(default)]
    pub is_mature: Option<bool>,
    #[serde(default)]
    pub is_downloadable: Option<bool>,
    #[serde(default)]
    pub allows_comments: Option<bool>,
    #[serde(default)]
    pub preview: Option<Preview>,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub thumbs: Option<Vec<Thumbnail>>,
    #[serde(default)]
    pub videos: Option<Vec<Video>>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

/// Collection or gallery folder; both endpoints use the same shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Folder {
    pub folderid: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviationMetadata {
    pub deviationid: String,
    #[serde(default)]
    pub printid: Option<String>,
    pub author: User,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub allows_comments: bool,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub is_favourited: bool,
    #[serde(default)]
    pub is_mature: bool,
    #[serde(default)]
    pub mature_level: Option<String>,
    #[serde(default)]
    pub mature_classification: Option<Vec<String>>,
    #[serde(default)]
    pub submission: Option<Submission>,
    #[serde(default)]
    pub stats: Option<Stats>,
    #[serde(default)]
    pub collections: Vec<Folder>,
    #[serde(default)]
    pub galleries: Vec<Folder>,
    #[serde(default)]
    pub can_post_comment: bool,
}

/// One entry from the whofaved listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reactor {
    pub user: User,
    pub time: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedSubject {
    #[serde(default)]
    pub deviation: Option<Deviation>,
}

/// Home-feed notification. The originating deviation arrives either as a
/// `deviations` array or nested under `subject`, depending on message kind.
/// Stacked messages carry `stackid`/`stack_size` and no individual `ts`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedItem {
    pub messageid: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub by_user: Option<User>,
    #[serde(default)]
    pub stackid: Option<String>,
    #[serde(default)]
    pub stack_size: Option<i64>,
    #[serde(default)]
    pub deviations: Vec<Deviation>,
    #[serde(default)]
    pub subject: Option<FeedSubject>,
}

impl FeedItem {
    pub fn deviation(&self) -> Option<&Deviation> {
        self.deviations
            .first()
            .or_else(|| self.subject.as_ref().and_then(|s| s.deviation.as_ref()))
    }

    pub fn deviation_id(&self) -> Option<&str> {
        self.deviation().map(|d| d.deviationid.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_gallery_deviation() {
        let d: Deviation = serde_json::from_str(
            r#"{
                "deviationid": "d1",
                "title": "sunset",
                "url": "https://example.test/art/d1",
                "published_time": "1700000000",
                "is_mature": false,
                "author": {
                    "userid": "u1",
                    "username": "somecreator",
                    "usericon": "https://example.test/icon.png",
                    "type": "regular"
                },
                "stats": {"comments": 3, "favourites": 17},
                "thumbs": [
                    {"src": "https://example.test/t.jpg", "height": 100, "width": 150}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(d.published_time, Some(1_700_000_000));
        assert_eq!(d.author.unwrap().username, "somecreator");
        assert_eq!(d.stats.unwrap().favourites, 17);
        assert_eq!(d.thumbs.unwrap()[0].width, 150);
    }

    #[test]
    fn malformed_epoch_fails_instead_of_defaulting() {
        let r: Result<Deviation, _> =
            serde_json::from_str(r#"{"deviationid": "d1", "published_time": "soon"}"#);
        assert!(r.is_err());
    }

    #[test]
    fn feed_item_resolves_deviation_from_both_shapes() {
        let flat: FeedItem = serde_json::from_str(
            r#"{
                "messageid": "m1",
                "type": "deviation_submitted",
                "ts": "2024-05-01T12:00:00Z",
                "deviations": [{"deviationid": "d1"}]
            }"#,
        )
        .unwrap();
        let nested: FeedItem = serde_json::from_str(
            r#"{
                "messageid": "m2",
                "type": "feedback.favourite",
                "ts": "2024-05-01T12:00:00Z",
                "subject": {"deviation": {"deviationid": "d2"}}
            }"#,
        )
        .unwrap();

        assert_eq!(flat.deviation_id(), Some("d1"));
        assert_eq!(nested.deviation_id(), Some("d2"));
    }

    #[test]
    fn stacked_feed_item_has_size_but_no_timestamp() {
        let item: FeedItem = serde_json::from_str(
            r#"{
                "messageid": "m3",
                "type": "deviation_submitted",
                "stackid": "s1",
                "stack_size": 4,
                "deviations": [{"deviationid": "d3"}]
            }"#,
        )
        .unwrap();

        assert!(item.ts.is_none());
        assert_eq!(item.stackid.as_deref(), Some("s1"));
        assert_eq!(item.stack_size, Some(4));
    }
}
