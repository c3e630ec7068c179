use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Feed;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    pub length: Option<u64>,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
}

/// Entry document as stored under an entry key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// URL of the feed this entry belongs to.
    pub url: String,
    #[serde(rename = "originalURL", default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    /// Derived identifier, see [`Entry::generate_id`].
    pub id: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub image: Option<String>,
    /// Seconds.
    pub duration: Option<u64>,
    pub enclosure: Option<Enclosure>,
    /// Milliseconds since the epoch, never below 1.
    pub updated: i64,
}

impl Entry {
    /// Deterministic ID from the feed URL and the entry's best identifier.
    pub fn generate_id(feed_url: &str, identifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(feed_url.as_bytes());
        hasher.update(identifier.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Anything a pipeline emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Feed(Feed),
    Entry(Entry),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation_deterministic() {
        let id1 = Entry::generate_id("https://example.com/feed.xml", "entry-123");
        let id2 = Entry::generate_id("https://example.com/feed.xml", "entry-123");
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_id_generation_different_inputs() {
        let id1 = Entry::generate_id("https://example.com/feed.xml", "entry-123");
        let id2 = Entry::generate_id("https://example.com/feed.xml", "entry-456");
        let id3 = Entry::generate_id("https://other.com/feed.xml", "entry-123");
        assert_ne!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_id_is_hex_sha256() {
        let id = Entry::generate_id("https://example.com/feed.xml", "entry-123");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_record_serializes_untagged() {
        let record = Record::Entry(Entry {
            url: "http://example.com/feed".into(),
            id: "abc".into(),
            updated: 200,
            ..Default::default()
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["url"], "http://example.com/feed");
        assert_eq!(json["updated"], 200);
        assert!(json.get("originalURL").is_none());
    }
}
