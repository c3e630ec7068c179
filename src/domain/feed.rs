use serde::{Deserialize, Serialize};

/// Feed document as stored under a feed key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub url: String,
    #[serde(rename = "originalURL", default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub image: Option<String>,
    pub language: Option<String>,
    pub copyright: Option<String>,
    /// Milliseconds since the epoch, never below 1.
    pub updated: i64,
}
