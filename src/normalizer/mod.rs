pub mod sanitize;

use chrono::{DateTime, Utc};
use feed_rs::model;
use feed_rs::parser;
use html_escape::decode_html_entities;

use crate::app::RunnelError;
use crate::domain::Enclosure;

/// Feed metadata as it came out of the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub image: Option<String>,
    pub language: Option<String>,
    pub copyright: Option<String>,
    pub updated: Option<DateTime<Utc>>,
}

/// Entry as it came out of the document, before identity is stamped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub image: Option<String>,
    pub enclosure: Option<Enclosure>,
    /// Colon-separated text such as `01:02:03`, `62:03` or `3723`.
    pub duration: Option<String>,
    pub updated: Option<DateTime<Utc>>,
}

/// Everything extracted from one body.
///
/// A parser that fails halfway still hands back what it had; `error`
/// carries the failure.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub feed: Option<ParsedFeed>,
    pub entries: Vec<ParsedEntry>,
    pub error: Option<RunnelError>,
}

pub trait FeedParser: Send + Sync {
    fn parse(&self, body: &[u8]) -> ParseOutcome;
}

/// RSS 0.9x/1.0/2.0, Atom and JSON Feed via feed-rs.
#[derive(Clone, Default)]
pub struct FeedRsParser;

impl FeedRsParser {
    pub fn new() -> Self {
        Self
    }
}

fn text(t: Option<model::Text>) -> Option<String> {
    t.map(|t| decode_html_entities(&t.content).to_string())
}

impl FeedParser for FeedRsParser {
    fn parse(&self, body: &[u8]) -> ParseOutcome {
        let feed = match parser::parse(body) {
            Ok(feed) => feed,
            Err(e) => {
                return ParseOutcome {
                    error: Some(RunnelError::FeedParse(e.to_string())),
                    ..Default::default()
                }
            }
        };

        let meta = ParsedFeed {
            title: text(feed.title),
            link: feed.links.first().map(|l| l.href.clone()),
            summary: feed.description.map(|d| d.content),
            author: feed.authors.first().map(|a| a.name.clone()),
            image: feed.logo.or(feed.icon).map(|i| i.uri),
            language: feed.language,
            copyright: text(feed.rights),
            updated: feed.updated.or(feed.published),
        };

        let entries = feed.entries.into_iter().map(normalize_entry).collect();

        ParseOutcome {
            feed: Some(meta),
            entries,
            error: None,
        }
    }
}

fn normalize_entry(entry: model::Entry) -> ParsedEntry {
    let enclosure = entry.media.iter().flat_map(|m| m.content.iter()).find_map(|c| {
        c.url.as_ref().map(|url| Enclosure {
            url: url.to_string(),
            length: c.size,
            mime_type: c.content_type.as_ref().map(|m| m.to_string()),
        })
    });

    let duration = entry
        .media
        .iter()
        .find_map(|m| m.duration.or_else(|| m.content.iter().find_map(|c| c.duration)))
        .map(|d| d.as_secs().to_string());

    let image = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .next();

    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body));

    ParsedEntry {
        id: Some(entry.id).filter(|id| !id.is_empty()),
        title: text(entry.title),
        link: entry.links.first().map(|l| l.href.clone()),
        summary,
        author: entry.authors.first().map(|a| a.name.clone()),
        image,
        enclosure,
        duration,
        updated: entry.updated.or(entry.published),
    }
}
