//! Turning parsed documents into stored records.

use chrono::{DateTime, Utc};
use url::Url;

use crate::app::{Result, RunnelError};
use crate::domain::{Entry, Feed, Query};
use crate::normalizer::{sanitize, ParseOutcome, ParsedEntry, ParsedFeed};
use crate::store::{keys, Batch, NO_ETAG};

/// Milliseconds, floored at 1 so a stored timestamp is never 0.
pub fn updated_millis(updated: Option<DateTime<Utc>>) -> i64 {
    updated.map(|d| d.timestamp_millis()).unwrap_or(0).max(1)
}

/// Seconds from `HH:MM:SS`, `MM:SS` or `SS` text.
pub fn parse_duration(text: &str) -> Option<u64> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    parts.iter().try_fold(0u64, |acc, part| {
        let part = part.trim();
        let value = match part.parse::<u64>() {
            Ok(v) => v,
            Err(_) => part.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)? as u64,
        };
        acc.checked_mul(60)?.checked_add(value)
    })
}

/// Keep `link` only if it looks like a web page and is not the enclosure.
pub fn canonical_link(link: Option<&str>, enclosure: Option<&str>) -> Option<String> {
    let link = link?.trim();
    let url = Url::parse(link).ok()?;
    let name = url.path_segments().and_then(|mut s| s.next_back()).unwrap_or("");
    let extension = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => String::new(),
    };
    if !matches!(extension.as_str(), "" | "html" | "htm") {
        return None;
    }
    let link = url.to_string();
    let same_as_enclosure = enclosure
        .and_then(|e| Url::parse(e).ok())
        .is_some_and(|e| e.as_str() == link);
    if same_as_enclosure {
        None
    } else {
        Some(link)
    }
}

fn identifier(entry: &ParsedEntry) -> &str {
    entry
        .id
        .as_deref()
        .or(entry.link.as_deref())
        .or(entry.title.as_deref())
        .unwrap_or("")
}

pub fn stamp_feed(parsed: ParsedFeed, query: &Query) -> Feed {
    Feed {
        url: query.url().to_string(),
        original_url: query.original_url().map(String::from),
        title: parsed.title,
        link: parsed.link,
        summary: sanitize::summary(parsed.summary.as_deref()),
        author: parsed.author,
        image: parsed.image,
        language: parsed.language,
        copyright: parsed.copyright,
        updated: updated_millis(parsed.updated),
    }
}

pub fn stamp_entry(parsed: ParsedEntry, query: &Query) -> Entry {
    let id = Entry::generate_id(query.uri(), identifier(&parsed));
    let enclosure_url = parsed.enclosure.as_ref().map(|e| e.url.as_str());
    let link = canonical_link(parsed.link.as_deref(), enclosure_url);
    let duration = parsed.duration.as_deref().and_then(parse_duration);
    Entry {
        url: query.url().to_string(),
        original_url: query.original_url().map(String::from),
        id,
        title: parsed.title,
        link,
        summary: sanitize::summary(parsed.summary.as_deref()),
        author: parsed.author,
        image: parsed.image,
        duration,
        enclosure: parsed.enclosure,
        updated: updated_millis(parsed.updated),
    }
}

/// What the Persist phase wrote.
#[derive(Debug, Default)]
pub struct Persisted {
    pub feed: Option<Feed>,
    pub entries: Vec<Entry>,
}

/// Append puts for everything in `outcome` to `batch`.
///
/// The ETag is only recorded when the whole body parsed, so a broken
/// document is fetched again next time. Returns the parse error, if any,
/// next to the records.
pub fn persist_ops(
    outcome: ParseOutcome,
    etag: Option<&str>,
    query: &Query,
    batch: &mut Batch,
) -> Result<(Persisted, Option<RunnelError>)> {
    let uri = query.uri();
    let mut persisted = Persisted::default();

    if let Some(parsed) = outcome.feed {
        let feed = stamp_feed(parsed, query);
        batch.put(keys::feed_key(uri)?, serde_json::to_vec(&feed)?);
        persisted.feed = Some(feed);
    }

    for parsed in outcome.entries {
        let entry = stamp_entry(parsed, query);
        batch.put(
            keys::entry_key(uri, entry.updated, &entry.id)?,
            serde_json::to_vec(&entry)?,
        );
        persisted.entries.push(entry);
    }

    if outcome.error.is_none() {
        batch.put(keys::etag_key(uri)?, etag.unwrap_or(NO_ETAG));
    }

    Ok((persisted, outcome.error))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::Enclosure;
    use crate::store::BatchOp;

    #[test]
    fn test_updated_floor() {
        assert_eq!(updated_millis(None), 1);
        let epoch = Utc.timestamp_millis_opt(0).unwrap();
        assert_eq!(updated_millis(Some(epoch)), 1);
        let later = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(updated_millis(Some(later)), 1_700_000_000_000);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("01:02:03"), Some(3723));
        assert_eq!(parse_duration("62:03"), Some(3723));
        assert_eq!(parse_duration("3723"), Some(3723));
        assert_eq!(parse_duration(" 00:00:07 "), Some(7));
        assert_eq!(parse_duration("12.9"), Some(12));
        assert_eq!(parse_duration("1:2:3:4"), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_canonical_link() {
        assert_eq!(
            canonical_link(Some("http://example.com/post"), None).as_deref(),
            Some("http://example.com/post")
        );
        assert!(canonical_link(Some("http://example.com/post.html"), None).is_some());
        assert!(canonical_link(Some("http://example.com/post.HTM"), None).is_some());
        assert!(canonical_link(Some("http://example.com/"), None).is_some());
        assert!(canonical_link(Some("http://example.com/ep.mp3"), None).is_none());
        assert!(canonical_link(Some("not a url"), None).is_none());
        assert!(canonical_link(None, None).is_none());
    }

    #[test]
    fn test_canonical_link_skips_enclosure() {
        let link = "http://example.com/episode";
        assert!(canonical_link(Some(link), Some(link)).is_none());
        assert!(canonical_link(Some(link), Some("http://example.com/other")).is_some());
    }

    #[test]
    fn test_entry_id_prefers_id_then_link_then_title() {
        let query = Query::new("http://example.com/feed").unwrap();
        let with_id = ParsedEntry {
            id: Some("guid".into()),
            link: Some("http://example.com/a".into()),
            title: Some("A".into()),
            ..Default::default()
        };
        let with_link = ParsedEntry {
            id: None,
            ..with_id.clone()
        };
        let with_title = ParsedEntry {
            link: None,
            ..with_link.clone()
        };
        let uri = query.uri();
        assert_eq!(stamp_entry(with_id, &query).id, Entry::generate_id(uri, "guid"));
        assert_eq!(
            stamp_entry(with_link, &query).id,
            Entry::generate_id(uri, "http://example.com/a")
        );
        assert_eq!(stamp_entry(with_title, &query).id, Entry::generate_id(uri, "A"));
    }

    #[test]
    fn test_stamp_carries_redirect_identity() {
        let query = Query::new("http://a.com/feed")
            .unwrap()
            .redirect(301, "http://b.com/feed")
            .unwrap();
        let feed = stamp_feed(
            ParsedFeed {
                summary: Some("<p>Hi <i>there</i></p>".into()),
                ..Default::default()
            },
            &query,
        );
        assert_eq!(feed.url, "http://b.com/feed");
        assert_eq!(feed.original_url.as_deref(), Some("http://a.com/feed"));
        assert_eq!(feed.summary.as_deref(), Some("Hi there"));
        assert_eq!(feed.updated, 1);

        let entry = stamp_entry(
            ParsedEntry {
                id: Some("x".into()),
                duration: Some("1:00".into()),
                enclosure: Some(Enclosure {
                    url: "http://b.com/x.mp3".into(),
                    length: None,
                    mime_type: None,
                }),
                ..Default::default()
            },
            &query,
        );
        assert_eq!(entry.url, "http://b.com/feed");
        assert_eq!(entry.original_url.as_deref(), Some("http://a.com/feed"));
        assert_eq!(entry.duration, Some(60));
    }

    #[test]
    fn test_persist_ops_writes_feed_entries_and_etag() {
        let query = Query::new("http://example.com/feed").unwrap();
        let outcome = ParseOutcome {
            feed: Some(ParsedFeed::default()),
            entries: vec![
                ParsedEntry {
                    id: Some("1".into()),
                    ..Default::default()
                },
                ParsedEntry {
                    id: Some("2".into()),
                    ..Default::default()
                },
            ],
            error: None,
        };
        let mut batch = Batch::new();
        let (persisted, error) = persist_ops(outcome, None, &query, &mut batch).unwrap();
        assert!(error.is_none());
        assert!(persisted.feed.is_some());
        assert_eq!(persisted.entries.len(), 2);
        assert_eq!(batch.len(), 4);
        assert_eq!(
            batch.ops().last(),
            Some(&BatchOp::Put {
                key: keys::etag_key("http://example.com/feed").unwrap(),
                value: NO_ETAG.as_bytes().to_vec(),
            })
        );
    }

    #[test]
    fn test_persist_ops_keeps_partial_results_on_error() {
        let query = Query::new("http://example.com/feed").unwrap();
        let outcome = ParseOutcome {
            feed: Some(ParsedFeed::default()),
            entries: vec![ParsedEntry::default()],
            error: Some(RunnelError::FeedParse("truncated".into())),
        };
        let mut batch = Batch::new();
        let (persisted, error) = persist_ops(outcome, Some("\"v1\""), &query, &mut batch).unwrap();
        assert!(matches!(error, Some(RunnelError::FeedParse(_))));
        assert!(persisted.feed.is_some());
        assert_eq!(persisted.entries.len(), 1);
        // feed and entry, but no etag
        assert_eq!(batch.len(), 2);
    }
}
