//! Binary, order-preserving key schema.
//!
//! Every key starts with [`NAMESPACE`], a zero byte and a kind tag, so the
//! store can be shared with unrelated data. Numbers are fixed-width big-endian
//! and compare numerically under the store's byte order. URIs are canonical
//! before encoding, which also makes them plain ASCII without zero bytes;
//! range upper bounds rely on that by ending in `0xff`.

use url::Url;

use crate::app::Result;
use crate::store::KeyRange;

pub const NAMESPACE: &[u8] = b"runnel";

const SEP: u8 = 0x00;
const HIGH: [u8; 9] = [0xff; 9];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Entry,
    Etag,
    Feed,
    Rank,
    Ranked,
}

impl KeyKind {
    fn tag(self) -> u8 {
        match self {
            KeyKind::Entry => b'e',
            KeyKind::Etag => b'E',
            KeyKind::Feed => b'f',
            KeyKind::Rank => b'r',
            KeyKind::Ranked => b'R',
        }
    }

    fn prefix(self) -> Vec<u8> {
        let mut key = Vec::with_capacity(NAMESPACE.len() + 2);
        key.extend_from_slice(NAMESPACE);
        key.push(SEP);
        key.push(self.tag());
        key
    }

    /// Range covering every key of this kind.
    pub fn range(self) -> KeyRange {
        let gte = self.prefix();
        let mut lte = gte.clone();
        lte.extend_from_slice(&HIGH);
        KeyRange::new(gte, lte)
    }
}

/// Parse and re-serialize, so equivalent spellings share one key.
pub fn canonical_uri(uri: &str) -> Result<String> {
    Ok(Url::parse(uri.trim())?.to_string())
}

fn uri_key(kind: KeyKind, uri: &str) -> Result<Vec<u8>> {
    let mut key = kind.prefix();
    key.extend_from_slice(canonical_uri(uri)?.as_bytes());
    Ok(key)
}

fn timestamp_bytes(millis: i64) -> [u8; 8] {
    (millis.max(0) as u64).to_be_bytes()
}

pub fn feed_key(uri: &str) -> Result<Vec<u8>> {
    uri_key(KeyKind::Feed, uri)
}

pub fn etag_key(uri: &str) -> Result<Vec<u8>> {
    uri_key(KeyKind::Etag, uri)
}

pub fn ranked_key(uri: &str) -> Result<Vec<u8>> {
    uri_key(KeyKind::Ranked, uri)
}

fn entry_base(uri: &str) -> Result<Vec<u8>> {
    let mut key = uri_key(KeyKind::Entry, uri)?;
    key.push(SEP);
    Ok(key)
}

pub fn entry_key(uri: &str, updated: i64, id: &str) -> Result<Vec<u8>> {
    let mut key = entry_base(uri)?;
    key.extend_from_slice(&timestamp_bytes(updated));
    key.extend_from_slice(id.as_bytes());
    Ok(key)
}

/// Entries of `uri` with `since < updated <= until`, oldest first.
pub fn entry_range(uri: &str, since: i64, until: i64) -> Result<KeyRange> {
    let base = entry_base(uri)?;
    let mut gte = base.clone();
    gte.extend_from_slice(&timestamp_bytes(since.saturating_add(1)));
    let mut lte = base;
    lte.extend_from_slice(&timestamp_bytes(until));
    lte.push(0xff);
    Ok(KeyRange::new(gte, lte))
}

/// Every entry key of `uri`, whatever its timestamp.
pub fn all_entries_range(uri: &str) -> Result<KeyRange> {
    let gte = entry_base(uri)?;
    let mut lte = gte.clone();
    lte.extend_from_slice(&HIGH);
    Ok(KeyRange::new(gte, lte))
}

/// Rank keys sort by count first; a reverse scan yields the most popular feeds.
pub fn rank_key(count: u64, uri: &str) -> Result<Vec<u8>> {
    let mut key = KeyKind::Rank.prefix();
    key.extend_from_slice(&count.to_be_bytes());
    key.extend_from_slice(canonical_uri(uri)?.as_bytes());
    Ok(key)
}

fn strip<'a>(kind: KeyKind, key: &'a [u8]) -> Option<&'a [u8]> {
    key.strip_prefix(kind.prefix().as_slice())
}

pub fn uri_from_feed_key(key: &[u8]) -> Option<String> {
    let rest = strip(KeyKind::Feed, key)?;
    String::from_utf8(rest.to_vec()).ok()
}

pub fn uri_from_ranked_key(key: &[u8]) -> Option<String> {
    let rest = strip(KeyKind::Ranked, key)?;
    String::from_utf8(rest.to_vec()).ok()
}

pub fn uri_from_rank_key(key: &[u8]) -> Option<String> {
    rank_from_key(key).map(|(_, uri)| uri)
}

/// Decode a rank key into its count and URI.
pub fn rank_from_key(key: &[u8]) -> Option<(u64, String)> {
    let rest = strip(KeyKind::Rank, key)?;
    if rest.len() < 8 {
        return None;
    }
    let (count, uri) = rest.split_at(8);
    let count = u64::from_be_bytes(count.try_into().ok()?);
    let uri = String::from_utf8(uri.to_vec()).ok()?;
    Some((count, uri))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_uris_share_key() {
        let a = feed_key("HTTP://Example.com:80/feed").unwrap();
        let b = feed_key("http://example.com/feed").unwrap();
        assert_eq!(a, b);
        assert_eq!(etag_key("http://example.com").unwrap(), etag_key("http://example.com/").unwrap());
    }

    #[test]
    fn test_invalid_uri_is_rejected() {
        assert!(feed_key("example").is_err());
        assert!(rank_key(1, "::").is_err());
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let uri = "http://example.com/";
        let keys = [
            feed_key(uri).unwrap(),
            etag_key(uri).unwrap(),
            ranked_key(uri).unwrap(),
            rank_key(0, uri).unwrap(),
            entry_key(uri, 1, "id").unwrap(),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
            assert!(a.starts_with(NAMESPACE));
        }
    }

    #[test]
    fn test_rank_keys_order_by_count() {
        // "b" sorts after "a" as text, but 5 must still outrank 3
        let five = rank_key(5, "http://a.com/").unwrap();
        let three = rank_key(3, "http://b.com/").unwrap();
        assert!(five > three);

        let big = rank_key(256, "http://a.com/").unwrap();
        let small = rank_key(9, "http://z.com/").unwrap();
        assert!(big > small);
    }

    #[test]
    fn test_rank_key_round_trip() {
        let key = rank_key(42, "http://example.com/feed").unwrap();
        assert_eq!(
            rank_from_key(&key),
            Some((42, "http://example.com/feed".to_string()))
        );
        assert_eq!(
            uri_from_rank_key(&key).as_deref(),
            Some("http://example.com/feed")
        );
        assert!(uri_from_rank_key(&feed_key("http://example.com/").unwrap()).is_none());
    }

    #[test]
    fn test_uri_from_feed_key() {
        let key = feed_key("http://Example.com/a").unwrap();
        assert_eq!(uri_from_feed_key(&key).as_deref(), Some("http://example.com/a"));
        assert!(uri_from_feed_key(b"unrelated").is_none());
        let ranked = ranked_key("http://example.com/a").unwrap();
        assert_eq!(uri_from_ranked_key(&ranked).as_deref(), Some("http://example.com/a"));
    }

    #[test]
    fn test_entry_keys_order_by_time() {
        let uri = "http://example.com/";
        let early = entry_key(uri, 100, "zzz").unwrap();
        let late = entry_key(uri, 200, "aaa").unwrap();
        let later = entry_key(uri, 1000, "aaa").unwrap();
        assert!(early < late);
        assert!(late < later);
    }

    #[test]
    fn test_entry_range_is_exclusive_below() {
        let uri = "http://example.com/";
        let range = entry_range(uri, 100, 1_000).unwrap();
        let at = entry_key(uri, 100, "x").unwrap();
        let after = entry_key(uri, 101, "x").unwrap();
        let end = entry_key(uri, 1_000, "ffff").unwrap();
        let beyond = entry_key(uri, 1_001, "x").unwrap();
        assert!(!range.contains(&at));
        assert!(range.contains(&after));
        assert!(range.contains(&end));
        assert!(!range.contains(&beyond));
    }

    #[test]
    fn test_entry_range_excludes_other_feeds() {
        let range = all_entries_range("http://example.com/a").unwrap();
        assert!(range.contains(&entry_key("http://example.com/a", 5, "x").unwrap()));
        assert!(!range.contains(&entry_key("http://example.com/ab", 5, "x").unwrap()));
        assert!(!range.contains(&entry_key("http://example.com/", 5, "x").unwrap()));
    }

    #[test]
    fn test_kind_range() {
        let range = KeyKind::Rank.range();
        assert!(range.contains(&rank_key(u64::MAX, "http://a.com/").unwrap()));
        assert!(range.contains(&rank_key(0, "http://a.com/").unwrap()));
        assert!(!range.contains(&feed_key("http://a.com/").unwrap()));
    }
}
