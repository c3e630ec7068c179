use html_escape::decode_html_entities;

/// Strip markup and entities, leaving plain text with collapsed whitespace.
pub fn plain_text(html: &str) -> String {
    let stripped = ammonia::Builder::empty().clean(html).to_string();
    let decoded = decode_html_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// [`plain_text`], with empty results mapped to `None`.
pub fn summary(html: Option<&str>) -> Option<String> {
    html.map(plain_text).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags() {
        assert_eq!(plain_text("<p>Hello <b>world</b></p>"), "Hello world");
    }

    #[test]
    fn test_drops_scripts() {
        assert_eq!(plain_text("a<script>alert(1)</script>b"), "ab");
    }

    #[test]
    fn test_decodes_entities() {
        assert_eq!(plain_text("Fish &amp; Chips"), "Fish & Chips");
        assert_eq!(plain_text("1 &lt; 2"), "1 < 2");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(plain_text("  one\n\n  two\t"), "one two");
    }

    #[test]
    fn test_empty_summary_is_none() {
        assert_eq!(summary(Some("<p> </p>")), None);
        assert_eq!(summary(None), None);
        assert_eq!(summary(Some("hi")).as_deref(), Some("hi"));
    }
}
