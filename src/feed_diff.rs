//! Feed-format diff engine (out of scope per spec.md §1 — "parses Atom/RSS
//! and returns `(envelope, {entry_id: xml})`"; only the contract is
//! specified there). This is the hub's own minimal implementation of that
//! contract: entry/item boundaries located with lightweight tag scanning
//! rather than a full SAX parser.

use std::collections::HashMap;

use crate::store::feed_record::FeedFormat;

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("no entries found in feed")]
    NoEntries,
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// `(header_footer, {entry_id: raw_entry_xml})`. `header_footer` is the
/// document with every entry/item element removed, used later to splice new
/// entries back in (§4.7 step 4) and as the stored envelope for future diffs.
pub type FilterResult = (String, HashMap<String, String>);

fn element_name(format: FeedFormat) -> &'static str {
    match format {
        FeedFormat::Atom => "entry",
        FeedFormat::Rss => "item",
        FeedFormat::Arbitrary => unreachable!("arbitrary content is not diffed"),
    }
}

fn find_id(
    entry_xml: &str,
    tags: &[&str],
) -> Option<String> {
    for tag in tags {
        let open = format!("<{tag}");
        let Some(tag_start) = entry_xml.find(&open) else { continue };
        let Some(gt) = entry_xml[tag_start..].find('>') else { continue };
        let content_start = tag_start + gt + 1;
        let close = format!("</{tag}>");
        let Some(close_rel) = entry_xml[content_start..].find(&close) else { continue };
        let value = entry_xml[content_start..content_start + close_rel].trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Splits `content` into its envelope and a map of entry-id to raw entry
/// XML. Mirrors the original's `feed_diff.filter(content, format)`.
pub fn filter(
    content: &str,
    format: FeedFormat,
) -> Result<FilterResult, DiffError> {
    if matches!(format, FeedFormat::Arbitrary) {
        return Ok((content.to_string(), HashMap::new()));
    }

    let element = element_name(format);
    let open_tag = format!("<{element}");
    let close_tag = format!("</{element}>");

    let mut entries = HashMap::new();
    let mut header_footer = String::new();
    let mut cursor = 0usize;
    let mut last_copied = 0usize;

    loop {
        let Some(rel_open) = content[cursor..].find(&open_tag) else { break };
        let open_start = cursor + rel_open;
        let Some(rel_close) = content[open_start..].find(&close_tag) else {
            return Err(DiffError::Malformed(format!("unterminated <{element}>")));
        };
        let entry_end = open_start + rel_close + close_tag.len();

        header_footer.push_str(&content[last_copied..open_start]);
        let entry_xml = &content[open_start..entry_end];

        let id_tags: &[&str] = match format {
            FeedFormat::Atom => &["id"],
            FeedFormat::Rss => &["guid", "link"],
            FeedFormat::Arbitrary => unreachable!(),
        };
        if let Some(entry_id) = find_id(entry_xml, id_tags) {
            entries.insert(entry_id, entry_xml.to_string());
        }

        last_copied = entry_end;
        cursor = entry_end;
    }

    header_footer.push_str(&content[last_copied..]);

    if entries.is_empty() {
        return Err(DiffError::NoEntries);
    }
    Ok((header_footer, entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM: &str = r#"<?xml version="1.0"?>
<feed>
<title>Test</title>
<entry><id>urn:1</id><title>One</title></entry>
<entry><id>urn:2</id><title>Two</title></entry>
</feed>"#;

    #[test]
    fn splits_atom_entries() {
        let (header_footer, entries) = filter(ATOM, FeedFormat::Atom).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains_key("urn:1"));
        assert!(!header_footer.contains("<entry>"));
        assert!(header_footer.contains("<title>Test</title>"));
    }

    #[test]
    fn arbitrary_content_passes_through() {
        let (header_footer, entries) = filter("raw body", FeedFormat::Arbitrary).unwrap();
        assert_eq!(header_footer, "raw body");
        assert!(entries.is_empty());
    }

    #[test]
    fn no_entries_is_an_error() {
        assert!(filter("<feed></feed>", FeedFormat::Atom).is_err());
    }
}
