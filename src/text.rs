use crate::config::{Limits, CLEANUP_PASSES};
use memchr::memmem;
use once_cell::sync::Lazy;
use regex::Regex;

static LINK_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\[\]]*)\]\]").unwrap());

static TEMPLATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{[^{}]*\}\}").unwrap());

static TABLE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

static ENCODED_TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)&lt;.*?&gt;").unwrap());

static HEADING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^={1,3}[^=\n][^\n]*?={1,3}[ \t]*$").unwrap());

/// Escape sequences scrubbed verbatim after tag removal.
const ESCAPES: [(&str, &str); 6] = [
    ("&nbsp;", " "),
    ("&ndash;", "-"),
    ("&mdash;", "-"),
    ("&quot;", "\""),
    ("&amp;", "&"),
    ("&#39;", "'"),
];

/// Canonical title form used as the key everywhere: trimmed, HTML entities
/// decoded, spaces replaced with underscores.
pub fn canonical_title(raw: &str) -> String {
    raw.trim()
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
        .replace(' ', "_")
}

/// The canonical title as it appears in prose (underscores back to spaces).
pub fn display_title(canonical: &str) -> String {
    canonical.replace('_', " ")
}

/// Extracts the `<text ...>` payload of a record body, still XML-escaped.
pub fn raw_text(body: &str) -> Option<&str> {
    let bytes = body.as_bytes();
    let open = memmem::find(bytes, b"<text")?;
    let content_start = open + memchr::memchr(b'>', &bytes[open..])? + 1;
    let end = content_start + memmem::find(&bytes[content_start..], b"</text>")?;
    Some(&body[content_start..end])
}

/// Reduces a record body to readable prose: links collapsed, templates,
/// tables, encoded tags and headings removed, table/list/category lines
/// dropped, and any lead-in before the bolded title trimmed away.
pub fn clean_text(body: &str, title: &str, limits: &Limits) -> Option<String> {
    let mut text = raw_text(body)?.to_string();

    for _ in 0..CLEANUP_PASSES {
        text = LINK_REGEX
            .replace_all(&text, |caps: &regex::Captures| collapse_link(&caps[1]))
            .into_owned();
    }
    for _ in 0..CLEANUP_PASSES {
        text = TEMPLATE_REGEX.replace_all(&text, "").into_owned();
    }
    for _ in 0..CLEANUP_PASSES {
        text = TABLE_REGEX.replace_all(&text, "").into_owned();
    }

    text = ENCODED_TAG_REGEX.replace_all(&text, "").into_owned();
    text = HEADING_REGEX.replace_all(&text, "").into_owned();
    for (from, to) in ESCAPES {
        text = text.replace(from, to);
    }

    let kept: Vec<&str> = text
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            !matches!(line.chars().next(), Some('|') | Some('!') | Some('*') | Some('#'))
                && !line.starts_with("Category:")
                && !line.starts_with("Image:")
        })
        .collect();
    let mut clean = kept.join("\n").trim().to_string();

    if let Some(start) = bold_title_offset(&clean, title, limits) {
        clean = clean[start..].to_string();
    }
    Some(clean)
}

/// Byte offset of the `'''Title'''` anchor when it appears early enough to
/// be a lead-in boundary.
fn bold_title_offset(text: &str, title: &str, limits: &Limits) -> Option<usize> {
    let display = display_title(title);
    if display.is_empty() || display.len() > limits.max_title_length_for_removal {
        return None;
    }
    let anchor = format!("'''{}'''", display);
    let pos = memmem::find(text.as_bytes(), anchor.as_bytes())?;
    (pos <= limits.max_index_for_title_removal).then_some(pos)
}

/// Clean text with the bolded-title lead removed entirely, the stream the
/// entity word-index counting runs over.
pub fn after_bold_title<'a>(clean: &'a str, title: &str, limits: &Limits) -> &'a str {
    let display = display_title(title);
    if display.is_empty() || display.len() > limits.max_title_length_for_removal {
        return clean;
    }
    let anchor = format!("'''{}'''", display);
    match memmem::find(clean.as_bytes(), anchor.as_bytes()) {
        Some(pos) if pos <= limits.max_index_for_title_removal => {
            clean[pos + anchor.len()..].trim_start()
        }
        _ => clean,
    }
}

fn collapse_link(inner: &str) -> String {
    let mut parts = inner.split('|');
    let target = parts.next().unwrap_or_default().trim();
    let lower = target.to_lowercase();
    if lower.starts_with("file:") {
        return String::new();
    }
    // Piped captions for these art-form links are noise; normalise instead.
    if lower.contains("sculptor") || lower.contains("sculpture") {
        return "sculptor".to_string();
    }
    if lower.contains("musical theatre") || lower.contains("musical") {
        return "musical".to_string();
    }
    match parts.next() {
        Some(alternate) if !alternate.trim().is_empty() => alternate.trim().to_string(),
        _ => target.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::path::Path;

    fn limits() -> Limits {
        Settings::with_defaults(Path::new("/tmp")).limits
    }

    fn body(text: &str) -> String {
        format!(
            "<title>Test</title>\n<text xml:space=\"preserve\">{}</text>",
            text
        )
    }

    #[test]
    fn canonical_title_forms() {
        assert_eq!(canonical_title(" New York City "), "New_York_City");
        assert_eq!(canonical_title("Tom &quot;Tim&quot; Jones"), "Tom_\"Tim\"_Jones");
        assert_eq!(canonical_title("AT&amp;T"), "AT&T");
        assert_eq!(display_title("New_York_City"), "New York City");
    }

    #[test]
    fn raw_text_isolates_payload() {
        let b = body("hello world");
        assert_eq!(raw_text(&b), Some("hello world"));
        assert_eq!(raw_text("<title>No text tag</title>"), None);
    }

    #[test]
    fn plain_link_collapses_to_target() {
        let b = body("lives in [[France]] today");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert_eq!(clean, "lives in France today");
    }

    #[test]
    fn piped_link_keeps_first_alternate() {
        let b = body("born in [[United States|America]]");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert_eq!(clean, "born in America");
    }

    #[test]
    fn file_links_dropped() {
        let b = body("see [[File:Photo.jpg|thumb|A photo]] here");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert_eq!(clean, "see  here");
    }

    #[test]
    fn art_form_links_normalised() {
        let b = body("a [[sculpture (art)|statue]] and a [[musical theatre|show]]");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert_eq!(clean, "a sculptor and a musical");
    }

    #[test]
    fn nested_links_collapse_over_passes() {
        let b = body("[[a [[b]] c]] end");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert!(clean.contains("end"));
        assert!(!clean.contains("[["));
    }

    #[test]
    fn templates_and_tables_removed() {
        let b = body("before {{cite web|url=x}} middle {| table |} after {singleton}");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert!(!clean.contains("cite"));
        assert!(!clean.contains("table"));
        assert!(!clean.contains("singleton"));
        assert!(clean.contains("before"));
        assert!(clean.contains("after"));
    }

    #[test]
    fn nested_templates_removed() {
        let b = body("x {{outer {{inner|1}} tail}} y");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert_eq!(clean, "x  y");
    }

    #[test]
    fn encoded_tags_and_headings_removed() {
        let b = body("&lt;ref&gt;cite&lt;/ref&gt;keep\n== History ==\nmore");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert!(clean.contains("keep"));
        assert!(clean.contains("more"));
        assert!(!clean.contains("History"));
        assert!(!clean.contains("ref"));
    }

    #[test]
    fn markup_lines_dropped() {
        let b = body("keep me\n| cell\n! header\n* bullet\n# item\nCategory:Foo\nImage:Bar\nlast");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert_eq!(clean, "keep me\nlast");
    }

    #[test]
    fn escape_sequences_replaced() {
        let b = body("A&nbsp;B&ndash;C &amp; D");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert_eq!(clean, "A B-C & D");
    }

    #[test]
    fn lead_in_before_bold_title_trimmed() {
        let b = body("infobox junk leftover '''Test''' is a town.");
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert_eq!(clean, "'''Test''' is a town.");
    }

    #[test]
    fn bold_title_too_late_is_kept() {
        let filler = "x".repeat(300);
        let b = body(&format!("{} '''Test''' is a town.", filler));
        let clean = clean_text(&b, "Test", &limits()).unwrap();
        assert!(clean.starts_with("xxx"));
    }

    #[test]
    fn after_bold_title_strips_anchor() {
        let rest = after_bold_title("'''New York''' is a city.", "New_York", &limits());
        assert_eq!(rest, "is a city.");
        let rest = after_bold_title("no anchor here", "New_York", &limits());
        assert_eq!(rest, "no anchor here");
    }

    #[test]
    fn no_text_tag_yields_none() {
        assert!(clean_text("<title>Only</title>", "Only", &limits()).is_none());
    }
}
