use crate::codec;
use crate::config::Limits;
use crate::text::{after_bold_title, canonical_title};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::info;

static REDIRECT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<redirect title="([^"]*)""#).unwrap());

static CATEGORY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[Category:([^\|\]]+)(?:\|[^\]]*)?\]\]").unwrap());

pub static ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\[\]]+)\]\]").unwrap());

/// `<redirect title="..."/>` target in canonical form.
pub fn parse_redirect(body: &str) -> Option<String> {
    REDIRECT_REGEX
        .captures(body)
        .map(|c| canonical_title(&c[1]))
}

/// Every `[[Category:...]]` reference, normalised, duplicates preserved in
/// source order. De-duplication happens at id assignment.
pub fn parse_categories(body: &str) -> Vec<String> {
    CATEGORY_REGEX
        .captures_iter(body)
        .map(|c| normalise_category(&c[1]))
        .filter(|s| !s.is_empty())
        .collect()
}

fn normalise_category(raw: &str) -> String {
    let raw = raw.split('#').next().unwrap_or_default();
    raw.trim().replace(' ', "_")
}

/// Partial function title -> title, applied when a link target is not
/// itself coordinated but its redirect is.
#[derive(Default)]
pub struct RedirectTable {
    map: FxHashMap<String, String>,
}

impl RedirectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: String, to: String) {
        self.map.insert(from, to);
    }

    pub fn resolve(&self, title: &str) -> Option<&str> {
        self.map.get(title).map(String::as_str)
    }

    pub fn map(&self) -> &FxHashMap<String, String> {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Layout: `N:int`; `N x (title, target)`, title order.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut titles: Vec<&String> = self.map.keys().collect();
        titles.sort_unstable();
        codec::write_atomic(path, |w| {
            codec::write_u32(w, titles.len() as u32)?;
            for title in &titles {
                codec::write_str(w, title)?;
                codec::write_str(w, &self.map[*title])?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to save redirects: {:?}", path))?;
        info!(entries = self.map.len(), path = ?path, "Redirects saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = codec::open_reader(path)?;
        let n = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
        let mut map = FxHashMap::with_capacity_and_hasher(n, Default::default());
        for _ in 0..n {
            let title = codec::read_str(&mut r)?;
            let target = codec::read_str(&mut r)?;
            map.insert(title, target);
        }
        Ok(RedirectTable { map })
    }
}

/// A link target seen in an article: where it first occurs in the prose
/// (word index) and the lowercased surface forms it may appear under.
#[derive(Debug, Clone)]
pub struct ContainedEntity {
    pub first_word_index: Option<usize>,
    pub variants: Vec<String>,
}

/// Maps each `[[...]]` link target (canonical form) to its occurrence
/// evidence. Targets containing `:` (files, categories, interwiki) are
/// dropped. A mention directly after the word `new` does not count as an
/// occurrence, so "New York" cannot masquerade as "York".
pub fn contained_entities(
    body: &str,
    clean: &str,
    title: &str,
    limits: &Limits,
) -> FxHashMap<String, ContainedEntity> {
    let mut entities: FxHashMap<String, ContainedEntity> = FxHashMap::default();

    for caps in ENTITY_REGEX.captures_iter(body) {
        let inner = &caps[1];
        let mut parts = inner.split('|');
        let official = parts.next().unwrap_or_default().trim();
        if official.is_empty() || official.contains(':') {
            continue;
        }
        let key = canonical_title(official);
        let entry = entities.entry(key).or_insert_with(|| ContainedEntity {
            first_word_index: None,
            variants: Vec::new(),
        });
        push_variant(&mut entry.variants, official.to_lowercase());
        for alternate in parts {
            let alternate = alternate.trim().to_lowercase();
            if !alternate.is_empty() {
                push_variant(&mut entry.variants, alternate);
            }
        }
    }

    let haystack = after_bold_title(clean, title, limits).to_lowercase();
    for entity in entities.values_mut() {
        entity.first_word_index = entity
            .variants
            .iter()
            .filter_map(|v| first_countable_occurrence(&haystack, v))
            .min()
            .map(|pos| word_index_at(&haystack, pos));
    }

    entities
}

fn push_variant(variants: &mut Vec<String>, variant: String) {
    if !variants.contains(&variant) {
        variants.push(variant);
    }
}

/// First match of `needle` not immediately preceded by `new `.
pub fn first_countable_occurrence(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(needle) {
        let pos = from + rel;
        if !preceded_by_new(haystack, pos) {
            return Some(pos);
        }
        from = pos + needle.len();
    }
    None
}

fn preceded_by_new(haystack: &str, pos: usize) -> bool {
    haystack[..pos].ends_with("new ")
}

/// Zero-based word index of the word beginning at `pos`: the number of
/// whitespace-delimited words that start strictly before it.
pub(crate) fn word_index_at(text: &str, pos: usize) -> usize {
    let mut words = 0;
    let mut in_word = false;
    for (i, ch) in text.char_indices() {
        if i >= pos {
            break;
        }
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            in_word = true;
            words += 1;
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn limits() -> Limits {
        Settings::with_defaults(Path::new("/tmp")).limits
    }

    #[test]
    fn redirect_target_extracted() {
        let body = "<title>Foo</title>\n<redirect title=\"Paris attacks\" />";
        assert_eq!(parse_redirect(body), Some("Paris_attacks".to_string()));
        assert_eq!(parse_redirect("<title>Foo</title>"), None);
    }

    #[test]
    fn categories_in_order_with_duplicates() {
        let body = "[[Category:Cities in France]] text [[Category:Capitals|P]] [[Category:Cities in France]]";
        assert_eq!(
            parse_categories(body),
            vec!["Cities_in_France", "Capitals", "Cities_in_France"]
        );
    }

    #[test]
    fn category_fragment_stripped() {
        let body = "[[Category:Rivers#Europe]]";
        assert_eq!(parse_categories(body), vec!["Rivers"]);
    }

    #[test]
    fn redirect_table_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("redirects.bin");

        let mut table = RedirectTable::new();
        table.insert("City_of_Light".to_string(), "Paris".to_string());
        table.insert("Big_Apple".to_string(), "New_York_City".to_string());
        table.save(&path).unwrap();

        let loaded = RedirectTable::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.resolve("Big_Apple"), Some("New_York_City"));
        assert_eq!(loaded.resolve("Nope"), None);
    }

    #[test]
    fn entities_collect_variants() {
        let body = "<text>[[Paris|the capital|city of light]] and [[Lyon]]</text>";
        let clean = "the capital and Lyon";
        let entities = contained_entities(body, clean, "Test", &limits());

        let paris = &entities["Paris"];
        assert_eq!(
            paris.variants,
            vec!["paris", "the capital", "city of light"]
        );
        assert!(entities.contains_key("Lyon"));
    }

    #[test]
    fn colon_entities_dropped() {
        let body = "<text>[[File:x.jpg]] [[Category:Y]] [[wikt:word]] [[Paris]]</text>";
        let entities = contained_entities(body, "Paris", "Test", &limits());
        assert_eq!(entities.len(), 1);
        assert!(entities.contains_key("Paris"));
    }

    #[test]
    fn first_word_index_counts_words() {
        let body = "<text>[[Lyon]]</text>";
        let clean = "a small town near Lyon in France";
        let entities = contained_entities(body, clean, "Test", &limits());
        assert_eq!(entities["Lyon"].first_word_index, Some(4));
    }

    #[test]
    fn word_index_skips_bold_title_lead() {
        let body = "<text>[[Lyon]]</text>";
        let clean = "'''Test''' is near Lyon";
        let entities = contained_entities(body, clean, "Test", &limits());
        assert_eq!(entities["Lyon"].first_word_index, Some(2));
    }

    #[test]
    fn occurrence_after_new_not_counted() {
        let body = "<text>[[York]]</text>";
        let clean = "he moved to New York for work";
        let entities = contained_entities(body, clean, "Test", &limits());
        assert_eq!(entities["York"].first_word_index, None);
    }

    #[test]
    fn later_occurrence_counts_when_first_is_new() {
        let body = "<text>[[York]]</text>";
        let clean = "New York is far from York itself";
        let entities = contained_entities(body, clean, "Test", &limits());
        assert_eq!(entities["York"].first_word_index, Some(5));
    }

    #[test]
    fn absent_entity_has_no_index() {
        let body = "<text>[[Ghost]]</text>";
        let entities = contained_entities(body, "no mention here", "Test", &limits());
        assert_eq!(entities["Ghost"].first_word_index, None);
    }
}
