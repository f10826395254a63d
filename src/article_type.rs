use crate::codec;
use crate::config::{MAX_INITIAL_WORDS, VERB_PROXIMITY};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::info;

/// Heuristic geographic nature of an article. The location priority orders
/// types from broad (country) to narrow (spot); -1 marks non-locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleType {
    None,
    Ship,
    Person,
    Land,
    Sea,
    Country,
    State,
    Autonomous,
    Region,
    Nature,
    Settlement,
    Spot,
}

impl ArticleType {
    pub fn location_priority(self) -> i32 {
        match self {
            ArticleType::None | ArticleType::Ship | ArticleType::Person => -1,
            ArticleType::Land | ArticleType::Sea => 0,
            ArticleType::Country => 1,
            ArticleType::State => 2,
            ArticleType::Autonomous => 3,
            ArticleType::Region | ArticleType::Nature => 4,
            ArticleType::Settlement => 5,
            ArticleType::Spot => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ArticleType::None => "NONE",
            ArticleType::Ship => "SHIP",
            ArticleType::Person => "PERSON",
            ArticleType::Land => "LAND",
            ArticleType::Sea => "SEA",
            ArticleType::Country => "COUNTRY",
            ArticleType::State => "STATE",
            ArticleType::Autonomous => "AUTONOMOUS",
            ArticleType::Region => "REGION",
            ArticleType::Nature => "NATURE",
            ArticleType::Settlement => "SETTLEMENT",
            ArticleType::Spot => "SPOT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "NONE" => ArticleType::None,
            "SHIP" => ArticleType::Ship,
            "PERSON" => ArticleType::Person,
            "LAND" => ArticleType::Land,
            "SEA" => ArticleType::Sea,
            "COUNTRY" => ArticleType::Country,
            "STATE" => ArticleType::State,
            "AUTONOMOUS" => ArticleType::Autonomous,
            "REGION" => ArticleType::Region,
            "NATURE" => ArticleType::Nature,
            "SETTLEMENT" => ArticleType::Settlement,
            "SPOT" => ArticleType::Spot,
            _ => return None,
        })
    }
}

struct VariantSet {
    article_type: ArticleType,
    singular: &'static [&'static str],
    plural: &'static [&'static str],
}

/// Closed per-type variant tables; the authoritative copies. Multi-word
/// variants use underscores, matching normalised category form.
const VARIANTS: &[VariantSet] = &[
    VariantSet {
        article_type: ArticleType::Land,
        singular: &["continent", "landmass"],
        plural: &["continents", "landmasses"],
    },
    VariantSet {
        article_type: ArticleType::Sea,
        singular: &["sea", "ocean", "gulf", "bay", "strait"],
        plural: &["seas", "oceans", "gulfs", "bays", "straits"],
    },
    VariantSet {
        article_type: ArticleType::Country,
        singular: &["country", "nation"],
        plural: &["countries", "nations"],
    },
    VariantSet {
        article_type: ArticleType::State,
        singular: &["state", "province"],
        plural: &["states", "provinces"],
    },
    VariantSet {
        article_type: ArticleType::Autonomous,
        singular: &[
            "autonomous_community",
            "autonomous_region",
            "autonomous_republic",
        ],
        plural: &[
            "autonomous_communities",
            "autonomous_regions",
            "autonomous_republics",
        ],
    },
    VariantSet {
        article_type: ArticleType::Region,
        singular: &["region", "county", "district", "prefecture", "department", "territory"],
        plural: &[
            "regions",
            "counties",
            "districts",
            "prefectures",
            "departments",
            "territories",
        ],
    },
    VariantSet {
        article_type: ArticleType::Nature,
        singular: &[
            "mountain", "river", "lake", "island", "forest", "valley", "glacier", "volcano",
            "desert", "peninsula", "reef", "waterfall",
        ],
        plural: &[
            "mountains",
            "rivers",
            "lakes",
            "islands",
            "forests",
            "valleys",
            "glaciers",
            "volcanoes",
            "deserts",
            "peninsulas",
            "reefs",
            "waterfalls",
        ],
    },
    VariantSet {
        article_type: ArticleType::Settlement,
        singular: &[
            "city",
            "town",
            "village",
            "settlement",
            "commune",
            "municipality",
            "borough",
            "suburb",
            "hamlet",
            "capital",
        ],
        plural: &[
            "cities",
            "towns",
            "villages",
            "settlements",
            "communes",
            "municipalities",
            "boroughs",
            "suburbs",
            "hamlets",
            "capitals",
        ],
    },
    VariantSet {
        article_type: ArticleType::Spot,
        singular: &[
            "building",
            "church",
            "castle",
            "museum",
            "stadium",
            "airport",
            "station",
            "bridge",
            "university",
            "school",
            "park",
            "monument",
            "hospital",
            "cathedral",
            "palace",
            "tower",
            "square",
            "street",
            "fort",
            "lighthouse",
        ],
        plural: &[
            "buildings",
            "churches",
            "castles",
            "museums",
            "stadiums",
            "airports",
            "stations",
            "bridges",
            "universities",
            "schools",
            "parks",
            "monuments",
            "hospitals",
            "cathedrals",
            "palaces",
            "towers",
            "squares",
            "streets",
            "forts",
            "lighthouses",
        ],
    },
    VariantSet {
        article_type: ArticleType::Ship,
        singular: &["ship", "vessel", "frigate", "destroyer", "submarine"],
        plural: &["ships", "vessels", "frigates", "destroyers", "submarines"],
    },
];

static BIRTHS_DEATHS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+s?_(births|deaths)$").unwrap());

static PEOPLE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^People_(from|in|of)_").unwrap());

static SETTLEMENT_TYPE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\|\s*settlement_type\s*=\s*\[\[([^\]]+)\]\]").unwrap());

const SHIP_SUFFIX_EXCLUSIONS: [&str; 4] =
    ["scholarship)", "fellowship)", "ownership)", "membership)"];

/// Category, infobox, then lead-text heuristics, in that order.
pub fn parse_article_type(
    title: &str,
    categories: &[String],
    clean: &str,
    body: &str,
) -> ArticleType {
    if let Some(t) = from_categories(categories) {
        return t;
    }
    if let Some(t) = from_settlement_type(body) {
        return t;
    }
    if let Some(t) = from_lead_text(clean, categories) {
        return t;
    }
    if let Some(t) = from_title_suffix(title) {
        return t;
    }
    ArticleType::None
}

fn from_categories(categories: &[String]) -> Option<ArticleType> {
    let mut best: Option<ArticleType> = None;
    for category in categories {
        if is_person_category(category) {
            return Some(ArticleType::Person);
        }
        let stripped = category
            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '-' || c == '_')
            .to_lowercase();
        if let Some(t) = match_plural_category(&stripped) {
            if best.is_none_or(|b| t.location_priority() > b.location_priority()) {
                best = Some(t);
            }
        }
    }
    best
}

fn is_person_category(category: &str) -> bool {
    category == "Living_people"
        || category.ends_with("_alumni")
        || BIRTHS_DEATHS_REGEX.is_match(category)
        || PEOPLE_REGEX.is_match(category)
}

/// A category names a type when it equals a plural variant, or starts with
/// one and then scopes it ("cities_in_france", "rivers_of_europe").
fn match_plural_category(stripped: &str) -> Option<ArticleType> {
    for set in VARIANTS {
        for variant in set.plural {
            if stripped == *variant
                || (stripped.starts_with(variant)
                    && (stripped.contains("_in_") || stripped.contains("_of_")))
            {
                return Some(set.article_type);
            }
        }
    }
    None
}

fn from_settlement_type(body: &str) -> Option<ArticleType> {
    let caps = SETTLEMENT_TYPE_REGEX.captures(body)?;
    let mut best: Option<ArticleType> = None;
    for part in caps[1].split('|') {
        let normalised = part.trim().to_lowercase().replace(' ', "_");
        if let Some(t) = match_variant_word(&normalised) {
            if best.is_none_or(|b| t.location_priority() > b.location_priority()) {
                best = Some(t);
            }
        }
    }
    best
}

fn match_variant_word(word: &str) -> Option<ArticleType> {
    for set in VARIANTS {
        if set.singular.contains(&word) || set.plural.contains(&word) {
            return Some(set.article_type);
        }
    }
    None
}

/// In the first words of the lead, looks for "is/was/are/were ... <variant>".
/// A directly following higher-priority variant wins ("region capital" is a
/// SETTLEMENT, not a REGION). COUNTRY and STATE need category corroboration.
fn from_lead_text(clean: &str, categories: &[String]) -> Option<ArticleType> {
    let words: Vec<String> = clean
        .split_whitespace()
        .take(MAX_INITIAL_WORDS)
        .map(normalise_word)
        .collect();

    let verb_at = words
        .iter()
        .position(|w| matches!(w.as_str(), "is" | "was" | "are" | "were"))?;

    let window_end = (verb_at + 1 + VERB_PROXIMITY).min(words.len());
    let mut i = verb_at + 1;
    while i < window_end {
        if let Some(t) = match_at(&words, i) {
            let chosen = match match_at(&words, i + 1) {
                Some(next) if next.location_priority() > t.location_priority() => next,
                _ => t,
            };
            if matches!(chosen, ArticleType::Country | ArticleType::State)
                && !has_corroborating_category(chosen, categories)
            {
                i += 1;
                continue;
            }
            return Some(chosen);
        }
        i += 1;
    }
    None
}

/// Single word, or the underscore-joined pair starting here (for the
/// multi-word autonomous variants).
fn match_at(words: &[String], i: usize) -> Option<ArticleType> {
    if i >= words.len() {
        return None;
    }
    if i + 1 < words.len() {
        let pair = format!("{}_{}", words[i], words[i + 1]);
        if let Some(t) = match_variant_word(&pair) {
            return Some(t);
        }
    }
    match_variant_word(&words[i])
}

fn has_corroborating_category(t: ArticleType, categories: &[String]) -> bool {
    let prefix = match t {
        ArticleType::Country => "countries",
        ArticleType::State => "states",
        _ => return true,
    };
    categories.iter().any(|c| {
        let lower = c.to_lowercase();
        lower.starts_with(prefix) && (lower.contains("_in_") || lower.contains("_of_"))
    })
}

fn normalise_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

fn from_title_suffix(title: &str) -> Option<ArticleType> {
    let lower = title.to_lowercase();
    if lower.ends_with("ship)") && !SHIP_SUFFIX_EXCLUSIONS.iter().any(|s| lower.ends_with(s)) {
        return Some(ArticleType::Ship);
    }
    None
}

/// title -> heuristic type, persisted as `N x (title, type-name)`.
#[derive(Default)]
pub struct ArticleTypeTable {
    map: FxHashMap<String, ArticleType>,
}

impl ArticleTypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: String, t: ArticleType) {
        self.map.insert(title, t);
    }

    pub fn get(&self, title: &str) -> ArticleType {
        self.map.get(title).copied().unwrap_or(ArticleType::None)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ArticleType)> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut titles: Vec<&String> = self.map.keys().collect();
        titles.sort_unstable();
        codec::write_atomic(path, |w| {
            codec::write_u32(w, titles.len() as u32)?;
            for title in &titles {
                codec::write_str(w, title)?;
                codec::write_str(w, self.map[*title].name())?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to save article types: {:?}", path))?;
        info!(entries = self.map.len(), path = ?path, "Article types saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = codec::open_reader(path)?;
        let n = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
        let mut map = FxHashMap::with_capacity_and_hasher(n, Default::default());
        for _ in 0..n {
            let title = codec::read_str(&mut r)?;
            let name = codec::read_str(&mut r)?;
            let t = ArticleType::from_name(&name)
                .with_context(|| format!("unknown article type: {}", name))?;
            map.insert(title, t);
        }
        Ok(ArticleTypeTable { map })
    }
}
