use crate::article_type::ArticleTypeTable;
use crate::codec;
use crate::config::Limits;
use crate::coords::{haversine_km, CoordinateTable};
use crate::links::{word_index_at, RedirectTable, ENTITY_REGEX};
use crate::text::{canonical_title, display_title};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::info;

const COPULAS: [&str; 4] = ["is", "was", "are", "were"];
const REGION_PREPOSITIONS: [&str; 3] = ["in", "on", "at"];

/// Phrase evidence scanned for by the located-at parser, first hit wins.
const LOCATED_PHRASES: [&str; 12] = [
    "located in ",
    "located at ",
    "located outside ",
    "located inside ",
    "located east ",
    "located west ",
    "located north ",
    "located south ",
    "located near ",
    "headquartered in ",
    "headquartered at ",
    "found in ",
];

static SEGMENT_DISTANCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{2,}\s*(km|kilometer|mile|mi)\b").unwrap());

static CLEAN_DISTANCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{2,}\s*(nautical\s*)?(km|kilomet\w*|miles?)\b").unwrap());

static RAW_CONVERT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{\{convert\|\d{2,}").unwrap());

static CONVERT_MARKER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\{\{convert").unwrap());

/// Clamps a byte offset forward to the next char boundary.
fn ceil_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn strip_word(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// "X is a <kind> in [[Y]], ..." evidence: coordinated link targets of the
/// prepositional region right after the copula. The caller only invokes
/// this for articles that themselves have coordinates.
pub fn parse_is_a_in(
    body: &str,
    title: &str,
    coords: &CoordinateTable,
    redirects: &RedirectTable,
    limits: &Limits,
) -> Vec<String> {
    let anchor = format!("'''{}'''", display_title(title));
    let Some(pos) = memchr::memmem::find(body.as_bytes(), anchor.as_bytes()) else {
        return Vec::new();
    };
    let start = pos + anchor.len();
    let end = ceil_boundary(body, start + limits.segment_characters_size);
    let segment = &body[start..end];

    // Distances right after the title mean "N km from Y", not containment.
    if SEGMENT_DISTANCE_REGEX.is_match(segment) || CONVERT_MARKER_REGEX.is_match(segment) {
        return Vec::new();
    }

    let tokens: Vec<&str> = segment.split_whitespace().collect();
    let mut verb_at = None;
    for (i, token) in tokens.iter().enumerate() {
        if i >= limits.max_words_till_verb {
            break;
        }
        if COPULAS.contains(&strip_word(token).as_str()) {
            verb_at = Some(i);
            break;
        }
        if token.ends_with('.') {
            break;
        }
    }
    let Some(verb_at) = verb_at else {
        return Vec::new();
    };

    let Some(prep_at) = tokens[verb_at..]
        .iter()
        .position(|t| REGION_PREPOSITIONS.contains(&strip_word(t).as_str()))
        .map(|rel| verb_at + rel)
    else {
        return Vec::new();
    };

    let mut region_tokens = Vec::new();
    for token in &tokens[prep_at + 1..] {
        region_tokens.push(*token);
        if token.ends_with('.') {
            break;
        }
    }
    let region = region_tokens.join(" ");

    let mut targets = Vec::new();
    for caps in ENTITY_REGEX.captures_iter(&region) {
        let target = caps[1].split('|').next().unwrap_or_default().trim();
        if target.is_empty() || target.contains(':') {
            continue;
        }
        let canonical = canonical_title(target);
        if let Some((resolved, _)) = coords.resolve(&canonical, redirects.map()) {
            let resolved = resolved.to_string();
            if !targets.contains(&resolved) {
                targets.push(resolved);
            }
        }
    }
    targets
}

pub struct LocatedAtContext<'a> {
    pub coords: &'a CoordinateTable,
    pub redirects: &'a RedirectTable,
    pub types: &'a ArticleTypeTable,
    pub limits: &'a Limits,
}

/// Finds the first "located in"-style phrase early in the prose and walks
/// the words after it, growing candidate spans until one names a
/// coordinated link entity. Sentences that talk about distances, or whose
/// surrounding entities are spread wider than the configured diameter, are
/// rejected wholesale.
pub fn parse_located_at(clean: &str, body: &str, ctx: &LocatedAtContext) -> Option<String> {
    let limits = ctx.limits;
    let lower = clean.to_lowercase();
    let body_lower = body.to_lowercase();

    let (phrase, phrase_pos) = LOCATED_PHRASES
        .iter()
        .filter_map(|p| lower.find(p).map(|pos| (*p, pos)))
        .min_by_key(|&(_, pos)| pos)?;

    if let Some(period) = lower.find('.') {
        if phrase_pos > period {
            return None;
        }
    }
    if word_index_at(&lower, phrase_pos) > limits.max_words_till_phrase {
        return None;
    }

    let line = lower[..phrase_pos]
        .rfind('\n')
        .map(|i| &lower[i + 1..])
        .unwrap_or(&lower);
    let line_end = line.find('\n').unwrap_or(line.len());
    if CLEAN_DISTANCE_REGEX.is_match(&line[..line_end]) {
        return None;
    }
    if RAW_CONVERT_REGEX.is_match(body) {
        return None;
    }
    if exceeds_entity_diameter(body, &body_lower, phrase, ctx) {
        return None;
    }

    // Offsets were found in the lowercased copy; clamp to boundaries of the
    // original in case case-folding shifted byte positions.
    let scan_start = ceil_boundary(clean, phrase_pos + phrase.len());
    let scan_end = ceil_boundary(clean, scan_start + limits.max_characters_post_phrase);
    let words: Vec<&str> = clean[scan_start..scan_end].split_whitespace().collect();

    for start in 0..words.len() {
        if start > 0 && words[start - 1].eq_ignore_ascii_case("new") {
            continue;
        }
        let mut best: Option<String> = None;
        let mut joined = String::new();
        for word in &words[start..] {
            if !joined.is_empty() {
                joined.push(' ');
            }
            joined.push_str(word);
            let candidate = normalise_candidate(&joined);
            if candidate.is_empty() {
                continue;
            }
            match classify_candidate(&candidate, &body_lower, ctx) {
                Outcome::Location(resolved) => best = Some(resolved),
                Outcome::EntityNotLocation => best = None,
                Outcome::NotEntity => {}
            }
        }
        if best.is_some() {
            return best;
        }
    }
    None
}

enum Outcome {
    Location(String),
    EntityNotLocation,
    NotEntity,
}

/// One trailing punctuation character stripped, first character uppercased.
fn normalise_candidate(joined: &str) -> String {
    let mut s = joined.to_string();
    if let Some(last) = s.chars().next_back() {
        if !last.is_alphanumeric() {
            s.truncate(s.len() - last.len_utf8());
        }
    }
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => s,
    }
}

fn classify_candidate(candidate: &str, body_lower: &str, ctx: &LocatedAtContext) -> Outcome {
    let canonical = canonical_title(candidate);
    let redirected = ctx.redirects.resolve(&canonical);

    let is_entity = entity_in_raw(body_lower, candidate)
        || redirected.is_some_and(|t| entity_in_raw(body_lower, &display_title(t)));
    if !is_entity {
        return Outcome::NotEntity;
    }

    match ctx.coords.resolve(&canonical, ctx.redirects.map()) {
        Some((resolved, _)) => Outcome::Location(resolved.to_string()),
        None => Outcome::EntityNotLocation,
    }
}

/// Raw-markup entity test: `[[x|` or `[[x]]`, lowercased, underscores as
/// spaces.
fn entity_in_raw(body_lower: &str, candidate: &str) -> bool {
    let name = candidate.to_lowercase().replace('_', " ");
    body_lower.contains(&format!("[[{}|", name)) || body_lower.contains(&format!("[[{}]]", name))
}

/// Largest pairwise haversine distance between coordinated link entities of
/// priority >= 3 around the phrase; a spread-out neighborhood means the
/// sentence is not talking about one place.
fn exceeds_entity_diameter(
    body: &str,
    body_lower: &str,
    phrase: &str,
    ctx: &LocatedAtContext,
) -> bool {
    let Some(pos) = body_lower.find(phrase.trim_end()) else {
        return false;
    };
    let limits = ctx.limits;
    let start = ceil_boundary(body, pos.saturating_sub(limits.max_characters_post_phrase));
    let end = ceil_boundary(body, pos + limits.max_characters_post_phrase);
    let window = &body[start..end];

    let mut points = Vec::new();
    for caps in ENTITY_REGEX.captures_iter(window) {
        let target = caps[1].split('|').next().unwrap_or_default().trim();
        if target.is_empty() || target.contains(':') {
            continue;
        }
        let canonical = canonical_title(target);
        if let Some((resolved, point)) = ctx.coords.resolve(&canonical, ctx.redirects.map()) {
            if ctx.types.get(resolved).location_priority() >= 3 {
                points.push(point);
            }
        }
    }

    for i in 0..points.len() {
        for j in i + 1..points.len() {
            if haversine_km(points[i], points[j]) > limits.max_entities_diameter_km {
                return true;
            }
        }
    }
    false
}

/// title -> located-at target, persisted as `N x (title, target)`.
#[derive(Default)]
pub struct LocatedAtTable {
    map: FxHashMap<String, String>,
}

impl LocatedAtTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: String, target: String) {
        self.map.insert(title, target);
    }

    pub fn get(&self, title: &str) -> Option<&str> {
        self.map.get(title).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

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
        .with_context(|| format!("Failed to save located-at table: {:?}", path))?;
        info!(entries = self.map.len(), path = ?path, "Located-at table saved");
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
        Ok(LocatedAtTable { map })
    }
}

/// title -> is-a-in target set, persisted as `N x (title, k, k x string)`.
#[derive(Default)]
pub struct IsAInTable {
    map: FxHashMap<String, Vec<String>>,
}

impl IsAInTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: String, targets: Vec<String>) {
        self.map.insert(title, targets);
    }

    pub fn get(&self, title: &str) -> Option<&[String]> {
        self.map.get(title).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut titles: Vec<&String> = self.map.keys().collect();
        titles.sort_unstable();
        codec::write_atomic(path, |w| {
            codec::write_u32(w, titles.len() as u32)?;
            for title in &titles {
                let targets = &self.map[*title];
                codec::write_str(w, title)?;
                codec::write_u32(w, targets.len() as u32)?;
                for target in targets {
                    codec::write_str(w, target)?;
                }
            }
            Ok(())
        })
        .with_context(|| format!("Failed to save is-a-in table: {:?}", path))?;
        info!(entries = self.map.len(), path = ?path, "Is-a-in table saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = codec::open_reader(path)?;
        let n = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
        let mut map = FxHashMap::with_capacity_and_hasher(n, Default::default());
        for _ in 0..n {
            let title = codec::read_str(&mut r)?;
            let k = codec::checked_len(codec::read_u32(&mut r)?, 4)?;
            let mut targets = Vec::with_capacity(k);
            for _ in 0..k {
                targets.push(codec::read_str(&mut r)?);
            }
            map.insert(title, targets);
        }
        Ok(IsAInTable { map })
    }
}
