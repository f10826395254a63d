use crate::codec;
use crate::config::Limits;
use crate::coords::CoordinateTable;
use crate::dictionary::Dictionary;
use crate::links::{ContainedEntity, RedirectTable};
use crate::registry::IdRegistry;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::info;

/// Parallel (ids, scores) arrays, ids strictly ascending. Empty vectors are
/// legal; non-empty ones are L2-normalised by their builders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    pub ids: Vec<u32>,
    pub scores: Vec<f32>,
}

impl SparseVector {
    pub fn new(ids: Vec<u32>, scores: Vec<f32>) -> Self {
        debug_assert_eq!(ids.len(), scores.len());
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        SparseVector { ids, scores }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Normalises to unit length; a vector with no mass becomes empty so
    /// the "unit norm or empty" invariant holds.
    fn l2_normalise(&mut self) {
        let norm = self.scores.iter().map(|s| s * s).sum::<f32>().sqrt();
        if norm > 0.0 {
            for s in &mut self.scores {
                *s /= norm;
            }
        } else {
            self.ids.clear();
            self.scores.clear();
        }
    }
}

/// Builds the article's TF-IDF vector: `log10(1 + tf) * logIdf(term)` over
/// known dictionary terms, top `max_elements` kept (score ties broken by
/// arrival order), ids ascending, L2-normalised.
pub fn build_tfidf(tokens: &[String], dict: &Dictionary, max_elements: usize) -> SparseVector {
    let mut counts: FxHashMap<u32, u32> = FxHashMap::default();
    let mut arrival: Vec<u32> = Vec::new();
    for token in tokens {
        let Some(id) = dict.id_of(token) else {
            continue;
        };
        let count = counts.entry(id).or_insert(0);
        if *count == 0 {
            arrival.push(id);
        }
        *count += 1;
    }

    let mut scored: Vec<(usize, u32, f32)> = arrival
        .iter()
        .enumerate()
        .map(|(order, &id)| {
            let tf = counts[&id] as f32;
            (order, id, (1.0 + tf).log10() * dict.log_idf(id))
        })
        .collect();

    if scored.len() > max_elements {
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(max_elements);
    }
    scored.sort_by_key(|&(_, id, _)| id);

    let mut vector = SparseVector {
        ids: scored.iter().map(|&(_, id, _)| id).collect(),
        scores: scored.iter().map(|&(_, _, s)| s).collect(),
    };
    vector.l2_normalise();
    vector
}

const VARIANT_PREFIXES: [char; 10] = [' ', '\n', '[', '{', '(', '-', '_', '"', '\'', '|'];
const VARIANT_SUFFIXES: [char; 7] = [',', '.', '?', '!', ']', '}', ')'];

fn valid_prefix(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => VARIANT_PREFIXES.contains(&c),
    }
}

fn valid_suffix(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => VARIANT_PREFIXES.contains(&c) || VARIANT_SUFFIXES.contains(&c),
    }
}

/// Non-overlapping, delimiter-bounded occurrence count; the scan advances
/// by the variant length at every hit.
fn count_occurrences(haystack: &str, variant: &str) -> u32 {
    if variant.is_empty() {
        return 0;
    }
    let mut count = 0;
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(variant) {
        let pos = from + rel;
        let before = haystack[..pos].chars().next_back();
        let after = haystack[pos + variant.len()..].chars().next();
        if valid_prefix(before) && valid_suffix(after) {
            count += 1;
        }
        from = pos + variant.len();
    }
    count
}

/// Builds the named-location vector from the article's contained entities:
/// entities resolving to a coordinated title are counted in the prose by
/// their maximal variants, scored `sqrt(count / totalCount)`, truncated to
/// the highest `max_named_locations_per_article`, and L2-normalised.
pub fn build_location_vector(
    entities: &FxHashMap<String, ContainedEntity>,
    clean: &str,
    coords: &CoordinateTable,
    redirects: &RedirectTable,
    titles: &IdRegistry,
    limits: &Limits,
) -> SparseVector {
    let haystack = clean.to_lowercase();
    let mut counts: FxHashMap<u32, u32> = FxHashMap::default();

    for (official, entity) in entities {
        let Some((resolved, _)) = coords.resolve(official, redirects.map()) else {
            continue;
        };
        match entity.first_word_index {
            Some(index) if index <= limits.max_word_index => {}
            _ => continue,
        }

        // Only maximal variants count; a variant shadowed by a longer one
        // would double-count the longer mention.
        let count: u32 = entity
            .variants
            .iter()
            .enumerate()
            .filter(|(i, v)| {
                !entity
                    .variants
                    .iter()
                    .enumerate()
                    .any(|(j, w)| *i != j && w.len() > v.len() && w.contains(v.as_str()))
            })
            .map(|(_, v)| count_occurrences(&haystack, v))
            .sum();
        if count == 0 {
            continue;
        }

        let Some(id) = titles.id_of(resolved) else {
            continue;
        };
        *counts.entry(id).or_insert(0) += count;
    }

    let total: u32 = counts.values().sum();
    if total == 0 {
        return SparseVector::default();
    }

    let mut entries: Vec<(u32, u32)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    entries.truncate(limits.max_named_locations_per_article);
    entries.sort_by_key(|&(id, _)| id);

    let mut vector = SparseVector {
        ids: entries.iter().map(|&(id, _)| id).collect(),
        scores: entries
            .iter()
            .map(|&(_, count)| (count as f32 / total as f32).sqrt())
            .collect(),
    };
    vector.l2_normalise();
    vector
}

/// title -> sparse vector, the persisted form of both the TF-IDF and the
/// named-location families.
#[derive(Default)]
pub struct VectorTable {
    map: FxHashMap<String, SparseVector>,
}

impl VectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: String, vector: SparseVector) {
        self.map.insert(title, vector);
    }

    pub fn get(&self, title: &str) -> Option<&SparseVector> {
        self.map.get(title)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SparseVector)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Layout: `N:int`; per article `title`, `k:int`, `k x int`, `k:int`,
    /// `k x float`, title order.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut titles: Vec<&String> = self.map.keys().collect();
        titles.sort_unstable();
        codec::write_atomic(path, |w| {
            codec::write_u32(w, titles.len() as u32)?;
            for title in &titles {
                let vector = &self.map[*title];
                codec::write_str(w, title)?;
                codec::write_u32(w, vector.ids.len() as u32)?;
                for id in &vector.ids {
                    codec::write_u32(w, *id)?;
                }
                codec::write_u32(w, vector.scores.len() as u32)?;
                for score in &vector.scores {
                    codec::write_f32(w, *score)?;
                }
            }
            Ok(())
        })
        .with_context(|| format!("Failed to save vectors: {:?}", path))?;
        info!(entries = self.map.len(), path = ?path, "Vectors saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = codec::open_reader(path)?;
        let n = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
        let mut map = FxHashMap::with_capacity_and_hasher(n, Default::default());
        for _ in 0..n {
            let title = codec::read_str(&mut r)?;
            let k = codec::checked_len(codec::read_u32(&mut r)?, 4)?;
            let mut ids = Vec::with_capacity(k);
            for _ in 0..k {
                ids.push(codec::read_u32(&mut r)?);
            }
            let k2 = codec::checked_len(codec::read_u32(&mut r)?, 4)?;
            anyhow::ensure!(
                k == k2,
                "vector arrays disagree for {:?}: {} ids vs {} scores",
                title,
                k,
                k2
            );
            let mut scores = Vec::with_capacity(k2);
            for _ in 0..k2 {
                scores.push(codec::read_f32(&mut r)?);
            }
            map.insert(title, SparseVector { ids, scores });
        }
        Ok(VectorTable { map })
    }
}

impl FromIterator<(String, SparseVector)> for VectorTable {
    fn from_iter<T: IntoIterator<Item = (String, SparseVector)>>(iter: T) -> Self {
        VectorTable {
            map: iter.into_iter().collect(),
        }
    }
}
