use crate::article_type::{ArticleType, ArticleTypeTable};
use crate::codec;
use crate::coords::CoordinateTable;
use crate::phrases::{IsAInTable, LocatedAtTable};
use crate::registry::IdRegistry;
use crate::vectors::{SparseVector, VectorTable};
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::{info, warn};

/// title -> sorted unique category ids, persisted as
/// `N x (title, k, k x int)`.
#[derive(Default)]
pub struct ArticleCategoriesTable {
    map: FxHashMap<String, Vec<u32>>,
}

impl ArticleCategoriesTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: String, mut categories: Vec<u32>) {
        categories.sort_unstable();
        categories.dedup();
        self.map.insert(title, categories);
    }

    pub fn get(&self, title: &str) -> Option<&[u32]> {
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
                let categories = &self.map[*title];
                codec::write_str(w, title)?;
                codec::write_u32(w, categories.len() as u32)?;
                for id in categories {
                    codec::write_u32(w, *id)?;
                }
            }
            Ok(())
        })
        .with_context(|| format!("Failed to save article categories: {:?}", path))?;
        info!(entries = self.map.len(), path = ?path, "Article categories saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = codec::open_reader(path)?;
        let n = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
        let mut map = FxHashMap::with_capacity_and_hasher(n, Default::default());
        for _ in 0..n {
            let title = codec::read_str(&mut r)?;
            let k = codec::checked_len(codec::read_u32(&mut r)?, 4)?;
            let mut categories = Vec::with_capacity(k);
            for _ in 0..k {
                categories.push(codec::read_u32(&mut r)?);
            }
            map.insert(title, categories);
        }
        Ok(ArticleCategoriesTable { map })
    }
}

/// Everything known about one article after all field parsers ran; created
/// once by the registry join and immutable afterwards.
#[derive(Debug, Clone)]
pub struct ArticleRecord {
    pub id: u32,
    pub coordinates: Option<(f64, f64)>,
    pub article_type: ArticleType,
    pub categories: Vec<u32>,
    pub tfidf: SparseVector,
    pub locations: SparseVector,
    pub located_at: Option<u32>,
    pub is_a_in: Vec<u32>,
}

/// Dense, id-indexed join of every per-article artifact. References to
/// titles missing from the title registry are integrity violations: the
/// offending item is skipped and counted, never propagated.
pub struct ArticleRegistry {
    records: Vec<ArticleRecord>,
    integrity_skips: u64,
}

pub struct JoinInputs<'a> {
    pub titles: &'a IdRegistry,
    pub coordinates: &'a CoordinateTable,
    pub types: &'a ArticleTypeTable,
    pub categories: &'a ArticleCategoriesTable,
    pub tfidf: &'a VectorTable,
    pub locations: &'a VectorTable,
    pub located_at: &'a LocatedAtTable,
    pub is_a_in: &'a IsAInTable,
}

impl ArticleRegistry {
    pub fn join(inputs: &JoinInputs) -> ArticleRegistry {
        let titles = inputs.titles;
        let mut integrity_skips = 0u64;
        let mut records = Vec::with_capacity(titles.len());

        for id in 0..titles.len() as u32 {
            let title = titles
                .name_of(id)
                .expect("registry ids are dense in [0, N)");

            let mut categories = inputs
                .categories
                .get(title)
                .map(<[u32]>::to_vec)
                .unwrap_or_default();
            categories.sort_unstable();
            categories.dedup();

            let located_at = match inputs.located_at.get(title) {
                None => None,
                Some(target) => match titles.id_of(target) {
                    Some(target_id) => Some(target_id),
                    None => {
                        warn!(title, target, "located-at target missing from registry");
                        integrity_skips += 1;
                        None
                    }
                },
            };

            let mut is_a_in = Vec::new();
            for target in inputs.is_a_in.get(title).unwrap_or_default() {
                match titles.id_of(target) {
                    Some(target_id) => is_a_in.push(target_id),
                    None => {
                        warn!(title, target = target.as_str(), "is-a-in target missing from registry");
                        integrity_skips += 1;
                    }
                }
            }
            is_a_in.sort_unstable();
            is_a_in.dedup();

            records.push(ArticleRecord {
                id,
                coordinates: inputs.coordinates.get(title),
                article_type: inputs.types.get(title),
                categories,
                tfidf: inputs.tfidf.get(title).cloned().unwrap_or_default(),
                locations: inputs.locations.get(title).cloned().unwrap_or_default(),
                located_at,
                is_a_in,
            });
        }

        info!(
            articles = records.len(),
            integrity_skips, "Article registry joined"
        );
        ArticleRegistry {
            records,
            integrity_skips,
        }
    }

    pub fn get(&self, id: u32) -> Option<&ArticleRecord> {
        self.records.get(id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArticleRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn coordinated_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.coordinates.is_some())
            .count()
    }

    pub fn integrity_skips(&self) -> u64 {
        self.integrity_skips
    }
}
