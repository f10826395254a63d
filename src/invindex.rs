use crate::articles::ArticleRegistry;
use crate::codec;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// (article-id, quantised score) pair inside a posting list.
pub type Posting = (u32, u32);

/// Fixed-point score quantisation used by every persisted posting list.
pub fn quantise(score: f32) -> u32 {
    (score as f64 * 1_000_000.0).round() as u32
}

/// Posting lists in a dense id-indexed array; absent cells stand in for
/// empty lists and keep lookups O(1). Trailing absent cells are trimmed at
/// the end of construction.
pub struct PostingIndex {
    cells: Vec<Option<Vec<Posting>>>,
}

impl PostingIndex {
    pub fn get(&self, id: u32) -> Option<&[Posting]> {
        self.cells
            .get(id as usize)
            .and_then(|cell| cell.as_deref())
    }

    /// Array length after the trailing-absent trim.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Layout: `L:int`; per cell `k:int` and, when k > 0,
    /// `k x (article-id, quantised-score)`.
    pub fn save(&self, path: &Path) -> Result<()> {
        codec::write_atomic(path, |w| {
            codec::write_u32(w, self.cells.len() as u32)?;
            for cell in &self.cells {
                match cell {
                    None => codec::write_u32(w, 0)?,
                    Some(postings) => {
                        codec::write_u32(w, postings.len() as u32)?;
                        for &(article, score) in postings {
                            codec::write_u32(w, article)?;
                            codec::write_u32(w, score)?;
                        }
                    }
                }
            }
            Ok(())
        })
        .with_context(|| format!("Failed to save inverted index: {:?}", path))?;
        info!(cells = self.cells.len(), path = ?path, "Inverted index saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = codec::open_reader(path)?;
        let l = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
        let mut cells = Vec::with_capacity(l);
        for _ in 0..l {
            let k = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
            if k == 0 {
                cells.push(None);
                continue;
            }
            let mut postings = Vec::with_capacity(k);
            for _ in 0..k {
                let article = codec::read_u32(&mut r)?;
                let score = codec::read_u32(&mut r)?;
                postings.push((article, score));
            }
            cells.push(Some(postings));
        }
        Ok(PostingIndex { cells })
    }
}

pub struct PostingIndexBuilder {
    cells: Vec<Option<Vec<Posting>>>,
}

impl PostingIndexBuilder {
    pub fn new() -> Self {
        PostingIndexBuilder { cells: Vec::new() }
    }

    /// Appends one posting. Callers feed articles in ascending article-id
    /// order, which keeps every list sorted and duplicate-free.
    pub fn push(&mut self, key: u32, article: u32, score: f32) {
        self.reserve(key);
        self.cells[key as usize]
            .get_or_insert_with(Vec::new)
            .push((article, quantise(score)));
    }

    /// Amortised doubling: capacity grows to max(2*len, id+1).
    fn reserve(&mut self, key: u32) {
        let needed = key as usize + 1;
        if needed > self.cells.len() {
            let target = needed.max(self.cells.len() * 2);
            self.cells.resize_with(target, || None);
        }
    }

    /// Trims trailing absent cells and freezes the index.
    pub fn finish(mut self) -> PostingIndex {
        let trimmed_len = self
            .cells
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |i| i + 1);
        self.cells.truncate(trimmed_len);
        PostingIndex { cells: self.cells }
    }
}

impl Default for PostingIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The six typed indices: {words, categories, named-locations} x
/// {all articles, articles-with-coordinates}.
pub struct IndexFamily {
    pub words_all: PostingIndex,
    pub words_coordinated: PostingIndex,
    pub categories_all: PostingIndex,
    pub categories_coordinated: PostingIndex,
    pub locations_all: PostingIndex,
    pub locations_coordinated: PostingIndex,
}

impl IndexFamily {
    /// Inverts the registry's per-article vectors. Articles are walked in
    /// ascending id order; category postings all carry score 1.0.
    pub fn build(registry: &ArticleRegistry) -> IndexFamily {
        let (words_all, words_coordinated) = rayon::join(
            || Self::build_words(registry, false),
            || Self::build_words(registry, true),
        );
        let (categories_all, categories_coordinated) = rayon::join(
            || Self::build_categories(registry, false),
            || Self::build_categories(registry, true),
        );
        let (locations_all, locations_coordinated) = rayon::join(
            || Self::build_locations(registry, false),
            || Self::build_locations(registry, true),
        );
        IndexFamily {
            words_all,
            words_coordinated,
            categories_all,
            categories_coordinated,
            locations_all,
            locations_coordinated,
        }
    }

    fn build_words(registry: &ArticleRegistry, coordinated_only: bool) -> PostingIndex {
        let mut builder = PostingIndexBuilder::new();
        for record in registry.iter() {
            if coordinated_only && record.coordinates.is_none() {
                continue;
            }
            for (&term, &score) in record.tfidf.ids.iter().zip(&record.tfidf.scores) {
                builder.push(term, record.id, score);
            }
        }
        builder.finish()
    }

    fn build_categories(registry: &ArticleRegistry, coordinated_only: bool) -> PostingIndex {
        let mut builder = PostingIndexBuilder::new();
        for record in registry.iter() {
            if coordinated_only && record.coordinates.is_none() {
                continue;
            }
            for &category in &record.categories {
                builder.push(category, record.id, 1.0);
            }
        }
        builder.finish()
    }

    fn build_locations(registry: &ArticleRegistry, coordinated_only: bool) -> PostingIndex {
        let mut builder = PostingIndexBuilder::new();
        for record in registry.iter() {
            if coordinated_only && record.coordinates.is_none() {
                continue;
            }
            for (&location, &score) in record.locations.ids.iter().zip(&record.locations.scores)
            {
                builder.push(location, record.id, score);
            }
        }
        builder.finish()
    }
}
