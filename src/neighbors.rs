use crate::articles::{ArticleRecord, ArticleRegistry};
use crate::codec;
use crate::config::{NeighborSettings, PrunerSettings};
use crate::invindex::{Posting, PostingIndex};
use crate::pool;
use crate::pruner::Pruner;
use crate::similarity::{combined_score, ScoredArticle};
use crate::stats::PipelineStats;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// One line of the nearest-neighbor output: neighbors sorted by descending
/// score, truncated, source excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborRecord {
    pub source: u32,
    pub neighbors: Vec<(u32, f32)>,
}

/// Computes per-article nearest neighbors from the three
/// articles-with-coordinates inverted indices: posting-list fanout, k-of-n
/// pruning per component, then combined-similarity scoring.
pub struct NeighborEngine<'a> {
    registry: &'a ArticleRegistry,
    words: &'a PostingIndex,
    locations: &'a PostingIndex,
    categories: &'a PostingIndex,
    settings: &'a NeighborSettings,
}

impl<'a> NeighborEngine<'a> {
    pub fn new(
        registry: &'a ArticleRegistry,
        words: &'a PostingIndex,
        locations: &'a PostingIndex,
        categories: &'a PostingIndex,
        settings: &'a NeighborSettings,
    ) -> Self {
        NeighborEngine {
            registry,
            words,
            locations,
            categories,
            settings,
        }
    }

    fn component_candidates(
        &self,
        keys: &[u32],
        index: &PostingIndex,
        threshold: usize,
        pruner: &mut Pruner,
        out: &mut FxHashSet<u32>,
    ) {
        let fanout: Vec<&[Posting]> = keys.iter().filter_map(|&k| index.get(k)).collect();
        if fanout.is_empty() {
            return;
        }
        out.extend(pruner.prune(&fanout, threshold));
    }

    /// Union of the per-component pruned candidate sets, source excluded,
    /// ascending for deterministic tie order downstream.
    pub fn candidates(&self, source: &ArticleRecord, pruner: &mut Pruner) -> Vec<u32> {
        let weights = &self.settings.weights;
        let mut set = FxHashSet::default();
        if weights.text > 0.0 {
            self.component_candidates(
                &source.tfidf.ids,
                self.words,
                self.settings.tfidf_threshold,
                pruner,
                &mut set,
            );
        }
        if weights.locations > 0.0 {
            self.component_candidates(
                &source.locations.ids,
                self.locations,
                self.settings.locations_threshold,
                pruner,
                &mut set,
            );
        }
        if weights.categories > 0.0 {
            self.component_candidates(
                &source.categories,
                self.categories,
                self.settings.categories_threshold,
                pruner,
                &mut set,
            );
        }
        set.remove(&source.id);
        let mut candidates: Vec<u32> = set.into_iter().collect();
        candidates.sort_unstable();
        candidates
    }

    pub fn neighbors_for(&self, source: &ArticleRecord, pruner: &mut Pruner) -> NeighborRecord {
        let candidates = self.candidates(source, pruner);

        let src = ScoredArticle {
            tfidf: &source.tfidf,
            locations: &source.locations,
            categories: &source.categories,
        };
        let mut scored: Vec<(u32, f32)> = Vec::new();
        for id in candidates {
            // Self-hits are already pruned; candidates must be coordinated.
            if id == source.id {
                continue;
            }
            let Some(candidate) = self.registry.get(id) else {
                continue;
            };
            if candidate.coordinates.is_none() {
                continue;
            }
            let cand = ScoredArticle {
                tfidf: &candidate.tfidf,
                locations: &candidate.locations,
                categories: &candidate.categories,
            };
            let score = combined_score(&src, &cand, &self.settings.weights);
            if score >= self.settings.min_similarity {
                scored.push((id, score));
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.settings.max_neighbors);
        NeighborRecord {
            source: source.id,
            neighbors: scored,
        }
    }

    /// Runs every article through the worker pool and streams records to
    /// `path` (temp file renamed into place). The output is not sorted by
    /// source id; consumers index by the embedded id.
    pub fn run(
        &self,
        path: &Path,
        pruner_settings: &PrunerSettings,
        queue_capacity: usize,
        wait: Duration,
        progress: &ProgressBar,
        stats: &PipelineStats,
    ) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let writer = Mutex::new(codec::open_writer(&tmp_path)?);

        pool::run_bounded_with(
            self.settings.workers,
            queue_capacity,
            wait,
            (0..self.registry.len() as u32).map(Ok),
            || Pruner::new(pruner_settings.memory_size, pruner_settings.max_iteration),
            |pruner, id| {
                let Some(source) = self.registry.get(id) else {
                    return;
                };
                let record = self.neighbors_for(source, pruner);
                stats.add_neighbors(record.neighbors.len() as u64);

                let mut w = writer.lock().expect("neighbor writer mutex poisoned");
                write_record(&mut *w, &record).expect("failed to append neighbor record");
                drop(w);
                progress.inc(1);
            },
        )?;

        let mut w = writer
            .into_inner()
            .expect("neighbor writer mutex poisoned");
        std::io::Write::flush(&mut w).context("Failed to flush neighbor output")?;
        drop(w);
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename neighbor output to: {:?}", path))?;

        info!(articles = self.registry.len(), path = ?path, "Nearest neighbors written");
        Ok(())
    }
}

fn write_record<W: std::io::Write>(w: &mut W, record: &NeighborRecord) -> Result<()> {
    codec::write_u32(w, record.source)?;
    codec::write_u32(w, record.neighbors.len() as u32)?;
    for &(id, score) in &record.neighbors {
        codec::write_u32(w, id)?;
        codec::write_f32(w, score)?;
    }
    Ok(())
}

/// Reads a neighbor file back; record order is whatever the workers
/// produced.
pub fn read_neighbors(path: &Path) -> Result<Vec<NeighborRecord>> {
    let mut r = codec::open_reader(path)?;
    let mut records = Vec::new();
    while let Some(source) = codec::read_u32_opt(&mut r)? {
        let k = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
        let mut neighbors = Vec::with_capacity(k);
        for _ in 0..k {
            let id = codec::read_u32(&mut r)?;
            let score = codec::read_f32(&mut r)?;
            neighbors.push((id, score));
        }
        records.push(NeighborRecord { source, neighbors });
    }
    Ok(records)
}
