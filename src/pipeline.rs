use crate::article_type::{parse_article_type, ArticleType, ArticleTypeTable};
use crate::articles::{ArticleCategoriesTable, ArticleRegistry, JoinInputs};
use crate::census;
use crate::config::Settings;
use crate::coords::{parse_coordinates, CoordinateTable};
use crate::dictionary::{Dictionary, DictionaryBuilder};
use crate::dump::{DumpOptions, DumpReader, RawRecord};
use crate::invindex::{IndexFamily, PostingIndex};
use crate::links::{contained_entities, parse_categories, parse_redirect, RedirectTable};
use crate::neighbors::NeighborEngine;
use crate::phrases::{parse_is_a_in, parse_located_at, IsAInTable, LocatedAtContext, LocatedAtTable};
use crate::pool;
use crate::registry::{IdRegistry, SharedRegistry};
use crate::stats::PipelineStats;
use crate::text::{canonical_title, clean_text};
use crate::tokenize::Tokenizer;
use crate::vectors::{build_location_vector, build_tfidf, SparseVector, VectorTable};
use anyhow::{Context, Result};
use dashmap::DashMap;
use indicatif::{ProgressBar, ProgressStyle};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// Wall-time accounting for one phase.
pub struct PhaseReport {
    pub name: &'static str,
    pub duration: Duration,
    pub skipped: bool,
}

/// Sequences the build: redirects, coordinates, catalog, dictionary,
/// vectors, inverted indices, nearest neighbors. Every phase detects its
/// own outputs and skips work that is already on disk, so reruns resume
/// from the first missing artifact.
pub struct Pipeline<'a> {
    settings: &'a Settings,
    stats: &'a PipelineStats,
    dump_path: &'a Path,
    limit: u64,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        stats: &'a PipelineStats,
        dump_path: &'a Path,
        limit: u64,
    ) -> Self {
        Pipeline {
            settings,
            stats,
            dump_path,
            limit,
        }
    }

    pub fn run(&self) -> Result<Vec<PhaseReport>> {
        let files = &self.settings.files;
        let mut reports = Vec::new();

        reports.push(self.phase(
            "Redirects",
            &[files.redirects.clone()],
            |p| p.build_redirects(),
        )?);
        reports.push(self.phase(
            "Coordinates",
            &[files.coordinates.clone()],
            |p| p.build_coordinates(),
        )?);
        reports.push(self.phase(
            "Catalog",
            &[
                files.titles.clone(),
                files.categories.clone(),
                files.article_categories.clone(),
                files.article_types.clone(),
            ],
            |p| p.build_catalog(),
        )?);
        reports.push(self.phase(
            "Dictionary",
            &[files.dictionary.clone()],
            |p| p.build_dictionary(),
        )?);
        reports.push(self.phase(
            "Vectors",
            &[
                files.tfidf_vectors.clone(),
                files.location_vectors.clone(),
                files.located_at.clone(),
                files.is_a_in.clone(),
            ],
            |p| p.build_vectors(),
        )?);
        reports.push(self.phase(
            "Inverted indices",
            &[
                files.index_words_all.clone(),
                files.index_words_coordinated.clone(),
                files.index_categories_all.clone(),
                files.index_categories_coordinated.clone(),
                files.index_locations_all.clone(),
                files.index_locations_coordinated.clone(),
            ],
            |p| p.build_indices(),
        )?);
        reports.push(self.phase(
            "Nearest neighbors",
            &[files.neighbors.clone()],
            |p| p.build_neighbors(),
        )?);

        Ok(reports)
    }

    fn phase(
        &self,
        name: &'static str,
        outputs: &[PathBuf],
        body: impl FnOnce(&Self) -> Result<()>,
    ) -> Result<PhaseReport> {
        println!();
        println!("=== {} ===", name);

        if outputs.iter().all(|p| p.exists()) {
            info!(phase = name, "Output already present, skipping");
            println!("Already built, skipping.");
            return Ok(PhaseReport {
                name,
                duration: Duration::ZERO,
                skipped: true,
            });
        }

        let start = Instant::now();
        body(self).with_context(|| format!("{} phase failed", name))?;
        let duration = start.elapsed();
        println!("Completed in {:.2}s", duration.as_secs_f64());
        Ok(PhaseReport {
            name,
            duration,
            skipped: false,
        })
    }

    fn articles_reader(&self) -> Result<DumpReader> {
        DumpReader::open(
            self.dump_path,
            DumpOptions {
                limit: self.limit,
                ..Default::default()
            },
        )
    }

    fn article_bar(&self) -> Result<ProgressBar> {
        let expected = census::expected_articles(
            &self.settings.files.census,
            self.dump_path,
            self.limit,
        )?;
        let bar = ProgressBar::new(expected);
        bar.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .expect("static progress template")
            .progress_chars("##-"),
        );
        Ok(bar)
    }

    fn build_redirects(&self) -> Result<()> {
        let options = DumpOptions {
            redirects_only: true,
            limit: self.limit,
            ..Default::default()
        };
        let mut reader = DumpReader::open(self.dump_path, options)?;
        let mut table = RedirectTable::new();
        for record in reader.by_ref() {
            let record = record?;
            self.stats.inc_records();
            match parse_redirect(&record.body) {
                Some(target) => {
                    table.insert(canonical_title(&record.title), target);
                    self.stats.inc_redirects();
                }
                None => self.stats.inc_parse_errors(),
            }
        }
        self.stats.add_skipped(reader.skipped());
        table.save(&self.settings.files.redirects)
    }

    fn build_coordinates(&self) -> Result<()> {
        let progress = self.article_bar()?;
        let found: DashMap<String, (f64, f64)> = DashMap::new();

        pool::run_bounded(
            self.settings.neighbors.workers,
            self.settings.queue_capacity(),
            self.settings.termination_wait,
            self.articles_reader()?,
            |record: RawRecord| {
                self.stats.inc_records();
                if let Some((lat, lon)) = parse_coordinates(&record.body) {
                    found.insert(canonical_title(&record.title), (lat, lon));
                    self.stats.inc_coordinates();
                }
                progress.inc(1);
            },
        )?;
        progress.finish_and_clear();

        let mut table = CoordinateTable::new();
        for (title, (lat, lon)) in found {
            table.insert(title, lat, lon);
        }
        table.save(&self.settings.files.coordinates)
    }

    fn build_catalog(&self) -> Result<()> {
        let files = &self.settings.files;
        let progress = self.article_bar()?;

        // Carrying an existing title registry keeps the id assignment
        // stable; new titles extend the range.
        let titles = SharedRegistry::new(if files.titles.exists() {
            IdRegistry::load(&files.titles)?
        } else {
            IdRegistry::new()
        });
        let categories = SharedRegistry::new(if files.categories.exists() {
            IdRegistry::load(&files.categories)?
        } else {
            IdRegistry::new()
        });
        let article_categories: DashMap<String, Vec<u32>> = DashMap::new();
        let article_types: DashMap<String, ArticleType> = DashMap::new();
        let limits = &self.settings.limits;

        pool::run_bounded(
            self.settings.neighbors.workers,
            self.settings.queue_capacity(),
            self.settings.termination_wait,
            self.articles_reader()?,
            |record: RawRecord| {
                self.stats.inc_records();
                let title = canonical_title(&record.title);
                titles.intern(&title);

                let names = parse_categories(&record.body);
                let ids: Vec<u32> = names.iter().map(|c| categories.intern(c)).collect();

                let clean = clean_text(&record.body, &title, limits).unwrap_or_default();
                let article_type = parse_article_type(&record.title, &names, &clean, &record.body);

                article_categories.insert(title.clone(), ids);
                article_types.insert(title, article_type);
                progress.inc(1);
            },
        )?;
        progress.finish_and_clear();

        titles.into_inner().save(&files.titles)?;
        categories.into_inner().save(&files.categories)?;

        let mut categories_table = ArticleCategoriesTable::new();
        for (title, ids) in article_categories {
            categories_table.insert(title, ids);
        }
        categories_table.save(&files.article_categories)?;

        let mut types_table = ArticleTypeTable::new();
        for (title, t) in article_types {
            types_table.insert(title, t);
        }
        types_table.save(&files.article_types)
    }

    fn build_dictionary(&self) -> Result<()> {
        let progress = self.article_bar()?;
        let tokenizer = Tokenizer::new();
        let builder = Mutex::new(DictionaryBuilder::new());
        let limits = &self.settings.limits;

        pool::run_bounded(
            self.settings.neighbors.workers,
            self.settings.queue_capacity(),
            self.settings.termination_wait,
            self.articles_reader()?,
            |record: RawRecord| {
                self.stats.inc_records();
                let title = canonical_title(&record.title);
                let Some(clean) = clean_text(&record.body, &title, limits) else {
                    self.stats.inc_parse_errors();
                    progress.inc(1);
                    return;
                };
                // Token counting stays thread-local; the builder lock is
                // taken once per article.
                let tokens = tokenizer.tokenize(&clean);
                let distinct: FxHashSet<&str> = tokens.iter().map(String::as_str).collect();
                builder
                    .lock()
                    .expect("dictionary mutex poisoned")
                    .add_document(distinct.into_iter(), tokens.len() as u64);
                progress.inc(1);
            },
        )?;
        progress.finish_and_clear();

        builder
            .into_inner()
            .expect("dictionary mutex poisoned")
            .finish()
            .save(&self.settings.files.dictionary)
    }

    fn build_vectors(&self) -> Result<()> {
        let files = &self.settings.files;
        let limits = &self.settings.limits;

        let dictionary = Dictionary::load(&files.dictionary)?;
        let titles = IdRegistry::load(&files.titles)?;
        let coordinates = CoordinateTable::load(&files.coordinates)?;
        let redirects = RedirectTable::load(&files.redirects)?;
        let types = ArticleTypeTable::load(&files.article_types)?;

        let progress = self.article_bar()?;
        let tokenizer = Tokenizer::new();
        let tfidf_vectors: DashMap<String, SparseVector> = DashMap::new();
        let location_vectors: DashMap<String, SparseVector> = DashMap::new();
        let located_at: DashMap<String, String> = DashMap::new();
        let is_a_in: DashMap<String, Vec<String>> = DashMap::new();

        pool::run_bounded(
            self.settings.neighbors.workers,
            self.settings.queue_capacity(),
            self.settings.termination_wait,
            self.articles_reader()?,
            |record: RawRecord| {
                self.stats.inc_records();
                let title = canonical_title(&record.title);
                let Some(clean) = clean_text(&record.body, &title, limits) else {
                    self.stats.inc_parse_errors();
                    progress.inc(1);
                    return;
                };

                let tokens = tokenizer.tokenize(&clean);
                tfidf_vectors.insert(
                    title.clone(),
                    build_tfidf(&tokens, &dictionary, limits.max_vector_elements),
                );
                self.stats.inc_vectors();

                let entities = contained_entities(&record.body, &clean, &title, limits);
                location_vectors.insert(
                    title.clone(),
                    build_location_vector(
                        &entities,
                        &clean,
                        &coordinates,
                        &redirects,
                        &titles,
                        limits,
                    ),
                );

                if coordinates.get(&title).is_some() {
                    let targets =
                        parse_is_a_in(&record.body, &title, &coordinates, &redirects, limits);
                    if !targets.is_empty() {
                        is_a_in.insert(title.clone(), targets);
                        self.stats.inc_is_a_in();
                    }
                }

                let ctx = LocatedAtContext {
                    coords: &coordinates,
                    redirects: &redirects,
                    types: &types,
                    limits,
                };
                if let Some(target) = parse_located_at(&clean, &record.body, &ctx) {
                    located_at.insert(title.clone(), target);
                    self.stats.inc_located_at();
                }
                progress.inc(1);
            },
        )?;
        progress.finish_and_clear();

        let tfidf_table: VectorTable = tfidf_vectors.into_iter().collect();
        tfidf_table.save(&files.tfidf_vectors)?;
        let location_table: VectorTable = location_vectors.into_iter().collect();
        location_table.save(&files.location_vectors)?;

        let mut located_table = LocatedAtTable::new();
        for (title, target) in located_at {
            located_table.insert(title, target);
        }
        located_table.save(&files.located_at)?;

        let mut is_a_in_table = IsAInTable::new();
        for (title, targets) in is_a_in {
            is_a_in_table.insert(title, targets);
        }
        is_a_in_table.save(&files.is_a_in)
    }

    fn load_registry(&self) -> Result<(ArticleRegistry, IdRegistry)> {
        let files = &self.settings.files;
        let titles = IdRegistry::load(&files.titles)?;
        let coordinates = CoordinateTable::load(&files.coordinates)?;
        let types = ArticleTypeTable::load(&files.article_types)?;
        let categories = ArticleCategoriesTable::load(&files.article_categories)?;
        let tfidf = VectorTable::load(&files.tfidf_vectors)?;
        let locations = VectorTable::load(&files.location_vectors)?;
        let located_at = LocatedAtTable::load(&files.located_at)?;
        let is_a_in = IsAInTable::load(&files.is_a_in)?;

        let registry = ArticleRegistry::join(&JoinInputs {
            titles: &titles,
            coordinates: &coordinates,
            types: &types,
            categories: &categories,
            tfidf: &tfidf,
            locations: &locations,
            located_at: &located_at,
            is_a_in: &is_a_in,
        });
        self.stats.add_integrity_skips(registry.integrity_skips());
        Ok((registry, titles))
    }

    fn build_indices(&self) -> Result<()> {
        let files = &self.settings.files;
        let (registry, _) = self.load_registry()?;
        info!(
            articles = registry.len(),
            coordinated = registry.coordinated_count(),
            "Building inverted indices"
        );

        let family = IndexFamily::build(&registry);
        family.words_all.save(&files.index_words_all)?;
        family
            .words_coordinated
            .save(&files.index_words_coordinated)?;
        family.categories_all.save(&files.index_categories_all)?;
        family
            .categories_coordinated
            .save(&files.index_categories_coordinated)?;
        family.locations_all.save(&files.index_locations_all)?;
        family
            .locations_coordinated
            .save(&files.index_locations_coordinated)
    }

    fn build_neighbors(&self) -> Result<()> {
        let files = &self.settings.files;
        let (registry, _) = self.load_registry()?;

        let words = PostingIndex::load(&files.index_words_coordinated)?;
        let locations = PostingIndex::load(&files.index_locations_coordinated)?;
        let categories = PostingIndex::load(&files.index_categories_coordinated)?;

        let progress = ProgressBar::new(registry.len() as u64);
        progress.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .expect("static progress template")
            .progress_chars("##-"),
        );

        let engine = NeighborEngine::new(
            &registry,
            &words,
            &locations,
            &categories,
            &self.settings.neighbors,
        );
        engine.run(
            &files.neighbors,
            &self.settings.pruner,
            self.settings.queue_capacity(),
            self.settings.termination_wait,
            &progress,
            self.stats,
        )?;
        progress.finish_and_clear();
        Ok(())
    }
}
