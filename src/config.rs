use crate::similarity::Weights;
use anyhow::{bail, Context, Result};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Progress update interval (tick every N records)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Bounded work-queue capacity, per worker
pub const QUEUE_SLOTS_PER_WORKER: usize = 4;

/// Passes for the iterative wiki-markup collapse (handles nesting depth 3)
pub const CLEANUP_PASSES: usize = 3;

/// Window preceding a coord template scanned for an opening HTML comment
pub const COMMENT_LOOKBEHIND_CHARS: usize = 10;

/// Words of clean text scanned by the article-type text heuristic
pub const MAX_INITIAL_WORDS: usize = 40;

/// Words after the copula inspected for an article-type variant
pub const VERB_PROXIMITY: usize = 8;

#[derive(Debug, Clone)]
pub struct Limits {
    pub max_vector_elements: usize,
    pub max_named_locations_per_article: usize,
    pub max_word_index: usize,
    pub max_words_till_verb: usize,
    pub max_words_till_phrase: usize,
    pub max_characters_post_phrase: usize,
    pub max_entities_diameter_km: f64,
    pub max_index_for_title_removal: usize,
    pub max_title_length_for_removal: usize,
    pub segment_characters_size: usize,
}

#[derive(Debug, Clone)]
pub struct PrunerSettings {
    pub memory_size: usize,
    pub max_iteration: u32,
}

#[derive(Debug, Clone)]
pub struct NeighborSettings {
    pub workers: usize,
    pub tfidf_threshold: usize,
    pub locations_threshold: usize,
    pub categories_threshold: usize,
    pub min_similarity: f32,
    pub max_neighbors: usize,
    pub weights: Weights,
}

#[derive(Debug, Clone)]
pub struct Files {
    pub titles: PathBuf,
    pub categories: PathBuf,
    pub dictionary: PathBuf,
    pub tfidf_vectors: PathBuf,
    pub location_vectors: PathBuf,
    pub coordinates: PathBuf,
    pub redirects: PathBuf,
    pub article_categories: PathBuf,
    pub article_types: PathBuf,
    pub located_at: PathBuf,
    pub is_a_in: PathBuf,
    pub index_words_all: PathBuf,
    pub index_words_coordinated: PathBuf,
    pub index_categories_all: PathBuf,
    pub index_categories_coordinated: PathBuf,
    pub index_locations_all: PathBuf,
    pub index_locations_coordinated: PathBuf,
    pub neighbors: PathBuf,
    pub census: PathBuf,
}

impl Files {
    fn default_under(base: &Path) -> Files {
        Files {
            titles: base.join("registry/titles.bin"),
            categories: base.join("registry/categories.bin"),
            dictionary: base.join("dictionary/dictionary.bin"),
            tfidf_vectors: base.join("vectors/tfidf.bin"),
            location_vectors: base.join("vectors/locations.bin"),
            coordinates: base.join("articles/coordinates.bin"),
            redirects: base.join("articles/redirects.bin"),
            article_categories: base.join("articles/categories.bin"),
            article_types: base.join("articles/types.bin"),
            located_at: base.join("articles/located_at.bin"),
            is_a_in: base.join("articles/is_a_in.bin"),
            index_words_all: base.join("indices/words_all.bin"),
            index_words_coordinated: base.join("indices/words_coordinated.bin"),
            index_categories_all: base.join("indices/categories_all.bin"),
            index_categories_coordinated: base.join("indices/categories_coordinated.bin"),
            index_locations_all: base.join("indices/locations_all.bin"),
            index_locations_coordinated: base.join("indices/locations_coordinated.bin"),
            neighbors: base.join("neighbors/neighbors.bin"),
            census: base.join("census.json"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub base_path: PathBuf,
    pub files: Files,
    pub limits: Limits,
    pub pruner: PrunerSettings,
    pub neighbors: NeighborSettings,
    pub termination_wait: Duration,
}

impl Settings {
    /// Loads a flat `key = value` properties file. Every recognised key is
    /// required; a missing or empty value is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        let props = parse_properties(&raw)?;
        Self::from_properties(&props)
    }

    /// Programmatic settings with documented defaults, rooted at `base_path`.
    /// The worker count defaults to the number of hardware cores.
    pub fn with_defaults(base_path: &Path) -> Self {
        Settings {
            base_path: base_path.to_path_buf(),
            files: Files::default_under(base_path),
            limits: Limits {
                max_vector_elements: 200,
                max_named_locations_per_article: 50,
                max_word_index: 500,
                max_words_till_verb: 20,
                max_words_till_phrase: 30,
                max_characters_post_phrase: 200,
                max_entities_diameter_km: 500.0,
                max_index_for_title_removal: 250,
                max_title_length_for_removal: 60,
                segment_characters_size: 400,
            },
            pruner: PrunerSettings {
                memory_size: 1 << 22,
                max_iteration: 1_000_000,
            },
            neighbors: NeighborSettings {
                workers: num_cpus::get(),
                tfidf_threshold: 2,
                locations_threshold: 1,
                categories_threshold: 2,
                min_similarity: 0.1,
                max_neighbors: 30,
                weights: Weights::new(0.5, 0.3, 0.2),
            },
            termination_wait: Duration::from_millis(60_000),
        }
    }

    fn from_properties(props: &FxHashMap<String, String>) -> Result<Self> {
        let base = PathBuf::from(get(props, "path.base")?);
        let file = |key: &str| -> Result<PathBuf> { Ok(base.join(get(props, key)?)) };

        let weights = Weights::new(
            parse_weight(get(props, "nn.text.weight")?)?,
            parse_weight(get(props, "nn.locations.weight")?)?,
            parse_weight(get(props, "nn.categories.weight")?)?,
        );
        if !weights.is_normalised() {
            bail!(
                "nearest-neighbor weights must sum to 1, got {}",
                weights.sum()
            );
        }

        let files = Files {
            titles: file("path.registry.titles")?,
            categories: file("path.registry.categories")?,
            dictionary: file("path.dictionary")?,
            tfidf_vectors: file("path.vectors.tfidf")?,
            location_vectors: file("path.vectors.locations")?,
            coordinates: file("path.coordinates")?,
            redirects: file("path.redirects")?,
            article_categories: file("path.article.categories")?,
            article_types: file("path.article.types")?,
            located_at: file("path.located.at")?,
            is_a_in: file("path.is.a.in")?,
            index_words_all: file("path.index.words.all")?,
            index_words_coordinated: file("path.index.words.coordinated")?,
            index_categories_all: file("path.index.categories.all")?,
            index_categories_coordinated: file("path.index.categories.coordinated")?,
            index_locations_all: file("path.index.locations.all")?,
            index_locations_coordinated: file("path.index.locations.coordinated")?,
            neighbors: file("path.neighbors")?,
            census: file("path.census")?,
        };

        Ok(Settings {
            files,
            base_path: base,
            limits: Limits {
                max_vector_elements: get_parsed(props, "max.vector.elements")?,
                max_named_locations_per_article: get_parsed(
                    props,
                    "max.named.locations.per.article",
                )?,
                max_word_index: get_parsed(props, "max.word.index")?,
                max_words_till_verb: get_parsed(props, "max.words.till.verb")?,
                max_words_till_phrase: get_parsed(props, "max.words.till.phrase")?,
                max_characters_post_phrase: get_parsed(props, "max.characters.post.phrase")?,
                max_entities_diameter_km: get_parsed(props, "max.entities.diameter")?,
                max_index_for_title_removal: get_parsed(props, "max.index.for.title.removal")?,
                max_title_length_for_removal: get_parsed(
                    props,
                    "max.title.length.for.removal",
                )?,
                segment_characters_size: get_parsed(props, "segment.characters.size")?,
            },
            pruner: PrunerSettings {
                memory_size: get_parsed(props, "pruner.memory.size")?,
                max_iteration: get_parsed(props, "pruner.max.iteration")?,
            },
            neighbors: NeighborSettings {
                workers: get_parsed(props, "nn.workers")?,
                tfidf_threshold: get_parsed(props, "nn.tfidf.threshold")?,
                locations_threshold: get_parsed(props, "nn.locations.threshold")?,
                categories_threshold: get_parsed(props, "nn.categories.threshold")?,
                min_similarity: get_parsed(props, "nn.min.similarity")?,
                max_neighbors: get_parsed(props, "nn.max.neighbors")?,
                weights,
            },
            termination_wait: Duration::from_millis(get_parsed(
                props,
                "executor.termination.wait.millis",
            )?),
        })
    }

    pub fn queue_capacity(&self) -> usize {
        self.neighbors.workers * QUEUE_SLOTS_PER_WORKER
    }
}

fn parse_properties(raw: &str) -> Result<FxHashMap<String, String>> {
    let mut props = FxHashMap::default();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .with_context(|| format!("line {}: expected key = value", lineno + 1))?;
        props.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(props)
}

fn get<'a>(props: &'a FxHashMap<String, String>, key: &str) -> Result<&'a str> {
    match props.get(key).map(String::as_str) {
        Some("") | None => bail!("missing required setting: {}", key),
        Some(v) => Ok(v),
    }
}

fn get_parsed<T>(props: &FxHashMap<String, String>, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(props, key)?
        .parse::<T>()
        .with_context(|| format!("setting {} is not parseable", key))
}

/// Weights accept a plain decimal or a `p/q` literal.
fn parse_weight(raw: &str) -> Result<f32> {
    if let Some((p, q)) = raw.split_once('/') {
        let p: f32 = p
            .trim()
            .parse()
            .with_context(|| format!("bad weight numerator: {}", raw))?;
        let q: f32 = q
            .trim()
            .parse()
            .with_context(|| format!("bad weight denominator: {}", raw))?;
        if q == 0.0 {
            bail!("weight denominator is zero: {}", raw);
        }
        Ok(p / q)
    } else {
        raw.parse()
            .with_context(|| format!("bad weight literal: {}", raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn full_properties(base: &str) -> String {
        let mut s = String::new();
        s.push_str(&format!("path.base = {}\n", base));
        for (key, rel) in [
            ("path.registry.titles", "registry/titles.bin"),
            ("path.registry.categories", "registry/categories.bin"),
            ("path.dictionary", "dictionary/dictionary.bin"),
            ("path.vectors.tfidf", "vectors/tfidf.bin"),
            ("path.vectors.locations", "vectors/locations.bin"),
            ("path.coordinates", "articles/coordinates.bin"),
            ("path.redirects", "articles/redirects.bin"),
            ("path.article.categories", "articles/categories.bin"),
            ("path.article.types", "articles/types.bin"),
            ("path.located.at", "articles/located_at.bin"),
            ("path.is.a.in", "articles/is_a_in.bin"),
            ("path.index.words.all", "indices/words_all.bin"),
            ("path.index.words.coordinated", "indices/words_coordinated.bin"),
            ("path.index.categories.all", "indices/categories_all.bin"),
            (
                "path.index.categories.coordinated",
                "indices/categories_coordinated.bin",
            ),
            ("path.index.locations.all", "indices/locations_all.bin"),
            (
                "path.index.locations.coordinated",
                "indices/locations_coordinated.bin",
            ),
            ("path.neighbors", "neighbors/neighbors.bin"),
            ("path.census", "census.json"),
        ] {
            s.push_str(&format!("{} = {}\n", key, rel));
        }
        s.push_str(
            "max.vector.elements = 200\n\
             max.named.locations.per.article = 50\n\
             max.word.index = 500\n\
             max.words.till.verb = 20\n\
             max.words.till.phrase = 30\n\
             max.characters.post.phrase = 200\n\
             max.entities.diameter = 500\n\
             max.index.for.title.removal = 250\n\
             max.title.length.for.removal = 60\n\
             segment.characters.size = 400\n\
             pruner.memory.size = 4194304\n\
             pruner.max.iteration = 1000000\n\
             nn.workers = 4\n\
             nn.tfidf.threshold = 2\n\
             nn.locations.threshold = 1\n\
             nn.categories.threshold = 2\n\
             nn.min.similarity = 0.1\n\
             nn.max.neighbors = 30\n\
             nn.text.weight = 1/2\n\
             nn.locations.weight = 0.3\n\
             nn.categories.weight = 1/5\n\
             executor.termination.wait.millis = 60000\n",
        );
        s
    }

    fn write_settings(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("meridian.properties");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn load_full_settings() {
        let dir = TempDir::new().unwrap();
        let path = write_settings(&dir, &full_properties("/data/meridian"));
        let settings = Settings::load(&path).unwrap();

        assert_eq!(settings.limits.max_vector_elements, 200);
        assert_eq!(settings.neighbors.workers, 4);
        assert_eq!(
            settings.files.titles,
            PathBuf::from("/data/meridian/registry/titles.bin")
        );
        // 1/2 + 0.3 + 1/5 == 1
        assert!(settings.neighbors.weights.is_normalised());
    }

    #[test]
    fn missing_key_is_fatal() {
        let dir = TempDir::new().unwrap();
        let props = full_properties("/data/meridian").replace("nn.workers = 4\n", "");
        let path = write_settings(&dir, &props);
        let err = Settings::load(&path).unwrap_err();
        assert!(err.to_string().contains("nn.workers"));
    }

    #[test]
    fn empty_value_is_fatal() {
        let dir = TempDir::new().unwrap();
        let props = full_properties("/data/meridian").replace("nn.workers = 4", "nn.workers =");
        let path = write_settings(&dir, &props);
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let dir = TempDir::new().unwrap();
        let props = full_properties("/data/meridian")
            .replace("nn.text.weight = 1/2", "nn.text.weight = 0.9");
        let path = write_settings(&dir, &props);
        let err = Settings::load(&path).unwrap_err();
        assert!(err.to_string().contains("sum to 1"));
    }

    #[test]
    fn fractional_weight_literal() {
        assert_eq!(parse_weight("1/4").unwrap(), 0.25);
        assert_eq!(parse_weight("0.25").unwrap(), 0.25);
        assert!(parse_weight("1/0").is_err());
        assert!(parse_weight("abc").is_err());
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let props = parse_properties("# comment\n\nfoo = bar\n").unwrap();
        assert_eq!(props.get("foo").map(String::as_str), Some("bar"));
    }

    #[test]
    fn defaults_are_rooted_at_base() {
        let settings = Settings::with_defaults(Path::new("/tmp/out"));
        assert_eq!(
            settings.files.neighbors,
            PathBuf::from("/tmp/out/neighbors/neighbors.bin")
        );
        assert!(settings.neighbors.weights.is_normalised());
    }
}
