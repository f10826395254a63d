//! Meridian: geographic retrieval-index builder for Wikipedia dumps
//!
//! This crate turns a raw Wikipedia XML dump into the on-disk structures a
//! coordinate-prediction step needs for nearest-neighbor lookup:
//!
//! 1. **Redirects / Coordinates** -- Stream the dump and persist the
//!    redirect table and the per-article coordinate table
//! 2. **Catalog** -- Register title and category ids, extract per-article
//!    category sets and heuristic article types
//! 3. **Dictionary** -- Single-pass vocabulary with document frequencies
//! 4. **Vectors** -- Per-article TF-IDF and named-location vectors plus
//!    "located-at" and "is-a-in" phrase evidence
//! 5. **Inverted indices** -- Six posting-list indices ({words, categories,
//!    named-locations} x {all, with-coordinates})
//! 6. **Nearest neighbors** -- Parallel candidate pruning and weighted
//!    cosine/Jaccard scoring into the final neighbor file
//!
//! # Architecture
//!
//! The pipeline is designed for throughput and restartability:
//!
//! - **Streaming XML scanning** -- One page in memory at a time, `.bz2`
//!   transparently decompressed
//! - **Bounded worker pools** -- A fixed pool behind a bounded queue;
//!   producers block when the queue is full
//! - **Dense id spaces** -- Flat id-indexed arrays for posting lists and
//!   article records instead of hash containers
//! - **Iteration-stamped scratch** -- The candidate pruner reuses its
//!   scratch array across calls without zeroing it
//! - **Resumable phases** -- Every phase detects its own outputs and skips
//!   work already on disk; writes go through temp-file renames
//!
//! # Key Modules
//!
//! - [`dump`] -- Streaming page extractor with title filtering
//! - [`text`], [`coords`], [`links`], [`phrases`], [`article_type`] -- The
//!   per-record field parsers
//! - [`registry`], [`dictionary`] -- String <-> dense-id mappings
//! - [`vectors`] -- TF-IDF and named-location vector builders
//! - [`articles`] -- The per-article join consumed by indexing
//! - [`invindex`], [`pruner`], [`similarity`], [`neighbors`] -- The
//!   nearest-neighbor machinery
//! - [`pipeline`] -- Phase sequencing, progress and skip logic
//! - [`codec`] -- Fixed-order binary layouts shared by writers and readers
//!
//! # Example Usage
//!
//! ```bash
//! # Full build with default settings
//! meridian -i enwiki-latest-pages-articles.xml.bz2 -o output/
//!
//! # Small smoke run
//! meridian -i dump.xml -o output/ --limit 1000 -v
//! ```

pub mod article_type;
pub mod articles;
pub mod census;
pub mod codec;
pub mod config;
pub mod coords;
pub mod dictionary;
pub mod dump;
pub mod invindex;
pub mod links;
pub mod neighbors;
pub mod phrases;
pub mod pipeline;
pub mod pool;
pub mod pruner;
pub mod registry;
pub mod similarity;
pub mod stats;
pub mod text;
pub mod tokenize;
pub mod vectors;
