use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters accumulated across the pipeline phases. Per-record
/// parse failures land in `parse_errors`; cross-table inconsistencies in
/// `integrity_skips`; neither aborts a phase.
#[derive(Default)]
pub struct PipelineStats {
    pub records_read: AtomicU64,
    pub records_skipped: AtomicU64,
    pub parse_errors: AtomicU64,
    pub redirects_found: AtomicU64,
    pub coordinates_found: AtomicU64,
    pub vectors_built: AtomicU64,
    pub located_at_found: AtomicU64,
    pub is_a_in_found: AtomicU64,
    pub integrity_skips: AtomicU64,
    pub neighbors_emitted: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_records(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, count: u64) {
        self.records_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_redirects(&self) {
        self.redirects_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_coordinates(&self) {
        self.coordinates_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_vectors(&self) {
        self.vectors_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_located_at(&self) {
        self.located_at_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_is_a_in(&self) {
        self.is_a_in_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_integrity_skips(&self, count: u64) {
        self.integrity_skips.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_neighbors(&self, count: u64) {
        self.neighbors_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn records(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.records_skipped.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn redirects(&self) -> u64 {
        self.redirects_found.load(Ordering::Relaxed)
    }

    pub fn coordinates(&self) -> u64 {
        self.coordinates_found.load(Ordering::Relaxed)
    }

    pub fn vectors(&self) -> u64 {
        self.vectors_built.load(Ordering::Relaxed)
    }

    pub fn located_at(&self) -> u64 {
        self.located_at_found.load(Ordering::Relaxed)
    }

    pub fn is_a_in(&self) -> u64 {
        self.is_a_in_found.load(Ordering::Relaxed)
    }

    pub fn integrity(&self) -> u64 {
        self.integrity_skips.load(Ordering::Relaxed)
    }

    pub fn neighbors(&self) -> u64 {
        self.neighbors_emitted.load(Ordering::Relaxed)
    }
}
