use crate::invindex::Posting;
use rustc_hash::FxHashMap;

/// k-of-n posting-list intersection with iteration-stamped scratch memory.
///
/// The scratch array is never zeroed between calls: every call runs under a
/// fresh `iteration` stamp, so marks left by earlier calls are stale by
/// construction. Only when the stamp would overflow `max_iteration` is the
/// array reset. Each worker owns one pruner; the type is not shared.
pub struct Pruner {
    mem: Vec<u32>,
    iteration: u32,
    max_iteration: u32,
}

impl Pruner {
    pub fn new(memory_size: usize, max_iteration: u32) -> Self {
        Pruner {
            mem: vec![0; memory_size],
            iteration: 1,
            max_iteration: max_iteration.max(1),
        }
    }

    /// Ids present in at least `k` of the given posting lists. `k <= 1`
    /// degenerates to the distinct union.
    pub fn prune(&mut self, lists: &[&[Posting]], k: usize) -> Vec<u32> {
        if k <= 1 {
            return self.union(lists);
        }
        let collisions = self.collisions(lists);
        collisions
            .into_iter()
            .filter(|&(_, count)| count as usize >= k)
            .map(|(id, _)| id)
            .collect()
    }

    /// id -> number of lists containing it, for ids in at least two lists.
    pub fn collisions(&mut self, lists: &[&[Posting]]) -> FxHashMap<u32, u32> {
        let mut counts: FxHashMap<u32, u32> = FxHashMap::default();
        for list in lists {
            for &(id, _) in *list {
                self.reserve(id);
                if self.mem[id as usize] == self.iteration {
                    *counts.entry(id).or_insert(1) += 1;
                } else {
                    self.mem[id as usize] = self.iteration;
                }
            }
        }
        self.advance();
        counts
    }

    fn union(&mut self, lists: &[&[Posting]]) -> Vec<u32> {
        let mut out = Vec::new();
        for list in lists {
            for &(id, _) in *list {
                self.reserve(id);
                if self.mem[id as usize] != self.iteration {
                    self.mem[id as usize] = self.iteration;
                    out.push(id);
                }
            }
        }
        self.advance();
        out
    }

    fn reserve(&mut self, id: u32) {
        if id as usize >= self.mem.len() {
            self.mem.resize((id as usize + 1).max(self.mem.len() * 2), 0);
        }
    }

    fn advance(&mut self) {
        self.iteration += 1;
        if self.iteration > self.max_iteration {
            self.mem.fill(0);
            self.iteration = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rustc_hash::FxHashSet;

    fn postings(ids: &[u32]) -> Vec<Posting> {
        ids.iter().map(|&id| (id, 1_000_000)).collect()
    }

    fn naive(lists: &[Vec<Posting>], k: usize) -> FxHashSet<u32> {
        let mut counts: FxHashMap<u32, usize> = FxHashMap::default();
        for list in lists {
            let distinct: FxHashSet<u32> = list.iter().map(|&(id, _)| id).collect();
            for id in distinct {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .filter(|&(_, c)| c >= k)
            .map(|(id, _)| id)
            .collect()
    }

    #[test]
    fn union_for_threshold_one() {
        let mut pruner = Pruner::new(16, 1000);
        let a = postings(&[1, 2, 3]);
        let b = postings(&[3, 4]);
        let mut out = pruner.prune(&[&a, &b], 1);
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn counts_lists_not_occurrences() {
        let mut pruner = Pruner::new(16, 1000);
        let a = postings(&[1, 2]);
        let b = postings(&[2, 3]);
        let c = postings(&[2, 3]);
        let counts = pruner.collisions(&[&a, &b, &c]);
        assert_eq!(counts.get(&2), Some(&3));
        assert_eq!(counts.get(&3), Some(&2));
        assert_eq!(counts.get(&1), None);
    }

    #[test]
    fn threshold_filter_applied() {
        let mut pruner = Pruner::new(16, 1000);
        let a = postings(&[1, 2]);
        let b = postings(&[2, 3]);
        let c = postings(&[2]);
        let mut out = pruner.prune(&[&a, &b, &c], 3);
        out.sort_unstable();
        assert_eq!(out, vec![2]);
    }

    #[test]
    fn stale_marks_do_not_leak_across_calls() {
        let mut pruner = Pruner::new(16, 1000);
        let a = postings(&[1, 2, 3]);
        let b = postings(&[2]);
        // First call marks 1, 2, 3.
        let _ = pruner.prune(&[&a, &b], 2);
        // Second call with a single list: no id can reach two hits.
        let out = pruner.prune(&[&a], 2);
        assert!(out.is_empty());
    }

    #[test]
    fn iteration_reset_preserves_correctness() {
        let mut pruner = Pruner::new(16, 3);
        let a = postings(&[1, 2]);
        let b = postings(&[2, 3]);
        for _ in 0..10 {
            let mut out = pruner.prune(&[&a, &b], 2);
            out.sort_unstable();
            assert_eq!(out, vec![2]);
        }
    }

    #[test]
    fn grows_for_large_ids() {
        let mut pruner = Pruner::new(4, 1000);
        let a = postings(&[100_000]);
        let b = postings(&[100_000]);
        assert_eq!(pruner.prune(&[&a, &b], 2), vec![100_000]);
    }

    #[test]
    fn empty_input() {
        let mut pruner = Pruner::new(16, 1000);
        assert!(pruner.prune(&[], 1).is_empty());
        assert!(pruner.prune(&[], 2).is_empty());
    }

    proptest! {
        #[test]
        fn matches_naive_counting(
            lists in proptest::collection::vec(
                proptest::collection::btree_set(0u32..64, 0..20),
                1..6,
            ),
            k in 1usize..6,
            warmups in 0usize..4,
        ) {
            let lists: Vec<Vec<Posting>> = lists
                .into_iter()
                .map(|set| postings(&set.into_iter().collect::<Vec<_>>()))
                .collect();
            let refs: Vec<&[Posting]> = lists.iter().map(Vec::as_slice).collect();

            let mut pruner = Pruner::new(64, 5);
            // Result must not depend on how many prune calls preceded it.
            for _ in 0..warmups {
                let _ = pruner.prune(&refs, 2);
            }
            let got: FxHashSet<u32> = pruner.prune(&refs, k).into_iter().collect();
            prop_assert_eq!(got, naive(&lists, k));
        }
    }
}
