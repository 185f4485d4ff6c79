//! Enumeration of container groups whose capacities add up to a volume.
//!
//! `Subsets(V)` is built from `Subsets(V - size(i))` for every container `i`
//! small enough, skipping subsets that already use `i`. The memo is keyed by
//! volume alone, so an entry is reusable by every caller asking for that
//! volume regardless of which containers the caller has in mind. Entries are
//! filled bottom-up, so large volumes never recurse.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::model::Group;

pub struct SubsetFinder {
    capacities: Vec<u32>,
    lookup: Mutex<HashMap<u32, Arc<[Group]>>>,
}

impl SubsetFinder {
    pub fn new(capacities: Vec<u32>) -> Self {
        Self {
            capacities,
            lookup: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacities(&self) -> &[u32] {
        &self.capacities
    }

    /// All groups of containers, each used at most once, holding exactly `volume`.
    pub fn subsets_of_volume(&self, volume: u32) -> Arc<[Group]> {
        if volume == 0 {
            return empty_volume();
        }
        if let Some(cached) = self.cached(volume) {
            return cached;
        }
        self.compute(volume)
    }

    /// Same as [`subsets_of_volume`](Self::subsets_of_volume) limited to groups of at most `max_len` containers.
    pub fn subsets_of_volume_up_to(&self, volume: u32, max_len: usize) -> Vec<Group> {
        self.subsets_of_volume(volume)
            .iter()
            .filter(|g| g.len() <= max_len)
            .cloned()
            .collect()
    }

    fn cached(&self, volume: u32) -> Option<Arc<[Group]>> {
        if let Ok(cache) = self.lookup.lock()
            && let Some(cached) = cache.get(&volume)
        {
            return Some(Arc::clone(cached));
        }
        None
    }

    /// Fills the memo bottom-up: first collects every smaller volume the
    /// recurrence reaches from `volume` that is not cached yet, then builds
    /// them in ascending order so each one only reads finished entries.
    fn compute(&self, volume: u32) -> Arc<[Group]> {
        let mut known: HashMap<u32, Arc<[Group]>> = HashMap::new();
        let mut needed: BTreeSet<u32> = BTreeSet::new();
        let mut pending = vec![volume];
        while let Some(v) = pending.pop() {
            if known.contains_key(&v) || needed.contains(&v) {
                continue;
            }
            if v == 0 {
                known.insert(0, empty_volume());
                continue;
            }
            if let Some(cached) = self.cached(v) {
                known.insert(v, cached);
                continue;
            }
            needed.insert(v);
            pending.extend(
                self.capacities
                    .iter()
                    .filter(|&&size| size > 0 && size <= v)
                    .map(|&size| v - size),
            );
        }

        for &v in &needed {
            let groups = self.extend_smaller(v, &known);
            known.insert(v, groups);
        }

        // Computed without holding the lock; a racing thread may do the same
        // work and both store identical entries.
        if let Ok(mut cache) = self.lookup.lock() {
            for v in &needed {
                if let Some(groups) = known.get(v) {
                    cache.entry(*v).or_insert_with(|| Arc::clone(groups));
                }
            }
        }
        trace!(event = "subsets_computed", volume, volumes = needed.len());
        known.remove(&volume).unwrap_or_else(|| Arc::from(Vec::<Group>::new()))
    }

    /// `Subsets(volume)` from the finished entries of smaller volumes.
    fn extend_smaller(&self, volume: u32, known: &HashMap<u32, Arc<[Group]>>) -> Arc<[Group]> {
        let mut found: BTreeSet<Group> = BTreeSet::new();
        for (i, &size) in self.capacities.iter().enumerate() {
            if size == 0 || size > volume {
                continue;
            }
            let Some(smaller) = known.get(&(volume - size)) else {
                continue;
            };
            for group in smaller.iter() {
                if group.contains(i) {
                    continue;
                }
                let mut containers = group.containers().to_vec();
                containers.push(i);
                found.insert(Group::from_indices(containers, &self.capacities));
            }
        }
        found.into_iter().collect::<Vec<_>>().into()
    }

    /// Number of volumes currently held in the memo.
    pub fn cached_volumes(&self) -> usize {
        self.lookup.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    /// Evaluates the same recurrence without any caching. Every ordering of a
    /// subset is produced, so callers compare results as sets. Recursion depth
    /// grows with `volume`; meant for cross-checking small volumes.
    pub fn naive_subsets(&self, volume: u32) -> Vec<Vec<usize>> {
        if volume == 0 {
            return vec![Vec::new()];
        }
        let mut result = Vec::new();
        for (i, &size) in self.capacities.iter().enumerate() {
            if size == 0 || size > volume {
                continue;
            }
            for mut subset in self.naive_subsets(volume - size) {
                if subset.contains(&i) {
                    continue;
                }
                subset.push(i);
                result.push(subset);
            }
        }
        result
    }

    /// Include/exclude walk over containers in index order, yielding each
    /// subset exactly once with ascending indices.
    pub fn ascending_subsets(&self, volume: u32) -> Vec<Vec<usize>> {
        let mut result = Vec::new();
        let mut chosen = Vec::new();
        self.ascending_from(volume, 0, 0, &mut chosen, &mut result);
        result
    }

    fn ascending_from(
        &self,
        volume: u32,
        current: u32,
        index: usize,
        chosen: &mut Vec<usize>,
        result: &mut Vec<Vec<usize>>,
    ) {
        if current == volume {
            result.push(chosen.clone());
            return;
        }
        if index >= self.capacities.len() {
            return;
        }
        self.ascending_from(volume, current, index + 1, chosen, result);
        let size = self.capacities[index];
        if size > 0 && current + size <= volume {
            chosen.push(index);
            self.ascending_from(volume, current + size, index + 1, chosen, result);
            chosen.pop();
        }
    }
}

fn empty_volume() -> Arc<[Group]> {
    Arc::from(vec![Group::new(0, Vec::new())])
}

/// Normalizes any enumeration of index lists into a set of sorted lists.
pub fn as_index_sets<'a>(subsets: impl IntoIterator<Item = &'a [usize]>) -> BTreeSet<Vec<usize>> {
    subsets
        .into_iter()
        .map(|s| {
            let mut s = s.to_vec();
            s.sort_unstable();
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memo_sets(finder: &SubsetFinder, volume: u32) -> BTreeSet<Vec<usize>> {
        as_index_sets(finder.subsets_of_volume(volume).iter().map(|g| g.containers()))
    }

    #[test]
    fn zero_volume_has_only_the_empty_group() {
        let finder = SubsetFinder::new(vec![1, 2, 3]);
        let groups = finder.subsets_of_volume(0);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].is_empty());
    }

    #[test]
    fn finds_every_group_summing_to_volume() {
        let finder = SubsetFinder::new(vec![1, 1, 2, 3]);
        let expected: BTreeSet<Vec<usize>> =
            [vec![0, 2], vec![1, 2], vec![3]].into_iter().collect();
        assert_eq!(memo_sets(&finder, 3), expected);
    }

    #[test]
    fn unreachable_volume_is_empty() {
        let finder = SubsetFinder::new(vec![2, 4, 6]);
        assert!(finder.subsets_of_volume(5).is_empty());
        assert!(finder.subsets_of_volume(13).is_empty());
    }

    #[test]
    fn memo_matches_naive_and_ascending() {
        let finder = SubsetFinder::new(vec![1, 2, 2, 3, 4, 4, 5]);
        for volume in 0..=12 {
            let naive = as_index_sets(finder.naive_subsets(volume).iter().map(|s| s.as_slice()));
            let ascending =
                as_index_sets(finder.ascending_subsets(volume).iter().map(|s| s.as_slice()));
            let memo = memo_sets(&finder, volume);
            assert_eq!(memo, naive, "volume {volume}");
            assert_eq!(memo, ascending, "volume {volume}");
        }
    }

    #[test]
    fn memo_is_reused_across_queries() {
        let finder = SubsetFinder::new(vec![1, 2, 3, 5, 8]);
        let first = finder.subsets_of_volume(8);
        let cached = finder.cached_volumes();
        let second = finder.subsets_of_volume(8);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(finder.cached_volumes(), cached);
    }

    #[test]
    fn groups_are_ascending_and_exact() {
        let capacities = vec![3, 1, 4, 1, 5, 9, 2, 6];
        let finder = SubsetFinder::new(capacities.clone());
        for group in finder.subsets_of_volume(10).iter() {
            assert!(group.is_valid());
            let total: u32 = group.containers().iter().map(|&i| capacities[i]).sum();
            assert_eq!(total, 10);
            assert_eq!(group.volume(), 10);
        }
    }

    #[test]
    fn large_volumes_are_built_without_recursing() {
        let finder = SubsetFinder::new(vec![1, 5000, 5000]);
        let exact: BTreeSet<Vec<usize>> = [vec![1], vec![2]].into_iter().collect();
        assert_eq!(memo_sets(&finder, 5000), exact);
        let with_small: BTreeSet<Vec<usize>> = [vec![0, 1], vec![0, 2]].into_iter().collect();
        assert_eq!(memo_sets(&finder, 5001), with_small);
        assert!(finder.subsets_of_volume(4999).is_empty());
    }

    #[test]
    fn length_limit_filters_large_groups() {
        let finder = SubsetFinder::new(vec![1, 1, 1, 1, 4]);
        let limited = finder.subsets_of_volume_up_to(4, 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].containers(), &[4]);
    }
}
