//! Append-only history of per-node hashes and candidate ranking over it.

use super::hash_distance;

/// Ordered sequence of (node index, hash vector) pairs, appended in
/// ingestion order. Only nodes with non-empty descriptors are ever entered.
#[derive(Debug, Default)]
pub struct HashIndex {
    entries: Vec<(usize, Vec<f64>)>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, index: usize, hash: Vec<f64>) {
        self.entries.push((index, hash));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(usize, Vec<f64>)> {
        self.entries.iter()
    }

    /// Rank stored hashes against a query.
    ///
    /// A stored index `c` is a legal candidate only if
    /// `query_index - c > min_neighbour`. Results are sorted ascending by L1
    /// distance, ties broken by smaller index.
    pub fn rank_candidates(
        &self,
        query_index: usize,
        query_hash: &[f64],
        min_neighbour: usize,
    ) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> = self
            .entries
            .iter()
            .filter(|(idx, _)| query_index > *idx && query_index - idx > min_neighbour)
            .map(|(idx, hash)| (*idx, hash_distance(query_hash, hash)))
            .collect();

        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with_hashes(hashes: &[Vec<f64>]) -> HashIndex {
        let mut index = HashIndex::new();
        for (i, h) in hashes.iter().enumerate() {
            index.append(i, h.clone());
        }
        index
    }

    #[test]
    fn append_preserves_insertion_order() {
        let index = index_with_hashes(&[vec![1.0], vec![2.0], vec![3.0]]);
        let stored: Vec<usize> = index.iter().map(|(i, _)| *i).collect();
        assert_eq!(stored, vec![0, 1, 2]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn ranking_excludes_recent_neighbours() {
        let index = index_with_hashes(&[
            vec![0.0],
            vec![1.0],
            vec![2.0],
            vec![3.0],
            vec![4.0],
            vec![5.0],
        ]);

        // Query is node 5; with min_neighbour = 2, only 0, 1, 2 are legal.
        let ranked = index.rank_candidates(5, &[0.0], 2);
        let indices: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        for (idx, _) in &ranked {
            assert!(5 - idx > 2);
        }
    }

    #[test]
    fn ranking_sorts_by_distance() {
        let index = index_with_hashes(&[vec![9.0], vec![1.0], vec![4.0]]);
        let ranked = index.rank_candidates(10, &[0.0], 0);
        let indices: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2, 0]);
    }

    #[test]
    fn ties_break_towards_older_nodes() {
        let index = index_with_hashes(&[vec![2.0], vec![2.0], vec![2.0]]);
        let ranked = index.rank_candidates(10, &[0.0], 0);
        let indices: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn no_candidates_when_all_too_recent() {
        let index = index_with_hashes(&[vec![0.0], vec![1.0]]);
        assert!(index.rank_candidates(2, &[0.0], 5).is_empty());
    }
}
