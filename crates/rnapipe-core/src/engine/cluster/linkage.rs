use super::distance::DistanceMatrix;
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

/// A candidate merge between two active clusters, ordered so that the closest pair pops
/// first from a max-heap. Ties break toward the lowest cluster indices.
#[derive(Debug, Clone, Copy)]
struct MergeCandidate {
    distance: f64,
    a: usize,
    b: usize,
    version_a: usize,
    version_b: usize,
}

impl PartialEq for MergeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for MergeCandidate {}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.a.cmp(&self.a))
            .then_with(|| other.b.cmp(&self.b))
    }
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => self.parent[ra] = rb,
            Ordering::Greater => self.parent[rb] = ra,
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Groups items by average-linkage agglomerative clustering cut at `cutoff`.
///
/// Every merge whose linkage height is at most `cutoff` is applied. Cluster-to-cluster
/// distances are maintained with the Lance–Williams update for average linkage. The matrix
/// must not contain undefined entries.
///
/// # Return
///
/// The groups of item indices, each sorted ascending, ordered by their lowest index.
pub fn average_linkage(matrix: &DistanceMatrix, cutoff: f64) -> Vec<Vec<usize>> {
    let n = matrix.len();
    let mut distances: Vec<Vec<f64>> = (0..n).map(|i| matrix.row(i).to_vec()).collect();
    let mut sizes = vec![1usize; n];
    let mut active = vec![true; n];
    let mut versions = vec![0usize; n];
    let mut membership = UnionFind::new(n);

    let mut heap: BinaryHeap<MergeCandidate> = (0..n)
        .tuple_combinations()
        .map(|(a, b)| MergeCandidate {
            distance: distances[a][b],
            a,
            b,
            version_a: 0,
            version_b: 0,
        })
        .collect();

    while let Some(candidate) = heap.pop() {
        let MergeCandidate { a, b, .. } = candidate;
        if !active[a] || !active[b] || versions[a] != candidate.version_a || versions[b] != candidate.version_b {
            continue;
        }
        if candidate.distance > cutoff {
            break;
        }

        // `a < b` always holds; the merged cluster keeps slot `a`.
        membership.union(a, b);
        let (size_a, size_b) = (sizes[a] as f64, sizes[b] as f64);
        for c in (0..n).filter(|&c| active[c] && c != a && c != b) {
            let merged = (size_a * distances[a][c] + size_b * distances[b][c]) / (size_a + size_b);
            distances[a][c] = merged;
            distances[c][a] = merged;
        }
        sizes[a] += sizes[b];
        active[b] = false;
        versions[a] += 1;

        for c in (0..n).filter(|&c| active[c] && c != a) {
            let (lo, hi) = if a < c { (a, c) } else { (c, a) };
            heap.push(MergeCandidate {
                distance: distances[lo][hi],
                a: lo,
                b: hi,
                version_a: versions[lo],
                version_b: versions[hi],
            });
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        groups.entry(membership.find(i)).or_default().push(i);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    groups.sort_by_key(|members| members[0]);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f64]]) -> DistanceMatrix {
        let rows: Vec<Vec<f64>> = rows.iter().map(|r| r.to_vec()).collect();
        DistanceMatrix::from_rows(&rows).unwrap()
    }

    fn sample() -> DistanceMatrix {
        matrix(&[
            &[0.0, 1.0, 9.0, 10.0],
            &[1.0, 0.0, 8.0, 9.0],
            &[9.0, 8.0, 0.0, 2.0],
            &[10.0, 9.0, 2.0, 0.0],
        ])
    }

    #[test]
    fn zero_cutoff_with_positive_distances_yields_singletons() {
        let groups = average_linkage(&sample(), 0.0);
        assert_eq!(groups, vec![vec![0], vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn infinite_cutoff_yields_one_group() {
        let groups = average_linkage(&sample(), f64::INFINITY);
        assert_eq!(groups, vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn intermediate_cutoff_separates_families() {
        let groups = average_linkage(&sample(), 5.0);
        assert_eq!(groups, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn merge_height_equal_to_cutoff_is_applied() {
        let groups = average_linkage(&sample(), 2.0);
        assert_eq!(groups, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn uses_average_rather_than_single_linkage() {
        // Single linkage would chain 2 onto {0, 1} at height 3; the average is 4.5.
        let m = matrix(&[
            &[0.0, 1.0, 3.0],
            &[1.0, 0.0, 6.0],
            &[3.0, 6.0, 0.0],
        ]);
        assert_eq!(average_linkage(&m, 4.0), vec![vec![0, 1], vec![2]]);
        assert_eq!(average_linkage(&m, 4.5), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn identical_items_merge_at_zero_cutoff() {
        let m = matrix(&[&[0.0, 0.0], &[0.0, 0.0]]);
        assert_eq!(average_linkage(&m, 0.0), vec![vec![0, 1]]);
    }

    #[test]
    fn empty_and_single_inputs() {
        assert!(average_linkage(&DistanceMatrix::new(0), 1.0).is_empty());
        assert_eq!(average_linkage(&DistanceMatrix::new(1), 1.0), vec![vec![0]]);
    }
}
