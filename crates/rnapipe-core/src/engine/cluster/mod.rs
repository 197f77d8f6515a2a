//! # Ensemble Clustering
//!
//! Groups independently predicted 3-D structures into consensus families.
//!
//! The engine computes the pairwise backbone RMSD of all candidates after optimal rigid
//! superposition ([`distance`]), cuts an average-linkage hierarchy at a distance threshold
//! ([`linkage`]), and describes each resulting group by its medoid, its mean internal
//! distance, and whether more than one predictor contributed to it. Results can be written
//! to and read back from the clustering output directory ([`export`]).

pub mod distance;
pub mod export;
pub mod linkage;

use crate::core::models::candidate::StructuralCandidate;
use crate::engine::config::AlignmentMode;
use distance::DistanceMatrix;
use itertools::Itertools;
use std::collections::BTreeSet;
use tracing::{info, instrument};

/// A candidate together with its position in the clustered input list.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMember {
    pub index: usize,
    pub candidate: StructuralCandidate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub id: usize,
    /// Members in ascending input order.
    pub members: Vec<ClusterMember>,
    pub predictors: BTreeSet<String>,
    /// The medoid of the cluster.
    pub representative: ClusterMember,
    /// Mean over defined member pairs; `0.0` for singletons and infinite when no member pair
    /// could be compared.
    pub mean_distance: f64,
    /// True iff at least two distinct predictors contributed members.
    pub consensus: bool,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleResult {
    pub candidates: Vec<StructuralCandidate>,
    pub matrix: DistanceMatrix,
    /// Ordered by descending size, then ascending id.
    pub clusters: Vec<Cluster>,
    pub cutoff: f64,
}

impl EnsembleResult {
    pub fn representatives(&self) -> impl Iterator<Item = &StructuralCandidate> {
        self.clusters.iter().map(|c| &c.representative.candidate)
    }

    pub fn consensus_count(&self) -> usize {
        self.clusters.iter().filter(|c| c.consensus).count()
    }
}

/// Clusters structural candidates by backbone RMSD.
///
/// # Arguments
///
/// * `candidates` - The structures to compare, in a stable order.
/// * `cutoff` - Average-linkage cut height in Ångström.
/// * `mode` - How backbone atoms are paired between two structures.
#[instrument(skip_all, name = "ensemble_clustering")]
pub fn cluster_candidates(
    candidates: Vec<StructuralCandidate>,
    cutoff: f64,
    mode: AlignmentMode,
) -> EnsembleResult {
    if candidates.len() <= 1 {
        let matrix = DistanceMatrix::new(candidates.len());
        return cluster_from_matrix(candidates, matrix, cutoff);
    }

    info!(
        structures = candidates.len(),
        alignment = %mode,
        "Computing pairwise backbone RMSD."
    );
    let backbones = distance::load_backbones(&candidates);
    let matrix = distance::pairwise_distances(&backbones, mode);
    cluster_from_matrix(candidates, matrix, cutoff)
}

/// Clusters candidates from a precomputed distance matrix.
///
/// `matrix` must be `candidates.len()` square.
pub fn cluster_from_matrix(
    candidates: Vec<StructuralCandidate>,
    matrix: DistanceMatrix,
    cutoff: f64,
) -> EnsembleResult {
    let substituted = matrix.with_undefined_substituted();
    let groups = linkage::average_linkage(&substituted, cutoff);

    let mut clusters: Vec<Cluster> = groups
        .iter()
        .enumerate()
        .map(|(position, indices)| {
            build_cluster(position + 1, indices, &candidates, &matrix, &substituted)
        })
        .collect();
    clusters.sort_by(|x, y| y.size().cmp(&x.size()).then(x.id.cmp(&y.id)));

    let result = EnsembleResult {
        candidates,
        matrix,
        clusters,
        cutoff,
    };
    info!(
        "Clustering complete: {} clusters from {} structures (cutoff={:.1} Å), {} consensus.",
        result.clusters.len(),
        result.candidates.len(),
        cutoff,
        result.consensus_count()
    );
    result
}

fn build_cluster(
    id: usize,
    indices: &[usize],
    candidates: &[StructuralCandidate],
    matrix: &DistanceMatrix,
    substituted: &DistanceMatrix,
) -> Cluster {
    let member = |i: usize| ClusterMember {
        index: i,
        candidate: candidates[i].clone(),
    };

    let representative = medoid(indices, substituted);
    let predictors: BTreeSet<String> = indices
        .iter()
        .map(|&i| candidates[i].predictor.clone())
        .collect();

    let mean_distance = if indices.len() < 2 {
        0.0
    } else {
        let defined: Vec<f64> = indices
            .iter()
            .tuple_combinations()
            .map(|(&i, &j)| matrix.get(i, j))
            .filter(|d| d.is_finite())
            .collect();
        if defined.is_empty() {
            distance::UNDEFINED
        } else {
            defined.iter().sum::<f64>() / defined.len() as f64
        }
    };

    Cluster {
        id,
        members: indices.iter().map(|&i| member(i)).collect(),
        consensus: predictors.len() >= 2,
        predictors,
        representative: member(representative),
        mean_distance,
    }
}

/// The member with the smallest mean distance to the other members; ties go to the lowest
/// input index.
fn medoid(indices: &[usize], substituted: &DistanceMatrix) -> usize {
    if indices.len() < 2 {
        return indices[0];
    }
    let others = (indices.len() - 1) as f64;
    let mut best = indices[0];
    let mut best_mean = f64::INFINITY;
    for &i in indices {
        let mean = indices
            .iter()
            .filter(|&&j| j != i)
            .map(|&j| substituted.get(i, j))
            .sum::<f64>()
            / others;
        if mean < best_mean {
            best = i;
            best_mean = mean;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::structure::test_support::write_c3_trace;
    use nalgebra::Point3;
    use tempfile::tempdir;

    fn candidates(predictors: &[&str]) -> Vec<StructuralCandidate> {
        predictors
            .iter()
            .enumerate()
            .map(|(i, p)| StructuralCandidate::new(format!("/models/{}_{}.pdb", p, i), *p))
            .collect()
    }

    fn matrix(rows: &[&[f64]]) -> DistanceMatrix {
        let rows: Vec<Vec<f64>> = rows.iter().map(|r| r.to_vec()).collect();
        DistanceMatrix::from_rows(&rows).unwrap()
    }

    #[test]
    fn no_candidates_yield_no_clusters() {
        let result = cluster_candidates(Vec::new(), 5.0, AlignmentMode::Positional);
        assert!(result.clusters.is_empty());
        assert!(result.matrix.is_empty());
    }

    #[test]
    fn single_candidate_is_its_own_representative() {
        let result = cluster_candidates(candidates(&["rhofold"]), 5.0, AlignmentMode::Positional);
        assert_eq!(result.clusters.len(), 1);
        let cluster = &result.clusters[0];
        assert_eq!(cluster.id, 1);
        assert_eq!(cluster.representative.index, 0);
        assert_eq!(cluster.mean_distance, 0.0);
        assert!(!cluster.consensus);
    }

    #[test]
    fn consensus_requires_two_distinct_predictors() {
        let m = matrix(&[
            &[0.0, 1.0, 9.0, 9.0],
            &[1.0, 0.0, 9.0, 9.0],
            &[9.0, 9.0, 0.0, 1.0],
            &[9.0, 9.0, 1.0, 0.0],
        ]);
        let result = cluster_from_matrix(candidates(&["rhofold", "protenix", "rhofold", "rhofold"]), m, 2.0);
        assert_eq!(result.clusters.len(), 2);
        assert!(result.clusters[0].consensus);
        assert_eq!(result.clusters[0].predictors.len(), 2);
        assert!(!result.clusters[1].consensus);
        assert_eq!(result.consensus_count(), 1);
    }

    #[test]
    fn clusters_are_sorted_by_size_then_id() {
        let m = matrix(&[
            &[0.0, 9.0, 9.0, 9.0],
            &[9.0, 0.0, 1.0, 1.0],
            &[9.0, 1.0, 0.0, 1.0],
            &[9.0, 1.0, 1.0, 0.0],
        ]);
        let result = cluster_from_matrix(candidates(&["a", "b", "c", "d"]), m, 2.0);
        assert_eq!(result.clusters[0].id, 2);
        assert_eq!(result.clusters[0].size(), 3);
        assert_eq!(result.clusters[1].id, 1);
        assert_eq!(result.clusters[1].size(), 1);
    }

    #[test]
    fn representative_is_the_medoid() {
        let m = matrix(&[
            &[0.0, 1.0, 3.0],
            &[1.0, 0.0, 1.5],
            &[3.0, 1.5, 0.0],
        ]);
        let result = cluster_from_matrix(candidates(&["a", "a", "a"]), m, f64::INFINITY);
        let cluster = &result.clusters[0];
        assert_eq!(cluster.representative.index, 1);
        assert!((cluster.mean_distance - 5.5 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn medoid_ties_go_to_lowest_index() {
        let m = matrix(&[&[0.0, 1.0], &[1.0, 0.0]]);
        let result = cluster_from_matrix(candidates(&["a", "b"]), m, 5.0);
        assert_eq!(result.clusters[0].representative.index, 0);
    }

    #[test]
    fn undefined_pairs_are_excluded_from_mean_distance() {
        let inf = distance::UNDEFINED;
        let m = matrix(&[
            &[0.0, 1.0, inf],
            &[1.0, 0.0, 1.0],
            &[inf, 1.0, 0.0],
        ]);
        // Undefined becomes 2.0 for linkage, so all three merge below 3 Å.
        let result = cluster_from_matrix(candidates(&["a", "a", "b"]), m, 3.0);
        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters[0].mean_distance, 1.0);
        assert!(!result.matrix.is_defined(0, 2));
    }

    #[test]
    fn zero_cutoff_keeps_distinct_structures_apart() {
        let m = matrix(&[&[0.0, 0.5], &[0.5, 0.0]]);
        let result = cluster_from_matrix(candidates(&["a", "b"]), m, 0.0);
        assert_eq!(result.clusters.len(), 2);
        assert!(result.clusters.iter().all(|c| !c.consensus));
    }

    #[test]
    fn clusters_real_structure_files() {
        let dir = tempdir().unwrap();
        let helix: Vec<Point3<f64>> = (0..8)
            .map(|i| {
                let t = i as f64 * 0.6;
                Point3::new(8.0 * t.cos(), 8.0 * t.sin(), 3.0 * i as f64)
            })
            .collect();
        let line: Vec<Point3<f64>> = (0..8).map(|i| Point3::new(6.0 * i as f64, 0.0, 0.0)).collect();
        let moved: Vec<Point3<f64>> = helix.iter().map(|p| Point3::new(p.x + 10.0, p.y - 4.0, p.z)).collect();

        let paths = [
            dir.path().join("a/helix.pdb"),
            dir.path().join("b/helix_moved.pdb"),
            dir.path().join("a/line.pdb"),
        ];
        write_c3_trace(&paths[0], &helix);
        write_c3_trace(&paths[1], &moved);
        write_c3_trace(&paths[2], &line);

        let input = vec![
            StructuralCandidate::new(&paths[0], "a"),
            StructuralCandidate::new(&paths[1], "b"),
            StructuralCandidate::new(&paths[2], "a"),
        ];
        let result = cluster_candidates(input, 2.0, AlignmentMode::Positional);

        assert!(result.matrix.get(0, 1) < 0.01);
        assert!(result.matrix.get(0, 2) > 2.0);
        assert_eq!(result.clusters.len(), 2);
        assert_eq!(result.clusters[0].size(), 2);
        assert!(result.clusters[0].consensus);
        assert_eq!(result.representatives().count(), 2);
    }
}
