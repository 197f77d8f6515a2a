use crate::core::io::structure::{self, AtomKey, BackboneAtom};
use crate::core::models::candidate::StructuralCandidate;
use crate::core::utils::geometry::superposed_rmsd;
use crate::engine::config::AlignmentMode;
use itertools::Itertools;
use nalgebra::Point3;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Marker for a pair of structures that could not be compared.
pub const UNDEFINED: f64 = f64::INFINITY;

/// Fewest paired backbone atoms for which a superposition is meaningful.
pub const MIN_COMMON_POINTS: usize = 3;

/// Stand-in for undefined distances when every pair is undefined.
const FALLBACK_UNDEFINED_DISTANCE: f64 = 100.0;

/// A symmetric matrix of pairwise structural distances in Ångström.
///
/// The diagonal is exactly zero. Pairs that could not be compared hold [`UNDEFINED`].
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    n: usize,
    values: Vec<f64>,
}

impl DistanceMatrix {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            values: vec![0.0; n * n],
        }
    }

    /// Builds a matrix from full rows, returning `None` unless the rows form a square,
    /// symmetric matrix with a zero diagonal and no negative or NaN entries.
    pub fn from_rows(rows: &[Vec<f64>]) -> Option<Self> {
        let n = rows.len();
        if rows.iter().any(|row| row.len() != n) {
            return None;
        }
        let mut matrix = Self::new(n);
        for i in 0..n {
            if rows[i][i] != 0.0 {
                return None;
            }
            for j in (i + 1)..n {
                let d = rows[i][j];
                if d.is_nan() || d < 0.0 || d != rows[j][i] {
                    return None;
                }
                matrix.set(i, j, d);
            }
        }
        Some(matrix)
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }

    pub fn is_defined(&self, i: usize, j: usize) -> bool {
        self.get(i, j).is_finite()
    }

    /// Sets both `(i, j)` and `(j, i)`.
    pub(crate) fn set(&mut self, i: usize, j: usize, value: f64) {
        self.values[i * self.n + j] = value;
        self.values[j * self.n + i] = value;
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.n..(i + 1) * self.n]
    }

    /// The largest defined off-diagonal distance.
    pub fn max_finite(&self) -> Option<f64> {
        (0..self.n)
            .tuple_combinations()
            .map(|(i, j)| self.get(i, j))
            .filter(|d| d.is_finite())
            .reduce(f64::max)
    }

    /// Returns a copy with every undefined entry replaced by twice the largest defined
    /// distance, or by 100 Å when no positive distance is defined.
    pub fn with_undefined_substituted(&self) -> Self {
        let replacement = match self.max_finite() {
            Some(max) if max > 0.0 => 2.0 * max,
            _ => FALLBACK_UNDEFINED_DISTANCE,
        };
        Self {
            n: self.n,
            values: self
                .values
                .iter()
                .map(|&d| if d.is_finite() { d } else { replacement })
                .collect(),
        }
    }
}

/// Reads the backbone of every candidate in parallel.
///
/// Unreadable files and files without backbone atoms yield `None` and a warning; they end
/// up with undefined distances to every other candidate.
pub fn load_backbones(candidates: &[StructuralCandidate]) -> Vec<Option<Vec<BackboneAtom>>> {
    candidates
        .par_iter()
        .map(|candidate| match structure::read_backbone(&candidate.path) {
            Ok(atoms) if atoms.is_empty() => {
                warn!("No backbone atoms (C3'/P) found in {}", candidate.path.display());
                None
            }
            Ok(atoms) => Some(atoms),
            Err(e) => {
                warn!("Could not parse {}: {}", candidate.path.display(), e);
                None
            }
        })
        .collect()
}

/// Computes the distance between two backbones after optimal rigid superposition.
///
/// Returns [`UNDEFINED`] when fewer than [`MIN_COMMON_POINTS`] atoms can be paired or the
/// superposition fails.
pub fn backbone_distance(a: &[BackboneAtom], b: &[BackboneAtom], mode: AlignmentMode) -> f64 {
    let (left, right) = match mode {
        AlignmentMode::Positional => {
            let common = a.len().min(b.len());
            (
                structure::positions(&a[..common]),
                structure::positions(&b[..common]),
            )
        }
        AlignmentMode::Residue => paired_by_identity(a, b),
    };

    if left.len() < MIN_COMMON_POINTS {
        return UNDEFINED;
    }
    superposed_rmsd(&left, &right).unwrap_or(UNDEFINED)
}

fn paired_by_identity(
    a: &[BackboneAtom],
    b: &[BackboneAtom],
) -> (Vec<Point3<f64>>, Vec<Point3<f64>>) {
    let lookup: HashMap<&AtomKey, &Point3<f64>> =
        b.iter().map(|atom| (&atom.key, &atom.position)).collect();
    a.iter()
        .filter_map(|atom| lookup.get(&atom.key).map(|p| (atom.position, **p)))
        .unzip()
}

/// Builds the full pairwise distance matrix; pairs are evaluated in parallel.
pub fn pairwise_distances(
    backbones: &[Option<Vec<BackboneAtom>>],
    mode: AlignmentMode,
) -> DistanceMatrix {
    let n = backbones.len();
    let pairs: Vec<(usize, usize)> = (0..n).tuple_combinations().collect();

    let distances: Vec<(usize, usize, f64)> = pairs
        .into_par_iter()
        .map(|(i, j)| {
            let d = match (&backbones[i], &backbones[j]) {
                (Some(a), Some(b)) => backbone_distance(a, b, mode),
                _ => UNDEFINED,
            };
            (i, j, d)
        })
        .collect();

    let mut matrix = DistanceMatrix::new(n);
    for (i, j, d) in distances {
        if !d.is_finite() {
            debug!(i, j, "Distance undefined for pair.");
        }
        matrix.set(i, j, d);
    }
    matrix
}
