use super::{Cluster, EnsembleResult};
use crate::core::models::candidate::StructuralCandidate;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DISTANCE_MATRIX_FILE_NAME: &str = "distance_matrix.csv";
pub const CLUSTERS_FILE_NAME: &str = "clusters.json";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write distance matrix: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid cluster summary {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Serializable view of one cluster.
///
/// Non-finite distances are stored as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: usize,
    pub size: usize,
    pub predictors: Vec<String>,
    pub consensus: bool,
    pub mean_distance: Option<f64>,
    pub representative: StructuralCandidate,
    pub members: Vec<StructuralCandidate>,
}

/// Serializable view of an [`EnsembleResult`], as written to `clusters.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSummary {
    /// `None` when the cut height is unbounded.
    pub cutoff: Option<f64>,
    pub candidates: Vec<StructuralCandidate>,
    pub clusters: Vec<ClusterSummary>,
}

impl EnsembleSummary {
    pub fn representatives(&self) -> impl Iterator<Item = &StructuralCandidate> {
        self.clusters.iter().map(|c| &c.representative)
    }

    pub fn consensus_clusters(&self) -> impl Iterator<Item = &ClusterSummary> {
        self.clusters.iter().filter(|c| c.consensus)
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

impl From<&Cluster> for ClusterSummary {
    fn from(cluster: &Cluster) -> Self {
        Self {
            id: cluster.id,
            size: cluster.size(),
            predictors: cluster.predictors.iter().cloned().collect(),
            consensus: cluster.consensus,
            mean_distance: finite(cluster.mean_distance),
            representative: cluster.representative.candidate.clone(),
            members: cluster.members.iter().map(|m| m.candidate.clone()).collect(),
        }
    }
}

impl EnsembleResult {
    pub fn summary(&self) -> EnsembleSummary {
        EnsembleSummary {
            cutoff: finite(self.cutoff),
            candidates: self.candidates.clone(),
            clusters: self.clusters.iter().map(ClusterSummary::from).collect(),
        }
    }
}

/// Writes the distance matrix as CSV: a header of candidate labels preceded by an empty
/// cell, then one labelled row per candidate. Undefined distances are left empty.
pub fn write_distance_matrix_csv(result: &EnsembleResult, path: &Path) -> Result<(), ExportError> {
    let file = create(path)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    let labels: Vec<String> = result.candidates.iter().map(|c| c.label()).collect();
    let mut header = Vec::with_capacity(labels.len() + 1);
    header.push(String::new());
    header.extend(labels.iter().cloned());
    writer.write_record(&header)?;

    for (i, label) in labels.iter().enumerate() {
        let mut record = Vec::with_capacity(labels.len() + 1);
        record.push(label.clone());
        record.extend(result.matrix.row(i).iter().map(|&d| {
            if d.is_finite() {
                format!("{:.3}", d)
            } else {
                String::new()
            }
        }));
        writer.write_record(&record)?;
    }

    writer.flush().map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_clusters_json(summary: &EnsembleSummary, path: &Path) -> Result<(), ExportError> {
    let file = create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), summary).map_err(|source| {
        ExportError::Json {
            path: path.to_path_buf(),
            source,
        }
    })
}

pub fn read_clusters_json(path: &Path) -> Result<EnsembleSummary, ExportError> {
    let file = File::open(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ExportError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn create(path: &Path) -> Result<File, ExportError> {
    let io_err = |source: io::Error| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    File::create(path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cluster::cluster_from_matrix;
    use crate::engine::cluster::distance::{DistanceMatrix, UNDEFINED};
    use tempfile::tempdir;

    fn result() -> EnsembleResult {
        let candidates = vec![
            StructuralCandidate::new("/m/rhofold/run_0/unrelaxed_model.pdb", "rhofold").with_run_id("0"),
            StructuralCandidate::new("/m/protenix/model_1.cif", "protenix"),
            StructuralCandidate::new("/m/simrna/simrna_run_01.pdb", "simrna"),
        ];
        let matrix = DistanceMatrix::from_rows(&[
            vec![0.0, 1.25, UNDEFINED],
            vec![1.25, 0.0, 7.5],
            vec![UNDEFINED, 7.5, 0.0],
        ])
        .unwrap();
        cluster_from_matrix(candidates, matrix, 5.0)
    }

    #[test]
    fn distance_matrix_leaves_undefined_cells_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("03b_clustering").join(DISTANCE_MATRIX_FILE_NAME);
        write_distance_matrix_csv(&result(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], ",rhofold:0,protenix:model_1.cif,simrna:simrna_run_01.pdb");
        assert_eq!(lines[1], "rhofold:0,0.000,1.250,");
        assert_eq!(lines[3], "simrna:simrna_run_01.pdb,,7.500,0.000");
    }

    #[test]
    fn clusters_json_can_be_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CLUSTERS_FILE_NAME);
        let summary = result().summary();
        write_clusters_json(&summary, &path).unwrap();

        let loaded = read_clusters_json(&path).unwrap();
        assert_eq!(loaded, summary);
        assert_eq!(loaded.clusters.len(), 2);
        assert_eq!(loaded.clusters[0].size, 2);
        assert!(loaded.clusters[0].consensus);
        assert_eq!(loaded.representatives().count(), 2);
        assert_eq!(loaded.consensus_clusters().count(), 1);
    }

    #[test]
    fn infinite_cutoff_is_stored_as_null() {
        let candidates = vec![StructuralCandidate::new("/m/a.pdb", "a")];
        let summary = cluster_from_matrix(candidates, DistanceMatrix::new(1), f64::INFINITY).summary();
        assert_eq!(summary.cutoff, None);
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json["cutoff"].is_null());
    }

    #[test]
    fn corrupt_summary_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CLUSTERS_FILE_NAME);
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(read_clusters_json(&path), Err(ExportError::Json { .. })));
    }
}
