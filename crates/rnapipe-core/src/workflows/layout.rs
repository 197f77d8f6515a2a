use std::path::{Path, PathBuf};

pub const INPUT_DIR: &str = "input";
pub const QUERY_FILE_NAME: &str = "query.fasta";
pub const LOGS_DIR: &str = "logs";
pub const SEQUENCE_ANALYSIS_DIR: &str = "01_sequence_analysis";
pub const SECONDARY_STRUCTURE_DIR: &str = "02_secondary_structure";
pub const PREDICTION_DIR: &str = "03_3d_prediction";
pub const CLUSTERING_DIR: &str = "03b_clustering";
pub const SCORING_DIR: &str = "04_scoring";
pub const REPORT_DIR: &str = "05_report";
pub const SUMMARY_FILE_NAME: &str = "summary.md";

/// The directory conventions of one pipeline output directory.
///
/// Every stage writes below its own numbered directory; resuming relies on these paths
/// alone to find the outputs of completed stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn query_fasta(&self) -> PathBuf {
        self.root.join(INPUT_DIR).join(QUERY_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn sequence_analysis_dir(&self) -> PathBuf {
        self.root.join(SEQUENCE_ANALYSIS_DIR)
    }

    pub fn secondary_structure_dir(&self) -> PathBuf {
        self.root.join(SECONDARY_STRUCTURE_DIR)
    }

    pub fn prediction_dir(&self, predictor: &str) -> PathBuf {
        self.root.join(PREDICTION_DIR).join(predictor)
    }

    /// Work directory of dispatch partition `index` (`gpu_<index>`).
    pub fn partition_dir(&self, predictor: &str, index: usize) -> PathBuf {
        self.prediction_dir(predictor).join(format!("gpu_{}", index))
    }

    pub fn clustering_dir(&self) -> PathBuf {
        self.root.join(CLUSTERING_DIR)
    }

    pub fn scoring_dir(&self) -> PathBuf {
        self.root.join(SCORING_DIR)
    }

    pub fn report_dir(&self) -> PathBuf {
        self.root.join(REPORT_DIR)
    }

    pub fn summary_file(&self) -> PathBuf {
        self.report_dir().join(SUMMARY_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_numbered_stage_directories() {
        let layout = OutputLayout::new("/out");
        assert_eq!(layout.query_fasta(), PathBuf::from("/out/input/query.fasta"));
        assert_eq!(
            layout.partition_dir("rhofold", 2),
            PathBuf::from("/out/03_3d_prediction/rhofold/gpu_2")
        );
        assert_eq!(layout.summary_file(), PathBuf::from("/out/05_report/summary.md"));
    }
}
