use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix of the per-seed output directories written by batch predictors (e.g. `run_3`).
const RUN_DIR_PREFIX: &str = "run_";

/// A reference to one predicted 3-D structure under evaluation.
///
/// Candidates do not own any coordinate data; they point at a structure file on disk and
/// carry enough provenance (the predictor tag and an optional run identifier) to group
/// and label them during ensemble analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructuralCandidate {
    /// Path to the structure file (PDB or mmCIF).
    pub path: PathBuf,
    /// Name of the predictor that produced the structure (e.g. `"rhofold"`).
    pub predictor: String,
    /// Seed or run identifier when the structure was produced as part of a batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl StructuralCandidate {
    /// Creates a new candidate without a run identifier.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the structure file.
    /// * `predictor` - The predictor tag.
    pub fn new(path: impl Into<PathBuf>, predictor: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            predictor: predictor.into(),
            run_id: None,
        }
    }

    /// Attaches a run identifier to the candidate.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Creates a candidate and infers its run identifier from the output layout.
    ///
    /// Batch predictors write each seed into a `run_<seed>` directory; when the file lives
    /// in such a directory the seed becomes the run identifier.
    pub fn from_output(path: impl Into<PathBuf>, predictor: impl Into<String>) -> Self {
        let path = path.into();
        let run_id = infer_run_id(&path);
        Self {
            path,
            predictor: predictor.into(),
            run_id,
        }
    }

    /// Returns the file name of the structure, or the full path if it has none.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// A short, human-readable label of the form `predictor:run` or `predictor:file`.
    pub fn label(&self) -> String {
        match &self.run_id {
            Some(run) => format!("{}:{}", self.predictor, run),
            None => format!("{}:{}", self.predictor, self.file_name()),
        }
    }
}

impl fmt::Display for StructuralCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.path.display())
    }
}

fn infer_run_id(path: &Path) -> Option<String> {
    path.parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(RUN_DIR_PREFIX))
        .filter(|seed| !seed.is_empty())
        .map(str::to_string)
}
