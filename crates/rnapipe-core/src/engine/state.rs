use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Name of the state file kept at the root of every output directory.
pub const STATE_FILE_NAME: &str = "pipeline_state.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("State file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize pipeline state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One step of the pipeline, identified in the state file by [`Stage::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    SequenceAnalysis,
    SecondaryStructure,
    /// 3-D prediction with the named predictor.
    Prediction(String),
    Clustering,
    Scoring,
    Report,
}

impl Stage {
    pub fn key(&self) -> String {
        match self {
            Stage::SequenceAnalysis => "stage1".to_string(),
            Stage::SecondaryStructure => "stage2".to_string(),
            Stage::Prediction(predictor) => format!("stage3_{}", predictor),
            Stage::Clustering => "stage3b_clustering".to_string(),
            Stage::Scoring => "stage4".to_string(),
            Stage::Report => "stage5".to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::SequenceAnalysis => "Sequence Analysis",
            Stage::SecondaryStructure => "Secondary Structure",
            Stage::Prediction(_) => "3D Prediction",
            Stage::Clustering => "Ensemble Clustering",
            Stage::Scoring => "Model Scoring",
            Stage::Report => "Report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Completed,
    Skipped,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Completed => "completed",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persisted record of which stages of one pipeline run have finished.
///
/// The state belongs to a single output directory. Every call to [`PipelineState::mark`]
/// rewrites the whole file before returning, so a crash can lose at most the transition
/// that was in flight. Entries are never removed.
#[derive(Debug, Clone)]
pub struct PipelineState {
    path: PathBuf,
    stages: BTreeMap<String, StageStatus>,
}

impl PipelineState {
    /// Loads the state of the run rooted at `output_dir`.
    ///
    /// A missing state file yields an empty state. A file that exists but cannot be read or
    /// parsed is an error.
    pub fn load(output_dir: &Path) -> Result<Self, StateError> {
        let path = output_dir.join(STATE_FILE_NAME);
        let stages = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| StateError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        debug!(path = %path.display(), entries = stages.len(), "Loaded pipeline state.");
        Ok(Self { path, stages })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the recorded status; stages never recorded are pending.
    pub fn status(&self, stage: &Stage) -> StageStatus {
        self.stages
            .get(&stage.key())
            .copied()
            .unwrap_or_default()
    }

    pub fn is_completed(&self, stage: &Stage) -> bool {
        self.status(stage) == StageStatus::Completed
    }

    /// Records a stage transition and flushes the full state to disk.
    pub fn mark(&mut self, stage: &Stage, status: StageStatus) -> Result<(), StateError> {
        self.stages.insert(stage.key(), status);
        self.persist()
    }

    /// All recorded entries ordered by stage key.
    pub fn entries(&self) -> impl Iterator<Item = (&str, StageStatus)> {
        self.stages.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn persist(&self) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(&self.stages)?;
        let io_err = |source: io::Error| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path).map_err(io_err)?;
            file.write_all(json.as_bytes()).map_err(io_err)?;
            file.write_all(b"\n").map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        #[cfg(unix)]
        if let Some(parent) = self.path.parent() {
            File::open(parent)
                .and_then(|dir| dir.sync_all())
                .map_err(io_err)?;
        }
        Ok(())
    }
}
