use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::config::ConfigError;
use super::state::StateError;
use crate::core::io::fasta::FastaError;

/// Errors that abort a pipeline run.
///
/// Tool failures never appear here; they are recorded as stage statuses and the run
/// continues. Only problems with the input, the configuration, or the persisted state stop
/// the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid input sequence {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: FastaError,
    },

    #[error("Pipeline state error: {0}")]
    State(#[from] StateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
