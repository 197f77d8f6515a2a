//! # External Collaborators
//!
//! Every computation the pipeline delegates to another program sits behind the
//! [`Collaborator`] trait: a name, an availability probe, and a blocking invocation that turns
//! a [`ToolRequest`] into a [`ToolInvocationResult`]. Failures are values, never panics or
//! errors, so the orchestrator can record them as stage statuses and move on.
//!
//! The subprocess-backed implementations live in the submodules; [`command`] provides the
//! shared runner with output capture and timeout enforcement.

pub mod command;
pub mod infernal;
pub mod protenix;
pub mod rhofold;
pub mod rnadvisor;
pub mod rnafold;
pub mod simrna;
pub mod spotrna;

use crate::core::models::result::ToolInvocationResult;
use command::{CommandOutput, ToolCommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Everything a collaborator may need for one invocation.
///
/// Only the FASTA path, the work directory, and the timeout are always meaningful; each
/// collaborator reads the optional fields it understands and ignores the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub fasta: PathBuf,
    pub work_dir: PathBuf,
    pub timeout: Duration,
    pub alignment: Option<PathBuf>,
    pub secondary_structure: Option<String>,
    pub device: Option<String>,
    pub seeds: Vec<u64>,
    pub structures: Vec<PathBuf>,
    /// Directory receiving `<tool>.stdout` / `<tool>.stderr` captures.
    pub log_dir: Option<PathBuf>,
}

impl ToolRequest {
    pub fn new(fasta: impl Into<PathBuf>, work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            fasta: fasta.into(),
            work_dir: work_dir.into(),
            timeout,
            alignment: None,
            secondary_structure: None,
            device: None,
            seeds: Vec::new(),
            structures: Vec::new(),
            log_dir: None,
        }
    }

    pub fn with_alignment(mut self, alignment: Option<PathBuf>) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_secondary_structure(mut self, dot_bracket: Option<String>) -> Self {
        self.secondary_structure = dot_bracket;
        self
    }

    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    pub fn with_seeds(mut self, seeds: Vec<u64>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn with_structures(mut self, structures: Vec<PathBuf>) -> Self {
        self.structures = structures;
        self
    }

    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    /// The same request with another work directory.
    pub fn in_dir(&self, work_dir: PathBuf) -> Self {
        Self {
            work_dir,
            ..self.clone()
        }
    }

    /// The same request redirected to another work directory and device, for one dispatch
    /// partition.
    pub fn for_partition(&self, work_dir: PathBuf, device: Option<String>, seeds: Vec<u64>) -> Self {
        Self {
            work_dir,
            device,
            seeds,
            ..self.clone()
        }
    }
}

/// An external program the pipeline can delegate a stage to.
pub trait Collaborator: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the program and its required resources are installed and configured.
    fn available(&self) -> bool;

    fn invoke(&self, request: &ToolRequest) -> ToolInvocationResult;
}

/// A 3-D structure predictor.
pub trait Predictor: Collaborator {
    /// The first seed of a batch; a run of `n` structures uses `offset..offset + n`.
    fn seed_offset(&self) -> u64 {
        0
    }

    /// Whether independent seed batches can be spread over several devices.
    fn supports_devices(&self) -> bool {
        false
    }
}

/// Runs a tool command, turning launch errors and non-zero exits into failed results.
pub(crate) fn run_tool(
    label: &str,
    command: ToolCommand,
    timeout: Duration,
) -> Result<CommandOutput, ToolInvocationResult> {
    match command.run(timeout) {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => Err(ToolInvocationResult::failure(
            format!("{} failed: {}", label, output.stderr_excerpt()),
            output.elapsed.as_secs_f64(),
        )),
        Err(e) => Err(ToolInvocationResult::failure(
            format!("{} failed: {}", label, e),
            timeout_elapsed(&e, timeout),
        )),
    }
}

fn timeout_elapsed(error: &command::CommandError, timeout: Duration) -> f64 {
    match error {
        command::CommandError::Timeout { .. } => timeout.as_secs_f64(),
        _ => 0.0,
    }
}

/// Creates `dir` (and parents), reporting failure as a failed invocation.
pub(crate) fn ensure_dir(dir: &Path) -> Result<(), ToolInvocationResult> {
    fs::create_dir_all(dir).map_err(|e| {
        ToolInvocationResult::failure(format!("Cannot create {}: {}", dir.display(), e), 0.0)
    })
}

/// Files directly inside `dir` whose extension is `extension`, sorted by path.
pub(crate) fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    collect_files(dir, Some(1), |path| has_extension(path, extension))
}

/// Files anywhere below `dir` accepted by `filter`, sorted by path.
pub(crate) fn collect_files(
    dir: &Path,
    max_depth: Option<usize>,
    filter: impl Fn(&Path) -> bool,
) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(dir).min_depth(1);
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| filter(path))
        .collect();
    files.sort();
    files
}

pub(crate) fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Whether `program` names an executable file or a program on `PATH`.
pub(crate) fn on_path(program: &str) -> bool {
    command::find_executable(program).is_some()
}
