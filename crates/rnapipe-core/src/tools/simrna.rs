use super::command::ToolCommand;
use super::{Collaborator, Predictor, ToolRequest, collect_files, ensure_dir, files_with_extension, has_extension, on_path, run_tool};
use crate::core::io::fasta;
use crate::core::models::result::{ToolInvocationResult, keys};
use crate::engine::config::SimrnaConfig;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

pub const INPUT_FILE_NAME: &str = "input.seq";
pub const RESTRAINTS_FILE_NAME: &str = "restraints.txt";
const RUN_PREFIX: &str = "simrna_run";

/// Coarse-grained Monte Carlo folding with SimRNA, guided by the secondary structure.
#[derive(Debug, Clone)]
pub struct SimRna {
    config: SimrnaConfig,
}

impl SimRna {
    pub fn new(config: SimrnaConfig) -> Self {
        Self { config }
    }

    /// Extracts the top structures from the first trajectory with `SimRNA_trafl2pdbs`.
    fn extract_structures(&self, request: &ToolRequest) -> Vec<std::path::PathBuf> {
        let work_dir = &request.work_dir;
        let Some(trafl) = files_with_extension(work_dir, "trafl").into_iter().next() else {
            warn!("SimRNA produced no trajectory.");
            return Vec::new();
        };
        if !on_path(&self.config.trafl2pdbs) {
            warn!(
                "{} not found; trajectory kept at {} but no structures were extracted.",
                self.config.trafl2pdbs,
                trafl.display()
            );
            return Vec::new();
        }

        let command = ToolCommand::new(&self.config.trafl2pdbs)
            .arg(&trafl)
            .arg(self.config.clustering_top_n.to_string())
            .current_dir(work_dir)
            .log_to(request.log_dir.as_deref(), "simrna_trafl2pdbs");
        if let Err(failure) = run_tool("SimRNA_trafl2pdbs", command, request.timeout) {
            warn!("{}", failure.error_message().unwrap_or_default());
            return Vec::new();
        }

        collect_files(work_dir, Some(1), |p| {
            has_extension(p, "pdb")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(RUN_PREFIX))
        })
        .into_iter()
        .take(self.config.clustering_top_n)
        .collect()
    }
}

/// Base-pair distance restraints (`DIST` lines) for every `()` pair of a dot-bracket
/// string, in order of the closing base. Unbalanced brackets are ignored.
pub fn restraints_from_dot_bracket(dot_bracket: &str) -> Vec<String> {
    let mut open: Vec<usize> = Vec::new();
    let mut lines = Vec::new();
    for (i, c) in dot_bracket.chars().enumerate() {
        match c {
            '(' => open.push(i),
            ')' => {
                if let Some(j) = open.pop() {
                    lines.push(format!("DIST A {} N1 A {} N3 5.0 10.0 1.0", j + 1, i + 1));
                }
            }
            _ => {}
        }
    }
    lines
}

fn write_inputs(work_dir: &Path, sequence: &str, dot_bracket: Option<&str>) -> std::io::Result<bool> {
    let structure = match dot_bracket {
        Some(db) if !db.is_empty() => db.to_string(),
        _ => ".".repeat(sequence.len()),
    };
    fs::write(work_dir.join(INPUT_FILE_NAME), format!("{}\n{}\n", sequence, structure))?;

    match dot_bracket.filter(|db| !db.is_empty()) {
        Some(db) => {
            let mut text = restraints_from_dot_bracket(db).join("\n");
            text.push('\n');
            fs::write(work_dir.join(RESTRAINTS_FILE_NAME), text)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

impl Collaborator for SimRna {
    fn name(&self) -> &str {
        "simrna"
    }

    fn available(&self) -> bool {
        self.config.binary.as_deref().is_some_and(on_path)
    }

    fn invoke(&self, request: &ToolRequest) -> ToolInvocationResult {
        let start = Instant::now();
        let Some(binary) = self.config.binary.as_deref() else {
            return ToolInvocationResult::failure("No SimRNA binary configured", 0.0);
        };
        let query = match fasta::read_query(&request.fasta) {
            Ok(record) => record,
            Err(e) => return ToolInvocationResult::failure(format!("Cannot read query: {}", e), 0.0),
        };
        if let Err(failure) = ensure_dir(&request.work_dir) {
            return failure;
        }

        let work_dir = &request.work_dir;
        let has_restraints =
            match write_inputs(work_dir, &query.sequence, request.secondary_structure.as_deref()) {
                Ok(flag) => flag,
                Err(e) => {
                    return ToolInvocationResult::failure(format!("Cannot write SimRNA inputs: {}", e), 0.0);
                }
            };

        let mut command = ToolCommand::new(binary)
            .arg("-s")
            .arg(work_dir.join(INPUT_FILE_NAME))
            .arg("-o")
            .arg(work_dir.join(RUN_PREFIX))
            .arg("-n")
            .arg(self.config.steps.to_string())
            .arg("-R")
            .arg(self.config.replicas.to_string());
        if let Some(data_dir) = &self.config.data_dir {
            command = command.arg("-E").arg(data_dir);
        }
        if has_restraints {
            command = command.arg("-r").arg(work_dir.join(RESTRAINTS_FILE_NAME));
        }
        info!(
            "Running SimRNA ({} replicas, {} steps)...",
            self.config.replicas, self.config.steps
        );
        let command = command
            .current_dir(work_dir)
            .log_to(request.log_dir.as_deref(), "simrna");
        if let Err(failure) = run_tool("SimRNA", command, request.timeout) {
            return failure;
        }

        let structures = self.extract_structures(request);
        let elapsed = start.elapsed().as_secs_f64();
        if structures.is_empty() {
            return ToolInvocationResult::failure("SimRNA produced no structures", elapsed);
        }
        ToolInvocationResult::success(elapsed)
            .with_metric("n_clusters", structures.len())
            .with_artifacts("trafl", files_with_extension(work_dir, "trafl"))
            .with_artifacts(keys::STRUCTURES, structures)
    }
}

impl Predictor for SimRna {}
