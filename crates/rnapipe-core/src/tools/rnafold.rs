use super::command::ToolCommand;
use super::{Collaborator, ToolRequest, ensure_dir, on_path, run_tool};
use crate::core::io::fasta;
use crate::core::models::result::{ToolInvocationResult, keys};
use crate::engine::config::RnafoldConfig;
use std::fs;
use std::time::Instant;
use tracing::{info, warn};

pub const DOT_FILE_NAME: &str = "rnafold.dot";

/// A minimum free energy secondary structure.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldedStructure {
    pub dot_bracket: String,
    /// Free energy in kcal/mol, when known.
    pub mfe: Option<f64>,
}

/// Minimum free energy folding with ViennaRNA's `RNAfold`.
#[derive(Debug, Clone)]
pub struct RnaFold {
    config: RnafoldConfig,
}

impl RnaFold {
    pub fn new(config: RnafoldConfig) -> Self {
        Self { config }
    }
}

impl Collaborator for RnaFold {
    fn name(&self) -> &str {
        "rnafold"
    }

    fn available(&self) -> bool {
        on_path(&self.config.binary)
    }

    fn invoke(&self, request: &ToolRequest) -> ToolInvocationResult {
        let start = Instant::now();
        let query = match fasta::read_query(&request.fasta) {
            Ok(record) => record,
            Err(e) => return ToolInvocationResult::failure(format!("Cannot read query: {}", e), 0.0),
        };
        if let Err(failure) = ensure_dir(&request.work_dir) {
            return failure;
        }

        // Partition-function plots land in the working directory.
        let command = ToolCommand::new(&self.config.binary)
            .args(["--noPS", "-p", "-i"])
            .arg(&request.fasta)
            .current_dir(&request.work_dir)
            .log_to(request.log_dir.as_deref(), "rnafold");
        let output = match run_tool("RNAfold", command, request.timeout) {
            Ok(output) => output,
            Err(failure) => return failure,
        };

        let Some(structure) = parse_rnafold_output(&output.stdout) else {
            warn!("Could not parse RNAfold output.");
            return ToolInvocationResult::failure(
                "RNAfold produced no dot-bracket structure",
                start.elapsed().as_secs_f64(),
            );
        };
        let mfe = structure.mfe.unwrap_or_default();
        info!(
            "Secondary structure: {} (MFE: {:.2} kcal/mol)",
            structure.dot_bracket, mfe
        );

        let dot_file = request.work_dir.join(DOT_FILE_NAME);
        let content = format!(
            ">{}\n{}\n{} ({:.2})\n",
            query.header, query.sequence, structure.dot_bracket, mfe
        );
        if let Err(e) = fs::write(&dot_file, content) {
            return ToolInvocationResult::failure(
                format!("Cannot write {}: {}", dot_file.display(), e),
                start.elapsed().as_secs_f64(),
            );
        }

        ToolInvocationResult::success(start.elapsed().as_secs_f64())
            .with_artifact(keys::DOT_BRACKET_FILE, dot_file)
            .with_metric(keys::DOT_BRACKET, structure.dot_bracket)
            .with_metric(keys::MFE, mfe)
            .with_metric("length", query.len())
    }
}

/// Finds the MFE line (`<dot-bracket> (<energy>)`) in `RNAfold` stdout.
///
/// With `-p` RNAfold also prints ensemble lines that use `[...]` and `{...}` for their
/// energies; only the line with a parenthesised energy is taken.
pub fn parse_rnafold_output(stdout: &str) -> Option<FoldedStructure> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('>'))
        .find_map(|line| {
            let (structure, energy) = line.rsplit_once(" (")?;
            let mfe = energy.strip_suffix(')')?.trim().parse::<f64>().ok()?;
            let dot_bracket = structure.trim();
            is_dot_bracket(dot_bracket).then(|| FoldedStructure {
                dot_bracket: dot_bracket.to_string(),
                mfe: Some(mfe),
            })
        })
}

/// Reads back a dot-bracket file written by a secondary-structure collaborator.
///
/// The structure is the first token of the last line that contains `(` or `.`; a trailing
/// `(<energy>)` is parsed when present.
pub fn parse_dot_file(content: &str) -> Option<FoldedStructure> {
    let line = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('>'))
        .rfind(|line| line.contains('(') || line.contains('.'))?;
    let mut tokens = line.split_whitespace();
    let dot_bracket = tokens.next()?.to_string();
    let mfe = tokens
        .collect::<Vec<_>>()
        .join("")
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')').map(str::to_string))
        .and_then(|energy| energy.parse::<f64>().ok());
    Some(FoldedStructure { dot_bracket, mfe })
}

fn is_dot_bracket(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| matches!(c, '(' | ')' | '.' | '[' | ']' | '{' | '}' | '<' | '>'))
}
