use super::command::ToolCommand;
use super::{Collaborator, ToolRequest, ensure_dir, files_with_extension, run_tool};
use crate::core::models::result::{ToolInvocationResult, keys};
use crate::engine::config::SpotRnaConfig;
use std::collections::BTreeMap;
use std::fs;
use std::time::Instant;
use tracing::info;

pub const DOT_FILE_NAME: &str = "spotrna.dot";

/// Pseudoknot-aware secondary structure prediction with SPOT-RNA.
#[derive(Debug, Clone)]
pub struct SpotRna {
    config: SpotRnaConfig,
}

impl SpotRna {
    pub fn new(config: SpotRnaConfig) -> Self {
        Self { config }
    }
}

impl Collaborator for SpotRna {
    fn name(&self) -> &str {
        "spotrna"
    }

    fn available(&self) -> bool {
        self.config.script.as_deref().is_some_and(|s| s.exists())
    }

    fn invoke(&self, request: &ToolRequest) -> ToolInvocationResult {
        let start = Instant::now();
        let Some(script) = self.config.script.as_deref() else {
            return ToolInvocationResult::failure("No SPOT-RNA script configured", 0.0);
        };
        if let Err(failure) = ensure_dir(&request.work_dir) {
            return failure;
        }

        let command = ToolCommand::new(&self.config.python)
            .arg(script)
            .arg("--inputs")
            .arg(&request.fasta)
            .arg("--outputs")
            .arg(&request.work_dir)
            .log_to(request.log_dir.as_deref(), "spotrna");
        if let Err(failure) = run_tool("SPOT-RNA", command, request.timeout) {
            return failure;
        }

        let elapsed = || start.elapsed().as_secs_f64();
        let bpseq_files = files_with_extension(&request.work_dir, "bpseq");
        let Some(bpseq) = bpseq_files.first() else {
            return ToolInvocationResult::failure("SPOT-RNA produced no .bpseq output", elapsed());
        };
        let dot_bracket = match fs::read_to_string(bpseq) {
            Ok(content) => bpseq_to_dot_bracket(&content),
            Err(e) => {
                return ToolInvocationResult::failure(
                    format!("Cannot read {}: {}", bpseq.display(), e),
                    elapsed(),
                );
            }
        };
        info!("SPOT-RNA structure: {}", dot_bracket);

        let dot_file = request.work_dir.join(DOT_FILE_NAME);
        if let Err(e) = fs::write(&dot_file, format!("{}\n", dot_bracket)) {
            return ToolInvocationResult::failure(
                format!("Cannot write {}: {}", dot_file.display(), e),
                elapsed(),
            );
        }

        ToolInvocationResult::success(elapsed())
            .with_artifact(keys::DOT_BRACKET_FILE, dot_file)
            .with_artifact("bpseq", bpseq)
            .with_artifacts("ct", files_with_extension(&request.work_dir, "ct"))
            .with_metric(keys::DOT_BRACKET, dot_bracket)
    }
}

/// Converts a BPSEQ listing to dot-bracket notation.
///
/// Pairs are visited in order of their 5' position. A pair that crosses none of the pairs
/// already drawn with `()` is drawn with `()`; every other pair is drawn with `[]`.
/// Malformed lines are skipped.
pub fn bpseq_to_dot_bracket(content: &str) -> String {
    let mut pairs: BTreeMap<usize, usize> = BTreeMap::new();
    let mut length = 0;

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [index, _base, partner] = fields.as_slice() else {
            continue;
        };
        let (Ok(index), Ok(partner)) = (index.parse::<usize>(), partner.parse::<usize>()) else {
            continue;
        };
        if index == 0 {
            continue;
        }
        length = length.max(index);
        if partner > index {
            pairs.insert(index, partner);
        }
    }

    let crosses = |(i, j): (usize, usize), (k, l): (usize, usize)| {
        (i < k && k < j && j < l) || (k < i && i < l && l < j)
    };

    let mut nested: Vec<(usize, usize)> = Vec::new();
    let mut knotted: Vec<(usize, usize)> = Vec::new();
    for (&i, &j) in &pairs {
        if nested.iter().any(|&other| crosses((i, j), other)) {
            knotted.push((i, j));
        } else {
            nested.push((i, j));
        }
    }

    let mut structure = vec!['.'; length.max(pairs.values().copied().max().unwrap_or(0))];
    for (i, j) in nested {
        structure[i - 1] = '(';
        structure[j - 1] = ')';
    }
    for (i, j) in knotted {
        structure[i - 1] = '[';
        structure[j - 1] = ']';
    }
    structure.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bpseq(partners: &[usize]) -> String {
        partners
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{} N {}\n", i + 1, p))
            .collect()
    }

    #[test]
    fn nested_pairs_use_parentheses() {
        // ((..))
        let content = bpseq(&[6, 5, 0, 0, 2, 1]);
        assert_eq!(bpseq_to_dot_bracket(&content), "((..))");
    }

    #[test]
    fn crossing_pairs_use_square_brackets() {
        // Pairs (1,5) and (3,7) cross.
        let content = bpseq(&[5, 0, 7, 0, 1, 0, 3]);
        assert_eq!(bpseq_to_dot_bracket(&content), "(.[.).]");
    }

    #[test]
    fn unpaired_sequence_is_all_dots() {
        assert_eq!(bpseq_to_dot_bracket(&bpseq(&[0, 0, 0])), "...");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let content = "# SPOT-RNA output\n1 G 4\nbad line here\n2 A 0\n3 A 0\n4 C 1\n";
        assert_eq!(bpseq_to_dot_bracket(content), "(..)");
    }

    #[test]
    fn unavailable_without_script() {
        assert!(!SpotRna::new(SpotRnaConfig::default()).available());
    }
}
