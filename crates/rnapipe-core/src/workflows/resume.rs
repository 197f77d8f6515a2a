//! Reconstruction of stage outputs from the output directory.
//!
//! A completed stage is never run again; its result is recovered from the files it left
//! behind. Every function here returns `None` (or an empty list) when the expected file is
//! missing or unreadable, which downstream stages treat as an absent output.

use super::layout::OutputLayout;
use super::pipeline::{PipelineOutputs, PredictionOutput};
use crate::core::io::fasta;
use crate::engine::cluster::export::{self, CLUSTERS_FILE_NAME, EnsembleSummary};
use crate::engine::error::PipelineError;
use crate::engine::state::{PipelineState, Stage, StageStatus};
use crate::tools::infernal::ALIGNMENT_FILE_NAME;
use crate::tools::rnadvisor::{self, SCORES_FILE_NAME, ScoreTable};
use crate::tools::rnafold::{self, DOT_FILE_NAME, FoldedStructure};
use crate::tools::spotrna;
use crate::tools::{collect_files, has_extension};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const PREDICTION_KEY_PREFIX: &str = "stage3_";

pub fn alignment(layout: &OutputLayout) -> Option<PathBuf> {
    let path = layout.sequence_analysis_dir().join(ALIGNMENT_FILE_NAME);
    path.is_file().then_some(path)
}

pub fn secondary_structure(layout: &OutputLayout) -> Option<FoldedStructure> {
    let path = layout.secondary_structure_dir().join(DOT_FILE_NAME);
    let content = fs::read_to_string(&path).ok()?;
    let parsed = rnafold::parse_dot_file(&content);
    if parsed.is_none() {
        warn!("No dot-bracket structure found in {}", path.display());
    }
    parsed
}

pub fn pseudoknot_structure(layout: &OutputLayout) -> Option<String> {
    let path = layout.secondary_structure_dir().join(spotrna::DOT_FILE_NAME);
    let content = fs::read_to_string(path).ok()?;
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('>'))
        .map(str::to_string)
}

/// Every PDB file (sorted) followed by every mmCIF file (sorted) below the predictor's
/// directory.
pub fn structures(layout: &OutputLayout, predictor: &str) -> Vec<PathBuf> {
    let dir = layout.prediction_dir(predictor);
    let mut found = collect_files(&dir, None, |p| has_extension(p, "pdb"));
    found.extend(collect_files(&dir, None, |p| has_extension(p, "cif")));
    found
}

pub fn ensemble(layout: &OutputLayout) -> Option<EnsembleSummary> {
    let path = layout.clustering_dir().join(CLUSTERS_FILE_NAME);
    match export::read_clusters_json(&path) {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!("Could not restore clustering results: {}", e);
            None
        }
    }
}

pub fn scores(layout: &OutputLayout) -> Option<ScoreTable> {
    let path = layout.scoring_dir().join(SCORES_FILE_NAME);
    match rnadvisor::read_scores_json(&path) {
        Ok(table) => Some(table),
        Err(e) => {
            warn!("Could not restore scoring results: {}", e);
            None
        }
    }
}

/// Rebuilds the outputs of an existing run from its state file and output directory.
///
/// Only stages recorded as completed are restored. Predictors are listed in key order.
pub fn restore_outputs(output_dir: &Path) -> Result<(PipelineOutputs, PipelineState), PipelineError> {
    let layout = OutputLayout::new(output_dir);
    let state = PipelineState::load(layout.root())?;
    let query_fasta = layout.query_fasta();
    let query = fasta::read_query(&query_fasta).map_err(|source| PipelineError::Input {
        path: query_fasta.clone(),
        source,
    })?;

    let mut outputs = PipelineOutputs::new(layout.root(), query);
    if state.is_completed(&Stage::SequenceAnalysis) {
        outputs.alignment = alignment(&layout);
    }
    if state.is_completed(&Stage::SecondaryStructure) {
        outputs.secondary_structure = secondary_structure(&layout);
        outputs.pseudoknot = pseudoknot_structure(&layout);
    }
    outputs.predictions = state
        .entries()
        .filter_map(|(key, status)| {
            let predictor = key.strip_prefix(PREDICTION_KEY_PREFIX)?;
            let structures = if status == StageStatus::Completed {
                structures(&layout, predictor)
            } else {
                Vec::new()
            };
            Some(PredictionOutput {
                predictor: predictor.to_string(),
                status,
                work_dir: layout.prediction_dir(predictor),
                structures,
                metrics: BTreeMap::new(),
            })
        })
        .collect();
    if state.is_completed(&Stage::Clustering) {
        outputs.ensemble = ensemble(&layout);
    }
    if state.is_completed(&Stage::Scoring) {
        outputs.scores = scores(&layout);
    }
    let summary = layout.summary_file();
    outputs.report = summary.is_file().then_some(summary);
    Ok((outputs, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_outputs_reconstruct_as_absent() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        assert_eq!(alignment(&layout), None);
        assert_eq!(secondary_structure(&layout), None);
        assert_eq!(pseudoknot_structure(&layout), None);
        assert!(structures(&layout, "rhofold").is_empty());
        assert!(ensemble(&layout).is_none());
        assert!(scores(&layout).is_none());
    }

    #[test]
    fn secondary_structures_are_read_from_dot_files() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let ss_dir = layout.secondary_structure_dir();
        fs::create_dir_all(&ss_dir).unwrap();
        fs::write(ss_dir.join(DOT_FILE_NAME), ">q\nGGGAAACCC\n(((...))) (-1.20)\n").unwrap();
        fs::write(ss_dir.join(spotrna::DOT_FILE_NAME), "((.[..).])\n").unwrap();

        let folded = secondary_structure(&layout).unwrap();
        assert_eq!(folded.dot_bracket, "(((...)))");
        assert_eq!(folded.mfe, Some(-1.2));
        assert_eq!(pseudoknot_structure(&layout).as_deref(), Some("((.[..).])"));
    }

    #[test]
    fn structures_list_pdb_before_cif() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let base = layout.prediction_dir("protenix");
        for rel in ["gpu_1/b.cif", "gpu_0/a.cif", "gpu_1/run_1/z.pdb", "gpu_0/run_0/y.pdb", "input.json"] {
            let path = base.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }

        let names: Vec<PathBuf> = structures(&layout, "protenix")
            .into_iter()
            .map(|p| p.strip_prefix(&base).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("gpu_0/run_0/y.pdb"),
                PathBuf::from("gpu_1/run_1/z.pdb"),
                PathBuf::from("gpu_0/a.cif"),
                PathBuf::from("gpu_1/b.cif"),
            ]
        );
    }

    #[test]
    fn restore_reads_completed_stages_only() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        fasta::write_fasta(
            &[crate::core::models::sequence::FastaRecord::new("q", "GGGAAACCC")],
            &layout.query_fasta(),
        )
        .unwrap();
        let model = layout.prediction_dir("rhofold").join("run_0/unrelaxed_model.pdb");
        fs::create_dir_all(model.parent().unwrap()).unwrap();
        fs::write(&model, "END\n").unwrap();
        let failed = layout.prediction_dir("protenix").join("partial.cif");
        fs::create_dir_all(failed.parent().unwrap()).unwrap();
        fs::write(&failed, "").unwrap();

        let mut state = PipelineState::load(dir.path()).unwrap();
        state.mark(&Stage::Prediction("rhofold".into()), StageStatus::Completed).unwrap();
        state.mark(&Stage::Prediction("protenix".into()), StageStatus::Failed).unwrap();
        state.mark(&Stage::Clustering, StageStatus::Skipped).unwrap();

        let (outputs, restored) = restore_outputs(dir.path()).unwrap();
        assert_eq!(restored.status(&Stage::Prediction("rhofold".into())), StageStatus::Completed);
        assert_eq!(outputs.query.sequence, "GGGAAACCC");
        let names: Vec<&str> = outputs.predictions.iter().map(|p| p.predictor.as_str()).collect();
        assert_eq!(names, vec!["protenix", "rhofold"]);
        assert!(outputs.predictions[0].structures.is_empty());
        assert_eq!(outputs.predictions[1].structures, vec![model]);
        assert!(outputs.ensemble.is_none());
        assert!(outputs.report.is_none());
    }

    #[test]
    fn restore_without_query_is_an_input_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            restore_outputs(dir.path()),
            Err(PipelineError::Input { .. })
        ));
    }

    #[test]
    fn alignment_is_found_when_present() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        fs::create_dir_all(layout.sequence_analysis_dir()).unwrap();
        fs::write(layout.sequence_analysis_dir().join(ALIGNMENT_FILE_NAME), "# STOCKHOLM 1.0\n//\n").unwrap();
        assert!(alignment(&layout).is_some());
    }
}
