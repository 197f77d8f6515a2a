use super::layout::OutputLayout;
use super::pipeline::{PipelineOutputs, PredictionOutput};
use super::resume;
use crate::engine::error::PipelineError;
use crate::engine::state::{PipelineState, Stage};
use crate::tools::rhofold::PLDDT_MEAN;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Confidence metrics shown per predictor, with their display names.
const CONFIDENCE_METRICS: [(&str, &str); 4] = [
    (PLDDT_MEAN, "mean pLDDT"),
    ("ptm", "pTM"),
    ("iptm", "ipTM"),
    ("ranking_score", "ranking score"),
];

/// Renders the Markdown summary of a run.
pub fn render_summary(outputs: &PipelineOutputs, state: &PipelineState) -> String {
    let mut lines: Vec<String> = vec!["# RNA 3D Structure Prediction Report".to_string(), String::new()];
    input_section(&mut lines, outputs);
    secondary_structure_section(&mut lines, outputs);
    prediction_section(&mut lines, outputs);
    ensemble_section(&mut lines, outputs);
    scoring_section(&mut lines, outputs);
    stage_section(&mut lines, state);
    lines.join("\n")
}

/// Renders the summary and writes it to `path`, creating parent directories.
pub fn write_summary(outputs: &PipelineOutputs, state: &PipelineState, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_summary(outputs, state))
}

/// Rewrites the summary of an existing run from what its output directory holds.
pub fn regenerate(output_dir: &Path) -> Result<PathBuf, PipelineError> {
    let (outputs, state) = resume::restore_outputs(output_dir)?;
    let path = OutputLayout::new(output_dir).summary_file();
    write_summary(&outputs, &state, &path).map_err(|source| PipelineError::Io {
        path: path.clone(),
        source,
    })?;
    info!("Report written to {}", path.display());
    Ok(path)
}

fn input_section(lines: &mut Vec<String>, outputs: &PipelineOutputs) {
    let query = &outputs.query;
    lines.push("## Input".to_string());
    lines.push(String::new());
    lines.push(format!("- **ID:** {}", query.id()));
    lines.push(format!("- **Length:** {} nt", query.len()));
    if let Some(gc) = query.gc_content() {
        lines.push(format!("- **GC content:** {:.1}%", gc));
    }
    if let Some(family) = &outputs.rfam_family {
        lines.push(format!("- **Rfam family:** {}", family));
    }
    lines.push(String::new());
    lines.push("```text".to_string());
    lines.push(query.sequence.clone());
    lines.push("```".to_string());
    lines.push(String::new());
}

fn secondary_structure_section(lines: &mut Vec<String>, outputs: &PipelineOutputs) {
    lines.push("## Secondary Structure".to_string());
    lines.push(String::new());
    let Some(folded) = &outputs.secondary_structure else {
        lines.push("_No secondary structure available._".to_string());
        lines.push(String::new());
        return;
    };
    lines.push("```text".to_string());
    lines.push(outputs.query.sequence.clone());
    lines.push(folded.dot_bracket.clone());
    lines.push("```".to_string());
    lines.push(String::new());
    if let Some(mfe) = folded.mfe {
        lines.push(format!("- **MFE:** {:.2} kcal/mol", mfe));
    }
    if let Some(knot) = &outputs.pseudoknot {
        lines.push(format!("- **Pseudoknot-aware structure:** `{}`", knot));
    }
    lines.push(String::new());
}

fn relative<'p>(path: &'p Path, root: &Path) -> &'p Path {
    path.strip_prefix(root).unwrap_or(path)
}

fn confidence_line(prediction: &PredictionOutput) -> Option<String> {
    let parts: Vec<String> = CONFIDENCE_METRICS
        .iter()
        .filter_map(|(key, label)| {
            prediction
                .metrics
                .get(*key)
                .and_then(Value::as_f64)
                .map(|v| format!("{} {:.2}", label, v))
        })
        .collect();
    (!parts.is_empty()).then(|| format!("- **{}:** {}", prediction.predictor, parts.join(", ")))
}

fn prediction_section(lines: &mut Vec<String>, outputs: &PipelineOutputs) {
    lines.push("## 3D Structure Predictions".to_string());
    lines.push(String::new());
    if outputs.predictions.is_empty() {
        lines.push("_No predictors were run._".to_string());
        lines.push(String::new());
        return;
    }
    lines.push("| Predictor | Status | Output | Structures |".to_string());
    lines.push("|-----------|--------|--------|------------|".to_string());
    for p in &outputs.predictions {
        lines.push(format!(
            "| {} | {} | `{}` | {} |",
            p.predictor,
            p.status,
            relative(&p.work_dir, &outputs.output_dir).display(),
            p.structures.len()
        ));
    }
    lines.push(String::new());

    let confidence: Vec<String> = outputs.predictions.iter().filter_map(confidence_line).collect();
    if !confidence.is_empty() {
        lines.push("### Confidence".to_string());
        lines.push(String::new());
        lines.extend(confidence);
        lines.push(String::new());
    }
}

fn format_distance(value: Option<f64>) -> String {
    match value {
        Some(d) => format!("{:.2} Å", d),
        None => "n/a".to_string(),
    }
}

fn ensemble_section(lines: &mut Vec<String>, outputs: &PipelineOutputs) {
    let Some(ensemble) = &outputs.ensemble else {
        return;
    };
    lines.push("## Ensemble Clustering".to_string());
    lines.push(String::new());
    lines.push(format!("- **Candidates:** {}", ensemble.candidates.len()));
    lines.push(format!(
        "- **Clusters:** {} ({} consensus)",
        ensemble.clusters.len(),
        ensemble.consensus_clusters().count()
    ));
    match ensemble.cutoff {
        Some(cutoff) => lines.push(format!("- **RMSD cutoff:** {:.2} Å", cutoff)),
        None => lines.push("- **RMSD cutoff:** unbounded".to_string()),
    }
    lines.push(String::new());
    lines.push("| Cluster | Size | Predictors | Representative | Mean RMSD | Consensus |".to_string());
    lines.push("|---------|------|------------|----------------|-----------|-----------|".to_string());
    for cluster in &ensemble.clusters {
        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} |",
            cluster.id,
            cluster.size,
            cluster.predictors.join(", "),
            cluster.representative.label(),
            format_distance(cluster.mean_distance),
            if cluster.consensus { "yes" } else { "no" }
        ));
    }
    lines.push(String::new());

    let consensus: Vec<String> = ensemble
        .consensus_clusters()
        .map(|c| {
            format!(
                "- Cluster {}: `{}` (agreed by {})",
                c.id,
                relative(&c.representative.path, &outputs.output_dir).display(),
                c.predictors.join(", ")
            )
        })
        .collect();
    if !consensus.is_empty() {
        lines.push("### Consensus Structures".to_string());
        lines.push(String::new());
        lines.extend(consensus);
        lines.push(String::new());
    }
}

fn scoring_section(lines: &mut Vec<String>, outputs: &PipelineOutputs) {
    let Some(scores) = &outputs.scores else {
        return;
    };
    lines.push("## Model Scoring".to_string());
    lines.push(String::new());
    if let Some(best) = scores.best() {
        lines.push(format!("- **Best model:** {} (`{}`)", best.name, relative(&best.path, &outputs.output_dir).display()));
        lines.push(String::new());
    }

    let metrics = scores.metric_names();
    let mut header = "| Rank | Model | Avg. rank |".to_string();
    let mut rule = "|------|-------|-----------|".to_string();
    for metric in &metrics {
        header.push_str(&format!(" {} |", metric));
        rule.push_str(&format!("{}|", "-".repeat(metric.len() + 2)));
    }
    lines.push(header);
    lines.push(rule);
    for (i, model) in scores.models.iter().enumerate() {
        let mut row = format!("| {} | {} | {:.2} |", i + 1, model.name, model.average_rank);
        for metric in &metrics {
            match model.scores.get(*metric) {
                Some(v) => row.push_str(&format!(" {:.3} |", v)),
                None => row.push_str(" - |"),
            }
        }
        lines.push(row);
    }
    lines.push(String::new());
}

fn stage_section(lines: &mut Vec<String>, state: &PipelineState) {
    let report_key = Stage::Report.key();
    lines.push("## Pipeline Stages".to_string());
    lines.push(String::new());
    lines.push("| Stage | Status |".to_string());
    lines.push("|-------|--------|".to_string());
    for (key, status) in state.entries().filter(|(key, _)| *key != report_key) {
        lines.push(format!("| {} | {} |", key, status));
    }
    lines.push(String::new());
}
