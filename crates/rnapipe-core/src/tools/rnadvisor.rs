use super::command::ToolCommand;
use super::{Collaborator, ToolRequest, ensure_dir, on_path, run_tool};
use crate::core::models::result::{ToolInvocationResult, keys};
use crate::engine::config::RnadvisorConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const SCORES_FILE_NAME: &str = "scores.json";
pub const RANKING_FILE_NAME: &str = "ranking.txt";

/// Metrics where a lower value means a better model; every other metric is higher-is-better.
const LOWER_IS_BETTER: [&str; 4] = ["rsRNASP", "DFIRE", "RASP", "DFIRE-RNA"];

/// CSV columns that identify the model rather than score it.
const IDENTITY_COLUMNS: [&str; 4] = ["", "name", "pdb", "file"];

#[derive(Debug, Error)]
pub enum ScoresError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed score table {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One scored structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredModel {
    pub name: String,
    pub path: PathBuf,
    pub scores: BTreeMap<String, f64>,
    pub average_rank: f64,
}

/// Scored models in consensus-rank order, best first. This is what `scores.json` holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreTable {
    pub models: Vec<ScoredModel>,
}

impl ScoreTable {
    pub fn best(&self) -> Option<&ScoredModel> {
        self.models.first()
    }

    /// Every metric name present on at least one model, sorted.
    pub fn metric_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .models
            .iter()
            .flat_map(|m| m.scores.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

pub fn write_scores_json(table: &ScoreTable, path: &Path) -> Result<(), ScoresError> {
    let text = serde_json::to_string_pretty(table).map_err(|source| ScoresError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| ScoresError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_scores_json(path: &Path) -> Result<ScoreTable, ScoresError> {
    let text = fs::read_to_string(path).map_err(|source| ScoresError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ScoresError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads the numeric columns of the first data row of an RNAdvisor CSV.
///
/// Identity columns, empty cells, and non-numeric cells are dropped.
pub fn parse_scores_csv(content: &str) -> BTreeMap<String, f64> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());
    let Ok(headers) = reader.headers().cloned() else {
        return BTreeMap::new();
    };
    let Some(Ok(record)) = reader.records().next() else {
        return BTreeMap::new();
    };

    headers
        .iter()
        .zip(record.iter())
        .filter(|(header, _)| !IDENTITY_COLUMNS.contains(&header.trim()))
        .filter_map(|(header, value)| {
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            value.parse::<f64>().ok().map(|v| (header.trim().to_string(), v))
        })
        .collect()
}

/// Ranks models by their mean rank across metrics.
///
/// Each metric ranks the models that report it (1 = best, lower-is-better for the energy
/// potentials listed in [`LOWER_IS_BETTER`]). A model's score is the mean of its ranks over
/// the metrics it reports. The result is sorted best first; ties keep name order.
pub fn consensus_rank(scores: &BTreeMap<String, BTreeMap<String, f64>>) -> Vec<(String, f64)> {
    let mut metrics: Vec<&str> = scores
        .values()
        .flat_map(|s| s.keys().map(String::as_str))
        .collect();
    metrics.sort_unstable();
    metrics.dedup();

    let mut ranks: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for metric in metrics {
        let mut values: Vec<(&str, f64)> = scores
            .iter()
            .filter_map(|(name, s)| s.get(metric).map(|v| (name.as_str(), *v)))
            .collect();
        if LOWER_IS_BETTER.contains(&metric) {
            values.sort_by(|a, b| a.1.total_cmp(&b.1));
        } else {
            values.sort_by(|a, b| b.1.total_cmp(&a.1));
        }
        for (rank, (name, _)) in values.into_iter().enumerate() {
            ranks.entry(name).or_default().push(rank + 1);
        }
    }

    let mut ranking: Vec<(String, f64)> = ranks
        .into_iter()
        .map(|(name, r)| {
            let mean = r.iter().sum::<usize>() as f64 / r.len() as f64;
            (name.to_string(), mean)
        })
        .collect();
    ranking.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranking
}

/// Unique display names for the structures: the file stem, prefixed with the parent
/// directory when stems collide, and suffixed with the position when that still collides.
fn model_names(paths: &[PathBuf]) -> Vec<String> {
    let stem = |p: &Path| {
        p.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string())
    };
    let mut stem_counts: HashMap<String, usize> = HashMap::new();
    for path in paths {
        *stem_counts.entry(stem(path)).or_default() += 1;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let base = stem(path);
            let mut name = if stem_counts[&base] > 1 {
                match path.parent().and_then(Path::file_name) {
                    Some(parent) => format!("{}_{}", parent.to_string_lossy(), base),
                    None => base,
                }
            } else {
                base
            };
            let count = seen.entry(name.clone()).or_default();
            *count += 1;
            if *count > 1 {
                name = format!("{}_{}", name, i + 1);
            }
            name
        })
        .collect()
}

fn format_ranking(table: &ScoreTable) -> String {
    table
        .models
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{}. {} (avg_rank: {:.2})\n", i + 1, m.name, m.average_rank))
        .collect()
}

/// Model quality assessment with RNAdvisor, one structure at a time.
#[derive(Debug, Clone)]
pub struct RnAdvisor {
    config: RnadvisorConfig,
}

impl RnAdvisor {
    pub fn new(config: RnadvisorConfig) -> Self {
        Self { config }
    }

    fn score_one(&self, request: &ToolRequest, structure: &Path, name: &str) -> Option<BTreeMap<String, f64>> {
        let staging = request.work_dir.join(format!("_stage_{}", name));
        let Some(file_name) = structure.file_name() else {
            warn!("Skipping {}: not a file path", structure.display());
            return None;
        };
        if let Err(e) = fs::create_dir_all(&staging).and_then(|_| fs::copy(structure, staging.join(file_name))) {
            warn!("Cannot stage {} for scoring: {}", structure.display(), e);
            return None;
        }

        let csv_path = request.work_dir.join(format!("scores_{}.csv", name));
        let command = ToolCommand::new(&self.config.binary)
            .arg("--pred_dir")
            .arg(&staging)
            .arg("--scores")
            .arg(self.config.metrics.join(","))
            .arg("--out_path")
            .arg(&csv_path)
            .log_to(request.log_dir.as_deref(), format!("rnadvisor_{}", name));
        let outcome = run_tool("RNAdvisor", command, request.timeout);

        if let Err(e) = fs::remove_dir_all(&staging) {
            debug!("Could not remove {}: {}", staging.display(), e);
        }
        if let Err(failure) = outcome {
            warn!("{}: {}", name, failure.error_message().unwrap_or_default());
            return None;
        }

        match fs::read_to_string(&csv_path) {
            Ok(content) => {
                let scores = parse_scores_csv(&content);
                if scores.is_empty() {
                    warn!("RNAdvisor reported no scores for {}", name);
                    None
                } else {
                    Some(scores)
                }
            }
            Err(e) => {
                warn!("Cannot read {}: {}", csv_path.display(), e);
                None
            }
        }
    }
}

impl Collaborator for RnAdvisor {
    fn name(&self) -> &str {
        "rnadvisor"
    }

    fn available(&self) -> bool {
        on_path(&self.config.binary)
    }

    fn invoke(&self, request: &ToolRequest) -> ToolInvocationResult {
        let start = Instant::now();
        if request.structures.is_empty() {
            return ToolInvocationResult::failure("No structures to score", 0.0);
        }
        if let Err(failure) = ensure_dir(&request.work_dir) {
            return failure;
        }

        let names = model_names(&request.structures);
        let mut scores: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        let mut paths: BTreeMap<&str, &Path> = BTreeMap::new();
        for (structure, name) in request.structures.iter().zip(&names) {
            info!("Scoring {}...", name);
            if let Some(s) = self.score_one(request, structure, name) {
                scores.insert(name.clone(), s);
                paths.insert(name.as_str(), structure.as_path());
            }
        }

        let elapsed = || start.elapsed().as_secs_f64();
        if scores.is_empty() {
            return ToolInvocationResult::failure("RNAdvisor scored no structures", elapsed());
        }

        let table = ScoreTable {
            models: consensus_rank(&scores)
                .into_iter()
                .filter_map(|(name, average_rank)| {
                    let path = paths.get(name.as_str())?.to_path_buf();
                    let model_scores = scores.get(&name)?.clone();
                    Some(ScoredModel {
                        name,
                        path,
                        scores: model_scores,
                        average_rank,
                    })
                })
                .collect(),
        };

        let scores_file = request.work_dir.join(SCORES_FILE_NAME);
        if let Err(e) = write_scores_json(&table, &scores_file) {
            return ToolInvocationResult::failure(e.to_string(), elapsed());
        }
        let ranking_file = request.work_dir.join(RANKING_FILE_NAME);
        if let Err(e) = fs::write(&ranking_file, format_ranking(&table)) {
            return ToolInvocationResult::failure(
                format!("Cannot write {}: {}", ranking_file.display(), e),
                elapsed(),
            );
        }

        let ranking: Vec<String> = table.models.iter().map(|m| m.name.clone()).collect();
        let mut result = ToolInvocationResult::success(elapsed())
            .with_artifact(keys::SCORES_FILE, scores_file)
            .with_artifact(keys::RANKING_FILE, ranking_file)
            .with_metric(keys::RANKING, ranking);
        if let Ok(value) = serde_json::to_value(&scores) {
            result = result.with_metric(keys::SCORES, value);
        }
        if let Some(best) = table.best() {
            info!("Best model: {} (avg_rank {:.2})", best.name, best.average_rank);
            result = result.with_metric(keys::BEST_MODEL, best.name.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table(entries: &[(&str, &[(&str, f64)])]) -> BTreeMap<String, BTreeMap<String, f64>> {
        entries
            .iter()
            .map(|(name, metrics)| {
                (
                    name.to_string(),
                    metrics.iter().map(|(m, v)| (m.to_string(), *v)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn csv_keeps_only_numeric_score_columns() {
        let content = ",name,rsRNASP,MCQ,DFIRE\n0,model_1.pdb,-1234.5,,-80.25\n1,model_2.pdb,1,2,3\n";
        let scores = parse_scores_csv(content);
        assert_eq!(scores.len(), 2);
        assert_eq!(scores["rsRNASP"], -1234.5);
        assert_eq!(scores["DFIRE"], -80.25);
    }

    #[test]
    fn csv_without_rows_is_empty() {
        assert!(parse_scores_csv("name,rsRNASP\n").is_empty());
        assert!(parse_scores_csv("").is_empty());
    }

    #[test]
    fn energies_rank_low_first_and_other_metrics_high_first() {
        let scores = table(&[
            ("a", &[("rsRNASP", -100.0), ("TM-score", 0.9)]),
            ("b", &[("rsRNASP", -300.0), ("TM-score", 0.5)]),
            ("c", &[("rsRNASP", -200.0), ("TM-score", 0.7)]),
        ]);
        let ranking = consensus_rank(&scores);
        // a: ranks 3 and 1, b: 1 and 3, c: 2 and 2
        let names: Vec<&str> = ranking.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(ranking.iter().all(|(_, r)| (*r - 2.0).abs() < 1e-12));
    }

    #[test]
    fn average_uses_only_reported_metrics() {
        let scores = table(&[
            ("a", &[("DFIRE", -10.0)]),
            ("b", &[("DFIRE", -20.0), ("MCQ", 5.0)]),
        ]);
        let ranking = consensus_rank(&scores);
        assert_eq!(ranking[0], ("b".to_string(), 1.0));
        assert_eq!(ranking[1], ("a".to_string(), 2.0));
    }

    #[test]
    fn colliding_stems_use_parent_directory() {
        let paths = vec![
            PathBuf::from("/w/run_0/unrelaxed_model.pdb"),
            PathBuf::from("/w/run_1/unrelaxed_model.pdb"),
            PathBuf::from("/p/q_sample_0.cif"),
        ];
        assert_eq!(
            model_names(&paths),
            vec!["run_0_unrelaxed_model", "run_1_unrelaxed_model", "q_sample_0"]
        );
    }

    #[test]
    fn ranking_file_lists_models_in_order() {
        let table = ScoreTable {
            models: vec![
                ScoredModel {
                    name: "b".into(),
                    path: PathBuf::from("b.pdb"),
                    scores: BTreeMap::new(),
                    average_rank: 1.0,
                },
                ScoredModel {
                    name: "a".into(),
                    path: PathBuf::from("a.pdb"),
                    scores: BTreeMap::new(),
                    average_rank: 1.5,
                },
            ],
        };
        assert_eq!(format_ranking(&table), "1. b (avg_rank: 1.00)\n2. a (avg_rank: 1.50)\n");
    }

    #[test]
    fn score_table_survives_a_round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SCORES_FILE_NAME);
        let table = ScoreTable {
            models: vec![ScoredModel {
                name: "m".into(),
                path: PathBuf::from("/x/m.pdb"),
                scores: BTreeMap::from([("RASP".to_string(), -3.5)]),
                average_rank: 1.0,
            }],
        };
        write_scores_json(&table, &path).unwrap();
        let back = read_scores_json(&path).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.metric_names(), vec!["RASP"]);
        assert!(matches!(
            read_scores_json(&dir.path().join("missing.json")),
            Err(ScoresError::Io { .. })
        ));
    }

    #[test]
    fn nothing_to_score_is_a_failure() {
        let dir = tempdir().unwrap();
        let tool = RnAdvisor::new(RnadvisorConfig::default());
        let request = ToolRequest::new(dir.path().join("q.fasta"), dir.path(), std::time::Duration::from_secs(5));
        let result = tool.invoke(&request);
        assert_eq!(result.error_message(), Some("No structures to score"));
    }
}
