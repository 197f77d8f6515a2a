use super::command::ToolCommand;
use super::rhofold::{PLDDT_MEAN, PLDDT_PER_RUN};
use super::{Collaborator, Predictor, ToolRequest, collect_files, ensure_dir, has_extension, on_path, run_tool};
use crate::core::io::fasta;
use crate::core::models::result::{ToolInvocationResult, keys};
use crate::core::models::sequence::FastaRecord;
use crate::engine::config::ProtenixConfig;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

pub const INPUT_FILE_NAME: &str = "input.json";

/// Seed of the first structure in a Protenix batch.
pub const FIRST_SEED: u64 = 42;

/// Summary confidence values copied from the first confidence file, when present.
const SUMMARY_METRICS: [&str; 3] = ["ptm", "iptm", "ranking_score"];

/// Protenix (an open AlphaFold3 reproduction) prediction of a single RNA chain.
#[derive(Debug, Clone)]
pub struct Protenix {
    config: ProtenixConfig,
}

impl Protenix {
    pub fn new(config: ProtenixConfig) -> Self {
        Self { config }
    }
}

/// The job description Protenix reads: one RNA chain, one entry per seed.
pub fn build_input_json(query: &FastaRecord, seeds: &[u64]) -> Value {
    json!([{
        "name": format!("rnapipe_{}", query.id()),
        "modelSeeds": seeds,
        "sequences": [{
            "rnaSequence": {
                "sequence": query.sequence,
                "count": 1
            }
        }]
    }])
}

/// The value for `CUDA_VISIBLE_DEVICES`: the index after the last `:` (`"cuda:2"` → `"2"`),
/// or the whole device string.
pub fn visible_device(device: &str) -> &str {
    device.rsplit(':').next().unwrap_or(device)
}

/// Structures written below `dir`: mmCIF files first, then PDB files, each sorted.
fn collect_structures(dir: &Path) -> Vec<PathBuf> {
    let mut structures = collect_files(dir, None, |p| has_extension(p, "cif"));
    structures.extend(collect_files(dir, None, |p| has_extension(p, "pdb")));
    structures
}

fn collect_confidence(dir: &Path) -> Vec<Value> {
    collect_files(dir, None, |p| {
        has_extension(p, "json")
            && p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains("confidence"))
    })
    .into_iter()
    .filter_map(|path| {
        let parsed = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok());
        if parsed.is_none() {
            debug!("Skipping unreadable confidence file {}", path.display());
        }
        parsed
    })
    .collect()
}

impl Collaborator for Protenix {
    fn name(&self) -> &str {
        "protenix"
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

        let seeds: Vec<u64> = if request.seeds.is_empty() {
            vec![self.seed_offset()]
        } else {
            request.seeds.clone()
        };
        let input_json = request.work_dir.join(INPUT_FILE_NAME);
        let written = serde_json::to_string_pretty(&build_input_json(&query, &seeds))
            .map_err(|e| e.to_string())
            .and_then(|text| fs::write(&input_json, text).map_err(|e| e.to_string()));
        if let Err(e) = written {
            return ToolInvocationResult::failure(
                format!("Cannot write {}: {}", input_json.display(), e),
                0.0,
            );
        }

        let mut command = ToolCommand::new(&self.config.binary)
            .args(["pred", "-i"])
            .arg(&input_json)
            .arg("-o")
            .arg(&request.work_dir);
        if let Some(model) = &self.config.model {
            command = command.arg("-n").arg(model);
        }
        let mut log_stem = "protenix".to_string();
        if let Some(device) = &request.device {
            command = command.env("CUDA_VISIBLE_DEVICES", visible_device(device));
            log_stem = format!("protenix_{}", device.replace(':', "_"));
        }
        info!("Running Protenix (seeds {:?})...", seeds);
        let command = command.log_to(request.log_dir.as_deref(), log_stem);
        if let Err(failure) = run_tool("Protenix", command, request.timeout) {
            return failure;
        }

        let elapsed = start.elapsed().as_secs_f64();
        let structures = collect_structures(&request.work_dir);
        if structures.is_empty() {
            return ToolInvocationResult::failure("Protenix produced no structures", elapsed);
        }

        let confidence = collect_confidence(&request.work_dir);
        let plddt: Vec<f64> = confidence
            .iter()
            .filter_map(|c| c.get("plddt").and_then(Value::as_f64))
            .collect();

        let mut result = ToolInvocationResult::success(elapsed).with_artifact("input_json", &input_json);
        if !plddt.is_empty() {
            let mean = plddt.iter().sum::<f64>() / plddt.len() as f64;
            result = result
                .with_metric(PLDDT_MEAN, mean)
                .with_metric(PLDDT_PER_RUN, plddt);
        }
        if let Some(first) = confidence.first() {
            for key in SUMMARY_METRICS {
                if let Some(value) = first.get(key).filter(|v| v.is_number()) {
                    result = result.with_metric(key, value.clone());
                }
            }
        }
        result.with_artifacts(keys::STRUCTURES, structures)
    }
}

impl Predictor for Protenix {
    fn seed_offset(&self) -> u64 {
        FIRST_SEED
    }

    fn supports_devices(&self) -> bool {
        true
    }
}
