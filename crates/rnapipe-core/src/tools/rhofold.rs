use super::command::ToolCommand;
use super::{Collaborator, Predictor, ToolRequest, ensure_dir, run_tool};
use crate::core::io::structure;
use crate::core::models::result::{ToolInvocationResult, keys};
use crate::engine::config::RhofoldConfig;
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const MODEL_FILE_NAME: &str = "unrelaxed_model.pdb";
pub const PLDDT_PER_RUN: &str = "plddt_per_run";
pub const PLDDT_MEAN: &str = "plddt_mean";

/// Where the batch script writes the structure for `seed`.
pub fn model_path(base: &Path, seed: u64) -> PathBuf {
    base.join(format!("run_{}", seed)).join(MODEL_FILE_NAME)
}

/// RhoFold+ deep-learning prediction through a batch script that loads the model once and
/// predicts one structure per seed.
#[derive(Debug, Clone)]
pub struct RhoFold {
    config: RhofoldConfig,
}

impl RhoFold {
    pub fn new(config: RhofoldConfig) -> Self {
        Self { config }
    }

    fn command(&self, script: &Path, request: &ToolRequest, seeds: &[u64]) -> ToolCommand {
        let mut command = ToolCommand::new(&self.config.python)
            .arg(script)
            .arg("--input_fas")
            .arg(&request.fasta)
            .arg("--seeds")
            .arg(seeds.iter().join(","))
            .arg("--output_base_dir")
            .arg(&request.work_dir)
            .args(["--single_seq_pred", "True"]);
        if let Some(model_dir) = &self.config.model_dir {
            command = command.arg("--ckpt").arg(model_dir);
        }
        if let Some(device) = request.device.as_ref().or(self.config.device.as_ref()) {
            command = command.arg("--device").arg(device);
        }
        if let Some(alignment) = request.alignment.as_deref().filter(|p| p.exists()) {
            command = command.arg("--input_a3m").arg(alignment);
        }
        command
    }
}

impl Collaborator for RhoFold {
    fn name(&self) -> &str {
        "rhofold"
    }

    fn available(&self) -> bool {
        self.config.script.as_deref().is_some_and(|s| s.exists())
    }

    fn invoke(&self, request: &ToolRequest) -> ToolInvocationResult {
        let start = Instant::now();
        let Some(script) = self.config.script.as_deref() else {
            return ToolInvocationResult::failure("No RhoFold+ script configured", 0.0);
        };
        if let Err(failure) = ensure_dir(&request.work_dir) {
            return failure;
        }

        let seeds: Vec<u64> = if request.seeds.is_empty() {
            vec![self.seed_offset()]
        } else {
            request.seeds.clone()
        };
        info!(
            "Running RhoFold+ batch (seeds {:?}) on {}...",
            seeds,
            request
                .device
                .as_deref()
                .or(self.config.device.as_deref())
                .unwrap_or("default device")
        );

        let log_stem = match &request.device {
            Some(device) => format!("rhofold_{}", device.replace(':', "_")),
            None => "rhofold".to_string(),
        };
        let command = self
            .command(script, request, &seeds)
            .log_to(request.log_dir.as_deref(), log_stem);
        if let Err(failure) = run_tool("RhoFold+", command, request.timeout) {
            return failure;
        }

        let (models, missing): (Vec<PathBuf>, Vec<u64>) = seeds.iter().fold(
            (Vec::new(), Vec::new()),
            |(mut found, mut missing), &seed| {
                let path = model_path(&request.work_dir, seed);
                if path.exists() {
                    found.push(path);
                } else {
                    missing.push(seed);
                }
                (found, missing)
            },
        );
        if !missing.is_empty() {
            warn!("RhoFold+ produced no structure for seeds {:?}", missing);
        }
        if models.is_empty() {
            return ToolInvocationResult::failure(
                "RhoFold+ produced no structures",
                start.elapsed().as_secs_f64(),
            );
        }

        // The exported PDB carries per-residue pLDDT in the B-factor column.
        let plddt: Vec<f64> = models
            .iter()
            .filter_map(|path| match structure::read_mean_b_factor(path) {
                Ok(value) => value,
                Err(e) => {
                    debug!("Could not read pLDDT from {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        let mut result = ToolInvocationResult::success(start.elapsed().as_secs_f64());
        if !plddt.is_empty() {
            let mean = plddt.iter().sum::<f64>() / plddt.len() as f64;
            result = result
                .with_metric(PLDDT_MEAN, mean)
                .with_metric(PLDDT_PER_RUN, plddt);
        }
        result.with_artifacts(keys::STRUCTURES, models)
    }
}

impl Predictor for RhoFold {
    fn supports_devices(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn configured() -> RhoFold {
        RhoFold::new(RhofoldConfig {
            script: Some(PathBuf::from("/opt/rhofold/batch.py")),
            model_dir: Some(PathBuf::from("/opt/rhofold/params.pt")),
            device: Some("cuda:0".to_string()),
            python: "python3".to_string(),
        })
    }

    fn args(command: &ToolCommand) -> Vec<String> {
        command
            .display()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn batch_command_lists_seeds_and_device() {
        let request = ToolRequest::new("/out/input/query.fasta", "/out/03_3d_prediction/rhofold/gpu_1", Duration::from_secs(60))
            .with_device(Some("cuda:1".to_string()));
        let tool = configured();
        let argv = args(&tool.command(Path::new("/opt/rhofold/batch.py"), &request, &[1, 3, 5]));

        assert_eq!(argv[0], "python3");
        let seeds_at = argv.iter().position(|a| a == "--seeds").unwrap();
        assert_eq!(argv[seeds_at + 1], "1,3,5");
        let device_at = argv.iter().position(|a| a == "--device").unwrap();
        assert_eq!(argv[device_at + 1], "cuda:1");
        assert!(argv.contains(&"--ckpt".to_string()));
        assert!(!argv.contains(&"--input_a3m".to_string()));
    }

    #[test]
    fn falls_back_to_configured_device() {
        let request = ToolRequest::new("/q.fasta", "/w", Duration::from_secs(60));
        let argv = args(&configured().command(Path::new("/s.py"), &request, &[0]));
        let device_at = argv.iter().position(|a| a == "--device").unwrap();
        assert_eq!(argv[device_at + 1], "cuda:0");
    }

    #[test]
    fn model_paths_follow_run_directories() {
        assert_eq!(
            model_path(Path::new("/w"), 7),
            PathBuf::from("/w/run_7/unrelaxed_model.pdb")
        );
    }

    #[test]
    fn is_a_device_aware_predictor_starting_at_seed_zero() {
        let tool = configured();
        assert!(tool.supports_devices());
        assert_eq!(tool.seed_offset(), 0);
        assert!(!tool.available());
    }
}
