use super::command::ToolCommand;
use super::{Collaborator, ToolRequest, ensure_dir, on_path, run_tool};
use crate::core::models::result::{ToolInvocationResult, keys};
use crate::engine::config::InfernalConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

pub const ALIGNMENT_FILE_NAME: &str = "alignment.sto";
const TBLOUT_FILE_NAME: &str = "cmscan_tblout.txt";
const OUTPUT_FILE_NAME: &str = "cmscan_output.txt";

/// Column positions in `--fmt 2` tabular output.
const TBLOUT_TARGET_NAME: usize = 1;
const TBLOUT_ACCESSION: usize = 2;
const TBLOUT_EVALUE: usize = 17;

/// The top Rfam hit of a covariance-model scan.
#[derive(Debug, Clone, PartialEq)]
pub struct RfamHit {
    pub family: String,
    pub accession: String,
    pub evalue: f64,
}

/// Rfam family search with Infernal (`cmscan`), followed by alignment of the query to the
/// family model (`cmfetch` + `cmalign`) when a family is found.
#[derive(Debug, Clone)]
pub struct Infernal {
    config: InfernalConfig,
}

impl Infernal {
    pub fn new(config: InfernalConfig) -> Self {
        Self { config }
    }

    fn build_alignment(
        &self,
        family: &str,
        rfam_cm: &Path,
        request: &ToolRequest,
    ) -> Option<PathBuf> {
        let work_dir = &request.work_dir;
        let family_cm = work_dir.join(format!("{}.cm", family));
        let alignment = work_dir.join(ALIGNMENT_FILE_NAME);

        let fetch = ToolCommand::new(&self.config.cmfetch)
            .arg("-o")
            .arg(&family_cm)
            .arg(rfam_cm)
            .arg(family)
            .log_to(request.log_dir.as_deref(), "cmfetch");
        if let Err(failure) = run_tool("cmfetch", fetch, request.timeout) {
            warn!(
                "cmfetch failed for {}: {}",
                family,
                failure.error_message().unwrap_or_default()
            );
            return None;
        }

        let align = ToolCommand::new(&self.config.cmalign)
            .args(["--outformat", "Stockholm", "-o"])
            .arg(&alignment)
            .arg(&family_cm)
            .arg(&request.fasta)
            .log_to(request.log_dir.as_deref(), "cmalign");
        if let Err(failure) = run_tool("cmalign", align, request.timeout) {
            warn!(
                "cmalign failed for {}: {}",
                family,
                failure.error_message().unwrap_or_default()
            );
            return None;
        }

        info!("Built alignment: {}", alignment.display());
        Some(alignment)
    }
}

impl Collaborator for Infernal {
    fn name(&self) -> &str {
        "infernal"
    }

    fn available(&self) -> bool {
        if !on_path(&self.config.cmscan) {
            return false;
        }
        match &self.config.rfam_cm {
            Some(cm) if cm.exists() => true,
            Some(cm) => {
                warn!("Rfam.cm not found at: {}", cm.display());
                false
            }
            None => false,
        }
    }

    fn invoke(&self, request: &ToolRequest) -> ToolInvocationResult {
        let start = Instant::now();
        let Some(rfam_cm) = self.config.rfam_cm.as_deref() else {
            return ToolInvocationResult::failure("No Rfam covariance model configured", 0.0);
        };
        if let Err(failure) = ensure_dir(&request.work_dir) {
            return failure;
        }

        let tblout = request.work_dir.join(TBLOUT_FILE_NAME);
        let output = request.work_dir.join(OUTPUT_FILE_NAME);

        let mut scan = ToolCommand::new(&self.config.cmscan)
            .args(["--cut_ga", "--rfam", "--nohmmonly", "--fmt", "2", "--tblout"])
            .arg(&tblout)
            .arg("-o")
            .arg(&output);
        if let Some(clanin) = self.config.rfam_clanin.as_deref().filter(|p| p.exists()) {
            scan = scan.arg("--clanin").arg(clanin);
        }
        let scan = scan
            .arg(rfam_cm)
            .arg(&request.fasta)
            .log_to(request.log_dir.as_deref(), "cmscan");

        if let Err(failure) = run_tool("cmscan", scan, request.timeout) {
            return failure;
        }

        let hit = fs::read_to_string(&tblout)
            .ok()
            .and_then(|content| parse_tblout(&content));

        let mut result = ToolInvocationResult::success(0.0)
            .with_artifact("tblout", &tblout)
            .with_artifact("cmscan_output", &output);

        match &hit {
            Some(hit) => {
                info!(
                    "Rfam hit: {} ({}, E-value: {:e})",
                    hit.family, hit.accession, hit.evalue
                );
                result = result
                    .with_metric(keys::RFAM_FAMILY, hit.family.as_str())
                    .with_metric(keys::RFAM_ACCESSION, hit.accession.as_str())
                    .with_metric(keys::EVALUE, hit.evalue);
                if let Some(alignment) = self.build_alignment(&hit.family, rfam_cm, request) {
                    result = result.with_artifact(keys::ALIGNMENT, alignment);
                }
            }
            None => {
                info!("No Rfam family match found.");
                result = result
                    .with_metric(keys::RFAM_FAMILY, serde_json::Value::Null)
                    .with_metric(keys::RFAM_ACCESSION, serde_json::Value::Null)
                    .with_metric(keys::EVALUE, serde_json::Value::Null);
            }
        }

        result.with_elapsed(start.elapsed().as_secs_f64())
    }
}

/// Extracts the top hit from `cmscan --fmt 2 --tblout` output.
///
/// Hits are listed best first, so the first non-comment line with a parseable E-value is
/// the top hit.
pub fn parse_tblout(content: &str) -> Option<RfamHit> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|fields| fields.len() > TBLOUT_EVALUE)
        .find_map(|fields| {
            let evalue = fields[TBLOUT_EVALUE].parse::<f64>().ok()?;
            Some(RfamHit {
                family: fields[TBLOUT_TARGET_NAME].to_string(),
                accession: fields[TBLOUT_ACCESSION].to_string(),
                evalue,
            })
        })
}
