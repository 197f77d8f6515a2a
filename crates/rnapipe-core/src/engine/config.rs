use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// How backbone atoms of two structures are paired before superposition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentMode {
    /// Pair atoms by their position in the file, truncated to the shorter structure.
    #[default]
    Positional,
    /// Pair atoms by chain, residue number, insertion code, and atom name.
    Residue,
}

impl FromStr for AlignmentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "positional" => Ok(Self::Positional),
            "residue" => Ok(Self::Residue),
            other => Err(ConfigError::InvalidParameter {
                name: "alignment",
                reason: format!("expected 'positional' or 'residue', got '{}'", other),
            }),
        }
    }
}

impl fmt::Display for AlignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positional => f.write_str("positional"),
            Self::Residue => f.write_str("residue"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfernalConfig {
    pub cmscan: String,
    pub cmfetch: String,
    pub cmalign: String,
    pub rfam_cm: Option<PathBuf>,
    pub rfam_clanin: Option<PathBuf>,
}

impl Default for InfernalConfig {
    fn default() -> Self {
        Self {
            cmscan: "cmscan".to_string(),
            cmfetch: "cmfetch".to_string(),
            cmalign: "cmalign".to_string(),
            rfam_cm: None,
            rfam_clanin: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RnafoldConfig {
    pub binary: String,
}

impl Default for RnafoldConfig {
    fn default() -> Self {
        Self {
            binary: "RNAfold".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotRnaConfig {
    pub script: Option<PathBuf>,
    pub python: String,
}

impl Default for SpotRnaConfig {
    fn default() -> Self {
        Self {
            script: None,
            python: "python".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RhofoldConfig {
    /// Batch inference script that loads the model once and runs every requested seed.
    pub script: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    /// Device used when the pipeline does not assign one.
    pub device: Option<String>,
    pub python: String,
}

impl Default for RhofoldConfig {
    fn default() -> Self {
        Self {
            script: None,
            model_dir: None,
            device: Some("cuda:0".to_string()),
            python: "python".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtenixConfig {
    pub binary: String,
    pub model: Option<String>,
}

impl Default for ProtenixConfig {
    fn default() -> Self {
        Self {
            binary: "protenix".to_string(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimrnaConfig {
    pub binary: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub replicas: u32,
    pub steps: u64,
    pub clustering_top_n: usize,
    pub trafl2pdbs: String,
}

impl Default for SimrnaConfig {
    fn default() -> Self {
        Self {
            binary: None,
            data_dir: None,
            replicas: 10,
            steps: 10_000_000,
            clustering_top_n: 5,
            trafl2pdbs: "SimRNA_trafl2pdbs".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RnadvisorConfig {
    pub binary: String,
    pub metrics: Vec<String>,
}

impl Default for RnadvisorConfig {
    fn default() -> Self {
        Self {
            binary: "rnadvisor".to_string(),
            metrics: ["rsRNASP", "DFIRE", "RASP", "MCQ"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolsConfig {
    pub infernal: InfernalConfig,
    pub rnafold: RnafoldConfig,
    pub spotrna: SpotRnaConfig,
    pub rhofold: RhofoldConfig,
    pub protenix: ProtenixConfig,
    pub simrna: SimrnaConfig,
    pub rnadvisor: RnadvisorConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleConfig {
    /// Structures requested from each predictor.
    pub nstruct: usize,
    /// Whether the clustering stage runs at all.
    pub cluster: bool,
    /// Average-linkage cut height in Ångström.
    pub cluster_cutoff: f64,
    pub alignment: AlignmentMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub devices: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub tools: ToolsConfig,
    pub ensemble: EnsembleConfig,
    pub execution: ExecutionConfig,
}

#[derive(Default)]
pub struct PipelineConfigBuilder {
    tools: Option<ToolsConfig>,
    nstruct: Option<usize>,
    cluster: Option<bool>,
    cluster_cutoff: Option<f64>,
    alignment: Option<AlignmentMode>,
    devices: Option<Vec<String>>,
    timeout: Option<Duration>,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tools(mut self, tools: ToolsConfig) -> Self {
        self.tools = Some(tools);
        self
    }
    pub fn nstruct(mut self, n: usize) -> Self {
        self.nstruct = Some(n);
        self
    }
    pub fn cluster(mut self, enabled: bool) -> Self {
        self.cluster = Some(enabled);
        self
    }
    pub fn cluster_cutoff(mut self, cutoff: f64) -> Self {
        self.cluster_cutoff = Some(cutoff);
        self
    }
    pub fn alignment(mut self, mode: AlignmentMode) -> Self {
        self.alignment = Some(mode);
        self
    }
    pub fn devices(mut self, devices: Vec<String>) -> Self {
        self.devices = Some(devices);
        self
    }
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let nstruct = self
            .nstruct
            .ok_or(ConfigError::MissingParameter("nstruct"))?;
        if nstruct == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "nstruct",
                reason: "must be at least 1".to_string(),
            });
        }

        let cluster_cutoff = self
            .cluster_cutoff
            .ok_or(ConfigError::MissingParameter("cluster_cutoff"))?;
        if cluster_cutoff.is_nan() || cluster_cutoff < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "cluster_cutoff",
                reason: format!("must be a non-negative distance, got {}", cluster_cutoff),
            });
        }

        let timeout = self
            .timeout
            .ok_or(ConfigError::MissingParameter("timeout"))?;
        if timeout.is_zero() {
            return Err(ConfigError::InvalidParameter {
                name: "timeout",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(PipelineConfig {
            tools: self.tools.unwrap_or_default(),
            ensemble: EnsembleConfig {
                nstruct,
                cluster: self.cluster.unwrap_or(true),
                cluster_cutoff,
                alignment: self.alignment.unwrap_or_default(),
            },
            execution: ExecutionConfig {
                devices: self.devices.unwrap_or_default(),
                timeout,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
            .nstruct(5)
            .cluster_cutoff(5.0)
            .timeout(Duration::from_secs(60))
    }

    #[test]
    fn build_succeeds_with_required_parameters() {
        let config = complete_builder().build().unwrap();
        assert_eq!(config.ensemble.nstruct, 5);
        assert!(config.ensemble.cluster);
        assert_eq!(config.ensemble.alignment, AlignmentMode::Positional);
        assert!(config.execution.devices.is_empty());
        assert_eq!(config.tools.rnafold.binary, "RNAfold");
    }

    #[test]
    fn build_fails_if_nstruct_is_missing() {
        let result = PipelineConfigBuilder::new()
            .cluster_cutoff(5.0)
            .timeout(Duration::from_secs(1))
            .build();
        assert_eq!(result.unwrap_err(), ConfigError::MissingParameter("nstruct"));
    }

    #[test]
    fn build_rejects_zero_nstruct_and_negative_cutoff() {
        assert!(matches!(
            complete_builder().nstruct(0).build(),
            Err(ConfigError::InvalidParameter { name: "nstruct", .. })
        ));
        assert!(matches!(
            complete_builder().cluster_cutoff(-1.0).build(),
            Err(ConfigError::InvalidParameter { name: "cluster_cutoff", .. })
        ));
    }

    #[test]
    fn infinite_cutoff_is_accepted() {
        let config = complete_builder().cluster_cutoff(f64::INFINITY).build().unwrap();
        assert!(config.ensemble.cluster_cutoff.is_infinite());
    }

    #[test]
    fn alignment_mode_parses_case_insensitively() {
        assert_eq!("Residue".parse::<AlignmentMode>().unwrap(), AlignmentMode::Residue);
        assert_eq!("positional".parse::<AlignmentMode>().unwrap(), AlignmentMode::Positional);
        assert!("kabsch".parse::<AlignmentMode>().is_err());
    }

    #[test]
    fn rnadvisor_defaults_to_four_metrics() {
        let tools = ToolsConfig::default();
        assert_eq!(tools.rnadvisor.metrics, vec!["rsRNASP", "DFIRE", "RASP", "MCQ"]);
        assert_eq!(tools.simrna.replicas, 10);
    }
}
