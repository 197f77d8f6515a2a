use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileInfernalConfig {
    pub cmscan: Option<String>,
    pub cmfetch: Option<String>,
    pub cmalign: Option<String>,
    pub rfam_cm: Option<PathBuf>,
    pub rfam_clanin: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileRnafoldConfig {
    pub binary: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileSpotRnaConfig {
    pub script: Option<PathBuf>,
    pub python: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileRhofoldConfig {
    pub script: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub device: Option<String>,
    pub python: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileProtenixConfig {
    pub binary: Option<String>,
    pub model: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileSimrnaConfig {
    pub binary: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub replicas: Option<u32>,
    pub steps: Option<u64>,
    pub clustering_top_n: Option<usize>,
    pub trafl2pdbs: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileRnadvisorConfig {
    pub binary: Option<String>,
    pub metrics: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileToolsConfig {
    pub infernal: Option<FileInfernalConfig>,
    pub rnafold: Option<FileRnafoldConfig>,
    pub spotrna: Option<FileSpotRnaConfig>,
    pub rhofold: Option<FileRhofoldConfig>,
    pub protenix: Option<FileProtenixConfig>,
    pub simrna: Option<FileSimrnaConfig>,
    pub rnadvisor: Option<FileRnadvisorConfig>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileEnsembleConfig {
    pub nstruct: Option<usize>,
    pub cluster: Option<bool>,
    pub cluster_cutoff: Option<f64>,
    pub alignment: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileExecutionConfig {
    pub devices: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
}

/// The TOML configuration file. Every key is optional; missing values fall back to the
/// defaults.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub tools: Option<FileToolsConfig>,
    pub ensemble: Option<FileEnsembleConfig>,
    pub execution: Option<FileExecutionConfig>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parses_nested_kebab_case_sections() {
        let config = FileConfig::from_toml(
            r#"
            [tools.infernal]
            rfam-cm = "/db/Rfam.cm"
            rfam-clanin = "/db/Rfam.clanin"

            [tools.simrna]
            binary = "/opt/simrna/SimRNA"
            clustering-top-n = 3

            [tools.rnadvisor]
            metrics = ["rsRNASP", "MCQ"]

            [ensemble]
            nstruct = 10
            cluster-cutoff = 4.5
            alignment = "residue"

            [execution]
            devices = ["cuda:0", "cuda:1"]
            timeout-secs = 3600
            "#,
        )
        .unwrap();

        let tools = config.tools.unwrap();
        assert_eq!(
            tools.infernal.unwrap().rfam_cm,
            Some(PathBuf::from("/db/Rfam.cm"))
        );
        assert_eq!(tools.simrna.unwrap().clustering_top_n, Some(3));
        assert_eq!(
            tools.rnadvisor.unwrap().metrics,
            Some(vec!["rsRNASP".to_string(), "MCQ".to_string()])
        );
        let ensemble = config.ensemble.unwrap();
        assert_eq!(ensemble.nstruct, Some(10));
        assert_eq!(ensemble.alignment.as_deref(), Some("residue"));
        assert_eq!(config.execution.unwrap().timeout_secs, Some(3600));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FileConfig::from_toml("[ensemble]\nn-struct = 3\n").is_err());
        assert!(FileConfig::from_toml("[tools.alphafold]\nbinary = \"af3\"\n").is_err());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(FileConfig::from_toml("").unwrap(), FileConfig::default());
    }

    #[test]
    fn from_file_reports_the_offending_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[ensemble\n").unwrap();
        match FileConfig::from_file(&path) {
            Err(CliError::FileParsing { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected a parsing error, got {:?}", other),
        }
    }
}
