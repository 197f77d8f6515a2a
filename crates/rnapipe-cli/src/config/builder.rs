use super::defaults::DefaultsConfig;
use super::file::{FileConfig, FileEnsembleConfig, FileExecutionConfig, FileToolsConfig};
use super::models::AppConfig;
use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use rnapipe::engine::config::{self as core_config, AlignmentMode, PipelineConfigBuilder};
use rnapipe::workflows::pipeline::RunOptions;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Values given directly on the command line; they win over the config file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CliOverrides {
    pub nstruct: Option<usize>,
    pub no_cluster: bool,
    pub cluster_cutoff: Option<f64>,
    pub devices: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl From<&RunArgs> for CliOverrides {
    fn from(args: &RunArgs) -> Self {
        Self {
            nstruct: args.nstruct,
            no_cluster: args.no_cluster,
            cluster_cutoff: args.cluster_cutoff,
            devices: args.devices.clone(),
            timeout_secs: args.timeout,
        }
    }
}

pub fn build_config(args: &RunArgs) -> Result<AppConfig> {
    let file_config = load_file_config(args.config.as_deref(), &args.set_values)?;
    let core_config = merge(file_config, &CliOverrides::from(args))?;

    let options = RunOptions {
        predictors: args.predictors.names(),
        skip_sequence_search: args.skip_infernal,
        run_pseudoknot: args.spotrna,
        skip_scoring: args.skip_scoring,
    };

    Ok(AppConfig {
        input_path: args.input.clone(),
        output_dir: args.output.clone(),
        options,
        core_config,
    })
}

/// Tool settings only, for commands that never run the pipeline.
pub fn build_tools_config(
    config_path: Option<&Path>,
    set_values: &[String],
) -> Result<core_config::ToolsConfig> {
    let file_config = load_file_config(config_path, set_values)?;
    Ok(merge_tools(file_config.tools))
}

fn load_file_config(config_path: Option<&Path>, set_values: &[String]) -> Result<FileConfig> {
    let file_config = match config_path {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    apply_set_values(file_config, set_values)
}

/// Merges CLI overrides, the config file, and the defaults, in that order of precedence.
pub fn merge(file_config: FileConfig, cli: &CliOverrides) -> Result<core_config::PipelineConfig> {
    let defaults = DefaultsConfig::default();
    let ensemble = file_config.ensemble.unwrap_or_default();
    let execution = file_config.execution.unwrap_or_default();

    let nstruct = cli
        .nstruct
        .or(ensemble.nstruct)
        .unwrap_or(defaults.nstruct);
    let cluster = !cli.no_cluster && ensemble.cluster.unwrap_or(defaults.cluster);
    let cluster_cutoff = cli
        .cluster_cutoff
        .or(ensemble.cluster_cutoff)
        .unwrap_or(defaults.cluster_cutoff);
    let alignment = AlignmentMode::from_str(
        ensemble
            .alignment
            .as_deref()
            .unwrap_or(&defaults.alignment),
    )
    .map_err(|e| CliError::Config(e.to_string()))?;

    let requested = if cli.devices.is_empty() {
        execution.devices.unwrap_or_default()
    } else {
        cli.devices.clone()
    };
    let devices: Vec<String> = requested
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(String::from)
        .collect();

    let timeout_secs = cli
        .timeout_secs
        .or(execution.timeout_secs)
        .unwrap_or(defaults.timeout_secs);

    PipelineConfigBuilder::new()
        .tools(merge_tools(file_config.tools))
        .nstruct(nstruct)
        .cluster(cluster)
        .cluster_cutoff(cluster_cutoff)
        .alignment(alignment)
        .devices(devices)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CliError::Config(e.to_string()))
}

fn merge_tools(file_val: Option<FileToolsConfig>) -> core_config::ToolsConfig {
    let file_val = file_val.unwrap_or_default();
    let mut tools = core_config::ToolsConfig::default();

    if let Some(p) = file_val.infernal {
        let t = &mut tools.infernal;
        overwrite(&mut t.cmscan, p.cmscan);
        overwrite(&mut t.cmfetch, p.cmfetch);
        overwrite(&mut t.cmalign, p.cmalign);
        overwrite_optional(&mut t.rfam_cm, p.rfam_cm);
        overwrite_optional(&mut t.rfam_clanin, p.rfam_clanin);
    }
    if let Some(p) = file_val.rnafold {
        overwrite(&mut tools.rnafold.binary, p.binary);
    }
    if let Some(p) = file_val.spotrna {
        overwrite_optional(&mut tools.spotrna.script, p.script);
        overwrite(&mut tools.spotrna.python, p.python);
    }
    if let Some(p) = file_val.rhofold {
        let t = &mut tools.rhofold;
        overwrite_optional(&mut t.script, p.script);
        overwrite_optional(&mut t.model_dir, p.model_dir);
        overwrite_optional(&mut t.device, p.device);
        overwrite(&mut t.python, p.python);
    }
    if let Some(p) = file_val.protenix {
        overwrite(&mut tools.protenix.binary, p.binary);
        overwrite_optional(&mut tools.protenix.model, p.model);
    }
    if let Some(p) = file_val.simrna {
        let t = &mut tools.simrna;
        overwrite_optional(&mut t.binary, p.binary);
        overwrite_optional(&mut t.data_dir, p.data_dir);
        overwrite(&mut t.replicas, p.replicas);
        overwrite(&mut t.steps, p.steps);
        overwrite(&mut t.clustering_top_n, p.clustering_top_n);
        overwrite(&mut t.trafl2pdbs, p.trafl2pdbs);
    }
    if let Some(p) = file_val.rnadvisor {
        overwrite(&mut tools.rnadvisor.binary, p.binary);
        overwrite(&mut tools.rnadvisor.metrics, p.metrics);
    }
    tools
}

fn overwrite<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn overwrite_optional<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value))
    })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn tools(config: &mut FileConfig) -> &mut FileToolsConfig {
    config.tools.get_or_insert_with(Default::default)
}

fn ensemble(config: &mut FileConfig) -> &mut FileEnsembleConfig {
    config.ensemble.get_or_insert_with(Default::default)
}

fn execution(config: &mut FileConfig) -> &mut FileExecutionConfig {
    config.execution.get_or_insert_with(Default::default)
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };
        let key = key.trim();
        let text = Some(value.to_string());

        match key {
            "tools.infernal.cmscan" => {
                tools(&mut config).infernal.get_or_insert_with(Default::default).cmscan = text
            }
            "tools.infernal.cmfetch" => {
                tools(&mut config).infernal.get_or_insert_with(Default::default).cmfetch = text
            }
            "tools.infernal.cmalign" => {
                tools(&mut config).infernal.get_or_insert_with(Default::default).cmalign = text
            }
            "tools.infernal.rfam-cm" => {
                tools(&mut config).infernal.get_or_insert_with(Default::default).rfam_cm =
                    Some(value.into())
            }
            "tools.infernal.rfam-clanin" => {
                tools(&mut config).infernal.get_or_insert_with(Default::default).rfam_clanin =
                    Some(value.into())
            }
            "tools.rnafold.binary" => {
                tools(&mut config).rnafold.get_or_insert_with(Default::default).binary = text
            }
            "tools.spotrna.script" => {
                tools(&mut config).spotrna.get_or_insert_with(Default::default).script =
                    Some(value.into())
            }
            "tools.spotrna.python" => {
                tools(&mut config).spotrna.get_or_insert_with(Default::default).python = text
            }
            "tools.rhofold.script" => {
                tools(&mut config).rhofold.get_or_insert_with(Default::default).script =
                    Some(value.into())
            }
            "tools.rhofold.model-dir" => {
                tools(&mut config).rhofold.get_or_insert_with(Default::default).model_dir =
                    Some(value.into())
            }
            "tools.rhofold.device" => {
                tools(&mut config).rhofold.get_or_insert_with(Default::default).device = text
            }
            "tools.rhofold.python" => {
                tools(&mut config).rhofold.get_or_insert_with(Default::default).python = text
            }
            "tools.protenix.binary" => {
                tools(&mut config).protenix.get_or_insert_with(Default::default).binary = text
            }
            "tools.protenix.model" => {
                tools(&mut config).protenix.get_or_insert_with(Default::default).model = text
            }
            "tools.simrna.binary" => {
                tools(&mut config).simrna.get_or_insert_with(Default::default).binary = text
            }
            "tools.simrna.data-dir" => {
                tools(&mut config).simrna.get_or_insert_with(Default::default).data_dir =
                    Some(value.into())
            }
            "tools.simrna.replicas" => {
                tools(&mut config).simrna.get_or_insert_with(Default::default).replicas =
                    Some(parse_value(key, value, "integer")?)
            }
            "tools.simrna.steps" => {
                tools(&mut config).simrna.get_or_insert_with(Default::default).steps =
                    Some(parse_value(key, value, "integer")?)
            }
            "tools.simrna.clustering-top-n" => {
                tools(&mut config)
                    .simrna
                    .get_or_insert_with(Default::default)
                    .clustering_top_n = Some(parse_value(key, value, "integer")?)
            }
            "tools.simrna.trafl2pdbs" => {
                tools(&mut config).simrna.get_or_insert_with(Default::default).trafl2pdbs = text
            }
            "tools.rnadvisor.binary" => {
                tools(&mut config).rnadvisor.get_or_insert_with(Default::default).binary = text
            }
            "tools.rnadvisor.metrics" => {
                tools(&mut config).rnadvisor.get_or_insert_with(Default::default).metrics =
                    Some(parse_list(value))
            }
            "ensemble.nstruct" => {
                ensemble(&mut config).nstruct = Some(parse_value(key, value, "integer")?)
            }
            "ensemble.cluster" => {
                ensemble(&mut config).cluster = Some(parse_value(key, value, "boolean")?)
            }
            "ensemble.cluster-cutoff" => {
                ensemble(&mut config).cluster_cutoff = Some(parse_value(key, value, "float")?)
            }
            "ensemble.alignment" => ensemble(&mut config).alignment = text,
            "execution.devices" => execution(&mut config).devices = Some(parse_list(value)),
            "execution.timeout-secs" => {
                execution(&mut config).timeout_secs = Some(parse_value(key, value, "integer")?)
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::PredictorSelection;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn base_run_args() -> RunArgs {
        RunArgs {
            input: PathBuf::from("query.fa"),
            output: PathBuf::from("out"),
            config: None,
            predictors: PredictorSelection::default(),
            skip_infernal: false,
            spotrna: false,
            skip_scoring: false,
            nstruct: None,
            devices: vec![],
            no_cluster: false,
            cluster_cutoff: None,
            timeout: None,
            set_values: vec![],
        }
    }

    #[test]
    fn build_config_uses_defaults_without_file() {
        let app = build_config(&base_run_args()).expect("build ok");
        let cfg = app.core_config;
        let defaults = DefaultsConfig::default();

        assert_eq!(cfg.ensemble.nstruct, defaults.nstruct);
        assert!(cfg.ensemble.cluster);
        assert_eq!(cfg.ensemble.cluster_cutoff, defaults.cluster_cutoff);
        assert_eq!(cfg.ensemble.alignment, AlignmentMode::Positional);
        assert_eq!(cfg.execution.timeout, Duration::from_secs(defaults.timeout_secs));
        assert!(cfg.execution.devices.is_empty());
        assert_eq!(cfg.tools, core_config::ToolsConfig::default());
        assert!(app.options.predictors.is_empty());
        assert_eq!(app.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn build_config_reads_file_and_cli_wins() {
        let dir = tempdir().unwrap();
        let cfg_path = dir.path().join("rnapipe.toml");
        fs::write(
            &cfg_path,
            r#"
            [tools.rhofold]
            script = "/opt/rhofold/batch.py"
            model-dir = "/opt/rhofold/pretrained"

            [tools.simrna]
            replicas = 4

            [ensemble]
            nstruct = 5
            cluster-cutoff = 3.0
            alignment = "residue"

            [execution]
            devices = ["cuda:0"]
            timeout-secs = 600
            "#,
        )
        .unwrap();

        let mut args = base_run_args();
        args.config = Some(cfg_path);
        args.nstruct = Some(20);
        args.devices = vec!["cuda:0".into(), "cuda:1".into()];
        args.predictors.rhofold = true;
        args.skip_infernal = true;

        let app = build_config(&args).expect("build ok");
        let cfg = app.core_config;
        assert_eq!(cfg.ensemble.nstruct, 20);
        assert_eq!(cfg.ensemble.cluster_cutoff, 3.0);
        assert_eq!(cfg.ensemble.alignment, AlignmentMode::Residue);
        assert_eq!(cfg.execution.devices, vec!["cuda:0", "cuda:1"]);
        assert_eq!(cfg.execution.timeout, Duration::from_secs(600));
        assert_eq!(
            cfg.tools.rhofold.script,
            Some(PathBuf::from("/opt/rhofold/batch.py"))
        );
        assert_eq!(cfg.tools.rhofold.device.as_deref(), Some("cuda:0"));
        assert_eq!(cfg.tools.simrna.replicas, 4);
        assert_eq!(cfg.tools.simrna.steps, core_config::SimrnaConfig::default().steps);
        assert_eq!(app.options.predictors, vec!["rhofold"]);
        assert!(app.options.skip_sequence_search);
    }

    #[test]
    fn no_cluster_flag_overrides_file() {
        let file = FileConfig::from_toml("[ensemble]\ncluster = true\n").unwrap();
        let cli = CliOverrides {
            no_cluster: true,
            ..Default::default()
        };
        assert!(!merge(file, &cli).unwrap().ensemble.cluster);
    }

    #[test]
    fn set_values_override_file_values() {
        let file = FileConfig::from_toml("[ensemble]\nnstruct = 2\n").unwrap();
        let file = apply_set_values(
            file,
            &[
                "ensemble.nstruct=7".to_string(),
                "tools.rnadvisor.metrics=rsRNASP, MCQ".to_string(),
                "execution.devices=cuda:2,cuda:3".to_string(),
                "tools.infernal.rfam-cm=/db/Rfam.cm".to_string(),
            ],
        )
        .unwrap();

        let cfg = merge(file, &CliOverrides::default()).unwrap();
        assert_eq!(cfg.ensemble.nstruct, 7);
        assert_eq!(cfg.tools.rnadvisor.metrics, vec!["rsRNASP", "MCQ"]);
        assert_eq!(cfg.execution.devices, vec!["cuda:2", "cuda:3"]);
        assert_eq!(cfg.tools.infernal.rfam_cm, Some(PathBuf::from("/db/Rfam.cm")));
    }

    #[test]
    fn set_values_reject_bad_input() {
        let bad_format = apply_set_values(FileConfig::default(), &["ensemble.nstruct".into()]);
        assert!(matches!(bad_format, Err(CliError::Config(_))));

        let bad_key = apply_set_values(FileConfig::default(), &["ensemble.size=3".into()]);
        assert!(matches!(bad_key, Err(CliError::Config(msg)) if msg.contains("ensemble.size")));

        let bad_value = apply_set_values(FileConfig::default(), &["ensemble.cluster-cutoff=wide".into()]);
        assert!(matches!(bad_value, Err(CliError::Config(msg)) if msg.contains("float")));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let zero = CliOverrides {
            nstruct: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            merge(FileConfig::default(), &zero),
            Err(CliError::Config(_))
        ));

        let file = FileConfig::from_toml("[ensemble]\nalignment = \"kabsch\"\n").unwrap();
        assert!(matches!(
            merge(file, &CliOverrides::default()),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn tools_config_for_check_applies_overrides() {
        let tools = build_tools_config(None, &["tools.rnafold.binary=/opt/vienna/RNAfold".into()]).unwrap();
        assert_eq!(tools.rnafold.binary, "/opt/vienna/RNAfold");
        assert_eq!(tools.infernal, core_config::InfernalConfig::default());
    }
}
