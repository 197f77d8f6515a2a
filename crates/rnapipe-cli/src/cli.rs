use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu",
    version,
    about = "rnapipe CLI - A resumable RNA 3D structure prediction pipeline: Rfam search, secondary structure, multi-predictor 3D modelling, ensemble clustering, and model scoring.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output.
    /// `run` defaults to <OUTPUT_DIR>/logs/rnapipe.log.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full RNA 3D structure prediction pipeline, resuming any previous run in the
    /// output directory.
    Run(RunArgs),
    /// Check that the external tools are installed and configured.
    Check(CheckArgs),
    /// Regenerate the summary report from an existing output directory.
    Report(ReportArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Input FASTA file; the first record is the query sequence.
    #[arg(required = true, value_name = "FASTA")]
    pub input: PathBuf,

    /// Output directory. Re-running with the same directory resumes the pipeline.
    #[arg(short, long = "output-dir", value_name = "PATH", default_value = "./rnapipe_output")]
    pub output: PathBuf,

    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub predictors: PredictorSelection,

    /// Skip the Infernal/Rfam family search.
    #[arg(long)]
    pub skip_infernal: bool,

    /// Also run SPOT-RNA for pseudoknot-aware secondary structure.
    #[arg(long)]
    pub spotrna: bool,

    /// Skip model scoring with RNAdvisor.
    #[arg(long)]
    pub skip_scoring: bool,

    /// Override the number of structures requested from each predictor.
    #[arg(short = 'n', long, value_name = "INT")]
    pub nstruct: Option<usize>,

    /// Compute devices, comma-separated (e.g. cuda:0,cuda:1).
    #[arg(long = "device", value_name = "LIST", value_delimiter = ',')]
    pub devices: Vec<String>,

    /// Disable ensemble clustering, overriding the config file.
    #[arg(long)]
    pub no_cluster: bool,

    /// Override the average-linkage cut height in Ångström.
    #[arg(long, value_name = "FLOAT")]
    pub cluster_cutoff: Option<f64>,

    /// Override the per-invocation tool timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S tools.simrna.replicas=4
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Which 3-D predictors to run. With none selected only the first two stages produce output.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct PredictorSelection {
    /// Run RhoFold+.
    #[arg(long)]
    pub rhofold: bool,
    /// Run SimRNA.
    #[arg(long)]
    pub simrna: bool,
    /// Run Protenix.
    #[arg(long)]
    pub protenix: bool,
    /// Run every predictor.
    #[arg(long = "all")]
    pub all: bool,
}

impl PredictorSelection {
    /// Selected predictor names in execution order.
    pub fn names(&self) -> Vec<String> {
        [
            ("rhofold", self.rhofold),
            ("simrna", self.simrna),
            ("protenix", self.protenix),
        ]
        .into_iter()
        .filter(|(_, selected)| self.all || *selected)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

/// Arguments for the `check` subcommand.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Set a specific configuration value, overriding the config file.
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `report` subcommand.
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Existing pipeline output directory.
    #[arg(required = true, value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,
}
