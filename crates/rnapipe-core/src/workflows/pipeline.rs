use super::layout::OutputLayout;
use super::{report, resume};
use crate::core::io::fasta;
use crate::core::models::candidate::StructuralCandidate;
use crate::core::models::result::{ToolInvocationResult, keys};
use crate::core::models::sequence::FastaRecord;
use crate::engine::cluster::export::{self, CLUSTERS_FILE_NAME, DISTANCE_MATRIX_FILE_NAME, EnsembleSummary, ExportError};
use crate::engine::cluster::{self, EnsembleResult};
use crate::engine::config::{PipelineConfig, ToolsConfig};
use crate::engine::dispatch;
use crate::engine::error::PipelineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::state::{PipelineState, Stage, StageStatus};
use crate::tools::infernal::Infernal;
use crate::tools::protenix::Protenix;
use crate::tools::rhofold::RhoFold;
use crate::tools::rnadvisor::{self, RnAdvisor, ScoreTable};
use crate::tools::rnafold::{FoldedStructure, RnaFold};
use crate::tools::simrna::SimRna;
use crate::tools::spotrna::SpotRna;
use crate::tools::{Collaborator, Predictor, ToolRequest};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// The collaborators one pipeline run may call on.
pub struct Toolbox {
    pub sequence_search: Box<dyn Collaborator>,
    pub secondary_structure: Box<dyn Collaborator>,
    pub pseudoknot: Box<dyn Collaborator>,
    pub predictors: Vec<Box<dyn Predictor>>,
    pub scorer: Box<dyn Collaborator>,
}

impl Toolbox {
    /// The subprocess-backed collaborators described by `tools`.
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            sequence_search: Box::new(Infernal::new(tools.infernal.clone())),
            secondary_structure: Box::new(RnaFold::new(tools.rnafold.clone())),
            pseudoknot: Box::new(SpotRna::new(tools.spotrna.clone())),
            predictors: vec![
                Box::new(RhoFold::new(tools.rhofold.clone())),
                Box::new(Protenix::new(tools.protenix.clone())),
                Box::new(SimRna::new(tools.simrna.clone())),
            ],
            scorer: Box::new(RnAdvisor::new(tools.rnadvisor.clone())),
        }
    }

    pub fn predictor(&self, name: &str) -> Option<&dyn Predictor> {
        self.predictors
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref() as &dyn Predictor)
    }

    pub fn predictor_names(&self) -> Vec<&str> {
        self.predictors.iter().map(|p| p.name()).collect()
    }

    /// Name and availability of every collaborator, in pipeline order.
    pub fn availability(&self) -> Vec<(String, bool)> {
        let mut report = vec![
            (self.sequence_search.name().to_string(), self.sequence_search.available()),
            (self.secondary_structure.name().to_string(), self.secondary_structure.available()),
            (self.pseudoknot.name().to_string(), self.pseudoknot.available()),
        ];
        report.extend(
            self.predictors
                .iter()
                .map(|p| (p.name().to_string(), p.available())),
        );
        report.push((self.scorer.name().to_string(), self.scorer.available()));
        report
    }
}

/// Per-run stage selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Predictor names, in execution order.
    pub predictors: Vec<String>,
    pub skip_sequence_search: bool,
    /// Also run the pseudoknot-aware secondary structure predictor.
    pub run_pseudoknot: bool,
    pub skip_scoring: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutput {
    pub predictor: String,
    pub status: StageStatus,
    pub work_dir: PathBuf,
    /// Structure files, primary structure first. Empty unless the stage completed.
    pub structures: Vec<PathBuf>,
    /// Metrics of the invocation; empty when the stage was restored from disk.
    pub metrics: BTreeMap<String, Value>,
}

/// Everything the stages of one run produced, as far as it could be produced or restored.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutputs {
    pub output_dir: PathBuf,
    pub query: FastaRecord,
    pub rfam_family: Option<String>,
    pub alignment: Option<PathBuf>,
    pub secondary_structure: Option<FoldedStructure>,
    pub pseudoknot: Option<String>,
    pub predictions: Vec<PredictionOutput>,
    pub ensemble: Option<EnsembleSummary>,
    pub scores: Option<ScoreTable>,
    pub report: Option<PathBuf>,
}

impl PipelineOutputs {
    pub fn new(output_dir: impl Into<PathBuf>, query: FastaRecord) -> Self {
        Self {
            output_dir: output_dir.into(),
            query,
            rfam_family: None,
            alignment: None,
            secondary_structure: None,
            pseudoknot: None,
            predictions: Vec::new(),
            ensemble: None,
            scores: None,
            report: None,
        }
    }

    /// Predictions whose stage completed, in execution order.
    pub fn successful_predictions(&self) -> impl Iterator<Item = &PredictionOutput> {
        self.predictions
            .iter()
            .filter(|p| p.status == StageStatus::Completed)
    }

    /// Every existing structure of every successful predictor, tagged with its predictor.
    pub fn candidates(&self) -> Vec<StructuralCandidate> {
        self.successful_predictions()
            .flat_map(|p| {
                p.structures
                    .iter()
                    .filter(|path| path.is_file())
                    .map(|path| StructuralCandidate::from_output(path.clone(), p.predictor.clone()))
            })
            .collect()
    }

    /// The structures sent to scoring: cluster representatives when clustering produced
    /// clusters, otherwise the primary structure of each successful predictor. Representatives
    /// whose files are gone are left out.
    pub fn scoring_inputs(&self) -> Vec<PathBuf> {
        match &self.ensemble {
            Some(ensemble) if !ensemble.clusters.is_empty() => {
                ensemble
                    .representatives()
                    .map(|c| c.path.clone())
                    .filter(|path| path.is_file())
                    .collect()
            }
            _ => self
                .successful_predictions()
                .filter_map(|p| p.structures.first().cloned())
                .collect(),
        }
    }
}

/// Why a stage will not run.
enum Skip {
    Disabled(&'static str),
    NoInput(&'static str),
    Unavailable(String),
}

fn unavailable<C: Collaborator + ?Sized>(tool: &C) -> Option<Skip> {
    (!tool.available()).then(|| Skip::Unavailable(tool.name().to_string()))
}

enum Attempt {
    /// Completed by an earlier run; outputs must be restored from disk.
    Resumed,
    Skipped,
    Finished(ToolInvocationResult),
}

/// The stage orchestrator of one output directory.
///
/// Stages run in a fixed order. Each stage consults the persisted [`PipelineState`] first:
/// completed stages are not run again and their outputs are restored from the directory
/// layout instead. Every attempt ends with the stage marked completed, skipped, or failed,
/// and the state file is rewritten before the next stage starts.
pub struct Pipeline<'a> {
    config: PipelineConfig,
    toolbox: Toolbox,
    layout: OutputLayout,
    state: PipelineState,
    reporter: &'a ProgressReporter<'a>,
}

impl<'a> Pipeline<'a> {
    /// Opens the pipeline rooted at `output_dir`, loading any state a previous run left.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        config: PipelineConfig,
        toolbox: Toolbox,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<Self, PipelineError> {
        let layout = OutputLayout::new(output_dir);
        let state = PipelineState::load(layout.root())?;
        if !state.is_empty() {
            info!("Resuming pipeline in {}", layout.root().display());
        }
        Ok(Self {
            config,
            toolbox,
            layout,
            state,
            reporter,
        })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Runs every stage once, in order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the input cannot be read, the output directory cannot be
    /// prepared, or the state file cannot be written. Tool problems are recorded as stage
    /// statuses instead.
    #[instrument(skip_all, name = "rnapipe_pipeline")]
    pub fn run(&mut self, input: &Path, options: &RunOptions) -> Result<PipelineOutputs, PipelineError> {
        let query = self.prepare_input(input)?;
        info!(
            id = query.id(),
            length = query.len(),
            "Starting pipeline in {}",
            self.layout.root().display()
        );
        let mut outputs = PipelineOutputs::new(self.layout.root(), query);

        let base = ToolRequest::new(
            self.layout.query_fasta(),
            self.layout.root(),
            self.config.execution.timeout,
        )
        .with_log_dir(Some(self.layout.logs_dir()));

        self.sequence_analysis(&base, options, &mut outputs)?;
        self.secondary_structure(&base, options, &mut outputs)?;
        for predictor in &options.predictors {
            self.prediction(&base, predictor, &mut outputs)?;
        }
        self.clustering(&mut outputs)?;
        self.scoring(&base, options, &mut outputs)?;
        self.report(&mut outputs)?;

        info!("Pipeline finished.");
        Ok(outputs)
    }

    fn prepare_input(&self, input: &Path) -> Result<FastaRecord, PipelineError> {
        let query = fasta::read_query(input).map_err(|source| PipelineError::Input {
            path: input.to_path_buf(),
            source,
        })?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| PipelineError::Io { path, source }
        };
        let query_fasta = self.layout.query_fasta();
        if let Some(input_dir) = query_fasta.parent() {
            fs::create_dir_all(input_dir).map_err(io_err(input_dir))?;
        }
        let logs = self.layout.logs_dir();
        fs::create_dir_all(&logs).map_err(io_err(&logs))?;
        if !query_fasta.exists() {
            fs::copy(input, &query_fasta).map_err(io_err(&query_fasta))?;
        }
        Ok(query)
    }

    fn mark(
        state: &mut PipelineState,
        reporter: &ProgressReporter,
        stage: &Stage,
        status: StageStatus,
    ) -> Result<(), PipelineError> {
        state.mark(stage, status)?;
        reporter.report(Progress::StageFinish {
            key: stage.key(),
            status,
        });
        Ok(())
    }

    /// Runs one stage unless it completed earlier or must be skipped, and records the
    /// outcome.
    fn attempt(
        state: &mut PipelineState,
        reporter: &ProgressReporter,
        stage: &Stage,
        skip: Option<Skip>,
        invoke: impl FnOnce() -> ToolInvocationResult,
    ) -> Result<Attempt, PipelineError> {
        if state.is_completed(stage) {
            info!(stage = %stage, "{} already completed; restoring its outputs.", stage.name());
            reporter.report(Progress::Message(format!("{} already completed", stage.name())));
            return Ok(Attempt::Resumed);
        }

        reporter.report(Progress::StageStart {
            key: stage.key(),
            name: stage.name(),
        });
        if let Some(skip) = skip {
            match skip {
                Skip::Disabled(reason) => info!(stage = %stage, "Skipping {}: {}.", stage.name(), reason),
                Skip::NoInput(reason) => warn!(stage = %stage, "Skipping {}: {}.", stage.name(), reason),
                Skip::Unavailable(tool) => warn!(stage = %stage, "Skipping {}: {} is not available.", stage.name(), tool),
            }
            Self::mark(state, reporter, stage, StageStatus::Skipped)?;
            return Ok(Attempt::Skipped);
        }

        let result = invoke();
        let status = if result.is_success() {
            info!(
                stage = %stage,
                elapsed_secs = result.elapsed_secs(),
                "{} completed.",
                stage.name()
            );
            StageStatus::Completed
        } else {
            error!(
                stage = %stage,
                "{} failed: {}",
                stage.name(),
                result.error_message().unwrap_or("unknown error")
            );
            StageStatus::Failed
        };
        Self::mark(state, reporter, stage, status)?;
        Ok(Attempt::Finished(result))
    }

    fn sequence_analysis(
        &mut self,
        base: &ToolRequest,
        options: &RunOptions,
        outputs: &mut PipelineOutputs,
    ) -> Result<(), PipelineError> {
        let stage = Stage::SequenceAnalysis;
        let tool = self.toolbox.sequence_search.as_ref();
        let skip = if options.skip_sequence_search {
            Some(Skip::Disabled("sequence search disabled"))
        } else {
            unavailable(tool)
        };
        let request = base.in_dir(self.layout.sequence_analysis_dir());

        match Self::attempt(&mut self.state, self.reporter, &stage, skip, || tool.invoke(&request))? {
            Attempt::Resumed => outputs.alignment = resume::alignment(&self.layout),
            Attempt::Finished(result) if result.is_success() => {
                outputs.alignment = result.artifact(keys::ALIGNMENT).map(Path::to_path_buf);
                outputs.rfam_family = result.metric_str(keys::RFAM_FAMILY).map(str::to_string);
                match &outputs.rfam_family {
                    Some(family) => info!("Rfam family: {}", family),
                    None => info!("No Rfam family found; predicting from the single sequence."),
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn secondary_structure(
        &mut self,
        base: &ToolRequest,
        options: &RunOptions,
        outputs: &mut PipelineOutputs,
    ) -> Result<(), PipelineError> {
        let stage = Stage::SecondaryStructure;
        let folder = self.toolbox.secondary_structure.as_ref();
        let knot_tool = self.toolbox.pseudoknot.as_ref();
        let request = base.in_dir(self.layout.secondary_structure_dir());

        let mut pseudoknot = None;
        let attempt = Self::attempt(&mut self.state, self.reporter, &stage, unavailable(folder), || {
            let result = folder.invoke(&request);
            if options.run_pseudoknot {
                pseudoknot = pseudoknot_pass(knot_tool, &request);
            }
            result
        })?;

        match attempt {
            Attempt::Resumed => {
                outputs.secondary_structure = resume::secondary_structure(&self.layout);
                outputs.pseudoknot = resume::pseudoknot_structure(&self.layout);
            }
            Attempt::Finished(result) => {
                if result.is_success() {
                    outputs.secondary_structure =
                        result.metric_str(keys::DOT_BRACKET).map(|db| FoldedStructure {
                            dot_bracket: db.to_string(),
                            mfe: result.metric_f64(keys::MFE),
                        });
                }
                outputs.pseudoknot = pseudoknot;
            }
            Attempt::Skipped => {}
        }
        Ok(())
    }

    fn prediction(
        &mut self,
        base: &ToolRequest,
        name: &str,
        outputs: &mut PipelineOutputs,
    ) -> Result<(), PipelineError> {
        let stage = Stage::Prediction(name.to_string());
        let work_dir = self.layout.prediction_dir(name);

        let Some(predictor) = self.toolbox.predictor(name) else {
            error!(
                "Unknown predictor '{}'; known predictors are {:?}.",
                name,
                self.toolbox.predictor_names()
            );
            self.reporter.report(Progress::StageStart {
                key: stage.key(),
                name: stage.name(),
            });
            Self::mark(&mut self.state, self.reporter, &stage, StageStatus::Skipped)?;
            outputs.predictions.push(PredictionOutput {
                predictor: name.to_string(),
                status: StageStatus::Skipped,
                work_dir,
                structures: Vec::new(),
                metrics: BTreeMap::new(),
            });
            return Ok(());
        };

        let request = base
            .in_dir(work_dir.clone())
            .with_alignment(outputs.alignment.clone())
            .with_secondary_structure(
                outputs
                    .secondary_structure
                    .as_ref()
                    .map(|s| s.dot_bracket.clone()),
            );
        let config = &self.config;
        let layout = &self.layout;
        let reporter = self.reporter;
        let attempt = Self::attempt(&mut self.state, reporter, &stage, unavailable(predictor), || {
            run_predictor(predictor, &request, config, layout, reporter)
        })?;

        let (structures, metrics) = match attempt {
            Attempt::Resumed => (resume::structures(&self.layout, name), BTreeMap::new()),
            Attempt::Finished(result) if result.is_success() => (
                result.artifacts(keys::STRUCTURES).to_vec(),
                result.metrics().clone(),
            ),
            _ => (Vec::new(), BTreeMap::new()),
        };
        info!("{}: {} structure(s).", name, structures.len());
        outputs.predictions.push(PredictionOutput {
            predictor: name.to_string(),
            status: self.state.status(&stage),
            work_dir,
            structures,
            metrics,
        });
        Ok(())
    }

    fn clustering(&mut self, outputs: &mut PipelineOutputs) -> Result<(), PipelineError> {
        let stage = Stage::Clustering;
        let candidates = outputs.candidates();
        let ensemble_config = &self.config.ensemble;
        let skip = if !ensemble_config.cluster {
            Some(Skip::Disabled("clustering disabled"))
        } else if candidates.len() < 2 {
            Some(Skip::Disabled("fewer than two structural candidates"))
        } else {
            None
        };

        let dir = self.layout.clustering_dir();
        let mut ensemble = None;
        let attempt = Self::attempt(&mut self.state, self.reporter, &stage, skip, || {
            let start = Instant::now();
            let result = cluster::cluster_candidates(
                candidates,
                ensemble_config.cluster_cutoff,
                ensemble_config.alignment,
            );
            let summary = result.summary();
            let outcome = match write_ensemble(&result, &summary, &dir) {
                Ok((matrix_csv, clusters_json)) => ToolInvocationResult::success(0.0)
                    .with_artifact("distance_matrix", matrix_csv)
                    .with_artifact("clusters", clusters_json)
                    .with_metric("n_clusters", result.clusters.len())
                    .with_metric("n_consensus", result.consensus_count()),
                Err(e) => ToolInvocationResult::failure(e.to_string(), 0.0),
            };
            info!(
                "{} structures in {} clusters ({} consensus).",
                result.candidates.len(),
                result.clusters.len(),
                result.consensus_count()
            );
            ensemble = Some(summary);
            outcome.with_elapsed(start.elapsed().as_secs_f64())
        })?;

        match attempt {
            Attempt::Resumed => outputs.ensemble = resume::ensemble(&self.layout),
            Attempt::Finished(result) if result.is_success() => outputs.ensemble = ensemble,
            _ => {}
        }
        Ok(())
    }

    fn scoring(
        &mut self,
        base: &ToolRequest,
        options: &RunOptions,
        outputs: &mut PipelineOutputs,
    ) -> Result<(), PipelineError> {
        let stage = Stage::Scoring;
        let scorer = self.toolbox.scorer.as_ref();
        let structures = outputs.scoring_inputs();
        let skip = if options.skip_scoring {
            Some(Skip::Disabled("scoring disabled"))
        } else if structures.is_empty() {
            Some(Skip::NoInput("no structures to score"))
        } else {
            unavailable(scorer)
        };
        let request = base
            .in_dir(self.layout.scoring_dir())
            .with_structures(structures);

        match Self::attempt(&mut self.state, self.reporter, &stage, skip, || scorer.invoke(&request))? {
            Attempt::Resumed => outputs.scores = resume::scores(&self.layout),
            Attempt::Finished(result) if result.is_success() => {
                outputs.scores = result.artifact(keys::SCORES_FILE).and_then(|path| {
                    rnadvisor::read_scores_json(path)
                        .map_err(|e| warn!("Could not read score table: {}", e))
                        .ok()
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Writes the summary report. The report reflects the current outputs, so it is
    /// regenerated on every run.
    fn report(&mut self, outputs: &mut PipelineOutputs) -> Result<(), PipelineError> {
        let stage = Stage::Report;
        self.reporter.report(Progress::StageStart {
            key: stage.key(),
            name: stage.name(),
        });
        let path = self.layout.summary_file();
        let status = match report::write_summary(outputs, &self.state, &path) {
            Ok(()) => {
                info!("Report written to {}", path.display());
                outputs.report = Some(path);
                StageStatus::Completed
            }
            Err(e) => {
                error!("Could not write report {}: {}", path.display(), e);
                StageStatus::Failed
            }
        };
        Self::mark(&mut self.state, self.reporter, &stage, status)
    }
}

/// Runs a predictor over its seed range, spreading seed batches across devices when the
/// predictor supports it and more than one device is configured.
fn run_predictor(
    predictor: &dyn Predictor,
    request: &ToolRequest,
    config: &PipelineConfig,
    layout: &OutputLayout,
    reporter: &ProgressReporter,
) -> ToolInvocationResult {
    let name = predictor.name();
    let offset = predictor.seed_offset();
    let seeds: Vec<u64> = (offset..offset + config.ensemble.nstruct as u64).collect();
    let devices = &config.execution.devices;

    if predictor.supports_devices() && devices.len() > 1 {
        let partitions = devices.len().min(seeds.len());
        info!(
            "Running {} for {} seed(s) across {} device(s).",
            name,
            seeds.len(),
            partitions
        );
        reporter.report(Progress::TaskStart {
            total_steps: partitions as u64,
        });
        let outcome = dispatch::dispatch(&seeds, devices, |task| {
            let partition = request.for_partition(
                layout.partition_dir(name, task.partition_index),
                task.device.clone(),
                task.items.clone(),
            );
            let result = predictor.invoke(&partition);
            reporter.report(Progress::TaskIncrement);
            result
        });
        reporter.report(Progress::TaskFinish);
        if outcome.result.is_success() && !outcome.failures.is_empty() {
            warn!(
                "{}: {} of {} partitions failed; keeping the structures of the rest.",
                name,
                outcome.failures.len(),
                partitions
            );
        }
        outcome.result
    } else {
        info!("Running {} for {} seed(s).", name, seeds.len());
        let single = request.for_partition(request.work_dir.clone(), devices.first().cloned(), seeds);
        predictor.invoke(&single)
    }
}

/// Runs the pseudoknot-aware predictor next to the MFE fold. Its failure never affects the
/// secondary structure stage.
fn pseudoknot_pass(tool: &dyn Collaborator, request: &ToolRequest) -> Option<String> {
    if !tool.available() {
        warn!("{} is not available; skipping pseudoknot prediction.", tool.name());
        return None;
    }
    let result = tool.invoke(request);
    if !result.is_success() {
        warn!(
            "Pseudoknot prediction failed: {}",
            result.error_message().unwrap_or("unknown error")
        );
        return None;
    }
    result.metric_str(keys::DOT_BRACKET).map(str::to_string)
}

fn write_ensemble(
    result: &EnsembleResult,
    summary: &EnsembleSummary,
    dir: &Path,
) -> Result<(PathBuf, PathBuf), ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let matrix_csv = dir.join(DISTANCE_MATRIX_FILE_NAME);
    let clusters_json = dir.join(CLUSTERS_FILE_NAME);
    export::write_distance_matrix_csv(result, &matrix_csv)?;
    export::write_clusters_json(summary, &clusters_json)?;
    Ok((matrix_csv, clusters_json))
}
