use crate::cli::RunArgs;
use crate::config::builder;
use crate::config::models::AppConfig;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use rnapipe::engine::progress::ProgressReporter;
use rnapipe::engine::state::StageStatus;
use rnapipe::workflows::pipeline::{Pipeline, PipelineOutputs, Toolbox};
use tracing::{info, warn};

pub fn run(args: RunArgs) -> Result<()> {
    if !args.input.is_file() {
        return Err(CliError::Argument(format!(
            "Input FASTA does not exist: {}",
            args.input.display()
        )));
    }

    info!("Merging configuration from file and CLI arguments...");
    let app = builder::build_config(&args)?;
    print_header(&app);

    if app.options.predictors.is_empty() {
        warn!("No 3D predictors selected; only sequence analysis and secondary structure will run.");
        println!("Warning: No 3D predictors selected. Use --rhofold, --simrna, --protenix, or --all.");
    }

    let toolbox = Toolbox::from_config(&app.core_config.tools);
    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    info!("Invoking the pipeline...");
    let mut pipeline = Pipeline::new(&app.output_dir, app.core_config, toolbox, &reporter)?;
    let outputs = pipeline.run(&app.input_path, &app.options)?;

    print_outcome(&outputs);
    println!("\nDone! Results in: {}", app.output_dir.display());
    Ok(())
}

fn print_header(app: &AppConfig) {
    let config = &app.core_config;
    println!("\nrnapipe v{}", env!("CARGO_PKG_VERSION"));
    println!("  Input:      {}", app.input_path.display());
    println!("  Output:     {}", app.output_dir.display());
    let predictors = if app.options.predictors.is_empty() {
        "none".to_string()
    } else {
        app.options.predictors.join(", ")
    };
    println!("  Predictors: {}", predictors);
    if config.ensemble.nstruct > 1 {
        println!("  Ensemble:   {} structures per predictor", config.ensemble.nstruct);
    }
    if !config.execution.devices.is_empty() {
        println!("  Device:     {}", config.execution.devices.join(", "));
    }
    println!();
}

fn print_outcome(outputs: &PipelineOutputs) {
    for prediction in &outputs.predictions {
        match prediction.status {
            StageStatus::Completed => println!(
                "✓ {}: {} structure(s)",
                prediction.predictor,
                prediction.structures.len()
            ),
            status => println!("  {}: {}", prediction.predictor, status),
        }
    }
    if let Some(ensemble) = &outputs.ensemble {
        println!(
            "✓ Ensemble: {} cluster(s) from {} structure(s), {} consensus",
            ensemble.clusters.len(),
            ensemble.candidates.len(),
            ensemble.consensus_clusters().count()
        );
    }
    if let Some(best) = outputs.scores.as_ref().and_then(|table| table.best()) {
        println!("✓ Best model: {} (avg rank {:.2})", best.name, best.average_rank);
    }
    if let Some(report) = &outputs.report {
        println!("  Report: {}", report.display());
    }
}
