use crate::cli::ReportArgs;
use crate::error::{CliError, Result};
use rnapipe::workflows::report;
use tracing::info;

pub fn run(args: ReportArgs) -> Result<()> {
    if !args.output_dir.is_dir() {
        return Err(CliError::Argument(format!(
            "Output directory does not exist: {}",
            args.output_dir.display()
        )));
    }

    info!("Regenerating report for {:?}", &args.output_dir);
    let path = report::regenerate(&args.output_dir)?;
    println!("Report regenerated: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn missing_directory_is_an_argument_error() {
        let result = run(ReportArgs {
            output_dir: PathBuf::from("/nonexistent/rnapipe_output"),
        });
        assert!(matches!(result, Err(CliError::Argument(_))));
    }

    #[test]
    fn report_is_written_from_existing_outputs() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("query.fasta"), ">tRNA-Phe\nGCGGAUUUAGCUCAG\n").unwrap();

        run(ReportArgs {
            output_dir: dir.path().to_path_buf(),
        })
        .unwrap();

        let summary = fs::read_to_string(dir.path().join("05_report").join("summary.md")).unwrap();
        assert!(summary.contains("tRNA-Phe"));
    }

    #[test]
    fn directory_without_query_is_a_pipeline_error() {
        let dir = tempdir().unwrap();
        let result = run(ReportArgs {
            output_dir: dir.path().to_path_buf(),
        });
        assert!(matches!(result, Err(CliError::Pipeline(_))));
    }
}
