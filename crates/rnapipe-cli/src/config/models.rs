use rnapipe::engine::config::PipelineConfig;
use rnapipe::workflows::pipeline::RunOptions;
use std::path::PathBuf;

pub struct AppConfig {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub options: RunOptions,
    pub core_config: PipelineConfig,
}
