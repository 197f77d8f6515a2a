use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Well-known artifact and metric names shared by collaborators and the orchestrator.
pub mod keys {
    /// Every 3-D structure file produced by a predictor, primary structure first.
    pub const STRUCTURES: &str = "structures";
    /// Multiple sequence alignment produced by the sequence search.
    pub const ALIGNMENT: &str = "alignment";
    /// Dot-bracket file produced by secondary-structure prediction.
    pub const DOT_BRACKET_FILE: &str = "dot";
    /// Score table produced by model scoring.
    pub const SCORES_FILE: &str = "scores";
    /// Ranking produced by model scoring.
    pub const RANKING_FILE: &str = "ranking";

    pub const DOT_BRACKET: &str = "dot_bracket";
    pub const MFE: &str = "mfe";
    pub const RFAM_FAMILY: &str = "rfam_family";
    pub const RFAM_ACCESSION: &str = "rfam_accession";
    pub const EVALUE: &str = "evalue";
    pub const SCORES: &str = "scores";
    pub const RANKING: &str = "ranking";
    pub const BEST_MODEL: &str = "best_model";

    /// Suffix of per-item metric lists that are merged across dispatch partitions.
    pub const PER_RUN_SUFFIX: &str = "_per_run";
    /// Suffix of the aggregate recomputed from a matching per-item list.
    pub const MEAN_SUFFIX: &str = "_mean";
}

/// The uniform output of any external collaborator invocation.
///
/// A result is either a success, carrying zero or more artifacts and metrics, or a failure
/// carrying a human-readable message. The error message is present if and only if the
/// invocation failed. Results are built with the `with_*` methods at construction time and
/// are not mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    success: bool,
    #[serde(default)]
    artifacts: BTreeMap<String, Vec<PathBuf>>,
    #[serde(default)]
    metrics: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default)]
    elapsed_secs: f64,
}

impl ToolInvocationResult {
    /// Creates a successful result with no artifacts or metrics.
    pub fn success(elapsed_secs: f64) -> Self {
        Self {
            success: true,
            artifacts: BTreeMap::new(),
            metrics: BTreeMap::new(),
            error: None,
            elapsed_secs,
        }
    }

    /// Creates a failed result with the given message.
    pub fn failure(message: impl Into<String>, elapsed_secs: f64) -> Self {
        Self {
            success: false,
            artifacts: BTreeMap::new(),
            metrics: BTreeMap::new(),
            error: Some(message.into()),
            elapsed_secs,
        }
    }

    /// Appends one file to the artifact list registered under `name`.
    pub fn with_artifact(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.artifacts
            .entry(name.to_string())
            .or_default()
            .push(path.into());
        self
    }

    /// Appends several files to the artifact list registered under `name`.
    ///
    /// An empty iterator leaves the result unchanged.
    pub fn with_artifacts<I>(mut self, name: &str, paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut paths = paths.into_iter().peekable();
        if paths.peek().is_some() {
            self.artifacts
                .entry(name.to_string())
                .or_default()
                .extend(paths);
        }
        self
    }

    /// Records a metric, replacing any previous value under the same name.
    pub fn with_metric(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }

    /// Sets the wall-clock time of the invocation.
    pub fn with_elapsed(mut self, elapsed_secs: f64) -> Self {
        self.elapsed_secs = elapsed_secs;
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Returns the error message; `None` for successful results.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    /// All files registered under `name`, in insertion order.
    pub fn artifacts(&self, name: &str) -> &[PathBuf] {
        self.artifacts.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The first file registered under `name`.
    pub fn artifact(&self, name: &str) -> Option<&Path> {
        self.artifacts(name).first().map(PathBuf::as_path)
    }

    pub fn artifact_map(&self) -> &BTreeMap<String, Vec<PathBuf>> {
        &self.artifacts
    }

    pub fn metric(&self, name: &str) -> Option<&Value> {
        self.metrics.get(name)
    }

    /// Convenience accessor for string metrics.
    pub fn metric_str(&self, name: &str) -> Option<&str> {
        self.metric(name).and_then(Value::as_str)
    }

    /// Convenience accessor for numeric metrics.
    pub fn metric_f64(&self, name: &str) -> Option<f64> {
        self.metric(name).and_then(Value::as_f64)
    }

    pub fn metrics(&self) -> &BTreeMap<String, Value> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_has_no_error_message() {
        let r = ToolInvocationResult::success(1.5);
        assert!(r.is_success());
        assert!(r.error_message().is_none());
        assert_eq!(r.elapsed_secs(), 1.5);
    }

    #[test]
    fn failure_carries_error_message() {
        let r = ToolInvocationResult::failure("boom", 0.0);
        assert!(!r.is_success());
        assert_eq!(r.error_message(), Some("boom"));
    }

    #[test]
    fn with_artifact_appends_in_order() {
        let r = ToolInvocationResult::success(0.0)
            .with_artifact(keys::STRUCTURES, "a.pdb")
            .with_artifact(keys::STRUCTURES, "b.pdb");
        assert_eq!(
            r.artifacts(keys::STRUCTURES),
            &[PathBuf::from("a.pdb"), PathBuf::from("b.pdb")]
        );
        assert_eq!(r.artifact(keys::STRUCTURES), Some(Path::new("a.pdb")));
    }

    #[test]
    fn with_artifacts_ignores_empty_lists() {
        let r = ToolInvocationResult::success(0.0).with_artifacts(keys::STRUCTURES, Vec::new());
        assert!(r.artifact_map().is_empty());
        assert!(r.artifacts(keys::STRUCTURES).is_empty());
    }

    #[test]
    fn metric_accessors_return_typed_values() {
        let r = ToolInvocationResult::success(0.0)
            .with_metric(keys::DOT_BRACKET, "((..))")
            .with_metric(keys::MFE, -3.2)
            .with_metric("plddt_per_run", json!([0.5, 0.7]));
        assert_eq!(r.metric_str(keys::DOT_BRACKET), Some("((..))"));
        assert_eq!(r.metric_f64(keys::MFE), Some(-3.2));
        assert!(r.metric("plddt_per_run").unwrap().is_array());
        assert!(r.metric("missing").is_none());
    }
}
