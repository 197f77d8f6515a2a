use indicatif::{ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use rnapipe::engine::progress::{Progress, ProgressCallback};
use rnapipe::engine::state::StageStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const SPINNER_TICK_MS: u64 = 80;

/// Renders pipeline progress events as a spinner per stage and a bar per dispatched batch.
#[derive(Clone)]
pub struct CliProgressHandler {
    pb: Arc<Mutex<ProgressBar>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    fn with_draw_target(target: ProgressDrawTarget) -> Self {
        let pb = ProgressBar::new(0)
            .with_style(Self::spinner_style())
            .with_message("Initializing...");
        pb.set_draw_target(target);
        pb.disable_steady_tick();
        pb.finish_and_clear();

        Self {
            pb: Arc::new(Mutex::new(pb)),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let pb_clone = self.pb.clone();

        Box::new(move |progress: Progress| {
            let Ok(pb_guard) = pb_clone.lock() else {
                warn!("Progress bar mutex was poisoned. Cannot update progress.");
                return;
            };

            match progress {
                Progress::StageStart { key, name } => {
                    pb_guard.reset();
                    pb_guard.set_length(0);
                    pb_guard.set_style(Self::spinner_style());
                    pb_guard.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                    pb_guard.set_message(format!("{} ({})", name, key));
                }
                Progress::StageFinish { key, status } => {
                    pb_guard.disable_steady_tick();
                    pb_guard.finish_with_message(Self::finish_message(&key, status));
                }
                Progress::TaskStart { total_steps } => {
                    pb_guard.disable_steady_tick();
                    pb_guard.reset();
                    pb_guard.set_length(total_steps);
                    pb_guard.set_position(0);
                    pb_guard.set_style(Self::bar_style());
                }
                Progress::TaskIncrement => {
                    pb_guard.inc(1);
                }
                Progress::TaskFinish => {
                    if pb_guard.position() < pb_guard.length().unwrap_or(0) {
                        pb_guard.set_position(pb_guard.length().unwrap_or(0));
                    }
                    pb_guard.finish();
                }
                Progress::Message(msg) => {
                    if !pb_guard.is_finished() {
                        pb_guard.println(format!("  {}", msg));
                    } else {
                        pb_guard.set_message(msg);
                    }
                }
            }
        })
    }

    fn finish_message(key: &str, status: StageStatus) -> String {
        let mark = match status {
            StageStatus::Completed => "✓",
            StageStatus::Skipped => "-",
            StageStatus::Failed => "✗",
            StageStatus::Pending => "?",
        };
        format!("{} {} {}", mark, key, status)
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<24} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .with_key(
                "eta",
                |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                    let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                },
            )
            .progress_chars("##-")
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn hidden_handler() -> CliProgressHandler {
        CliProgressHandler::with_draw_target(ProgressDrawTarget::hidden())
    }

    #[test]
    fn handler_initializes_in_a_clean_state() {
        let handler = hidden_handler();
        let pb = handler.pb.lock().unwrap();
        assert_eq!(pb.length(), Some(0));
        assert!(pb.is_finished());
    }

    #[test]
    fn callback_tracks_stage_and_batch_progress() {
        let handler = hidden_handler();
        let callback = handler.get_callback();

        callback(Progress::StageStart {
            key: "stage3_rhofold".to_string(),
            name: "3D Prediction",
        });
        {
            let pb = handler.pb.lock().unwrap();
            assert_eq!(pb.message(), "3D Prediction (stage3_rhofold)");
            assert!(!pb.is_finished());
        }

        callback(Progress::TaskStart { total_steps: 4 });
        callback(Progress::TaskIncrement);
        {
            let pb = handler.pb.lock().unwrap();
            assert_eq!(pb.length(), Some(4));
            assert_eq!(pb.position(), 1);
        }

        callback(Progress::TaskFinish);
        {
            let pb = handler.pb.lock().unwrap();
            assert!(pb.is_finished());
            assert_eq!(pb.position(), 4);
        }

        callback(Progress::StageFinish {
            key: "stage3_rhofold".to_string(),
            status: StageStatus::Completed,
        });
        let pb = handler.pb.lock().unwrap();
        assert_eq!(pb.message(), "✓ stage3_rhofold completed");
    }

    #[test]
    fn failed_stage_is_marked() {
        assert_eq!(
            CliProgressHandler::finish_message("stage4", StageStatus::Failed),
            "✗ stage4 failed"
        );
        assert_eq!(
            CliProgressHandler::finish_message("stage1", StageStatus::Skipped),
            "- stage1 skipped"
        );
    }

    #[test]
    fn callback_is_thread_safe() {
        let handler = hidden_handler();
        let callback = handler.get_callback();

        thread::spawn(move || {
            callback(Progress::StageStart {
                key: "stage2".to_string(),
                name: "Secondary Structure",
            });
            callback(Progress::TaskIncrement);
            callback(Progress::StageFinish {
                key: "stage2".to_string(),
                status: StageStatus::Skipped,
            });
        })
        .join()
        .unwrap();

        let pb = handler.pb.lock().unwrap();
        assert!(pb.is_finished());
        assert_eq!(pb.message(), "- stage2 skipped");
    }
}
