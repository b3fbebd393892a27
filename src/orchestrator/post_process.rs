//! Post-run processing utilities.
//!
//! Builds the run summary and fetches the result file once a run reaches a terminal state.

use super::controller::Controller;
use crate::model::{RunConfig, RunSummary};
use crate::session::SessionState;
use tracing::warn;

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub summary: RunSummary,
    pub messages: Vec<String>,
}

/// Summarize a finished run and, for a completed one, save results to `--output`.
pub(crate) async fn process_run_completion(ctl: &Controller, cfg: &RunConfig) -> ProcessedRun {
    let mut summary = ctl.summary();
    let mut messages = Vec::new();

    if summary.state == SessionState::Completed {
        if let Some(dest) = cfg.output.as_deref() {
            match ctl.download_to(dest).await {
                Ok(bytes) => {
                    summary.output_path = Some(dest.to_path_buf());
                    messages.push(format!("Saved results: {} ({} bytes)", dest.display(), bytes));
                }
                Err(e) => {
                    warn!("result download failed: {e}");
                    messages.push(e.to_string());
                }
            }
        } else if let Some(url) = summary.download_url.as_deref() {
            messages.push(format!("Results ready: {url}"));
        }
    }

    ProcessedRun { summary, messages }
}
