//! Text summary builder for CLI output.
//!
//! Formats the final run summary as human-readable lines for text mode.

use crate::model::RunSummary;
use crate::session::SessionState;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a finished run.
pub(crate) fn build_text_summary(summary: &RunSummary) -> TextSummary {
    let mut lines = Vec::new();

    let outcome = match summary.state {
        SessionState::Completed => "complete",
        SessionState::Stopped => "stopped by user",
        SessionState::Running => "interrupted (still running on the server)",
        _ => "not started",
    };
    lines.push(format!(
        "File: {} ({})",
        summary.filename.as_deref().unwrap_or("-"),
        outcome
    ));
    if let Some(id) = summary.session_id.as_deref() {
        lines.push(format!("Session: {id}"));
    }
    if let Some(m) = summary.mapping.as_ref() {
        lines.push(format!(
            "Columns: address={} city={} state={} zip={}",
            m.address, m.city, m.state, m.zip
        ));
    }

    lines.push(format!(
        "Processed: {} ({:.0}%)",
        summary.total_processed, summary.progress_percent
    ));
    lines.push(format!(
        "Geocoded: {} ok, {} failed, success rate {}%",
        summary.successful_geocodes, summary.failed_geocodes, summary.success_rate
    ));
    if let (Some(hits), Some(calls)) = (summary.cache_hits, summary.api_calls) {
        lines.push(format!("Cache hits: {hits}, API calls: {calls}"));
    }
    if summary.cities_processed > 0 || summary.zip_codes_found > 0 {
        lines.push(format!(
            "Cities: {}, distinct ZIP codes: {}",
            summary.cities_processed, summary.zip_codes_found
        ));
    }

    if let Some(path) = summary.output_path.as_ref() {
        lines.push(format!("Results saved: {}", path.display()));
    } else if let Some(url) = summary.download_url.as_deref() {
        lines.push(format!("Download: {url}"));
    }

    TextSummary { lines }
}
