/// Share of successful geocodes among attempted ones, as a whole percentage.
/// Returns 0 when nothing has been attempted yet.
pub fn success_rate(successful: u64, failed: u64) -> u32 {
    let attempted = successful + failed;
    if attempted == 0 {
        return 0;
    }
    ((successful as f64 / attempted as f64) * 100.0).round() as u32
}

/// Rows per minute over `elapsed_secs`, None until there is something to measure.
pub fn rows_per_minute(processed: u64, elapsed_secs: f64) -> Option<f64> {
    if processed == 0 || elapsed_secs < 1.0 {
        return None;
    }
    Some(processed as f64 / elapsed_secs * 60.0)
}

/// Rough time left, extrapolated from the processed share. None before any progress.
pub fn estimated_remaining_secs(percent: f64, elapsed_secs: f64) -> Option<u64> {
    if percent <= 0.0 || percent >= 100.0 {
        return None;
    }
    let total = elapsed_secs * 100.0 / percent;
    Some((total - elapsed_secs).max(0.0).round() as u64)
}
