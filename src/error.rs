use crate::model::ColumnField;
use thiserror::Error;

/// Errors produced by the session controller and the service client.
///
/// Upload, launch and stop failures end the operation that raised them and need the
/// user to retry. `Poll` is transient: the poller logs it and keeps ticking.
#[derive(Debug, Error)]
pub enum ControllerError {
    // ── Local validation (never touches the network) ─────────────────────────
    #[error("{0}")]
    Validation(String),

    #[error("Please select a column for: {}", format_fields(.missing))]
    IncompleteMapping { missing: Vec<ColumnField> },

    // ── Remote operations ────────────────────────────────────────────────────
    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Failed to start processing: {0}")]
    Launch(String),

    #[error("Failed to stop processing: {0}")]
    Stop(String),

    #[error("Status poll failed: {0}")]
    Poll(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// True for failures raised before any request was sent.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ControllerError::Validation(_) | ControllerError::IncompleteMapping { .. }
        )
    }
}

fn format_fields(fields: &[ColumnField]) -> String {
    fields
        .iter()
        .map(|f| f.label())
        .collect::<Vec<_>>()
        .join(", ")
}
