use crate::session::SessionState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub base_url: String,
    pub input: PathBuf,
    #[serde(default)]
    pub column_overrides: ColumnOverrides,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub poll_failure_threshold: u32,
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    pub user_agent: String,
}

/// Column names forced from the command line; unset fields fall back to auto-selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnOverrides {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnField {
    Address,
    City,
    State,
    Zip,
}

impl ColumnField {
    pub const ALL: [ColumnField; 4] = [
        ColumnField::Address,
        ColumnField::City,
        ColumnField::State,
        ColumnField::Zip,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ColumnField::Address => "address",
            ColumnField::City => "city",
            ColumnField::State => "state",
            ColumnField::Zip => "zip",
        }
    }
}

/// Header bindings for the four address fields. Empty string means "not selected".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl ColumnMapping {
    pub fn get(&self, field: ColumnField) -> &str {
        match field {
            ColumnField::Address => &self.address,
            ColumnField::City => &self.city,
            ColumnField::State => &self.state,
            ColumnField::Zip => &self.zip,
        }
    }

    pub fn set(&mut self, field: ColumnField, header: impl Into<String>) {
        let header = header.into();
        match field {
            ColumnField::Address => self.address = header,
            ColumnField::City => self.city = header,
            ColumnField::State => self.state = header,
            ColumnField::Zip => self.zip = header,
        }
    }
}

/// Body of `POST /process`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRequest<'a> {
    pub session_id: &'a str,
    pub address_column: &'a str,
    pub city_column: &'a str,
    pub state_column: &'a str,
    pub zip_column: &'a str,
}

/// Body of a successful `POST /upload`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub session_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    pub headers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Success,
    Error,
    Info,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Server formatted, displayed as-is.
    pub timestamp: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

/// One read of `GET /status/{session_id}`. Server authoritative; each applied snapshot
/// replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub progress_percent: f64,
    #[serde(default)]
    pub current_address: Option<String>,
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub successful_geocodes: u64,
    #[serde(default)]
    pub failed_geocodes: u64,
    #[serde(default)]
    pub processing_complete: bool,
    #[serde(default)]
    pub results_log: Vec<LogEntry>,
    #[serde(default)]
    pub cache_hits: Option<u64>,
    #[serde(default)]
    pub api_calls: Option<u64>,
    #[serde(default)]
    pub cities_processed: Vec<String>,
    #[serde(default)]
    pub zip_codes_found: Vec<String>,
}

impl ProgressSnapshot {
    /// Percentage clamped to the 0..=100 range for gauges.
    pub fn clamped_percent(&self) -> u16 {
        self.progress_percent.round().clamp(0.0, 100.0) as u16
    }

    pub fn current_address(&self) -> Option<&str> {
        self.current_address
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControllerEvent {
    SessionBound {
        session_id: String,
        filename: String,
        headers: Vec<String>,
        suggested: ColumnMapping,
    },
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Mapping stored by configure or submitted by a successful launch.
    MappingApplied {
        mapping: ColumnMapping,
    },
    Progress {
        // Boxed: snapshots carry the full log and would bloat every event.
        snapshot: Box<ProgressSnapshot>,
        success_rate: u32,
    },
    LogUpdated {
        entries: Vec<LogEntry>,
        total: usize,
    },
    PollDegraded {
        consecutive_failures: u32,
    },
    Completed {
        download_url: String,
    },
    Stopped,
    Info(InfoEvent),
    RunFinished {
        summary: Box<RunSummary>,
    },
}

/// Structured info events emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Uploading { filename: String },
    Launched { session_id: String },
    StopRequested,
    StoppedByUser,
    OperationFailed(String),
    Downloaded { path: PathBuf },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Uploading { filename } => format!("Uploading {}…", filename),
            InfoEvent::Launched { session_id } => {
                format!("Processing started (session {})", session_id)
            }
            InfoEvent::StopRequested => "Stopping…".to_string(),
            InfoEvent::StoppedByUser => "Processing stopped by user".to_string(),
            InfoEvent::OperationFailed(msg) => msg.clone(),
            InfoEvent::Downloaded { path } => format!("Saved results: {}", path.display()),
        }
    }
}

/// Final record of a run, printed in JSON mode and used for the text summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default)]
    pub timestamp_utc: String,
    pub base_url: String,
    pub session_id: Option<String>,
    pub filename: Option<String>,
    pub state: SessionState,
    #[serde(default)]
    pub mapping: Option<ColumnMapping>,
    pub progress_percent: f64,
    pub total_processed: u64,
    pub successful_geocodes: u64,
    pub failed_geocodes: u64,
    pub success_rate: u32,
    #[serde(default)]
    pub cache_hits: Option<u64>,
    #[serde(default)]
    pub api_calls: Option<u64>,
    #[serde(default)]
    pub cities_processed: usize,
    #[serde(default)]
    pub zip_codes_found: usize,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_deserializes_server_status_body() {
        let body = serde_json::json!({
            "progress_percent": 10,
            "current_address": "123 MAIN ST, Springfield, IL",
            "total_processed": 1,
            "successful_geocodes": 1,
            "failed_geocodes": 0,
            "processing_complete": false,
            "cache_hits": 0,
            "api_calls": 2,
            "cities_processed": ["Springfield, IL"],
            "zip_codes_found": ["62701"],
            "results_log": [
                {"timestamp": "12:00:01", "message": "SUCCESS: 123 MAIN ST", "type": "success"},
                {"timestamp": "12:00:02", "message": "weird", "type": "debug"}
            ]
        });
        let snap: ProgressSnapshot = serde_json::from_value(body).unwrap();
        assert_eq!(snap.clamped_percent(), 10);
        assert_eq!(snap.total_processed, 1);
        assert_eq!(snap.results_log.len(), 2);
        assert_eq!(snap.results_log[0].kind, LogKind::Success);
        assert_eq!(snap.results_log[1].kind, LogKind::Other);
        assert_eq!(snap.api_calls, Some(2));
    }

    #[test]
    fn snapshot_tolerates_minimal_body() {
        let snap: ProgressSnapshot =
            serde_json::from_value(serde_json::json!({"processing_complete": true})).unwrap();
        assert!(snap.processing_complete);
        assert_eq!(snap.current_address(), None);
        assert!(snap.results_log.is_empty());
    }

    #[test]
    fn blank_current_address_is_hidden() {
        let snap = ProgressSnapshot {
            current_address: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(snap.current_address(), None);
    }

    #[test]
    fn percent_is_clamped() {
        let snap = ProgressSnapshot {
            progress_percent: 140.0,
            ..Default::default()
        };
        assert_eq!(snap.clamped_percent(), 100);
    }

    #[test]
    fn process_request_uses_wire_names() {
        let req = ProcessRequest {
            session_id: "abc",
            address_column: "Street Address",
            city_column: "City",
            state_column: "State",
            zip_column: "Zip",
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({
                "session_id": "abc",
                "address_column": "Street Address",
                "city_column": "City",
                "state_column": "State",
                "zip_column": "Zip"
            })
        );
    }
}
