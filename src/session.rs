//! Session handle and lifecycle transitions.
//!
//! A session is bound by a successful upload and lives until the next upload replaces it
//! or the controller is torn down. The only transitions driven by server data go through
//! [`next_state`], which is pure so it can be exercised without timers or HTTP.

use crate::model::{ColumnMapping, ProgressSnapshot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Unbound,
    Uploaded,
    Configured,
    Running,
    Stopped,
    Completed,
}

impl SessionState {
    /// Completed and Stopped end the polling loop; no tick may act afterwards.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Stopped)
    }

    /// States from which processing may be started.
    pub fn can_launch(self) -> bool {
        matches!(self, SessionState::Uploaded | SessionState::Configured)
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionState::Unbound => "No file",
            SessionState::Uploaded => "Uploaded",
            SessionState::Configured => "Ready",
            SessionState::Running => "Processing",
            SessionState::Stopped => "Stopped",
            SessionState::Completed => "Complete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub filename: String,
    pub headers: Vec<String>,
    pub mapping: Option<ColumnMapping>,
}

/// A state change, reported to presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

impl Session {
    /// Bind a freshly uploaded file.
    pub fn uploaded(id: String, filename: String, headers: Vec<String>) -> Self {
        Self {
            id,
            state: SessionState::Uploaded,
            filename,
            headers,
            mapping: None,
        }
    }

    /// Move to `to`, returning the transition when the state actually changed.
    pub fn transition_to(&mut self, to: SessionState) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let from = self.state;
        self.state = to;
        Some(Transition { from, to })
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }
}

/// Session state after applying `snapshot` in `current`.
///
/// Only a Running session reacts to snapshots; anything else (a late response after a
/// stop, say) leaves the state untouched.
pub fn next_state(current: SessionState, snapshot: &ProgressSnapshot) -> SessionState {
    match current {
        SessionState::Running if snapshot.processing_complete => SessionState::Completed,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(complete: bool) -> ProgressSnapshot {
        ProgressSnapshot {
            progress_percent: if complete { 100.0 } else { 40.0 },
            processing_complete: complete,
            ..Default::default()
        }
    }

    #[test]
    fn running_session_completes_on_complete_snapshot() {
        assert_eq!(
            next_state(SessionState::Running, &snapshot(true)),
            SessionState::Completed
        );
        assert_eq!(
            next_state(SessionState::Running, &snapshot(false)),
            SessionState::Running
        );
    }

    #[test]
    fn non_running_states_ignore_snapshots() {
        for state in [
            SessionState::Unbound,
            SessionState::Uploaded,
            SessionState::Configured,
            SessionState::Stopped,
            SessionState::Completed,
        ] {
            assert_eq!(next_state(state, &snapshot(true)), state);
            assert_eq!(next_state(state, &snapshot(false)), state);
        }
    }

    #[test]
    fn transition_reports_only_real_changes() {
        let mut s = Session::uploaded("abc".into(), "a.csv".into(), vec!["City".into()]);
        assert_eq!(s.transition_to(SessionState::Uploaded), None);
        assert_eq!(
            s.transition_to(SessionState::Running),
            Some(Transition {
                from: SessionState::Uploaded,
                to: SessionState::Running
            })
        );
        assert!(s.is_running());
    }

    #[test]
    fn terminal_and_launchable_states() {
        assert!(SessionState::Stopped.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert!(SessionState::Uploaded.can_launch());
        assert!(SessionState::Configured.can_launch());
        assert!(!SessionState::Running.can_launch());
        assert!(!SessionState::Stopped.can_launch());
    }
}
