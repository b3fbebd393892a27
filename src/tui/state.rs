use crate::log_view::LogWindow;
use crate::model::{ColumnMapping, ControllerEvent, LogKind, ProgressSnapshot, RunSummary};
use crate::session::SessionState;
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::time::Instant;

pub struct UiState {
    pub tab: usize,
    pub state: SessionState,
    pub info: String,

    pub filename: Option<String>,
    pub session_id: Option<String>,
    pub headers: Vec<String>,
    pub mapping: Option<ColumnMapping>,

    pub snapshot: ProgressSnapshot,
    pub success_rate: u32,
    // Rows processed between consecutive snapshots, for the sparkline
    pub processed_series: Vec<u64>,
    pub log: LogWindow,

    pub run_start: Option<Instant>,
    pub run_elapsed_secs: Option<f64>,
    pub degraded: Option<u32>,
    pub download_url: Option<String>,
    pub summary: Option<RunSummary>,
    /// Set after the first quit key while processing; the next one quits.
    pub quit_confirm: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            state: SessionState::Unbound,
            info: String::new(),
            filename: None,
            session_id: None,
            headers: Vec::new(),
            mapping: None,
            snapshot: ProgressSnapshot::default(),
            success_rate: 0,
            processed_series: Vec::new(),
            log: LogWindow::default(),
            run_start: None,
            run_elapsed_secs: None,
            degraded: None,
            download_url: None,
            summary: None,
            quit_confirm: false,
        }
    }
}

impl UiState {
    pub fn push_series(series: &mut Vec<u64>, v: u64) {
        const MAX: usize = 120;
        series.push(v);
        if series.len() > MAX {
            let _ = series.drain(0..(series.len() - MAX));
        }
    }

    /// Seconds since processing started, frozen once the run ends.
    pub fn elapsed_secs(&self) -> f64 {
        match (self.run_elapsed_secs, self.run_start) {
            (Some(frozen), _) => frozen,
            (None, Some(start)) => start.elapsed().as_secs_f64(),
            (None, None) => 0.0,
        }
    }

    fn reset_progress(&mut self) {
        self.snapshot = ProgressSnapshot::default();
        self.success_rate = 0;
        self.processed_series.clear();
        self.log.clear();
        self.degraded = None;
        self.download_url = None;
        self.summary = None;
    }
}

pub fn apply_event(state: &mut UiState, ev: ControllerEvent) {
    match ev {
        ControllerEvent::SessionBound {
            session_id,
            filename,
            headers,
            suggested,
        } => {
            state.session_id = Some(session_id);
            state.filename = Some(filename);
            state.headers = headers;
            state.mapping = Some(suggested);
            state.run_start = None;
            state.run_elapsed_secs = None;
            state.reset_progress();
        }
        ControllerEvent::StateChanged { to, .. } => {
            state.state = to;
            if to == SessionState::Running {
                state.reset_progress();
                state.run_start = Some(Instant::now());
                state.run_elapsed_secs = None;
            } else if to.is_terminal() {
                state.run_elapsed_secs = state.run_start.map(|s| s.elapsed().as_secs_f64());
                state.quit_confirm = false;
            }
        }
        ControllerEvent::MappingApplied { mapping } => state.mapping = Some(mapping),
        ControllerEvent::Progress {
            snapshot,
            success_rate,
        } => {
            let delta = snapshot
                .total_processed
                .saturating_sub(state.snapshot.total_processed);
            UiState::push_series(&mut state.processed_series, delta);
            state.snapshot = *snapshot;
            state.success_rate = success_rate;
            state.degraded = None;
        }
        ControllerEvent::LogUpdated { entries, total } => state.log.mirror(entries, total),
        ControllerEvent::PollDegraded {
            consecutive_failures,
        } => {
            state.degraded = Some(consecutive_failures);
        }
        ControllerEvent::Completed { download_url } => {
            state.info = "Processing complete".into();
            state.download_url = Some(download_url);
        }
        ControllerEvent::Stopped => {
            state.download_url = None;
        }
        ControllerEvent::Info(info) => state.info = info.to_message(),
        ControllerEvent::RunFinished { summary } => state.summary = Some(*summary),
    }
}

pub fn log_kind_style(kind: LogKind) -> Style {
    match kind {
        LogKind::Success => Style::default().fg(Color::Green),
        LogKind::Error => Style::default().fg(Color::Red),
        LogKind::Info => Style::default().fg(Color::Cyan),
        LogKind::Other => Style::default().fg(Color::Gray),
    }
}

pub fn state_color(state: SessionState) -> Color {
    match state {
        SessionState::Running => Color::Yellow,
        SessionState::Completed => Color::Green,
        SessionState::Stopped => Color::Red,
        SessionState::Uploaded | SessionState::Configured => Color::Cyan,
        SessionState::Unbound => Color::Gray,
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Borders take 2 chars on each side
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let chars_to_take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(chars_to_take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}
