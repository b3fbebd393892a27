mod export;
mod help;
mod state;

use crate::cli::Cli;
use crate::model::{ControllerEvent, InfoEvent};
use crate::orchestrator::{self, UiCommand};
use crate::session::SessionState;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Sparkline, Tabs},
    Terminal,
};
use state::{apply_event, log_kind_style, push_wrapped_status_kv, state_color, UiState};
use std::path::PathBuf;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ControllerEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let cfg = crate::cli::build_config(&args);

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let output = cfg.output.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(output, event_rx, cmd_tx));

    let res = orchestrator::run_controller(&cfg, false, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res.map(|_| ())
}

/// What a key press asks the UI loop to do.
#[derive(Debug)]
enum KeyOutcome {
    None,
    Send(UiCommand),
    Quit,
}

fn handle_key(
    state: &mut UiState,
    modifiers: KeyModifiers,
    code: KeyCode,
    output: Option<&PathBuf>,
) -> KeyOutcome {
    let is_quit = matches!(code, KeyCode::Char('q'))
        || (modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c'));
    if is_quit {
        if state.state == SessionState::Running && !state.quit_confirm {
            state.quit_confirm = true;
            state.info =
                "Processing is still running. Press q again to leave it running and quit, or s to stop."
                    .into();
            return KeyOutcome::None;
        }
        return KeyOutcome::Quit;
    }
    state.quit_confirm = false;

    match code {
        KeyCode::Char('r') => {
            if state.state == SessionState::Running {
                state.info = "Already processing".into();
                KeyOutcome::None
            } else {
                state.info = "Starting…".into();
                KeyOutcome::Send(UiCommand::Start)
            }
        }
        KeyCode::Char('s') => {
            if state.state == SessionState::Running {
                state.info = InfoEvent::StopRequested.to_message();
                KeyOutcome::Send(UiCommand::Stop)
            } else {
                state.info = "Nothing to stop".into();
                KeyOutcome::None
            }
        }
        KeyCode::Char('d') => {
            if state.download_url.is_none() {
                state.info = "Results are not ready yet".into();
                return KeyOutcome::None;
            }
            match export::download_destination(output) {
                Ok(dest) => {
                    state.info = format!("Downloading to {}…", dest.display());
                    KeyOutcome::Send(UiCommand::Download(dest))
                }
                Err(e) => {
                    state.info = format!("Download failed: {e:#}");
                    KeyOutcome::None
                }
            }
        }
        KeyCode::Char('y') => {
            match state.download_url.as_deref() {
                Some(url) => match export::copy_to_clipboard(url) {
                    Ok(()) => state.info = "Copied download link to clipboard".into(),
                    Err(e) => state.info = format!("Clipboard error: {e:#}"),
                },
                None => state.info = "No download link yet".into(),
            }
            KeyOutcome::None
        }
        KeyCode::Tab => {
            state.tab = (state.tab + 1) % 2;
            KeyOutcome::None
        }
        KeyCode::Char('?') => {
            state.tab = 1;
            KeyOutcome::None
        }
        _ => KeyOutcome::None,
    }
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    output: Option<PathBuf>,
    mut event_rx: UnboundedReceiver<ControllerEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState::default();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep the UI responsive.
        let mut controller_gone = false;
        loop {
            match event_rx.try_recv() {
                Ok(ev) => apply_event(&mut state, ev),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    controller_gone = true;
                    break;
                }
            }
        }
        if controller_gone {
            break Ok(());
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match handle_key(&mut state, k.modifiers, k.code, output.as_ref()) {
                    KeyOutcome::None => {}
                    KeyOutcome::Send(cmd) => {
                        let _ = cmd_tx.send(cmd);
                    }
                    KeyOutcome::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Dashboard"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("batch-geocode"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_dashboard(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn draw_dashboard(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(7), // Session + results counters
                Constraint::Length(3), // Progress gauge
                Constraint::Length(4), // Current address + throughput sparkline
                Constraint::Min(5),    // Results log
                Constraint::Length(5), // Status
            ]
            .as_ref(),
        )
        .split(area);

    let top_row = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(main[0]);
    draw_session(top_row[0], f, state);
    draw_counters(top_row[1], f, state);

    draw_progress(main[1], f, state);

    let mid_row = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)].as_ref())
        .split(main[2]);
    let current = Paragraph::new(
        state
            .snapshot
            .current_address()
            .unwrap_or("-")
            .to_string(),
    )
    .block(Block::default().borders(Borders::ALL).title("Current address"));
    f.render_widget(current, mid_row[0]);
    f.render_widget(
        Sparkline::default()
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Rows per poll"),
            )
            .data(&state.processed_series)
            .style(Style::default().fg(Color::Cyan)),
        mid_row[1],
    );

    draw_log(main[3], f, state);
    draw_status(main[4], f, state);
}

fn draw_session(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines = vec![Line::from(vec![
        Span::styled("State:", Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            state.state.label(),
            Style::default()
                .fg(state_color(state.state))
                .add_modifier(Modifier::BOLD),
        ),
    ])];
    push_wrapped_status_kv(
        &mut lines,
        "File",
        state.filename.as_deref().unwrap_or("-"),
        area.width,
    );
    push_wrapped_status_kv(
        &mut lines,
        "Session",
        state.session_id.as_deref().unwrap_or("-"),
        area.width,
    );
    if let Some(m) = state.mapping.as_ref() {
        let columns = format!(
            "address={} city={} state={} zip={}",
            or_dash(&m.address),
            or_dash(&m.city),
            or_dash(&m.state),
            or_dash(&m.zip)
        );
        push_wrapped_status_kv(&mut lines, "Columns", &columns, area.width);
    } else if !state.headers.is_empty() {
        push_wrapped_status_kv(&mut lines, "Headers", &state.headers.join(", "), area.width);
    }
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Session"));
    f.render_widget(p, area);
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn draw_counters(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let s = &state.snapshot;
    let mut lines = vec![
        Line::from(vec![
            Span::styled("Processed:", Style::default().fg(Color::Gray)),
            Span::raw(format!(" {}", s.total_processed)),
        ]),
        Line::from(vec![
            Span::styled("Successful:", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(" {}", s.successful_geocodes),
                Style::default().fg(Color::Green),
            ),
            Span::raw("  "),
            Span::styled("Failed:", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(" {}", s.failed_geocodes),
                Style::default().fg(Color::Red),
            ),
        ]),
        Line::from(vec![
            Span::styled("Success rate:", Style::default().fg(Color::Gray)),
            Span::raw(format!(" {}%", state.success_rate)),
        ]),
    ];
    if let (Some(hits), Some(calls)) = (s.cache_hits, s.api_calls) {
        lines.push(Line::from(vec![
            Span::styled("Cache hits:", Style::default().fg(Color::Gray)),
            Span::raw(format!(" {hits}  ")),
            Span::styled("API calls:", Style::default().fg(Color::Gray)),
            Span::raw(format!(" {calls}")),
        ]));
    }
    if !s.cities_processed.is_empty() || !s.zip_codes_found.is_empty() {
        lines.push(Line::from(vec![
            Span::styled("Cities:", Style::default().fg(Color::Gray)),
            Span::raw(format!(" {}  ", s.cities_processed.len())),
            Span::styled("ZIP codes:", Style::default().fg(Color::Gray)),
            Span::raw(format!(" {}", s.zip_codes_found.len())),
        ]));
    }
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Results"));
    f.render_widget(p, area);
}

fn progress_label(state: &UiState) -> String {
    let elapsed = state.elapsed_secs();
    let mut label = format!("{}%", state.snapshot.clamped_percent());
    if let Some(rpm) = crate::metrics::rows_per_minute(state.snapshot.total_processed, elapsed) {
        label.push_str(&format!(" · {rpm:.0} rows/min"));
    }
    if state.state == SessionState::Running {
        if let Some(eta) =
            crate::metrics::estimated_remaining_secs(state.snapshot.progress_percent, elapsed)
        {
            label.push_str(&format!(
                " · ~{} left",
                humantime::format_duration(Duration::from_secs(eta))
            ));
        }
    }
    label
}

fn draw_progress(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(state_color(state.state)))
        .percent(state.snapshot.clamped_percent())
        .label(progress_label(state));
    f.render_widget(gauge, area);
}

fn draw_log(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let visible_rows = area.height.saturating_sub(2) as usize;
    let entries = state.log.entries();
    let start = state.log.scroll_to_newest(visible_rows);
    let lines: Vec<Line> = entries[start..]
        .iter()
        .map(|e| {
            Line::from(vec![
                Span::styled(e.timestamp.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::styled(e.message.clone(), log_kind_style(e.kind)),
            ])
        })
        .collect();
    let title = if state.log.total() > entries.len() {
        format!("Log (newest {} of {})", entries.len(), state.log.total())
    } else {
        "Log".to_string()
    };
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines: Vec<Line<'static>> = Vec::new();
    if let Some(n) = state.degraded {
        lines.push(Line::from(Span::styled(
            format!("Status unavailable for {n} polls in a row, still retrying"),
            Style::default().fg(Color::Yellow),
        )));
    }
    if !state.info.is_empty() {
        lines.push(Line::from(state.info.clone()));
    }
    if let Some(path) = state.summary.as_ref().and_then(|s| s.output_path.as_ref()) {
        push_wrapped_status_kv(&mut lines, "Saved", &path.display().to_string(), area.width);
    } else if let Some(url) = state.download_url.as_deref() {
        push_wrapped_status_kv(&mut lines, "Download", url, area.width);
    }
    let keys = match state.state {
        SessionState::Running => "s stop · q quit · ? help",
        SessionState::Completed => "d download · y copy link · r run again · q quit",
        _ => "r start · q quit · ? help",
    };
    lines.push(Line::from(Span::styled(
        keys,
        Style::default().fg(Color::Magenta),
    )));
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> UiState {
        UiState {
            state: SessionState::Running,
            ..Default::default()
        }
    }

    #[test]
    fn quit_while_processing_needs_confirmation() {
        let mut state = running();
        let first = handle_key(&mut state, KeyModifiers::NONE, KeyCode::Char('q'), None);
        assert!(matches!(first, KeyOutcome::None));
        assert!(state.quit_confirm);
        let second = handle_key(&mut state, KeyModifiers::CONTROL, KeyCode::Char('c'), None);
        assert!(matches!(second, KeyOutcome::Quit));
    }

    #[test]
    fn other_keys_cancel_pending_quit() {
        let mut state = running();
        handle_key(&mut state, KeyModifiers::NONE, KeyCode::Char('q'), None);
        handle_key(&mut state, KeyModifiers::NONE, KeyCode::Tab, None);
        assert!(!state.quit_confirm);
        let again = handle_key(&mut state, KeyModifiers::NONE, KeyCode::Char('q'), None);
        assert!(matches!(again, KeyOutcome::None));
    }

    #[test]
    fn quit_when_idle_is_immediate() {
        let mut state = UiState::default();
        let out = handle_key(&mut state, KeyModifiers::NONE, KeyCode::Char('q'), None);
        assert!(matches!(out, KeyOutcome::Quit));
    }

    #[test]
    fn stop_only_sent_while_processing() {
        let mut state = running();
        let out = handle_key(&mut state, KeyModifiers::NONE, KeyCode::Char('s'), None);
        assert!(matches!(out, KeyOutcome::Send(UiCommand::Stop)));
        assert_eq!(state.info, "Stopping…");

        let mut idle = UiState::default();
        let out = handle_key(&mut idle, KeyModifiers::NONE, KeyCode::Char('s'), None);
        assert!(matches!(out, KeyOutcome::None));
    }

    #[test]
    fn download_waits_for_link_and_uses_output_path() {
        let mut state = UiState {
            state: SessionState::Completed,
            ..Default::default()
        };
        let out = handle_key(&mut state, KeyModifiers::NONE, KeyCode::Char('d'), None);
        assert!(matches!(out, KeyOutcome::None));

        state.download_url = Some("http://x/download/a".into());
        let dest = PathBuf::from("/tmp/results.csv");
        match handle_key(&mut state, KeyModifiers::NONE, KeyCode::Char('d'), Some(&dest)) {
            KeyOutcome::Send(UiCommand::Download(p)) => assert_eq!(p, dest),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn label_includes_rate_once_rows_arrive() {
        let mut state = running();
        state.snapshot.progress_percent = 50.0;
        state.snapshot.total_processed = 30;
        state.run_elapsed_secs = Some(60.0);
        assert_eq!(progress_label(&state), "50% · 30 rows/min · ~1m left");
    }
}
