use crate::model::{ColumnOverrides, ControllerEvent, InfoEvent, LogEntry, RunConfig};
use crate::orchestrator::{run_controller, UiCommand};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "batch-geocode",
    version,
    about = "Upload a CSV to a batch geocoding service and follow its progress"
)]
pub struct Cli {
    /// CSV file to geocode
    pub file: PathBuf,

    /// Base URL of the geocoding service
    #[arg(long, env = "GEOCODER_URL", default_value = "http://localhost:5000")]
    pub base_url: String,

    /// Column holding the street address (auto-detected when omitted)
    #[arg(long)]
    pub address_column: Option<String>,

    /// Column holding the city (auto-detected when omitted)
    #[arg(long)]
    pub city_column: Option<String>,

    /// Column holding the state (auto-detected when omitted)
    #[arg(long)]
    pub state_column: Option<String>,

    /// Column holding the ZIP code (auto-detected when omitted)
    #[arg(long)]
    pub zip_column: Option<String>,

    /// Interval between status polls
    #[arg(long, env = "GEOCODER_POLL_INTERVAL", default_value = "1s")]
    pub poll_interval: humantime::Duration,

    /// Warn after this many consecutive failed status polls (0 disables the warning)
    #[arg(long, default_value_t = 10)]
    pub poll_failure_threshold: u32,

    /// Timeout for each HTTP request (no timeout by default)
    #[arg(long)]
    pub request_timeout: Option<humantime::Duration>,

    /// Save the geocoded CSV here once processing completes
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print JSON summary and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print progress and a text summary (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Write logs to this file (TUI mode logs to the cache directory by default)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn is_tui(&self) -> bool {
        cfg!(feature = "tui") && !self.json && !self.text && !self.silent
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if args.is_tui() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
    }

    run_headless(args).await
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        base_url: args.base_url.clone(),
        input: args.file.clone(),
        column_overrides: ColumnOverrides {
            address: args.address_column.clone(),
            city: args.city_column.clone(),
            state: args.state_column.clone(),
            zip: args.zip_column.clone(),
        },
        poll_interval: Duration::from(args.poll_interval),
        poll_failure_threshold: args.poll_failure_threshold,
        request_timeout: args.request_timeout.map(Duration::from),
        output: args.output.clone(),
        user_agent: format!("batch-geocode/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Tracks which server log lines were already printed in text mode.
#[derive(Default)]
struct LogCursor {
    printed: usize,
}

impl LogCursor {
    /// Entries of the window that were not printed yet, given the full server log length.
    fn fresh<'a>(&mut self, entries: &'a [LogEntry], total: usize) -> &'a [LogEntry] {
        if total < self.printed {
            // Server log restarted (new run).
            self.printed = 0;
        }
        let window_start = total.saturating_sub(entries.len());
        let skip = self.printed.saturating_sub(window_start).min(entries.len());
        self.printed = total;
        &entries[skip..]
    }
}

/// Render a controller event as a progress line for text mode.
fn event_line(ev: &ControllerEvent, cursor: &mut LogCursor) -> Vec<String> {
    match ev {
        ControllerEvent::SessionBound {
            session_id,
            filename,
            headers,
            ..
        } => vec![format!(
            "Uploaded {filename} (session {session_id}, columns: {})",
            headers.join(", ")
        )],
        ControllerEvent::StateChanged { from, to } => {
            vec![format!("== {} -> {} ==", from.label(), to.label())]
        }
        ControllerEvent::MappingApplied { mapping } => vec![format!(
            "Columns: address={} city={} state={} zip={}",
            mapping.address, mapping.city, mapping.state, mapping.zip
        )],
        ControllerEvent::Progress {
            snapshot,
            success_rate,
        } => {
            let mut line = format!(
                "[{:>3}%] processed {} | ok {} | failed {} | success {}%",
                snapshot.clamped_percent(),
                snapshot.total_processed,
                snapshot.successful_geocodes,
                snapshot.failed_geocodes,
                success_rate
            );
            if let Some(addr) = snapshot.current_address() {
                line.push_str(&format!(" | {addr}"));
            }
            vec![line]
        }
        ControllerEvent::LogUpdated { entries, total } => cursor
            .fresh(entries, *total)
            .iter()
            .map(|e| format!("  {} {}", e.timestamp, e.message))
            .collect(),
        ControllerEvent::PollDegraded {
            consecutive_failures,
        } => vec![format!(
            "Warning: status unavailable for {consecutive_failures} polls in a row, still retrying"
        )],
        ControllerEvent::Completed { download_url } => {
            vec![format!("Processing complete. Download: {download_url}")]
        }
        ControllerEvent::Info(info) => vec![info.to_message()],
        ControllerEvent::Stopped | ControllerEvent::RunFinished { .. } => Vec::new(),
    }
}

async fn run_headless(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<ControllerEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let driver_cfg = cfg.clone();
    let handle =
        tokio::spawn(async move { run_controller(&driver_cfg, true, evt_tx, cmd_rx).await });

    // First Ctrl-C asks the service to stop; a second one quits without waiting.
    let mut interrupts = 0u32;
    let mut cursor = LogCursor::default();
    loop {
        tokio::select! {
            ev = evt_rx.recv() => {
                let Some(ev) = ev else { break };
                if args.text {
                    if let Some(tx) = out_tx.as_ref() {
                        for line in event_line(&ev, &mut cursor) {
                            let _ = tx.send(OutputLine::Stderr(line));
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                interrupts += 1;
                if interrupts == 1 {
                    let _ = cmd_tx.send(UiCommand::Stop);
                    if let Some(tx) = out_tx.as_ref() {
                        let _ = tx.send(OutputLine::Stderr(
                            InfoEvent::StopRequested.to_message()
                                + " (press Ctrl-C again to quit without waiting)",
                        ));
                    }
                } else {
                    let _ = cmd_tx.send(UiCommand::Quit);
                }
            }
        }
    }

    let summary = handle
        .await
        .context("controller task failed")?
        .context("geocoding run failed")?;

    if let Some(tx) = out_tx.as_ref() {
        if args.json {
            let out = serde_json::to_string_pretty(&summary)?;
            let _ = tx.send(OutputLine::Stdout(out));
        } else {
            for line in crate::text_summary::build_text_summary(&summary).lines {
                let _ = tx.send(OutputLine::Stdout(line));
            }
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogKind, ProgressSnapshot};
    use crate::session::SessionState;

    fn entries(range: std::ops::Range<usize>) -> Vec<LogEntry> {
        range
            .map(|i| LogEntry {
                timestamp: "12:00:00".into(),
                message: format!("row {i}"),
                kind: LogKind::Success,
            })
            .collect()
    }

    #[test]
    fn config_comes_from_flags() {
        let args = Cli::parse_from([
            "batch-geocode",
            "addresses.csv",
            "--base-url",
            "http://geo.local:8080",
            "--zip-column",
            "Postal",
            "--poll-interval",
            "250ms",
            "--request-timeout",
            "30s",
            "-o",
            "out.csv",
        ]);
        let cfg = build_config(&args);
        assert_eq!(cfg.base_url, "http://geo.local:8080");
        assert_eq!(cfg.input, PathBuf::from("addresses.csv"));
        assert_eq!(cfg.column_overrides.zip.as_deref(), Some("Postal"));
        assert_eq!(cfg.column_overrides.city, None);
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.output, Some(PathBuf::from("out.csv")));
        assert_eq!(cfg.poll_failure_threshold, 10);
    }

    #[test]
    fn default_poll_interval_is_one_second() {
        let args = Cli::parse_from(["batch-geocode", "a.csv", "--base-url", "http://x"]);
        assert_eq!(build_config(&args).poll_interval, Duration::from_secs(1));
        assert_eq!(build_config(&args).request_timeout, None);
    }

    #[tokio::test]
    async fn silent_requires_json() {
        let args = Cli::parse_from(["batch-geocode", "a.csv", "--silent"]);
        assert!(run(args).await.is_err());
    }

    #[test]
    fn log_cursor_prints_each_line_once() {
        let mut cursor = LogCursor::default();
        assert_eq!(cursor.fresh(&entries(0..3), 3).len(), 3);
        assert!(cursor.fresh(&entries(0..3), 3).is_empty());

        // Window slid by 60: only the 10 unseen lines at the end are new.
        let window = entries(13..63);
        let fresh = cursor.fresh(&window[..], 63);
        assert_eq!(fresh.len(), 50);
        let window = entries(23..73);
        let fresh = cursor.fresh(&window[..], 73);
        assert_eq!(fresh.len(), 10);
        assert_eq!(fresh[0].message, "row 63");
    }

    #[test]
    fn progress_line_shows_counts_and_rate() {
        let ev = ControllerEvent::Progress {
            snapshot: Box::new(ProgressSnapshot {
                progress_percent: 10.0,
                total_processed: 10,
                successful_geocodes: 7,
                failed_geocodes: 3,
                current_address: Some("1 MAIN ST".into()),
                ..Default::default()
            }),
            success_rate: 70,
        };
        let lines = event_line(&ev, &mut LogCursor::default());
        assert_eq!(
            lines,
            vec!["[ 10%] processed 10 | ok 7 | failed 3 | success 70% | 1 MAIN ST".to_string()]
        );

        let ev = ControllerEvent::StateChanged {
            from: SessionState::Running,
            to: SessionState::Stopped,
        };
        assert_eq!(
            event_line(&ev, &mut LogCursor::default()),
            vec!["== Processing -> Stopped ==".to_string()]
        );
    }
}
