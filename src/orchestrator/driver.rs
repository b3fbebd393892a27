//! Run lifecycle driver.
//!
//! Owns the controller task: performs the initial upload and launch, services UI commands
//! and poll messages, and emits events for presentation layers.

use super::controller::Controller;
use super::post_process::process_run_completion;
use crate::error::ControllerError;
use crate::mapping;
use crate::model::{ColumnMapping, ControllerEvent, InfoEvent, RunConfig, RunSummary};
use crate::session::SessionState;
use anyhow::Result;
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Commands emitted by UI layers to control the session.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    /// Start processing, uploading first if no session is bound.
    Start,
    Stop,
    Download(PathBuf),
    Quit,
}

/// Mapping to submit: the stored one, else suggestions from the headers with CLI overrides.
fn mapping_for(ctl: &Controller, cfg: &RunConfig) -> ColumnMapping {
    match ctl.session() {
        Some(s) => s.mapping.clone().unwrap_or_else(|| {
            mapping::apply_overrides(mapping::auto_select(&s.headers), &cfg.column_overrides)
        }),
        None => ColumnMapping::default(),
    }
}

/// Upload (when unbound), configure and launch.
async fn begin_run(ctl: &mut Controller, cfg: &RunConfig) -> Result<(), ControllerError> {
    if ctl.state() == SessionState::Unbound {
        ctl.upload(&cfg.input).await?;
    }
    let mapping = mapping_for(ctl, cfg);
    if ctl.state() != SessionState::Configured {
        ctl.configure(mapping.clone())?;
    }
    ctl.launch(mapping).await
}

/// Await `fut` while still reading commands. Returns None when a quit arrives first, which
/// drops the pending request. Other commands received meanwhile are queued in `deferred`.
async fn unless_quit<F: Future>(
    fut: F,
    cmd_rx: &mut UnboundedReceiver<UiCommand>,
    deferred: &mut VecDeque<UiCommand>,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            cmd = cmd_rx.recv() => match cmd {
                Some(UiCommand::Quit) | None => return None,
                Some(other) => {
                    debug!(?other, "command queued behind a pending request");
                    deferred.push_back(other);
                }
            },
        }
    }
}

fn report_failure(event_tx: &UnboundedSender<ControllerEvent>, e: ControllerError) {
    if e.is_local() {
        info!("request rejected locally: {e}");
    } else {
        warn!("operation failed: {e}");
    }
    let _ = event_tx.send(ControllerEvent::Info(InfoEvent::OperationFailed(
        e.to_string(),
    )));
}

/// Run one command. Returns false when the driver should quit.
async fn handle_command(
    ctl: &mut Controller,
    cfg: &RunConfig,
    cmd: UiCommand,
    event_tx: &UnboundedSender<ControllerEvent>,
    cmd_rx: &mut UnboundedReceiver<UiCommand>,
    deferred: &mut VecDeque<UiCommand>,
) -> bool {
    match cmd {
        UiCommand::Start => {
            let res = unless_quit(begin_run(ctl, cfg), cmd_rx, deferred).await;
            match res {
                Some(Err(e)) => report_failure(event_tx, e),
                Some(Ok(())) => {}
                None => return false,
            }
        }
        UiCommand::Stop => {
            let res = unless_quit(ctl.stop(), cmd_rx, deferred).await;
            match res {
                Some(Err(e)) => report_failure(event_tx, e),
                Some(Ok(())) => {}
                None => return false,
            }
        }
        UiCommand::Download(dest) => {
            let res = unless_quit(ctl.download_to(&dest), cmd_rx, deferred).await;
            match res {
                Some(Ok(_)) => {
                    let _ = event_tx.send(ControllerEvent::Info(InfoEvent::Downloaded {
                        path: dest,
                    }));
                }
                Some(Err(e)) => report_failure(event_tx, e),
                None => return false,
            }
        }
        UiCommand::Quit => return false,
    }
    true
}

/// Drive one controller until quit, or until the run ends when `exit_on_finish` is set.
/// Returns the last run summary. A quit is honored even while a request is pending.
pub(crate) async fn run_controller(
    cfg: &RunConfig,
    exit_on_finish: bool,
    event_tx: UnboundedSender<ControllerEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<RunSummary> {
    let (mut ctl, mut poll_rx) = Controller::new(cfg, event_tx.clone())?;
    let mut deferred: VecDeque<UiCommand> = VecDeque::new();
    let mut last_summary: Option<RunSummary> = None;

    let res = 'run: {
        let first = unless_quit(begin_run(&mut ctl, cfg), &mut cmd_rx, &mut deferred).await;
        match first {
            Some(Ok(())) => {}
            Some(Err(e)) if exit_on_finish => {
                ctl.teardown();
                return Err(e.into());
            }
            Some(Err(e)) => report_failure(&event_tx, e),
            None => break 'run Ok(()),
        }

        loop {
            let before = ctl.state();

            if let Some(cmd) = deferred.pop_front() {
                if !handle_command(&mut ctl, cfg, cmd, &event_tx, &mut cmd_rx, &mut deferred).await
                {
                    break 'run Ok(());
                }
            } else {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break 'run Ok(()) };
                        if !handle_command(&mut ctl, cfg, cmd, &event_tx, &mut cmd_rx, &mut deferred).await {
                            break 'run Ok(());
                        }
                    }
                    Some(msg) = poll_rx.recv() => ctl.handle_poll(msg),
                }
            }

            let after = ctl.state();
            if after != before && after.is_terminal() {
                info!("run finished in state {:?}", after);
                let processed = unless_quit(
                    process_run_completion(&ctl, cfg),
                    &mut cmd_rx,
                    &mut deferred,
                )
                .await;
                let Some(processed) = processed else {
                    break 'run Ok(());
                };
                for msg in processed.messages {
                    let _ = event_tx.send(ControllerEvent::Info(InfoEvent::Message(msg)));
                }
                let _ = event_tx.send(ControllerEvent::RunFinished {
                    summary: Box::new(processed.summary.clone()),
                });
                last_summary = Some(processed.summary);
                if exit_on_finish {
                    break 'run Ok(());
                }
            }
        }
    };

    ctl.teardown();
    res.map(|()| last_summary.unwrap_or_else(|| ctl.summary()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str, input: PathBuf, output: Option<PathBuf>) -> RunConfig {
        RunConfig {
            base_url: base_url.to_string(),
            input,
            column_overrides: Default::default(),
            poll_interval: Duration::from_millis(20),
            poll_failure_threshold: 10,
            request_timeout: None,
            output,
            user_agent: "batch-geocode-test".into(),
        }
    }

    async fn mount_service(server: &MockServer, headers: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session_id": "sess-9",
                "headers": headers
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/stop/sess-9"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn headless_run_completes_and_downloads() {
        let server = MockServer::start().await;
        mount_service(&server, serde_json::json!(["Address", "City", "State", "Zip"])).await;
        Mock::given(method("GET"))
            .and(path("/status/sess-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "progress_percent": 100,
                "total_processed": 10,
                "successful_geocodes": 7,
                "failed_geocodes": 3,
                "processing_complete": true,
                "results_log": []
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download/sess-9"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Address,City,State,Zip\n"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("addresses.csv");
        std::fs::write(&input, "Address,City,State,Zip\n").unwrap();
        let output = dir.path().join("out.csv");
        let cfg = config(&server.uri(), input, Some(output.clone()));

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            run_controller(&cfg, true, event_tx, cmd_rx),
        )
        .await
        .expect("run finished")
        .unwrap();

        assert_eq!(summary.state, SessionState::Completed);
        assert_eq!(summary.success_rate, 70);
        assert_eq!(summary.output_path.as_deref(), Some(output.as_path()));
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "Address,City,State,Zip\n"
        );

        let mut finished = false;
        while let Ok(ev) = event_rx.try_recv() {
            if matches!(ev, ControllerEvent::RunFinished { .. }) {
                finished = true;
            }
        }
        assert!(finished);
    }

    #[tokio::test]
    async fn headless_stop_command_ends_run_as_stopped() {
        let server = MockServer::start().await;
        mount_service(&server, serde_json::json!(["Address", "City", "State", "Zip"])).await;
        Mock::given(method("GET"))
            .and(path("/status/sess-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "progress_percent": 20,
                "total_processed": 2,
                "successful_geocodes": 2,
                "failed_geocodes": 0,
                "processing_complete": false,
                "results_log": []
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("addresses.csv");
        std::fs::write(&input, "Address,City,State,Zip\n").unwrap();
        let cfg = config(&server.uri(), input, None);

        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        cmd_tx.send(UiCommand::Stop).unwrap();
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            run_controller(&cfg, true, event_tx, cmd_rx),
        )
        .await
        .expect("run finished")
        .unwrap();

        assert_eq!(summary.state, SessionState::Stopped);
        assert_eq!(summary.download_url, None);
    }

    #[tokio::test]
    async fn quit_is_honored_while_stop_request_hangs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session_id": "sess-9",
                "headers": ["Address", "City", "State", "Zip"]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/process"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/stop/sess-9"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status/sess-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "progress_percent": 20,
                "total_processed": 2,
                "successful_geocodes": 2,
                "failed_geocodes": 0,
                "processing_complete": false,
                "results_log": []
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("addresses.csv");
        std::fs::write(&input, "Address,City,State,Zip\n").unwrap();
        let cfg = config(&server.uri(), input, None);

        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(async move { run_controller(&cfg, true, event_tx, cmd_rx).await });

        cmd_tx.send(UiCommand::Stop).unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.url.path() == "/stop/sess-9") {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "stop request never sent");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cmd_tx.send(UiCommand::Quit).unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(3), driver)
            .await
            .expect("driver returned while stop was pending")
            .unwrap()
            .unwrap();
        assert_eq!(summary.state, SessionState::Running);
    }

    #[tokio::test]
    async fn headless_run_fails_fast_on_unmappable_headers() {
        let server = MockServer::start().await;
        mount_service(&server, serde_json::json!(["Name", "Phone"])).await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("contacts.csv");
        std::fs::write(&input, "Name,Phone\n").unwrap();
        let cfg = config(&server.uri(), input, None);

        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let err = run_controller(&cfg, true, event_tx, cmd_rx)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Please select a column for"));
    }
}
