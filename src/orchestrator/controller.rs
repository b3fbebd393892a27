//! Session controller.
//!
//! One `Controller` owns the single session of a client together with its polling state.
//! Every operation that mutates either goes through `&mut self`, so the controller task
//! is the only writer and state is consistent between network awaits.

use super::poller::{PollMsg, Poller};
use crate::error::ControllerError;
use crate::log_view::LogWindow;
use crate::mapping;
use crate::metrics;
use crate::model::{ColumnMapping, ControllerEvent, InfoEvent, ProgressSnapshot, RunConfig, RunSummary};
use crate::service::{self, GeocoderClient};
use crate::session::{next_state, Session, SessionState, Transition};
use anyhow::Result;
use std::path::Path;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

pub(crate) struct Controller {
    client: GeocoderClient,
    base_url: String,
    session: Option<Session>,
    poller: Poller,
    poll_tx: UnboundedSender<PollMsg>,
    event_tx: UnboundedSender<ControllerEvent>,
    snapshot: Option<ProgressSnapshot>,
    log: LogWindow,
    /// Sequence number handed to the latest status fetch.
    next_seq: u64,
    /// Sequence number of the newest snapshot applied; older responses are dropped.
    applied_seq: u64,
    consecutive_failures: u32,
    failure_threshold: u32,
}

impl Controller {
    /// Build a controller; the returned receiver must be fed back into [`Controller::handle_poll`].
    pub fn new(
        cfg: &RunConfig,
        event_tx: UnboundedSender<ControllerEvent>,
    ) -> Result<(Self, UnboundedReceiver<PollMsg>)> {
        let client = GeocoderClient::new(cfg)?;
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let ctl = Self {
            client,
            base_url: cfg.base_url.clone(),
            session: None,
            poller: Poller::new(cfg.poll_interval),
            poll_tx,
            event_tx,
            snapshot: None,
            log: LogWindow::default(),
            next_seq: 0,
            applied_seq: 0,
            consecutive_failures: 0,
            failure_threshold: cfg.poll_failure_threshold,
        };
        Ok((ctl, poll_rx))
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Unbound, |s| s.state)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Option<&ProgressSnapshot> {
        self.snapshot.as_ref()
    }

    /// True while the recurring status tick is live.
    #[cfg(test)]
    pub(crate) fn is_processing(&self) -> bool {
        self.poller.is_active()
    }

    #[cfg(test)]
    pub(crate) fn poller(&self) -> &Poller {
        &self.poller
    }

    fn emit(&self, ev: ControllerEvent) {
        let _ = self.event_tx.send(ev);
    }

    fn emit_transition(&self, t: Option<Transition>) {
        if let Some(t) = t {
            info!("session state {:?} -> {:?}", t.from, t.to);
            self.emit(ControllerEvent::StateChanged {
                from: t.from,
                to: t.to,
            });
        }
    }

    /// Drop the current session, if any, and its polling.
    fn unbind(&mut self) {
        self.poller.shutdown();
        if let Some(old) = self.session.take() {
            debug!(session = %old.id, "session replaced");
            self.emit_transition(Some(Transition {
                from: old.state,
                to: SessionState::Unbound,
            }));
        }
        self.snapshot = None;
        self.log.clear();
        self.consecutive_failures = 0;
        self.applied_seq = self.next_seq;
    }

    /// Upload `path` and bind the returned session, replacing any previous one.
    pub async fn upload(&mut self, path: &Path) -> Result<&Session, ControllerError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !service::is_accepted_file(&name) {
            return Err(ControllerError::Validation(
                "Please upload a CSV file".to_string(),
            ));
        }

        self.unbind();
        self.emit(ControllerEvent::Info(InfoEvent::Uploading {
            filename: name.clone(),
        }));

        let resp = self.client.upload(path).await?;
        let filename = resp.filename.unwrap_or(name);
        let suggested = mapping::auto_select(&resp.headers);
        info!(
            session = %resp.session_id,
            columns = resp.headers.len(),
            "uploaded {}",
            filename
        );

        self.emit(ControllerEvent::SessionBound {
            session_id: resp.session_id.clone(),
            filename: filename.clone(),
            headers: resp.headers.clone(),
            suggested,
        });
        self.emit_transition(Some(Transition {
            from: SessionState::Unbound,
            to: SessionState::Uploaded,
        }));

        let session = self
            .session
            .insert(Session::uploaded(resp.session_id, filename, resp.headers));
        Ok(&*session)
    }

    /// Validate and store a mapping, making the session ready to start.
    pub fn configure(&mut self, mapping: ColumnMapping) -> Result<(), ControllerError> {
        let session = self.session.as_mut().ok_or_else(|| {
            ControllerError::Validation("Upload a CSV file first".to_string())
        })?;
        if session.is_running() {
            return Err(ControllerError::Validation(
                "Processing is already running".to_string(),
            ));
        }
        mapping::validate(&mapping)?;
        mapping::check_headers(&mapping, &session.headers)?;

        session.mapping = Some(mapping.clone());
        let t = session.transition_to(SessionState::Configured);
        self.emit(ControllerEvent::MappingApplied { mapping });
        self.emit_transition(t);
        Ok(())
    }

    /// Submit `mapping` and start polling. On failure the session keeps its state.
    pub async fn launch(&mut self, mapping: ColumnMapping) -> Result<(), ControllerError> {
        let session = self.session.as_ref().ok_or_else(|| {
            ControllerError::Validation("Upload a CSV file first".to_string())
        })?;
        if session.is_running() || self.poller.is_active() {
            return Err(ControllerError::Validation(
                "Processing is already running".to_string(),
            ));
        }
        if !session.state.can_launch() {
            return Err(ControllerError::Validation(format!(
                "Cannot start processing from state {:?}",
                session.state
            )));
        }
        mapping::validate(&mapping)?;
        mapping::check_headers(&mapping, &session.headers)?;

        let session_id = session.id.clone();
        self.client.start_processing(&session_id, &mapping).await?;

        // Responses still in flight from an earlier run belong to the old progress.
        self.applied_seq = self.next_seq;
        self.snapshot = None;
        self.log.clear();
        self.consecutive_failures = 0;

        let t = self.session.as_mut().and_then(|s| {
            s.mapping = Some(mapping.clone());
            s.transition_to(SessionState::Running)
        });
        self.emit(ControllerEvent::MappingApplied { mapping });
        self.emit_transition(t);
        self.poller.start(self.poll_tx.clone());
        self.emit(ControllerEvent::Info(InfoEvent::Launched { session_id }));
        Ok(())
    }

    /// Ask the service to stop. Polling only ends once the service confirms.
    pub async fn stop(&mut self) -> Result<(), ControllerError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        let session_id = session.id.clone();
        self.emit(ControllerEvent::Info(InfoEvent::StopRequested));

        if let Err(e) = self.client.stop(&session_id).await {
            warn!(session = %session_id, "stop request failed: {e}");
            return Err(e);
        }

        self.poller.stop();
        let t = self.session.as_mut().and_then(|s| {
            if s.state == SessionState::Completed {
                None
            } else {
                s.transition_to(SessionState::Stopped)
            }
        });
        let stopped = t.is_some();
        self.emit_transition(t);
        if stopped {
            self.emit(ControllerEvent::Info(InfoEvent::StoppedByUser));
            self.emit(ControllerEvent::Stopped);
        }
        Ok(())
    }

    /// React to a ticker tick or a finished status fetch.
    pub fn handle_poll(&mut self, msg: PollMsg) {
        match msg {
            PollMsg::Tick { generation } => {
                if generation != self.poller.generation() || !self.poller.is_active() {
                    debug!(generation, "stale tick ignored");
                    return;
                }
                let Some(session) = self.session.as_ref().filter(|s| s.is_running()) else {
                    debug!("tick ignored: session not running");
                    return;
                };
                let session_id = session.id.clone();
                self.next_seq += 1;
                debug!(seq = self.next_seq, "status fetch");
                self.poller.spawn_fetch(
                    self.client.clone(),
                    session_id,
                    self.next_seq,
                    self.poll_tx.clone(),
                );
            }
            PollMsg::Fetched {
                seq,
                session_id,
                result,
            } => {
                if self.session.as_ref().map(|s| s.id.as_str()) != Some(session_id.as_str()) {
                    debug!(seq, "dropping status for a replaced session");
                    return;
                }
                match result {
                    Ok(snapshot) => self.apply_snapshot(seq, snapshot),
                    Err(e) => self.record_poll_failure(seq, e),
                }
            }
        }
    }

    fn apply_snapshot(&mut self, seq: u64, snapshot: ProgressSnapshot) {
        if seq <= self.applied_seq {
            debug!(seq, applied = self.applied_seq, "out-of-order status dropped");
            return;
        }
        self.applied_seq = seq;
        self.consecutive_failures = 0;

        if self.log.reconcile(&snapshot.results_log) {
            self.emit(ControllerEvent::LogUpdated {
                entries: self.log.entries().to_vec(),
                total: self.log.total(),
            });
        }
        self.emit(ControllerEvent::Progress {
            snapshot: Box::new(snapshot.clone()),
            success_rate: metrics::success_rate(
                snapshot.successful_geocodes,
                snapshot.failed_geocodes,
            ),
        });

        let t = self.session.as_mut().and_then(|s| {
            let next = next_state(s.state, &snapshot);
            s.transition_to(next)
        });
        self.snapshot = Some(snapshot);

        if let Some(t) = t {
            self.emit_transition(Some(t));
            if t.to == SessionState::Completed {
                self.poller.stop();
                if let Some(url) = self.download_url() {
                    info!("processing complete, results at {url}");
                    self.emit(ControllerEvent::Completed { download_url: url });
                }
            }
        }
    }

    fn record_poll_failure(&mut self, seq: u64, e: ControllerError) {
        if !self.session.as_ref().is_some_and(|s| s.is_running()) {
            debug!(seq, "status failure after session ended: {e}");
            return;
        }
        if seq <= self.applied_seq {
            debug!(seq, applied = self.applied_seq, "failure of a superseded fetch ignored");
            return;
        }
        self.consecutive_failures += 1;
        warn!(
            seq,
            consecutive = self.consecutive_failures,
            "status poll failed, retrying on next tick: {e}"
        );
        if self.failure_threshold > 0 && self.consecutive_failures == self.failure_threshold {
            self.emit(ControllerEvent::PollDegraded {
                consecutive_failures: self.consecutive_failures,
            });
        }
    }

    /// Result download link, available once processing has completed.
    pub fn download_url(&self) -> Option<String> {
        self.session
            .as_ref()
            .filter(|s| s.state == SessionState::Completed)
            .map(|s| self.client.download_url(&s.id))
    }

    /// Save the finished result file to `dest`.
    pub async fn download_to(&self, dest: &Path) -> Result<u64, ControllerError> {
        let session = self
            .session
            .as_ref()
            .filter(|s| s.state == SessionState::Completed)
            .ok_or_else(|| {
                ControllerError::Validation("Results are available once processing completes".into())
            })?;
        self.client.download_to(&session.id, dest).await
    }

    /// Release polling resources; the session stays bound for reporting.
    pub fn teardown(&mut self) {
        if self.poller.is_active() {
            info!("controller teardown while polling; ticker cleared");
        }
        self.poller.shutdown();
    }

    pub fn summary(&self) -> RunSummary {
        let snap = self.snapshot.clone().unwrap_or_default();
        RunSummary {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            base_url: self.base_url.clone(),
            session_id: self.session.as_ref().map(|s| s.id.clone()),
            filename: self.session.as_ref().map(|s| s.filename.clone()),
            state: self.state(),
            mapping: self.session.as_ref().and_then(|s| s.mapping.clone()),
            progress_percent: snap.progress_percent,
            total_processed: snap.total_processed,
            successful_geocodes: snap.successful_geocodes,
            failed_geocodes: snap.failed_geocodes,
            success_rate: metrics::success_rate(snap.successful_geocodes, snap.failed_geocodes),
            cache_hits: snap.cache_hits,
            api_calls: snap.api_calls,
            cities_processed: snap.cities_processed.len(),
            zip_codes_found: snap.zip_codes_found.len(),
            download_url: self.download_url(),
            output_path: None,
        }
    }
}
