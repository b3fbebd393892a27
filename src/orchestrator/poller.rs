//! Recurring status ticker.
//!
//! The ticker only produces `Tick`s; the controller decides whether a tick fetches
//! anything. Fetches run as their own tasks so a slow response never delays the timer,
//! and their results come back over the same channel in completion order.

use crate::error::ControllerError;
use crate::model::ProgressSnapshot;
use crate::service::GeocoderClient;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Messages delivered to the controller task.
#[derive(Debug)]
pub(crate) enum PollMsg {
    Tick {
        generation: u64,
    },
    Fetched {
        seq: u64,
        session_id: String,
        result: Result<ProgressSnapshot, ControllerError>,
    },
}

/// Decrements the live-ticker count when the ticker future is dropped, including abort.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owned handle to the one recurring ticker of a controller.
pub(crate) struct Poller {
    period: Duration,
    generation: u64,
    token: Option<CancellationToken>,
    ticker: Option<JoinHandle<()>>,
    fetches: JoinSet<()>,
    live: Arc<AtomicUsize>,
}

impl Poller {
    pub fn new(period: Duration) -> Self {
        Self {
            // A zero period would make `interval` panic.
            period: period.max(Duration::from_millis(1)),
            generation: 0,
            token: None,
            ticker: None,
            fetches: JoinSet::new(),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start ticking, replacing any ticker that is still running.
    /// The first tick fires one period after the start.
    pub fn start(&mut self, tx: UnboundedSender<PollMsg>) {
        self.stop();
        self.generation += 1;

        let generation = self.generation;
        let period = self.period;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let guard = LiveGuard::new(self.live.clone());

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(PollMsg::Tick { generation }).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(generation, "poll ticker exited");
        });

        self.token = Some(token);
        self.ticker = Some(handle);
        debug!(generation, period_ms = period.as_millis() as u64, "poll ticker started");
    }

    /// Clear the recurring tick. In-flight fetches are left to finish.
    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }

    /// Stop ticking and drop any fetch still in flight.
    pub fn shutdown(&mut self) {
        self.stop();
        self.fetches.abort_all();
    }

    pub fn is_active(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Generation of the current (or last) ticker; ticks from older ones are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Ticker tasks that have not exited yet.
    #[cfg(test)]
    pub fn live_tickers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Fetch one status snapshot in the background and report it as `Fetched`.
    pub fn spawn_fetch(
        &mut self,
        client: GeocoderClient,
        session_id: String,
        seq: u64,
        tx: UnboundedSender<PollMsg>,
    ) {
        // Reap finished fetches so the set does not grow over a long run.
        while self.fetches.try_join_next().is_some() {}

        self.fetches.spawn(async move {
            let result = client.fetch_status(&session_id).await;
            let _ = tx.send(PollMsg::Fetched {
                seq,
                session_id,
                result,
            });
        });
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.fetches.len()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = Poller::new(Duration::from_secs(1));
        poller.start(tx);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(rx.recv().await, Some(PollMsg::Tick { generation: 1 })));
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_live_ticker_across_restarts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = Poller::new(Duration::from_millis(100));

        for round in 1..=5u64 {
            poller.start(tx.clone());
            settle().await;
            assert_eq!(poller.live_tickers(), 1, "round {round}");
            assert!(poller.is_active());
            assert_eq!(poller.generation(), round);

            if round % 2 == 0 {
                poller.stop();
                settle().await;
                assert_eq!(poller.live_tickers(), 0);
                assert!(!poller.is_active());
            }
        }

        // Only the newest generation is still ticking.
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(350)).await;
        let mut generations = Vec::new();
        while let Ok(PollMsg::Tick { generation }) = rx.try_recv() {
            generations.push(generation);
        }
        assert!(!generations.is_empty());
        assert!(generations.iter().all(|g| *g == 5));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_ticks_and_drop_releases_ticker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let live = {
            let mut poller = Poller::new(Duration::from_millis(100));
            poller.start(tx);
            tokio::time::sleep(Duration::from_millis(150)).await;
            assert!(matches!(rx.try_recv(), Ok(PollMsg::Tick { .. })));

            poller.stop();
            tokio::time::sleep(Duration::from_millis(500)).await;
            assert!(rx.try_recv().is_err());

            poller.start(mpsc::unbounded_channel().0);
            settle().await;
            assert_eq!(poller.live_tickers(), 1);
            poller.live.clone()
        };
        settle().await;
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
