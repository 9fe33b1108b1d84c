//! Live data poller.
//! Fetches a snapshot immediately and then on every interval tick, publishing
//! `{data, loading, error}` through a watch channel.
//!
//! Ticks spawn their fetch, so a slow fetch can overlap the next tick. Each fetch carries a
//! sequence number and a result is only applied when it is newer than the last applied
//! one. A failed fetch keeps the previous snapshot and only sets `error`.
//! After `stop`/`shutdown` (or drop) no fetch is issued and no state is published.

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::snapshot::LiveSnapshot;
use crate::source::{SnapshotSource, SourceError};

/// `tokio::time::interval` panics on a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PollState {
    pub data: Option<Arc<LiveSnapshot>>,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for PollState {
    fn default() -> Self {
        Self {
            data: None,
            loading: true,
            error: None,
        }
    }
}

struct Shared {
    source: Arc<dyn SnapshotSource>,
    state: watch::Sender<PollState>,
    cancel: CancellationToken,
    issued: AtomicU64,
    applied: AtomicU64,
}

impl Shared {
    fn issue(self: &Arc<Self>) {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = shared.cancel.cancelled() => return,
                outcome = shared.source.fetch() => outcome,
            };
            shared.apply(seq, outcome);
        });
    }

    fn apply(&self, seq: u64, outcome: Result<LiveSnapshot, SourceError>) {
        self.state.send_if_modified(|state| {
            // Runs under the channel lock, so the check and the write are one step
            if self.cancel.is_cancelled() {
                return false;
            }
            if seq <= self.applied.load(Ordering::SeqCst) {
                debug!("Discarding stale poll result #{}", seq);
                return false;
            }
            self.applied.store(seq, Ordering::SeqCst);

            match outcome {
                Ok(snapshot) => {
                    debug!(
                        "Poll #{}: {} with {} drivers",
                        seq,
                        snapshot.status,
                        snapshot.drivers.len()
                    );
                    state.data = Some(Arc::new(snapshot));
                    state.error = None;
                }
                Err(e) => {
                    warn!("Poll #{} from {} failed: {}", seq, self.source.describe(), e);
                    state.error = Some(e.to_string());
                }
            }
            state.loading = false;
            true
        });
    }
}

async fn run(shared: Arc<Shared>, refetch: Arc<Notify>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = refetch.notified() => {
                debug!("Out-of-band refetch");
                shared.issue();
            }
            _ = ticker.tick() => shared.issue(),
        }
    }
    debug!("Poll loop for {} stopped", shared.source.describe());
}

pub struct Poller {
    shared: Arc<Shared>,
    refetch: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl Poller {
    /// Starts polling `source` every `period`. The first fetch is issued right away.
    /// A zero period is raised to 1ms. Must be called inside a tokio runtime.
    pub fn spawn(source: Arc<dyn SnapshotSource>, period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        info!("Polling {} every {:?}", source.describe(), period);
        let (state, _) = watch::channel(PollState::default());
        let shared = Arc::new(Shared {
            source,
            state,
            cancel: CancellationToken::new(),
            issued: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        });
        let refetch = Arc::new(Notify::new());
        let task = tokio::spawn(run(Arc::clone(&shared), Arc::clone(&refetch), period));
        Self {
            shared,
            refetch,
            task: Some(task),
        }
    }

    pub fn state(&self) -> PollState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.shared.state.subscribe()
    }

    /// Issues an immediate fetch without touching the interval timer.
    pub fn refetch(&self) {
        self.refetch.notify_one();
    }

    pub fn is_running(&self) -> bool {
        !self.shared.cancel.is_cancelled()
    }

    /// Stops ticking and discards in-flight results. Once this returns the published state
    /// no longer changes.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
        // Wait out an update that took the channel lock before the cancel landed
        self.shared.state.send_if_modified(|_| false);
    }

    /// `stop`, then wait for the poll loop to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Poll loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
