use super::monitor::{ChangeMonitor, ExitReason};
use super::sync::PairRoots;
use crate::error::{MirrorError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Initializing,
    Watching,
    Stopped,
    SourceRemoved,
    Failed(String),
    /// The worker thread ended without reporting why (it panicked)
    Crashed,
}

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, WorkerStatus::Initializing | WorkerStatus::Watching)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Initializing => write!(f, "initializing"),
            WorkerStatus::Watching => write!(f, "watching"),
            WorkerStatus::Stopped => write!(f, "stopped"),
            WorkerStatus::SourceRemoved => write!(f, "source removed"),
            WorkerStatus::Failed(reason) => write!(f, "failed: {}", reason),
            WorkerStatus::Crashed => write!(f, "crashed"),
        }
    }
}

/// Handle to the isolated thread running the change monitor for one pair.
///
/// The thread owns its notification channel and watch table; the handle only
/// holds the cancellation token, the published status and the join handle.
#[derive(Debug)]
pub struct BackupWorker {
    id: usize,
    token: CancellationToken,
    status: Arc<Mutex<WorkerStatus>>,
    thread: Option<JoinHandle<()>>,
}

impl BackupWorker {
    /// Start a worker and wait until its watches are in place. Startup
    /// failures are returned and leave no thread behind.
    pub fn spawn(
        id: usize,
        roots: PairRoots,
        session_id: Uuid,
        poll_interval: Duration,
    ) -> Result<Self> {
        let token = CancellationToken::new();
        let status = Arc::new(Mutex::new(WorkerStatus::Initializing));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        let thread = {
            let token = token.clone();
            let status = status.clone();
            thread::Builder::new()
                .name(format!("mirror-worker-{}", id))
                .spawn(move || {
                    worker_main(id, roots, session_id, poll_interval, token, status, ready_tx)
                })
                .map_err(|e| MirrorError::WorkerSpawn(e.to_string()))?
        };

        let mut worker = Self {
            id,
            token,
            status,
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(worker),
            Ok(Err(e)) => {
                worker.join();
                Err(e)
            }
            Err(_) => {
                worker.join();
                Err(MirrorError::WorkerSpawn(
                    "worker exited during startup".to_string(),
                ))
            }
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        let status = self.status.lock().clone();
        let finished = self.thread.as_ref().map_or(true, JoinHandle::is_finished);
        if finished && status.is_running() {
            WorkerStatus::Crashed
        } else {
            status
        }
    }

    /// Ask the worker to stop and wait for it. The worker finishes the event
    /// it is handling before it notices the request.
    pub fn stop(&mut self) {
        if self.thread.is_none() {
            return;
        }
        self.token.cancel();
        self.join();
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Worker {} panicked", self.id);
                *self.status.lock() = WorkerStatus::Crashed;
            }
        }
    }
}

impl Drop for BackupWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_main(
    id: usize,
    roots: PairRoots,
    session_id: Uuid,
    poll_interval: Duration,
    token: CancellationToken,
    status: Arc<Mutex<WorkerStatus>>,
    ready_tx: crossbeam_channel::Sender<Result<()>>,
) {
    let span = info_span!("worker", id, session = %session_id);
    let _enter = span.enter();

    let (mut monitor, events) = match ChangeMonitor::open(roots) {
        Ok(opened) => opened,
        Err(e) => {
            *status.lock() = WorkerStatus::Failed(e.to_string());
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = monitor.initialize() {
        error!("Failed to set up file monitoring: {}", e);
        *status.lock() = WorkerStatus::Failed(e.to_string());
        let _ = ready_tx.send(Err(e));
        return;
    }

    *status.lock() = WorkerStatus::Watching;
    let _ = ready_tx.send(Ok(()));
    info!(
        "Monitoring: {} -> {}",
        monitor.roots().source.display(),
        monitor.roots().target.display()
    );

    let reason = monitor.run(&events, &token, poll_interval);
    monitor.terminate();

    *status.lock() = match reason {
        ExitReason::Cancelled => WorkerStatus::Stopped,
        ExitReason::SourceRemoved => WorkerStatus::SourceRemoved,
        ExitReason::ChannelClosed => {
            warn!("Worker {} lost its notification channel", id);
            WorkerStatus::Failed("notification channel closed".to_string())
        }
    };
    info!("Worker {} exited", id);
}
