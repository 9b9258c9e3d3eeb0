use super::sync::{self, PairRoots};
use super::worker::{BackupWorker, WorkerStatus};
use crate::error::{IoResultExt, MirrorError, Result};
use crate::utils::config::Config;
use crate::utils::paths;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// One registered (source, target) mapping and the worker keeping it in sync.
#[derive(Debug)]
pub struct BackupPair {
    pub source: PathBuf,
    pub target: PathBuf,
    pub session_id: Uuid,
    pub started_at: DateTime<Local>,
    worker: BackupWorker,
}

impl BackupPair {
    pub fn status(&self) -> WorkerStatus {
        self.worker.status()
    }
}

/// Snapshot of a registered pair, as shown by `list`.
#[derive(Debug, Clone)]
pub struct PairStatus {
    pub index: usize,
    pub source: PathBuf,
    pub target: PathBuf,
    pub session_id: Uuid,
    pub worker_id: usize,
    pub status: WorkerStatus,
    pub uptime: Duration,
}

impl PairStatus {
    pub fn uptime_display(&self) -> String {
        humantime::format_duration(Duration::from_secs(self.uptime.as_secs())).to_string()
    }
}

/// Registry of active backup pairs. Sole owner of the worker handles.
pub struct BackupManager {
    pairs: Vec<BackupPair>,
    poll_interval: Duration,
    next_worker_id: usize,
}

impl BackupManager {
    pub fn new(config: &Config) -> Self {
        Self::with_poll_interval(config.poll_interval())
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            pairs: Vec::new(),
            poll_interval,
            next_worker_id: 1,
        }
    }

    /// Register a new pair: validate, copy the whole tree, then start its
    /// worker. Any failure leaves the registry unchanged.
    pub fn add(&mut self, source: &Path, target: &Path) -> Result<&BackupPair> {
        let roots = sync::validate_pair(source, target)?;

        if self.position(&roots).is_some() {
            return Err(MirrorError::DuplicateBackup {
                source_path: roots.source,
                target_path: roots.target,
            });
        }

        sync::initial_copy(&roots)?;

        let id = self.next_worker_id;
        self.next_worker_id += 1;
        let session_id = Uuid::new_v4();
        let worker = BackupWorker::spawn(id, roots.clone(), session_id, self.poll_interval)?;

        info!(
            "Backup started: {} -> {} (worker {}, session {})",
            roots.source.display(),
            roots.target.display(),
            id,
            session_id
        );

        let index = self.pairs.len();
        self.pairs.push(BackupPair {
            source: roots.source,
            target: roots.target,
            session_id,
            started_at: Local::now(),
            worker,
        });
        Ok(&self.pairs[index])
    }

    /// Stop the worker of a registered pair and forget the pair.
    pub fn remove(&mut self, source: &Path, target: &Path) -> Result<()> {
        let roots = PairRoots {
            source: paths::resolve_lenient(source).at("resolve", source)?,
            target: paths::resolve_lenient(target).at("resolve", target)?,
        };

        let index = self
            .position(&roots)
            .ok_or_else(|| MirrorError::BackupNotFound {
                source_path: roots.source.clone(),
                target_path: roots.target.clone(),
            })?;

        let mut pair = self.pairs.remove(index);
        pair.worker.stop();
        info!(
            "Backup ended: {} -> {}",
            pair.source.display(),
            pair.target.display()
        );
        Ok(())
    }

    /// Current pairs in registration order. Each call starts a fresh pass.
    pub fn list(&self) -> impl Iterator<Item = PairStatus> + '_ {
        let now = Local::now();
        self.pairs.iter().enumerate().map(move |(index, pair)| PairStatus {
            index: index + 1,
            source: pair.source.clone(),
            target: pair.target.clone(),
            session_id: pair.session_id,
            worker_id: pair.worker.id(),
            status: pair.status(),
            uptime: (now - pair.started_at).to_std().unwrap_or_default(),
        })
    }

    /// Stop every worker and empty the registry. Safe to call repeatedly.
    pub fn shutdown_all(&mut self) {
        if self.pairs.is_empty() {
            return;
        }
        info!("Stopping {} backup(s)", self.pairs.len());
        for mut pair in self.pairs.drain(..) {
            pair.worker.stop();
            let status = pair.worker.status();
            if !matches!(status, WorkerStatus::Stopped) {
                warn!(
                    "Worker for {} -> {} ended as: {}",
                    pair.source.display(),
                    pair.target.display(),
                    status
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn position(&self, roots: &PairRoots) -> Option<usize> {
        self.pairs
            .iter()
            .position(|pair| pair.source == roots.source && pair.target == roots.target)
    }
}

impl Drop for BackupManager {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
