pub mod manager;
pub mod monitor;
pub mod restore;
pub mod sync;
pub mod worker;

pub use manager::{BackupManager, BackupPair, PairStatus};
pub use monitor::{ChangeMonitor, MonitorState};
pub use restore::{restore, RestoreReport};
pub use sync::PairRoots;
pub use worker::{BackupWorker, WorkerStatus};
