//! Live change monitor for one backup pair.
//!
//! Every directory under the source root gets its own non-recursive watch so
//! the set of watched directories is explicit and owned by the monitor. Events
//! are translated back into "directory + entry name" changes and replayed
//! against the mirrored location under the target root, one at a time, in the
//! order the OS delivered them.

use super::sync::{self, PairRoots};
use crate::error::{IoResultExt, MirrorError, Result};
use crate::utils::paths;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

pub type WatchId = u64;
pub type EventReceiver = Receiver<notify::Result<Event>>;

/// Registration seam over the OS change-notification facility.
pub trait WatchRegistrar {
    fn add_watch(&mut self, dir: &Path) -> Result<()>;
    fn remove_watch(&mut self, dir: &Path);
}

impl WatchRegistrar for RecommendedWatcher {
    fn add_watch(&mut self, dir: &Path) -> Result<()> {
        self.watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| MirrorError::Watch {
                path: dir.to_path_buf(),
                source,
            })
    }

    fn remove_watch(&mut self, dir: &Path) {
        // The backend drops watches on deleted directories by itself
        if let Err(e) = self.unwatch(dir) {
            debug!("Unwatch {}: {}", dir.display(), e);
        }
    }
}

/// Watch id to directory mapping, private to one monitor.
#[derive(Debug, Default)]
pub struct WatchTable {
    next_id: WatchId,
    by_id: HashMap<WatchId, PathBuf>,
    by_path: HashMap<PathBuf, WatchId>,
}

impl WatchTable {
    pub fn insert(&mut self, path: PathBuf) -> WatchId {
        if let Some(&id) = self.by_path.get(&path) {
            return id;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.by_id.insert(id, path.clone());
        self.by_path.insert(path, id);
        id
    }

    pub fn path(&self, id: WatchId) -> Option<&Path> {
        self.by_id.get(&id).map(PathBuf::as_path)
    }

    pub fn id_of(&self, path: &Path) -> Option<WatchId> {
        self.by_path.get(path).copied()
    }

    pub fn remove(&mut self, id: WatchId) -> Option<PathBuf> {
        let path = self.by_id.remove(&id)?;
        self.by_path.remove(&path);
        Some(path)
    }

    /// Drop every watch on `root` or below it, returning the dropped paths.
    pub fn remove_tree(&mut self, root: &Path) -> Vec<PathBuf> {
        let ids: Vec<WatchId> = self
            .by_path
            .iter()
            .filter(|(path, _)| paths::is_within(path, root))
            .map(|(_, id)| *id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn drain(&mut self) -> Vec<PathBuf> {
        self.by_path.clear();
        self.by_id.drain().map(|(_, path)| path).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Initializing,
    Watching,
    Terminated,
}

/// Why the watch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Cancelled,
    SourceRemoved,
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    MovedAway,
    MovedIn,
    WatchInvalidated,
}

/// One change, expressed relative to the watched directory it was reported in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub watch: Option<WatchId>,
    pub dir: PathBuf,
    pub name: OsString,
}

pub struct ChangeMonitor<R: WatchRegistrar> {
    roots: PairRoots,
    registrar: R,
    watches: WatchTable,
    state: MonitorState,
}

impl ChangeMonitor<RecommendedWatcher> {
    /// Open a private notification channel for `roots`. Nothing is watched yet.
    pub fn open(roots: PairRoots) -> Result<(Self, EventReceiver)> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|source| MirrorError::Watch {
            path: roots.source.clone(),
            source,
        })?;

        Ok((Self::with_registrar(roots, watcher), rx))
    }
}

impl<R: WatchRegistrar> ChangeMonitor<R> {
    pub fn with_registrar(roots: PairRoots, registrar: R) -> Self {
        Self {
            roots,
            registrar,
            watches: WatchTable::default(),
            state: MonitorState::Initializing,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn roots(&self) -> &PairRoots {
        &self.roots
    }

    pub fn watches(&self) -> &WatchTable {
        &self.watches
    }

    /// Watch the whole source tree, then bring the target up to date with
    /// anything that changed before the watches were in place.
    pub fn initialize(&mut self) -> Result<()> {
        let root = self.roots.source.clone();
        let count = self.watch_recursive(&root)?;
        debug!("Registered {} watches under {}", count, root.display());

        sync::refresh_tree(&root, &self.roots.target, &root, &self.roots.target)?;

        self.state = MonitorState::Watching;
        Ok(())
    }

    /// Catch up after lost notifications: watch directories that appeared
    /// unnoticed and copy whatever differs from the target.
    pub fn rescan(&mut self) -> Result<()> {
        let root = self.roots.source.clone();
        let added = self.watch_recursive(&root)?;
        if added > 0 {
            debug!("Rescan registered {} new watches", added);
        }
        sync::refresh_tree(&root, &self.roots.target, &root, &self.roots.target)
    }

    /// Register a watch on `dir` and every directory below it. Directories that
    /// disappear during the walk are skipped; any other failure aborts.
    pub fn watch_recursive(&mut self, dir: &Path) -> Result<usize> {
        let mut added = 0;
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                    continue
                }
                Err(e) => {
                    let path = e.path().unwrap_or(dir).to_path_buf();
                    return Err(io::Error::from(e)).at("walk", &path);
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            if self.watches.id_of(path).is_some() {
                continue;
            }
            paths::check_path_len(path)?;

            if let Err(e) = self.registrar.add_watch(path) {
                if fs::symlink_metadata(path).is_err() {
                    continue;
                }
                return Err(e);
            }
            let id = self.watches.insert(path.to_path_buf());
            debug!("Watching {} (watch {})", path.display(), id);
            added += 1;
        }
        Ok(added)
    }

    /// Process events until cancelled, until the source root disappears, or
    /// until the notification channel closes.
    pub fn run(
        &mut self,
        events: &EventReceiver,
        token: &CancellationToken,
        poll_interval: Duration,
    ) -> ExitReason {
        loop {
            if token.is_cancelled() {
                info!("Termination requested, stopping monitor");
                return ExitReason::Cancelled;
            }

            if fs::metadata(&self.roots.source).is_err() {
                info!("Source directory no longer exists, stopping monitor");
                return ExitReason::SourceRemoved;
            }

            let mut batch = match events.recv_timeout(poll_interval) {
                Ok(first) => vec![first],
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Notification channel closed");
                    return ExitReason::ChannelClosed;
                }
            };
            batch.extend(events.try_iter());

            for res in batch {
                match res {
                    Ok(event) => self.handle_event(&event),
                    Err(e) => warn!("Watch error: {}", e),
                }
            }
        }
    }

    /// Translate and apply one notification. Failures are logged and never
    /// stop the monitor.
    pub fn handle_event(&mut self, event: &Event) {
        if event.need_rescan() {
            warn!(
                "Change notifications were lost, rescanning {}",
                self.roots.source.display()
            );
            if let Err(e) = self.rescan() {
                error!("Rescan of {} failed: {}", self.roots.source.display(), e);
            }
            return;
        }

        for change in self.translate(event) {
            match self.apply(&change) {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping {:?} event for {:?}: {}", change.kind, change.name, e)
                }
                Err(e) => error!("Failed to mirror {:?} of {:?}: {}", change.kind, change.name, e),
            }
        }
    }

    /// Turn a raw notification into changes keyed by watched directory.
    pub fn translate(&self, event: &Event) -> Vec<Change> {
        let mut changes = Vec::new();

        for path in &event.paths {
            let Some(kind) = classify(&event.kind, path) else {
                continue;
            };

            // Events about the root itself never map onto a target entry
            if path == &self.roots.source {
                if matches!(kind, ChangeKind::Removed | ChangeKind::MovedAway) {
                    changes.push(Change {
                        kind: ChangeKind::WatchInvalidated,
                        watch: self.watches.id_of(path),
                        dir: path.clone(),
                        name: OsString::new(),
                    });
                }
                continue;
            }

            let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
                continue;
            };
            changes.push(Change {
                kind,
                watch: self.watches.id_of(dir),
                dir: dir.to_path_buf(),
                name: name.to_os_string(),
            });
        }

        changes
    }

    /// Absolute source and target paths for a change. An unknown watch falls
    /// back to the reported directory when it lies in the source tree, and to
    /// the source root otherwise.
    pub fn resolve(&self, change: &Change) -> Result<(PathBuf, PathBuf)> {
        let base = change
            .watch
            .and_then(|id| self.watches.path(id))
            .map(Path::to_path_buf)
            .or_else(|| {
                paths::is_within(&change.dir, &self.roots.source).then(|| change.dir.clone())
            })
            .unwrap_or_else(|| self.roots.source.clone());

        let source = base.join(&change.name);
        paths::check_path_len(&source)?;

        let target_base = paths::mirror_path(&base, &self.roots.source, &self.roots.target)
            .unwrap_or_else(|| self.roots.target.clone());
        let target = target_base.join(&change.name);
        paths::check_path_len(&target)?;

        Ok((source, target))
    }

    pub fn apply(&mut self, change: &Change) -> Result<()> {
        if change.kind == ChangeKind::WatchInvalidated {
            if let Some(path) = change.watch.and_then(|id| self.watches.remove(id)) {
                self.registrar.remove_watch(&path);
                debug!("Watch on {} invalidated", path.display());
            }
            return Ok(());
        }

        let (source, target) = self.resolve(change)?;

        match change.kind {
            ChangeKind::Created | ChangeKind::MovedIn => self.mirror_new_entry(&source, &target),
            ChangeKind::Modified => self.refresh_entry(&source, &target),
            ChangeKind::Removed | ChangeKind::MovedAway => {
                self.forget_watches(&source);
                if target == self.roots.target {
                    return Ok(());
                }
                debug!("Removing {}", target.display());
                sync::remove_path_recursive(&target)
            }
            ChangeKind::WatchInvalidated => Ok(()),
        }
    }

    /// Release every watch. The notification channel closes when the monitor
    /// is dropped.
    pub fn terminate(&mut self) {
        for path in self.watches.drain() {
            self.registrar.remove_watch(&path);
        }
        self.state = MonitorState::Terminated;
    }

    fn mirror_new_entry(&mut self, source: &Path, target: &Path) -> Result<()> {
        let meta = match fs::symlink_metadata(source) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} vanished before it could be copied", source.display());
                return Ok(());
            }
            Err(e) => return Err(e).at("stat", source),
        };

        if meta.is_dir() {
            // Watch first so entries created during the copy are not missed
            if let Err(e) = self.watch_recursive(source) {
                warn!("Failed to watch directory {}: {}", source.display(), e);
            }
        }

        sync::copy_tree(source, target, &self.roots.source, &self.roots.target)
    }

    fn refresh_entry(&mut self, source: &Path, target: &Path) -> Result<()> {
        let file_type = match fs::symlink_metadata(source) {
            Ok(meta) => meta.file_type(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).at("stat", source),
        };

        if file_type.is_file() {
            sync::copy_file(source, target).map(|_| ())
        } else if file_type.is_symlink() {
            sync::copy_symlink(source, target, &self.roots.source, &self.roots.target)
        } else {
            Ok(())
        }
    }

    fn forget_watches(&mut self, dir: &Path) {
        for path in self.watches.remove_tree(dir) {
            self.registrar.remove_watch(&path);
            debug!("Dropped watch on {}", path.display());
        }
    }
}

fn classify(kind: &EventKind, path: &Path) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::MovedAway),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::MovedIn),
        // Both halves of a rename are also delivered individually
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => None,
        EventKind::Modify(ModifyKind::Name(_)) => {
            if fs::symlink_metadata(path).is_ok() {
                Some(ChangeKind::MovedIn)
            } else {
                Some(ChangeKind::MovedAway)
            }
        }
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, Flag, MetadataKind, RemoveKind};
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeRegistrar {
        watched: Vec<PathBuf>,
        fail_on: Option<PathBuf>,
    }

    impl WatchRegistrar for FakeRegistrar {
        fn add_watch(&mut self, dir: &Path) -> Result<()> {
            if self.fail_on.as_deref() == Some(dir) {
                return Err(MirrorError::Watch {
                    path: dir.to_path_buf(),
                    source: notify::Error::generic("no space left on watch table"),
                });
            }
            self.watched.push(dir.to_path_buf());
            Ok(())
        }

        fn remove_watch(&mut self, dir: &Path) {
            self.watched.retain(|p| p != dir);
        }
    }

    fn setup() -> (TempDir, ChangeMonitor<FakeRegistrar>) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let roots = PairRoots {
            source: base.join("src"),
            target: base.join("dst"),
        };
        fs::create_dir_all(roots.source.join("a/b")).unwrap();
        fs::write(roots.source.join("a/b/seed.txt"), b"seed").unwrap();
        sync::copy_tree(&roots.source, &roots.target, &roots.source, &roots.target).unwrap();
        let monitor = ChangeMonitor::with_registrar(roots, FakeRegistrar::default());
        (dir, monitor)
    }

    fn event(kind: EventKind, path: PathBuf) -> Event {
        Event::new(kind).add_path(path)
    }

    #[test]
    fn initialize_watches_every_directory() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();

        let src = monitor.roots().source.clone();
        assert_eq!(monitor.state(), MonitorState::Watching);
        assert_eq!(monitor.watches().len(), 3);
        assert!(monitor.watches().id_of(&src.join("a/b")).is_some());
        assert_eq!(monitor.registrar.watched.len(), 3);
    }

    #[test]
    fn failed_registration_aborts_startup() {
        let (_dir, mut monitor) = setup();
        monitor.registrar.fail_on = Some(monitor.roots().source.join("a"));

        let err = monitor.initialize().unwrap_err();

        assert!(matches!(err, MirrorError::Watch { .. }));
        assert_eq!(monitor.state(), MonitorState::Initializing);
    }

    #[test]
    fn created_file_is_copied() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let roots = monitor.roots().clone();
        fs::write(roots.source.join("a/new.txt"), b"fresh").unwrap();

        monitor.handle_event(&event(
            EventKind::Create(CreateKind::File),
            roots.source.join("a/new.txt"),
        ));

        assert_eq!(fs::read(roots.target.join("a/new.txt")).unwrap(), b"fresh");
    }

    #[test]
    fn created_directory_is_watched_and_copied() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let roots = monitor.roots().clone();
        fs::create_dir_all(roots.source.join("fresh/inner")).unwrap();
        fs::write(roots.source.join("fresh/inner/f"), b"x").unwrap();

        monitor.handle_event(&event(
            EventKind::Create(CreateKind::Folder),
            roots.source.join("fresh"),
        ));

        assert!(monitor.watches().id_of(&roots.source.join("fresh/inner")).is_some());
        assert_eq!(fs::read(roots.target.join("fresh/inner/f")).unwrap(), b"x");
    }

    #[test]
    fn modification_recopies_file() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let roots = monitor.roots().clone();
        fs::write(roots.source.join("a/b/seed.txt"), b"changed").unwrap();

        monitor.handle_event(&event(
            EventKind::Access(AccessKind::Close(AccessMode::Write)),
            roots.source.join("a/b/seed.txt"),
        ));

        assert_eq!(fs::read(roots.target.join("a/b/seed.txt")).unwrap(), b"changed");
    }

    #[test]
    fn created_symlink_is_rebased_into_target() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let roots = monitor.roots().clone();
        symlink(roots.source.join("a/b/seed.txt"), roots.source.join("a/latest")).unwrap();

        monitor.handle_event(&event(
            EventKind::Create(CreateKind::Any),
            roots.source.join("a/latest"),
        ));

        assert_eq!(
            fs::read_link(roots.target.join("a/latest")).unwrap(),
            roots.target.join("a/b/seed.txt")
        );
        assert_eq!(fs::read(roots.target.join("a/latest")).unwrap(), b"seed");
    }

    #[test]
    fn repointed_symlink_replaces_mirrored_link() {
        let (_dir, mut monitor) = setup();
        let roots = monitor.roots().clone();
        symlink(roots.source.join("a/b/seed.txt"), roots.source.join("current")).unwrap();
        monitor.initialize().unwrap();
        assert_eq!(
            fs::read_link(roots.target.join("current")).unwrap(),
            roots.target.join("a/b/seed.txt")
        );

        fs::remove_file(roots.source.join("current")).unwrap();
        symlink(roots.source.join("a/b"), roots.source.join("current")).unwrap();
        monitor.handle_event(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)),
            roots.source.join("current"),
        ));

        assert_eq!(
            fs::read_link(roots.target.join("current")).unwrap(),
            roots.target.join("a/b")
        );
        assert!(roots.target.join("a/b/seed.txt").exists());
    }

    #[test]
    fn removed_directory_is_deleted_and_unwatched() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let roots = monitor.roots().clone();
        fs::remove_dir_all(roots.source.join("a")).unwrap();

        monitor.handle_event(&event(
            EventKind::Remove(RemoveKind::Folder),
            roots.source.join("a"),
        ));

        assert!(!roots.target.join("a").exists());
        assert_eq!(monitor.watches().len(), 1);
        assert_eq!(monitor.registrar.watched, vec![roots.source.clone()]);
    }

    #[test]
    fn rename_within_tree_moves_target() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let roots = monitor.roots().clone();
        fs::rename(roots.source.join("a/b"), roots.source.join("a/c")).unwrap();

        monitor.handle_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            roots.source.join("a/b"),
        ));
        monitor.handle_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            roots.source.join("a/c"),
        ));

        assert!(!roots.target.join("a/b").exists());
        assert_eq!(fs::read(roots.target.join("a/c/seed.txt")).unwrap(), b"seed");
        assert!(monitor.watches().id_of(&roots.source.join("a/c")).is_some());
        assert!(monitor.watches().id_of(&roots.source.join("a/b")).is_none());
    }

    #[test]
    fn root_removal_only_invalidates_watch() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let roots = monitor.roots().clone();

        monitor.handle_event(&event(
            EventKind::Remove(RemoveKind::Folder),
            roots.source.clone(),
        ));

        assert!(roots.target.join("a/b/seed.txt").exists());
        assert!(monitor.watches().id_of(&roots.source).is_none());
    }

    #[test]
    fn overlong_names_are_skipped() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let roots = monitor.roots().clone();
        let change = Change {
            kind: ChangeKind::Created,
            watch: monitor.watches().id_of(&roots.source),
            dir: roots.source.clone(),
            name: OsString::from("n".repeat(paths::NAME_MAX + 1)),
        };

        let err = monitor.apply(&change).unwrap_err();

        assert!(matches!(err, MirrorError::PathTooLong(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn unknown_watch_falls_back_to_source_root() {
        let (_dir, monitor) = setup();
        let roots = monitor.roots().clone();
        let change = Change {
            kind: ChangeKind::Modified,
            watch: None,
            dir: PathBuf::from("/elsewhere"),
            name: OsString::from("f"),
        };

        let (source, target) = monitor.resolve(&change).unwrap();

        assert_eq!(source, roots.source.join("f"));
        assert_eq!(target, roots.target.join("f"));
    }

    #[test]
    fn overflow_triggers_rescan() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let roots = monitor.roots().clone();
        fs::create_dir_all(roots.source.join("unseen/deeper")).unwrap();
        fs::write(roots.source.join("unseen/deeper/f"), b"missed").unwrap();
        fs::write(roots.source.join("a/b/seed.txt"), b"edited while overflowing").unwrap();

        monitor.handle_event(&Event::new(EventKind::Other).set_flag(Flag::Rescan));

        assert_eq!(fs::read(roots.target.join("unseen/deeper/f")).unwrap(), b"missed");
        assert_eq!(
            fs::read(roots.target.join("a/b/seed.txt")).unwrap(),
            b"edited while overflowing"
        );
        assert!(monitor.watches().id_of(&roots.source.join("unseen/deeper")).is_some());
        assert_eq!(monitor.watches().len(), 5);
    }

    #[test]
    fn plain_data_events_are_modifications() {
        let path = Path::new("/x");
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content)), path),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both)), path),
            None
        );
        assert_eq!(classify(&EventKind::Access(AccessKind::Read), path), None);
    }

    #[test]
    fn run_stops_on_cancellation_and_on_root_loss() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let (_tx, rx) = crossbeam_channel::unbounded();
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(
            monitor.run(&rx, &token, Duration::from_millis(10)),
            ExitReason::Cancelled
        );

        fs::remove_dir_all(&monitor.roots().source).unwrap();
        let token = CancellationToken::new();
        assert_eq!(
            monitor.run(&rx, &token, Duration::from_millis(10)),
            ExitReason::SourceRemoved
        );

        monitor.terminate();
        assert_eq!(monitor.state(), MonitorState::Terminated);
        assert!(monitor.watches().is_empty());
    }

    #[test]
    fn run_reports_closed_channel() {
        let (_dir, mut monitor) = setup();
        monitor.initialize().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded::<notify::Result<Event>>();
        drop(tx);

        assert_eq!(
            monitor.run(&rx, &CancellationToken::new(), Duration::from_millis(10)),
            ExitReason::ChannelClosed
        );
    }
}
