//! Replay a backup tree onto its original location.
//!
//! The backup is authoritative: entries it contains are recreated at the
//! source, and afterwards anything at the source without a counterpart in the
//! backup is removed, so the result is an exact mirror rather than a superset.

use super::sync;
use crate::error::{IoResultExt, MirrorError, Result};
use crate::utils::paths;
use std::fs::{self, DirBuilder, Metadata, Permissions};
use std::io;
use std::os::unix::fs::{symlink, DirBuilderExt, PermissionsExt};
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub files_copied: usize,
    pub files_unchanged: usize,
    pub links: usize,
    pub directories: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Restore `backup` onto `source`.
pub fn restore(source: &Path, backup: &Path) -> Result<RestoreReport> {
    match fs::symlink_metadata(backup) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(MirrorError::NotADirectory(backup.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MirrorError::BackupMissing(backup.to_path_buf()))
        }
        Err(e) => return Err(e).at("stat", backup),
    }

    // Pruning would otherwise eat the backup (or the source) itself
    let real_backup = backup.canonicalize().at("resolve", backup)?;
    let real_source = paths::resolve_lenient(source).at("resolve", source)?;
    if paths::is_within(&real_backup, &real_source) || paths::is_within(&real_source, &real_backup) {
        return Err(MirrorError::TargetInsideSource {
            source_path: real_source,
            target_path: real_backup,
        });
    }

    ensure_directory_exists(&real_source)?;

    let mut report = RestoreReport::default();
    restore_dir(&real_source, &real_backup, &mut report);
    report.removed += delete_files_not_in_backup(&real_source, &real_backup)?;

    info!(
        "Restore from {} to {} completed ({} copied, {} unchanged, {} removed)",
        backup.display(),
        source.display(),
        report.files_copied,
        report.files_unchanged,
        report.removed
    );
    Ok(report)
}

/// Copy `src` over `dst` only when size or modification time differ.
/// Returns whether the file was copied.
pub fn compare_and_copy_if_different(src: &Path, dst: &Path) -> Result<bool> {
    let copied = sync::copy_file_if_changed(src, dst)?;
    if copied {
        info!("Restored: {}", src.display());
    }
    Ok(copied)
}

/// Remove everything under `source` that has no counterpart under `backup`.
/// Returns the number of top-level entries removed.
pub fn delete_files_not_in_backup(source: &Path, backup: &Path) -> Result<usize> {
    let mut removed = 0;

    for entry in fs::read_dir(source).at("read directory", source)? {
        let entry = entry.at("read directory", source)?;
        let name = entry.file_name();
        let here = source.join(&name);
        let there = backup.join(&name);

        let here_meta = match fs::symlink_metadata(&here) {
            Ok(meta) => meta,
            Err(_) => continue,
        };

        match fs::symlink_metadata(&there) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match sync::remove_path_recursive(&here) {
                    Ok(()) => {
                        info!("Removed: {}", here.display());
                        removed += 1;
                    }
                    Err(e) => error!("Failed to remove {}: {}", here.display(), e),
                }
            }
            Ok(there_meta) if here_meta.is_dir() && there_meta.is_dir() => {
                removed += delete_files_not_in_backup(&here, &there)?;
            }
            _ => {}
        }
    }

    Ok(removed)
}

fn restore_dir(dest: &Path, backup: &Path, report: &mut RestoreReport) {
    let entries = match fs::read_dir(backup) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Failed to read {}: {}", backup.display(), e);
            report.failed += 1;
            return;
        }
    };

    for entry in entries {
        let name = match entry {
            Ok(entry) => entry.file_name(),
            Err(e) => {
                error!("Failed to read {}: {}", backup.display(), e);
                report.failed += 1;
                continue;
            }
        };
        let from = backup.join(&name);
        let to = dest.join(&name);

        if let Err(e) = restore_entry(&from, &to, report) {
            if e.is_recoverable() {
                warn!("Skipping {}: {}", from.display(), e);
            } else {
                error!("Failed to restore {}: {}", from.display(), e);
                report.failed += 1;
            }
        }
    }
}

fn restore_entry(from: &Path, to: &Path, report: &mut RestoreReport) -> Result<()> {
    paths::check_path_len(to)?;
    let meta = fs::symlink_metadata(from).at("stat", from)?;

    if let Ok(existing) = fs::symlink_metadata(to) {
        if kind_of(&existing) != kind_of(&meta) {
            sync::remove_path_recursive(to)?;
        }
    }

    let file_type = meta.file_type();
    if file_type.is_dir() {
        match fs::create_dir(to) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e).at("create directory", to),
        }
        let bits = meta.permissions().mode() & 0o777;
        fs::set_permissions(to, Permissions::from_mode(bits | 0o700)).at("chmod", to)?;
        restore_dir(to, from, report);
        fs::set_permissions(to, Permissions::from_mode(bits)).at("chmod", to)?;
        report.directories += 1;
    } else if file_type.is_symlink() {
        let link = fs::read_link(from).at("readlink", from)?;
        if fs::read_link(to).ok().as_deref() != Some(link.as_path()) {
            match fs::remove_file(to) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).at("remove", to),
            }
            symlink(&link, to).at("symlink", to)?;
            report.links += 1;
        }
    } else if file_type.is_file() {
        if compare_and_copy_if_different(from, to)? {
            report.files_copied += 1;
        } else {
            report.files_unchanged += 1;
        }
    } else {
        warn!("Skipping special file: {}", from.display());
    }
    Ok(())
}

/// Create `path` and any missing parents with mode 0755.
fn ensure_directory_exists(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(MirrorError::NotADirectory(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(path)
            .at("create directory", path),
        Err(e) => Err(e).at("stat", path),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum EntryKind {
    Dir,
    Link,
    File,
    Other,
}

fn kind_of(meta: &Metadata) -> EntryKind {
    let file_type = meta.file_type();
    if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_symlink() {
        EntryKind::Link
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}
