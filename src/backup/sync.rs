//! Recursive tree copy with permission, timestamp and symlink fidelity.
//!
//! `source_root`/`target_root` are threaded through every recursive call so
//! symlink rebasing is always evaluated against the roots of the backup pair,
//! never against the directory currently being copied.

use crate::error::{IoResultExt, MirrorError, Result};
use crate::utils::paths;
use filetime::{set_file_times, FileTime};
use std::fs::{self, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{symlink, FileTypeExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MODE_MASK: u32 = 0o777;

/// Copy a regular file's bytes, permission bits and access/modification times.
/// An existing destination is replaced. Returns the number of bytes copied.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    let meta = fs::metadata(src).at("stat", src)?;
    let mode = meta.permissions().mode() & MODE_MASK;

    let mut input = File::open(src).at("open", src)?;

    clear_destination(dst)?;
    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(dst)
        .at("create", dst)?;

    let bytes = io::copy(&mut input, &mut output).at("copy", src)?;
    drop(output);

    // open(2) honours the umask, set the exact bits afterwards
    fs::set_permissions(dst, Permissions::from_mode(mode)).at("chmod", dst)?;
    set_file_times(
        dst,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
    .at("set times on", dst)?;

    debug!("Copied {} -> {} ({} bytes)", src.display(), dst.display(), bytes);
    Ok(bytes)
}

/// Recreate the symlink `src` at `dst`.
///
/// Absolute links whose resolved location is inside `source_root` are
/// rewritten to the same location under `target_root`; relative and external
/// links are copied verbatim. The decision follows intermediate symlinks, so
/// `/src/l/../x` with `l` pointing outside the tree stays external.
pub fn copy_symlink(src: &Path, dst: &Path, source_root: &Path, target_root: &Path) -> Result<()> {
    let link = fs::read_link(src).at("readlink", src)?;

    let new_target = if link.is_absolute() {
        match (
            source_root.canonicalize(),
            target_root.canonicalize(),
            paths::resolve_link_location(&link),
        ) {
            (Ok(real_source), Ok(real_target), Ok(real_link)) => {
                paths::rebase_link_target(&real_link, &real_source, &real_target).unwrap_or(link)
            }
            // Unresolvable roots or link path: keep the link as it is
            _ => link,
        }
    } else {
        link
    };

    clear_destination(dst)?;
    symlink(&new_target, dst).at("symlink", dst)?;

    debug!("Linked {} -> {}", dst.display(), new_target.display());
    Ok(())
}

/// Create `dst` as a mirror of directory `src` and copy its children.
///
/// The permission bits are applied after the children so read-only source
/// directories can still be populated.
pub fn copy_dir(src: &Path, dst: &Path, source_root: &Path, target_root: &Path) -> Result<()> {
    mirror_dir(src, dst, source_root, target_root, CopyMode::Always)
}

fn mirror_dir(
    src: &Path,
    dst: &Path,
    source_root: &Path,
    target_root: &Path,
    mode: CopyMode,
) -> Result<()> {
    let meta = fs::metadata(src).at("stat", src)?;

    match fs::create_dir(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let existing = fs::symlink_metadata(dst).at("stat", dst)?;
            if !existing.is_dir() {
                return Err(MirrorError::NotADirectory(dst.to_path_buf()));
            }
        }
        Err(e) => return Err(e).at("create directory", dst),
    }

    let bits = meta.permissions().mode() & MODE_MASK;
    if bits & 0o700 != 0o700 {
        fs::set_permissions(dst, Permissions::from_mode(bits | 0o700)).at("chmod", dst)?;
    }

    for entry in fs::read_dir(src).at("read directory", src)? {
        let entry = entry.at("read directory", src)?;
        let name = entry.file_name();
        let child_src = src.join(&name);
        let child_dst = dst.join(&name);

        match mirror_entry(&child_src, &child_dst, source_root, target_root, mode) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                warn!("Skipping {}: {}", child_src.display(), e);
            }
            Err(MirrorError::UnknownFileType(path)) => {
                warn!("Skipping entry of unknown type: {}", path.display());
            }
            Err(e) => return Err(e),
        }
    }

    fs::set_permissions(dst, Permissions::from_mode(bits)).at("chmod", dst)?;
    Ok(())
}

/// Copy whatever `src` is to `dst`, dispatching on the non-dereferenced file type.
pub fn copy_tree(src: &Path, dst: &Path, source_root: &Path, target_root: &Path) -> Result<()> {
    mirror_entry(src, dst, source_root, target_root, CopyMode::Always)
}

/// Like [`copy_tree`], but regular files whose size and modification time
/// already match the destination are left alone.
pub fn refresh_tree(src: &Path, dst: &Path, source_root: &Path, target_root: &Path) -> Result<()> {
    mirror_entry(src, dst, source_root, target_root, CopyMode::IfChanged)
}

/// Copy `src` over `dst` unless `dst` already has the same size and
/// modification time (whole seconds). Returns whether a copy happened.
pub fn copy_file_if_changed(src: &Path, dst: &Path) -> Result<bool> {
    let src_meta = fs::metadata(src).at("stat", src)?;
    if let Ok(dst_meta) = fs::metadata(dst) {
        let same_size = src_meta.len() == dst_meta.len();
        let same_mtime = FileTime::from_last_modification_time(&src_meta).unix_seconds()
            == FileTime::from_last_modification_time(&dst_meta).unix_seconds();
        if same_size && same_mtime && dst_meta.is_file() {
            return Ok(false);
        }
    }
    copy_file(src, dst)?;
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyMode {
    Always,
    IfChanged,
}

fn mirror_entry(
    src: &Path,
    dst: &Path,
    source_root: &Path,
    target_root: &Path,
    mode: CopyMode,
) -> Result<()> {
    paths::check_path_len(src)?;
    paths::check_path_len(dst)?;

    let file_type = fs::symlink_metadata(src).at("stat", src)?.file_type();

    if file_type.is_file() {
        match mode {
            CopyMode::Always => copy_file(src, dst).map(|_| ()),
            CopyMode::IfChanged => copy_file_if_changed(src, dst).map(|_| ()),
        }
    } else if file_type.is_dir() {
        mirror_dir(src, dst, source_root, target_root, mode)
    } else if file_type.is_symlink() {
        copy_symlink(src, dst, source_root, target_root)
    } else if file_type.is_fifo()
        || file_type.is_socket()
        || file_type.is_block_device()
        || file_type.is_char_device()
    {
        warn!("Skipping special file: {}", src.display());
        Ok(())
    } else {
        Err(MirrorError::UnknownFileType(src.to_path_buf()))
    }
}

/// Remove `path` and everything below it. Entries that are already gone are
/// not an error at any level.
pub fn remove_path_recursive(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).at("stat", path),
    };

    if meta.is_dir() {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).at("read directory", path),
        };
        for entry in entries {
            let entry = entry.at("read directory", path)?;
            let child = path.join(entry.file_name());
            paths::check_path_len(&child)?;
            remove_path_recursive(&child)?;
        }
        ignore_not_found(fs::remove_dir(path)).at("remove directory", path)
    } else {
        ignore_not_found(fs::remove_file(path)).at("remove", path)
    }
}

/// Validated, resolved roots of a backup pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRoots {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// Check that `source`/`target` can form a backup pair and resolve both.
///
/// The source must be an existing directory. A relative target resolves
/// against the current directory; a target equal to or inside the source is
/// rejected, as is an existing target that is not a directory. Nothing is
/// written.
pub fn validate_pair(source: &Path, target: &Path) -> Result<PairRoots> {
    let source_meta = fs::metadata(source).at("stat", source)?;
    if !source_meta.is_dir() {
        return Err(MirrorError::NotADirectory(source.to_path_buf()));
    }
    let real_source = source.canonicalize().at("resolve", source)?;
    let real_target = paths::resolve_lenient(target).at("resolve", target)?;

    if paths::is_within(&real_target, &real_source) {
        return Err(MirrorError::TargetInsideSource {
            source_path: real_source,
            target_path: real_target,
        });
    }

    match fs::symlink_metadata(&real_target) {
        Ok(meta) if !meta.is_dir() => {
            return Err(MirrorError::NotADirectory(real_target));
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).at("stat", &real_target),
    }

    Ok(PairRoots {
        source: real_source,
        target: real_target,
    })
}

/// Copy the whole source tree of a validated pair onto its target.
pub fn initial_copy(roots: &PairRoots) -> Result<()> {
    if let Ok(mut entries) = fs::read_dir(&roots.target) {
        if entries.next().is_some() {
            warn!(
                "Target directory '{}' is not empty, files may be overwritten",
                roots.target.display()
            );
        }
    }

    info!(
        "Creating initial backup from {} to {}...",
        roots.source.display(),
        roots.target.display()
    );
    copy_tree(&roots.source, &roots.target, &roots.source, &roots.target)?;
    info!("Initial backup completed");
    Ok(())
}

/// Make room for a new file or link at `dst`, whatever is there now.
fn clear_destination(dst: &Path) -> Result<()> {
    match fs::symlink_metadata(dst) {
        Ok(meta) if meta.is_dir() => remove_path_recursive(dst),
        Ok(_) => ignore_not_found(fs::remove_file(dst)).at("remove", dst),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).at("stat", dst),
    }
}

fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    fn mode_of(path: &Path) -> u32 {
        fs::symlink_metadata(path).unwrap().permissions().mode() & MODE_MASK
    }

    fn roots() -> (TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let src = base.join("src");
        let dst = base.join("dst");
        fs::create_dir(&src).unwrap();
        (dir, src, dst)
    }

    #[test]
    fn copy_file_preserves_mode_and_times() {
        let (_dir, src, dst) = roots();
        fs::create_dir(&dst).unwrap();
        let file = src.join("a.txt");
        fs::write(&file, b"hello").unwrap();
        fs::set_permissions(&file, Permissions::from_mode(0o640)).unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        set_file_times(&file, mtime, mtime).unwrap();

        let copied = copy_file(&file, &dst.join("a.txt")).unwrap();

        assert_eq!(copied, 5);
        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"hello");
        assert_eq!(mode_of(&dst.join("a.txt")), 0o640);
        let meta = fs::metadata(dst.join("a.txt")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), mtime);
    }

    #[test]
    fn copy_file_replaces_read_only_destination() {
        let (_dir, src, dst) = roots();
        fs::create_dir(&dst).unwrap();
        fs::write(src.join("f"), b"new").unwrap();
        fs::write(dst.join("f"), b"old contents").unwrap();
        fs::set_permissions(dst.join("f"), Permissions::from_mode(0o444)).unwrap();

        copy_file(&src.join("f"), &dst.join("f")).unwrap();

        assert_eq!(fs::read(dst.join("f")).unwrap(), b"new");
    }

    #[test]
    fn vanished_source_is_recoverable() {
        let (_dir, src, dst) = roots();
        let err = copy_file(&src.join("gone"), &dst.join("gone")).unwrap_err();
        assert!(matches!(err, MirrorError::NotFound(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn copy_tree_mirrors_structure_and_rebases_links() {
        let (_dir, src, dst) = roots();
        fs::create_dir_all(src.join("docs/deep")).unwrap();
        fs::write(src.join("docs/deep/note.md"), b"# note").unwrap();
        symlink(src.join("docs/deep/note.md"), src.join("abs-inside")).unwrap();
        symlink("docs/deep/note.md", src.join("relative")).unwrap();
        symlink("/etc/hostname", src.join("external")).unwrap();

        copy_tree(&src, &dst, &src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("docs/deep/note.md")).unwrap(), b"# note");
        assert_eq!(
            fs::read_link(dst.join("abs-inside")).unwrap(),
            dst.join("docs/deep/note.md")
        );
        assert_eq!(
            fs::read_link(dst.join("relative")).unwrap(),
            PathBuf::from("docs/deep/note.md")
        );
        assert_eq!(
            fs::read_link(dst.join("external")).unwrap(),
            PathBuf::from("/etc/hostname")
        );
    }

    #[test]
    fn nested_links_rebase_against_pair_roots() {
        let (_dir, src, dst) = roots();
        fs::create_dir(src.join("sub")).unwrap();
        symlink(&src, src.join("sub/to-root")).unwrap();

        copy_tree(&src, &dst, &src, &dst).unwrap();

        assert_eq!(fs::read_link(dst.join("sub/to-root")).unwrap(), dst);
    }

    #[test]
    fn dotdot_through_outside_link_is_not_rebased() {
        let (_dir, src, dst) = roots();
        let outside = src.with_file_name("other");
        fs::create_dir_all(outside.join("dir")).unwrap();
        fs::write(outside.join("secret"), b"outside").unwrap();
        fs::write(src.join("secret"), b"inside").unwrap();
        symlink(outside.join("dir"), src.join("l")).unwrap();
        let escaping = src.join("l/../secret");
        symlink(&escaping, src.join("esc")).unwrap();

        copy_tree(&src, &dst, &src, &dst).unwrap();

        assert_eq!(fs::read_link(dst.join("esc")).unwrap(), escaping);
        assert_eq!(fs::read(dst.join("esc")).unwrap(), b"outside");
        // the intermediate link itself points outside and is kept as is
        assert_eq!(fs::read_link(dst.join("l")).unwrap(), outside.join("dir"));
    }

    #[test]
    fn dotdot_inside_tree_is_still_rebased() {
        let (_dir, src, dst) = roots();
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/target.txt"), b"t").unwrap();
        symlink(src.join("a/b/../target.txt"), src.join("up")).unwrap();

        copy_tree(&src, &dst, &src, &dst).unwrap();

        assert_eq!(fs::read_link(dst.join("up")).unwrap(), dst.join("a/target.txt"));
    }

    #[test]
    fn sockets_are_skipped() {
        let (_dir, src, dst) = roots();
        let _listener = UnixListener::bind(src.join("sock")).unwrap();
        fs::write(src.join("plain"), b"x").unwrap();

        copy_tree(&src, &dst, &src, &dst).unwrap();

        assert!(dst.join("plain").exists());
        assert!(fs::symlink_metadata(dst.join("sock")).is_err());
    }

    #[test]
    fn read_only_directories_keep_their_mode() {
        let (_dir, src, dst) = roots();
        fs::create_dir(src.join("locked")).unwrap();
        fs::write(src.join("locked/inner"), b"x").unwrap();
        fs::set_permissions(src.join("locked"), Permissions::from_mode(0o555)).unwrap();

        copy_tree(&src, &dst, &src, &dst).unwrap();

        assert_eq!(mode_of(&dst.join("locked")), 0o555);
        assert!(dst.join("locked/inner").exists());

        fs::set_permissions(src.join("locked"), Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(dst.join("locked"), Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn unchanged_files_are_not_recopied() {
        let (_dir, src, dst) = roots();
        fs::create_dir(&dst).unwrap();
        fs::write(src.join("f"), b"same").unwrap();

        assert!(copy_file_if_changed(&src.join("f"), &dst.join("f")).unwrap());
        assert!(!copy_file_if_changed(&src.join("f"), &dst.join("f")).unwrap());

        fs::write(src.join("f"), b"grown!").unwrap();
        assert!(copy_file_if_changed(&src.join("f"), &dst.join("f")).unwrap());
        assert_eq!(fs::read(dst.join("f")).unwrap(), b"grown!");
    }

    #[test]
    fn refresh_tree_fills_in_missing_entries() {
        let (_dir, src, dst) = roots();
        fs::create_dir(src.join("sub")).unwrap();
        fs::write(src.join("sub/a"), b"a").unwrap();
        copy_tree(&src, &dst, &src, &dst).unwrap();

        fs::write(src.join("sub/b"), b"b").unwrap();
        refresh_tree(&src, &dst, &src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("sub/a")).unwrap(), b"a");
        assert_eq!(fs::read(dst.join("sub/b")).unwrap(), b"b");
    }

    #[test]
    fn copy_dir_rejects_file_destination() {
        let (_dir, src, dst) = roots();
        fs::write(&dst, b"not a dir").unwrap();
        let err = copy_dir(&src, &dst, &src, &dst).unwrap_err();
        assert!(matches!(err, MirrorError::NotADirectory(_)));
    }

    #[test]
    fn remove_path_recursive_tolerates_missing() {
        let (_dir, src, _dst) = roots();
        fs::create_dir_all(src.join("a/b/c")).unwrap();
        fs::write(src.join("a/b/c/f"), b"x").unwrap();
        symlink("/nonexistent", src.join("a/dangling")).unwrap();

        remove_path_recursive(&src.join("a")).unwrap();
        remove_path_recursive(&src.join("a")).unwrap();

        assert!(!src.join("a").exists());
    }

    #[test]
    fn validate_pair_rejects_nested_target() {
        let (_dir, src, _dst) = roots();
        let err = validate_pair(&src, &src.join("backup")).unwrap_err();
        assert!(matches!(err, MirrorError::TargetInsideSource { .. }));
        let err = validate_pair(&src, &src).unwrap_err();
        assert!(matches!(err, MirrorError::TargetInsideSource { .. }));
        let err = validate_pair(&src, &src.join("a/../b")).unwrap_err();
        assert!(matches!(err, MirrorError::TargetInsideSource { .. }));
    }

    #[test]
    fn validate_pair_accepts_sibling_with_shared_prefix() {
        let (_dir, src, _dst) = roots();
        let sibling = src.with_file_name("src2");
        let pair = validate_pair(&src, &sibling).unwrap();
        assert_eq!(pair.target, sibling);
    }

    #[test]
    fn validate_pair_rejects_file_target_and_missing_source() {
        let (_dir, src, dst) = roots();
        fs::write(&dst, b"file").unwrap();
        assert!(matches!(
            validate_pair(&src, &dst),
            Err(MirrorError::NotADirectory(_))
        ));
        assert!(matches!(
            validate_pair(&src.join("missing"), &dst),
            Err(MirrorError::NotFound(_))
        ));
    }
}
