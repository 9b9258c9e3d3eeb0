use crate::error::{MirrorError, Result};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Linux `PATH_MAX`, including the trailing NUL.
pub const PATH_MAX: usize = 4096;
/// Linux `NAME_MAX` for a single path component.
pub const NAME_MAX: usize = 255;

/// Collapse `.` and `..` without touching the filesystem.
/// `..` never climbs above the root of an absolute path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve a path that may not exist yet, the way the kernel would walk it.
///
/// The longest existing prefix is canonicalized, so a `..` that follows a
/// symlink climbs out of wherever the link leads. The missing tail cannot
/// contain symlinks and is applied lexically.
pub fn resolve_lenient(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let components: Vec<Component> = absolute.components().collect();

    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        match prefix.canonicalize() {
            Ok(mut resolved) => {
                for component in &components[split..] {
                    match component {
                        Component::ParentDir => {
                            resolved.pop();
                        }
                        Component::Normal(name) => resolved.push(name),
                        _ => {}
                    }
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(normalize(&absolute))
}

/// Real location of the entry an absolute symlink names. The directory chain
/// is resolved through the filesystem; the final component is not followed,
/// so a link to another link stays a link to that link.
pub fn resolve_link_location(link: &Path) -> io::Result<PathBuf> {
    match (link.parent(), link.file_name()) {
        (Some(parent), Some(name)) => Ok(resolve_lenient(parent)?.join(name)),
        _ => resolve_lenient(link),
    }
}

/// True when `path` is `root` or lies below it. Matching is per component,
/// so `/a/bc` is not inside `/a/b`.
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// Decide where a copied symlink should point.
///
/// Returns the rewritten target when `link` is absolute and falls under
/// `source_root`; `None` means the link text is kept verbatim. Pass `link`
/// through [`resolve_link_location`] first: the `..` collapsing done here is
/// purely lexical and cannot see symlinks. Both roots are expected to be
/// resolved real paths.
pub fn rebase_link_target(link: &Path, source_root: &Path, target_root: &Path) -> Option<PathBuf> {
    if !link.is_absolute() {
        return None;
    }
    let link = normalize(link);
    let rest = link.strip_prefix(source_root).ok()?;
    if rest.as_os_str().is_empty() {
        Some(target_root.to_path_buf())
    } else {
        Some(target_root.join(rest))
    }
}

/// Map `path` under `source_root` to the same relative location under `target_root`.
pub fn mirror_path(path: &Path, source_root: &Path, target_root: &Path) -> Option<PathBuf> {
    let rest = path.strip_prefix(source_root).ok()?;
    if rest.as_os_str().is_empty() {
        Some(target_root.to_path_buf())
    } else {
        Some(target_root.join(rest))
    }
}

/// Reject paths the kernel would refuse with `ENAMETOOLONG`.
pub fn check_path_len(path: &Path) -> Result<()> {
    let too_long = path.as_os_str().len() >= PATH_MAX
        || path
            .components()
            .any(|c| matches!(c, Component::Normal(name) if name.len() > NAME_MAX));
    if too_long {
        return Err(MirrorError::PathTooLong(path.to_path_buf()));
    }
    Ok(())
}
