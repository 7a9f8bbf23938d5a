//! Sandbox path resolution.
//!
//! Every filesystem-touching tool resolves the caller-supplied path through
//! [`resolve`] before reading, writing, creating or listing anything. The
//! resolved path must be the sandbox root itself or a strict descendant of it.
//!
//! Containment is decided component-wise on normalized paths (`Path::starts_with`),
//! never by substring matching on the rendered string: `/work/sandbox-evil` is
//! *not* inside `/work/sandbox`.

use std::path::{Component, Path, PathBuf};

use crate::error::SandboxError;

/// Resolve `relative` against `base` and require the result to stay inside `base`.
///
/// `base` must be absolute. `relative` must not be absolute; `.` and `..`
/// segments are folded lexically, and any result that leaves `base` is a
/// [`SandboxError::Escape`]. When part of the resolved path already exists on
/// disk, its canonical form must also stay under the canonical `base`, so a
/// symlink inside the sandbox cannot be used to step outside of it.
///
/// An empty path (or `.` / `./`) resolves to `base` itself.
pub fn resolve(base: &Path, relative: &str) -> Result<PathBuf, SandboxError> {
    if relative.contains('\0') {
        return Err(SandboxError::NullByte);
    }
    if !base.is_absolute() {
        return Err(SandboxError::RelativeBase(base.to_path_buf()));
    }

    let requested = Path::new(relative.trim());
    if requested.has_root() || requested.is_absolute() {
        return Err(SandboxError::AbsolutePath(relative.to_string()));
    }

    let escape = || SandboxError::Escape {
        path: relative.to_string(),
        base: base.to_path_buf(),
    };

    let base = normalize(base).ok_or_else(escape)?;
    let resolved = normalize(&base.join(requested)).ok_or_else(escape)?;

    if !resolved.starts_with(&base) {
        return Err(escape());
    }

    if !stays_inside_on_disk(&base, &resolved) {
        return Err(escape());
    }

    Ok(resolved)
}

/// Fold `.` and `..` components of an absolute path without touching the disk.
///
/// Returns `None` when a `..` would climb above the filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => result.push(prefix.as_os_str()),
            Component::RootDir => result.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() || !result.has_root() {
                    return None;
                }
            }
            Component::Normal(part) => result.push(part),
        }
    }
    Some(result)
}

/// Check the deepest existing ancestor of `resolved` (at or below `base`)
/// against the canonical sandbox root.
fn stays_inside_on_disk(base: &Path, resolved: &Path) -> bool {
    let Ok(real_base) = base.canonicalize() else {
        // Nothing on disk under a missing root can redirect us.
        return true;
    };

    let mut cursor = Some(resolved);
    while let Some(candidate) = cursor {
        if !candidate.starts_with(base) {
            break;
        }
        if let Ok(real) = candidate.canonicalize() {
            return real.starts_with(&real_base);
        }
        cursor = candidate.parent();
    }
    true
}
