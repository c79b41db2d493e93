//! Symlinks, permission bits and `PATH` membership.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use crate::error::{Error, Result};

/// Parses an octal mode string such as `0755` or `755`.
///
/// An empty string means "leave the mode alone" and yields `None`.
pub fn parse_mode(mode: &str) -> Result<Option<u32>> {
    let mode = mode.trim();
    if mode.is_empty() {
        return Ok(None);
    }
    let digits = mode.strip_prefix("0o").unwrap_or(mode);
    u32::from_str_radix(digits, 8)
        .map(Some)
        .map_err(|_| Error::Config(format!("invalid file mode {mode:?}")))
}

/// Applies a POSIX mode. A no-op on non-Unix targets.
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| Error::fs("chmod", path, e))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

/// Checks if a given path is a file with at least one executable bit on Unix.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Checks if a given path has a Windows executable extension (.exe, .bat, .cmd).
#[cfg(windows)]
pub fn is_executable(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        let ext = ext.to_ascii_lowercase();
        path.is_file() && matches!(ext.as_str(), "exe" | "bat" | "cmd")
    } else {
        false
    }
}

/// Lexically normalises a path: drops `.`, folds `..` into its parent.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::ParentDir)
                ) && !out.has_root();
                if at_root {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether `link` is a symlink whose target is `want`.
///
/// Relative link targets are resolved against the link's own directory.
pub fn links_to(link: &Path, want: &Path) -> bool {
    let Ok(target) = std::fs::read_link(link) else {
        return false;
    };
    let target = if target.is_relative() {
        link.parent().map(|p| p.join(&target)).unwrap_or(target)
    } else {
        target
    };
    clean_path(&target) == clean_path(want)
}

/// Points `dest` at `src`, replacing a file, a link or an empty directory
/// at `dest`. A non-empty directory is left alone and reported as an error.
///
/// Does nothing when `dest` already links to `src`.
pub fn create_symlink(src: &Path, dest: &Path) -> Result<()> {
    if links_to(dest, src) {
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::fs("mkdir", parent, e))?;
    }
    if let Ok(meta) = std::fs::symlink_metadata(dest) {
        let removed = if meta.is_dir() {
            std::fs::remove_dir(dest)
        } else {
            std::fs::remove_file(dest)
        };
        removed.map_err(|e| Error::fs("remove", dest, e))?;
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(src, dest).map_err(|e| Error::fs("symlink", dest, e))?;
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(src, dest).map_err(|e| Error::fs("symlink", dest, e))?;
    }
    Ok(())
}

/// Whether `dir` is one of the entries of a `PATH`-style variable.
pub fn path_contains(dir: &Path, path_env: &OsStr) -> bool {
    let want = clean_path(dir);
    std::env::split_paths(path_env).any(|entry| clean_path(&entry) == want)
}
