//! Unpacking of downloaded artifacts: `.tar.gz`/`.tgz`, `.zip` and plain gzip.
//!
//! Every entry name is lexically cleaned, then placed through the real
//! (canonical) extraction root: symlinks already on disk, including ones the
//! same archive created, are resolved before anything is written. Entries
//! that would land outside the destination are skipped, and so are symlinks
//! whose target resolves outside it. Everything else in the same archive is
//! still extracted.

use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};
use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, warn};
use zip::ZipArchive;
use crate::error::{Error, Result};
use crate::link::set_mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    TarGz,
    Zip,
}

fn kind_of(path: &Path) -> Option<Kind> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(Kind::TarGz)
    } else if name.ends_with(".zip") {
        Some(Kind::Zip)
    } else {
        None
    }
}

/// Extracts `src` into `dest`, choosing the reader by file suffix.
///
/// Without a recognised suffix tar.gz is tried first, then zip.
pub fn extract(src: &Path, dest: &Path) -> Result<()> {
    let root = Root::new(dest)?;
    debug!(src = %src.display(), dest = %root.path.display(), "extracting");
    match kind_of(src) {
        Some(Kind::TarGz) => extract_tar_gz(src, &root),
        Some(Kind::Zip) => extract_zip(src, &root),
        None => match extract_tar_gz(src, &root) {
            Ok(()) => Ok(()),
            Err(tar_err) => extract_zip(src, &root).map_err(|zip_err| {
                Error::Archive(format!(
                    "{}: not a tar.gz ({tar_err}) nor a zip ({zip_err})",
                    src.display()
                ))
            }),
        },
    }
}

/// Cleans an archive entry name into a path relative to the extraction root.
///
/// Leading `/` is dropped. Returns `None` when the name is empty after
/// cleaning or climbs above the root with `..`.
pub fn clean_entry_path(name: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                parts.pop()?;
            }
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

/// The canonical extraction root. All writes are resolved through it.
struct Root {
    path: PathBuf,
}

impl Root {
    fn new(dest: &Path) -> Result<Self> {
        fs::create_dir_all(dest).map_err(|e| Error::fs("mkdir", dest, e))?;
        let path = fs::canonicalize(dest).map_err(|e| Error::fs("canonicalize", dest, e))?;
        Ok(Self { path })
    }

    fn contains(&self, path: &Path) -> bool {
        path != self.path && path.starts_with(&self.path)
    }

    /// Creates the directories of the clean relative path `rel` one level at
    /// a time and returns the real directory. Existing symlinks on the way are
    /// followed only while they resolve to a directory under the root.
    fn dir(&self, rel: &Path) -> Result<Option<PathBuf>> {
        let mut cur = self.path.clone();
        for part in rel.iter() {
            cur.push(part);
            match fs::symlink_metadata(&cur) {
                Ok(meta) if meta.file_type().is_symlink() => match fs::canonicalize(&cur) {
                    Ok(real) if self.contains(&real) && real.is_dir() => cur = real,
                    _ => return Ok(None),
                },
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(Error::Archive(format!("{} is not a directory", cur.display())));
                }
                Err(_) => fs::create_dir(&cur).map_err(|e| Error::fs("mkdir", &cur, e))?,
            }
        }
        Ok(Some(cur))
    }

    /// Real path for the entry `rel`: its resolved parent plus its file name.
    fn place(&self, rel: &Path) -> Result<Option<PathBuf>> {
        let Some(name) = rel.file_name() else {
            return Ok(None);
        };
        let parent = rel.parent().unwrap_or(Path::new(""));
        Ok(self.dir(parent)?.map(|dir| dir.join(name)))
    }

    /// Follows a symlink `target` from the real directory `from` the way the
    /// OS would. Every symlink met on the way must resolve under the root, a
    /// `..` may only leave a directory that exists, and the end point must be
    /// strictly inside the root.
    fn link_stays_inside(&self, from: &Path, target: &Path) -> bool {
        let mut cur = from.to_path_buf();
        for component in target.components() {
            match component {
                Component::Normal(part) => {
                    cur.push(part);
                    let is_link = fs::symlink_metadata(&cur)
                        .is_ok_and(|meta| meta.file_type().is_symlink());
                    if is_link {
                        match fs::canonicalize(&cur) {
                            Ok(real) if real.starts_with(&self.path) => cur = real,
                            _ => return false,
                        }
                    }
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if !self.contains(&cur) || !cur.is_dir() {
                        return false;
                    }
                    cur.pop();
                }
                Component::RootDir | Component::Prefix(_) => return false,
            }
        }
        self.contains(&cur)
    }
}

fn archive_err(src: &Path, e: impl std::fmt::Display) -> Error {
    Error::Archive(format!("{}: {e}", src.display()))
}

/// Removes a symlink sitting where a regular entry is about to be written,
/// so the write never follows it.
fn clear_link(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(path).map_err(|e| Error::fs("remove", path, e))
        }
        _ => Ok(()),
    }
}

fn skip_outside(rel: &Path) {
    warn!(entry = %rel.display(), "skipping archive entry outside the destination");
}

fn write_file<R: Read>(reader: &mut R, root: &Root, rel: &Path, mode: Option<u32>) -> Result<()> {
    let Some(target) = root.place(rel)? else {
        skip_outside(rel);
        return Ok(());
    };
    clear_link(&target)?;
    let mut out = File::create(&target).map_err(|e| Error::fs("create", &target, e))?;
    io::copy(reader, &mut out).map_err(|e| Error::fs("write", &target, e))?;
    if let Some(mode) = mode {
        set_mode(&target, mode & 0o7777)?;
    }
    Ok(())
}

fn write_dir(root: &Root, rel: &Path, mode: Option<u32>) -> Result<()> {
    let Some(target) = root.dir(rel)? else {
        skip_outside(rel);
        return Ok(());
    };
    if let Some(mode) = mode {
        set_mode(&target, mode & 0o7777)?;
    }
    Ok(())
}

fn write_symlink(root: &Root, rel: &Path, link_target: &Path) -> Result<()> {
    let Some(path) = root.place(rel)? else {
        skip_outside(rel);
        return Ok(());
    };
    if fs::symlink_metadata(&path).is_ok() {
        warn!(entry = %rel.display(), "skipping symlink over an existing entry");
        return Ok(());
    }
    let from = path.parent().unwrap_or(&root.path);
    if !root.link_stays_inside(from, link_target) {
        warn!(entry = %rel.display(), target = %link_target.display(), "skipping symlink that leaves the archive root");
        return Ok(());
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(link_target, &path).map_err(|e| Error::fs("symlink", &path, e))?;
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(link_target, &path)
            .map_err(|e| Error::fs("symlink", &path, e))?;
    }
    Ok(())
}

fn extract_tar_gz(src: &Path, root: &Root) -> Result<()> {
    let file = File::open(src).map_err(|e| Error::fs("open", src, e))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let entries = archive.entries().map_err(|e| archive_err(src, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_err(src, e))?;
        let raw = entry.path().map_err(|e| archive_err(src, e))?.into_owned();
        let Some(rel) = clean_entry_path(&raw) else {
            skip_outside(&raw);
            continue;
        };
        let kind = entry.header().entry_type();
        let mode = entry.header().mode().ok();
        if kind.is_dir() {
            write_dir(root, &rel, mode)?;
        } else if kind.is_symlink() {
            let link = entry.link_name().map_err(|e| archive_err(src, e))?;
            match link {
                Some(link) => write_symlink(root, &rel, &link.into_owned())?,
                None => warn!(entry = %raw.display(), "symlink entry without a target"),
            }
        } else if kind.is_file() {
            write_file(&mut entry, root, &rel, mode)?;
        } else {
            debug!(entry = %raw.display(), ?kind, "skipping unsupported tar entry");
        }
    }
    Ok(())
}

fn extract_zip(src: &Path, root: &Root) -> Result<()> {
    let file = File::open(src).map_err(|e| Error::fs("open", src, e))?;
    extract_zip_from(file, src, root)
}

fn extract_zip_from<R: Read + Seek>(reader: R, src: &Path, root: &Root) -> Result<()> {
    let mut archive = ZipArchive::new(reader).map_err(|e| archive_err(src, e))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| archive_err(src, e))?;
        let raw = PathBuf::from(entry.name());
        let Some(rel) = clean_entry_path(&raw) else {
            skip_outside(&raw);
            continue;
        };
        let mode = entry.unix_mode();
        if entry.is_dir() {
            write_dir(root, &rel, mode)?;
        } else if entry.is_symlink() {
            let mut link = String::new();
            entry
                .read_to_string(&mut link)
                .map_err(|e| archive_err(src, e))?;
            write_symlink(root, &rel, Path::new(&link))?;
        } else {
            write_file(&mut entry, root, &rel, mode)?;
        }
    }
    Ok(())
}

/// Decompresses a single gzip stream `src` into `dest`, then applies `mode`.
pub fn gunzip(src: &Path, dest: &Path, mode: Option<u32>) -> Result<()> {
    let file = File::open(src).map_err(|e| Error::fs("open", src, e))?;
    let mut decoder = GzDecoder::new(file);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::fs("mkdir", parent, e))?;
    }
    clear_link(dest)?;
    let mut out = File::create(dest).map_err(|e| Error::fs("create", dest, e))?;
    io::copy(&mut decoder, &mut out).map_err(|e| archive_err(src, e))?;
    if let Some(mode) = mode {
        set_mode(dest, mode)?;
    }
    Ok(())
}
