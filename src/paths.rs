use std::path::{Path, PathBuf};
use directories::BaseDirs;
use serde::Serialize;
use crate::error::{Error, Result};
use crate::recipe::{PathOverrides, Scope};

/// Root of system-scope installs.
pub const SYSTEM_ROOT: &str = "/usr/local/sth";

/// The five directory roles of an install root.
///
/// `bin` only ever holds symlinks into `pkgs/<name>-<version>/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paths {
    pub root_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub pkgs_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub manifests: PathBuf,
}

/// Default user-scope root: `~/.local/sth`.
pub fn user_root() -> Result<PathBuf> {
    let dirs = BaseDirs::new()
        .ok_or_else(|| Error::Config("could not determine home directory".into()))?;
    Ok(dirs.home_dir().join(".local").join("sth"))
}

/// Default root for `scope`.
pub fn default_root(scope: Scope) -> Result<PathBuf> {
    match scope {
        Scope::User => user_root(),
        Scope::System => Ok(PathBuf::from(SYSTEM_ROOT)),
    }
}

impl Paths {
    /// Every role derived from `root`.
    pub fn under<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            root_dir: root.to_path_buf(),
            bin_dir: root.join("bin"),
            pkgs_dir: root.join("pkgs"),
            cache_dir: root.join("cache"),
            manifests: root.join("manifests"),
        }
    }

    /// Applies overrides on top of `default_root`.
    ///
    /// An explicit root override wins over `default_root`; each other role
    /// falls back to `<root>/<role>` unless overridden itself.
    pub fn resolve(default_root: &Path, overrides: &PathOverrides) -> Self {
        let root = overrides
            .root_dir
            .clone()
            .unwrap_or_else(|| default_root.to_path_buf());
        let defaults = Self::under(&root);
        Self {
            root_dir: root,
            bin_dir: overrides.bin_dir.clone().unwrap_or(defaults.bin_dir),
            pkgs_dir: overrides.pkgs_dir.clone().unwrap_or(defaults.pkgs_dir),
            cache_dir: overrides.cache_dir.clone().unwrap_or(defaults.cache_dir),
            manifests: overrides.manifests.clone().unwrap_or(defaults.manifests),
        }
    }

    /// Creates the cache, pkgs and bin directories if they don't already exist.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.cache_dir, &self.pkgs_dir, &self.bin_dir] {
            std::fs::create_dir_all(dir).map_err(|e| Error::fs("mkdir", dir, e))?;
        }
        Ok(())
    }
}
