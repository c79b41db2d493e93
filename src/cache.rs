use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::error::{Error, Result};

/// How long a fetched recipe index is reused before it is fetched again.
pub const INDEX_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Whether `path` exists and was modified less than `ttl` ago.
pub fn is_fresh<P: AsRef<Path>>(path: P, ttl: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < ttl)
}

/// Reads a cached value written by [`save`].
pub fn load<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| Error::fs("read", path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Writes `value` as JSON through a `.tmp` sibling renamed into place.
pub fn save<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::fs("mkdir", parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let json = serde_json::to_vec(value)?;
    std::fs::write(&tmp, json).map_err(|e| Error::fs("write", &tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::fs("rename", path, e))
}
