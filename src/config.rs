//! Optional user configuration, read from `<config dir>/config.toml`.
//!
//! ```toml
//! root = "/opt/sth"
//! scope = "user"
//! index_url = "https://example.com/sthpkgs/index.yaml"
//! recipes_base = "https://example.com/sthpkgs/"
//! github_api = "https://api.github.com"
//! ```

use std::path::{Path, PathBuf};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::http::GITHUB_API;
use crate::recipe::Scope;

pub const INDEX_URL: &str = "https://raw.githubusercontent.com/aottr/sthpkgs/refs/heads/main/index.yaml";
pub const RECIPES_BASE: &str = "https://raw.githubusercontent.com/aottr/sthpkgs/refs/heads/main/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Replaces the scope-derived install root.
    pub root: Option<PathBuf>,
    /// Overrides every recipe's own scope. `--system` wins over it.
    pub scope: Option<Scope>,
    pub index_url: String,
    /// Prefix joined with an index entry's `path` to fetch a recipe.
    pub recipes_base: String,
    pub github_api: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: None,
            scope: None,
            index_url: INDEX_URL.to_string(),
            recipes_base: RECIPES_BASE.to_string(),
            github_api: GITHUB_API.to_string(),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "sth", "sth")
        .ok_or_else(|| Error::Config("could not determine project directories".into()))
}

/// `$STH_CONFIG`, else `<config dir>/config.toml`.
pub fn config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("STH_CONFIG").filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Where the fetched recipe index is cached.
pub fn index_cache_path() -> Result<PathBuf> {
    Ok(project_dirs()?.cache_dir().join("index.json"))
}

impl EngineConfig {
    /// Loads a config file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(EngineConfig::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::fs("read", path, e))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Loads the config from its default location.
    pub fn load_default() -> Result<EngineConfig> {
        Self::load(config_path()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("config.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "root = \"/opt/sth\"\nscope = \"system\"\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.root, Some(PathBuf::from("/opt/sth")));
        assert_eq!(config.scope, Some(Scope::System));
        assert_eq!(config.index_url, INDEX_URL);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "root = [").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "index_url = \"http://localhost:1234/index.yaml\"\n\
             recipes_base = \"http://localhost:1234/\"\n\
             github_api = \"http://localhost:1234\"\n",
        )
        .unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.index_url, "http://localhost:1234/index.yaml");
        assert_eq!(config.recipes_base, "http://localhost:1234/");
        assert_eq!(config.github_api, "http://localhost:1234");
        assert_eq!(config.root, None);
    }
}
