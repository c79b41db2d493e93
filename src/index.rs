//! The recipe catalogue: an `index.yaml` mapping keys like `kubectl@linux`
//! or `nvim@system` to the recipe file they come from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use crate::cache;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::recipe::{normalize_list, Recipe, Scope};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeIndex {
    #[serde(default)]
    pub recipes: BTreeMap<String, RecipeIndexEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeIndexEntry {
    pub slug: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Recipe file, relative to the recipes base URL.
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub os: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distro: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arch: Vec<String>,
    pub scope: Scope,
}

impl RecipeIndexEntry {
    /// `os=linux|darwin, arch=amd64, scope=system`
    pub fn qualifiers(&self) -> String {
        let mut quals = Vec::new();
        if !self.os.is_empty() {
            quals.push(format!("os={}", self.os.join("|")));
        }
        if !self.arch.is_empty() {
            quals.push(format!("arch={}", self.arch.join("|")));
        }
        quals.push(format!(
            "scope={}",
            match self.scope {
                Scope::User => "user",
                Scope::System => "system",
            }
        ));
        quals.join(", ")
    }
}

/// Index key for a recipe found in `folder`.
///
/// A single OS and/or arch restriction is appended as `@os-arch`, `@os` or
/// `@arch`; system scope adds `system` to the qualifiers.
pub fn index_key(folder: &str, recipe: &Recipe) -> String {
    let base = match folder.trim() {
        "" => match recipe.slug.trim() {
            "" => "unknown",
            slug => slug,
        },
        folder => folder,
    };
    let os = normalize_list(&recipe.target.os);
    let arch = normalize_list(&recipe.target.arch);
    let mut key = match (os.as_slice(), arch.as_slice()) {
        ([os], [arch]) => format!("{base}@{os}-{arch}"),
        ([os], []) => format!("{base}@{os}"),
        ([], [arch]) => format!("{base}@{arch}"),
        _ => base.to_string(),
    };
    if recipe.scope == Scope::System {
        key.push_str(if key.contains('@') { ",system" } else { "@system" });
    }
    key
}

fn is_recipe_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .is_some_and(|name| name == "recipe.yml" || name == "recipe.yaml")
}

/// Scans `recipes_dir` for `recipe.yml`/`recipe.yaml` files and indexes them.
///
/// Entry paths are relative to the parent of `recipes_dir`, so an index
/// written next to the `recipes/` folder resolves them directly.
pub fn generate_index<P: AsRef<Path>>(recipes_dir: P) -> Result<RecipeIndex> {
    let dir = recipes_dir.as_ref();
    let root = std::fs::canonicalize(dir).map_err(|e| Error::fs("read", dir, e))?;
    let base = root.parent().unwrap_or(&root).to_path_buf();

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Config(format!("scan {}: {e}", dir.display())))?;
        if entry.file_type().is_file() && is_recipe_file(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }
    if files.is_empty() {
        return Err(Error::Config(format!("no recipes found in {}", dir.display())));
    }

    let mut index = RecipeIndex::default();
    for file in files {
        let recipe = Recipe::load(&file)?;
        let folder = file
            .parent()
            .and_then(|p| p.file_name())
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = index_key(&folder, &recipe);
        if index.recipes.contains_key(&key) {
            return Err(Error::Config(format!(
                "duplicate index key {key:?} (path {})",
                file.display()
            )));
        }
        let rel = file.strip_prefix(&base).unwrap_or(&file);
        let path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        debug!(%key, %path, "indexed recipe");
        index.recipes.insert(
            key,
            RecipeIndexEntry {
                slug: recipe.slug,
                name: recipe.name,
                description: recipe.description,
                path,
                os: recipe.target.os,
                distro: recipe.target.distro,
                family: recipe.target.family,
                arch: recipe.target.arch,
                scope: recipe.scope,
            },
        );
    }
    Ok(index)
}

impl RecipeIndex {
    pub fn from_yaml_str(yaml: &str) -> Result<RecipeIndex> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Writes the index as YAML, keys sorted.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml_ng::to_string(self)?;
        std::fs::write(path, yaml).map_err(|e| Error::fs("write", path, e))
    }

    /// Exact key first, then the first entry (by key) whose slug contains `name`.
    pub fn find_entry(&self, name: &str) -> Option<(&str, &RecipeIndexEntry)> {
        if let Some((key, entry)) = self.recipes.get_key_value(name) {
            return Some((key.as_str(), entry));
        }
        self.recipes
            .iter()
            .find(|(_, entry)| entry.slug.contains(name))
            .map(|(key, entry)| (key.as_str(), entry))
    }
}

/// Fetches the index from `url`, reusing `cache_file` while it is fresh.
///
/// A cache that can't be read or written never fails the fetch.
pub fn fetch_index(
    http: &HttpClient,
    url: &str,
    cache_file: Option<&Path>,
    cancel: &CancelToken,
) -> Result<RecipeIndex> {
    if let Some(cache_file) = cache_file {
        if cache::is_fresh(cache_file, cache::INDEX_TTL) {
            match cache::load::<RecipeIndex, _>(cache_file) {
                Ok(index) => {
                    debug!(path = %cache_file.display(), "using cached recipe index");
                    return Ok(index);
                }
                Err(e) => warn!("failed to load cached index, fetching again: {e}"),
            }
        }
    }
    info!(%url, "downloading recipe index");
    let body = http.get_text(url, cancel)?;
    let index = RecipeIndex::from_yaml_str(&body)?;
    if let Some(cache_file) = cache_file {
        if let Err(e) = cache::save(cache_file, &index) {
            warn!("failed to cache recipe index: {e}");
        }
    }
    Ok(index)
}

/// Downloads and parses the recipe an index entry points at.
pub fn fetch_recipe(
    http: &HttpClient,
    base: &str,
    entry: &RecipeIndexEntry,
    cancel: &CancelToken,
) -> Result<Recipe> {
    let url = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        entry.path.trim_start_matches('/')
    );
    info!(%url, recipe = %entry.slug, "downloading recipe");
    let body = http.get_text(&url, cancel)?;
    let mut recipe = Recipe::from_yaml_str(&body)?;
    if recipe.slug.trim().is_empty() {
        recipe.slug = entry.slug.clone();
    }
    if recipe.name.trim().is_empty() {
        recipe.name = recipe.slug.clone();
    }
    Ok(recipe)
}
