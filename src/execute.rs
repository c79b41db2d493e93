use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use sth::cancel::CancelToken;
use sth::config::{index_cache_path, EngineConfig};
use sth::executor::{Executor, Outcome, INSTALL_TIMEOUT};
use sth::http::HttpClient;
use sth::index::{fetch_index, fetch_recipe, generate_index, RecipeIndex};
use sth::platform::PlatformInfo;
use sth::recipe::{Recipe, Scope};
use sth::report::ExecOptions;
use sth::resolver::Resolver;
use crate::cli::{SthCommand, CLI};

pub fn execute(cli: CLI, cancel: &CancelToken) -> Result<()> {
    match cli.command {
        SthCommand::Install { recipe, system, root, quiet, dry_run } => {
            let options = ExecOptions {
                quiet,
                verbose: cli.verbose,
                dry_run,
            };
            execute_install(&recipe, system, root, options, cancel)
        }
        SthCommand::Plan { recipe, system, root, json } => {
            execute_plan(&recipe, system, root, json, cancel)
        }
        SthCommand::List => {
            execute_list(cancel)
        }
        SthCommand::Index { dir, output } => {
            execute_index(&dir, &output)
        }
    }
}

fn http_client(config: &EngineConfig) -> Result<HttpClient> {
    Ok(HttpClient::new()?.with_github_api(config.github_api.clone()))
}

fn load_index(config: &EngineConfig, http: &HttpClient, cancel: &CancelToken) -> Result<RecipeIndex> {
    let cache_file = index_cache_path().ok();
    fetch_index(http, &config.index_url, cache_file.as_deref(), cancel)
        .with_context(|| format!("could not load recipe index from {}", config.index_url))
}

/// A path to a recipe file, else a key or slug looked up in the index.
fn load_recipe(
    recipe_ref: &str,
    config: &EngineConfig,
    http: &HttpClient,
    cancel: &CancelToken,
) -> Result<Recipe> {
    let path = Path::new(recipe_ref);
    if path.is_file() {
        return Ok(Recipe::load(path)?);
    }
    let index = load_index(config, http, cancel)?;
    let (key, entry) = index
        .find_entry(recipe_ref)
        .ok_or_else(|| anyhow!("recipe not found: {recipe_ref}"))?;
    tracing::debug!(%key, path = %entry.path, "found recipe in index");
    Ok(fetch_recipe(http, &config.recipes_base, entry, cancel)?)
}

fn prepare(
    recipe_ref: &str,
    system: bool,
    root: Option<PathBuf>,
    cancel: &CancelToken,
) -> Result<(Recipe, Resolver, HttpClient)> {
    let config = EngineConfig::load_default()?;
    let http = http_client(&config)?;
    let mut recipe = load_recipe(recipe_ref, &config, &http, cancel)?;
    if system {
        recipe.scope = Scope::System;
    } else if let Some(scope) = config.scope {
        recipe.scope = scope;
    }
    let resolver = Resolver::new(http.clone(), PlatformInfo::detect())
        .with_root(root.or(config.root));
    Ok((recipe, resolver, http))
}

pub fn execute_install(
    recipe_ref: &str,
    system: bool,
    root: Option<PathBuf>,
    options: ExecOptions,
    cancel: &CancelToken,
) -> Result<()> {
    let cancel = cancel.child_with_timeout(INSTALL_TIMEOUT);
    let (recipe, resolver, http) = prepare(recipe_ref, system, root, &cancel)?;
    let resolved = resolver
        .resolve(&recipe, &cancel)
        .with_context(|| format!("resolve {}", recipe.name))?;
    let outcome = Executor::new(http, options)
        .execute(&resolved, &cancel)
        .with_context(|| format!("install {}", recipe.name))?;
    tracing::debug!(?outcome, recipe = %recipe.name, "install finished");
    if outcome == Outcome::DryRun && !options.quiet {
        println!("Dry run: nothing was changed");
    }
    Ok(())
}

pub fn execute_plan(
    recipe_ref: &str,
    system: bool,
    root: Option<PathBuf>,
    json: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let (recipe, resolver, _) = prepare(recipe_ref, system, root, cancel)?;
    let resolved = resolver
        .resolve(&recipe, cancel)
        .with_context(|| format!("resolve {}", recipe.name))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }
    println!("{}", recipe.name.bold());
    if let Some(artifact) = &resolved.artifact {
        println!("  version: {}", artifact.version);
        println!("  url: {}", artifact.url);
        println!("  binary: {}", artifact.binary_path.display());
    }
    println!("  root: {}", resolved.paths.root_dir.display());
    if resolved.actions.is_empty() {
        println!("  no actions");
    }
    for (i, action) in resolved.actions.iter().enumerate() {
        println!("  {}. {}", i + 1, action);
    }
    Ok(())
}

pub fn execute_list(cancel: &CancelToken) -> Result<()> {
    let config = EngineConfig::load_default()?;
    let http = http_client(&config)?;
    let index = load_index(&config, &http, cancel)?;
    if index.recipes.is_empty() {
        println!("No recipes");
        return Ok(());
    }
    println!("Available recipes:");
    for (key, entry) in &index.recipes {
        println!(
            " - {}: {} ({}) -> {}",
            key.green(),
            entry.name,
            entry.qualifiers(),
            entry.path
        );
        if !entry.description.is_empty() {
            println!("     {}", entry.description.dimmed());
        }
    }
    Ok(())
}

pub fn execute_index(dir: &Path, output: &Path) -> Result<()> {
    let index = generate_index(dir)?;
    index.write(output)?;
    println!("Wrote {} ({} recipes)", output.display(), index.recipes.len());
    Ok(())
}
