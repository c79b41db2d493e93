use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    #[command(subcommand)]
    pub(crate) command: SthCommand,
    /// Show debug output (overridden by `STH_LOG`)
    #[clap(short, long, global = true)]
    pub(crate) verbose: bool,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum SthCommand {
    /// Resolves and installs a recipe. `<recipe>` is a path to a recipe file,
    /// or a key/slug from the recipe index
    Install {
        recipe: String,
        /// Install into the system-wide root instead of the user root
        #[clap(long)]
        system: bool,
        /// Install root, replacing the scope default
        #[clap(long)]
        root: Option<PathBuf>,
        /// Only print errors
        #[clap(short, long)]
        quiet: bool,
        /// Print the steps without running them
        #[clap(long)]
        dry_run: bool,
    },
    /// Resolves a recipe and prints its actions without running them
    Plan {
        recipe: String,
        #[clap(long)]
        system: bool,
        #[clap(long)]
        root: Option<PathBuf>,
        /// Print the full resolve result as JSON
        #[clap(long)]
        json: bool,
    },
    /// Lists the recipes in the recipe index
    List,
    /// Generates an index from a directory of `<name>/recipe.yaml` files
    Index {
        dir: PathBuf,
        /// Where to write the index
        #[clap(short, long, default_value = "index.yaml")]
        output: PathBuf,
    },
}
