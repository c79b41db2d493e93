//! # sth Core Library
//!
//! Resolution and execution engine for `sth` recipes: declarative YAML files
//! that describe how to fetch a release artifact (a raw binary, a gzip file,
//! a tarball or a zip), verify it, unpack it into a versioned package
//! directory and link its binary into a `bin/` directory.
//!
//! An install is two steps. [`Resolver::resolve`] turns a [`Recipe`] into a
//! [`ResolveResult`] with a concrete version and a fully rendered action
//! list; [`Executor::execute`] runs that list, or does nothing if the recipe
//! is already installed.
//!
//! ## Modules Overview
//! - [`recipe`] – The recipe data model and YAML loading
//! - [`template`] – `{{.Name}}`-style templates used throughout recipes
//! - [`version`] – Version discovery (static, GitHub releases/tags, JSON, regex)
//! - [`checksum`] – Literal or remote sha256 values and file verification
//! - [`resolver`] – Recipe → [`ResolveResult`]
//! - [`executor`] – Runs actions, with the idempotency gate
//! - [`archive`] – tar.gz/zip/gzip extraction with traversal checks
//! - [`index`] – The recipe catalogue and its cache
//! - [`config`] – Optional `config.toml`
//! - [`cancel`] – Cancellation and deadlines

pub mod archive;
pub mod cache;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod index;
pub mod link;
pub mod paths;
pub mod platform;
pub mod recipe;
pub mod report;
pub mod resolver;
pub mod template;
pub mod version;

#[cfg(test)]
mod test_support;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use executor::{Executor, Outcome};
pub use http::HttpClient;
pub use index::{RecipeIndex, RecipeIndexEntry};
pub use paths::Paths;
pub use platform::PlatformInfo;
pub use recipe::{ActionKind, Artifact, InstallAction, Recipe, Scope, Target, VersionSource};
pub use report::ExecOptions;
pub use resolver::{ArtifactResolved, ResolveResult, Resolver};
