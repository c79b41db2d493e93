use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::template::{render, TemplateContext};

/// Which root tree an install targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    User,
    System,
}

/// Platform constraints for a recipe. Empty `os`/`arch` lists mean "any".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub os: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arch: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distro: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

/// Per-recipe directory overrides. Unset roles derive from the root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PathOverrides {
    pub root_dir: Option<PathBuf>,
    pub bin_dir: Option<PathBuf>,
    pub pkgs_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub manifests: Option<PathBuf>,
}

/// How the artifact's version is discovered at resolve time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawVersion", into = "RawVersion")]
pub struct VersionSource {
    /// Used whenever the strategy fails or is incompletely configured.
    pub fallback: Option<String>,
    pub strategy: VersionStrategy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VersionStrategy {
    Static {
        value: String,
    },
    GithubRelease {
        /// `owner/name`
        repo: String,
        prerelease: bool,
        /// Optional semver requirement, e.g. `>=1.4, <2`.
        constraint: String,
    },
    GithubTag {
        repo: String,
    },
    HttpJson {
        url: String,
        /// `$.tag_name`, `$.releases[0].version`, ...
        selector: String,
    },
    Regex {
        url: String,
        pattern: String,
    },
    /// A missing or unrecognised `type`. Resolves only through the fallback.
    Unsupported {
        kind: String,
        value: String,
    },
}

impl VersionStrategy {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Static { .. } => "static",
            Self::GithubRelease { .. } => "githubRelease",
            Self::GithubTag { .. } => "githubTag",
            Self::HttpJson { .. } => "httpJson",
            Self::Regex { .. } => "regex",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

impl VersionSource {
    /// True when neither a type, a value nor a fallback was written.
    pub fn is_empty(&self) -> bool {
        blank(&self.fallback)
            && matches!(
                &self.strategy,
                VersionStrategy::Unsupported { kind, value }
                    if kind.trim().is_empty() && value.trim().is_empty()
            )
    }
}

/// Wire form of a version source: one flat map keyed by `type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawVersion {
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    value: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    repo: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    prerelease: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    constraint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    selector: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback: Option<String>,
}

impl From<RawVersion> for VersionSource {
    fn from(raw: RawVersion) -> Self {
        let strategy = match raw.kind.trim() {
            "static" => VersionStrategy::Static { value: raw.value },
            "githubRelease" => VersionStrategy::GithubRelease {
                repo: raw.repo,
                prerelease: raw.prerelease,
                constraint: raw.constraint,
            },
            "githubTag" => VersionStrategy::GithubTag { repo: raw.repo },
            "httpJson" => VersionStrategy::HttpJson {
                url: raw.url,
                selector: raw.selector,
            },
            "regex" => VersionStrategy::Regex {
                url: raw.url,
                pattern: raw.pattern,
            },
            other => VersionStrategy::Unsupported {
                kind: other.to_string(),
                value: raw.value,
            },
        };
        VersionSource {
            fallback: raw.fallback,
            strategy,
        }
    }
}

impl From<VersionSource> for RawVersion {
    fn from(source: VersionSource) -> Self {
        let mut raw = RawVersion {
            kind: source.strategy.type_name().to_string(),
            fallback: source.fallback,
            ..Default::default()
        };
        match source.strategy {
            VersionStrategy::Static { value } => raw.value = value,
            VersionStrategy::GithubRelease {
                repo,
                prerelease,
                constraint,
            } => {
                raw.repo = repo;
                raw.prerelease = prerelease;
                raw.constraint = constraint;
            }
            VersionStrategy::GithubTag { repo } => raw.repo = repo,
            VersionStrategy::HttpJson { url, selector } => {
                raw.url = url;
                raw.selector = selector;
            }
            VersionStrategy::Regex { url, pattern } => {
                raw.url = url;
                raw.pattern = pattern;
            }
            VersionStrategy::Unsupported { kind, value } => {
                raw.kind = kind;
                raw.value = value;
            }
        }
        raw
    }
}

/// Archive format of the downloaded file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    #[default]
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "gz")]
    Gz,
    #[serde(rename = "tar.gz", alias = "tgz")]
    TarGz,
    #[serde(rename = "zip")]
    Zip,
}

impl ArchiveFormat {
    /// Extension appended to the cache file name.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Raw => "",
            Self::Gz => ".gz",
            Self::TarGz => ".tar.gz",
            Self::Zip => ".zip",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Gz => "gz",
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }
}

/// Template-bearing description of the downloadable thing a recipe installs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Artifact {
    /// Defaults to the recipe name.
    pub name: Option<String>,
    pub version: Option<VersionSource>,
    pub url_template: Option<String>,
    /// A literal sha256, or a URL to a file containing one.
    pub sha256_template: Option<String>,
    pub format: Option<ArchiveFormat>,
    /// Path of the binary inside the archive.
    pub inner_path: Option<String>,
    /// Octal mode for the exposed binary, e.g. `0755`.
    pub mode: Option<String>,
    /// Name of the link in the bin directory. Defaults to `name`.
    pub bin_name: Option<String>,
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

impl Artifact {
    /// True when nothing about the artifact is set (a pure shell recipe).
    pub fn is_empty(&self) -> bool {
        let version_empty = self.version.as_ref().is_none_or(VersionSource::is_empty);
        blank(&self.url_template)
            && blank(&self.sha256_template)
            && blank(&self.inner_path)
            && self.format.is_none()
            && blank(&self.name)
            && blank(&self.bin_name)
            && version_empty
    }

    pub fn effective_format(&self) -> ArchiveFormat {
        self.format.unwrap_or_default()
    }
}

/// One primitive installation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAction", into = "RawAction")]
pub struct InstallAction {
    pub kind: ActionKind,
    /// Elevation intent. Informational only; the engine never escalates.
    pub system: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    Download { url: String, dest: String },
    Verify { file: String, sha256: String },
    Mkdir { path: String, mode: Option<String> },
    Move { src: String, dest: String },
    Gunzip { src: String, dest: String, mode: Option<String> },
    Extract { src: String, dest: String },
    Chmod { path: String, mode: String },
    Symlink { src: String, dest: String },
    Shell { cmd: String },
}

impl InstallAction {
    pub fn new(kind: ActionKind) -> Self {
        Self { kind, system: false }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Renders every string argument through the template context.
    ///
    /// A failure names the action type and the offending argument.
    pub fn render(&self, ctx: &TemplateContext) -> Result<Self> {
        let action = self.type_name();
        let r = |key: &str, value: &str| -> Result<String> {
            render(value, ctx).map_err(|e| {
                Error::Template(format!("render action {action:?} arg {key:?}: {e}"))
            })
        };
        let ro = |key: &str, value: &Option<String>| -> Result<Option<String>> {
            value.as_deref().map(|v| r(key, v)).transpose()
        };
        let kind = match &self.kind {
            ActionKind::Download { url, dest } => ActionKind::Download {
                url: r("url", url)?,
                dest: r("dest", dest)?,
            },
            ActionKind::Verify { file, sha256 } => ActionKind::Verify {
                file: r("file", file)?,
                sha256: r("sha256", sha256)?,
            },
            ActionKind::Mkdir { path, mode } => ActionKind::Mkdir {
                path: r("path", path)?,
                mode: ro("mode", mode)?,
            },
            ActionKind::Move { src, dest } => ActionKind::Move {
                src: r("src", src)?,
                dest: r("dest", dest)?,
            },
            ActionKind::Gunzip { src, dest, mode } => ActionKind::Gunzip {
                src: r("src", src)?,
                dest: r("dest", dest)?,
                mode: ro("mode", mode)?,
            },
            ActionKind::Extract { src, dest } => ActionKind::Extract {
                src: r("src", src)?,
                dest: r("dest", dest)?,
            },
            ActionKind::Chmod { path, mode } => ActionKind::Chmod {
                path: r("path", path)?,
                mode: r("mode", mode)?,
            },
            ActionKind::Symlink { src, dest } => ActionKind::Symlink {
                src: r("src", src)?,
                dest: r("dest", dest)?,
            },
            ActionKind::Shell { cmd } => ActionKind::Shell { cmd: r("cmd", cmd)? },
        };
        Ok(Self {
            kind,
            system: self.system,
        })
    }
}

impl ActionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Download { .. } => "download",
            Self::Verify { .. } => "verify",
            Self::Mkdir { .. } => "mkdir",
            Self::Move { .. } => "move",
            Self::Gunzip { .. } => "gunzip",
            Self::Extract { .. } => "extract",
            Self::Chmod { .. } => "chmod",
            Self::Symlink { .. } => "symlink",
            Self::Shell { .. } => "shell",
        }
    }
}

impl fmt::Display for InstallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ActionKind::Download { url, dest } => write!(f, "download {url} -> {dest}"),
            ActionKind::Verify { file, sha256 } => write!(f, "verify {file} sha256={sha256}"),
            ActionKind::Mkdir { path, mode } => {
                write!(f, "mkdir {path} mode={}", mode.as_deref().unwrap_or("0755"))
            }
            ActionKind::Move { src, dest } => write!(f, "move {src} -> {dest}"),
            ActionKind::Gunzip { src, dest, .. } => write!(f, "gunzip {src} -> {dest}"),
            ActionKind::Extract { src, dest } => write!(f, "extract {src} -> {dest}"),
            ActionKind::Chmod { path, mode } => write!(f, "chmod {mode} {path}"),
            ActionKind::Symlink { src, dest } => write!(f, "symlink {dest} -> {src}"),
            ActionKind::Shell { cmd } => {
                let sys = if self.system { " (system)" } else { "" };
                write!(f, "shell{sys}: {cmd}")
            }
        }
    }
}

/// Wire form of an action: `{type, args: {..}, system}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    system: bool,
}

impl TryFrom<RawAction> for InstallAction {
    type Error = Error;

    fn try_from(mut raw: RawAction) -> Result<Self> {
        let kind_name = raw.kind.trim().to_ascii_lowercase();
        let mut take = |key: &str| -> Result<String> {
            raw.args.remove(key).ok_or_else(|| {
                Error::Config(format!("action {kind_name:?} is missing arg {key:?}"))
            })
        };
        let kind = match kind_name.as_str() {
            "download" => ActionKind::Download { url: take("url")?, dest: take("dest")? },
            "verify" => ActionKind::Verify { file: take("file")?, sha256: take("sha256")? },
            "mkdir" => ActionKind::Mkdir { path: take("path")?, mode: take("mode").ok() },
            "move" => ActionKind::Move { src: take("src")?, dest: take("dest")? },
            "gunzip" => ActionKind::Gunzip {
                src: take("src")?,
                dest: take("dest")?,
                mode: take("mode").ok(),
            },
            "extract" => ActionKind::Extract { src: take("src")?, dest: take("dest")? },
            "chmod" => ActionKind::Chmod { path: take("path")?, mode: take("mode")? },
            "symlink" => ActionKind::Symlink { src: take("src")?, dest: take("dest")? },
            "shell" => ActionKind::Shell { cmd: take("cmd")? },
            other => return Err(Error::Config(format!("unknown action type {other:?}"))),
        };
        Ok(InstallAction { kind, system: raw.system })
    }
}

impl From<InstallAction> for RawAction {
    fn from(action: InstallAction) -> Self {
        let kind = action.type_name().to_string();
        let mut args = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            args.insert(k.to_string(), v);
        };
        match action.kind {
            ActionKind::Download { url, dest } => {
                put("url", url);
                put("dest", dest);
            }
            ActionKind::Verify { file, sha256 } => {
                put("file", file);
                put("sha256", sha256);
            }
            ActionKind::Mkdir { path, mode } => {
                put("path", path);
                if let Some(mode) = mode {
                    put("mode", mode);
                }
            }
            ActionKind::Move { src, dest }
            | ActionKind::Extract { src, dest }
            | ActionKind::Symlink { src, dest } => {
                put("src", src);
                put("dest", dest);
            }
            ActionKind::Gunzip { src, dest, mode } => {
                put("src", src);
                put("dest", dest);
                if let Some(mode) = mode {
                    put("mode", mode);
                }
            }
            ActionKind::Chmod { path, mode } => {
                put("path", path);
                put("mode", mode);
            }
            ActionKind::Shell { cmd } => put("cmd", cmd),
        }
        RawAction {
            kind,
            args,
            system: action.system,
        }
    }
}

/// Declarative description of how to acquire and install one artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recipe {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub target: Target,
    pub scope: Scope,
    pub artifact: Artifact,
    /// Explicit actions. Empty means "synthesize from the artifact".
    pub actions: Vec<InstallAction>,
    pub paths: PathOverrides,
}

impl Recipe {
    /// Parses a recipe from YAML and applies defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Recipe> {
        let mut recipe: Recipe = serde_yaml_ng::from_str(yaml)?;
        recipe.normalize(None);
        Ok(recipe)
    }

    /// Loads a recipe file. An empty slug defaults to the parent folder name.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Recipe> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::fs("read", path, e))?;
        let mut recipe: Recipe = serde_yaml_ng::from_str(&yaml)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let folder = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|f| f.to_string_lossy().to_string());
        recipe.normalize(folder);
        Ok(recipe)
    }

    fn normalize(&mut self, folder: Option<String>) {
        if self.slug.trim().is_empty() {
            if let Some(folder) = folder {
                self.slug = folder;
            }
        }
        if self.name.trim().is_empty() {
            self.name = self.slug.clone();
        }
        self.target.os = normalize_list(&self.target.os);
        self.target.arch = normalize_list(&self.target.arch);
    }
}

/// Lower-cases, trims, de-duplicates and sorts a list of platform names.
pub fn normalize_list(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
