//! Turns a [`Recipe`] into a [`ResolveResult`]: a concrete version, rendered
//! URLs, the on-disk layout and a fully rendered action list.
//!
//! Nothing here touches the install tree. The only I/O is the network calls
//! made by version discovery and checksum lookup.

use std::path::{Path, PathBuf};
use serde::Serialize;
use tracing::debug;
use crate::cancel::CancelToken;
use crate::checksum::resolve_checksum;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::paths::{default_root, Paths};
use crate::platform::PlatformInfo;
use crate::recipe::{ActionKind, ArchiveFormat, InstallAction, Recipe, Target};
use crate::template::{context, render, TemplateContext};
use crate::version::resolve_version;

/// The artifact after version discovery and rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactResolved {
    pub name: String,
    pub version: String,
    pub url: String,
    pub sha256: Option<String>,
    pub format: ArchiveFormat,
    pub inner_path: Option<String>,
    pub mode: Option<String>,
    pub bin_name: String,
    /// `<cache>/<name>-<version><ext>`
    pub cache_file: PathBuf,
    /// `<pkgs>/<name>-<version>`
    pub install_dir: PathBuf,
    pub binary_path: PathBuf,
}

/// Everything the executor needs, and nothing it has to compute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveResult {
    pub recipe: Recipe,
    pub target: Target,
    pub paths: Paths,
    /// `None` for recipes that only run their own actions.
    pub artifact: Option<ArtifactResolved>,
    pub actions: Vec<InstallAction>,
}

impl ResolveResult {
    /// `<bin>/<binName>`, the link the idempotency check looks at.
    pub fn link_path(&self) -> Option<PathBuf> {
        self.artifact
            .as_ref()
            .map(|a| self.paths.bin_dir.join(&a.bin_name))
    }
}

/// Resolves recipes for one platform.
#[derive(Debug, Clone)]
pub struct Resolver {
    http: HttpClient,
    platform: PlatformInfo,
    root: Option<PathBuf>,
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn contains_fold(list: &[String], value: &str) -> bool {
    let value = value.trim().to_lowercase();
    list.iter().any(|item| item.trim().to_lowercase() == value)
}

/// Fails unless the detected OS and arch are in the target's allow-lists.
///
/// An empty list allows everything.
pub fn ensure_target_supported(target: &Target, platform: &PlatformInfo) -> Result<()> {
    if !target.os.is_empty() && !contains_fold(&target.os, &platform.os) {
        return Err(Error::UnsupportedTarget {
            kind: "OS",
            detected: platform.os.clone(),
            allowed: target.os.clone(),
        });
    }
    if !target.arch.is_empty() && !contains_fold(&target.arch, &platform.arch) {
        return Err(Error::UnsupportedTarget {
            kind: "Arch",
            detected: platform.arch.clone(),
            allowed: target.arch.clone(),
        });
    }
    Ok(())
}

/// The effective target: the recipe's lists, with distro and family filled
/// in from the platform where the recipe leaves them unset.
pub fn merge_target(declared: &Target, platform: &PlatformInfo) -> Target {
    let pick = |own: &Option<String>, detected: &str| {
        non_blank(own)
            .map(str::to_string)
            .or_else(|| (!detected.is_empty()).then(|| detected.to_string()))
    };
    Target {
        os: declared.os.clone(),
        arch: declared.arch.clone(),
        distro: pick(&declared.distro, &platform.distro),
        family: pick(&declared.family, &platform.family),
    }
}

/// Canonical action sequence for an artifact without explicit actions.
pub fn default_actions(artifact: &ArtifactResolved, paths: &Paths) -> Vec<InstallAction> {
    let cache_file = path_arg(&artifact.cache_file);
    let binary = path_arg(&artifact.binary_path);
    let mut actions = vec![InstallAction::new(ActionKind::Download {
        url: artifact.url.clone(),
        dest: cache_file.clone(),
    })];
    if let Some(sha256) = &artifact.sha256 {
        actions.push(InstallAction::new(ActionKind::Verify {
            file: cache_file.clone(),
            sha256: sha256.clone(),
        }));
    }
    actions.push(InstallAction::new(ActionKind::Mkdir {
        path: path_arg(&artifact.install_dir),
        mode: Some("0755".into()),
    }));
    actions.push(InstallAction::new(match artifact.format {
        ArchiveFormat::Raw => ActionKind::Move {
            src: cache_file,
            dest: binary.clone(),
        },
        ArchiveFormat::Gz => ActionKind::Gunzip {
            src: cache_file,
            dest: binary.clone(),
            mode: artifact.mode.clone(),
        },
        ArchiveFormat::TarGz | ArchiveFormat::Zip => ActionKind::Extract {
            src: cache_file,
            dest: path_arg(&artifact.install_dir),
        },
    }));
    if let Some(mode) = &artifact.mode {
        actions.push(InstallAction::new(ActionKind::Chmod {
            path: binary.clone(),
            mode: mode.clone(),
        }));
    }
    actions.push(InstallAction::new(ActionKind::Symlink {
        src: binary,
        dest: path_arg(&paths.bin_dir.join(&artifact.bin_name)),
    }));
    actions
}

impl Resolver {
    pub fn new(http: HttpClient, platform: PlatformInfo) -> Self {
        Self {
            http,
            platform,
            root: None,
        }
    }

    /// Replaces the scope-derived root. A recipe's own `rootDir` still wins.
    pub fn with_root(mut self, root: Option<PathBuf>) -> Self {
        self.root = root;
        self
    }

    fn base_context(&self, name: &str, version: &str) -> TemplateContext {
        context([
            ("Name", name),
            ("Version", version),
            ("OS", self.platform.os.as_str()),
            ("Arch", self.platform.arch.as_str()),
            ("Distro", self.platform.distro.as_str()),
            ("Family", self.platform.family.as_str()),
        ])
    }

    pub fn resolve(&self, recipe: &Recipe, cancel: &CancelToken) -> Result<ResolveResult> {
        let target = merge_target(&recipe.target, &self.platform);
        ensure_target_supported(&target, &self.platform)?;

        let root = match &self.root {
            Some(root) => root.clone(),
            None => default_root(recipe.scope)?,
        };
        let paths = Paths::resolve(&root, &recipe.paths);

        if recipe.artifact.is_empty() {
            debug!(recipe = %recipe.name, "no artifact; passing actions through");
            return Ok(ResolveResult {
                recipe: recipe.clone(),
                target,
                paths,
                artifact: None,
                actions: recipe.actions.clone(),
            });
        }

        let declared = &recipe.artifact;
        let version = match &declared.version {
            Some(source) => resolve_version(&self.http, source, cancel),
            None => Err(Error::Config("artifact has no version source".into())),
        }
        .map_err(|e| e.in_stage("resolve version"))?;

        let name = non_blank(&declared.name).unwrap_or(recipe.name.as_str()).to_string();
        let mut ctx = self.base_context(&name, &version);

        let url = render(declared.url_template.as_deref().unwrap_or_default(), &ctx)
            .map_err(|e| e.in_stage("render url"))?;
        let sha256 = match non_blank(&declared.sha256_template) {
            Some(template) => Some(
                resolve_checksum(&self.http, template, &ctx, cancel)
                    .map_err(|e| e.in_stage("resolve checksum"))?,
            ),
            None => None,
        };
        let inner_path = match non_blank(&declared.inner_path) {
            Some(template) => {
                Some(render(template, &ctx).map_err(|e| e.in_stage("render inner path"))?)
            }
            None => None,
        }
        .filter(|p| !p.is_empty());

        let format = declared.effective_format();
        let bin_name = non_blank(&declared.bin_name).unwrap_or(name.as_str()).to_string();
        let cache_file = paths
            .cache_dir
            .join(format!("{name}-{version}{}", format.extension()));
        let install_dir = paths.pkgs_dir.join(format!("{name}-{version}"));
        let binary_path = match (&format, &inner_path) {
            (ArchiveFormat::Raw, _) | (_, None) => install_dir.join(&bin_name),
            (_, Some(inner)) => install_dir.join(inner),
        };

        let artifact = ArtifactResolved {
            name,
            version,
            url,
            sha256,
            format,
            inner_path,
            mode: non_blank(&declared.mode).map(str::to_string),
            bin_name,
            cache_file,
            install_dir,
            binary_path,
        };

        let actions = if recipe.actions.is_empty() {
            if artifact.url.is_empty() {
                return Err(Error::Config("artifact has no urlTemplate".into()).in_stage("render url"));
            }
            default_actions(&artifact, &paths)
        } else {
            ctx.insert("URL".into(), artifact.url.clone());
            ctx.insert("CacheFile".into(), path_arg(&artifact.cache_file));
            ctx.insert("InstallDir".into(), path_arg(&artifact.install_dir));
            ctx.insert("BinDir".into(), path_arg(&paths.bin_dir));
            recipe
                .actions
                .iter()
                .map(|action| action.render(&ctx))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| e.in_stage("render actions"))?
        };

        debug!(
            recipe = %recipe.name,
            version = %artifact.version,
            url = %artifact.url,
            actions = actions.len(),
            "resolved"
        );
        Ok(ResolveResult {
            recipe: recipe.clone(),
            target,
            paths,
            artifact: Some(artifact),
            actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{Artifact, VersionSource, VersionStrategy};
    use pretty_assertions::assert_eq;

    fn resolver() -> Resolver {
        let mut platform = PlatformInfo::new("linux", "amd64");
        platform.distro = "ubuntu".into();
        platform.family = "debian".into();
        Resolver::new(HttpClient::new().unwrap(), platform).with_root(Some("/r".into()))
    }

    fn static_artifact(format: Option<ArchiveFormat>) -> Artifact {
        Artifact {
            version: Some(VersionSource {
                fallback: None,
                strategy: VersionStrategy::Static { value: "2.3.1".into() },
            }),
            url_template: Some("https://x/{{.Name}}-{{.Version}}.tar.gz".into()),
            format,
            ..Default::default()
        }
    }

    fn recipe(artifact: Artifact) -> Recipe {
        Recipe {
            name: "tool".into(),
            slug: "tool".into(),
            artifact,
            ..Default::default()
        }
    }

    fn kinds(actions: &[InstallAction]) -> Vec<&'static str> {
        actions.iter().map(InstallAction::type_name).collect()
    }

    #[test]
    fn test_static_tar_gz_layout() {
        let result = resolver()
            .resolve(&recipe(static_artifact(Some(ArchiveFormat::TarGz))), &CancelToken::new())
            .unwrap();
        let artifact = result.artifact.as_ref().unwrap();
        assert_eq!(artifact.url, "https://x/tool-2.3.1.tar.gz");
        assert_eq!(artifact.cache_file, PathBuf::from("/r/cache/tool-2.3.1.tar.gz"));
        assert_eq!(artifact.install_dir, PathBuf::from("/r/pkgs/tool-2.3.1"));
        assert_eq!(artifact.binary_path, PathBuf::from("/r/pkgs/tool-2.3.1/tool"));
        assert_eq!(kinds(&result.actions), vec!["download", "mkdir", "extract", "symlink"]);
        assert_eq!(result.link_path(), Some(PathBuf::from("/r/bin/tool")));
    }

    #[test]
    fn test_raw_default_actions() {
        let mut artifact = static_artifact(Some(ArchiveFormat::Raw));
        artifact.bin_name = Some("tool".into());
        let result = resolver().resolve(&recipe(artifact), &CancelToken::new()).unwrap();
        let resolved = result.artifact.as_ref().unwrap();
        assert_eq!(resolved.binary_path, PathBuf::from("/r/pkgs/tool-2.3.1/tool"));
        assert_eq!(resolved.cache_file, PathBuf::from("/r/cache/tool-2.3.1"));
        assert_eq!(kinds(&result.actions), vec!["download", "mkdir", "move", "symlink"]);
        assert_eq!(
            result.actions[2].kind,
            ActionKind::Move {
                src: "/r/cache/tool-2.3.1".into(),
                dest: "/r/pkgs/tool-2.3.1/tool".into(),
            }
        );
    }

    #[test]
    fn test_checksum_mode_and_inner_path() {
        let mut artifact = static_artifact(Some(ArchiveFormat::TarGz));
        artifact.sha256_template = Some("A".repeat(64));
        artifact.mode = Some("0755".into());
        artifact.inner_path = Some("tool-{{.Version}}-{{.OS}}-{{.Arch}}/tool".into());
        let result = resolver().resolve(&recipe(artifact), &CancelToken::new()).unwrap();
        assert_eq!(
            kinds(&result.actions),
            vec!["download", "verify", "mkdir", "extract", "chmod", "symlink"]
        );
        let resolved = result.artifact.unwrap();
        assert_eq!(resolved.sha256.as_deref(), Some("a".repeat(64).as_str()));
        assert_eq!(
            resolved.binary_path,
            PathBuf::from("/r/pkgs/tool-2.3.1/tool-2.3.1-linux-amd64/tool")
        );
    }

    #[test]
    fn test_unsupported_target() {
        let mut r = recipe(static_artifact(None));
        r.target.os = vec!["darwin".into(), "windows".into()];
        let err = resolver().resolve(&r, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedTarget { kind: "OS", .. }), "{err}");

        r.target.os = vec!["Linux".into()];
        r.target.arch = vec!["arm64".into()];
        let err = resolver().resolve(&r, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedTarget { kind: "Arch", .. }), "{err}");

        r.target.arch = vec!["AMD64".into()];
        assert!(resolver().resolve(&r, &CancelToken::new()).is_ok());
    }

    #[test]
    fn test_empty_artifact_passes_actions_through() {
        let action = InstallAction {
            kind: ActionKind::Shell { cmd: "echo {{.Version}}".into() },
            system: true,
        };
        let r = Recipe {
            name: "hello".into(),
            actions: vec![action.clone()],
            ..Default::default()
        };
        let result = resolver().resolve(&r, &CancelToken::new()).unwrap();
        assert!(result.artifact.is_none());
        assert_eq!(result.actions, vec![action]);
        assert_eq!(result.target.family.as_deref(), Some("debian"));
    }

    #[test]
    fn test_explicit_actions_are_rendered() {
        let mut r = recipe(static_artifact(Some(ArchiveFormat::Zip)));
        r.actions = vec![
            InstallAction::new(ActionKind::Download {
                url: "{{.URL}}".into(),
                dest: "{{.CacheFile}}".into(),
            }),
            InstallAction::new(ActionKind::Shell {
                cmd: "install {{.InstallDir}}/tool {{.BinDir}}/{{ lower .Name }}".into(),
            }),
        ];
        let result = resolver().resolve(&r, &CancelToken::new()).unwrap();
        assert_eq!(
            result.actions[0].kind,
            ActionKind::Download {
                url: "https://x/tool-2.3.1.tar.gz".into(),
                dest: "/r/cache/tool-2.3.1.zip".into(),
            }
        );
        assert_eq!(
            result.actions[1].kind,
            ActionKind::Shell { cmd: "install /r/pkgs/tool-2.3.1/tool /r/bin/tool".into() }
        );
    }

    #[test]
    fn test_bad_url_template_names_stage() {
        let mut artifact = static_artifact(None);
        artifact.url_template = Some("https://x/{{ .Name".into());
        let err = resolver().resolve(&recipe(artifact), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::Resolve { stage: "render url", .. }), "{err}");
    }

    #[test]
    fn test_recipe_root_override_wins() {
        let mut r = recipe(static_artifact(None));
        r.paths.root_dir = Some("/opt/sth".into());
        let result = resolver().resolve(&r, &CancelToken::new()).unwrap();
        assert_eq!(result.paths.bin_dir, PathBuf::from("/opt/sth/bin"));
    }
}
