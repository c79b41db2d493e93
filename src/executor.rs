//! Runs a [`ResolveResult`] against the filesystem.
//!
//! There is no manifest. Whether a recipe is installed is read back from
//! the tree itself: the `bin/<binName>` link must point at the resolved
//! binary and that binary must be executable. A failed run leaves completed
//! steps in place for the next run to reuse.

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};
use crate::archive;
use crate::cancel::{CancelToken, POLL_INTERVAL};
use crate::checksum::verify_file;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::link::{create_symlink, is_executable, links_to, parse_mode, set_mode};
use crate::recipe::{ActionKind, InstallAction};
use crate::report::{self, ExecOptions};
use crate::resolver::ResolveResult;

/// Shell used when `$SHELL` is unset.
pub const DEFAULT_SHELL: &str = "/bin/sh";
/// Upper bound for a whole install command.
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// How an install ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Installed,
    /// The idempotency gate matched; no action ran.
    AlreadyInstalled,
    /// Steps were printed, nothing was changed.
    DryRun,
}

#[derive(Debug, Clone)]
pub struct Executor {
    http: HttpClient,
    options: ExecOptions,
}

/// True when the bin link already points at an executable resolved binary.
pub fn is_installed(result: &ResolveResult) -> bool {
    let (Some(artifact), Some(link)) = (&result.artifact, result.link_path()) else {
        return false;
    };
    links_to(&link, &artifact.binary_path) && is_executable(&artifact.binary_path)
}

impl Executor {
    pub fn new(http: HttpClient, options: ExecOptions) -> Self {
        Self { http, options }
    }

    pub fn execute(&self, result: &ResolveResult, cancel: &CancelToken) -> Result<Outcome> {
        let bin_dir = &result.paths.bin_dir;
        if is_installed(result) {
            if let (Some(artifact), Some(link)) = (&result.artifact, result.link_path()) {
                info!(recipe = %result.recipe.name, version = %artifact.version, "already installed");
                report::already_installed(&self.options, &link, &artifact.binary_path);
            }
            report::print_path_hint(&self.options, bin_dir);
            return Ok(Outcome::AlreadyInstalled);
        }

        if self.options.dry_run {
            for action in &result.actions {
                report::step(&self.options, action);
            }
            report::print_path_hint(&self.options, bin_dir);
            return Ok(Outcome::DryRun);
        }

        result.paths.ensure()?;
        for action in &result.actions {
            cancel.check()?;
            report::step(&self.options, action);
            self.run_action(action, cancel)
                .map_err(|e| e.in_action(action.type_name()))?;
        }

        if let Some(artifact) = &result.artifact {
            info!(recipe = %result.recipe.name, version = %artifact.version, "installed");
            report::installed(&self.options, &artifact.name, &artifact.version);
        }
        report::print_path_hint(&self.options, bin_dir);
        Ok(Outcome::Installed)
    }

    fn run_action(&self, action: &InstallAction, cancel: &CancelToken) -> Result<()> {
        debug!(%action, "running action");
        match &action.kind {
            ActionKind::Download { url, dest } => {
                self.http.download(url, Path::new(dest), cancel).map(|_| ())
            }
            ActionKind::Verify { file, sha256 } => verify_file(Path::new(file), sha256),
            ActionKind::Mkdir { path, mode } => make_dir(Path::new(path), mode.as_deref()),
            ActionKind::Move { src, dest } => move_file(Path::new(src), Path::new(dest)),
            ActionKind::Gunzip { src, dest, mode } => {
                let mode = parse_mode(mode.as_deref().unwrap_or_default())?;
                archive::gunzip(Path::new(src), Path::new(dest), mode)
            }
            ActionKind::Extract { src, dest } => archive::extract(Path::new(src), Path::new(dest)),
            ActionKind::Chmod { path, mode } => match parse_mode(mode)? {
                Some(mode) => set_mode(Path::new(path), mode),
                None => Ok(()),
            },
            ActionKind::Symlink { src, dest } => create_symlink(Path::new(src), Path::new(dest)),
            ActionKind::Shell { cmd } => run_shell(cmd, action.system, cancel),
        }
    }
}

fn make_dir(path: &Path, mode: Option<&str>) -> Result<()> {
    let existed = path.is_dir();
    std::fs::create_dir_all(path).map_err(|e| Error::fs("mkdir", path, e))?;
    if existed {
        return Ok(());
    }
    let mode = parse_mode(mode.unwrap_or("0755"))?.unwrap_or(0o755);
    set_mode(path, mode)
}

fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::fs("mkdir", parent, e))?;
    }
    std::fs::rename(src, dest).map_err(|e| Error::fs("rename", src, e))
}

/// Runs `cmd` through the user's login shell, killing it if `cancel` fires.
///
/// `system` is informational; nothing here elevates privileges.
pub fn run_shell(cmd: &str, system: bool, cancel: &CancelToken) -> Result<()> {
    let shell = std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SHELL.to_string());
    debug!(%shell, system, %cmd, "spawning shell");
    cancel.check()?;
    let mut child = Command::new(&shell)
        .arg("-lc")
        .arg(cmd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| Error::Process(format!("spawn {shell}: {e}")))?;
    loop {
        if let Some(status) = child.try_wait()? {
            if status.success() {
                return Ok(());
            }
            return Err(Error::Process(format!("`{cmd}` exited with {status}")));
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Paths;
    use crate::recipe::{ArchiveFormat, Recipe};
    use crate::resolver::{default_actions, ArtifactResolved};
    use crate::test_support::{blocking, write_executable};
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quiet() -> ExecOptions {
        ExecOptions {
            quiet: true,
            ..Default::default()
        }
    }

    fn raw_result(root: &Path, url: &str, sha256: Option<String>) -> ResolveResult {
        let paths = Paths::under(root);
        let install_dir = paths.pkgs_dir.join("tool-2.3.1");
        let artifact = ArtifactResolved {
            name: "tool".into(),
            version: "2.3.1".into(),
            url: url.into(),
            sha256,
            format: ArchiveFormat::Raw,
            inner_path: None,
            mode: Some("0755".into()),
            bin_name: "tool".into(),
            cache_file: paths.cache_dir.join("tool-2.3.1"),
            binary_path: install_dir.join("tool"),
            install_dir,
        };
        let actions = default_actions(&artifact, &paths);
        ResolveResult {
            recipe: Recipe {
                name: "tool".into(),
                ..Default::default()
            },
            target: Default::default(),
            paths,
            artifact: Some(artifact),
            actions,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_already_installed_skips_every_action() {
        let dir = tempdir().unwrap();
        let result = raw_result(dir.path(), "http://127.0.0.1:9/unreachable", None);
        let artifact = result.artifact.as_ref().unwrap();
        write_executable(&artifact.binary_path, b"#!/bin/sh\n");
        create_symlink(&artifact.binary_path, &result.link_path().unwrap()).unwrap();

        let executor = Executor::new(HttpClient::new().unwrap(), quiet());
        let outcome = executor.execute(&result, &CancelToken::new()).unwrap();
        assert_eq!(outcome, Outcome::AlreadyInstalled);
        assert!(!result.paths.cache_dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_link_to_non_executable_is_not_installed() {
        let dir = tempdir().unwrap();
        let result = raw_result(dir.path(), "http://x", None);
        let artifact = result.artifact.as_ref().unwrap();
        std::fs::create_dir_all(&artifact.install_dir).unwrap();
        std::fs::write(&artifact.binary_path, b"data").unwrap();
        create_symlink(&artifact.binary_path, &result.link_path().unwrap()).unwrap();
        assert!(!is_installed(&result));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_raw_install_then_noop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tool"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"#!/bin/sh\necho tool\n".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let url = format!("{}/tool", server.uri());
        let (first, second, result) = blocking(move || {
            let result = raw_result(&root, &url, None);
            let executor = Executor::new(HttpClient::new().unwrap(), quiet());
            let first = executor.execute(&result, &CancelToken::new()).unwrap();
            let second = executor.execute(&result, &CancelToken::new()).unwrap();
            (first, second, result)
        })
        .await;

        assert_eq!(first, Outcome::Installed);
        assert_eq!(second, Outcome::AlreadyInstalled);
        let artifact = result.artifact.as_ref().unwrap();
        assert!(is_executable(&artifact.binary_path));
        assert!(links_to(&result.link_path().unwrap(), &artifact.binary_path));
        assert!(!artifact.cache_file.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_checksum_mismatch_stops_before_move() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tool"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let url = format!("{}/tool", server.uri());
        let (err, result) = blocking(move || {
            let result = raw_result(&root, &url, Some("0".repeat(64)));
            let executor = Executor::new(HttpClient::new().unwrap(), quiet());
            (executor.execute(&result, &CancelToken::new()).unwrap_err(), result)
        })
        .await;

        assert!(matches!(&err, Error::Action { action: "verify", .. }), "{err}");
        let artifact = result.artifact.as_ref().unwrap();
        assert!(artifact.cache_file.exists());
        assert!(!artifact.install_dir.exists());
        assert!(result.link_path().unwrap().symlink_metadata().is_err());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = tempdir().unwrap();
        let result = raw_result(dir.path(), "http://127.0.0.1:9/tool", None);
        let options = ExecOptions {
            quiet: true,
            dry_run: true,
            ..Default::default()
        };
        let outcome = Executor::new(HttpClient::new().unwrap(), options)
            .execute(&result, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome, Outcome::DryRun);
        assert!(!result.paths.bin_dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_action_runs_and_reports_failure() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("marker");
        let result = ResolveResult {
            recipe: Recipe::default(),
            target: Default::default(),
            paths: Paths::under(dir.path().join("root")),
            artifact: None,
            actions: vec![
                InstallAction::new(ActionKind::Shell {
                    cmd: format!("echo ok > '{}'", marker.display()),
                }),
                InstallAction::new(ActionKind::Shell { cmd: "exit 3".into() }),
            ],
        };
        let err = Executor::new(HttpClient::new().unwrap(), quiet())
            .execute(&result, &CancelToken::new())
            .unwrap_err();
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "ok");
        assert!(matches!(&err, Error::Action { action: "shell", .. }), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_is_killed_on_deadline() {
        let cancel = CancelToken::new().child_with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = run_shell("sleep 10", false, &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_mkdir_and_chmod() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let target = dir.path().join("a/b");
        make_dir(&target, Some("0700")).unwrap();
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        make_dir(&target, None).unwrap();

        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let executor = Executor::new(HttpClient::new().unwrap(), quiet());
        let chmod = |mode: &str| {
            InstallAction::new(ActionKind::Chmod {
                path: file.to_string_lossy().into_owned(),
                mode: mode.into(),
            })
        };
        executor.run_action(&chmod(""), &CancelToken::new()).unwrap();
        executor.run_action(&chmod("0751"), &CancelToken::new()).unwrap();
        let mode = std::fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o751);
    }
}
