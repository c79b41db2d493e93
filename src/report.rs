//! User-facing progress output.
//!
//! Diagnostics go through `tracing`; the lines printed here are the ones a
//! person running `sth install` reads, and they all honour [`ExecOptions`].

use std::ffi::OsString;
use std::path::Path;
use colored::Colorize;
use crate::link::path_contains;
use crate::recipe::{ActionKind, InstallAction};

pub const PREFIX: &str = "[sth]";
pub const ICON_DOWNLOAD: &str = "⬇️";
pub const ICON_OK: &str = "✅";
pub const ICON_MOVE: &str = "➡️";
pub const ICON_UNPACK: &str = "📦";
pub const ICON_CHMOD: &str = "🔑";
pub const ICON_LINK: &str = "🔗";
pub const ICON_DIR: &str = "📁";
pub const ICON_SHELL: &str = "🐚";

/// Output and side-effect switches for one install.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Suppress progress lines and the PATH hint.
    pub quiet: bool,
    /// Echo shell commands before running them.
    pub verbose: bool,
    /// Print the steps without performing them.
    pub dry_run: bool,
}

/// Icon and message for one action, e.g. `🔗 Linking bin/rg -> pkgs/rg-14.1.0/rg`.
pub fn step_message(action: &InstallAction, verbose: bool) -> (&'static str, String) {
    match &action.kind {
        ActionKind::Download { url, .. } => (ICON_DOWNLOAD, format!("Downloading {url}")),
        ActionKind::Verify { .. } => (ICON_OK, "Verifying checksum".to_string()),
        ActionKind::Mkdir { path, .. } => (ICON_DIR, format!("Creating {path}")),
        ActionKind::Move { .. } => (ICON_MOVE, "Moving binary".to_string()),
        ActionKind::Gunzip { .. } => (ICON_UNPACK, "Decompressing".to_string()),
        ActionKind::Extract { .. } => (ICON_UNPACK, "Extracting archive".to_string()),
        ActionKind::Chmod { path, mode } => (ICON_CHMOD, format!("Changing mode {mode} {path}")),
        ActionKind::Symlink { src, dest } => (ICON_LINK, format!("Linking {dest} -> {src}")),
        ActionKind::Shell { cmd } if verbose => (ICON_SHELL, format!("Running shell command: {cmd}")),
        ActionKind::Shell { .. } => (ICON_SHELL, "Running shell command".to_string()),
    }
}

/// Prints the progress line for `action`.
pub fn step(options: &ExecOptions, action: &InstallAction) {
    if options.quiet {
        return;
    }
    let (icon, message) = step_message(action, options.verbose || options.dry_run);
    if options.dry_run {
        println!("{} {icon} {} {message}", PREFIX.cyan(), "(dry run)".dimmed());
    } else {
        println!("{} {icon} {message}", PREFIX.cyan());
    }
}

pub fn already_installed(options: &ExecOptions, link: &Path, binary: &Path) {
    if options.quiet {
        return;
    }
    println!(
        "{} {ICON_OK} {} {} -> {}",
        PREFIX.cyan(),
        "already installed:".green(),
        link.display(),
        binary.display()
    );
}

pub fn installed(options: &ExecOptions, name: &str, version: &str) {
    if options.quiet {
        return;
    }
    println!("{} {ICON_OK} {} {name} {version}", PREFIX.cyan(), "installed".green().bold());
}

/// Guidance for adding `bin_dir` to `PATH`, or `None` if it is already there.
pub fn path_hint(bin_dir: &Path, path_env: Option<&OsString>) -> Option<String> {
    if path_env.is_some_and(|path| path_contains(bin_dir, path)) {
        return None;
    }
    let dir = bin_dir.display();
    Some(format!(
        "Note: {dir} is not in your PATH.\n\
         Add this to your shell profile, then restart your shell:\n  \
         export PATH=\"{dir}:$PATH\""
    ))
}

/// Prints [`path_hint`] for the current `PATH`.
pub fn print_path_hint(options: &ExecOptions, bin_dir: &Path) {
    if options.quiet {
        return;
    }
    let path = std::env::var_os("PATH");
    if let Some(hint) = path_hint(bin_dir, path.as_ref()) {
        println!("\n{}", hint.yellow());
    }
}
