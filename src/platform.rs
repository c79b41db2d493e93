use std::path::Path;
use serde::{Deserialize, Serialize};

pub const FAMILY_DEBIAN: &str = "debian";
pub const FAMILY_RHEL: &str = "rhel";
pub const FAMILY_ARCH: &str = "arch";
pub const FAMILY_OTHER: &str = "other";
pub const DISTRO_OTHER: &str = "other";

const DEBIAN_IDS: &[&str] = &[
    "debian", "ubuntu", "linuxmint", "raspbian", "pop", "neon", "kali", "zorin", "elementary",
];
const RHEL_IDS: &[&str] = &["rhel", "rocky", "almalinux", "centos", "fedora", "oracle"];
const ARCH_IDS: &[&str] = &["arch", "manjaro", "endeavouros"];

/// The platform a recipe is being resolved for.
///
/// The resolver only reads this; [`PlatformInfo::detect`] is a convenience
/// for the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// `linux`, `darwin`, `windows`, ...
    pub os: String,
    /// `amd64`, `arm64`, ...
    pub arch: String,
    #[serde(default)]
    pub distro: String,
    #[serde(default)]
    pub family: String,
}

impl PlatformInfo {
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            distro: String::new(),
            family: String::new(),
        }
    }

    /// Describes the host this binary runs on.
    pub fn detect() -> Self {
        let distro = detect_distro();
        Self {
            os: current_os().to_string(),
            arch: current_arch().to_string(),
            family: family_of(&distro).to_string(),
            distro,
        }
    }
}

/// Returns the host OS using the names recipes are written against.
pub fn current_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Returns the host architecture using the names recipes are written against.
pub fn current_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "arm",
        other => other,
    }
}

fn detect_distro() -> String {
    find_in_file(Path::new("/etc/os-release"), "ID=")
        .or_else(|| find_in_file(Path::new("/etc/lsb-release"), "DISTRIB_ID="))
        .unwrap_or_else(|| DISTRO_OTHER.to_string())
}

fn find_in_file(path: &Path, needle: &str) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    parse_key(&content, needle)
}

fn parse_key(content: &str, needle: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix(needle))
        .map(|value| value.trim_matches('"').trim().to_lowercase())
}

/// Maps a distro ID to its family.
pub fn family_of(distro: &str) -> &'static str {
    let id = distro.trim().to_lowercase();
    if DEBIAN_IDS.contains(&id.as_str()) {
        FAMILY_DEBIAN
    } else if RHEL_IDS.contains(&id.as_str()) {
        FAMILY_RHEL
    } else if ARCH_IDS.contains(&id.as_str()) {
        FAMILY_ARCH
    } else {
        FAMILY_OTHER
    }
}
