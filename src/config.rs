// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the link manifest that dotlink uses to simplify
//! serialization and deserialization. File I/O is left to the caller to figure
//! out.
//!
//! # General Layout
//!
//! A link manifest is composed of three parts: settings, links, and bootstrap
//! settings. Settings adjust where displaced files get backed up to. Links
//! list what files in the dotfile repository get symlinked into the home
//! directory. Bootstrap settings describe the package manager, shell framework,
//! and shell plugins that get provisioned before any link is made.
//!
//! Relative link sources resolve against the dotfile repository, and relative
//! link targets resolve against the home directory. Environment variables get
//! expanded on parse, but a leading `~` is kept as is until the home directory
//! in use is known.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Name of manifest file expected at top-level of dotfile repository.
pub const MANIFEST_NAME: &str = "dotlink.toml";

/// Link manifest layout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Manifest {
    /// General settings.
    #[serde(default)]
    pub settings: Settings,

    /// Listing of symlinks to reconcile, in order.
    #[serde(rename = "link", default)]
    pub links: Vec<LinkEntry>,

    /// Provisioning performed before linking.
    #[serde(default)]
    pub bootstrap: BootstrapSettings,
}

impl Manifest {
    /// Construct new manifest with no links and default settings.
    pub fn empty() -> Self {
        Self {
            settings: Settings::default(),
            links: Vec::new(),
            bootstrap: BootstrapSettings::default(),
        }
    }
}

impl Default for Manifest {
    /// Built-in link table used when dotfile repository has no manifest.
    fn default() -> Self {
        let links = vec![
            LinkEntry::file("zsh/.zshrc", ".zshrc"),
            LinkEntry::file("zsh/.zprofile", ".zprofile"),
            LinkEntry::file("zsh/.aliases", ".aliases"),
            LinkEntry::file("git/.gitconfig", ".gitconfig"),
            LinkEntry::file("git/.gitignore_global", ".gitignore_global"),
            LinkEntry::file("ssh/config", ".ssh/config"),
            LinkEntry::expanded("claude/commands", ".claude/commands", Some("*.md")),
            LinkEntry::expanded("claude/agents", ".claude/agents", Some("*.md")),
        ];

        Self {
            links,
            ..Self::empty()
        }
    }
}

impl FromStr for Manifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut manifest: Manifest = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Expand environment variables on every path pointing outside the repository.
        for link in manifest.links.iter_mut() {
            link.target = shell_expand(&link.target)?;
            if let Some(pattern) = &link.pattern {
                glob::Pattern::new(pattern)?;
            }
        }

        if let Some(backup_root) = &manifest.settings.backup_root {
            manifest.settings.backup_root = Some(shell_expand(backup_root)?);
        }

        manifest.bootstrap.framework_dir = shell_expand(&manifest.bootstrap.framework_dir)?;

        Ok(manifest)
    }
}

impl Display for Manifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// General manifest settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Directory holding timestamped backups. Defaults to
    /// `~/.dotfiles_backup`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_root: Option<PathBuf>,
}

/// Single symlink mapping entry.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LinkEntry {
    /// Path inside dotfile repository.
    pub source: PathBuf,

    /// Path the symlink gets placed at.
    pub target: PathBuf,

    /// Link every regular file of source directory individually into a
    /// mirrored target directory, instead of linking the directory itself.
    #[serde(default, skip_serializing_if = "is_false")]
    pub expand: bool,

    /// Glob filter for files of an expanded directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl LinkEntry {
    /// Construct entry linking source directly to target.
    pub fn file(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            expand: false,
            pattern: None,
        }
    }

    /// Construct entry linking each file of source directory into target
    /// directory.
    pub fn expanded(
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        pattern: Option<&str>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            expand: true,
            pattern: pattern.map(Into::into),
        }
    }
}

/// Provisioning settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BootstrapSettings {
    /// Program name of package manager.
    pub package_manager: String,

    /// URL of package manager's install script.
    pub package_manager_installer: String,

    /// Package manifest inside dotfile repository.
    pub package_manifest: PathBuf,

    /// Install location of shell framework.
    pub framework_dir: PathBuf,

    /// URL of shell framework's install script.
    pub framework_installer: String,

    /// Shell framework plugins to clone.
    #[serde(rename = "plugin")]
    pub plugins: Vec<Plugin>,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            package_manager: "brew".into(),
            package_manager_installer:
                "https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh".into(),
            package_manifest: "Brewfile".into(),
            framework_dir: ".oh-my-zsh".into(),
            framework_installer:
                "https://raw.githubusercontent.com/ohmyzsh/ohmyzsh/master/tools/install.sh".into(),
            plugins: vec![
                Plugin::new(
                    "zsh-autosuggestions",
                    "https://github.com/zsh-users/zsh-autosuggestions",
                ),
                Plugin::new(
                    "zsh-syntax-highlighting",
                    "https://github.com/zsh-users/zsh-syntax-highlighting",
                ),
            ],
        }
    }
}

/// Shell framework plugin.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Plugin {
    /// Directory name of plugin inside framework's custom plugin directory.
    pub name: String,

    /// Remote URL to clone plugin from.
    pub url: String,
}

impl Plugin {
    /// Construct new plugin entry.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

fn shell_expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::env(path.to_string_lossy().as_ref())?.into_owned(),
    ))
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Invalid glob pattern for expanded directory.
    #[error("invalid link pattern")]
    Pattern(#[from] glob::PatternError),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
