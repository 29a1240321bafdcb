// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where dotfiles live, where they get linked to, and where displaced
//! files get backed up to.

use std::path::{Path, PathBuf};

/// Name of backup root directory placed inside user's home directory.
pub const BACKUP_ROOT_NAME: &str = ".dotfiles_backup";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to backup root relative to a home
/// directory.
///
/// Does not check if the path returned actually exists.
pub fn default_backup_root(home: impl AsRef<Path>) -> PathBuf {
    home.as_ref().join(BACKUP_ROOT_NAME)
}

/// Resolve path relative to a base directory.
///
/// Relative paths get joined onto `base`, absolute paths are returned as is.
/// A leading `~` component stands for `base` itself, so `~/.zshrc` and
/// `.zshrc` resolve to the same path.
pub fn resolve_under(base: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if let Ok(rest) = path.strip_prefix("~") {
        return base.as_ref().join(rest);
    }

    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.as_ref().join(path)
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
