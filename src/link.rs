// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Symlink reconciliation.
//!
//! __Reconciliation__ makes sure that a target path ends up as a symlink to a
//! given source path. What happens depends on what currently occupies the
//! target path:
//!
//! | Target state             | Action                                    |
//! |--------------------------|-------------------------------------------|
//! | Nothing                  | Create symlink.                           |
//! | Symlink to source        | Nothing at all.                           |
//! | Symlink to anything else | Remove symlink, then create symlink.      |
//! | Real file or directory   | Back up, remove, then create symlink.     |
//!
//! Stale symlinks are not backed up. They hold no user data, and can always be
//! recreated. Real files and directories can hold user data, so they always
//! get copied into the run's [`BackupDir`] first.
//!
//! Reconciliation is idempotent. Reconciling the same mapping twice performs
//! no file system mutation the second time around.

use crate::backup::{BackupDir, BackupError};

use mkdirp::mkdirp;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Current state of a target path relative to its expected source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing exists at target path.
    Missing,

    /// Target is a symlink pointing at source.
    Linked,

    /// Target is a symlink pointing somewhere else, possibly nowhere.
    Stale(PathBuf),

    /// Target is a real file or directory.
    Occupied,
}

impl LinkState {
    /// Inspect target path without modifying it.
    ///
    /// Relative symlink destinations are resolved against the symlink's parent
    /// directory before being compared to source. A target that reaches source
    /// itself through a symlinked parent directory counts as linked.
    ///
    /// # Errors
    ///
    /// - Return [`io::Error`] if target cannot be inspected for any reason
    ///   other than not existing.
    pub fn inspect(source: impl AsRef<Path>, target: impl AsRef<Path>) -> io::Result<Self> {
        let target = target.as_ref();
        let meta = match fs::symlink_metadata(target) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::Missing),
            Err(err) => return Err(err),
        };

        // INVARIANT: Never classify source as occupying its own target.
        if same_entry(target, source.as_ref()) {
            return Ok(Self::Linked);
        }

        if !meta.file_type().is_symlink() {
            return Ok(Self::Occupied);
        }

        let destination = fs::read_link(target)?;
        if points_to(target, &destination, source.as_ref()) {
            Ok(Self::Linked)
        } else {
            Ok(Self::Stale(destination))
        }
    }
}

impl Display for LinkState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Missing => write!(fmt, "not linked"),
            Self::Linked => write!(fmt, "linked"),
            Self::Stale(destination) => write!(fmt, "stale link to {}", destination.display()),
            Self::Occupied => write!(fmt, "occupied by real file"),
        }
    }
}

/// What reconciliation did to a target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Symlink created where nothing existed.
    Created,

    /// Real file moved into backup directory, then symlink created.
    BackedUp { backup: PathBuf },

    /// Stale symlink removed, then symlink created.
    Replaced { previous: PathBuf },

    /// Target already pointed at source.
    AlreadyLinked,
}

impl LinkOutcome {
    /// Check if reconciliation changed the file system.
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::AlreadyLinked)
    }
}

impl Display for LinkOutcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Created => write!(fmt, "linked"),
            Self::BackedUp { backup } => {
                write!(fmt, "backed up to {} and linked", backup.display())
            }
            Self::Replaced { previous } => {
                write!(fmt, "replaced stale link to {}", previous.display())
            }
            Self::AlreadyLinked => write!(fmt, "already linked"),
        }
    }
}

/// Reconcile target path into a symlink to source path.
///
/// Steps are performed in order:
///
/// 1. Create parent directory of target if missing.
/// 2. Back up and remove target if it is a real file or directory.
/// 3. Remove target if it is a symlink pointing anywhere but source.
/// 4. Create symlink from target to source if target is now absent.
///
/// A target already pointing at source is left completely untouched.
///
/// # Errors
///
/// - Return [`LinkError::SourceMissing`] if source does not exist.
/// - Return [`LinkError::CreateParent`] if parent directory cannot be made.
/// - Return [`LinkError::Inspect`] if target cannot be inspected.
/// - Return [`LinkError::Backup`] if target cannot be backed up.
/// - Return [`LinkError::Remove`] if target cannot be removed.
/// - Return [`LinkError::Symlink`] if symlink cannot be created.
#[instrument(skip(source, target, backup), level = "debug")]
pub fn reconcile(
    source: impl AsRef<Path>,
    target: impl AsRef<Path>,
    backup: &mut BackupDir,
) -> Result<LinkOutcome> {
    let source = source.as_ref();
    let target = target.as_ref();

    if fs::symlink_metadata(source).is_err() {
        return Err(LinkError::SourceMissing {
            path: source.to_path_buf(),
        });
    }

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("create parent directory {}", parent.display());
            mkdirp(parent).map_err(|err| LinkError::CreateParent {
                source: err,
                path: parent.to_path_buf(),
            })?;
        }
    }

    let state = LinkState::inspect(source, target).map_err(|err| LinkError::Inspect {
        source: err,
        path: target.to_path_buf(),
    })?;

    let outcome = match state {
        LinkState::Linked => return Ok(LinkOutcome::AlreadyLinked),
        LinkState::Missing => LinkOutcome::Created,
        LinkState::Occupied => {
            let stored = backup.store(target)?;
            warn!("moved {} to {}", target.display(), stored.display());
            remove_occupant(target)?;
            LinkOutcome::BackedUp { backup: stored }
        }
        LinkState::Stale(previous) => {
            warn!(
                "removing stale link {} -> {}",
                target.display(),
                previous.display()
            );
            remove_symlink(target).map_err(|err| LinkError::Remove {
                source: err,
                path: target.to_path_buf(),
            })?;
            LinkOutcome::Replaced { previous }
        }
    };

    create_symlink(source, target).map_err(|err| LinkError::Symlink {
        source: err,
        from: target.to_path_buf(),
        to: source.to_path_buf(),
    })?;

    Ok(outcome)
}

/// Create symlink at `link` pointing to `original`.
#[cfg(unix)]
pub(crate) fn create_symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

/// Create symlink at `link` pointing to `original`.
#[cfg(windows)]
pub(crate) fn create_symlink(original: &Path, link: &Path) -> io::Result<()> {
    let resolved = match link.parent() {
        Some(parent) if original.is_relative() => parent.join(original),
        _ => original.to_path_buf(),
    };

    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(original, link)
    } else {
        std::os::windows::fs::symlink_file(original, link)
    }
}

#[cfg(unix)]
fn remove_symlink(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

#[cfg(windows)]
fn remove_symlink(path: &Path) -> io::Result<()> {
    fs::remove_file(path).or_else(|_| fs::remove_dir(path))
}

fn remove_occupant(target: &Path) -> Result<()> {
    let removal = match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(target),
        Ok(_) => fs::remove_file(target),
        Err(err) => Err(err),
    };

    removal.map_err(|err| LinkError::Remove {
        source: err,
        path: target.to_path_buf(),
    })
}

fn same_entry(target: &Path, source: &Path) -> bool {
    if target.file_name() != source.file_name() {
        return false;
    }

    match (target.parent(), source.parent()) {
        (Some(lhs), Some(rhs)) => match (fs::canonicalize(lhs), fs::canonicalize(rhs)) {
            (Ok(lhs), Ok(rhs)) => lhs == rhs,
            _ => false,
        },
        _ => false,
    }
}

fn points_to(link: &Path, destination: &Path, source: &Path) -> bool {
    let resolved = match link.parent() {
        Some(parent) if destination.is_relative() => parent.join(destination),
        _ => destination.to_path_buf(),
    };

    if resolved == source {
        return true;
    }

    // INVARIANT: Compare canonical forms so `a/../b` and `b` count as equal.
    match (fs::canonicalize(&resolved), fs::canonicalize(source)) {
        (Ok(lhs), Ok(rhs)) => lhs == rhs,
        _ => false,
    }
}

/// Reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Source path to link to does not exist.
    #[error("source {:?} does not exist", path.display())]
    SourceMissing { path: PathBuf },

    /// Parent directory of target cannot be created.
    #[error("failed to create parent directory {:?}", path.display())]
    CreateParent {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Target cannot be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Target cannot be backed up.
    #[error(transparent)]
    Backup(#[from] BackupError),

    /// Target cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Symlink cannot be created.
    #[error("failed to create symlink {:?} -> {:?}", from.display(), to.display())]
    Symlink {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LinkError> = std::result::Result<T, E>;
