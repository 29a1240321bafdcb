// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup of displaced files.
//!
//! Whenever a real file or directory sits where a symlink needs to go, dotlink
//! copies it into a __backup directory__ before removing it. Each installer run
//! gets its own backup directory named after the local time the run started,
//! i.e., `~/.dotfiles_backup/<YYYYMMDD_HHMMSS>/`. The backup directory is only
//! created once something actually needs to be backed up, so a run that
//! displaces nothing leaves no trace behind.
//!
//! # Backup Layout
//!
//! Displaced paths are stored by their file name at the top-level of the
//! backup directory, e.g., `~/.zshrc` becomes
//! `~/.dotfiles_backup/20250101_120000/.zshrc`. Should two displaced paths
//! share a file name within the same run, the later ones receive a numeric
//! suffix: `config`, `config.1`, `config.2`, etc.

use crate::link::create_symlink;

use chrono::Local;
use ignore::WalkBuilder;
use mkdirp::mkdirp;
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Format of timestamp naming a backup directory.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Timestamped backup directory of a single installer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDir {
    root: PathBuf,
    stamp: String,
    created: bool,
}

impl BackupDir {
    /// Construct new backup directory handle.
    ///
    /// Nothing is created on the file system until [`BackupDir::store`] is
    /// called.
    pub fn new(root: impl Into<PathBuf>, stamp: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            stamp: stamp.into(),
            created: false,
        }
    }

    /// Construct new backup directory handle stamped with current local time.
    pub fn timestamped(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Local::now().format(TIMESTAMP_FORMAT).to_string())
    }

    /// Absolute path to backup directory.
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.stamp)
    }

    /// Timestamp naming the backup directory.
    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    /// Check if backup directory has been created during this run.
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Copy path into backup directory.
    ///
    /// Creates backup directory on first use. Copies files, directories, and
    /// any symlinks nested inside of them. The original path is left in place,
    /// removing it is the caller's job.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::CreateDir`] if backup directory cannot be made.
    /// - Return [`BackupError::NoFileName`] if path has no file name.
    /// - Return [`BackupError::Walk`], [`BackupError::Copy`],
    ///   [`BackupError::ReadLink`], or [`BackupError::Symlink`] if copying
    ///   fails part way through.
    #[instrument(skip(self, original), level = "debug")]
    pub fn store(&mut self, original: impl AsRef<Path>) -> Result<PathBuf> {
        let original = original.as_ref();
        let name = original
            .file_name()
            .ok_or_else(|| BackupError::NoFileName {
                path: original.to_path_buf(),
            })?
            .to_os_string();

        let dir = self.path();
        if !self.created {
            mkdirp(&dir).map_err(|err| BackupError::CreateDir {
                source: err,
                path: dir.clone(),
            })?;
            self.created = true;
            info!("created backup directory {}", dir.display());
        }

        let backup = free_slot(&dir, name);
        debug!("back up {} to {}", original.display(), backup.display());
        copy_tree(original, &backup)?;

        Ok(backup)
    }
}

// INVARIANT: Never overwrite an earlier backup made during the same run.
fn free_slot(dir: &Path, name: OsString) -> PathBuf {
    let candidate = dir.join(&name);
    if fs::symlink_metadata(&candidate).is_err() {
        return candidate;
    }

    let mut suffix = 1usize;
    loop {
        let mut numbered = name.clone();
        numbered.push(format!(".{suffix}"));
        let candidate = dir.join(numbered);
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        suffix += 1;
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).map_err(|err| BackupError::Copy {
        source: err,
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
    })?;

    if meta.file_type().is_symlink() {
        return copy_symlink(src, dst);
    }

    if !meta.is_dir() {
        return copy_file(src, dst);
    }

    let walker = WalkBuilder::new(src)
        .standard_filters(false)
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = entry.map_err(|err| BackupError::Walk {
            source: err,
            path: src.to_path_buf(),
        })?;
        let path = entry.path();
        let out = match path.strip_prefix(src) {
            Ok(rel) if rel.as_os_str().is_empty() => dst.to_path_buf(),
            Ok(rel) => dst.join(rel),
            Err(_) => continue,
        };

        if entry.path_is_symlink() {
            copy_symlink(path, &out)?;
        } else if entry.file_type().is_some_and(|kind| kind.is_dir()) {
            make_dir(&out)?;
        } else {
            copy_file(path, &out)?;
        }
    }

    Ok(())
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        make_dir(parent)?;
    }

    fs::copy(src, dst).map_err(|err| BackupError::Copy {
        source: err,
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
    })?;

    Ok(())
}

fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let destination = fs::read_link(src).map_err(|err| BackupError::ReadLink {
        source: err,
        path: src.to_path_buf(),
    })?;

    if let Some(parent) = dst.parent() {
        make_dir(parent)?;
    }

    create_symlink(&destination, dst).map_err(|err| BackupError::Symlink {
        source: err,
        path: dst.to_path_buf(),
    })?;

    Ok(())
}

fn make_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|err| BackupError::CreateDir {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Backup directory, or directory inside of it, cannot be created.
    #[error("failed to create backup directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Path to back up has no file name, e.g., `/` or `..`.
    #[error("cannot back up {:?} because it has no file name", path.display())]
    NoFileName { path: PathBuf },

    /// Directory to back up cannot be traversed.
    #[error("failed to walk {:?} for backup", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// File cannot be copied into backup directory.
    #[error("failed to copy {:?} to {:?}", from.display(), to.display())]
    Copy {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Nested symlink cannot be read.
    #[error("failed to read symlink {:?}", path.display())]
    ReadLink {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Nested symlink cannot be recreated inside backup directory.
    #[error("failed to recreate symlink at {:?}", path.display())]
    Symlink {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = BackupError> = std::result::Result<T, E>;
