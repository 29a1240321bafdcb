// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installer driving loop.
//!
//! The installer turns a [`Manifest`] into a flat list of [`Mapping`]s, and
//! [reconciles](crate::link::reconcile) each one of them in order. Entries
//! whose source is absent from the dotfile repository are skipped, so a single
//! manifest can be shared between machines that only carry part of the
//! dotfiles.
//!
//! # Expanded Directories
//!
//! Linking a whole directory would make the target directory belong to the
//! dotfile repository, which is not always wanted, e.g., `~/.claude/commands`
//! may also hold commands that were never tracked. Entries marked as
//! `expand` get every regular file inside of them linked individually into a
//! mirrored directory on the target side instead.
//!
//! # Fail Fast
//!
//! The first mapping that fails to reconcile stops the whole run. Mappings
//! reconciled before the failure stay in place, and nothing is rolled back.

use crate::{
    backup::BackupDir,
    config::{ConfigError, LinkEntry, Manifest, MANIFEST_NAME},
    link::{reconcile, LinkError, LinkOutcome, LinkState},
    path::{default_backup_root, resolve_under},
};

use ignore::WalkBuilder;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Concrete symlink mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// Absolute path inside dotfile repository.
    pub source: PathBuf,

    /// Absolute path of symlink.
    pub target: PathBuf,
}

impl Mapping {
    /// Construct new mapping.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl Display for Mapping {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} -> {}",
            self.target.display(),
            self.source.display()
        )
    }
}

/// Read manifest of dotfile repository.
///
/// Falls back to the built-in link table of [`Manifest::default`] when the
/// repository carries no manifest.
///
/// # Errors
///
/// - Return [`InstallError::ReadManifest`] if manifest cannot be inspected
///   for any reason other than not existing, or cannot be read.
/// - Return [`InstallError::Config`] if manifest cannot be parsed.
pub fn load_manifest(repo_root: impl AsRef<Path>) -> Result<Manifest> {
    let path = repo_root.as_ref().join(MANIFEST_NAME);
    match fs::symlink_metadata(&path) {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("no {} found, using built-in link table", path.display());
            return Ok(Manifest::default());
        }
        Err(err) => return Err(InstallError::ReadManifest { source: err, path }),
    }

    let data = fs::read_to_string(&path).map_err(|err| InstallError::ReadManifest {
        source: err,
        path: path.clone(),
    })?;
    debug!("loaded manifest {}", path.display());

    Ok(data.parse()?)
}

/// Symlink installer.
#[derive(Debug)]
pub struct Installer {
    repo_root: PathBuf,
    home: PathBuf,
    manifest: Manifest,
    backup: BackupDir,
}

impl Installer {
    /// Construct new installer.
    ///
    /// Backups go into a directory stamped with the current local time under
    /// the manifest's backup root, or `<home>/.dotfiles_backup` if the manifest
    /// does not name one.
    pub fn new(repo_root: impl Into<PathBuf>, home: impl Into<PathBuf>, manifest: Manifest) -> Self {
        let home = home.into();
        let backup_root = match &manifest.settings.backup_root {
            Some(root) => resolve_under(&home, root),
            None => default_backup_root(&home),
        };

        Self {
            repo_root: repo_root.into(),
            backup: BackupDir::timestamped(backup_root),
            home,
            manifest,
        }
    }

    /// Construct new installer from manifest found in dotfile repository.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::ReadManifest`] or [`InstallError::Config`] if
    ///   manifest cannot be loaded.
    pub fn load(repo_root: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Result<Self> {
        let repo_root = repo_root.into();
        let manifest = load_manifest(&repo_root)?;
        Ok(Self::new(repo_root, home, manifest))
    }

    /// Replace backup directory used for displaced files.
    pub fn with_backup(mut self, backup: BackupDir) -> Self {
        self.backup = backup;
        self
    }

    /// Manifest driving this installer.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Backup directory of this run.
    pub fn backup(&self) -> &BackupDir {
        &self.backup
    }

    /// Expand manifest into concrete mappings.
    ///
    /// Skips entries whose source does not exist in the dotfile repository.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::NotADirectory`] if expanded entry's source is
    ///   not a directory.
    /// - Return [`InstallError::Walk`] if expanded entry cannot be traversed.
    /// - Return [`InstallError::Config`] if expanded entry has invalid pattern.
    pub fn plan(&self) -> Result<Vec<Mapping>> {
        let mut mappings = Vec::new();
        for entry in &self.manifest.links {
            let source = resolve_under(&self.repo_root, &entry.source);
            let target = resolve_under(&self.home, &entry.target);

            if fs::symlink_metadata(&source).is_err() {
                debug!("skip {}: not in dotfile repository", entry.source.display());
                continue;
            }

            if entry.expand {
                mappings.extend(self.expand_entry(entry, &source, &target)?);
            } else {
                mappings.push(Mapping::new(source, target));
            }
        }

        Ok(mappings)
    }

    /// Reconcile every planned mapping in order.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Link`] naming the first mapping that failed.
    /// - Return any error of [`Installer::plan`].
    #[instrument(skip(self), level = "debug")]
    pub fn run(&mut self) -> Result<InstallReport> {
        let mappings = self.plan()?;
        let mut report = InstallReport::default();

        for mapping in mappings {
            let outcome = reconcile(&mapping.source, &mapping.target, &mut self.backup)
                .map_err(|err| InstallError::Link {
                    source: err,
                    mapping: mapping.clone(),
                })?;

            match outcome {
                LinkOutcome::AlreadyLinked => {
                    debug!("{}: {outcome}", mapping.target.display())
                }
                _ => info!("{}: {outcome}", mapping.target.display()),
            }
            report.entries.push((mapping, outcome));
        }

        // INVARIANT: Only name backup directory if this run stored something in it.
        if report.backed_up() > 0 {
            report.backup_dir = Some(self.backup.path());
        }

        Ok(report)
    }

    /// Inspect every planned mapping without changing anything.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Inspect`] if a target cannot be inspected.
    /// - Return any error of [`Installer::plan`].
    pub fn status(&self) -> Result<Vec<(Mapping, LinkState)>> {
        self.plan()?
            .into_iter()
            .map(|mapping| {
                let state = LinkState::inspect(&mapping.source, &mapping.target).map_err(
                    |err| InstallError::Inspect {
                        source: err,
                        path: mapping.target.clone(),
                    },
                )?;
                Ok((mapping, state))
            })
            .collect()
    }

    fn expand_entry(&self, entry: &LinkEntry, source: &Path, target: &Path) -> Result<Vec<Mapping>> {
        if !source.is_dir() {
            return Err(InstallError::NotADirectory {
                path: source.to_path_buf(),
            });
        }

        let pattern = entry
            .pattern
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(ConfigError::from)?;

        let walker = WalkBuilder::new(source)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|lhs, rhs| lhs.cmp(rhs))
            .build();

        let mut mappings = Vec::new();
        for dir_entry in walker {
            let dir_entry = dir_entry.map_err(|err| InstallError::Walk {
                source: err,
                path: source.to_path_buf(),
            })?;

            // INVARIANT: Only regular files get linked, directories are mirrored.
            if !dir_entry.file_type().is_some_and(|kind| kind.is_file()) {
                continue;
            }

            let Ok(relative) = dir_entry.path().strip_prefix(source) else {
                continue;
            };

            if let Some(pattern) = &pattern {
                if !pattern.matches_path(relative) {
                    debug!("skip {}: does not match {pattern}", relative.display());
                    continue;
                }
            }

            mappings.push(Mapping::new(dir_entry.path(), target.join(relative)));
        }

        Ok(mappings)
    }
}

/// Summary of installer run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Every reconciled mapping with its outcome, in order.
    pub entries: Vec<(Mapping, LinkOutcome)>,

    /// Backup directory, if anything needed backing up during this run.
    pub backup_dir: Option<PathBuf>,
}

impl InstallReport {
    /// Number of symlinks created where nothing existed.
    pub fn created(&self) -> usize {
        self.count(|outcome| matches!(outcome, LinkOutcome::Created))
    }

    /// Number of real files backed up and replaced by symlinks.
    pub fn backed_up(&self) -> usize {
        self.count(|outcome| matches!(outcome, LinkOutcome::BackedUp { .. }))
    }

    /// Number of stale symlinks replaced.
    pub fn replaced(&self) -> usize {
        self.count(|outcome| matches!(outcome, LinkOutcome::Replaced { .. }))
    }

    /// Number of mappings that were already linked.
    pub fn unchanged(&self) -> usize {
        self.count(|outcome| !outcome.is_change())
    }

    /// Check if run changed the file system at all.
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|(_, outcome)| outcome.is_change())
    }

    fn count(&self, predicate: impl Fn(&LinkOutcome) -> bool) -> usize {
        self.entries
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .count()
    }
}

impl Display for InstallReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} linked, {} backed up, {} replaced, {} already linked",
            self.created(),
            self.backed_up(),
            self.replaced(),
            self.unchanged()
        )
    }
}

/// Installer error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Manifest exists but cannot be read.
    #[error("failed to read manifest {:?}", path.display())]
    ReadManifest {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Manifest cannot be parsed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Expanded entry does not name a directory.
    #[error("cannot expand {:?} because it is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// Expanded entry cannot be traversed.
    #[error("failed to walk {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// Target cannot be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Mapping failed to reconcile.
    #[error("failed to link {mapping}")]
    Link {
        #[source]
        source: LinkError,
        mapping: Mapping,
    },
}

/// Friendly result alias :3
pub type Result<T, E = InstallError> = std::result::Result<T, E>;
