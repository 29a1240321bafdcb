// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Symlink-based dotfile installer.
//!
//! Dotlink keeps a home directory in sync with a dotfile repository by
//! symlinking files from the repository into the home directory. Whatever
//! real file gets in the way is backed up first, and symlinks that already
//! point to the right place are left alone, so dotlink can be run over and
//! over again without any harm.
//!
//! A fresh machine can optionally be [bootstrapped](bootstrap) before linking,
//! i.e., have its package manager, packages, shell framework, and shell
//! plugins installed.
//!
//! # See Also
//!
//! 1. [ArchWiki - dotfiles](https://wiki.archlinux.org/title/Dotfiles)
//! 2. [`Manifest`](config::Manifest)
//! 3. [`reconcile`](link::reconcile)

pub mod backup;
pub mod bootstrap;
pub mod config;
pub mod install;
pub mod link;
pub mod path;
