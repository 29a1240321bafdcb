// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotlink::{
    bootstrap::{Bootstrap, SystemProvisioner},
    install::{load_manifest, Installer},
    link::LinkState,
    path::home_dir,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use inquire::Confirm;
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  dotlink [options] [<command>]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to dotfile repository.
    #[arg(short, long, global = true, value_name = "path")]
    pub repo: Option<PathBuf>,

    /// Path to home directory to link into.
    #[arg(long, global = true, value_name = "path")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    fn run(self) -> Result<()> {
        let workspace = Workspace::resolve(self.repo, self.home)?;
        match self.command.unwrap_or(Command::Install) {
            Command::Install => run_install(&workspace),
            Command::Status => run_status(&workspace),
            Command::Bootstrap(opts) => run_bootstrap(&workspace, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Symlink dotfiles into home directory (default).
    #[command(override_usage = "dotlink install [options]")]
    Install,

    /// Show link state of every dotfile without changing anything.
    #[command(override_usage = "dotlink status [options]")]
    Status,

    /// Install package manager, packages, and shell framework, then link.
    #[command(override_usage = "dotlink bootstrap [options]")]
    Bootstrap(BootstrapOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BootstrapOptions {
    /// Run remote install scripts without asking first.
    #[arg(short, long)]
    pub yes: bool,

    /// Do not link dotfiles after provisioning.
    #[arg(short, long)]
    pub skip_install: bool,
}

struct Workspace {
    repo_root: PathBuf,
    home: PathBuf,
}

impl Workspace {
    fn resolve(repo: Option<PathBuf>, home: Option<PathBuf>) -> Result<Self> {
        let repo = repo.unwrap_or_else(|| PathBuf::from("."));

        // INVARIANT: Symlinks must point to absolute paths inside the repository.
        let repo_root = repo
            .canonicalize()
            .with_context(|| format!("cannot resolve dotfile repository {:?}", repo.display()))?;
        let home = match home {
            Some(home) => home,
            None => home_dir()?,
        };

        Ok(Self { repo_root, home })
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_install(workspace: &Workspace) -> Result<()> {
    let mut installer = Installer::load(&workspace.repo_root, &workspace.home)?;
    let report = installer.run()?;

    if let Some(backup_dir) = &report.backup_dir {
        warn!("displaced files backed up to {}", backup_dir.display());
    }
    info!("done: {report}");

    Ok(())
}

fn run_status(workspace: &Workspace) -> Result<()> {
    let installer = Installer::load(&workspace.repo_root, &workspace.home)?;
    for (mapping, state) in installer.status()? {
        match state {
            LinkState::Linked => info!("{}: {state}", mapping.target.display()),
            _ => warn!("{}: {state}", mapping.target.display()),
        }
    }

    Ok(())
}

fn run_bootstrap(workspace: &Workspace, opts: BootstrapOptions) -> Result<()> {
    let manifest = load_manifest(&workspace.repo_root)?;
    let bootstrap = Bootstrap::new(
        &workspace.repo_root,
        &workspace.home,
        manifest.bootstrap.clone(),
        SystemProvisioner,
    );

    if !opts.yes {
        if bootstrap.needs_package_manager() {
            confirm(format!(
                "{} is missing, run its remote install script?",
                manifest.bootstrap.package_manager
            ))?;
        }

        if bootstrap.needs_framework() {
            confirm(format!(
                "no shell framework at {}, run its remote install script?",
                bootstrap.framework_dir().display()
            ))?;
        }
    }

    let report = bootstrap.run()?;
    if !report.plugins_failed.is_empty() {
        warn!("plugins not installed: {}", report.plugins_failed.join(", "));
    }

    if opts.skip_install {
        return Ok(());
    }

    let mut installer = Installer::new(&workspace.repo_root, &workspace.home, manifest);
    let report = installer.run()?;
    if let Some(backup_dir) = &report.backup_dir {
        warn!("displaced files backed up to {}", backup_dir.display());
    }
    info!("done: {report}");

    Ok(())
}

fn confirm(message: String) -> Result<()> {
    let answer = Confirm::new(&message).with_default(false).prompt()?;
    if !answer {
        bail!("bootstrap cancelled");
    }

    Ok(())
}
